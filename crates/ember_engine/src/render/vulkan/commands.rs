//! Command buffers
//!
//! A [`CommandBuffer`] tracks its lifecycle explicitly:
//!
//! ```text
//! NotAllocated -> Ready -> Recording <-> InRenderPass
//!                            |
//!                            v
//!                  RecordingEnded -> Submitted -> Ready
//! ```
//!
//! `reset` returns any allocated buffer to `Ready` and `free` returns it to
//! `NotAllocated`. An illegal transition is refused before the GPU command is
//! recorded.

use super::{VulkanError, VulkanResult};
use ash::{vk, Device};

/// Lifecycle state of a command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    /// No handle
    NotAllocated,
    /// Allocated, ready to record
    Ready,
    /// Between `begin` and `end`
    Recording,
    /// Inside a render pass
    InRenderPass,
    /// Recorded, waiting for submission
    RecordingEnded,
    /// Handed to a queue
    Submitted,
}

/// Operations that move a command buffer between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferOp {
    /// Allocate from a pool
    Allocate,
    /// Begin recording
    Begin,
    /// Begin a render pass
    BeginRenderPass,
    /// End the render pass
    EndRenderPass,
    /// End recording
    End,
    /// Submitted to a queue
    MarkSubmitted,
    /// Reset after its fence signalled
    Reset,
    /// Return to the pool
    Free,
}

impl CommandBufferState {
    /// State after `op`, or `None` when `op` is not legal here
    pub fn next(self, op: CommandBufferOp) -> Option<Self> {
        use CommandBufferOp as Op;
        use CommandBufferState as S;
        match (self, op) {
            (S::NotAllocated, Op::Allocate) => Some(S::Ready),
            (S::Ready, Op::Begin) => Some(S::Recording),
            (S::Recording, Op::BeginRenderPass) => Some(S::InRenderPass),
            (S::InRenderPass, Op::EndRenderPass) => Some(S::Recording),
            (S::Recording, Op::End) => Some(S::RecordingEnded),
            (S::RecordingEnded, Op::MarkSubmitted) => Some(S::Submitted),
            (S::NotAllocated, Op::Reset | Op::Free) => None,
            (_, Op::Reset) => Some(S::Ready),
            (_, Op::Free) => Some(S::NotAllocated),
            _ => None,
        }
    }
}

/// Primary command buffer with tracked state
pub struct CommandBuffer {
    device: Device,
    pool: vk::CommandPool,
    handle: vk::CommandBuffer,
    state: CommandBufferState,
}

impl CommandBuffer {
    /// Allocate a primary command buffer from `pool`
    pub fn allocate(device: &Device, pool: vk::CommandPool) -> VulkanResult<Self> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { device.allocate_command_buffers(&alloc_info).map_err(VulkanError::Api)? };
        let handle = buffers
            .first()
            .copied()
            .ok_or_else(|| VulkanError::InitializationFailed("No command buffer allocated".to_string()))?;

        Ok(Self {
            device: device.clone(),
            pool,
            handle,
            state: CommandBufferState::Ready,
        })
    }

    /// Raw handle
    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    /// Current state
    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    fn transition(&mut self, op: CommandBufferOp) -> VulkanResult<()> {
        match self.state.next(op) {
            Some(next) => {
                self.state = next;
                Ok(())
            }
            None => {
                log::error!("[COMMANDS] Illegal {:?} in state {:?}", op, self.state);
                debug_assert!(false, "illegal command buffer transition {op:?} from {:?}", self.state);
                Err(VulkanError::InvalidOperation {
                    reason: format!("command buffer cannot {op:?} while {:?}", self.state),
                })
            }
        }
    }

    /// Begin recording
    pub fn begin(&mut self, single_use: bool, renderpass_continue: bool, simultaneous_use: bool) -> VulkanResult<()> {
        self.transition(CommandBufferOp::Begin)?;
        let mut flags = vk::CommandBufferUsageFlags::empty();
        if single_use {
            flags |= vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
        }
        if renderpass_continue {
            flags |= vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE;
        }
        if simultaneous_use {
            flags |= vk::CommandBufferUsageFlags::SIMULTANEOUS_USE;
        }
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);
        unsafe {
            self.device
                .begin_command_buffer(self.handle, &begin_info)
                .map_err(VulkanError::Api)
        }
    }

    /// Begin a render pass with inline contents
    pub fn begin_render_pass(&mut self, begin_info: &vk::RenderPassBeginInfo) -> VulkanResult<()> {
        self.transition(CommandBufferOp::BeginRenderPass)?;
        unsafe {
            self.device
                .cmd_begin_render_pass(self.handle, begin_info, vk::SubpassContents::INLINE);
        }
        Ok(())
    }

    /// End the active render pass
    pub fn end_render_pass(&mut self) -> VulkanResult<()> {
        self.transition(CommandBufferOp::EndRenderPass)?;
        unsafe {
            self.device.cmd_end_render_pass(self.handle);
        }
        Ok(())
    }

    /// End recording
    pub fn end(&mut self) -> VulkanResult<()> {
        self.transition(CommandBufferOp::End)?;
        unsafe { self.device.end_command_buffer(self.handle).map_err(VulkanError::Api) }
    }

    /// Record that the buffer was handed to a queue
    pub fn mark_submitted(&mut self) -> VulkanResult<()> {
        self.transition(CommandBufferOp::MarkSubmitted)
    }

    /// Back to `Ready`; call once the buffer's fence has signalled
    pub fn reset(&mut self) -> VulkanResult<()> {
        self.transition(CommandBufferOp::Reset)?;
        unsafe {
            self.device
                .reset_command_buffer(self.handle, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)
        }
    }

    /// Whether a render pass is open
    pub fn in_render_pass(&self) -> bool {
        self.state == CommandBufferState::InRenderPass
    }

    /// Allocate and begin a one-time-submit buffer
    pub fn begin_single_use(device: &Device, pool: vk::CommandPool) -> VulkanResult<Self> {
        let mut buffer = Self::allocate(device, pool)?;
        buffer.begin(true, false, false)?;
        Ok(buffer)
    }

    /// End, submit and wait for a single-use buffer, then free it
    pub fn end_single_use(mut self, queue: vk::Queue) -> VulkanResult<()> {
        self.end()?;
        let buffers = [self.handle];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&buffers).build();
        unsafe {
            self.device
                .queue_submit(queue, &[submit_info], vk::Fence::null())
                .map_err(VulkanError::Api)?;
            self.device.queue_wait_idle(queue).map_err(VulkanError::Api)?;
        }
        self.mark_submitted()
        // Freed on drop
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        if self.state != CommandBufferState::NotAllocated {
            unsafe {
                self.device.free_command_buffers(self.pool, &[self.handle]);
            }
            self.state = CommandBufferState::NotAllocated;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CommandBufferOp as Op;
    use super::CommandBufferState as S;

    const ALL_STATES: [S; 6] = [
        S::NotAllocated,
        S::Ready,
        S::Recording,
        S::InRenderPass,
        S::RecordingEnded,
        S::Submitted,
    ];

    #[test]
    fn test_full_frame_cycle() {
        let mut state = S::NotAllocated;
        for (op, expected) in [
            (Op::Allocate, S::Ready),
            (Op::Begin, S::Recording),
            (Op::BeginRenderPass, S::InRenderPass),
            (Op::EndRenderPass, S::Recording),
            (Op::BeginRenderPass, S::InRenderPass),
            (Op::EndRenderPass, S::Recording),
            (Op::End, S::RecordingEnded),
            (Op::MarkSubmitted, S::Submitted),
            (Op::Reset, S::Ready),
            (Op::Free, S::NotAllocated),
        ] {
            state = state.next(op).unwrap();
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn test_illegal_transitions_refused() {
        assert_eq!(S::Ready.next(Op::End), None);
        assert_eq!(S::Ready.next(Op::BeginRenderPass), None);
        assert_eq!(S::Recording.next(Op::Begin), None);
        assert_eq!(S::InRenderPass.next(Op::End), None);
        assert_eq!(S::InRenderPass.next(Op::BeginRenderPass), None);
        assert_eq!(S::RecordingEnded.next(Op::BeginRenderPass), None);
        assert_eq!(S::Submitted.next(Op::Begin), None);
        assert_eq!(S::NotAllocated.next(Op::Begin), None);
        assert_eq!(S::Ready.next(Op::Allocate), None);
    }

    #[test]
    fn test_reset_and_free_from_any_allocated_state() {
        for state in ALL_STATES.into_iter().filter(|s| *s != S::NotAllocated) {
            assert_eq!(state.next(Op::Reset), Some(S::Ready));
            assert_eq!(state.next(Op::Free), Some(S::NotAllocated));
        }
        assert_eq!(S::NotAllocated.next(Op::Reset), None);
        assert_eq!(S::NotAllocated.next(Op::Free), None);
    }
}
