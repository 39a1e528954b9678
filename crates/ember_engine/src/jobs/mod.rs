//! Job system
//!
//! A fixed pool of worker threads pulls jobs from three priority queues.
//! Each worker carries a [`JobType`] mask and only runs jobs whose type it
//! accepts. Entry points run on a worker; their success/failure callbacks are
//! queued and run on the main thread when [`JobSystem::update`] is called, so
//! callbacks are free to touch renderer state.

mod system;

pub use system::{default_type_masks, JobSystem};

use bitflags::bitflags;
use std::any::Any;

bitflags! {
    /// Kinds of work a job performs, used to route it to a capable worker
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct JobType: u8 {
        /// Plain CPU work
        const GENERAL = 1 << 0;
        /// File IO and decoding
        const RESOURCE_LOAD = 1 << 1;
        /// Work that touches the graphics context
        const GPU_RESOURCE = 1 << 2;
    }
}

/// Queue a job is placed on. Higher priorities are always drained first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPriority {
    /// Runs when nothing else is queued
    Low,
    /// Default priority
    Normal,
    /// Runs before everything else
    High,
}

/// Identifier handed out by [`JobSystem::submit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

/// Job system errors
#[derive(thiserror::Error, Debug)]
pub enum JobError {
    /// A worker thread could not be spawned
    #[error("Failed to spawn job worker {index}: {source}")]
    SpawnFailed {
        /// Worker index
        index: usize,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// The system was created without workers
    #[error("Job system requires at least one worker thread")]
    NoWorkers,

    /// The system is shutting down and no longer accepts jobs
    #[error("Job system is shut down")]
    ShutDown,
}

pub(crate) type ErasedValue = Box<dyn Any + Send>;

/// What a worker reports back for one job
pub(crate) enum JobOutcome {
    Succeeded(ErasedValue),
    Failed(ErasedValue),
    Panicked,
}

type EntryPoint<T, E> = Box<dyn FnOnce() -> Result<T, E> + Send>;
type Callback<C, V> = Box<dyn FnOnce(&mut C, V)>;

/// Description of one unit of background work.
///
/// The entry point owns everything it needs (moved closure state) and runs on
/// a worker thread. `on_success` receives the `Ok` value and `on_fail` the
/// `Err` value, both on the main thread with the caller's context `C`.
pub struct JobInfo<C, T, E> {
    pub(crate) job_type: JobType,
    pub(crate) priority: JobPriority,
    pub(crate) entry_point: EntryPoint<T, E>,
    pub(crate) on_success: Option<Callback<C, T>>,
    pub(crate) on_fail: Option<Callback<C, E>>,
}

impl<C, T, E> JobInfo<C, T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Create a job with no callbacks
    pub fn new<F>(job_type: JobType, priority: JobPriority, entry_point: F) -> Self
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        Self {
            job_type,
            priority,
            entry_point: Box::new(entry_point),
            on_success: None,
            on_fail: None,
        }
    }

    /// Callback run on the main thread when the entry point returns `Ok`
    pub fn on_success(mut self, callback: impl FnOnce(&mut C, T) + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    /// Callback run on the main thread when the entry point returns `Err`
    pub fn on_fail(mut self, callback: impl FnOnce(&mut C, E) + 'static) -> Self {
        self.on_fail = Some(Box::new(callback));
        self
    }

    /// Type of the job
    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    /// Priority of the job
    pub fn priority(&self) -> JobPriority {
        self.priority
    }
}
