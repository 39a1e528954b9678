//! Offset free-list
//!
//! Tracks free byte ranges of a fixed-size region. Used to sub-allocate the
//! shared vertex/index buffers and shader uniform buffers. Allocation is
//! first-fit; freed ranges are coalesced with their neighbours.

use thiserror::Error;

/// Free-list errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FreeListError {
    /// No free range is large enough for the request
    #[error("Free list has no block of {requested} bytes ({free} bytes free)")]
    OutOfSpace {
        /// Bytes requested
        requested: u64,
        /// Total free bytes at the time of the request
        free: u64,
    },

    /// The freed range was never allocated or overlaps a free range
    #[error("Invalid free of {size} bytes at offset {offset}")]
    InvalidFree {
        /// Offset passed to `free`
        offset: u64,
        /// Size passed to `free`
        size: u64,
    },

    /// Resizing would drop allocated data
    #[error("Cannot shrink free list from {current} to {requested} bytes")]
    CannotShrink {
        /// Current total size
        current: u64,
        /// Requested total size
        requested: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeRange {
    offset: u64,
    size: u64,
}

/// First-fit offset allocator over a `total_size` byte region
#[derive(Debug, Clone)]
pub struct FreeList {
    total_size: u64,
    // Sorted by offset, never adjacent
    free: Vec<FreeRange>,
}

impl FreeList {
    /// Create a free list with the whole region free
    pub fn new(total_size: u64) -> Self {
        let free = if total_size > 0 {
            vec![FreeRange {
                offset: 0,
                size: total_size,
            }]
        } else {
            Vec::new()
        };
        Self { total_size, free }
    }

    /// Total managed size in bytes
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Bytes currently free
    pub fn free_space(&self) -> u64 {
        self.free.iter().map(|r| r.size).sum()
    }

    /// Allocate `size` bytes, returning the offset of the block
    pub fn allocate(&mut self, size: u64) -> Result<u64, FreeListError> {
        let index = self
            .free
            .iter()
            .position(|r| r.size >= size)
            .ok_or(FreeListError::OutOfSpace {
                requested: size,
                free: self.free_space(),
            })?;

        let range = &mut self.free[index];
        let offset = range.offset;
        if range.size == size {
            self.free.remove(index);
        } else {
            range.offset += size;
            range.size -= size;
        }
        Ok(offset)
    }

    /// Return a previously allocated block
    pub fn free(&mut self, offset: u64, size: u64) -> Result<(), FreeListError> {
        let invalid = FreeListError::InvalidFree { offset, size };
        if size == 0 || offset + size > self.total_size {
            return Err(invalid);
        }

        let index = self.free.partition_point(|r| r.offset < offset);

        if let Some(prev) = index.checked_sub(1).map(|i| self.free[i]) {
            if prev.offset + prev.size > offset {
                return Err(invalid);
            }
        }
        if let Some(next) = self.free.get(index) {
            if offset + size > next.offset {
                return Err(invalid);
            }
        }

        self.free.insert(index, FreeRange { offset, size });

        // Merge with the following range
        if index + 1 < self.free.len() {
            let next = self.free[index + 1];
            if offset + size == next.offset {
                self.free[index].size += next.size;
                self.free.remove(index + 1);
            }
        }
        // Merge with the preceding range
        if index > 0 {
            let prev = self.free[index - 1];
            if prev.offset + prev.size == self.free[index].offset {
                self.free[index - 1].size += self.free[index].size;
                self.free.remove(index);
            }
        }
        Ok(())
    }

    /// Grow the managed region. The new space is appended as free.
    pub fn resize(&mut self, new_size: u64) -> Result<(), FreeListError> {
        if new_size < self.total_size {
            return Err(FreeListError::CannotShrink {
                current: self.total_size,
                requested: new_size,
            });
        }
        let grown = new_size - self.total_size;
        let old_size = self.total_size;
        self.total_size = new_size;
        if grown > 0 {
            self.free(old_size, grown)?;
        }
        Ok(())
    }

    /// Mark the whole region free again
    pub fn clear(&mut self) {
        *self = Self::new(self.total_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_is_first_fit() {
        let mut list = FreeList::new(100);
        assert_eq!(list.allocate(10), Ok(0));
        assert_eq!(list.allocate(20), Ok(10));
        assert_eq!(list.allocate(30), Ok(30));
        assert_eq!(list.free_space(), 40);
    }

    #[test]
    fn test_free_coalesces_neighbours() {
        let mut list = FreeList::new(64);
        let a = list.allocate(16).unwrap();
        let b = list.allocate(16).unwrap();
        let c = list.allocate(16).unwrap();

        list.free(a, 16).unwrap();
        list.free(c, 16).unwrap();
        list.free(b, 16).unwrap();

        assert_eq!(list.free_space(), 64);
        assert_eq!(list.allocate(64), Ok(0));
    }

    #[test]
    fn test_reuses_freed_hole() {
        let mut list = FreeList::new(64);
        let _a = list.allocate(16).unwrap();
        let b = list.allocate(16).unwrap();
        let _c = list.allocate(16).unwrap();
        list.free(b, 16).unwrap();
        assert_eq!(list.allocate(8), Ok(16));
    }

    #[test]
    fn test_out_of_space() {
        let mut list = FreeList::new(32);
        list.allocate(30).unwrap();
        assert_eq!(
            list.allocate(4),
            Err(FreeListError::OutOfSpace {
                requested: 4,
                free: 2
            })
        );
    }

    #[test]
    fn test_double_free_rejected() {
        let mut list = FreeList::new(32);
        let a = list.allocate(8).unwrap();
        list.free(a, 8).unwrap();
        assert!(list.free(a, 8).is_err());
    }

    #[test]
    fn test_resize_appends_free_space() {
        let mut list = FreeList::new(16);
        list.allocate(16).unwrap();
        list.resize(48).unwrap();
        assert_eq!(list.allocate(32), Ok(16));
        assert!(list.resize(8).is_err());
    }
}
