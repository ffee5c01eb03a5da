//! One of the two copying spaces.
//!
//! A semispace is a single contiguous reservation. The active space fills by
//! bumping the heap's `top`; the passive space holds last cycle's data and
//! is read-only garbage until the next flip. Object starts sit at
//! `base + NEW_OBJECT_ALIGNMENT_OFFSET` so tagged pointers keep their
//! alignment.

use super::virtual_memory::{Protection, VirtualMemory};
use crate::object::{NEW_OBJECT_ALIGNMENT_OFFSET, OBJECT_ALIGNMENT_MASK};

/// Poison byte for memory the allocator has not handed out.
#[allow(dead_code)]
pub(crate) const UNALLOCATED_BYTE: u8 = 0xab;
/// Poison byte for allocated but uninitialized payload.
#[allow(dead_code)]
pub(crate) const UNINITIALIZED_BYTE: u8 = 0xcb;

pub(crate) struct Semispace {
    memory: VirtualMemory,
}

impl Semispace {
    /// Reserve a semispace of `size` bytes.
    pub(crate) fn reserve(size: usize) -> Semispace {
        let memory = VirtualMemory::reserve(size);
        assert_eq!(
            memory.base() & OBJECT_ALIGNMENT_MASK,
            0,
            "semispace base must be object aligned"
        );
        let space = Semispace { memory };
        #[cfg(debug_assertions)]
        space.poison_unallocated();
        space
    }

    #[inline]
    pub(crate) fn base(&self) -> usize {
        self.memory.base()
    }

    #[inline]
    pub(crate) fn limit(&self) -> usize {
        self.memory.limit()
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.memory.size()
    }

    /// Where the first object goes.
    #[inline]
    pub(crate) fn object_start(&self) -> usize {
        self.base() + NEW_OBJECT_ALIGNMENT_OFFSET
    }

    /// Whether `addr` falls inside this space.
    #[inline]
    pub(crate) fn contains(&self, addr: usize) -> bool {
        addr >= self.base() && addr < self.limit()
    }

    /// Fill the whole space with the unallocated poison pattern.
    #[cfg(debug_assertions)]
    pub(crate) fn poison_unallocated(&self) {
        unsafe {
            std::ptr::write_bytes(self.base() as *mut u8, UNALLOCATED_BYTE, self.size());
        }
    }

    /// Make the space readable and writable.
    #[cfg(debug_assertions)]
    pub(crate) fn protect_read_write(&self) {
        self.memory.protect(Protection::ReadWrite);
    }

    /// Make any access to the space fault.
    #[cfg(debug_assertions)]
    pub(crate) fn protect_no_access(&self) {
        self.memory.protect(Protection::NoAccess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_start_has_alignment_offset() {
        let space = Semispace::reserve(64 * 1024);
        assert_eq!(
            space.object_start() & OBJECT_ALIGNMENT_MASK,
            NEW_OBJECT_ALIGNMENT_OFFSET
        );
        assert!(space.contains(space.object_start()));
        assert!(!space.contains(space.limit()));
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_fresh_space_is_poisoned() {
        let space = Semispace::reserve(4096);
        let first = unsafe { *(space.base() as *const u8) };
        assert_eq!(first, UNALLOCATED_BYTE);
    }
}
