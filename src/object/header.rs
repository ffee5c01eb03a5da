//! Object header word encoding.
//!
//! Every heap object starts with a single header word:
//!
//! ```text
//! 64-bit: | cid: 23 | identity hash: 32 | size: 8 | mark: 1 |  <- LSB
//! 32-bit: | cid: 11 | identity hash: 12 | size: 8 | mark: 1 |  <- LSB
//! ```
//!
//! The size field counts allocation units (`OBJECT_ALIGNMENT` bytes each);
//! zero means the object is too large for the field and its size derives
//! from the shape instead.
//!
//! The mark bit sits at bit 0, the same position as the heap-object tag of
//! [`Value`](super::Value). A forwarded object's header is the tagged pointer
//! to its copy: `new_addr | mark` is simultaneously "marked" and a valid
//! `Value`. All forwarding goes through [`set_forwarded`],
//! [`is_forwarded`] and [`forwarding_target`]; no other module reads raw
//! header bits.

use super::{Cid, Value, OBJECT_ALIGNMENT, WORD_SIZE};

/// Mask of the mark bit, aliased with the heap-object tag bit.
pub(crate) const MARK_BIT: usize = 1;

const SIZE_SHIFT: u32 = 1;
const SIZE_BITS: u32 = 8;

const HASH_SHIFT: u32 = SIZE_SHIFT + SIZE_BITS;
#[cfg(target_pointer_width = "64")]
const HASH_BITS: u32 = 32;
#[cfg(target_pointer_width = "32")]
const HASH_BITS: u32 = 12;

const CID_SHIFT: u32 = HASH_SHIFT + HASH_BITS;
#[cfg(target_pointer_width = "64")]
const CID_BITS: u32 = 23;
#[cfg(target_pointer_width = "32")]
const CID_BITS: u32 = 11;

const SIZE_MASK: usize = (1 << SIZE_BITS) - 1;
const HASH_MASK: usize = (1 << HASH_BITS) - 1;
const CID_MASK: usize = (1 << CID_BITS) - 1;

/// Largest heap size, in allocation units, representable in the size field.
pub(crate) const MAX_SIZE_UNITS: usize = SIZE_MASK;

/// Largest identity hash representable in the hash field.
pub(crate) const MAX_IDENTITY_HASH: usize = HASH_MASK;

/// Largest class id representable in the cid field.
pub(crate) const MAX_CID: usize = CID_MASK;

/// Build a fresh header: given cid, given size, hash zero, mark clear.
///
/// `heap_size` is in bytes and must be a multiple of `OBJECT_ALIGNMENT`;
/// sizes past the field's range encode as zero.
pub(crate) fn encode(cid: Cid, heap_size: usize) -> usize {
    debug_assert!(heap_size % OBJECT_ALIGNMENT == 0);
    debug_assert!(cid <= MAX_CID);
    let units = heap_size / OBJECT_ALIGNMENT;
    let size_field = if units > MAX_SIZE_UNITS { 0 } else { units };
    (cid << CID_SHIFT) | (size_field << SIZE_SHIFT)
}

/// Extract the class id.
#[inline]
pub(crate) fn cid(header: usize) -> Cid {
    (header >> CID_SHIFT) & CID_MASK
}

/// Replace the class id, preserving all other fields.
#[inline]
pub(crate) fn with_cid(header: usize, cid: Cid) -> usize {
    debug_assert!(cid <= MAX_CID);
    (header & !(CID_MASK << CID_SHIFT)) | (cid << CID_SHIFT)
}

/// Extract the size field, in allocation units (0 = overflow).
#[inline]
pub(crate) fn size_units(header: usize) -> usize {
    (header >> SIZE_SHIFT) & SIZE_MASK
}

/// Extract the identity hash field.
#[inline]
pub(crate) fn identity_hash(header: usize) -> usize {
    (header >> HASH_SHIFT) & HASH_MASK
}

/// Replace the identity hash field, preserving all other fields.
#[inline]
pub(crate) fn with_identity_hash(header: usize, hash: usize) -> usize {
    debug_assert!(hash <= MAX_IDENTITY_HASH);
    (header & !(HASH_MASK << HASH_SHIFT)) | (hash << HASH_SHIFT)
}

/// Whether the object at `addr` has been replaced by a forwarding header.
#[inline]
pub(crate) fn is_forwarded(addr: usize) -> bool {
    debug_assert!(addr % WORD_SIZE == 0);
    let header = unsafe { *(addr as *const usize) };
    header & MARK_BIT != 0
}

/// The forwarded copy of the object at `addr`.
///
/// The whole header word is the tagged pointer: the mark bit doubles as the
/// heap-object tag.
#[inline]
pub(crate) fn forwarding_target(addr: usize) -> Value {
    debug_assert!(is_forwarded(addr));
    let header = unsafe { *(addr as *const usize) };
    Value::from_raw(header)
}

/// Overwrite the header at `old_addr` with a forwarding pointer to
/// `new_addr`.
#[inline]
pub(crate) fn set_forwarded(old_addr: usize, new_addr: usize) {
    debug_assert!(!is_forwarded(old_addr));
    let forwarding_header = new_addr | MARK_BIT;
    unsafe { *(old_addr as *mut usize) = forwarding_header };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::FIRST_REGULAR_OBJECT_CID;

    #[test]
    fn test_encode_round_trip() {
        let header = encode(FIRST_REGULAR_OBJECT_CID, 3 * OBJECT_ALIGNMENT);
        assert_eq!(cid(header), FIRST_REGULAR_OBJECT_CID);
        assert_eq!(size_units(header), 3);
        assert_eq!(identity_hash(header), 0);
        assert_eq!(header & MARK_BIT, 0);
    }

    #[test]
    fn test_size_overflow_encodes_as_zero() {
        let huge = (MAX_SIZE_UNITS + 1) * OBJECT_ALIGNMENT;
        let header = encode(FIRST_REGULAR_OBJECT_CID, huge);
        assert_eq!(size_units(header), 0);
    }

    #[test]
    fn test_field_updates_preserve_others() {
        let header = encode(20, 2 * OBJECT_ALIGNMENT);
        let header = with_identity_hash(header, 0xbeef);
        assert_eq!(cid(header), 20);
        assert_eq!(identity_hash(header), 0xbeef);

        let header = with_cid(header, 21);
        assert_eq!(cid(header), 21);
        assert_eq!(identity_hash(header), 0xbeef);
        assert_eq!(size_units(header), 2);
    }

    #[test]
    fn test_forwarding_header_is_tagged_pointer() {
        let mut words = [0usize; 4];
        let old_addr = words.as_mut_ptr() as usize;
        words[0] = encode(20, 2 * OBJECT_ALIGNMENT);
        assert!(!is_forwarded(old_addr));

        let new_addr = old_addr + 2 * WORD_SIZE;
        set_forwarded(old_addr, new_addr);
        assert!(is_forwarded(old_addr));

        let target = forwarding_target(old_addr);
        assert!(target.is_heap_object());
        assert_eq!(target.heap_object().addr(), new_addr);
    }
}
