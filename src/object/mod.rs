//! Tagged values and heap object shapes.
//!
//! A [`Value`] is one machine word. Bit 0 discriminates:
//!
//! ```text
//! | payload: N-1 bits          | 0 |   small integer (never moves)
//! | object address + 1         | 1 |   heap object
//! ```
//!
//! Heap objects are laid out as word arrays behind a one-word header
//! (see [`header`]). Word 0 is always the header; the remaining words are
//! the shape's fields. The shapes:
//!
//! ```text
//! RegularObject  | header | slot 0 | slot 1 | ...            | (pad)   |
//! Array          | header | size   | elem 0 | ...            |         |
//! WeakArray      | header | size   | next   | elem 0 | ...   |         |
//! Ephemeron      | header | key    | value  | finalizer | next | pad   |
//! ByteArray      | header | size   | bytes...                          |
//! ByteString     | header | size   | hash   | bytes...                 |
//! WideString     | header | size   | hash   | u32 chars...             |
//! Closure        | header | count  | defining | bci | nargs | copied...|
//! Activation     | header | sender | bci | method | closure | receiver |
//!                | depth  | temps[MAX_TEMPS]                           |
//! MediumInteger  | header | i64                                        |
//! LargeInteger   | header | negative | size | capacity | u32 digits... |
//! Float64        | header | f64                                        |
//! Corpse         | header | target | (overflow size)                   |
//! ```
//!
//! `next` slots are collector-private list links; outside a collection they
//! hold small-integer 0.
//!
//! All views here are raw: any allocation may move the underlying object,
//! so a view must not be held across an allocation unless the referenced
//! value is protected by a handle or reachable from a root.

pub(crate) mod header;

use std::fmt;

/// Machine word size in bytes.
pub const WORD_SIZE: usize = std::mem::size_of::<usize>();

/// Allocation granularity: every heap object occupies a multiple of two
/// words, so object addresses keep a constant alignment offset.
pub const OBJECT_ALIGNMENT: usize = 2 * WORD_SIZE;

/// Mask for the low bits of an object address under [`OBJECT_ALIGNMENT`].
pub const OBJECT_ALIGNMENT_MASK: usize = OBJECT_ALIGNMENT - 1;

/// Offset of object starts from the alignment boundary. Freshly allocated
/// objects sit at `base + WORD_SIZE`, so `addr & OBJECT_ALIGNMENT_MASK`
/// equals this constant for every object.
pub const NEW_OBJECT_ALIGNMENT_OFFSET: usize = WORD_SIZE;

/// Fixed temporary-slot capacity of an activation.
pub const ACTIVATION_MAX_TEMPS: usize = 32;

/// Class identifier: an index into the class table.
pub type Cid = usize;

/// Never a valid class.
pub const ILLEGAL_CID: Cid = 0;
/// Object replaced by `become`; the target sits in the first payload word.
pub const FORWARDING_CORPSE_CID: Cid = 1;
/// Tagged immediates. No instance ever carries this cid in a header.
pub const SMALL_INTEGER_CID: Cid = 2;
/// Boxed 64-bit integer.
pub const MEDIUM_INTEGER_CID: Cid = 3;
/// Arbitrary-precision integer.
pub const LARGE_INTEGER_CID: Cid = 4;
/// Boxed IEEE double.
pub const FLOAT64_CID: Cid = 5;
/// Raw byte vector.
pub const BYTE_ARRAY_CID: Cid = 6;
/// Latin-1 string.
pub const BYTE_STRING_CID: Cid = 7;
/// UTF-32 string.
pub const WIDE_STRING_CID: Cid = 8;
/// Pointer vector.
pub const ARRAY_CID: Cid = 9;
/// Pointer vector whose slots do not retain their targets.
pub const WEAK_ARRAY_CID: Cid = 10;
/// Key/value/finalizer triple with key-gated retention.
pub const EPHEMERON_CID: Cid = 11;
/// Interpreter frame.
pub const ACTIVATION_CID: Cid = 12;
/// Block closure.
pub const CLOSURE_CID: Cid = 13;
/// First cid handed out by the class table; everything below is reserved.
pub const FIRST_REGULAR_OBJECT_CID: Cid = 14;
/// First cid subject to class-table sweeping.
pub const FIRST_LEGAL_CID: Cid = 1;

/// Object-store slot holding the nil object.
pub const OBJECT_STORE_NIL_INDEX: usize = 0;
/// Object-store slot holding the Message behavior.
pub const OBJECT_STORE_MESSAGE_INDEX: usize = 1;

const BEHAVIOR_MIXIN_INDEX: usize = 3;
const BEHAVIOR_FORMAT_INDEX: usize = 4;
const BEHAVIOR_ID_INDEX: usize = 5;
const METHOD_MIXIN_INDEX: usize = 0;
const METHOD_SELECTOR_INDEX: usize = 1;
const MIXIN_NAME_INDEX: usize = 0;

/// Round a byte size up to the allocation granularity.
#[inline]
pub const fn allocation_size(size: usize) -> usize {
    (size + OBJECT_ALIGNMENT - 1) & !OBJECT_ALIGNMENT_MASK
}

// =============================================================================
// Value
// =============================================================================

/// A tagged word: small integer or heap object reference.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Value(usize);

impl Value {
    /// The small integer zero. Used as the inert placeholder wherever a slot
    /// must be safe to visit before real initialization.
    pub const ZERO: Value = Value(0);

    /// Tag a small integer.
    ///
    /// The payload loses one bit to the tag; values outside that range are a
    /// caller bug.
    #[inline]
    pub fn small_int(v: isize) -> Value {
        debug_assert!((v << 1) >> 1 == v, "small integer payload out of range");
        Value((v as usize) << 1)
    }

    #[inline]
    pub(crate) fn from_raw(raw: usize) -> Value {
        Value(raw)
    }

    /// The raw tagged word.
    #[inline]
    pub fn raw(self) -> usize {
        self.0
    }

    /// Whether this is an immediate small integer.
    #[inline]
    pub fn is_small_integer(self) -> bool {
        self.0 & header::MARK_BIT == 0
    }

    /// Whether this references a heap object.
    #[inline]
    pub fn is_heap_object(self) -> bool {
        !self.is_small_integer()
    }

    /// The integer payload. Must be a small integer.
    #[inline]
    pub fn as_small_integer(self) -> isize {
        debug_assert!(self.is_small_integer());
        (self.0 as isize) >> 1
    }

    /// View as a heap object. Must not be a small integer.
    #[inline]
    pub fn heap_object(self) -> HeapObject {
        debug_assert!(self.is_heap_object());
        HeapObject(self.0 - 1)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_small_integer() {
            write!(f, "smi({})", self.as_small_integer())
        } else {
            write!(f, "obj({:#x})", self.0 - 1)
        }
    }
}

// =============================================================================
// HeapObject
// =============================================================================

/// An untagged heap object address with header and slot access.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct HeapObject(usize);

impl HeapObject {
    /// View the object starting at `addr`.
    #[inline]
    pub(crate) fn at(addr: usize) -> HeapObject {
        debug_assert!(addr & OBJECT_ALIGNMENT_MASK == NEW_OBJECT_ALIGNMENT_OFFSET);
        HeapObject(addr)
    }

    /// The object's start address.
    #[inline]
    pub fn addr(self) -> usize {
        self.0
    }

    /// The tagged reference to this object.
    #[inline]
    pub fn value(self) -> Value {
        Value(self.0 + 1)
    }

    #[inline]
    fn header(self) -> usize {
        unsafe { *(self.0 as *const usize) }
    }

    #[inline]
    fn set_header(self, header: usize) {
        unsafe { *(self.0 as *mut usize) = header };
    }

    /// The object's class id.
    #[inline]
    pub fn cid(self) -> Cid {
        header::cid(self.header())
    }

    /// Rewrite the class id. Only `become` retargets live instances.
    #[inline]
    pub(crate) fn set_cid(self, cid: Cid) {
        self.set_header(header::with_cid(self.header(), cid));
    }

    /// The identity hash field (0 = not yet assigned).
    #[inline]
    pub fn identity_hash(self) -> usize {
        header::identity_hash(self.header())
    }

    /// Install an identity hash.
    #[inline]
    pub(crate) fn set_identity_hash(self, hash: usize) {
        self.set_header(header::with_identity_hash(self.header(), hash));
    }

    /// The header's size field in allocation units (0 = overflow).
    #[inline]
    pub(crate) fn size_units(self) -> usize {
        header::size_units(self.header())
    }

    /// Total size in bytes, from the header's size field or, when that
    /// overflowed, from the shape.
    pub fn heap_size(self) -> usize {
        let units = header::size_units(self.header());
        if units != 0 {
            return units * OBJECT_ALIGNMENT;
        }
        match self.cid() {
            ARRAY_CID => allocation_size((2 + self.word_at(1) / 2) * WORD_SIZE),
            WEAK_ARRAY_CID => allocation_size((3 + self.word_at(1) / 2) * WORD_SIZE),
            BYTE_ARRAY_CID => allocation_size(2 * WORD_SIZE + self.word_at(1) / 2),
            BYTE_STRING_CID => allocation_size(3 * WORD_SIZE + self.word_at(1) / 2),
            WIDE_STRING_CID => allocation_size(3 * WORD_SIZE + 4 * (self.word_at(1) / 2)),
            LARGE_INTEGER_CID => allocation_size(4 * WORD_SIZE + 4 * self.word_at(3)),
            CLOSURE_CID => allocation_size((5 + self.word_at(1) / 2) * WORD_SIZE),
            FORWARDING_CORPSE_CID => self.word_at(2),
            cid => unreachable!("size field overflow for fixed-size cid {cid}"),
        }
    }

    /// Word range holding the object's traced pointer slots, or `None` for
    /// shapes with no pointers. The per-cid dispatch used by the collector.
    pub(crate) fn pointer_range(self) -> Option<std::ops::Range<usize>> {
        match self.cid() {
            ARRAY_CID => {
                let len = self.word_at(1) / 2;
                Some(2..2 + len)
            }
            WEAK_ARRAY_CID => {
                let len = self.word_at(1) / 2;
                Some(3..3 + len)
            }
            EPHEMERON_CID => Some(1..4),
            CLOSURE_CID => {
                let num_copied = self.word_at(1) / 2;
                Some(2..5 + num_copied)
            }
            ACTIVATION_CID => Some(1..7 + ACTIVATION_MAX_TEMPS),
            BYTE_ARRAY_CID | BYTE_STRING_CID | WIDE_STRING_CID | MEDIUM_INTEGER_CID
            | LARGE_INTEGER_CID | FLOAT64_CID | FORWARDING_CORPSE_CID => None,
            _ => {
                // Regular objects: every payload word, pad included.
                Some(1..self.heap_size() / WORD_SIZE)
            }
        }
    }

    /// Pointer to word `index` (word 0 is the header).
    #[inline]
    pub(crate) fn word_ptr(self, index: usize) -> *mut Value {
        (self.0 + index * WORD_SIZE) as *mut Value
    }

    /// Read word `index` as a tagged value.
    #[inline]
    pub(crate) fn load(self, index: usize) -> Value {
        unsafe { *self.word_ptr(index) }
    }

    /// Write word `index` as a tagged value.
    #[inline]
    pub(crate) fn store(self, index: usize, value: Value) {
        unsafe { *self.word_ptr(index) = value };
    }

    /// Read word `index` as a raw untagged word.
    #[inline]
    fn word_at(self, index: usize) -> usize {
        unsafe { *((self.0 + index * WORD_SIZE) as *const usize) }
    }

    /// Write word `index` as a raw untagged word.
    #[inline]
    fn set_word_at(self, index: usize, word: usize) {
        unsafe { *((self.0 + index * WORD_SIZE) as *mut usize) = word };
    }
}

impl fmt::Debug for HeapObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj({:#x}, cid {})", self.0, self.cid())
    }
}

/// Install a fresh header at `addr`.
///
/// The payload is left untouched; the caller writes the shape's fields
/// before the next potential collection.
pub(crate) fn initialize_object(addr: usize, cid: Cid, heap_size: usize) -> HeapObject {
    let obj = HeapObject::at(addr);
    obj.set_header(header::encode(cid, heap_size));
    obj
}

// =============================================================================
// Typed views
// =============================================================================

macro_rules! typed_view {
    ($(#[$doc:meta])* $name:ident, $cid:expr) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub struct $name(HeapObject);

        impl $name {
            /// View `v`, which must reference an object of this shape.
            #[inline]
            pub fn from_value(v: Value) -> $name {
                let obj = v.heap_object();
                debug_assert_eq!(obj.cid(), $cid);
                $name(obj)
            }

            #[inline]
            pub(crate) fn from_heap_object(obj: HeapObject) -> $name {
                $name(obj)
            }

            /// The tagged reference to this object.
            #[inline]
            pub fn value(self) -> Value {
                self.0.value()
            }

            /// The underlying untyped object.
            #[inline]
            pub fn object(self) -> HeapObject {
                self.0
            }
        }
    };
}

/// Fixed-slot instance; also the raw view of behaviors, methods and other
/// interpreter-defined shapes. Carries no single cid, so unlike the other
/// views it cannot check one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegularObject(HeapObject);

impl RegularObject {
    /// View `v`, which must reference a fixed-slot object.
    #[inline]
    pub fn from_value(v: Value) -> RegularObject {
        RegularObject(v.heap_object())
    }

    #[inline]
    pub(crate) fn from_heap_object(obj: HeapObject) -> RegularObject {
        RegularObject(obj)
    }

    /// The tagged reference to this object.
    #[inline]
    pub fn value(self) -> Value {
        self.0.value()
    }

    /// The underlying untyped object.
    #[inline]
    pub fn object(self) -> HeapObject {
        self.0
    }

    /// Number of payload slots, derived from the heap size.
    #[inline]
    pub fn num_slots(self) -> usize {
        self.0.heap_size() / WORD_SIZE - 1
    }

    /// Read payload slot `index`.
    #[inline]
    pub fn slot(self, index: usize) -> Value {
        debug_assert!(index < self.num_slots());
        self.0.load(1 + index)
    }

    /// Write payload slot `index`.
    #[inline]
    pub fn set_slot(self, index: usize, v: Value) {
        debug_assert!(index < self.num_slots());
        self.0.store(1 + index, v);
    }
}

typed_view!(
    /// Pointer vector.
    Array,
    ARRAY_CID
);

impl Array {
    /// Element count.
    #[inline]
    pub fn len(self) -> usize {
        self.0.load(1).as_small_integer() as usize
    }

    /// Whether the array has no elements.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Read element `index`.
    #[inline]
    pub fn element(self, index: usize) -> Value {
        debug_assert!(index < self.len());
        self.0.load(2 + index)
    }

    /// Write element `index`.
    #[inline]
    pub fn set_element(self, index: usize, v: Value) {
        debug_assert!(index < self.len());
        self.0.store(2 + index, v);
    }

    pub(crate) fn set_len(self, len: usize) {
        self.0.store(1, Value::small_int(len as isize));
    }
}

typed_view!(
    /// Pointer vector whose slots do not retain their targets.
    WeakArray,
    WEAK_ARRAY_CID
);

impl WeakArray {
    /// Element count.
    #[inline]
    pub fn len(self) -> usize {
        self.0.load(1).as_small_integer() as usize
    }

    /// Whether the array has no elements.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Read element `index`.
    #[inline]
    pub fn element(self, index: usize) -> Value {
        debug_assert!(index < self.len());
        self.0.load(3 + index)
    }

    /// Write element `index`.
    #[inline]
    pub fn set_element(self, index: usize, v: Value) {
        debug_assert!(index < self.len());
        self.0.store(3 + index, v);
    }

    pub(crate) fn set_len(self, len: usize) {
        self.0.store(1, Value::small_int(len as isize));
    }

    pub(crate) fn next(self) -> Value {
        self.0.load(2)
    }

    pub(crate) fn set_next(self, v: Value) {
        self.0.store(2, v);
    }
}

typed_view!(
    /// Key/value/finalizer triple. The value is retained only while the key
    /// is reachable independently of this ephemeron.
    Ephemeron,
    EPHEMERON_CID
);

impl Ephemeron {
    /// The gating key.
    #[inline]
    pub fn key(self) -> Value {
        self.0.load(1)
    }

    /// Write the key.
    #[inline]
    pub fn set_key(self, v: Value) {
        self.0.store(1, v);
    }

    /// The gated value.
    #[inline]
    pub fn value_slot(self) -> Value {
        self.0.load(2)
    }

    /// Write the value.
    #[inline]
    pub fn set_value_slot(self, v: Value) {
        self.0.store(2, v);
    }

    /// The finalizer.
    #[inline]
    pub fn finalizer(self) -> Value {
        self.0.load(3)
    }

    /// Write the finalizer.
    #[inline]
    pub fn set_finalizer(self, v: Value) {
        self.0.store(3, v);
    }

    pub(crate) fn key_ptr(self) -> *mut Value {
        self.0.word_ptr(1)
    }

    pub(crate) fn value_ptr(self) -> *mut Value {
        self.0.word_ptr(2)
    }

    pub(crate) fn finalizer_ptr(self) -> *mut Value {
        self.0.word_ptr(3)
    }

    pub(crate) fn next(self) -> Value {
        self.0.load(4)
    }

    pub(crate) fn set_next(self, v: Value) {
        self.0.store(4, v);
    }
}

typed_view!(
    /// Raw byte vector.
    ByteArray,
    BYTE_ARRAY_CID
);

impl ByteArray {
    /// Byte count.
    #[inline]
    pub fn len(self) -> usize {
        self.0.load(1).as_small_integer() as usize
    }

    /// Whether the array has no bytes.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// The bytes.
    pub fn bytes(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts((self.0.addr() + 2 * WORD_SIZE) as *const u8, self.len())
        }
    }

    /// Write byte `index`.
    pub fn set_byte(self, index: usize, b: u8) {
        debug_assert!(index < self.len());
        unsafe { *((self.0.addr() + 2 * WORD_SIZE + index) as *mut u8) = b };
    }

    pub(crate) fn set_len(self, len: usize) {
        self.0.store(1, Value::small_int(len as isize));
    }
}

typed_view!(
    /// Latin-1 string with a cached hash.
    ByteString,
    BYTE_STRING_CID
);

impl ByteString {
    /// Byte count.
    #[inline]
    pub fn len(self) -> usize {
        self.0.load(1).as_small_integer() as usize
    }

    /// Whether the string is empty.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// The bytes.
    pub fn bytes(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts((self.0.addr() + 3 * WORD_SIZE) as *const u8, self.len())
        }
    }

    /// Copy `s` into the string's storage. `s` must match the length the
    /// string was allocated with.
    pub fn copy_from(self, s: &[u8]) {
        debug_assert_eq!(s.len(), self.len());
        unsafe {
            std::ptr::copy_nonoverlapping(
                s.as_ptr(),
                (self.0.addr() + 3 * WORD_SIZE) as *mut u8,
                s.len(),
            );
        }
    }

    pub(crate) fn set_len(self, len: usize) {
        self.0.store(1, Value::small_int(len as isize));
    }

    pub(crate) fn set_hash(self, hash: Value) {
        self.0.store(2, hash);
    }
}

typed_view!(
    /// UTF-32 string with a cached hash.
    WideString,
    WIDE_STRING_CID
);

impl WideString {
    /// Character count.
    #[inline]
    pub fn len(self) -> usize {
        self.0.load(1).as_small_integer() as usize
    }

    /// Whether the string is empty.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Read character `index`.
    pub fn char_at(self, index: usize) -> u32 {
        debug_assert!(index < self.len());
        unsafe { *((self.0.addr() + 3 * WORD_SIZE + 4 * index) as *const u32) }
    }

    /// Write character `index`.
    pub fn set_char_at(self, index: usize, c: u32) {
        debug_assert!(index < self.len());
        unsafe { *((self.0.addr() + 3 * WORD_SIZE + 4 * index) as *mut u32) = c };
    }

    pub(crate) fn set_len(self, len: usize) {
        self.0.store(1, Value::small_int(len as isize));
    }

    pub(crate) fn set_hash(self, hash: Value) {
        self.0.store(2, hash);
    }
}

typed_view!(
    /// Block closure: a defining activation plus copied slots.
    Closure,
    CLOSURE_CID
);

impl Closure {
    /// Number of copied slots.
    #[inline]
    pub fn num_copied(self) -> usize {
        self.0.load(1).as_small_integer() as usize
    }

    /// The activation the block was created in.
    #[inline]
    pub fn defining_activation(self) -> Value {
        self.0.load(2)
    }

    /// Write the defining activation.
    pub fn set_defining_activation(self, v: Value) {
        self.0.store(2, v);
    }

    /// Bytecode offset of the block body.
    pub fn initial_bci(self) -> Value {
        self.0.load(3)
    }

    /// Write the bytecode offset.
    pub fn set_initial_bci(self, v: Value) {
        self.0.store(3, v);
    }

    /// Argument count.
    pub fn num_args(self) -> Value {
        self.0.load(4)
    }

    /// Write the argument count.
    pub fn set_num_args(self, v: Value) {
        self.0.store(4, v);
    }

    /// Read copied slot `index`.
    pub fn copied(self, index: usize) -> Value {
        debug_assert!(index < self.num_copied());
        self.0.load(5 + index)
    }

    /// Write copied slot `index`.
    pub fn set_copied(self, index: usize, v: Value) {
        debug_assert!(index < self.num_copied());
        self.0.store(5 + index, v);
    }

    pub(crate) fn set_num_copied(self, n: usize) {
        self.0.store(1, Value::small_int(n as isize));
    }
}

typed_view!(
    /// Interpreter frame with a fixed temporary area.
    Activation,
    ACTIVATION_CID
);

impl Activation {
    /// The calling activation.
    #[inline]
    pub fn sender(self) -> Value {
        self.0.load(1)
    }

    /// Write the calling activation.
    #[inline]
    pub fn set_sender(self, v: Value) {
        self.0.store(1, v);
    }

    /// Current bytecode index.
    pub fn bci(self) -> Value {
        self.0.load(2)
    }

    /// Write the bytecode index.
    pub fn set_bci(self, v: Value) {
        self.0.store(2, v);
    }

    /// The running method.
    pub fn method(self) -> Value {
        self.0.load(3)
    }

    /// Write the running method.
    pub fn set_method(self, v: Value) {
        self.0.store(3, v);
    }

    /// The closure being evaluated, or nil for method activations.
    pub fn closure(self) -> Value {
        self.0.load(4)
    }

    /// Write the closure.
    pub fn set_closure(self, v: Value) {
        self.0.store(4, v);
    }

    /// The receiver.
    pub fn receiver(self) -> Value {
        self.0.load(5)
    }

    /// Write the receiver.
    pub fn set_receiver(self, v: Value) {
        self.0.store(5, v);
    }

    /// Occupied depth of the temporary area.
    pub fn stack_depth(self) -> Value {
        self.0.load(6)
    }

    /// Write the temporary-area depth.
    pub fn set_stack_depth(self, v: Value) {
        self.0.store(6, v);
    }

    /// Read temporary `index`.
    pub fn temp(self, index: usize) -> Value {
        debug_assert!(index < ACTIVATION_MAX_TEMPS);
        self.0.load(7 + index)
    }

    /// Write temporary `index`.
    pub fn set_temp(self, index: usize, v: Value) {
        debug_assert!(index < ACTIVATION_MAX_TEMPS);
        self.0.store(7 + index, v);
    }
}

typed_view!(
    /// Boxed 64-bit integer.
    MediumInteger,
    MEDIUM_INTEGER_CID
);

impl MediumInteger {
    /// The boxed integer.
    pub fn int_value(self) -> i64 {
        unsafe { ((self.0.addr() + WORD_SIZE) as *const i64).read_unaligned() }
    }

    /// Write the boxed integer.
    pub fn set_int_value(self, v: i64) {
        unsafe { ((self.0.addr() + WORD_SIZE) as *mut i64).write_unaligned(v) };
    }
}

typed_view!(
    /// Arbitrary-precision integer: sign, digit count, digit capacity.
    LargeInteger,
    LARGE_INTEGER_CID
);

impl LargeInteger {
    /// Whether the integer is negative.
    pub fn negative(self) -> bool {
        self.0.word_at(1) != 0
    }

    /// Write the sign.
    pub fn set_negative(self, negative: bool) {
        self.0.set_word_at(1, negative as usize);
    }

    /// Number of digits in use.
    pub fn digit_len(self) -> usize {
        self.0.word_at(2)
    }

    /// Write the digit count.
    pub fn set_digit_len(self, len: usize) {
        debug_assert!(len <= self.capacity());
        self.0.set_word_at(2, len);
    }

    /// Allocated digit capacity.
    pub fn capacity(self) -> usize {
        self.0.word_at(3)
    }

    /// Read digit `index`.
    pub fn digit(self, index: usize) -> u32 {
        debug_assert!(index < self.capacity());
        unsafe { *((self.0.addr() + 4 * WORD_SIZE + 4 * index) as *const u32) }
    }

    /// Write digit `index`.
    pub fn set_digit(self, index: usize, d: u32) {
        debug_assert!(index < self.capacity());
        unsafe { *((self.0.addr() + 4 * WORD_SIZE + 4 * index) as *mut u32) = d };
    }

    pub(crate) fn set_capacity(self, capacity: usize) {
        self.0.set_word_at(3, capacity);
    }
}

typed_view!(
    /// Boxed IEEE double.
    Float64,
    FLOAT64_CID
);

impl Float64 {
    /// The boxed double.
    pub fn float_value(self) -> f64 {
        unsafe { ((self.0.addr() + WORD_SIZE) as *const f64).read_unaligned() }
    }

    /// Write the boxed double.
    pub fn set_float_value(self, v: f64) {
        unsafe { ((self.0.addr() + WORD_SIZE) as *mut f64).write_unaligned(v) };
    }
}

typed_view!(
    /// The in-place remnant of an object replaced by `become`.
    ForwardingCorpse,
    FORWARDING_CORPSE_CID
);

impl ForwardingCorpse {
    /// The replacement object.
    #[inline]
    pub fn target(self) -> Value {
        self.0.load(1)
    }

    pub(crate) fn set_target(self, v: Value) {
        self.0.store(1, v);
    }

    pub(crate) fn set_overflow_size(self, size: usize) {
        self.0.set_word_at(2, size);
    }
}

// =============================================================================
// Interpreter conventions
// =============================================================================

/// A class object: a regular object whose fixed slots the heap relies on for
/// class registration and `become` retargeting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Behavior(RegularObject);

impl Behavior {
    /// View `v` as a behavior. `v` must be a regular object with the
    /// behavior slot layout.
    #[inline]
    pub fn from_value(v: Value) -> Behavior {
        Behavior(RegularObject::from_value(v))
    }

    pub(crate) fn from_heap_object(obj: HeapObject) -> Behavior {
        Behavior(RegularObject::from_heap_object(obj))
    }

    /// The tagged reference to this behavior.
    #[inline]
    pub fn value(self) -> Value {
        self.0.value()
    }

    /// The mixin carrying the class's name.
    pub fn mixin(self) -> Value {
        self.0.slot(BEHAVIOR_MIXIN_INDEX)
    }

    /// Instance slot count for regular instances.
    pub fn format(self) -> Value {
        self.0.slot(BEHAVIOR_FORMAT_INDEX)
    }

    /// The registered cid as a small integer, or nil before registration.
    pub fn id(self) -> Value {
        self.0.slot(BEHAVIOR_ID_INDEX)
    }

    /// Write the registered cid.
    pub(crate) fn set_id(self, v: Value) {
        self.0.set_slot(BEHAVIOR_ID_INDEX, v);
    }
}

/// A compiled method, viewed through the slots the heap prints in stack
/// traces.
#[derive(Clone, Copy, Debug)]
pub struct Method(RegularObject);

impl Method {
    /// View `v` as a method.
    pub fn from_value(v: Value) -> Method {
        Method(RegularObject::from_value(v))
    }

    /// The mixin the method was defined in.
    pub fn mixin(self) -> Value {
        self.0.slot(METHOD_MIXIN_INDEX)
    }

    /// The method's selector.
    pub fn selector(self) -> Value {
        self.0.slot(METHOD_SELECTOR_INDEX)
    }
}

/// A mixin, viewed through its name slot.
#[derive(Clone, Copy, Debug)]
pub struct Mixin(RegularObject);

impl Mixin {
    /// View `v` as a mixin.
    pub fn from_value(v: Value) -> Mixin {
        Mixin(RegularObject::from_value(v))
    }

    /// The mixin's name: a byte string, or the instance-side mixin for
    /// class-side mixins.
    pub fn name(self) -> Value {
        self.0.slot(MIXIN_NAME_INDEX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_integer_round_trip() {
        for v in [0isize, 1, -1, 42, -42, isize::MAX >> 1, isize::MIN >> 1] {
            let val = Value::small_int(v);
            assert!(val.is_small_integer());
            assert!(!val.is_heap_object());
            assert_eq!(val.as_small_integer(), v);
        }
    }

    #[test]
    fn test_tagged_pointer_round_trip() {
        // Pick an address inside the buffer with the object alignment offset.
        let buffer = vec![0u8; 4 * OBJECT_ALIGNMENT];
        let base = buffer.as_ptr() as usize;
        let addr =
            (base & !OBJECT_ALIGNMENT_MASK) + OBJECT_ALIGNMENT + NEW_OBJECT_ALIGNMENT_OFFSET;
        let obj = HeapObject::at(addr);
        let v = obj.value();
        assert!(v.is_heap_object());
        assert!(!v.is_small_integer());
        assert_eq!(v.heap_object().addr(), addr);
    }

    #[test]
    fn test_allocation_size_rounds_to_alignment() {
        assert_eq!(allocation_size(0), 0);
        assert_eq!(allocation_size(1), OBJECT_ALIGNMENT);
        assert_eq!(allocation_size(OBJECT_ALIGNMENT), OBJECT_ALIGNMENT);
        assert_eq!(allocation_size(OBJECT_ALIGNMENT + 1), 2 * OBJECT_ALIGNMENT);
    }

    #[test]
    fn test_value_zero_is_inert() {
        assert!(Value::ZERO.is_small_integer());
        assert_eq!(Value::ZERO.as_small_integer(), 0);
    }
}
