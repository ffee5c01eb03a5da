//! The heap: bump allocation over the active semispace.
//!
//! Exactly two semispaces exist. Allocation bumps `top` through the active
//! one; when a request does not fit, the heap scavenges, retries, grows and
//! retries again, and only then gives up. Every typed allocator is
//! therefore a potential collection point: callers keep locals alive across
//! one with [`Heap::push_handle`] or a [`HandleScope`](crate::HandleScope).
//!
//! ```text
//!   to-space (active)                          from-space (passive)
//!   +--------------------------+------+        +---------------------+
//!   | obj | obj | obj | ...    | free |        |  last cycle's data  |
//!   +--------------------------+------+        +---------------------+
//!   ^object_start          top^      ^end      (debug: no-access)
//! ```

pub(crate) mod semispace;
pub(crate) mod virtual_memory;

mod introspect;

use std::rc::Rc;

use crate::cache::{EphemeronFinalizerHook, LookupCache};
use crate::class_table::ClassTable;
use crate::config::HeapConfig;
use crate::object::header;
use crate::object::{
    allocation_size, initialize_object, Activation, Array, Behavior, ByteArray, ByteString, Cid,
    Closure, Float64, HeapObject, LargeInteger, MediumInteger, RegularObject, Value, WeakArray,
    WideString, ACTIVATION_CID, ACTIVATION_MAX_TEMPS, ARRAY_CID, BYTE_ARRAY_CID, BYTE_STRING_CID,
    CLOSURE_CID, EPHEMERON_CID, FIRST_REGULAR_OBJECT_CID, FLOAT64_CID, LARGE_INTEGER_CID,
    MEDIUM_INTEGER_CID, NEW_OBJECT_ALIGNMENT_OFFSET, OBJECT_ALIGNMENT, OBJECT_ALIGNMENT_MASK,
    OBJECT_STORE_MESSAGE_INDEX, OBJECT_STORE_NIL_INDEX, WEAK_ARRAY_CID, WIDE_STRING_CID, WORD_SIZE,
};
use crate::roots::HandleStack;
use crate::stats::HeapStats;
use semispace::Semispace;

/// A managed-object heap: one isolate's semispace pair, class table and
/// roots.
///
/// The heap is a value owned by its isolate; several heaps coexist in one
/// process without sharing anything.
pub struct Heap {
    pub(crate) top: usize,
    pub(crate) end: usize,
    pub(crate) to_space: Semispace,
    pub(crate) from_space: Semispace,

    pub(crate) class_table: ClassTable,

    pub(crate) object_store: Value,
    pub(crate) current_activation: Value,
    pub(crate) handles: HandleStack,

    // Collector-private worklists, threaded through object `next` slots.
    // Small-integer 0 means empty; between collections both are empty.
    pub(crate) ephemeron_list: Value,
    pub(crate) weak_list: Value,

    pub(crate) recycle_list: Value,
    pub(crate) lookup_cache: Option<Rc<dyn LookupCache>>,
    pub(crate) finalizer_hook: Option<EphemeronFinalizerHook>,

    identity_hash_state: u64,
    pub(crate) stats: HeapStats,
    pub(crate) config: HeapConfig,
}

impl Heap {
    /// Create a heap from `config`.
    ///
    /// # Panics
    ///
    /// Panics when the configuration is invalid or the semispaces cannot be
    /// reserved.
    pub fn new(config: HeapConfig) -> Heap {
        config.validate().expect("invalid heap configuration");

        let to_space = Semispace::reserve(config.initial_semispace_size);
        let from_space = Semispace::reserve(config.initial_semispace_size);
        let top = to_space.object_start();
        let end = to_space.limit();
        let class_table = ClassTable::new(config.class_table_capacity);
        // xorshift sticks at zero, so an all-zero seed gets a fixed constant.
        let identity_hash_state = match config.identity_hash_seed {
            0 => 0x9e37_79b9_7f4a_7c15,
            seed => seed,
        };

        Heap {
            top,
            end,
            to_space,
            from_space,
            class_table,
            object_store: Value::ZERO,
            current_activation: Value::ZERO,
            handles: HandleStack::new(),
            ephemeron_list: Value::ZERO,
            weak_list: Value::ZERO,
            recycle_list: Value::ZERO,
            lookup_cache: None,
            finalizer_hook: None,
            identity_hash_state,
            stats: HeapStats::new(),
            config,
        }
    }

    /// Create a heap with the default configuration.
    pub fn with_defaults() -> Heap {
        Heap::new(HeapConfig::default())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Live bytes in the active semispace.
    #[inline]
    pub fn used(&self) -> usize {
        self.top - self.to_space.object_start()
    }

    /// Size of the active semispace.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.to_space.size()
    }

    /// Whether `v` references an object in the active semispace.
    pub fn contains(&self, v: Value) -> bool {
        v.is_heap_object() && self.to_space.contains(v.heap_object().addr())
    }

    /// Collection statistics.
    pub fn stats(&self) -> &HeapStats {
        &self.stats
    }

    /// The configuration the heap was built with.
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    // =========================================================================
    // Roots
    // =========================================================================

    /// Install the object store. Called once, before the first allocation
    /// that could collect.
    pub fn initialize_root(&mut self, object_store: Array) {
        assert!(
            self.object_store == Value::ZERO,
            "object store is already installed"
        );
        self.object_store = object_store.value();
        // Inert placeholder until the interpreter enters its first message.
        self.current_activation = Value::ZERO;
    }

    /// The object store root.
    #[inline]
    pub fn object_store(&self) -> Value {
        self.object_store
    }

    /// The current activation root.
    #[inline]
    pub fn activation(&self) -> Value {
        self.current_activation
    }

    /// Replace the current activation root.
    pub fn set_activation(&mut self, act: Activation) {
        self.current_activation = act.value();
    }

    /// The nil object, read out of the object store.
    pub(crate) fn nil_obj(&self) -> Value {
        Array::from_value(self.object_store).element(OBJECT_STORE_NIL_INDEX)
    }

    /// Pin a local slot; the collector rewrites it in place if its target
    /// moves. Strictly LIFO with [`Heap::pop_handle`].
    pub fn push_handle(&mut self, slot: &mut Value) {
        self.handles.push(slot);
    }

    /// Unpin the most recently pinned slot.
    pub fn pop_handle(&mut self) {
        self.handles.pop();
    }

    /// Unpin everything. The interpreter calls this when unwinding to its
    /// top-level loop.
    pub fn drop_handles(&mut self) {
        self.handles.clear();
    }

    // =========================================================================
    // Identity hashes
    // =========================================================================

    /// The identity hash of `v`, assigning one on first use. Hashes survive
    /// scavenges and migrate through `become`.
    pub fn identity_hash(&mut self, v: Value) -> usize {
        if v.is_small_integer() {
            return (v.as_small_integer() as usize) & header::MAX_IDENTITY_HASH;
        }
        let obj = v.heap_object();
        let mut hash = obj.identity_hash();
        if hash == 0 {
            hash = self.next_identity_hash();
            obj.set_identity_hash(hash);
        }
        hash
    }

    // xorshift64*, masked to the header field; zero is reserved for
    // "not yet assigned".
    fn next_identity_hash(&mut self) -> usize {
        loop {
            let mut x = self.identity_hash_state;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.identity_hash_state = x;
            let hash = (x as usize) & header::MAX_IDENTITY_HASH;
            if hash != 0 {
                return hash;
            }
        }
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Bump-allocate `size` bytes, or `None` when they do not fit.
    #[inline]
    pub(crate) fn try_allocate(&mut self, size: usize) -> Option<usize> {
        debug_assert!(size % OBJECT_ALIGNMENT == 0);
        if self.end - self.top < size {
            return None;
        }
        let result = self.top;
        debug_assert!(result & OBJECT_ALIGNMENT_MASK == NEW_OBJECT_ALIGNMENT_OFFSET);
        self.top += size;
        Some(result)
    }

    /// Allocate `size` bytes, collecting and growing as needed.
    ///
    /// # Panics
    ///
    /// Panics when the request still does not fit after a scavenge and a
    /// grow; the interpreter has no way to recover from that.
    fn allocate(&mut self, size: usize) -> usize {
        let addr = match self.try_allocate(size) {
            Some(addr) => addr,
            None => {
                self.scavenge("allocation failure");
                match self.try_allocate(size) {
                    Some(addr) => addr,
                    None => {
                        self.grow(size, "out of capacity");
                        self.try_allocate(size).unwrap_or_else(|| {
                            panic!("out of capacity: failed to allocate {size} bytes")
                        })
                    }
                }
            }
        };
        #[cfg(debug_assertions)]
        unsafe {
            std::ptr::write_bytes(addr as *mut u8, semispace::UNINITIALIZED_BYTE, size);
        }
        addr
    }

    /// Reserve a larger passive space and scavenge into it.
    ///
    /// Doubles until the gained headroom covers `size_requested`. The flip
    /// inside the scavenge makes the new space active.
    pub(crate) fn grow(&mut self, size_requested: usize, reason: &str) {
        let current_size = self.to_space.size();
        let mut new_size = current_size * 2;
        while new_size - current_size < size_requested {
            new_size *= 2;
        }
        #[cfg(feature = "trace-growth")]
        eprintln!(
            "Growing heap to {} ({reason})",
            crate::stats::format_bytes(new_size as u64)
        );
        if new_size > self.config.max_semispace_size {
            panic!(
                "semispace would grow past {} bytes; runaway allocation?",
                self.config.max_semispace_size
            );
        }
        self.stats.record_grow();
        self.from_space = Semispace::reserve(new_size);
        self.scavenge(reason);
    }

    fn allocate_object(&mut self, cid: Cid, heap_size: usize) -> HeapObject {
        let addr = self.allocate(heap_size);
        initialize_object(addr, cid, heap_size)
    }

    // =========================================================================
    // Typed allocators (all may collect)
    // =========================================================================

    /// Allocate a fixed-slot instance of `cid` with `num_slots` slots.
    ///
    /// Slots are not initialized; the caller must fill them before the next
    /// potential collection. Ephemerons come through here with three slots
    /// and get their collector-private link slot appended.
    pub fn allocate_regular_object(&mut self, cid: Cid, num_slots: usize) -> RegularObject {
        assert!(cid == EPHEMERON_CID || cid >= FIRST_REGULAR_OBJECT_CID);
        let num_slots = if cid == EPHEMERON_CID {
            debug_assert_eq!(num_slots, 3);
            4
        } else {
            num_slots
        };
        let heap_size = allocation_size((1 + num_slots) * WORD_SIZE);
        // Fixed-slot shapes have no length field to fall back on, so their
        // size must fit the header.
        assert!(
            heap_size / OBJECT_ALIGNMENT <= header::MAX_SIZE_UNITS,
            "regular object too large for the header size field"
        );
        let obj = self.allocate_object(cid, heap_size);
        if (1 + num_slots) % 2 == 1 {
            // The leftover slot is visited by the collector. Make it inert.
            obj.store(1 + num_slots, Value::ZERO);
        }
        if cid == EPHEMERON_CID {
            obj.store(4, Value::ZERO);
        }
        RegularObject::from_heap_object(obj)
    }

    /// Allocate a byte array of `num_bytes` uninitialized bytes.
    pub fn allocate_byte_array(&mut self, num_bytes: usize) -> ByteArray {
        let heap_size = allocation_size(2 * WORD_SIZE + num_bytes);
        let obj = self.allocate_object(BYTE_ARRAY_CID, heap_size);
        let result = ByteArray::from_heap_object(obj);
        result.set_len(num_bytes);
        result
    }

    /// Allocate a byte string of `num_bytes` uninitialized bytes.
    pub fn allocate_byte_string(&mut self, num_bytes: usize) -> ByteString {
        let heap_size = allocation_size(3 * WORD_SIZE + num_bytes);
        let obj = self.allocate_object(BYTE_STRING_CID, heap_size);
        let result = ByteString::from_heap_object(obj);
        result.set_len(num_bytes);
        result.set_hash(Value::ZERO);
        result
    }

    /// Allocate a wide string of `num_chars` uninitialized characters.
    pub fn allocate_wide_string(&mut self, num_chars: usize) -> WideString {
        let heap_size = allocation_size(3 * WORD_SIZE + 4 * num_chars);
        let obj = self.allocate_object(WIDE_STRING_CID, heap_size);
        let result = WideString::from_heap_object(obj);
        result.set_len(num_chars);
        result.set_hash(Value::ZERO);
        result
    }

    /// Allocate a pointer array of `num_slots` uninitialized elements.
    pub fn allocate_array(&mut self, num_slots: usize) -> Array {
        let heap_size = allocation_size((2 + num_slots) * WORD_SIZE);
        let obj = self.allocate_object(ARRAY_CID, heap_size);
        let result = Array::from_heap_object(obj);
        result.set_len(num_slots);
        result
    }

    /// Allocate a weak array of `num_slots` uninitialized elements.
    pub fn allocate_weak_array(&mut self, num_slots: usize) -> WeakArray {
        let heap_size = allocation_size((3 + num_slots) * WORD_SIZE);
        let obj = self.allocate_object(WEAK_ARRAY_CID, heap_size);
        let result = WeakArray::from_heap_object(obj);
        result.set_len(num_slots);
        result.set_next(Value::ZERO);
        result
    }

    /// Allocate a closure with `num_copied` uninitialized copied slots.
    pub fn allocate_closure(&mut self, num_copied: usize) -> Closure {
        let heap_size = allocation_size((5 + num_copied) * WORD_SIZE);
        let obj = self.allocate_object(CLOSURE_CID, heap_size);
        let result = Closure::from_heap_object(obj);
        result.set_num_copied(num_copied);
        result
    }

    /// Allocate an activation. All fields are uninitialized.
    pub fn allocate_activation(&mut self) -> Activation {
        let heap_size = allocation_size((7 + ACTIVATION_MAX_TEMPS) * WORD_SIZE);
        let obj = self.allocate_object(ACTIVATION_CID, heap_size);
        Activation::from_heap_object(obj)
    }

    /// Pop an activation off the recycle list, else allocate a fresh one.
    pub fn allocate_or_recycle_activation(&mut self) -> Activation {
        if self.recycle_list.is_heap_object() {
            let result = Activation::from_value(self.recycle_list);
            self.recycle_list = result.sender();
            return result;
        }
        self.allocate_activation()
    }

    /// Return a dead activation for reuse. The list is discarded at every
    /// collection, so entries never pin anything.
    pub fn recycle_activation(&mut self, act: Activation) {
        act.set_sender(self.recycle_list);
        self.recycle_list = act.value();
    }

    /// Allocate a boxed 64-bit integer.
    pub fn allocate_medium_integer(&mut self) -> MediumInteger {
        let heap_size = allocation_size(WORD_SIZE + std::mem::size_of::<i64>());
        let obj = self.allocate_object(MEDIUM_INTEGER_CID, heap_size);
        MediumInteger::from_heap_object(obj)
    }

    /// Allocate a large integer with room for `capacity` digits.
    pub fn allocate_large_integer(&mut self, capacity: usize) -> LargeInteger {
        let heap_size = allocation_size(4 * WORD_SIZE + 4 * capacity);
        let obj = self.allocate_object(LARGE_INTEGER_CID, heap_size);
        let result = LargeInteger::from_heap_object(obj);
        result.set_capacity(capacity);
        result
    }

    /// Allocate a boxed double.
    pub fn allocate_float64(&mut self) -> Float64 {
        let heap_size = allocation_size(WORD_SIZE + std::mem::size_of::<f64>());
        let obj = self.allocate_object(FLOAT64_CID, heap_size);
        Float64::from_heap_object(obj)
    }

    /// Allocate a message, registering the Message behavior's cid on first
    /// use.
    pub fn allocate_message(&mut self) -> RegularObject {
        let behavior = self.message_behavior();
        if behavior.id() == self.nil_obj() {
            let cid = self.allocate_class_id(); // may collect; reload below
            let behavior = self.message_behavior();
            self.register_class(cid, behavior);
        }
        let behavior = self.message_behavior();
        let cid = behavior.id().as_small_integer() as Cid;
        let num_slots = behavior.format().as_small_integer() as usize;
        debug_assert_eq!(num_slots, 2);
        self.allocate_regular_object(cid, num_slots)
    }

    fn message_behavior(&self) -> Behavior {
        Behavior::from_value(Array::from_value(self.object_store).element(OBJECT_STORE_MESSAGE_INDEX))
    }

    // =========================================================================
    // Class API
    // =========================================================================

    /// Hand out an unused cid, scavenging to recycle slots when the table
    /// fills.
    ///
    /// # Panics
    ///
    /// Panics when the table is full even after a scavenge; the table does
    /// not grow.
    pub fn allocate_class_id(&mut self) -> Cid {
        if let Some(cid) = self.class_table.try_allocate_id() {
            return cid;
        }
        #[cfg(feature = "trace-growth")]
        eprintln!("Scavenging to reclaim class-table slots");
        self.scavenge("class table full");
        self.class_table
            .try_allocate_id()
            .expect("class table exhausted; table growth is not supported")
    }

    /// Bind `cid` to `cls` and stamp the cid into the class object.
    pub fn register_class(&mut self, cid: Cid, cls: Behavior) {
        self.class_table.register(cid, cls);
    }

    /// The class object registered for `cid`.
    pub fn class_at(&self, cid: Cid) -> Value {
        self.class_table.class_at(cid)
    }

    /// The class of any value, immediates included.
    pub fn class_of(&self, v: Value) -> Value {
        let cid = if v.is_small_integer() {
            crate::object::SMALL_INTEGER_CID
        } else {
            v.heap_object().cid()
        };
        self.class_at(cid)
    }

    // =========================================================================
    // Caches
    // =========================================================================

    /// Install the interpreter's lookup cache. The heap clears it at the
    /// end of every collection and after every `become`.
    pub fn install_lookup_cache(&mut self, cache: Rc<dyn LookupCache>) {
        assert!(
            self.lookup_cache.is_none(),
            "lookup cache is already installed"
        );
        self.lookup_cache = Some(cache);
    }

    /// Install the hook invoked with each finalizer whose ephemeron key
    /// died. The default is to discard.
    pub fn set_ephemeron_finalizer_hook(&mut self, hook: EphemeronFinalizerHook) {
        self.finalizer_hook = Some(hook);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_heap_is_empty() {
        let heap = Heap::new(HeapConfig::low_memory());
        assert_eq!(heap.used(), 0);
        assert_eq!(heap.capacity(), 64 * 1024);
    }

    #[test]
    fn test_bump_allocation_is_monotone() {
        let mut heap = Heap::new(HeapConfig::low_memory());
        let before = heap.used();
        let a = heap.allocate_array(3);
        let expected = allocation_size((2 + 3) * WORD_SIZE);
        assert_eq!(heap.used() - before, expected);
        assert_eq!(a.len(), 3);

        let b = heap.allocate_array(0);
        assert_eq!(
            heap.used() - before,
            expected + allocation_size(2 * WORD_SIZE)
        );
        assert!(b.is_empty());
    }

    #[test]
    fn test_allocations_are_adjacent_and_aligned() {
        let mut heap = Heap::new(HeapConfig::low_memory());
        let a = heap.allocate_array(1);
        let b = heap.allocate_array(1);
        let step = allocation_size(3 * WORD_SIZE);
        assert_eq!(
            b.object().addr() - a.object().addr(),
            step,
            "arrays should be adjacent"
        );
        assert_eq!(
            a.object().addr() & OBJECT_ALIGNMENT_MASK,
            NEW_OBJECT_ALIGNMENT_OFFSET
        );
    }

    #[test]
    fn test_regular_object_pads_odd_slot_counts() {
        let mut heap = Heap::new(HeapConfig::low_memory());
        let obj = heap.allocate_regular_object(FIRST_REGULAR_OBJECT_CID, 2);
        // header + 2 slots rounds up to 4 words; the pad is an inert smi.
        assert_eq!(obj.num_slots(), 3);
        assert_eq!(obj.slot(2), Value::ZERO);
    }

    #[test]
    fn test_ephemeron_allocation_appends_link_slot() {
        let mut heap = Heap::new(HeapConfig::low_memory());
        let obj = heap.allocate_regular_object(EPHEMERON_CID, 3);
        let eph = crate::object::Ephemeron::from_value(obj.value());
        assert_eq!(eph.next(), Value::ZERO);
        assert_eq!(
            obj.object().heap_size(),
            allocation_size(6 * WORD_SIZE)
        );
    }

    #[test]
    fn test_typed_allocator_shapes() {
        let mut heap = Heap::new(HeapConfig::low_memory());

        let bytes = heap.allocate_byte_array(5);
        assert_eq!(bytes.len(), 5);

        let string = heap.allocate_byte_string(11);
        assert_eq!(string.len(), 11);

        let wide = heap.allocate_wide_string(4);
        assert_eq!(wide.len(), 4);

        let weak = heap.allocate_weak_array(2);
        assert_eq!(weak.len(), 2);

        let closure = heap.allocate_closure(2);
        assert_eq!(closure.num_copied(), 2);

        let mint = heap.allocate_medium_integer();
        mint.set_int_value(-1 << 40);
        assert_eq!(mint.int_value(), -1 << 40);

        let large = heap.allocate_large_integer(3);
        assert_eq!(large.capacity(), 3);

        let float = heap.allocate_float64();
        float.set_float_value(2.5);
        assert_eq!(float.float_value(), 2.5);
    }

    #[test]
    fn test_identity_hash_is_sticky_and_nonzero() {
        let mut heap = Heap::new(HeapConfig::low_memory());
        let a = heap.allocate_array(0).value();
        let h1 = heap.identity_hash(a);
        let h2 = heap.identity_hash(a);
        assert_ne!(h1, 0);
        assert_eq!(h1, h2);

        let b = heap.allocate_array(0).value();
        // Distinct objects should (overwhelmingly) differ.
        assert_ne!(heap.identity_hash(b), 0);
    }

    #[test]
    fn test_recycle_list_round_trip() {
        let mut heap = Heap::new(HeapConfig::low_memory());
        let act = heap.allocate_activation();
        heap.recycle_activation(act);
        let again = heap.allocate_or_recycle_activation();
        assert_eq!(again, act);

        // List is now empty; the next request allocates fresh.
        let fresh = heap.allocate_or_recycle_activation();
        assert_ne!(fresh, act);
    }

    #[test]
    fn test_allocate_class_id_bumps_past_reserved_range() {
        let mut heap = Heap::new(HeapConfig::low_memory());
        let a = heap.allocate_class_id();
        let b = heap.allocate_class_id();
        assert_eq!(a, FIRST_REGULAR_OBJECT_CID);
        assert_eq!(b, FIRST_REGULAR_OBJECT_CID + 1);
    }
}
