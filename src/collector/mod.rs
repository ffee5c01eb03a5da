//! The scavenger: a breadth-first copying collector with ephemeron and
//! weak-array support.
//!
//! One collection runs these phases in order; the ordering is load-bearing:
//!
//! 1. **Flip.** The passive space becomes active and empty.
//! 2. **Strong roots.** The object store, the current activation and every
//!    pinned handle are scavenged.
//! 3. **Breadth-first copy.** A scan cursor chases the allocation cursor
//!    through to-space; every traced slot is scavenged, copying its target
//!    on first contact and reading the forwarding header on every
//!    subsequent one. Weak arrays and ephemerons are deferred onto
//!    worklists instead of being traced. Each time the cursor catches up,
//!    the pending ephemerons are offered a chance to discharge; the loop
//!    ends when a full pass discharges nothing and the cursor rests.
//! 4. **Mourn.** Pending ephemerons have dead keys: key, value and
//!    finalizer are nil'ed. Weak-array slots whose targets did not survive
//!    are nil'ed. Class-table slots whose classes did not survive are freed
//!    onto the free list; surviving ones are retargeted.
//! 5. **Caches.** The lookup cache and the activation recycle list are
//!    dropped; both hold references the collector does not update.
//!
//! An ephemeron discharges when its key is an immediate or has already
//! been copied: only then are its key, value and finalizer strong. A key
//! reachable solely through ephemeron values never discharges anything,
//! which is exactly the asymmetry that separates ephemerons from weak
//! pairs.

mod become_op;

use std::time::Instant;

use crate::heap::Heap;
use crate::object::header;
use crate::object::{
    Cid, Ephemeron, HeapObject, Value, WeakArray, EPHEMERON_CID, FIRST_LEGAL_CID, WEAK_ARRAY_CID,
};

impl Heap {
    /// Run one full collection. `reason` labels the cycle in reports.
    pub fn scavenge(&mut self, reason: &str) {
        let start = Instant::now();
        let size_before = self.used();
        #[cfg(feature = "report-gc")]
        eprintln!(
            "Begin scavenge ({} used, {reason})",
            crate::stats::format_bytes(size_before as u64)
        );
        #[cfg(not(feature = "report-gc"))]
        let _ = reason;

        self.flip_spaces();
        #[cfg(debug_assertions)]
        self.to_space.protect_read_write();

        // Strong references.
        self.process_roots();
        let mut scan = self.to_space.object_start();
        while scan < self.top {
            scan = self.process_to_space(scan);
            self.process_ephemeron_list();
        }

        // Weak references.
        self.mourn_ephemeron_list();
        self.mourn_weak_list();
        self.mourn_class_table();

        self.clear_caches();

        #[cfg(debug_assertions)]
        {
            self.from_space.poison_unallocated();
            self.from_space.protect_no_access();
        }

        let size_after = self.used();
        self.stats
            .record_scavenge(start.elapsed(), size_before, size_after);
        #[cfg(feature = "report-gc")]
        eprintln!(
            "End scavenge ({} used, {} freed, {} us)",
            crate::stats::format_bytes(size_after as u64),
            crate::stats::format_bytes(size_before.saturating_sub(size_after) as u64),
            start.elapsed().as_micros()
        );

        if self.config.verify {
            crate::verify::verify(self);
        }

        if self.used() > 7 * self.to_space.size() / 8 {
            // Grow before the capacity is actually reached, to avoid a run
            // of collections that each free almost nothing.
            self.grow(self.to_space.size(), "early growth heuristic");
        }
    }

    fn flip_spaces(&mut self) {
        std::mem::swap(&mut self.to_space, &mut self.from_space);

        if self.to_space.size() < self.from_space.size() {
            // First scavenge after a grow: bring this space up to size too.
            self.to_space = crate::heap::semispace::Semispace::reserve(self.from_space.size());
        }

        self.top = self.to_space.object_start();
        self.end = self.to_space.limit();
    }

    fn process_roots(&mut self) {
        let store: *mut Value = &mut self.object_store;
        self.scavenge_pointer(store);
        let activation: *mut Value = &mut self.current_activation;
        self.scavenge_pointer(activation);

        for i in 0..self.handles.len() {
            let handle = self.handles.at(i);
            self.scavenge_pointer(handle);
        }
    }

    fn process_to_space(&mut self, mut scan: usize) -> usize {
        while scan < self.top {
            let obj = HeapObject::at(scan);
            let cid = obj.cid();
            self.scavenge_class(cid);
            if cid == WEAK_ARRAY_CID {
                self.add_to_weak_list(WeakArray::from_heap_object(obj));
            } else if cid == EPHEMERON_CID {
                self.add_to_ephemeron_list(Ephemeron::from_heap_object(obj));
            } else if let Some(range) = obj.pointer_range() {
                for index in range {
                    self.scavenge_pointer(obj.word_ptr(index));
                }
            }
            scan += obj.heap_size();
        }
        scan
    }

    /// Scavenge one slot: update it to the target's copy, copying the
    /// target on first contact.
    fn scavenge_pointer(&mut self, ptr: *mut Value) {
        let old_target = unsafe { *ptr };
        if old_target.is_small_integer() {
            return;
        }
        let old_addr = old_target.heap_object().addr();
        if !self.from_space.contains(old_addr) {
            // Already copied this cycle; not going to move.
            return;
        }

        let new_target = if header::is_forwarded(old_addr) {
            header::forwarding_target(old_addr)
        } else {
            // Target is now known to be reachable. Move it to to-space.
            let size = HeapObject::at(old_addr).heap_size();
            let new_addr = self
                .try_allocate(size)
                .expect("to-space is at least as large as from-space");
            unsafe {
                std::ptr::copy_nonoverlapping(old_addr as *const u8, new_addr as *mut u8, size);
            }
            header::set_forwarded(old_addr, new_addr);
            HeapObject::at(new_addr).value()
        };

        debug_assert!(self.to_space.contains(new_target.heap_object().addr()));
        unsafe { *ptr = new_target };
    }

    /// Keep the class of a live instance alive. The table slot itself is
    /// rewritten when the table is swept, not here; the instance's cid
    /// never changes during a scavenge.
    fn scavenge_class(&mut self, cid: Cid) {
        debug_assert!(cid < self.class_table.top());
        let old_target = self.class_table.slot(cid);
        if old_target.is_small_integer() {
            return;
        }
        let old_addr = old_target.heap_object().addr();
        if !self.from_space.contains(old_addr) {
            return;
        }
        if header::is_forwarded(old_addr) {
            return;
        }

        let size = HeapObject::at(old_addr).heap_size();
        let new_addr = self
            .try_allocate(size)
            .expect("to-space is at least as large as from-space");
        unsafe {
            std::ptr::copy_nonoverlapping(old_addr as *const u8, new_addr as *mut u8, size);
        }
        header::set_forwarded(old_addr, new_addr);
    }

    fn add_to_ephemeron_list(&mut self, survivor: Ephemeron) {
        debug_assert!(self.to_space.contains(survivor.object().addr()));
        survivor.set_next(self.ephemeron_list);
        self.ephemeron_list = survivor.value();
    }

    /// Offer every pending ephemeron a chance to discharge. Discharged
    /// ephemerons scavenge their three slots (growing to-space); the rest
    /// go back on the list for the next round.
    fn process_ephemeron_list(&mut self) {
        let mut survivor = std::mem::replace(&mut self.ephemeron_list, Value::ZERO);

        while survivor.is_heap_object() {
            let ephemeron = Ephemeron::from_value(survivor);
            let next = ephemeron.next();
            ephemeron.set_next(Value::ZERO);

            let key = ephemeron.key();
            let key_survived = key.is_small_integer()
                || !self.from_space.contains(key.heap_object().addr())
                || header::is_forwarded(key.heap_object().addr());
            if key_survived {
                self.scavenge_pointer(ephemeron.key_ptr());
                self.scavenge_pointer(ephemeron.value_ptr());
                self.scavenge_pointer(ephemeron.finalizer_ptr());
            } else {
                // Fate of the key is not yet known.
                self.add_to_ephemeron_list(ephemeron);
            }

            survivor = next;
        }
    }

    /// Pending ephemerons whose keys died: nil the triple.
    fn mourn_ephemeron_list(&mut self) {
        let nil = self.nil_obj();
        let mut survivor = std::mem::replace(&mut self.ephemeron_list, Value::ZERO);

        while survivor.is_heap_object() {
            let ephemeron = Ephemeron::from_value(survivor);
            let next = ephemeron.next();
            ephemeron.set_next(Value::ZERO);

            debug_assert!(self
                .from_space
                .contains(ephemeron.key().heap_object().addr()));

            if let Some(hook) = self.finalizer_hook.as_mut() {
                hook(ephemeron.finalizer());
            }
            ephemeron.set_key(nil);
            ephemeron.set_value_slot(nil);
            // TODO: queue the finalizer for the interpreter's event loop
            // instead of dropping it here.
            ephemeron.set_finalizer(nil);

            survivor = next;
        }
    }

    fn add_to_weak_list(&mut self, survivor: WeakArray) {
        debug_assert!(self.to_space.contains(survivor.object().addr()));
        survivor.set_next(self.weak_list);
        self.weak_list = survivor.value();
    }

    /// Rewrite surviving weak arrays: dead targets become nil, live ones
    /// get their new addresses.
    fn mourn_weak_list(&mut self) {
        let mut survivor = std::mem::replace(&mut self.weak_list, Value::ZERO);

        while survivor.is_heap_object() {
            let weak = WeakArray::from_value(survivor);
            let next = weak.next();
            weak.set_next(Value::ZERO);

            if let Some(range) = weak.object().pointer_range() {
                for index in range {
                    self.mourn_weak_pointer(weak.object().word_ptr(index));
                }
            }

            survivor = next;
        }
    }

    fn mourn_weak_pointer(&mut self, ptr: *mut Value) {
        let old_target = unsafe { *ptr };
        if old_target.is_small_integer() {
            return;
        }
        let old_addr = old_target.heap_object().addr();
        if !self.from_space.contains(old_addr) {
            return;
        }

        let new_target = if header::is_forwarded(old_addr) {
            header::forwarding_target(old_addr)
        } else {
            // The object store, and with it nil, survived the strong phase.
            self.nil_obj()
        };

        unsafe { *ptr = new_target };
    }

    /// Sweep the class table: surviving classes are retargeted, dead ones
    /// release their cid onto the free list.
    fn mourn_class_table(&mut self) {
        for cid in FIRST_LEGAL_CID..self.class_table.top() {
            let old_target = self.class_table.slot(cid);
            if old_target.is_small_integer() {
                continue;
            }
            let old_addr = old_target.heap_object().addr();
            if !self.from_space.contains(old_addr) {
                continue;
            }

            if header::is_forwarded(old_addr) {
                self.class_table
                    .set_slot(cid, header::forwarding_target(old_addr));
            } else {
                self.class_table.push_free(cid);
            }
        }
    }

    /// Drop the weak caches the collector cannot update.
    pub(crate) fn clear_caches(&mut self) {
        if let Some(cache) = &self.lookup_cache {
            cache.clear();
        }
        self.recycle_list = Value::ZERO;
    }
}
