//! Bulk identity swap ("become").
//!
//! Every pointer to `old[i]` is made to behave as a pointer to `new[i]`
//! without moving any memory: each forwarder is overwritten in place with a
//! forwarding corpse, and a single non-moving sweep over the roots, the
//! active semispace and the class table chases the corpses out of every
//! slot. Corpses are recognized by cid, not by the scavenger's mark bit,
//! so the two forwarding mechanisms never interfere; the next scavenge
//! simply never copies a corpse because nothing references it anymore.
//!
//! A class can become another class. Instances are retargeted through the
//! class-table sweep: if the replacement class has no id yet it inherits
//! the old one in place, otherwise instance headers are rewritten to the
//! replacement's id and the old cid is released.

use crate::heap::Heap;
use crate::object::{
    initialize_object, Array, Behavior, Cid, ForwardingCorpse, HeapObject, Value, ARRAY_CID,
    FIRST_LEGAL_CID, FORWARDING_CORPSE_CID,
};

impl Heap {
    /// Make every reference to `old`'s elements refer to `new`'s
    /// corresponding elements. Identity hashes migrate with the identity.
    ///
    /// Returns `false` without mutating anything when the arguments are not
    /// two equal-length arrays or any element is an immediate.
    pub fn become_forward(&mut self, old: Value, new: Value) -> bool {
        if !is_array(old) || !is_array(new) {
            return false;
        }
        let old = Array::from_value(old);
        let new = Array::from_value(new);
        if old.len() != new.len() {
            return false;
        }
        let len = old.len();
        for i in 0..len {
            if old.element(i).is_small_integer() || new.element(i).is_small_integer() {
                return false;
            }
        }

        #[cfg(feature = "trace-become")]
        eprintln!("become({len})");

        for i in 0..len {
            let forwarder = old.element(i).heap_object();
            let forwardee = new.element(i).heap_object();
            debug_assert!(forwarder.cid() != FORWARDING_CORPSE_CID);
            debug_assert!(forwardee.cid() != FORWARDING_CORPSE_CID);

            // Identity hashes belong to the identity, not the storage.
            forwardee.set_identity_hash(forwarder.identity_hash());

            let size = forwarder.heap_size();
            let corpse_obj = initialize_object(forwarder.addr(), FORWARDING_CORPSE_CID, size);
            let corpse = ForwardingCorpse::from_heap_object(corpse_obj);
            if corpse_obj.size_units() == 0 {
                corpse.set_overflow_size(size);
            }
            debug_assert_eq!(corpse_obj.heap_size(), size);

            corpse.set_target(forwardee.value());
        }

        self.forward_roots();
        self.forward_to_space(); // Still using the pre-become class table.
        self.forward_class_table();

        self.clear_caches();

        if self.config.verify {
            crate::verify::verify(self);
        }

        true
    }

    fn forward_roots(&mut self) {
        let store: *mut Value = &mut self.object_store;
        forward_pointer(store);
        let activation: *mut Value = &mut self.current_activation;
        forward_pointer(activation);

        for i in 0..self.handles.len() {
            forward_pointer(self.handles.at(i));
        }
    }

    fn forward_to_space(&mut self) {
        let mut scan = self.to_space.object_start();
        while scan < self.top {
            let obj = HeapObject::at(scan);
            let size = obj.heap_size();
            if obj.cid() != FORWARDING_CORPSE_CID {
                self.forward_class(obj);
                if let Some(range) = obj.pointer_range() {
                    for index in range {
                        forward_pointer(obj.word_ptr(index));
                    }
                }
            }
            scan += size;
        }
    }

    /// Retarget `obj`'s cid when its class became another class.
    fn forward_class(&mut self, obj: HeapObject) {
        let old_class_v = self.class_table.class_at(obj.cid());
        if !old_class_v.is_heap_object() {
            // Reserved cid with no registered class.
            return;
        }
        let old_class = old_class_v.heap_object();
        if old_class.cid() != FORWARDING_CORPSE_CID {
            return;
        }

        let corpse = ForwardingCorpse::from_heap_object(old_class);
        let new_class = Behavior::from_value(corpse.target());
        debug_assert!(new_class.value().heap_object().cid() != FORWARDING_CORPSE_CID);

        if new_class.id() == self.nil_obj() {
            // Unregistered replacement inherits the old cid in place; the
            // table sweep will then keep the slot.
            let old_id = Behavior::from_heap_object(old_class).id();
            debug_assert!(old_id.is_small_integer());
            new_class.set_id(old_id);
        }
        obj.set_cid(new_class.id().as_small_integer() as Cid);
    }

    fn forward_class_table(&mut self) {
        for cid in FIRST_LEGAL_CID..self.class_table.top() {
            let old_class_v = self.class_table.slot(cid);
            if !old_class_v.is_heap_object() {
                continue;
            }
            let old_class = old_class_v.heap_object();
            if old_class.cid() != FORWARDING_CORPSE_CID {
                continue;
            }

            let corpse = ForwardingCorpse::from_heap_object(old_class);
            let new_class = Behavior::from_value(corpse.target());
            debug_assert!(new_class.value().heap_object().cid() != FORWARDING_CORPSE_CID);

            let old_id = Behavior::from_heap_object(old_class).id();
            debug_assert!(old_id.is_small_integer());
            debug_assert!(new_class.id().is_small_integer() || new_class.id() == self.nil_obj());

            if old_id == new_class.id() {
                self.class_table.set_slot(cid, new_class.value());
            } else {
                // The replacement is unregistered or lives under another
                // cid; instances already carry the new cid, so release
                // this one.
                self.class_table.push_free(cid);
            }
        }
    }
}

fn forward_pointer(ptr: *mut Value) {
    let old_target = unsafe { *ptr };
    if !old_target.is_heap_object() {
        return;
    }
    let obj = old_target.heap_object();
    if obj.cid() == FORWARDING_CORPSE_CID {
        let new_target = ForwardingCorpse::from_heap_object(obj).target();
        debug_assert!(new_target.heap_object().cid() != FORWARDING_CORPSE_CID);
        unsafe { *ptr = new_target };
    }
}

fn is_array(v: Value) -> bool {
    v.is_heap_object() && v.heap_object().cid() == ARRAY_CID
}
