//! The class table: a dense map from cid to class object.
//!
//! Instances carry a cid, not a class pointer, so the cycle
//! `instance -> cid -> table -> class -> ... -> instance` is broken at the
//! table and stays safe under copying.
//!
//! Slots below [`FIRST_REGULAR_OBJECT_CID`] are reserved for the built-in
//! shapes and exist before any class object does. A freed slot holds a
//! small-integer link to the next free cid; the head of that free list
//! lives outside the table, with 0 (the illegal cid) terminating it.
//! Unregistered slots hold small-integer 0 and are inert to the collector.

use crate::object::{Behavior, Cid, Value, FIRST_REGULAR_OBJECT_CID};

pub(crate) struct ClassTable {
    slots: Vec<Value>,
    top: usize,
    free: Cid,
}

impl ClassTable {
    pub(crate) fn new(capacity: usize) -> ClassTable {
        assert!(capacity >= FIRST_REGULAR_OBJECT_CID);
        ClassTable {
            slots: vec![Value::ZERO; capacity],
            top: FIRST_REGULAR_OBJECT_CID,
            free: 0,
        }
    }

    /// Hand out a cid from the free list, else from the bump cursor.
    /// `None` when the table is full; the heap scavenges and retries.
    pub(crate) fn try_allocate_id(&mut self) -> Option<Cid> {
        let cid = if self.free != 0 {
            let cid = self.free;
            self.free = self.slots[cid].as_small_integer() as Cid;
            cid
        } else if self.top < self.slots.len() {
            self.top += 1;
            self.top - 1
        } else {
            return None;
        };
        self.slots[cid] = Value::ZERO;
        Some(cid)
    }

    /// Bind `cid` to `cls` and stamp the cid into the class object.
    pub(crate) fn register(&mut self, cid: Cid, cls: Behavior) {
        debug_assert!(cid < self.top);
        debug_assert!(
            self.slots[cid] == Value::ZERO,
            "cid {cid} is already registered"
        );
        debug_assert!(cls.value().heap_object().cid() >= FIRST_REGULAR_OBJECT_CID);
        self.slots[cid] = cls.value();
        cls.set_id(Value::small_int(cid as isize));
    }

    /// The class object registered for `cid`.
    pub(crate) fn class_at(&self, cid: Cid) -> Value {
        debug_assert!(cid > 0);
        self.slots[cid]
    }

    /// Link `cid` into the free list.
    pub(crate) fn push_free(&mut self, cid: Cid) {
        self.slots[cid] = Value::small_int(self.free as isize);
        self.free = cid;
    }

    /// One past the highest cid handed out.
    #[inline]
    pub(crate) fn top(&self) -> usize {
        self.top
    }

    /// Total slot capacity.
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Head of the free list (0 = empty).
    #[inline]
    pub(crate) fn free_head(&self) -> Cid {
        self.free
    }

    /// Raw slot read, used by the collector's sweeps.
    #[inline]
    pub(crate) fn slot(&self, cid: Cid) -> Value {
        self.slots[cid]
    }

    /// Raw slot write, used by the collector's sweeps.
    #[inline]
    pub(crate) fn set_slot(&mut self, cid: Cid, v: Value) {
        self.slots[cid] = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_start_above_reserved_range() {
        let mut table = ClassTable::new(64);
        assert_eq!(table.try_allocate_id(), Some(FIRST_REGULAR_OBJECT_CID));
        assert_eq!(table.try_allocate_id(), Some(FIRST_REGULAR_OBJECT_CID + 1));
        assert_eq!(table.top(), FIRST_REGULAR_OBJECT_CID + 2);
    }

    #[test]
    fn test_free_list_is_lifo() {
        let mut table = ClassTable::new(64);
        let a = table.try_allocate_id().unwrap();
        let b = table.try_allocate_id().unwrap();
        let top = table.top();

        table.push_free(a);
        table.push_free(b);

        // Freed slots come back before the bump cursor moves again.
        assert_eq!(table.try_allocate_id(), Some(b));
        assert_eq!(table.try_allocate_id(), Some(a));
        assert_eq!(table.top(), top);
        assert_eq!(table.free_head(), 0);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let mut table = ClassTable::new(FIRST_REGULAR_OBJECT_CID + 1);
        assert!(table.try_allocate_id().is_some());
        assert_eq!(table.try_allocate_id(), None);

        // Recycling a slot makes allocation possible again.
        table.push_free(FIRST_REGULAR_OBJECT_CID);
        assert_eq!(table.try_allocate_id(), Some(FIRST_REGULAR_OBJECT_CID));
    }
}
