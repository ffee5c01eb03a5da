//! Post-collection heap verification.
//!
//! Walks the active semispace and the class table and panics on the first
//! broken invariant. Runs after every scavenge and become when
//! [`HeapConfig::verify`](crate::HeapConfig) is set; the checks mirror the
//! heap's steady-state invariants:
//!
//! - no slot targets the passive semispace,
//! - no forwarding bit is set, and nothing references a corpse,
//! - every cid in use indexes a valid class slot,
//! - every registered class is stamped with its own cid,
//! - the free list and the live slots partition the allocated table range,
//! - no object is threaded onto a collector worklist.

use rustc_hash::FxHashSet;

use crate::heap::Heap;
use crate::object::header;
use crate::object::{
    HeapObject, Value, EPHEMERON_CID, FIRST_LEGAL_CID, FORWARDING_CORPSE_CID, ILLEGAL_CID,
    OBJECT_ALIGNMENT, WEAK_ARRAY_CID,
};

pub(crate) fn verify(heap: &Heap) {
    assert!(
        heap.ephemeron_list.is_small_integer(),
        "ephemeron worklist is not empty between collections"
    );
    assert!(
        heap.weak_list.is_small_integer(),
        "weak worklist is not empty between collections"
    );

    verify_to_space(heap);
    verify_class_table(heap);
}

fn verify_to_space(heap: &Heap) {
    let mut scan = heap.to_space.object_start();
    while scan < heap.top {
        let obj = HeapObject::at(scan);
        assert!(
            !header::is_forwarded(obj.addr()),
            "forwarding bit set outside a collection at {:#x}",
            obj.addr()
        );

        let cid = obj.cid();
        assert!(cid != ILLEGAL_CID, "illegal cid at {:#x}", obj.addr());
        assert!(
            cid == FORWARDING_CORPSE_CID || cid < heap.class_table.top(),
            "cid {cid} does not index a valid class slot"
        );

        let size = obj.heap_size();
        assert!(size > 0 && size % OBJECT_ALIGNMENT == 0, "bad heap size");
        assert!(scan + size <= heap.top, "object overruns the live region");

        if let Some(range) = obj.pointer_range() {
            for index in range {
                verify_slot(heap, obj, obj.load(index));
            }
        }

        // Worklist links must be parked between collections.
        if cid == EPHEMERON_CID {
            assert!(obj.load(4).is_small_integer(), "ephemeron still on a list");
        } else if cid == WEAK_ARRAY_CID {
            assert!(obj.load(2).is_small_integer(), "weak array still on a list");
        }

        scan += size;
    }
    assert_eq!(scan, heap.top, "heap walk did not land on top");
}

fn verify_slot(heap: &Heap, holder: HeapObject, v: Value) {
    if v.is_small_integer() {
        return;
    }
    let target = v.heap_object();
    assert!(
        heap.to_space.contains(target.addr()),
        "slot in {:#x} targets outside to-space (stale from-space pointer?)",
        holder.addr()
    );
    assert!(
        !header::is_forwarded(target.addr()),
        "slot in {:#x} targets a forwarded object",
        holder.addr()
    );
    assert!(
        target.cid() != FORWARDING_CORPSE_CID,
        "slot in {:#x} targets a corpse",
        holder.addr()
    );
}

fn verify_class_table(heap: &Heap) {
    let table = &heap.class_table;

    // Free-list walk: in range, acyclic, all links immediate.
    let mut free_slots = FxHashSet::default();
    let mut cid = table.free_head();
    while cid != 0 {
        assert!(
            cid >= FIRST_LEGAL_CID && cid < table.top(),
            "free-list link {cid} out of range"
        );
        assert!(free_slots.insert(cid), "cid {cid} is on the free list twice");
        let link = table.slot(cid);
        assert!(link.is_small_integer(), "free slot {cid} holds an object");
        cid = link.as_small_integer() as usize;
    }

    let mut live = 0usize;
    let mut unregistered = 0usize;
    for cid in FIRST_LEGAL_CID..table.top() {
        let slot = table.slot(cid);
        if free_slots.contains(&cid) {
            continue;
        }
        if slot.is_small_integer() {
            // Allocated but not yet registered.
            unregistered += 1;
            continue;
        }
        live += 1;
        let class = slot.heap_object();
        assert!(
            heap.to_space.contains(class.addr()),
            "class slot {cid} targets outside to-space"
        );
        assert!(
            class.cid() != FORWARDING_CORPSE_CID,
            "class slot {cid} targets a corpse"
        );
        let id = crate::object::Behavior::from_heap_object(class).id();
        assert!(
            id.is_small_integer() && id.as_small_integer() as usize == cid,
            "class registered under cid {cid} is stamped {id:?}"
        );
    }

    // The free list, the live slots and the not-yet-registered slots
    // partition the allocated range.
    assert_eq!(
        free_slots.len() + live + unregistered,
        table.top() - FIRST_LEGAL_CID,
        "class table slots do not partition"
    );
}
