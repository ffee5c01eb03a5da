//! Heap walking for debuggers and crash reports.

use super::Heap;
use crate::object::{
    Activation, Array, Behavior, ByteString, Cid, Closure, HeapObject, Method, Mixin, Value,
    BYTE_STRING_CID,
};

impl Heap {
    /// Count the live instances of `cid` by scanning the active semispace.
    pub fn count_instances(&self, cid: Cid) -> usize {
        let mut instances = 0;
        let mut scan = self.to_space.object_start();
        while scan < self.top {
            let obj = HeapObject::at(scan);
            if obj.cid() == cid {
                instances += 1;
            }
            scan += obj.heap_size();
        }
        instances
    }

    /// Collect the live instances of `cid` into `array`, stopping when it
    /// is full. Returns the number of live instances found, which can
    /// exceed the array's length if instances were created since the count.
    pub fn collect_instances(&self, cid: Cid, array: Array) -> usize {
        let mut instances = 0;
        let mut scan = self.to_space.object_start();
        while scan < self.top {
            let obj = HeapObject::at(scan);
            if obj.cid() == cid {
                if instances < array.len() {
                    array.set_element(instances, obj.value());
                }
                instances += 1;
            }
            scan += obj.heap_size();
        }
        instances
    }

    /// Print the activation chain to stderr, one frame per line:
    /// the receiver's mixin, the method's mixin when it differs, and the
    /// selector. Purely for crash reports.
    pub fn print_stack(&self) {
        let nil = self.nil_obj();
        let mut frame = self.current_activation;
        while frame != nil && frame.is_heap_object() {
            let act = Activation::from_value(frame);
            eprint!("  ");

            // Walk block activations out to the enclosing method frame.
            let mut home = act;
            while home.closure() != nil {
                eprint!("[] in ");
                let closure = Closure::from_value(home.closure());
                home = Activation::from_value(closure.defining_activation());
            }

            let receiver_class = Behavior::from_value(self.class_of(home.receiver()));
            let receiver_mixin = receiver_class.mixin();
            print_mixin_name(receiver_mixin);

            let method = Method::from_value(home.method());
            let method_mixin = method.mixin();
            if method_mixin != receiver_mixin {
                eprint!("(");
                print_mixin_name(method_mixin);
                eprint!(")");
            }

            eprint!(" ");
            print_string(method.selector());
            eprintln!();

            frame = act.sender();
        }
    }
}

fn print_mixin_name(mixin: Value) {
    let name = Mixin::from_value(mixin).name();
    if name.is_heap_object() && name.heap_object().cid() == BYTE_STRING_CID {
        print_string(name);
    } else {
        // Class-side mixin: the name slot holds the instance-side mixin.
        print_string(Mixin::from_value(name).name());
        eprint!(" class");
    }
}

fn print_string(v: Value) {
    if v.is_heap_object() && v.heap_object().cid() == BYTE_STRING_CID {
        let string = ByteString::from_value(v);
        eprint!("{}", String::from_utf8_lossy(string.bytes()));
    } else {
        eprint!("<unprintable>");
    }
}
