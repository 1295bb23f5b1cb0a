//! The runtime facade.
//!
//! The named entry points emitted code calls for its semantic operations.
//! Every function here is a thin re-export of the shared runtime helpers —
//! the point is that the VM and the interpreter hit the exact same code for
//! add, equality, property access, truthiness, typeof, instance-of, `in`,
//! calls, iteration and conversion, which is what makes compiled and
//! interpreted runs observably identical.

pub use tsr_runtime::members::{
    call_sync, enumerate_keys, get_index, get_property, iter_source, read_iterator_result,
    set_index, set_property,
};
pub use tsr_runtime::ops::{
    add, arithmetic, bit_not, bitwise, compare, in_op, instance_of, loose_equals, negate,
    strict_equals, to_display_string, to_number, truthy, type_of, unsigned_right_shift,
};

use tsr_runtime::{RtResult, Value};

/// Variadic concatenation primitive behind `Op::Concat`.
pub fn concat(parts: &[Value]) -> Value {
    let mut out = String::new();
    for part in parts {
        out.push_str(&to_display_string(part));
    }
    Value::str(out)
}

/// Boxing helpers for the numeric fast path: the specialized opcodes
/// operate on unboxed doubles and re-enter the generic path when an operand
/// is not a number.
pub fn unbox_number(value: &Value) -> Option<f64> {
    value.as_number()
}

pub fn box_number(n: f64) -> Value {
    Value::Number(n)
}

pub fn box_bool(b: bool) -> Value {
    Value::Bool(b)
}

/// Snapshot an iterable into an array (spread sites without custom
/// iterators).
pub fn array_from_iterable(value: &Value) -> RtResult<Option<Vec<Value>>> {
    match iter_source(value, false)? {
        tsr_runtime::members::IterSource::Values(values) => Ok(Some(values)),
        _ => Ok(None),
    }
}
