//! Operator semantics.
//!
//! One function per abstract operation (truthy, typeof, add, equality,
//! bitwise, ...). Both backends call these: the interpreter from its
//! expression dispatch, the VM through the runtime facade, so the dynamic
//! semantics are defined exactly once.
//!
//! BigInt is detected by operand type and routed to separate helpers that
//! reject mixing with non-bigint operands except for equality.

use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::error::throw_type_error;
use crate::value::{PromiseStatus, Value};
use crate::RtResult;

/// `false`, `null`, `undefined`, `0`, `NaN`, `""` and `0n` are falsy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Undefined | Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => *n != 0.0 && !n.is_nan(),
        Value::BigInt(b) => !b.is_zero(),
        Value::Str(s) => !s.is_empty(),
        _ => true,
    }
}

pub fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Undefined => "undefined",
        Value::Null => "object",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::BigInt(_) => "bigint",
        Value::Str(_) => "string",
        Value::Symbol(_) => "symbol",
        Value::Function(_) | Value::Bound(_) | Value::Native(_) | Value::NativeMethod(_)
        | Value::Class(_) => "function",
        Value::Opaque(o) if o.callable() => "function",
        _ => "object",
    }
}

/// Numeric coercion for arithmetic operands.
pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => *n,
        Value::Bool(true) => 1.0,
        Value::Bool(false) | Value::Null => 0.0,
        Value::Undefined => f64::NAN,
        Value::Str(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse().unwrap_or(f64::NAN)
            }
        }
        Value::BigInt(b) => b.to_f64().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

/// ToInt32 with the standard modular wrap.
pub fn to_int32(value: &Value) -> i32 {
    let n = to_number(value);
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    let m = n.trunc() as i64;
    m as i32
}

pub fn to_uint32(value: &Value) -> u32 {
    to_int32(value) as u32
}

/// Format a number the way the language prints it: integers without a
/// decimal point, `Infinity`/`NaN` spelled out.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e21 {
        return format!("{}", n as i64);
    }
    format!("{n}")
}

/// String conversion used by concatenation and template literals.
pub fn to_display_string(value: &Value) -> String {
    match value {
        Value::Undefined => "undefined".to_string(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => number_to_string(*n),
        Value::BigInt(b) => b.to_string(),
        Value::Str(s) => s.to_string(),
        Value::Symbol(s) => format!("Symbol({})", s.description),
        Value::Array(items) => {
            let items = items.borrow();
            let parts: Vec<String> = items.iter().map(to_display_string).collect();
            parts.join(",")
        }
        Value::Object(obj) => {
            // Error-shaped objects stringify like the host's Error.
            let props = obj.props.borrow();
            if let (Some(Value::Str(name)), Some(Value::Str(message))) =
                (props.get("name"), props.get("message"))
            {
                if props.len() <= 3 {
                    return format!("{name}: {message}");
                }
            }
            "[object Object]".to_string()
        }
        Value::Instance(inst) => format!("[object {}]", inst.class.name),
        Value::Class(class) => format!("class {}", class.name),
        Value::Function(f) => match &f.decl.name {
            Some(name) => format!("function {name}"),
            None => "function".to_string(),
        },
        Value::Bound(b) => to_display_string(&b.func),
        Value::Native(f) => format!("function {}", f.name),
        Value::NativeMethod(m) => format!("function {}", m.name),
        Value::Promise(_) => "[object Promise]".to_string(),
        Value::Generator(_) => "[object Generator]".to_string(),
        Value::Map(_) => "[object Map]".to_string(),
        Value::Set(_) => "[object Set]".to_string(),
        Value::Regex(r) => format!("/{}/{}", r.source, r.flags),
        Value::Date(ms) => format!("[Date {}]", ms.get()),
        Value::Opaque(_) => "function".to_string(),
    }
}

/// The `console.log` rendering: strings bare at the top level, quoted
/// inside containers; objects in literal-ish notation.
pub fn inspect(value: &Value) -> String {
    inspect_depth(value, 0)
}

fn inspect_depth(value: &Value, depth: usize) -> String {
    if depth > 4 {
        return "...".to_string();
    }
    match value {
        Value::Str(s) if depth > 0 => format!("'{s}'"),
        Value::Array(items) => {
            let items = items.borrow();
            let parts: Vec<String> = items.iter().map(|v| inspect_depth(v, depth + 1)).collect();
            format!("[ {} ]", parts.join(", "))
        }
        Value::Object(obj) => {
            let props = obj.props.borrow();
            if props.is_empty() {
                return "{}".to_string();
            }
            let parts: Vec<String> = props
                .iter()
                .map(|(k, v)| format!("{k}: {}", inspect_depth(v, depth + 1)))
                .collect();
            format!("{{ {} }}", parts.join(", "))
        }
        Value::Instance(inst) => {
            let fields = inst.fields.borrow();
            let parts: Vec<String> = fields
                .iter()
                .map(|(k, v)| format!("{k}: {}", inspect_depth(v, depth + 1)))
                .collect();
            format!("{} {{ {} }}", inst.class.name, parts.join(", "))
        }
        Value::Map(entries) => {
            let entries = entries.borrow();
            let parts: Vec<String> = entries
                .iter()
                .map(|(k, v)| {
                    format!("{} => {}", inspect_depth(&k.0, depth + 1), inspect_depth(v, depth + 1))
                })
                .collect();
            format!("Map({}) {{ {} }}", entries.len(), parts.join(", "))
        }
        Value::Set(entries) => {
            let entries = entries.borrow();
            let parts: Vec<String> =
                entries.iter().map(|k| inspect_depth(&k.0, depth + 1)).collect();
            format!("Set({}) {{ {} }}", entries.len(), parts.join(", "))
        }
        Value::Promise(p) => match &*p.status.borrow() {
            PromiseStatus::Pending => "Promise { <pending> }".to_string(),
            PromiseStatus::Fulfilled => "Promise { <fulfilled> }".to_string(),
            PromiseStatus::Rejected => "Promise { <rejected> }".to_string(),
        },
        other => to_display_string(other),
    }
}

// =============================================================================
// Arithmetic
// =============================================================================

/// `+`: numeric addition or string concatenation by operand type.
pub fn add(left: &Value, right: &Value) -> RtResult<Value> {
    match (left, right) {
        (Value::Str(_), _) | (_, Value::Str(_)) => Ok(Value::str(format!(
            "{}{}",
            to_display_string(left),
            to_display_string(right)
        ))),
        (Value::BigInt(a), Value::BigInt(b)) => {
            Ok(Value::BigInt(Rc::new(a.as_ref() + b.as_ref())))
        }
        (Value::BigInt(_), _) | (_, Value::BigInt(_)) => {
            Err(throw_type_error("Cannot mix BigInt and other types"))
        }
        _ => Ok(Value::Number(to_number(left) + to_number(right))),
    }
}

/// `- * / % **` on numbers or bigints.
pub fn arithmetic(op: &str, left: &Value, right: &Value) -> RtResult<Value> {
    if let (Value::BigInt(a), Value::BigInt(b)) = (left, right) {
        return bigint_arithmetic(op, a, b);
    }
    if matches!(left, Value::BigInt(_)) || matches!(right, Value::BigInt(_)) {
        return Err(throw_type_error("Cannot mix BigInt and other types"));
    }
    let a = to_number(left);
    let b = to_number(right);
    let result = match op {
        "-" => a - b,
        "*" => a * b,
        "/" => a / b,
        "%" => a % b,
        "**" => a.powf(b),
        _ => f64::NAN,
    };
    Ok(Value::Number(result))
}

fn bigint_arithmetic(op: &str, a: &Rc<BigInt>, b: &Rc<BigInt>) -> RtResult<Value> {
    let result = match op {
        "-" => a.as_ref() - b.as_ref(),
        "*" => a.as_ref() * b.as_ref(),
        "/" => {
            if b.is_zero() {
                return Err(crate::error::make_error("RangeError", "Division by zero"));
            }
            a.as_ref() / b.as_ref()
        }
        "%" => {
            if b.is_zero() {
                return Err(crate::error::make_error("RangeError", "Division by zero"));
            }
            a.as_ref() % b.as_ref()
        }
        "**" => {
            let exp = b.to_u32().ok_or_else(|| {
                crate::error::make_error("RangeError", "Exponent must be non-negative")
            })?;
            a.as_ref().pow(exp)
        }
        _ => return Err(throw_type_error(format!("unsupported bigint operator '{op}'"))),
    };
    Ok(Value::BigInt(Rc::new(result)))
}

/// `< <= > >=` with the string/number split.
pub fn compare(op: &str, left: &Value, right: &Value) -> RtResult<Value> {
    if let (Value::BigInt(a), Value::BigInt(b)) = (left, right) {
        let ord = a.cmp(b);
        return Ok(Value::Bool(match op {
            "<" => ord.is_lt(),
            "<=" => ord.is_le(),
            ">" => ord.is_gt(),
            ">=" => ord.is_ge(),
            _ => false,
        }));
    }
    if let (Value::Str(a), Value::Str(b)) = (left, right) {
        return Ok(Value::Bool(match op {
            "<" => a < b,
            "<=" => a <= b,
            ">" => a > b,
            ">=" => a >= b,
            _ => false,
        }));
    }
    let a = to_number(left);
    let b = to_number(right);
    if a.is_nan() || b.is_nan() {
        return Ok(Value::Bool(false));
    }
    Ok(Value::Bool(match op {
        "<" => a < b,
        "<=" => a <= b,
        ">" => a > b,
        ">=" => a >= b,
        _ => false,
    }))
}

/// Strict equality: type identity plus value/reference equality.
pub fn strict_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        // BigInt/number strict equality requires identical types.
        (Value::Number(a), Value::Number(b)) => a == b,
        _ => left.same_identity(right),
    }
}

/// Loose equality: `null` and `undefined` are co-equal and equal nothing
/// else; numbers and strings coerce; bigints compare by numeric value.
pub fn loose_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
        (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
        (Value::Number(a), Value::Str(_)) => *a == to_number(right),
        (Value::Str(_), Value::Number(b)) => to_number(left) == *b,
        (Value::Bool(_), _) => loose_equals(&Value::Number(to_number(left)), right),
        (_, Value::Bool(_)) => loose_equals(left, &Value::Number(to_number(right))),
        (Value::BigInt(a), Value::Number(b)) => a.to_f64() == Some(*b),
        (Value::Number(a), Value::BigInt(b)) => b.to_f64() == Some(*a),
        (Value::BigInt(a), Value::Str(s)) => {
            s.parse::<BigInt>().map(|b| *a.as_ref() == b).unwrap_or(false)
        }
        (Value::Str(s), Value::BigInt(b)) => {
            s.parse::<BigInt>().map(|a| a == *b.as_ref()).unwrap_or(false)
        }
        _ => strict_equals(left, right),
    }
}

// =============================================================================
// Bitwise
// =============================================================================

/// `& | ^ << >>`: operands coerce to signed 32-bit; shift counts mask to 5
/// bits.
pub fn bitwise(op: &str, left: &Value, right: &Value) -> RtResult<Value> {
    if let (Value::BigInt(a), Value::BigInt(b)) = (left, right) {
        let result = match op {
            "&" => a.as_ref() & b.as_ref(),
            "|" => a.as_ref() | b.as_ref(),
            "^" => a.as_ref() ^ b.as_ref(),
            "<<" => {
                let shift = b.to_u64().unwrap_or(0);
                a.as_ref() << shift
            }
            ">>" => {
                let shift = b.to_u64().unwrap_or(0);
                a.as_ref() >> shift
            }
            _ => return Err(throw_type_error(format!("unsupported bigint operator '{op}'"))),
        };
        return Ok(Value::BigInt(Rc::new(result)));
    }
    if matches!(left, Value::BigInt(_)) || matches!(right, Value::BigInt(_)) {
        return Err(throw_type_error("Cannot mix BigInt and other types"));
    }
    let a = to_int32(left);
    let result = match op {
        "&" => a & to_int32(right),
        "|" => a | to_int32(right),
        "^" => a ^ to_int32(right),
        "<<" => a.wrapping_shl(to_uint32(right) & 31),
        ">>" => a.wrapping_shr(to_uint32(right) & 31),
        _ => 0,
    };
    Ok(Value::Number(result as f64))
}

/// `>>>`: signed-to-unsigned cast before the shift.
pub fn unsigned_right_shift(left: &Value, right: &Value) -> RtResult<Value> {
    if matches!(left, Value::BigInt(_)) || matches!(right, Value::BigInt(_)) {
        return Err(throw_type_error("BigInts have no unsigned right shift"));
    }
    let a = to_uint32(left);
    let shift = to_uint32(right) & 31;
    Ok(Value::Number((a >> shift) as f64))
}

pub fn bit_not(value: &Value) -> RtResult<Value> {
    if let Value::BigInt(b) = value {
        return Ok(Value::BigInt(Rc::new(!b.as_ref())));
    }
    Ok(Value::Number(!to_int32(value) as f64))
}

pub fn negate(value: &Value) -> RtResult<Value> {
    if let Value::BigInt(b) = value {
        return Ok(Value::BigInt(Rc::new(-b.as_ref())));
    }
    Ok(Value::Number(-to_number(value)))
}

// =============================================================================
// Relational keywords
// =============================================================================

/// `"key" in obj` — property existence by receiver variant.
pub fn in_op(key: &Value, object: &Value) -> RtResult<Value> {
    let found = match object {
        Value::Object(obj) => match key {
            Value::Symbol(sym) => obj.symbols.borrow().contains_key(&sym.id),
            _ => obj.props.borrow().contains_key(to_display_string(key).as_str()),
        },
        Value::Instance(inst) => {
            let name = to_display_string(key);
            inst.fields.borrow().contains_key(name.as_str())
                || inst.class.find_method(&name).is_some()
                || inst.class.find_getter(&name).is_some()
        }
        Value::Array(items) => {
            let index = to_number(key);
            index.fract() == 0.0 && index >= 0.0 && (index as usize) < items.borrow().len()
        }
        Value::Map(entries) => entries
            .borrow()
            .contains_key(&crate::value::ValueKey(key.clone())),
        _ => {
            return Err(throw_type_error(format!(
                "Cannot use 'in' operator to search in {}",
                type_of(object)
            )));
        }
    };
    Ok(Value::Bool(found))
}

/// `x instanceof C` — class-chain walk, with error constructors matched by
/// their error name brand.
pub fn instance_of(value: &Value, constructor: &Value) -> RtResult<Value> {
    let result = match (value, constructor) {
        (Value::Instance(inst), Value::Class(class)) => inst.class.derives_from(class),
        (Value::Object(obj), Value::Native(ctor)) if is_error_ctor(ctor.name) => {
            match obj.props.borrow().get("name").and_then(|v| v.as_str().map(str::to_string)) {
                Some(name) => name == ctor.name || ctor.name == "Error",
                None => false,
            }
        }
        (Value::Promise(_), Value::Native(ctor)) => ctor.name == "Promise",
        (Value::Array(_), Value::Native(ctor)) => ctor.name == "Array",
        (Value::Regex(_), Value::Native(ctor)) => ctor.name == "RegExp",
        (Value::Date(_), Value::Native(ctor)) => ctor.name == "Date",
        (Value::Map(_), Value::Native(ctor)) => ctor.name == "Map",
        (Value::Set(_), Value::Native(ctor)) => ctor.name == "Set",
        (_, Value::Class(_)) | (_, Value::Native(_)) => false,
        _ => {
            return Err(throw_type_error(
                "Right-hand side of 'instanceof' is not callable",
            ));
        }
    };
    Ok(Value::Bool(result))
}

fn is_error_ctor(name: &str) -> bool {
    matches!(name, "Error" | "TypeError" | "RangeError" | "SyntaxError")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_table() {
        assert!(!truthy(&Value::Undefined));
        assert!(!truthy(&Value::Null));
        assert!(!truthy(&Value::Bool(false)));
        assert!(!truthy(&Value::Number(0.0)));
        assert!(!truthy(&Value::Number(f64::NAN)));
        assert!(!truthy(&Value::str("")));
        assert!(!truthy(&Value::BigInt(Rc::new(BigInt::from(0)))));
        assert!(truthy(&Value::Number(1.0)));
        assert!(truthy(&Value::str("x")));
        assert!(truthy(&Value::array(vec![])));
    }

    #[test]
    fn add_dispatches_on_operand_types() {
        let n = add(&Value::Number(1.0), &Value::Number(2.0)).unwrap();
        assert_eq!(n.as_number(), Some(3.0));
        let s = add(&Value::str("a"), &Value::Number(1.0)).unwrap();
        assert_eq!(s.as_str(), Some("a1"));
    }

    #[test]
    fn bigint_rejects_mixing_except_equality() {
        let big = Value::BigInt(Rc::new(BigInt::from(2)));
        assert!(add(&big, &Value::Number(1.0)).is_err());
        assert!(loose_equals(&big, &Value::Number(2.0)));
        assert!(!strict_equals(&big, &Value::Number(2.0)));
    }

    #[test]
    fn loose_equality_nullish_rules() {
        assert!(loose_equals(&Value::Null, &Value::Undefined));
        assert!(!loose_equals(&Value::Null, &Value::Number(0.0)));
        assert!(!loose_equals(&Value::Undefined, &Value::Bool(false)));
    }

    #[test]
    fn shift_counts_mask_to_five_bits() {
        let v = bitwise("<<", &Value::Number(1.0), &Value::Number(33.0)).unwrap();
        assert_eq!(v.as_number(), Some(2.0));
        let v = unsigned_right_shift(&Value::Number(-1.0), &Value::Number(0.0)).unwrap();
        assert_eq!(v.as_number(), Some(4294967295.0));
    }

    #[test]
    fn number_formatting_matches_language() {
        assert_eq!(number_to_string(1.0), "1");
        assert_eq!(number_to_string(1.5), "1.5");
        assert_eq!(number_to_string(f64::INFINITY), "Infinity");
        assert_eq!(number_to_string(f64::NAN), "NaN");
    }
}
