//! Error-shaped throwable values.
//!
//! Every error raised by the engine or the built-ins is an object value with
//! `name` and `message` string fields (plus `line` where known), so user
//! `try/catch` and `instanceof` behave uniformly.

use indexmap::IndexMap;

use crate::value::Value;

/// Build an error object with the given class name.
pub fn make_error(name: &str, message: impl Into<String>) -> Value {
    let mut props = IndexMap::new();
    props.insert("name".to_string(), Value::str(name));
    props.insert("message".to_string(), Value::str(message.into()));
    Value::object(props)
}

pub fn make_error_at(name: &str, message: impl Into<String>, line: u32) -> Value {
    let err = make_error(name, message);
    if let Value::Object(obj) = &err {
        obj.props
            .borrow_mut()
            .insert("line".to_string(), Value::Number(line as f64));
    }
    err
}

pub fn throw_error(message: impl Into<String>) -> Value {
    make_error("Error", message)
}

pub fn throw_type_error(message: impl Into<String>) -> Value {
    make_error("TypeError", message)
}

pub fn throw_range_error(message: impl Into<String>) -> Value {
    make_error("RangeError", message)
}

/// The error class name of a throwable, when it is error-shaped.
pub fn error_name(value: &Value) -> Option<String> {
    match value {
        Value::Object(obj) => obj
            .props
            .borrow()
            .get("name")
            .and_then(|v| v.as_str().map(str::to_string)),
        Value::Instance(inst) => inst
            .fields
            .borrow()
            .get("name")
            .and_then(|v| v.as_str().map(str::to_string))
            .or_else(|| Some(inst.class.name.clone())),
        _ => None,
    }
}

pub fn error_message(value: &Value) -> Option<String> {
    match value {
        Value::Object(obj) => obj
            .props
            .borrow()
            .get("message")
            .and_then(|v| v.as_str().map(str::to_string)),
        Value::Instance(inst) => inst
            .fields
            .borrow()
            .get("message")
            .and_then(|v| v.as_str().map(str::to_string)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_carry_name_and_message() {
        let err = throw_type_error("Cannot assign to read only property 'x'");
        assert_eq!(error_name(&err).as_deref(), Some("TypeError"));
        assert!(error_message(&err).unwrap().contains("read only"));
    }
}
