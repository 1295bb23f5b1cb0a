//! Property access, indexing, iteration, and built-in instance methods.
//!
//! Property access distinguishes by receiver variant: plain objects look up
//! string-keyed fields, instances walk the class chain (auto-binding the
//! receiver on method access), classes expose their static side, and the
//! primitive/built-in receivers dispatch to the native method tables at the
//! bottom of this module. Both backends resolve through these functions so
//! they agree on every lookup.

use std::cell::Cell;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use indexmap::IndexMap;
use num_traits::ToPrimitive;

use crate::error::{make_error, throw_range_error, throw_type_error};
use crate::ops::{number_to_string, to_display_string, to_number, truthy};
use crate::value::*;
use crate::{Engine, RtResult};

/// Well-known symbol identities. The registry interns `Symbol.iterator`,
/// `Symbol.asyncIterator` and `Symbol.dispose` with these ids.
pub mod well_known {
    pub const ITERATOR: u64 = 1;
    pub const ASYNC_ITERATOR: u64 = 2;
    pub const DISPOSE: u64 = 3;
    /// First id handed to user-created symbols.
    pub const FIRST_USER: u64 = 16;
}

/// Drive a call that must not suspend (sync callables, constructors). An
/// async callee returns its promise without suspending, so `Pending` here
/// means a sync path awaited, which the checker rules out.
pub fn call_sync(engine: &dyn Engine, callee: Value, this: Value, args: Vec<Value>) -> RtResult<Value> {
    let mut future = engine.call_value(callee, this, args);
    let mut cx = Context::from_waker(Waker::noop());
    match future.as_mut().poll(&mut cx) {
        Poll::Ready(result) => result,
        Poll::Pending => Err(throw_type_error("synchronous call suspended unexpectedly")),
    }
}

/// Result of a property lookup: plain value, getter to invoke, or absent.
pub enum Property {
    Value(Value),
    /// A getter callable; the caller invokes it with the receiver bound.
    Getter(Value),
    Missing,
}

/// `obj.name` for every receiver variant.
pub fn get_property(value: &Value, name: &str) -> RtResult<Property> {
    match value {
        Value::Object(obj) => {
            if let Some(v) = obj.props.borrow().get(name) {
                return Ok(Property::Value(v.clone()));
            }
            Ok(Property::Missing)
        }
        Value::Instance(inst) => {
            if let Some(v) = inst.fields.borrow().get(name) {
                return Ok(Property::Value(v.clone()));
            }
            if let Some(method) = inst.class.find_method(name) {
                return Ok(Property::Value(Value::Bound(Rc::new(BoundMethod {
                    func: method,
                    receiver: value.clone(),
                }))));
            }
            if let Some(getter) = inst.class.find_getter(name) {
                return Ok(Property::Getter(getter));
            }
            Ok(Property::Missing)
        }
        Value::Class(class) => {
            if name == "name" {
                return Ok(Property::Value(Value::str(class.name.clone())));
            }
            if let Some(v) = class.find_static(name) {
                if class.static_getters.contains_key(name) {
                    return Ok(Property::Getter(v));
                }
                let bound = match &v {
                    Value::Function(_) => Value::Bound(Rc::new(BoundMethod {
                        func: v.clone(),
                        receiver: value.clone(),
                    })),
                    _ => v,
                };
                return Ok(Property::Value(bound));
            }
            Ok(Property::Missing)
        }
        Value::Array(items) => {
            if name == "length" {
                return Ok(Property::Value(Value::Number(items.borrow().len() as f64)));
            }
            Ok(native_method(value, name, array_method(name)))
        }
        Value::Str(s) => {
            if name == "length" {
                return Ok(Property::Value(Value::Number(s.chars().count() as f64)));
            }
            Ok(native_method(value, name, string_method(name)))
        }
        Value::Number(_) => Ok(native_method(value, name, number_method(name))),
        Value::BigInt(_) => Ok(native_method(value, name, bigint_method(name))),
        Value::Map(entries) => {
            if name == "size" {
                return Ok(Property::Value(Value::Number(entries.borrow().len() as f64)));
            }
            Ok(native_method(value, name, map_method(name)))
        }
        Value::Set(entries) => {
            if name == "size" {
                return Ok(Property::Value(Value::Number(entries.borrow().len() as f64)));
            }
            Ok(native_method(value, name, set_method(name)))
        }
        Value::Promise(_) => Ok(native_method(value, name, promise_method(name))),
        Value::Generator(_) => Ok(native_method(value, name, generator_method(name))),
        Value::Date(_) => Ok(native_method(value, name, date_method(name))),
        Value::Regex(regex) => match name {
            "source" => Ok(Property::Value(Value::str(regex.source.clone()))),
            "flags" => Ok(Property::Value(Value::str(regex.flags.clone()))),
            "lastIndex" => Ok(Property::Value(Value::Number(regex.last_index.get() as f64))),
            _ => Ok(native_method(value, name, regex_method(name))),
        },
        Value::Function(_) | Value::Bound(_) | Value::Native(_) | Value::NativeMethod(_) => {
            match name {
                "name" => {
                    let fn_name = match value {
                        Value::Function(f) => f.decl.name.clone().unwrap_or_default(),
                        Value::Native(f) => f.name.to_string(),
                        Value::NativeMethod(m) => m.name.to_string(),
                        _ => String::new(),
                    };
                    Ok(Property::Value(Value::str(fn_name)))
                }
                "call" | "apply" | "bind" => Ok(native_method(value, name, function_method(name))),
                _ => Ok(Property::Missing),
            }
        }
        Value::Undefined | Value::Null => Err(throw_type_error(format!(
            "Cannot read properties of {} (reading '{name}')",
            to_display_string(value)
        ))),
        _ => Ok(Property::Missing),
    }
}

fn native_method(
    receiver: &Value,
    name: &str,
    f: Option<fn(&NativeCtx<'_>, &Value, Vec<Value>) -> RtResult<Value>>,
) -> Property {
    match f {
        Some(f) => Property::Value(Value::NativeMethod(Rc::new(NativeMethod {
            name: name.to_string(),
            receiver: receiver.clone(),
            f,
        }))),
        None => Property::Missing,
    }
}

/// Result of a property write.
pub enum SetOutcome {
    Done,
    /// A setter callable; the caller invokes it with the receiver bound.
    Setter(Value),
}

/// `obj.name = value`. Frozen receivers silently ignore the write in
/// non-strict mode and raise `TypeError` in strict mode.
pub fn set_property(target: &Value, name: &str, value: Value, strict: bool) -> RtResult<SetOutcome> {
    match target {
        Value::Object(obj) => {
            if obj.frozen.get() || (obj.sealed.get() && !obj.props.borrow().contains_key(name)) {
                if strict {
                    return Err(throw_type_error(format!(
                        "Cannot assign to read only property '{name}' of object"
                    )));
                }
                return Ok(SetOutcome::Done);
            }
            obj.props.borrow_mut().insert(name.to_string(), value);
            Ok(SetOutcome::Done)
        }
        Value::Instance(inst) => {
            if let Some(setter) = inst.class.find_setter(name) {
                return Ok(SetOutcome::Setter(setter));
            }
            if inst.frozen.get() {
                if strict {
                    return Err(throw_type_error(format!(
                        "Cannot assign to read only property '{name}' of object"
                    )));
                }
                return Ok(SetOutcome::Done);
            }
            inst.fields.borrow_mut().insert(name.to_string(), value);
            Ok(SetOutcome::Done)
        }
        Value::Class(class) => {
            class.static_props.borrow_mut().insert(name.to_string(), value);
            Ok(SetOutcome::Done)
        }
        Value::Array(items) => {
            if name == "length" {
                let len = to_number(&value).max(0.0) as usize;
                items.borrow_mut().resize(len, Value::Undefined);
                return Ok(SetOutcome::Done);
            }
            Err(throw_type_error(format!("Cannot set property '{name}' on array")))
        }
        Value::Regex(regex) => {
            if name == "lastIndex" {
                regex.last_index.set(to_number(&value).max(0.0) as usize);
                return Ok(SetOutcome::Done);
            }
            Ok(SetOutcome::Done)
        }
        Value::Undefined | Value::Null => Err(throw_type_error(format!(
            "Cannot set properties of {} (setting '{name}')",
            to_display_string(target)
        ))),
        _ => {
            if strict {
                return Err(throw_type_error(format!(
                    "Cannot create property '{name}' on {}",
                    crate::ops::type_of(target)
                )));
            }
            Ok(SetOutcome::Done)
        }
    }
}

/// Symbol-keyed property write (object literals with computed symbol keys).
pub fn set_symbol_property(target: &Value, symbol: &Rc<SymbolData>, value: Value) -> RtResult<()> {
    match target {
        Value::Object(obj) => {
            obj.symbols.borrow_mut().insert(symbol.id, value);
            Ok(())
        }
        _ => Err(throw_type_error("Cannot define a symbol property here")),
    }
}

pub fn get_symbol_property(target: &Value, symbol_id: u64) -> Option<Value> {
    match target {
        Value::Object(obj) => obj.symbols.borrow().get(&symbol_id).cloned(),
        _ => None,
    }
}

/// `obj[index]` — arrays by position, strings by character, objects and
/// instances by stringified key.
pub fn get_index(target: &Value, index: &Value) -> RtResult<Value> {
    match target {
        Value::Array(items) => {
            let n = to_number(index);
            let items = items.borrow();
            if n.fract() != 0.0 || n < 0.0 {
                return Ok(Value::Undefined);
            }
            Ok(items.get(n as usize).cloned().unwrap_or_default())
        }
        Value::Str(s) => {
            let n = to_number(index);
            if n.fract() != 0.0 || n < 0.0 {
                return Ok(Value::Undefined);
            }
            Ok(s.chars()
                .nth(n as usize)
                .map(|c| Value::str(c.to_string()))
                .unwrap_or_default())
        }
        Value::Object(_) | Value::Instance(_) | Value::Class(_) => {
            if let Value::Symbol(sym) = index {
                return Ok(get_symbol_property(target, sym.id).unwrap_or_default());
            }
            let key = to_display_string(index);
            match get_property(target, &key)? {
                Property::Value(v) => Ok(v),
                Property::Getter(getter) => Ok(getter),
                Property::Missing => Ok(Value::Undefined),
            }
        }
        Value::Map(entries) => Ok(entries
            .borrow()
            .get(&ValueKey(index.clone()))
            .cloned()
            .unwrap_or_default()),
        Value::Undefined | Value::Null => Err(throw_type_error(format!(
            "Cannot read properties of {}",
            to_display_string(target)
        ))),
        _ => Ok(Value::Undefined),
    }
}

pub fn set_index(target: &Value, index: &Value, value: Value, strict: bool) -> RtResult<()> {
    match target {
        Value::Array(items) => {
            let n = to_number(index);
            if n.fract() != 0.0 || n < 0.0 {
                return Err(throw_range_error("Invalid array index"));
            }
            let idx = n as usize;
            let mut items = items.borrow_mut();
            if idx >= items.len() {
                items.resize(idx + 1, Value::Undefined);
            }
            items[idx] = value;
            Ok(())
        }
        Value::Object(_) | Value::Instance(_) | Value::Class(_) => {
            if let Value::Symbol(sym) = index {
                return set_symbol_property(target, sym, value);
            }
            let key = to_display_string(index);
            match set_property(target, &key, value, strict)? {
                SetOutcome::Done => Ok(()),
                SetOutcome::Setter(_) => Ok(()),
            }
        }
        Value::Map(entries) => {
            entries.borrow_mut().insert(ValueKey(index.clone()), value);
            Ok(())
        }
        Value::Undefined | Value::Null => Err(throw_type_error(format!(
            "Cannot set properties of {}",
            to_display_string(target)
        ))),
        _ => Err(throw_type_error("Cannot index this value")),
    }
}

// =============================================================================
// Iteration protocol
// =============================================================================

/// What a `for-of` loop drives.
pub enum IterSource {
    /// Snapshot of a well-known iterable.
    Values(Vec<Value>),
    Generator(Rc<GeneratorObject>),
    /// An iterator-factory callable (from `Symbol.iterator` /
    /// `Symbol.asyncIterator`); call it to get the iterator object.
    Factory(Value),
    /// An object already exposing `next()`.
    IteratorObject(Value),
}

/// Resolve the iteration source for a value. Order: the async-iterator
/// method when `want_async`, then the sync iterator method, then the
/// well-known iterables (arrays, maps as `[k, v]` pairs, sets, strings,
/// generators, iterator-shaped objects).
pub fn iter_source(value: &Value, want_async: bool) -> RtResult<IterSource> {
    if want_async {
        if let Some(factory) = get_symbol_property(value, well_known::ASYNC_ITERATOR) {
            return Ok(IterSource::Factory(factory));
        }
    }
    if let Some(factory) = get_symbol_property(value, well_known::ITERATOR) {
        return Ok(IterSource::Factory(factory));
    }
    match value {
        Value::Array(items) => Ok(IterSource::Values(items.borrow().clone())),
        Value::Str(s) => Ok(IterSource::Values(
            s.chars().map(|c| Value::str(c.to_string())).collect(),
        )),
        Value::Map(entries) => Ok(IterSource::Values(
            entries
                .borrow()
                .iter()
                .map(|(k, v)| Value::array(vec![k.0.clone(), v.clone()]))
                .collect(),
        )),
        Value::Set(entries) => Ok(IterSource::Values(
            entries.borrow().iter().map(|k| k.0.clone()).collect(),
        )),
        Value::Generator(generator) => Ok(IterSource::Generator(Rc::clone(generator))),
        Value::Object(obj) => {
            let next = obj.props.borrow().get("next").cloned();
            match next {
                Some(next) if next.is_callable() => Ok(IterSource::IteratorObject(value.clone())),
                _ => Err(throw_type_error(format!(
                    "{} is not iterable",
                    to_display_string(value)
                ))),
            }
        }
        _ => Err(throw_type_error(format!(
            "{} is not iterable",
            to_display_string(value)
        ))),
    }
}

/// `for-in` keys: object properties, instance fields, array indices, in
/// insertion order.
pub fn enumerate_keys(value: &Value) -> Vec<String> {
    match value {
        Value::Object(obj) => obj.props.borrow().keys().cloned().collect(),
        Value::Instance(inst) => inst.fields.borrow().keys().cloned().collect(),
        Value::Array(items) => (0..items.borrow().len()).map(|i| i.to_string()).collect(),
        Value::Str(s) => (0..s.chars().count()).map(|i| i.to_string()).collect(),
        _ => Vec::new(),
    }
}

/// Materialize `{ value, done }`.
pub fn iterator_result(value: Value, done: bool) -> Value {
    let mut props = IndexMap::new();
    props.insert("value".to_string(), value);
    props.insert("done".to_string(), Value::Bool(done));
    Value::object(props)
}

/// Read `{ value, done }` off an iterator-protocol result.
pub fn read_iterator_result(result: &Value) -> RtResult<(Value, bool)> {
    match result {
        Value::Object(obj) => {
            let props = obj.props.borrow();
            let value = props.get("value").cloned().unwrap_or_default();
            let done = props.get("done").map(truthy).unwrap_or(false);
            Ok((value, done))
        }
        _ => Err(throw_type_error("Iterator result is not an object")),
    }
}

// =============================================================================
// Native instance methods
// =============================================================================

type MethodFn = fn(&NativeCtx<'_>, &Value, Vec<Value>) -> RtResult<Value>;

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

fn as_array(receiver: &Value) -> Rc<std::cell::RefCell<Vec<Value>>> {
    match receiver {
        Value::Array(items) => Rc::clone(items),
        _ => unreachable!("array method on non-array receiver"),
    }
}

fn normalize_index(len: usize, raw: f64) -> usize {
    if raw.is_nan() {
        return 0;
    }
    if raw < 0.0 {
        let back = (-raw) as usize;
        len.saturating_sub(back)
    } else {
        (raw as usize).min(len)
    }
}

fn string_method(name: &str) -> Option<MethodFn> {
    Some(match name {
        "charAt" => |_, recv, args| {
            let s = recv.as_str().unwrap_or_default();
            let i = to_number(&arg(&args, 0)) as usize;
            Ok(Value::str(s.chars().nth(i).map(|c| c.to_string()).unwrap_or_default()))
        },
        "charCodeAt" => |_, recv, args| {
            let s = recv.as_str().unwrap_or_default();
            let i = to_number(&arg(&args, 0)) as usize;
            Ok(match s.chars().nth(i) {
                Some(c) => Value::Number(c as u32 as f64),
                None => Value::Number(f64::NAN),
            })
        },
        "codePointAt" => |_, recv, args| {
            let s = recv.as_str().unwrap_or_default();
            let i = to_number(&arg(&args, 0)) as usize;
            Ok(match s.chars().nth(i) {
                Some(c) => Value::Number(c as u32 as f64),
                None => Value::Undefined,
            })
        },
        "at" => |_, recv, args| {
            let s: Vec<char> = recv.as_str().unwrap_or_default().chars().collect();
            let n = to_number(&arg(&args, 0));
            let idx = if n < 0.0 { s.len() as f64 + n } else { n };
            if idx < 0.0 || idx >= s.len() as f64 {
                return Ok(Value::Undefined);
            }
            Ok(Value::str(s[idx as usize].to_string()))
        },
        "indexOf" => |_, recv, args| {
            let s = recv.as_str().unwrap_or_default();
            let needle = to_display_string(&arg(&args, 0));
            Ok(Value::Number(match s.find(&needle) {
                Some(byte_pos) => s[..byte_pos].chars().count() as f64,
                None => -1.0,
            }))
        },
        "lastIndexOf" => |_, recv, args| {
            let s = recv.as_str().unwrap_or_default();
            let needle = to_display_string(&arg(&args, 0));
            Ok(Value::Number(match s.rfind(&needle) {
                Some(byte_pos) => s[..byte_pos].chars().count() as f64,
                None => -1.0,
            }))
        },
        "includes" => |_, recv, args| {
            let s = recv.as_str().unwrap_or_default();
            Ok(Value::Bool(s.contains(&to_display_string(&arg(&args, 0)))))
        },
        "startsWith" => |_, recv, args| {
            let s = recv.as_str().unwrap_or_default();
            Ok(Value::Bool(s.starts_with(&to_display_string(&arg(&args, 0)))))
        },
        "endsWith" => |_, recv, args| {
            let s = recv.as_str().unwrap_or_default();
            Ok(Value::Bool(s.ends_with(&to_display_string(&arg(&args, 0)))))
        },
        "slice" | "substring" => |_, recv, args| {
            let chars: Vec<char> = recv.as_str().unwrap_or_default().chars().collect();
            let len = chars.len();
            let start = normalize_index(len, to_number(&arg(&args, 0)));
            let end = match args.get(1) {
                Some(Value::Undefined) | None => len,
                Some(v) => normalize_index(len, to_number(v)),
            };
            let (start, end) = if start <= end { (start, end) } else { (end, start) };
            Ok(Value::str(chars[start..end].iter().collect::<String>()))
        },
        "toUpperCase" => |_, recv, _| {
            Ok(Value::str(recv.as_str().unwrap_or_default().to_uppercase()))
        },
        "toLowerCase" => |_, recv, _| {
            Ok(Value::str(recv.as_str().unwrap_or_default().to_lowercase()))
        },
        "trim" => |_, recv, _| Ok(Value::str(recv.as_str().unwrap_or_default().trim())),
        "trimStart" => |_, recv, _| Ok(Value::str(recv.as_str().unwrap_or_default().trim_start())),
        "trimEnd" => |_, recv, _| Ok(Value::str(recv.as_str().unwrap_or_default().trim_end())),
        "split" => |_, recv, args| {
            let s = recv.as_str().unwrap_or_default();
            match &arg(&args, 0) {
                Value::Undefined => Ok(Value::array(vec![Value::str(s)])),
                sep => {
                    let sep = to_display_string(sep);
                    let parts: Vec<Value> = if sep.is_empty() {
                        s.chars().map(|c| Value::str(c.to_string())).collect()
                    } else {
                        s.split(&sep).map(Value::str).collect()
                    };
                    Ok(Value::array(parts))
                }
            }
        },
        "repeat" => |_, recv, args| {
            let n = to_number(&arg(&args, 0));
            if n < 0.0 {
                return Err(throw_range_error("Invalid count value"));
            }
            Ok(Value::str(recv.as_str().unwrap_or_default().repeat(n as usize)))
        },
        "padStart" => |_, recv, args| {
            let s = recv.as_str().unwrap_or_default();
            let target = to_number(&arg(&args, 0)) as usize;
            let pad = match &arg(&args, 1) {
                Value::Undefined => " ".to_string(),
                v => to_display_string(v),
            };
            Ok(Value::str(pad_string(s, target, &pad, true)))
        },
        "padEnd" => |_, recv, args| {
            let s = recv.as_str().unwrap_or_default();
            let target = to_number(&arg(&args, 0)) as usize;
            let pad = match &arg(&args, 1) {
                Value::Undefined => " ".to_string(),
                v => to_display_string(v),
            };
            Ok(Value::str(pad_string(s, target, &pad, false)))
        },
        "replace" => |_, recv, args| {
            let s = recv.as_str().unwrap_or_default();
            let replacement = to_display_string(&arg(&args, 1));
            match &arg(&args, 0) {
                Value::Regex(regex) => {
                    if regex.flags.contains('g') {
                        Ok(Value::str(regex.compiled.replace_all(s, replacement.as_str()).to_string()))
                    } else {
                        Ok(Value::str(regex.compiled.replace(s, replacement.as_str()).to_string()))
                    }
                }
                pattern => {
                    let pattern = to_display_string(pattern);
                    Ok(Value::str(s.replacen(&pattern, &replacement, 1)))
                }
            }
        },
        "replaceAll" => |_, recv, args| {
            let s = recv.as_str().unwrap_or_default();
            let pattern = to_display_string(&arg(&args, 0));
            let replacement = to_display_string(&arg(&args, 1));
            Ok(Value::str(s.replace(&pattern, &replacement)))
        },
        "concat" => |_, recv, args| {
            let mut s = recv.as_str().unwrap_or_default().to_string();
            for a in &args {
                s.push_str(&to_display_string(a));
            }
            Ok(Value::str(s))
        },
        "localeCompare" => |_, recv, args| {
            let a = recv.as_str().unwrap_or_default();
            let b = to_display_string(&arg(&args, 0));
            Ok(Value::Number(match a.cmp(b.as_str()) {
                std::cmp::Ordering::Less => -1.0,
                std::cmp::Ordering::Equal => 0.0,
                std::cmp::Ordering::Greater => 1.0,
            }))
        },
        "match" => |_, recv, args| {
            let s = recv.as_str().unwrap_or_default();
            match &arg(&args, 0) {
                Value::Regex(regex) => match regex.compiled.find(s) {
                    Some(m) => Ok(Value::array(vec![Value::str(m.as_str())])),
                    None => Ok(Value::Null),
                },
                _ => Ok(Value::Null),
            }
        },
        "toString" | "valueOf" => |_, recv, _| Ok(recv.clone()),
        _ => return None,
    })
}

fn pad_string(s: &str, target: usize, pad: &str, at_start: bool) -> String {
    let len = s.chars().count();
    if len >= target || pad.is_empty() {
        return s.to_string();
    }
    let mut fill = String::new();
    while fill.chars().count() < target - len {
        fill.push_str(pad);
    }
    let fill: String = fill.chars().take(target - len).collect();
    if at_start {
        format!("{fill}{s}")
    } else {
        format!("{s}{fill}")
    }
}

fn array_method(name: &str) -> Option<MethodFn> {
    Some(match name {
        "push" => |_, recv, args| {
            let items = as_array(recv);
            items.borrow_mut().extend(args);
            Ok(Value::Number(items.borrow().len() as f64))
        },
        "pop" => |_, recv, _| Ok(as_array(recv).borrow_mut().pop().unwrap_or_default()),
        "shift" => |_, recv, _| {
            let items = as_array(recv);
            let mut items = items.borrow_mut();
            if items.is_empty() {
                Ok(Value::Undefined)
            } else {
                Ok(items.remove(0))
            }
        },
        "unshift" => |_, recv, args| {
            let items = as_array(recv);
            let mut items = items.borrow_mut();
            for (i, v) in args.into_iter().enumerate() {
                items.insert(i, v);
            }
            Ok(Value::Number(items.len() as f64))
        },
        "at" => |_, recv, args| {
            let items = as_array(recv);
            let items = items.borrow();
            let n = to_number(&arg(&args, 0));
            let idx = if n < 0.0 { items.len() as f64 + n } else { n };
            if idx < 0.0 || idx >= items.len() as f64 {
                return Ok(Value::Undefined);
            }
            Ok(items[idx as usize].clone())
        },
        "slice" => |_, recv, args| {
            let items = as_array(recv);
            let items = items.borrow();
            let len = items.len();
            let start = match args.first() {
                None | Some(Value::Undefined) => 0,
                Some(v) => normalize_index(len, to_number(v)),
            };
            let end = match args.get(1) {
                None | Some(Value::Undefined) => len,
                Some(v) => normalize_index(len, to_number(v)),
            };
            if start >= end {
                return Ok(Value::array(Vec::new()));
            }
            Ok(Value::array(items[start..end].to_vec()))
        },
        "splice" => |_, recv, args| {
            let items = as_array(recv);
            let mut items = items.borrow_mut();
            let len = items.len();
            let start = normalize_index(len, to_number(&arg(&args, 0)));
            let delete_count = match args.get(1) {
                None | Some(Value::Undefined) => len - start,
                Some(v) => (to_number(v).max(0.0) as usize).min(len - start),
            };
            let removed: Vec<Value> = items.splice(start..start + delete_count, args.into_iter().skip(2)).collect();
            Ok(Value::array(removed))
        },
        "concat" => |_, recv, args| {
            let items = as_array(recv);
            let mut out = items.borrow().clone();
            for a in args {
                match a {
                    Value::Array(more) => out.extend(more.borrow().iter().cloned()),
                    other => out.push(other),
                }
            }
            Ok(Value::array(out))
        },
        "join" => |_, recv, args| {
            let items = as_array(recv);
            let sep = match &arg(&args, 0) {
                Value::Undefined => ",".to_string(),
                v => to_display_string(v),
            };
            let parts: Vec<String> = items
                .borrow()
                .iter()
                .map(|v| match v {
                    Value::Undefined | Value::Null => String::new(),
                    other => to_display_string(other),
                })
                .collect();
            Ok(Value::str(parts.join(&sep)))
        },
        "indexOf" => |_, recv, args| {
            let items = as_array(recv);
            let needle = arg(&args, 0);
            let pos = items
                .borrow()
                .iter()
                .position(|v| crate::ops::strict_equals(v, &needle));
            Ok(Value::Number(pos.map(|p| p as f64).unwrap_or(-1.0)))
        },
        "lastIndexOf" => |_, recv, args| {
            let items = as_array(recv);
            let needle = arg(&args, 0);
            let pos = items
                .borrow()
                .iter()
                .rposition(|v| crate::ops::strict_equals(v, &needle));
            Ok(Value::Number(pos.map(|p| p as f64).unwrap_or(-1.0)))
        },
        "includes" => |_, recv, args| {
            let items = as_array(recv);
            let needle = arg(&args, 0);
            Ok(Value::Bool(items.borrow().iter().any(|v| {
                ValueKey(v.clone()) == ValueKey(needle.clone())
            })))
        },
        "find" => |ctx, recv, args| {
            let items = as_array(recv);
            let predicate = arg(&args, 0);
            let snapshot = items.borrow().clone();
            for (i, v) in snapshot.into_iter().enumerate() {
                let keep = call_sync(
                    ctx.engine,
                    predicate.clone(),
                    Value::Undefined,
                    vec![v.clone(), Value::Number(i as f64), recv.clone()],
                )?;
                if truthy(&keep) {
                    return Ok(v);
                }
            }
            Ok(Value::Undefined)
        },
        "findIndex" => |ctx, recv, args| {
            let items = as_array(recv);
            let predicate = arg(&args, 0);
            let snapshot = items.borrow().clone();
            for (i, v) in snapshot.into_iter().enumerate() {
                let keep = call_sync(
                    ctx.engine,
                    predicate.clone(),
                    Value::Undefined,
                    vec![v, Value::Number(i as f64), recv.clone()],
                )?;
                if truthy(&keep) {
                    return Ok(Value::Number(i as f64));
                }
            }
            Ok(Value::Number(-1.0))
        },
        "filter" => |ctx, recv, args| {
            let items = as_array(recv);
            let predicate = arg(&args, 0);
            let snapshot = items.borrow().clone();
            let mut out = Vec::new();
            for (i, v) in snapshot.into_iter().enumerate() {
                let keep = call_sync(
                    ctx.engine,
                    predicate.clone(),
                    Value::Undefined,
                    vec![v.clone(), Value::Number(i as f64), recv.clone()],
                )?;
                if truthy(&keep) {
                    out.push(v);
                }
            }
            Ok(Value::array(out))
        },
        "map" => |ctx, recv, args| {
            let items = as_array(recv);
            let mapper = arg(&args, 0);
            let snapshot = items.borrow().clone();
            let mut out = Vec::with_capacity(snapshot.len());
            for (i, v) in snapshot.into_iter().enumerate() {
                out.push(call_sync(
                    ctx.engine,
                    mapper.clone(),
                    Value::Undefined,
                    vec![v, Value::Number(i as f64), recv.clone()],
                )?);
            }
            Ok(Value::array(out))
        },
        "forEach" => |ctx, recv, args| {
            let items = as_array(recv);
            let callback = arg(&args, 0);
            let snapshot = items.borrow().clone();
            for (i, v) in snapshot.into_iter().enumerate() {
                call_sync(
                    ctx.engine,
                    callback.clone(),
                    Value::Undefined,
                    vec![v, Value::Number(i as f64), recv.clone()],
                )?;
            }
            Ok(Value::Undefined)
        },
        "reduce" => |ctx, recv, args| {
            let items = as_array(recv);
            let reducer = arg(&args, 0);
            let snapshot = items.borrow().clone();
            let mut iter = snapshot.into_iter().enumerate();
            let mut acc = match args.get(1) {
                Some(initial) => initial.clone(),
                None => match iter.next() {
                    Some((_, first)) => first,
                    None => {
                        return Err(throw_type_error("Reduce of empty array with no initial value"));
                    }
                },
            };
            for (i, v) in iter {
                acc = call_sync(
                    ctx.engine,
                    reducer.clone(),
                    Value::Undefined,
                    vec![acc, v, Value::Number(i as f64), recv.clone()],
                )?;
            }
            Ok(acc)
        },
        "some" => |ctx, recv, args| {
            let items = as_array(recv);
            let predicate = arg(&args, 0);
            let snapshot = items.borrow().clone();
            for (i, v) in snapshot.into_iter().enumerate() {
                let keep = call_sync(
                    ctx.engine,
                    predicate.clone(),
                    Value::Undefined,
                    vec![v, Value::Number(i as f64), recv.clone()],
                )?;
                if truthy(&keep) {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        },
        "every" => |ctx, recv, args| {
            let items = as_array(recv);
            let predicate = arg(&args, 0);
            let snapshot = items.borrow().clone();
            for (i, v) in snapshot.into_iter().enumerate() {
                let keep = call_sync(
                    ctx.engine,
                    predicate.clone(),
                    Value::Undefined,
                    vec![v, Value::Number(i as f64), recv.clone()],
                )?;
                if !truthy(&keep) {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        },
        "reverse" => |_, recv, _| {
            let items = as_array(recv);
            items.borrow_mut().reverse();
            Ok(recv.clone())
        },
        "fill" => |_, recv, args| {
            let items = as_array(recv);
            let value = arg(&args, 0);
            for slot in items.borrow_mut().iter_mut() {
                *slot = value.clone();
            }
            Ok(recv.clone())
        },
        "flat" => |_, recv, _| {
            let items = as_array(recv);
            let mut out = Vec::new();
            for v in items.borrow().iter() {
                match v {
                    Value::Array(inner) => out.extend(inner.borrow().iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Ok(Value::array(out))
        },
        "sort" => |ctx, recv, args| {
            let items = as_array(recv);
            let comparator = arg(&args, 0);
            let mut snapshot = items.borrow().clone();
            let mut error = None;
            snapshot.sort_by(|a, b| {
                if error.is_some() {
                    return std::cmp::Ordering::Equal;
                }
                if comparator.is_callable() {
                    match call_sync(
                        ctx.engine,
                        comparator.clone(),
                        Value::Undefined,
                        vec![a.clone(), b.clone()],
                    ) {
                        Ok(v) => {
                            let n = to_number(&v);
                            if n < 0.0 {
                                std::cmp::Ordering::Less
                            } else if n > 0.0 {
                                std::cmp::Ordering::Greater
                            } else {
                                std::cmp::Ordering::Equal
                            }
                        }
                        Err(e) => {
                            error = Some(e);
                            std::cmp::Ordering::Equal
                        }
                    }
                } else {
                    to_display_string(a).cmp(&to_display_string(b))
                }
            });
            if let Some(e) = error {
                return Err(e);
            }
            *items.borrow_mut() = snapshot;
            Ok(recv.clone())
        },
        "keys" => |_, recv, _| {
            let items = as_array(recv);
            let len = items.borrow().len();
            Ok(make_values_iterator(
                (0..len).map(|i| Value::Number(i as f64)).collect(),
            ))
        },
        "values" => |_, recv, _| {
            let items = as_array(recv);
            let snapshot = items.borrow().clone();
            Ok(make_values_iterator(snapshot))
        },
        "entries" => |_, recv, _| {
            let items = as_array(recv);
            let snapshot: Vec<Value> = items
                .borrow()
                .iter()
                .enumerate()
                .map(|(i, v)| Value::array(vec![Value::Number(i as f64), v.clone()]))
                .collect();
            Ok(make_values_iterator(snapshot))
        },
        "flatMap" => |ctx, recv, args| {
            let items = as_array(recv);
            let mapper = arg(&args, 0);
            let snapshot = items.borrow().clone();
            let mut out = Vec::new();
            for (i, v) in snapshot.into_iter().enumerate() {
                let mapped = call_sync(
                    ctx.engine,
                    mapper.clone(),
                    Value::Undefined,
                    vec![v, Value::Number(i as f64), recv.clone()],
                )?;
                match mapped {
                    Value::Array(inner) => out.extend(inner.borrow().iter().cloned()),
                    other => out.push(other),
                }
            }
            Ok(Value::array(out))
        },
        "toString" => |_, recv, _| Ok(Value::str(to_display_string(recv))),
        _ => return None,
    })
}

/// A finished-on-demand iterator over a snapshot, exposed as a generator
/// object so `for-of` and manual `next()` both work.
pub fn make_values_iterator(values: Vec<Value>) -> Value {
    struct SnapshotIter {
        values: std::cell::RefCell<std::vec::IntoIter<Value>>,
    }
    impl Coroutine for SnapshotIter {
        fn resume(self: Rc<Self>, _input: GenResume) -> crate::LocalBoxFuture<'static, RtResult<GenStep>> {
            let next = self.values.borrow_mut().next();
            Box::pin(async move {
                Ok(match next {
                    Some(v) => GenStep::Yield(v),
                    None => GenStep::Done(Value::Undefined),
                })
            })
        }
    }
    Value::Generator(Rc::new(GeneratorObject {
        co: Rc::new(SnapshotIter { values: std::cell::RefCell::new(values.into_iter()) }),
        is_async: false,
        done: Cell::new(false),
    }))
}

fn number_method(name: &str) -> Option<MethodFn> {
    Some(match name {
        "toFixed" => |_, recv, args| {
            let n = recv.as_number().unwrap_or(f64::NAN);
            let digits = to_number(&arg(&args, 0)).max(0.0) as usize;
            Ok(Value::str(format!("{n:.digits$}")))
        },
        "toString" => |_, recv, args| {
            let n = recv.as_number().unwrap_or(f64::NAN);
            match args.first() {
                None | Some(Value::Undefined) => Ok(Value::str(number_to_string(n))),
                Some(radix) => {
                    let radix = to_number(radix) as u32;
                    if !(2..=36).contains(&radix) {
                        return Err(throw_range_error("toString() radix must be between 2 and 36"));
                    }
                    Ok(Value::str(format_radix(n as i64, radix)))
                }
            }
        },
        "valueOf" => |_, recv, _| Ok(recv.clone()),
        _ => return None,
    })
}

fn format_radix(mut n: i64, radix: u32) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let negative = n < 0;
    n = n.abs();
    let digits = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::new();
    while n > 0 {
        out.push(digits[(n % radix as i64) as usize]);
        n /= radix as i64;
    }
    if negative {
        out.push(b'-');
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn bigint_method(name: &str) -> Option<MethodFn> {
    Some(match name {
        "toString" => |_, recv, _| Ok(Value::str(to_display_string(recv))),
        "valueOf" => |_, recv, _| Ok(recv.clone()),
        _ => return None,
    })
}

fn as_map(receiver: &Value) -> Rc<std::cell::RefCell<IndexMap<ValueKey, Value>>> {
    match receiver {
        Value::Map(entries) => Rc::clone(entries),
        _ => unreachable!("map method on non-map receiver"),
    }
}

fn map_method(name: &str) -> Option<MethodFn> {
    Some(match name {
        "get" => |_, recv, args| {
            Ok(as_map(recv)
                .borrow()
                .get(&ValueKey(arg(&args, 0)))
                .cloned()
                .unwrap_or_default())
        },
        "set" => |_, recv, args| {
            as_map(recv)
                .borrow_mut()
                .insert(ValueKey(arg(&args, 0)), arg(&args, 1));
            Ok(recv.clone())
        },
        "has" => |_, recv, args| {
            Ok(Value::Bool(as_map(recv).borrow().contains_key(&ValueKey(arg(&args, 0)))))
        },
        "delete" => |_, recv, args| {
            Ok(Value::Bool(
                as_map(recv)
                    .borrow_mut()
                    .shift_remove(&ValueKey(arg(&args, 0)))
                    .is_some(),
            ))
        },
        "clear" => |_, recv, _| {
            as_map(recv).borrow_mut().clear();
            Ok(Value::Undefined)
        },
        "keys" => |_, recv, _| {
            let keys: Vec<Value> = as_map(recv).borrow().keys().map(|k| k.0.clone()).collect();
            Ok(make_values_iterator(keys))
        },
        "values" => |_, recv, _| {
            let values: Vec<Value> = as_map(recv).borrow().values().cloned().collect();
            Ok(make_values_iterator(values))
        },
        "entries" => |_, recv, _| {
            let entries: Vec<Value> = as_map(recv)
                .borrow()
                .iter()
                .map(|(k, v)| Value::array(vec![k.0.clone(), v.clone()]))
                .collect();
            Ok(make_values_iterator(entries))
        },
        "forEach" => |ctx, recv, args| {
            let callback = arg(&args, 0);
            let snapshot: Vec<(Value, Value)> = as_map(recv)
                .borrow()
                .iter()
                .map(|(k, v)| (k.0.clone(), v.clone()))
                .collect();
            for (k, v) in snapshot {
                call_sync(
                    ctx.engine,
                    callback.clone(),
                    Value::Undefined,
                    vec![v, k, recv.clone()],
                )?;
            }
            Ok(Value::Undefined)
        },
        _ => return None,
    })
}

fn as_set(receiver: &Value) -> Rc<std::cell::RefCell<indexmap::IndexSet<ValueKey>>> {
    match receiver {
        Value::Set(entries) => Rc::clone(entries),
        _ => unreachable!("set method on non-set receiver"),
    }
}

fn set_method(name: &str) -> Option<MethodFn> {
    Some(match name {
        "add" => |_, recv, args| {
            as_set(recv).borrow_mut().insert(ValueKey(arg(&args, 0)));
            Ok(recv.clone())
        },
        "has" => |_, recv, args| {
            Ok(Value::Bool(as_set(recv).borrow().contains(&ValueKey(arg(&args, 0)))))
        },
        "delete" => |_, recv, args| {
            Ok(Value::Bool(as_set(recv).borrow_mut().shift_remove(&ValueKey(arg(&args, 0)))))
        },
        "clear" => |_, recv, _| {
            as_set(recv).borrow_mut().clear();
            Ok(Value::Undefined)
        },
        "union" => |_, recv, args| {
            let other = require_set(&arg(&args, 0))?;
            let mut out = as_set(recv).borrow().clone();
            for k in other.borrow().iter() {
                out.insert(k.clone());
            }
            Ok(Value::Set(Rc::new(std::cell::RefCell::new(out))))
        },
        "intersection" => |_, recv, args| {
            let other = require_set(&arg(&args, 0))?;
            let other = other.borrow();
            let out: indexmap::IndexSet<ValueKey> = as_set(recv)
                .borrow()
                .iter()
                .filter(|k| other.contains(*k))
                .cloned()
                .collect();
            Ok(Value::Set(Rc::new(std::cell::RefCell::new(out))))
        },
        "difference" => |_, recv, args| {
            let other = require_set(&arg(&args, 0))?;
            let other = other.borrow();
            let out: indexmap::IndexSet<ValueKey> = as_set(recv)
                .borrow()
                .iter()
                .filter(|k| !other.contains(*k))
                .cloned()
                .collect();
            Ok(Value::Set(Rc::new(std::cell::RefCell::new(out))))
        },
        "symmetricDifference" => |_, recv, args| {
            let other = require_set(&arg(&args, 0))?;
            let this = as_set(recv);
            let this = this.borrow();
            let other = other.borrow();
            let mut out: indexmap::IndexSet<ValueKey> =
                this.iter().filter(|k| !other.contains(*k)).cloned().collect();
            out.extend(other.iter().filter(|k| !this.contains(*k)).cloned());
            Ok(Value::Set(Rc::new(std::cell::RefCell::new(out))))
        },
        "isSubsetOf" => |_, recv, args| {
            let other = require_set(&arg(&args, 0))?;
            let other = other.borrow();
            Ok(Value::Bool(as_set(recv).borrow().iter().all(|k| other.contains(k))))
        },
        "isSupersetOf" => |_, recv, args| {
            let other = require_set(&arg(&args, 0))?;
            let this = as_set(recv);
            let this = this.borrow();
            Ok(Value::Bool(other.borrow().iter().all(|k| this.contains(k))))
        },
        "isDisjointFrom" => |_, recv, args| {
            let other = require_set(&arg(&args, 0))?;
            let other = other.borrow();
            Ok(Value::Bool(!as_set(recv).borrow().iter().any(|k| other.contains(k))))
        },
        "keys" | "values" => |_, recv, _| {
            let values: Vec<Value> = as_set(recv).borrow().iter().map(|k| k.0.clone()).collect();
            Ok(make_values_iterator(values))
        },
        "entries" => |_, recv, _| {
            let entries: Vec<Value> = as_set(recv)
                .borrow()
                .iter()
                .map(|k| Value::array(vec![k.0.clone(), k.0.clone()]))
                .collect();
            Ok(make_values_iterator(entries))
        },
        "forEach" => |ctx, recv, args| {
            let callback = arg(&args, 0);
            let snapshot: Vec<Value> = as_set(recv).borrow().iter().map(|k| k.0.clone()).collect();
            for v in snapshot {
                call_sync(
                    ctx.engine,
                    callback.clone(),
                    Value::Undefined,
                    vec![v.clone(), v, recv.clone()],
                )?;
            }
            Ok(Value::Undefined)
        },
        _ => return None,
    })
}

fn require_set(value: &Value) -> RtResult<Rc<std::cell::RefCell<indexmap::IndexSet<ValueKey>>>> {
    match value {
        Value::Set(entries) => Ok(Rc::clone(entries)),
        _ => Err(throw_type_error("Expected a Set")),
    }
}

fn promise_method(name: &str) -> Option<MethodFn> {
    Some(match name {
        "then" => |ctx, recv, args| {
            let Value::Promise(promise) = recv else { unreachable!() };
            let scheduler = ctx.engine.scheduler();
            let derived = PromiseData::new();
            let on_fulfilled = Some(arg(&args, 0)).filter(Value::is_callable);
            let on_rejected = Some(arg(&args, 1)).filter(Value::is_callable);
            scheduler.subscribe(
                promise,
                Reaction::CallUser { on_fulfilled, on_rejected, derived: Rc::clone(&derived) },
            );
            Ok(Value::Promise(derived))
        },
        "catch" => |ctx, recv, args| {
            let Value::Promise(promise) = recv else { unreachable!() };
            let scheduler = ctx.engine.scheduler();
            let derived = PromiseData::new();
            let on_rejected = Some(arg(&args, 0)).filter(Value::is_callable);
            scheduler.subscribe(
                promise,
                Reaction::CallUser { on_fulfilled: None, on_rejected, derived: Rc::clone(&derived) },
            );
            Ok(Value::Promise(derived))
        },
        "finally" => |ctx, recv, args| {
            let Value::Promise(promise) = recv else { unreachable!() };
            let scheduler = ctx.engine.scheduler();
            let callback = Some(arg(&args, 0)).filter(Value::is_callable);
            // The callback runs on either path; its result is discarded and
            // the settlement passes through to the derived promise.
            scheduler.subscribe(
                promise,
                Reaction::CallUser {
                    on_fulfilled: callback.clone(),
                    on_rejected: callback,
                    derived: PromiseData::new(),
                },
            );
            let derived = PromiseData::new();
            scheduler.subscribe(promise, Reaction::Chain(Rc::clone(&derived)));
            Ok(Value::Promise(derived))
        },
        _ => return None,
    })
}

fn generator_method(name: &str) -> Option<MethodFn> {
    Some(match name {
        "next" => |ctx, recv, args| generator_resume(ctx, recv, GenResume::Next(arg(&args, 0))),
        "return" => |ctx, recv, args| generator_resume(ctx, recv, GenResume::Return(arg(&args, 0))),
        "throw" => |ctx, recv, args| generator_resume(ctx, recv, GenResume::Throw(arg(&args, 0))),
        _ => return None,
    })
}

/// Drive a generator one step. Sync generators complete immediately; async
/// generators return a promise resolved when the step completes.
fn generator_resume(ctx: &NativeCtx<'_>, recv: &Value, input: GenResume) -> RtResult<Value> {
    let Value::Generator(generator) = recv else { unreachable!() };

    // Finished generators are no-ops yielding `{done: true}`.
    if generator.done.get() {
        let result = iterator_result(Value::Undefined, true);
        return Ok(if generator.is_async {
            Value::Promise(PromiseData::fulfilled(result))
        } else {
            result
        });
    }
    if let GenResume::Return(value) = &input {
        generator.done.set(true);
        let result = iterator_result(value.clone(), true);
        return Ok(if generator.is_async {
            Value::Promise(PromiseData::fulfilled(result))
        } else {
            result
        });
    }

    let mut future = Rc::clone(&generator.co).resume(input);
    if generator.is_async {
        let scheduler = ctx.engine.scheduler();
        let promise = PromiseData::new();
        let generator = Rc::clone(generator);
        let promise_for_task = Rc::clone(&promise);
        let scheduler_for_task = Rc::clone(&scheduler);
        scheduler.spawn(Box::pin(async move {
            match future.await {
                Ok(GenStep::Yield(value)) => {
                    scheduler_for_task.settle(&promise_for_task, iterator_result(value, false), false);
                }
                Ok(GenStep::Done(value)) => {
                    generator.done.set(true);
                    scheduler_for_task.settle(&promise_for_task, iterator_result(value, true), false);
                }
                Err(error) => {
                    generator.done.set(true);
                    scheduler_for_task.settle(&promise_for_task, error, true);
                }
            }
        }));
        return Ok(Value::Promise(promise));
    }

    let mut cx = Context::from_waker(Waker::noop());
    match future.as_mut().poll(&mut cx) {
        Poll::Ready(Ok(GenStep::Yield(value))) => Ok(iterator_result(value, false)),
        Poll::Ready(Ok(GenStep::Done(value))) => {
            generator.done.set(true);
            Ok(iterator_result(value, true))
        }
        Poll::Ready(Err(error)) => {
            generator.done.set(true);
            Err(error)
        }
        Poll::Pending => Err(throw_type_error("generator suspended outside a yield")),
    }
}

fn date_method(name: &str) -> Option<MethodFn> {
    fn millis(recv: &Value) -> f64 {
        match recv {
            Value::Date(ms) => ms.get(),
            _ => f64::NAN,
        }
    }
    Some(match name {
        "getTime" | "valueOf" => |_, recv, _| Ok(Value::Number(millis(recv))),
        "getFullYear" => |_, recv, _| {
            let days = (millis(recv) / 86_400_000.0).floor();
            Ok(Value::Number(1970.0 + (days / 365.2425).floor()))
        },
        "toISOString" => |_, recv, _| {
            let ms = millis(recv);
            Ok(Value::str(format!("@{ms}")))
        },
        "toString" => |_, recv, _| Ok(Value::str(to_display_string(recv))),
        _ => return None,
    })
}

fn regex_method(name: &str) -> Option<MethodFn> {
    Some(match name {
        "test" => |_, recv, args| {
            let Value::Regex(regex) = recv else { unreachable!() };
            let input = to_display_string(&arg(&args, 0));
            Ok(Value::Bool(regex.compiled.is_match(&input)))
        },
        "exec" => |_, recv, args| {
            let Value::Regex(regex) = recv else { unreachable!() };
            let input = to_display_string(&arg(&args, 0));
            match regex.compiled.captures(&input) {
                Some(captures) => {
                    let groups: Vec<Value> = captures
                        .iter()
                        .map(|m| match m {
                            Some(m) => Value::str(m.as_str()),
                            None => Value::Undefined,
                        })
                        .collect();
                    Ok(Value::array(groups))
                }
                None => Ok(Value::Null),
            }
        },
        "toString" => |_, recv, _| Ok(Value::str(to_display_string(recv))),
        _ => return None,
    })
}

fn function_method(name: &str) -> Option<MethodFn> {
    Some(match name {
        "call" => |ctx, recv, mut args| {
            let callee = bound_target(recv);
            let this = if args.is_empty() { Value::Undefined } else { args.remove(0) };
            call_sync(ctx.engine, callee, this, args)
        },
        "apply" => |ctx, recv, args| {
            let callee = bound_target(recv);
            let this = arg(&args, 0);
            let call_args = match &arg(&args, 1) {
                Value::Array(items) => items.borrow().clone(),
                Value::Undefined => Vec::new(),
                _ => return Err(throw_type_error("apply() arguments must be an array")),
            };
            call_sync(ctx.engine, callee, this, call_args)
        },
        "bind" => |_, recv, mut args| {
            let callee = bound_target(recv);
            let this = if args.is_empty() { Value::Undefined } else { args.remove(0) };
            Ok(Value::Bound(Rc::new(BoundMethod { func: callee, receiver: this })))
        },
        _ => return None,
    })
}

fn bound_target(recv: &Value) -> Value {
    match recv {
        Value::NativeMethod(m) => m.receiver.clone(),
        other => other.clone(),
    }
}

/// Resolve a value for `Object.freeze`-style helpers.
pub fn freeze_value(value: &Value) {
    match value {
        Value::Object(obj) => obj.frozen.set(true),
        Value::Instance(inst) => inst.frozen.set(true),
        _ => {}
    }
}

pub fn is_frozen(value: &Value) -> bool {
    match value {
        Value::Object(obj) => obj.frozen.get(),
        Value::Instance(inst) => inst.frozen.get(),
        _ => false,
    }
}

pub fn seal_value(value: &Value) {
    if let Value::Object(obj) = value {
        obj.sealed.set(true);
    }
}

pub fn is_sealed(value: &Value) -> bool {
    match value {
        Value::Object(obj) => obj.sealed.get() || obj.frozen.get(),
        Value::Instance(inst) => inst.frozen.get(),
        _ => false,
    }
}

/// BigInt coercion helper shared by the `BigInt()` constructor.
pub fn to_bigint(value: &Value) -> RtResult<Value> {
    match value {
        Value::BigInt(_) => Ok(value.clone()),
        Value::Number(n) => {
            if n.fract() != 0.0 || !n.is_finite() {
                return Err(throw_range_error("Cannot convert non-integer to BigInt"));
            }
            Ok(Value::BigInt(Rc::new(num_bigint::BigInt::from(*n as i64))))
        }
        Value::Str(s) => match s.trim().parse::<num_bigint::BigInt>() {
            Ok(b) => Ok(Value::BigInt(Rc::new(b))),
            Err(_) => Err(make_error("SyntaxError", "Cannot convert string to BigInt")),
        },
        Value::Bool(b) => Ok(Value::BigInt(Rc::new(num_bigint::BigInt::from(*b as i64)))),
        _ => Err(throw_type_error("Cannot convert value to BigInt")),
    }
}

/// Parse bigint source digits (with optional radix prefix).
pub fn parse_bigint_literal(digits: &str) -> Option<num_bigint::BigInt> {
    let digits = digits.trim_end_matches('n');
    if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        num_bigint::BigInt::parse_bytes(hex.as_bytes(), 16)
    } else if let Some(oct) = digits.strip_prefix("0o").or_else(|| digits.strip_prefix("0O")) {
        num_bigint::BigInt::parse_bytes(oct.as_bytes(), 8)
    } else if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        num_bigint::BigInt::parse_bytes(bin.as_bytes(), 2)
    } else {
        digits.parse().ok()
    }
}

/// Millisecond timestamps for `Date.now`.
pub fn now_millis() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or(0.0)
}

/// `Number`-style integer check used by a few built-ins.
pub fn is_integer(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_finite() && n.fract() == 0.0,
        _ => false,
    }
}

/// BigInt → index conversion for arrays.
pub fn bigint_to_index(b: &num_bigint::BigInt) -> Option<usize> {
    b.to_usize()
}
