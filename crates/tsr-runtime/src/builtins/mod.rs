//! The built-in registry.
//!
//! A name-addressed table `(namespace, member) → native callable`,
//! initialized once before user code runs and immutable afterwards. Both
//! backends resolve `X.Y(...)` and `X.Y` through this table before falling
//! back to general property access. Native callables carry an arity range;
//! missing arguments arrive as `undefined`.
//!
//! The engine is single-threaded, so the table lives in a thread-local
//! lazily built on first access.

mod json;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;
use once_cell::unsync::Lazy;
use rustc_hash::FxHashMap;

use crate::error::{make_error, throw_type_error};
use crate::members::{self, call_sync, freeze_value, is_frozen, is_sealed, seal_value, well_known};
use crate::ops::{inspect, to_display_string, to_number, truthy};
use crate::value::*;
use crate::RtResult;

macro_rules! native {
    ($name:literal, $min:literal, $max:expr, $f:expr) => {{
        static F: NativeFn = NativeFn { name: $name, min_arity: $min, max_arity: $max, f: $f };
        Value::Native(&F)
    }};
}

thread_local! {
    static NEXT_SYMBOL_ID: Cell<u64> = const { Cell::new(well_known::FIRST_USER) };
    static SYMBOL_REGISTRY: RefCell<FxHashMap<String, Value>> = RefCell::new(FxHashMap::default());
    static WELL_KNOWN: Lazy<FxHashMap<&'static str, Value>> = Lazy::new(|| {
        let mut m = FxHashMap::default();
        m.insert(
            "iterator",
            Value::Symbol(Rc::new(SymbolData { id: well_known::ITERATOR, description: "Symbol.iterator".into() })),
        );
        m.insert(
            "asyncIterator",
            Value::Symbol(Rc::new(SymbolData {
                id: well_known::ASYNC_ITERATOR,
                description: "Symbol.asyncIterator".into(),
            })),
        );
        m.insert(
            "dispose",
            Value::Symbol(Rc::new(SymbolData { id: well_known::DISPOSE, description: "Symbol.dispose".into() })),
        );
        m
    });
}

pub fn fresh_symbol(description: String) -> Value {
    let id = NEXT_SYMBOL_ID.with(|c| {
        let id = c.get();
        c.set(id + 1);
        id
    });
    Value::Symbol(Rc::new(SymbolData { id, description }))
}

pub fn well_known_symbol(name: &str) -> Option<Value> {
    WELL_KNOWN.with(|m| m.get(name).cloned())
}

/// Look up a member of a built-in namespace (`Math.abs`, `console.log`).
pub fn namespace_member(namespace: &str, member: &str) -> Option<Value> {
    match namespace {
        "console" => console_member(member),
        "Math" => math_member(member),
        "JSON" => json_member(member),
        "Object" => object_member(member),
        "Array" => array_member(member),
        "Promise" => promise_member(member),
        "Number" => number_member(member),
        "Symbol" => symbol_member(member),
        "BigInt" => bigint_member(member),
        "Date" => date_member(member),
        "fs" => fs_member(member),
        "path" => path_member(member),
        "os" => os_member(member),
        "util" => util_member(member),
        "assert" => assert_member(member),
        "crypto" => crypto_member(member),
        "url" => url_member(member),
        _ => None,
    }
}

/// Look up a global callable or constructor (`parseInt`, `Error`, `Set`).
pub fn global(name: &str) -> Option<Value> {
    Some(match name {
        "parseInt" => native!("parseInt", 1, 2, |_, args| {
            let s = to_display_string(&arg(&args, 0));
            let radix = match args.get(1) {
                None | Some(Value::Undefined) => 10,
                Some(v) => to_number(v) as u32,
            };
            Ok(parse_int(&s, radix))
        }),
        "parseFloat" => native!("parseFloat", 1, 1, |_, args| {
            let s = to_display_string(&arg(&args, 0));
            let trimmed = s.trim_start();
            let mut end = 0;
            let bytes = trimmed.as_bytes();
            let mut seen_dot = false;
            let mut seen_exp = false;
            for (i, &b) in bytes.iter().enumerate() {
                match b {
                    b'0'..=b'9' => end = i + 1,
                    b'+' | b'-' if i == 0 => {}
                    b'.' if !seen_dot && !seen_exp => seen_dot = true,
                    b'e' | b'E' if !seen_exp && end > 0 => {
                        seen_exp = true;
                    }
                    _ => break,
                }
            }
            let slice = &trimmed[..end.max(0)];
            Ok(Value::Number(slice.parse().unwrap_or(f64::NAN)))
        }),
        "isNaN" => native!("isNaN", 1, 1, |_, args| {
            Ok(Value::Bool(to_number(&arg(&args, 0)).is_nan()))
        }),
        "isFinite" => native!("isFinite", 1, 1, |_, args| {
            Ok(Value::Bool(to_number(&arg(&args, 0)).is_finite()))
        }),
        "setTimeout" => native!("setTimeout", 1, usize::MAX, |ctx, mut args| {
            let callback = arg(&args, 0);
            let delay = to_number(&arg(&args, 1));
            let extra = if args.len() > 2 { args.split_off(2) } else { Vec::new() };
            let id = ctx.engine.scheduler().set_timer(callback, extra, delay, false);
            Ok(Value::Number(id as f64))
        }),
        "setInterval" => native!("setInterval", 1, usize::MAX, |ctx, mut args| {
            let callback = arg(&args, 0);
            let delay = to_number(&arg(&args, 1));
            let extra = if args.len() > 2 { args.split_off(2) } else { Vec::new() };
            let id = ctx.engine.scheduler().set_timer(callback, extra, delay, true);
            Ok(Value::Number(id as f64))
        }),
        "clearTimeout" | "clearInterval" => native!("clearTimeout", 1, 1, |ctx, args| {
            ctx.engine.scheduler().clear_timer(to_number(&arg(&args, 0)) as u64);
            Ok(Value::Undefined)
        }),
        "queueMicrotask" => native!("queueMicrotask", 1, 1, |ctx, args| {
            ctx.engine.scheduler().queue_microtask_callback(arg(&args, 0));
            Ok(Value::Undefined)
        }),
        "Error" => native!("Error", 0, 1, |_, args| Ok(new_error_value("Error", &args))),
        "TypeError" => native!("TypeError", 0, 1, |_, args| Ok(new_error_value("TypeError", &args))),
        "RangeError" => native!("RangeError", 0, 1, |_, args| {
            Ok(new_error_value("RangeError", &args))
        }),
        "SyntaxError" => native!("SyntaxError", 0, 1, |_, args| {
            Ok(new_error_value("SyntaxError", &args))
        }),
        "Array" => native!("Array", 0, usize::MAX, |_, args| {
            if args.len() == 1 {
                if let Value::Number(n) = &args[0] {
                    return Ok(Value::array(vec![Value::Undefined; *n as usize]));
                }
            }
            Ok(Value::array(args))
        }),
        "Set" => native!("Set", 0, 1, |_, args| {
            let mut set = indexmap::IndexSet::new();
            if let Some(iterable) = args.first() {
                if !iterable.is_nullish() {
                    for v in iterable_values(iterable)? {
                        set.insert(ValueKey(v));
                    }
                }
            }
            Ok(Value::Set(Rc::new(RefCell::new(set))))
        }),
        "Map" => native!("Map", 0, 1, |_, args| {
            let mut map = IndexMap::new();
            if let Some(iterable) = args.first() {
                if !iterable.is_nullish() {
                    for entry in iterable_values(iterable)? {
                        let Value::Array(pair) = &entry else {
                            return Err(throw_type_error("Iterator value is not an entry object"));
                        };
                        let pair = pair.borrow();
                        map.insert(
                            ValueKey(pair.first().cloned().unwrap_or_default()),
                            pair.get(1).cloned().unwrap_or_default(),
                        );
                    }
                }
            }
            Ok(Value::Map(Rc::new(RefCell::new(map))))
        }),
        "WeakMap" => native!("WeakMap", 0, 0, |_, _| {
            Ok(Value::Map(Rc::new(RefCell::new(IndexMap::new()))))
        }),
        "WeakSet" => native!("WeakSet", 0, 0, |_, _| {
            Ok(Value::Set(Rc::new(RefCell::new(indexmap::IndexSet::new()))))
        }),
        "Promise" => native!("Promise", 1, 1, |ctx, args| {
            // `new Promise(executor)`.
            let executor = arg(&args, 0);
            let scheduler = ctx.engine.scheduler();
            let promise = PromiseData::new();
            let resolve_fn = make_settle_callable(&promise, false);
            let reject_fn = make_settle_callable(&promise, true);
            match call_sync(ctx.engine, executor, Value::Undefined, vec![resolve_fn, reject_fn]) {
                Ok(_) => {}
                Err(error) => scheduler.settle(&promise, error, true),
            }
            Ok(Value::Promise(promise))
        }),
        "Date" => native!("Date", 0, 1, |_, args| {
            let ms = match args.first() {
                None | Some(Value::Undefined) => members::now_millis(),
                Some(v) => to_number(v),
            };
            Ok(Value::Date(Rc::new(Cell::new(ms))))
        }),
        "RegExp" => native!("RegExp", 1, 2, |_, args| {
            let source = to_display_string(&arg(&args, 0));
            let flags = match args.get(1) {
                None | Some(Value::Undefined) => String::new(),
                Some(v) => to_display_string(v),
            };
            compile_regex(&source, &flags)
        }),
        "BigInt" => native!("BigInt", 1, 1, |_, args| members::to_bigint(&arg(&args, 0))),
        "Symbol" => native!("Symbol", 0, 1, |_, args| {
            let description = match args.first() {
                None | Some(Value::Undefined) => String::new(),
                Some(v) => to_display_string(v),
            };
            Ok(fresh_symbol(description))
        }),
        "Number" => native!("Number", 0, 1, |_, args| {
            Ok(Value::Number(match args.first() {
                None => 0.0,
                Some(v) => to_number(v),
            }))
        }),
        "String" => native!("String", 0, 1, |_, args| {
            Ok(Value::str(match args.first() {
                None => String::new(),
                Some(v) => to_display_string(v),
            }))
        }),
        "Boolean" => native!("Boolean", 0, 1, |_, args| {
            Ok(Value::Bool(args.first().map(truthy).unwrap_or(false)))
        }),
        _ => return None,
    })
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

fn new_error_value(name: &str, args: &[Value]) -> Value {
    let message = match args.first() {
        None | Some(Value::Undefined) => String::new(),
        Some(v) => to_display_string(v),
    };
    make_error(name, message)
}

pub fn compile_regex(source: &str, flags: &str) -> RtResult<Value> {
    let mut pattern = String::new();
    if flags.contains('i') {
        pattern.push_str("(?i)");
    }
    if flags.contains('s') {
        pattern.push_str("(?s)");
    }
    if flags.contains('m') {
        pattern.push_str("(?m)");
    }
    pattern.push_str(source);
    match regex::Regex::new(&pattern) {
        Ok(compiled) => Ok(Value::Regex(Rc::new(RegexData {
            source: source.to_string(),
            flags: flags.to_string(),
            compiled,
            last_index: Cell::new(0),
        }))),
        Err(e) => Err(make_error("SyntaxError", format!("Invalid regular expression: {e}"))),
    }
}

/// Snapshot the values of a well-known iterable (used by constructors and
/// combinators; generators are drained through their coroutine).
fn iterable_values(value: &Value) -> RtResult<Vec<Value>> {
    match members::iter_source(value, false)? {
        members::IterSource::Values(values) => Ok(values),
        members::IterSource::Generator(_) | members::IterSource::Factory(_) | members::IterSource::IteratorObject(_) => {
            Err(throw_type_error("expected an array-like iterable here"))
        }
    }
}

/// A native callable that settles a promise (the executor's
/// resolve/reject).
fn make_settle_callable(promise: &Rc<PromiseData>, reject: bool) -> Value {
    // Settle callables close over their promise; modeled as a bound native
    // method whose receiver carries the state.
    let mut props = IndexMap::new();
    props.insert(
        "__promise__".to_string(),
        Value::Promise(Rc::clone(promise)),
    );
    props.insert("__reject__".to_string(), Value::Bool(reject));
    let holder = Value::object(props);
    Value::NativeMethod(Rc::new(NativeMethod {
        name: if reject { "reject".into() } else { "resolve".into() },
        receiver: holder,
        f: |ctx, recv, args| {
            let Value::Object(obj) = recv else { unreachable!() };
            let (promise, reject) = {
                let props = obj.props.borrow();
                let Some(Value::Promise(promise)) = props.get("__promise__").cloned() else {
                    unreachable!()
                };
                let reject = matches!(props.get("__reject__"), Some(Value::Bool(true)));
                (promise, reject)
            };
            let value = args.into_iter().next().unwrap_or_default();
            let scheduler = ctx.engine.scheduler();
            if reject {
                scheduler.settle(&promise, value, true);
            } else {
                scheduler.resolve(&promise, value);
            }
            Ok(Value::Undefined)
        },
    }))
}

// =============================================================================
// Namespaces
// =============================================================================

fn console_member(member: &str) -> Option<Value> {
    fn log(ctx: &NativeCtx<'_>, args: Vec<Value>) -> RtResult<Value> {
        let parts: Vec<String> = args.iter().map(inspect).collect();
        ctx.engine.output().writeln(&parts.join(" "));
        Ok(Value::Undefined)
    }
    fn log_err(ctx: &NativeCtx<'_>, args: Vec<Value>) -> RtResult<Value> {
        let parts: Vec<String> = args.iter().map(inspect).collect();
        ctx.engine.output().write_err(&parts.join(" "));
        Ok(Value::Undefined)
    }
    Some(match member {
        "log" | "info" | "debug" => native!("log", 0, usize::MAX, log),
        "error" | "warn" => native!("error", 0, usize::MAX, log_err),
        _ => return None,
    })
}

fn math_member(member: &str) -> Option<Value> {
    Some(match member {
        "PI" => Value::Number(std::f64::consts::PI),
        "E" => Value::Number(std::f64::consts::E),
        "LN2" => Value::Number(std::f64::consts::LN_2),
        "LN10" => Value::Number(std::f64::consts::LN_10),
        "SQRT2" => Value::Number(std::f64::consts::SQRT_2),
        "abs" => native!("abs", 1, 1, |_, args| Ok(Value::Number(to_number(&arg(&args, 0)).abs()))),
        "floor" => native!("floor", 1, 1, |_, args| {
            Ok(Value::Number(to_number(&arg(&args, 0)).floor()))
        }),
        "ceil" => native!("ceil", 1, 1, |_, args| {
            Ok(Value::Number(to_number(&arg(&args, 0)).ceil()))
        }),
        "round" => native!("round", 1, 1, |_, args| {
            let n = to_number(&arg(&args, 0));
            // Half-up, matching the language (not banker's rounding).
            Ok(Value::Number((n + 0.5).floor()))
        }),
        "trunc" => native!("trunc", 1, 1, |_, args| {
            Ok(Value::Number(to_number(&arg(&args, 0)).trunc()))
        }),
        "sign" => native!("sign", 1, 1, |_, args| {
            let n = to_number(&arg(&args, 0));
            Ok(Value::Number(if n.is_nan() {
                f64::NAN
            } else if n > 0.0 {
                1.0
            } else if n < 0.0 {
                -1.0
            } else {
                n
            }))
        }),
        "sqrt" => native!("sqrt", 1, 1, |_, args| {
            Ok(Value::Number(to_number(&arg(&args, 0)).sqrt()))
        }),
        "cbrt" => native!("cbrt", 1, 1, |_, args| {
            Ok(Value::Number(to_number(&arg(&args, 0)).cbrt()))
        }),
        "exp" => native!("exp", 1, 1, |_, args| Ok(Value::Number(to_number(&arg(&args, 0)).exp()))),
        "log" => native!("log", 1, 1, |_, args| Ok(Value::Number(to_number(&arg(&args, 0)).ln()))),
        "log2" => native!("log2", 1, 1, |_, args| {
            Ok(Value::Number(to_number(&arg(&args, 0)).log2()))
        }),
        "log10" => native!("log10", 1, 1, |_, args| {
            Ok(Value::Number(to_number(&arg(&args, 0)).log10()))
        }),
        "sin" => native!("sin", 1, 1, |_, args| Ok(Value::Number(to_number(&arg(&args, 0)).sin()))),
        "cos" => native!("cos", 1, 1, |_, args| Ok(Value::Number(to_number(&arg(&args, 0)).cos()))),
        "tan" => native!("tan", 1, 1, |_, args| Ok(Value::Number(to_number(&arg(&args, 0)).tan()))),
        "atan2" => native!("atan2", 2, 2, |_, args| {
            Ok(Value::Number(to_number(&arg(&args, 0)).atan2(to_number(&arg(&args, 1)))))
        }),
        "pow" => native!("pow", 2, 2, |_, args| {
            Ok(Value::Number(to_number(&arg(&args, 0)).powf(to_number(&arg(&args, 1)))))
        }),
        "hypot" => native!("hypot", 0, usize::MAX, |_, args| {
            let sum: f64 = args.iter().map(|v| to_number(v).powi(2)).sum();
            Ok(Value::Number(sum.sqrt()))
        }),
        "min" => native!("min", 0, usize::MAX, |_, args| {
            let mut best = f64::INFINITY;
            for v in &args {
                let n = to_number(v);
                if n.is_nan() {
                    return Ok(Value::Number(f64::NAN));
                }
                best = best.min(n);
            }
            Ok(Value::Number(best))
        }),
        "max" => native!("max", 0, usize::MAX, |_, args| {
            let mut best = f64::NEG_INFINITY;
            for v in &args {
                let n = to_number(v);
                if n.is_nan() {
                    return Ok(Value::Number(f64::NAN));
                }
                best = best.max(n);
            }
            Ok(Value::Number(best))
        }),
        "random" => native!("random", 0, 0, |_, _| {
            // A linear congruential step over a thread-local seed; the
            // engine promises uniformity, not cryptographic quality.
            thread_local! {
                static SEED: Cell<u64> = const { Cell::new(0x2545F4914F6CDD1D) };
            }
            let next = SEED.with(|s| {
                let mut x = s.get();
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                s.set(x);
                x
            });
            Ok(Value::Number((next >> 11) as f64 / (1u64 << 53) as f64))
        }),
        _ => return None,
    })
}

fn json_member(member: &str) -> Option<Value> {
    Some(match member {
        "stringify" => native!("stringify", 1, 3, |_, args| {
            let indent = match args.get(2) {
                Some(Value::Number(n)) if *n > 0.0 => Some(*n as usize),
                Some(Value::Str(s)) => Some(s.len()),
                _ => None,
            };
            json::stringify(&arg(&args, 0), indent)
        }),
        "parse" => native!("parse", 1, 1, |_, args| {
            json::parse(&to_display_string(&arg(&args, 0)))
        }),
        _ => return None,
    })
}

fn object_member(member: &str) -> Option<Value> {
    Some(match member {
        "freeze" => native!("freeze", 1, 1, |_, args| {
            let v = arg(&args, 0);
            freeze_value(&v);
            Ok(v)
        }),
        "isFrozen" => native!("isFrozen", 1, 1, |_, args| Ok(Value::Bool(is_frozen(&arg(&args, 0))))),
        "seal" => native!("seal", 1, 1, |_, args| {
            let v = arg(&args, 0);
            seal_value(&v);
            Ok(v)
        }),
        "isSealed" => native!("isSealed", 1, 1, |_, args| Ok(Value::Bool(is_sealed(&arg(&args, 0))))),
        "keys" => native!("keys", 1, 1, |_, args| {
            Ok(Value::array(
                members::enumerate_keys(&arg(&args, 0)).into_iter().map(Value::str).collect(),
            ))
        }),
        "values" => native!("values", 1, 1, |_, args| {
            let target = arg(&args, 0);
            let values = members::enumerate_keys(&target)
                .into_iter()
                .map(|k| members::get_index(&target, &Value::str(k)))
                .collect::<RtResult<Vec<Value>>>()?;
            Ok(Value::array(values))
        }),
        "entries" => native!("entries", 1, 1, |_, args| {
            let target = arg(&args, 0);
            let entries = members::enumerate_keys(&target)
                .into_iter()
                .map(|k| {
                    let v = members::get_index(&target, &Value::str(k.clone()))?;
                    Ok(Value::array(vec![Value::str(k), v]))
                })
                .collect::<RtResult<Vec<Value>>>()?;
            Ok(Value::array(entries))
        }),
        "assign" => native!("assign", 1, usize::MAX, |_, args| {
            let target = arg(&args, 0);
            for source in args.iter().skip(1) {
                for key in members::enumerate_keys(source) {
                    let v = members::get_index(source, &Value::str(key.clone()))?;
                    members::set_index(&target, &Value::str(key), v, false)?;
                }
            }
            Ok(target)
        }),
        "create" => native!("create", 1, 1, |_, args| {
            // Prototype chains are out of the accepted subset; `create`
            // copies the enumerable properties.
            let proto = arg(&args, 0);
            let obj = ObjectData::new();
            if let Value::Object(source) = &proto {
                obj.props.borrow_mut().extend(
                    source.props.borrow().iter().map(|(k, v)| (k.clone(), v.clone())),
                );
            }
            Ok(Value::Object(obj))
        }),
        "getOwnPropertyNames" => native!("getOwnPropertyNames", 1, 1, |_, args| {
            Ok(Value::array(
                members::enumerate_keys(&arg(&args, 0)).into_iter().map(Value::str).collect(),
            ))
        }),
        "fromEntries" => native!("fromEntries", 1, 1, |_, args| {
            let entries = iterable_values(&arg(&args, 0))?;
            let mut props = IndexMap::new();
            for entry in entries {
                let Value::Array(pair) = &entry else {
                    return Err(throw_type_error("Iterator value is not an entry object"));
                };
                let pair = pair.borrow();
                props.insert(
                    to_display_string(&pair.first().cloned().unwrap_or_default()),
                    pair.get(1).cloned().unwrap_or_default(),
                );
            }
            Ok(Value::object(props))
        }),
        "defineProperty" => native!("defineProperty", 3, 3, |_, args| {
            let target = arg(&args, 0);
            let key = to_display_string(&arg(&args, 1));
            let descriptor = arg(&args, 2);
            let value = members::get_index(&descriptor, &Value::str("value"))?;
            members::set_index(&target, &Value::str(key), value, false)?;
            Ok(target)
        }),
        _ => return None,
    })
}

fn array_member(member: &str) -> Option<Value> {
    Some(match member {
        "isArray" => native!("isArray", 1, 1, |_, args| {
            Ok(Value::Bool(matches!(arg(&args, 0), Value::Array(_))))
        }),
        "from" => native!("from", 1, 2, |ctx, args| {
            let values = iterable_values(&arg(&args, 0))?;
            match args.get(1) {
                Some(mapper) if mapper.is_callable() => {
                    let mut out = Vec::with_capacity(values.len());
                    for (i, v) in values.into_iter().enumerate() {
                        out.push(call_sync(
                            ctx.engine,
                            mapper.clone(),
                            Value::Undefined,
                            vec![v, Value::Number(i as f64)],
                        )?);
                    }
                    Ok(Value::array(out))
                }
                _ => Ok(Value::array(values)),
            }
        }),
        "of" => native!("of", 0, usize::MAX, |_, args| Ok(Value::array(args))),
        _ => return None,
    })
}

fn promise_member(member: &str) -> Option<Value> {
    Some(match member {
        "resolve" => native!("resolve", 0, 1, |ctx, args| {
            let value = arg(&args, 0);
            if let Value::Promise(_) = value {
                return Ok(value);
            }
            let promise = PromiseData::new();
            ctx.engine.scheduler().resolve(&promise, value);
            Ok(Value::Promise(promise))
        }),
        "reject" => native!("reject", 0, 1, |ctx, args| {
            let promise = PromiseData::new();
            ctx.engine.scheduler().settle(&promise, arg(&args, 0), true);
            Ok(Value::Promise(promise))
        }),
        "all" => native!("all", 1, 1, |ctx, args| {
            let values = iterable_values(&arg(&args, 0))?;
            let scheduler = ctx.engine.scheduler();
            let result = PromiseData::new();
            let total = values.len();
            let settled: Rc<RefCell<Vec<Value>>> =
                Rc::new(RefCell::new(vec![Value::Undefined; total]));
            let remaining = Rc::new(Cell::new(total));
            if total == 0 {
                scheduler.settle(&result, Value::array(Vec::new()), false);
                return Ok(Value::Promise(result));
            }
            for (i, v) in values.into_iter().enumerate() {
                match v {
                    Value::Promise(p) => {
                        let settled = Rc::clone(&settled);
                        let remaining = Rc::clone(&remaining);
                        let result = Rc::clone(&result);
                        let scheduler_inner = Rc::clone(&scheduler);
                        scheduler.subscribe_native(
                            &p,
                            Box::new(move |value, rejected| {
                                if rejected {
                                    scheduler_inner.settle(&result, value, true);
                                    return;
                                }
                                settled.borrow_mut()[i] = value;
                                remaining.set(remaining.get() - 1);
                                if remaining.get() == 0 {
                                    scheduler_inner.settle(
                                        &result,
                                        Value::array(settled.borrow().clone()),
                                        false,
                                    );
                                }
                            }),
                        );
                    }
                    plain => {
                        settled.borrow_mut()[i] = plain;
                        remaining.set(remaining.get() - 1);
                        if remaining.get() == 0 {
                            scheduler.settle(&result, Value::array(settled.borrow().clone()), false);
                        }
                    }
                }
            }
            Ok(Value::Promise(result))
        }),
        "allSettled" => native!("allSettled", 1, 1, |ctx, args| {
            let values = iterable_values(&arg(&args, 0))?;
            let scheduler = ctx.engine.scheduler();
            let result = PromiseData::new();
            let total = values.len();
            let settled: Rc<RefCell<Vec<Value>>> =
                Rc::new(RefCell::new(vec![Value::Undefined; total]));
            let remaining = Rc::new(Cell::new(total));
            if total == 0 {
                scheduler.settle(&result, Value::array(Vec::new()), false);
                return Ok(Value::Promise(result));
            }
            fn outcome(value: Value, rejected: bool) -> Value {
                let mut props = IndexMap::new();
                if rejected {
                    props.insert("status".to_string(), Value::str("rejected"));
                    props.insert("reason".to_string(), value);
                } else {
                    props.insert("status".to_string(), Value::str("fulfilled"));
                    props.insert("value".to_string(), value);
                }
                Value::object(props)
            }
            for (i, v) in values.into_iter().enumerate() {
                match v {
                    Value::Promise(p) => {
                        let settled = Rc::clone(&settled);
                        let remaining = Rc::clone(&remaining);
                        let result = Rc::clone(&result);
                        let scheduler_inner = Rc::clone(&scheduler);
                        scheduler.subscribe_native(
                            &p,
                            Box::new(move |value, rejected| {
                                settled.borrow_mut()[i] = outcome(value, rejected);
                                remaining.set(remaining.get() - 1);
                                if remaining.get() == 0 {
                                    scheduler_inner.settle(
                                        &result,
                                        Value::array(settled.borrow().clone()),
                                        false,
                                    );
                                }
                            }),
                        );
                    }
                    plain => {
                        settled.borrow_mut()[i] = outcome(plain, false);
                        remaining.set(remaining.get() - 1);
                        if remaining.get() == 0 {
                            scheduler.settle(&result, Value::array(settled.borrow().clone()), false);
                        }
                    }
                }
            }
            Ok(Value::Promise(result))
        }),
        "race" => native!("race", 1, 1, |ctx, args| {
            let values = iterable_values(&arg(&args, 0))?;
            let scheduler = ctx.engine.scheduler();
            let result = PromiseData::new();
            for v in values {
                match v {
                    Value::Promise(p) => {
                        let result = Rc::clone(&result);
                        let scheduler_inner = Rc::clone(&scheduler);
                        scheduler.subscribe_native(
                            &p,
                            Box::new(move |value, rejected| {
                                scheduler_inner.settle(&result, value, rejected);
                            }),
                        );
                    }
                    plain => {
                        scheduler.settle(&result, plain, false);
                    }
                }
            }
            Ok(Value::Promise(result))
        }),
        "any" => native!("any", 1, 1, |ctx, args| {
            let values = iterable_values(&arg(&args, 0))?;
            let scheduler = ctx.engine.scheduler();
            let result = PromiseData::new();
            let remaining = Rc::new(Cell::new(values.len()));
            if values.is_empty() {
                scheduler.settle(
                    &result,
                    make_error("AggregateError", "All promises were rejected"),
                    true,
                );
                return Ok(Value::Promise(result));
            }
            for v in values {
                match v {
                    Value::Promise(p) => {
                        let result = Rc::clone(&result);
                        let remaining = Rc::clone(&remaining);
                        let scheduler_inner = Rc::clone(&scheduler);
                        scheduler.subscribe_native(
                            &p,
                            Box::new(move |value, rejected| {
                                if !rejected {
                                    scheduler_inner.settle(&result, value, false);
                                    return;
                                }
                                remaining.set(remaining.get() - 1);
                                if remaining.get() == 0 {
                                    scheduler_inner.settle(
                                        &result,
                                        make_error("AggregateError", "All promises were rejected"),
                                        true,
                                    );
                                }
                            }),
                        );
                    }
                    plain => {
                        scheduler.settle(&result, plain, false);
                    }
                }
            }
            Ok(Value::Promise(result))
        }),
        _ => return None,
    })
}

fn number_member(member: &str) -> Option<Value> {
    Some(match member {
        "MAX_SAFE_INTEGER" => Value::Number(9007199254740991.0),
        "MIN_SAFE_INTEGER" => Value::Number(-9007199254740991.0),
        "MAX_VALUE" => Value::Number(f64::MAX),
        "MIN_VALUE" => Value::Number(f64::MIN_POSITIVE),
        "EPSILON" => Value::Number(f64::EPSILON),
        "POSITIVE_INFINITY" => Value::Number(f64::INFINITY),
        "NEGATIVE_INFINITY" => Value::Number(f64::NEG_INFINITY),
        "NaN" => Value::Number(f64::NAN),
        "isInteger" => native!("isInteger", 1, 1, |_, args| {
            Ok(Value::Bool(members::is_integer(&arg(&args, 0))))
        }),
        "isSafeInteger" => native!("isSafeInteger", 1, 1, |_, args| {
            let v = arg(&args, 0);
            Ok(Value::Bool(
                members::is_integer(&v) && to_number(&v).abs() <= 9007199254740991.0,
            ))
        }),
        "isFinite" => native!("isFinite", 1, 1, |_, args| {
            Ok(Value::Bool(matches!(arg(&args, 0), Value::Number(n) if n.is_finite())))
        }),
        "isNaN" => native!("isNaN", 1, 1, |_, args| {
            Ok(Value::Bool(matches!(arg(&args, 0), Value::Number(n) if n.is_nan())))
        }),
        "parseFloat" => global("parseFloat")?,
        "parseInt" => global("parseInt")?,
        _ => return None,
    })
}

fn symbol_member(member: &str) -> Option<Value> {
    if let Some(symbol) = well_known_symbol(member) {
        return Some(symbol);
    }
    Some(match member {
        "for" => native!("for", 1, 1, |_, args| {
            let key = to_display_string(&arg(&args, 0));
            SYMBOL_REGISTRY.with(|registry| {
                let mut registry = registry.borrow_mut();
                if let Some(existing) = registry.get(&key) {
                    return Ok(existing.clone());
                }
                let symbol = fresh_symbol(key.clone());
                registry.insert(key, symbol.clone());
                Ok(symbol)
            })
        }),
        _ => return None,
    })
}

fn bigint_member(member: &str) -> Option<Value> {
    Some(match member {
        "asIntN" => native!("asIntN", 2, 2, |_, args| {
            // Truncation to N bits.
            let bits = to_number(&arg(&args, 0)) as u32;
            match arg(&args, 1) {
                Value::BigInt(b) => {
                    let modulus = num_bigint::BigInt::from(1) << bits;
                    let mut r = b.as_ref() % &modulus;
                    let half = &modulus >> 1;
                    if r >= half {
                        r -= &modulus;
                    }
                    Ok(Value::BigInt(Rc::new(r)))
                }
                _ => Err(throw_type_error("Expected a BigInt")),
            }
        }),
        _ => return None,
    })
}

fn date_member(member: &str) -> Option<Value> {
    Some(match member {
        "now" => native!("now", 0, 0, |_, _| Ok(Value::Number(members::now_millis()))),
        _ => return None,
    })
}

// =============================================================================
// Module-style namespaces
// =============================================================================

fn fs_member(member: &str) -> Option<Value> {
    Some(match member {
        "readFileSync" => native!("readFileSync", 1, 2, |_, args| {
            let path = to_display_string(&arg(&args, 0));
            std::fs::read_to_string(&path)
                .map(Value::str)
                .map_err(|e| make_error("Error", format!("ENOENT: {e}, open '{path}'")))
        }),
        "writeFileSync" => native!("writeFileSync", 2, 2, |_, args| {
            let path = to_display_string(&arg(&args, 0));
            let data = to_display_string(&arg(&args, 1));
            std::fs::write(&path, data)
                .map(|_| Value::Undefined)
                .map_err(|e| make_error("Error", format!("EACCES: {e}, write '{path}'")))
        }),
        "existsSync" => native!("existsSync", 1, 1, |_, args| {
            Ok(Value::Bool(std::path::Path::new(&to_display_string(&arg(&args, 0))).exists()))
        }),
        _ => return None,
    })
}

fn path_member(member: &str) -> Option<Value> {
    Some(match member {
        "join" => native!("join", 0, usize::MAX, |_, args| {
            let mut path = std::path::PathBuf::new();
            for part in &args {
                path.push(to_display_string(part));
            }
            Ok(Value::str(path.to_string_lossy().to_string()))
        }),
        "basename" => native!("basename", 1, 1, |_, args| {
            let p = to_display_string(&arg(&args, 0));
            Ok(Value::str(
                std::path::Path::new(&p)
                    .file_name()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default(),
            ))
        }),
        "dirname" => native!("dirname", 1, 1, |_, args| {
            let p = to_display_string(&arg(&args, 0));
            Ok(Value::str(
                std::path::Path::new(&p)
                    .parent()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| ".".to_string()),
            ))
        }),
        "extname" => native!("extname", 1, 1, |_, args| {
            let p = to_display_string(&arg(&args, 0));
            Ok(Value::str(
                std::path::Path::new(&p)
                    .extension()
                    .map(|s| format!(".{}", s.to_string_lossy()))
                    .unwrap_or_default(),
            ))
        }),
        _ => return None,
    })
}

fn os_member(member: &str) -> Option<Value> {
    Some(match member {
        "platform" => native!("platform", 0, 0, |_, _| Ok(Value::str(std::env::consts::OS))),
        "EOL" => Value::str("\n"),
        _ => return None,
    })
}

fn util_member(member: &str) -> Option<Value> {
    Some(match member {
        "inspect" => native!("inspect", 1, 1, |_, args| Ok(Value::str(inspect(&arg(&args, 0))))),
        _ => return None,
    })
}

fn crypto_member(member: &str) -> Option<Value> {
    Some(match member {
        "randomUUID" => native!("randomUUID", 0, 0, |_, _| {
            thread_local! {
                static SEED: Cell<u64> = const { Cell::new(0x9E3779B97F4A7C15) };
            }
            let mut halves = [0u64; 2];
            for half in &mut halves {
                *half = SEED.with(|s| {
                    let mut x = s.get();
                    x ^= x << 13;
                    x ^= x >> 7;
                    x ^= x << 17;
                    s.set(x);
                    x
                });
            }
            let (a, b) = (halves[0], halves[1]);
            Ok(Value::str(format!(
                "{:08x}-{:04x}-4{:03x}-{:04x}-{:012x}",
                (a >> 32) as u32,
                (a >> 16) as u16,
                (a as u16) & 0x0fff,
                0x8000 | ((b >> 48) as u16 & 0x3fff),
                b & 0xffff_ffff_ffff
            )))
        }),
        _ => return None,
    })
}

fn url_member(member: &str) -> Option<Value> {
    Some(match member {
        "fileURLToPath" => native!("fileURLToPath", 1, 1, |_, args| {
            let url = to_display_string(&arg(&args, 0));
            Ok(Value::str(url.strip_prefix("file://").unwrap_or(&url).to_string()))
        }),
        "pathToFileURL" => native!("pathToFileURL", 1, 1, |_, args| {
            let path = to_display_string(&arg(&args, 0));
            Ok(Value::str(format!("file://{path}")))
        }),
        _ => return None,
    })
}

fn assert_member(member: &str) -> Option<Value> {
    Some(match member {
        "ok" => native!("ok", 1, 2, |_, args| {
            if truthy(&arg(&args, 0)) {
                Ok(Value::Undefined)
            } else {
                Err(make_error(
                    "AssertionError",
                    match args.get(1) {
                        Some(m) => to_display_string(m),
                        None => "assertion failed".to_string(),
                    },
                ))
            }
        }),
        "equal" => native!("equal", 2, 3, |_, args| {
            if crate::ops::loose_equals(&arg(&args, 0), &arg(&args, 1)) {
                Ok(Value::Undefined)
            } else {
                Err(make_error(
                    "AssertionError",
                    format!(
                        "{} != {}",
                        to_display_string(&arg(&args, 0)),
                        to_display_string(&arg(&args, 1))
                    ),
                ))
            }
        }),
        "strictEqual" => native!("strictEqual", 2, 3, |_, args| {
            if crate::ops::strict_equals(&arg(&args, 0), &arg(&args, 1)) {
                Ok(Value::Undefined)
            } else {
                Err(make_error(
                    "AssertionError",
                    format!(
                        "{} !== {}",
                        to_display_string(&arg(&args, 0)),
                        to_display_string(&arg(&args, 1))
                    ),
                ))
            }
        }),
        _ => return None,
    })
}

fn parse_int(s: &str, radix: u32) -> Value {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (radix, digits) = if radix == 16 || radix == 0 {
        match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
            Some(rest) => (16, rest),
            None => (if radix == 0 { 10 } else { radix }, digits),
        }
    } else {
        (radix, digits)
    };
    if !(2..=36).contains(&radix) {
        return Value::Number(f64::NAN);
    }
    let mut value: f64 = 0.0;
    let mut any = false;
    for c in digits.chars() {
        match c.to_digit(radix) {
            Some(d) => {
                any = true;
                value = value * radix as f64 + d as f64;
            }
            None => break,
        }
    }
    if !any {
        return Value::Number(f64::NAN);
    }
    Value::Number(if negative { -value } else { value })
}

/// `Math.round` helper exposure for the emitter's constant folding.
pub fn js_round(n: f64) -> f64 {
    (n + 0.5).floor()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_int_handles_radix_and_garbage() {
        assert_eq!(parse_int("42", 10).as_number(), Some(42.0));
        assert_eq!(parse_int("  -17px", 10).as_number(), Some(-17.0));
        assert_eq!(parse_int("ff", 16).as_number(), Some(255.0));
        assert_eq!(parse_int("0x1f", 0).as_number(), Some(31.0));
        assert!(parse_int("zz", 10).as_number().unwrap().is_nan());
    }

    #[test]
    fn well_known_symbols_are_interned() {
        let a = well_known_symbol("iterator").unwrap();
        let b = well_known_symbol("iterator").unwrap();
        assert!(a.same_identity(&b));
        let dispose = well_known_symbol("dispose").unwrap();
        assert!(!a.same_identity(&dispose));
    }

    #[test]
    fn fresh_symbols_are_unique() {
        let a = fresh_symbol("x".to_string());
        let b = fresh_symbol("x".to_string());
        assert!(!a.same_identity(&b));
    }

    #[test]
    fn unknown_members_are_absent() {
        assert!(namespace_member("Math", "nope").is_none());
        assert!(namespace_member("nope", "anything").is_none());
    }
}
