//! The tagged runtime value.
//!
//! Primitives are stored inline; aggregates live behind reference-counted
//! handles so closures, class hierarchies and captured environments can
//! share them (cycles are broken by the handles being the only identity —
//! see the design notes). Insertion order of object properties is preserved
//! for enumeration; symbol-keyed properties live in a separate table.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use num_bigint::BigInt;
use rustc_hash::FxHashMap;

use tsr_parser::ast::{ClassDecl, FunctionDecl};

use crate::env::RuntimeEnv;
use crate::{LocalBoxFuture, RtResult};

/// A symbol value. Identity is the `id`; well-known symbols are interned at
/// registry initialization.
#[derive(Debug)]
pub struct SymbolData {
    pub id: u64,
    pub description: String,
}

/// A plain object: string-keyed properties in insertion order plus a
/// separate symbol-keyed table.
#[derive(Debug, Default)]
pub struct ObjectData {
    pub props: RefCell<IndexMap<String, Value>>,
    pub symbols: RefCell<FxHashMap<u64, Value>>,
    pub frozen: Cell<bool>,
    pub sealed: Cell<bool>,
}

impl ObjectData {
    pub fn new() -> Rc<Self> {
        Rc::new(ObjectData::default())
    }

    pub fn from_props(props: IndexMap<String, Value>) -> Rc<Self> {
        Rc::new(ObjectData {
            props: RefCell::new(props),
            symbols: RefCell::new(FxHashMap::default()),
            frozen: Cell::new(false),
            sealed: Cell::new(false),
        })
    }
}

/// A class instance: class handle plus field table.
#[derive(Debug)]
pub struct InstanceData {
    pub class: Rc<ClassValue>,
    pub fields: RefCell<IndexMap<String, Value>>,
    pub frozen: Cell<bool>,
}

/// A runtime class: method tables, accessors, statics, superclass handle.
///
/// The interpreter keeps the declaration for field initializers; the VM
/// folds field initialization into its compiled constructor and leaves
/// `decl` empty.
#[derive(Debug)]
pub struct ClassValue {
    pub name: String,
    pub decl: Option<Rc<ClassDecl>>,
    pub superclass: Option<Rc<ClassValue>>,
    pub methods: IndexMap<String, Value>,
    pub getters: IndexMap<String, Value>,
    pub setters: IndexMap<String, Value>,
    pub static_methods: IndexMap<String, Value>,
    pub static_getters: IndexMap<String, Value>,
    pub static_props: RefCell<IndexMap<String, Value>>,
    pub constructor: Option<Value>,
    pub is_abstract: bool,
}

impl ClassValue {
    /// Walk the class chain for an instance method.
    pub fn find_method(&self, name: &str) -> Option<Value> {
        if let Some(m) = self.methods.get(name) {
            return Some(m.clone());
        }
        self.superclass.as_ref().and_then(|s| s.find_method(name))
    }

    pub fn find_getter(&self, name: &str) -> Option<Value> {
        if let Some(m) = self.getters.get(name) {
            return Some(m.clone());
        }
        self.superclass.as_ref().and_then(|s| s.find_getter(name))
    }

    pub fn find_setter(&self, name: &str) -> Option<Value> {
        if let Some(m) = self.setters.get(name) {
            return Some(m.clone());
        }
        self.superclass.as_ref().and_then(|s| s.find_setter(name))
    }

    pub fn find_static(&self, name: &str) -> Option<Value> {
        if let Some(m) = self.static_methods.get(name) {
            return Some(m.clone());
        }
        if let Some(v) = self.static_props.borrow().get(name) {
            return Some(v.clone());
        }
        if let Some(m) = self.static_getters.get(name) {
            return Some(m.clone());
        }
        self.superclass.as_ref().and_then(|s| s.find_static(name))
    }

    pub fn find_constructor(&self) -> Option<Value> {
        if let Some(c) = &self.constructor {
            return Some(c.clone());
        }
        self.superclass.as_ref().and_then(|s| s.find_constructor())
    }

    pub fn derives_from(&self, other: &ClassValue) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        self.superclass
            .as_ref()
            .is_some_and(|s| s.derives_from(other))
    }
}

/// A user function value: declaration, captured environment, and the class
/// it was defined in (for `super` resolution). The home class is patched in
/// after the class value is built, since methods and their class reference
/// each other.
#[derive(Debug)]
pub struct FunctionValue {
    pub decl: Rc<FunctionDecl>,
    pub env: RuntimeEnv,
    pub home_class: RefCell<Option<Rc<ClassValue>>>,
}

/// A method auto-bound to its receiver on property access.
#[derive(Debug)]
pub struct BoundMethod {
    pub func: Value,
    pub receiver: Value,
}

/// How a suspended coroutine is resumed.
pub enum GenResume {
    Next(Value),
    Return(Value),
    Throw(Value),
}

/// What a coroutine produced for one resume.
pub enum GenStep {
    Yield(Value),
    Done(Value),
}

/// A suspendable body: tree-walked generator/async bodies and lowered VM
/// frames implement this uniformly, so generator objects carry one
/// representation across backends.
pub trait Coroutine {
    /// Drive until the next yield, completion, or (async bodies only) a
    /// pending await. The returned future is immediately ready for
    /// synchronous generators.
    fn resume(self: Rc<Self>, input: GenResume) -> LocalBoxFuture<'static, RtResult<GenStep>>;
}

/// A generator object: `next`/`return`/`throw` drive the coroutine.
pub struct GeneratorObject {
    pub co: Rc<dyn Coroutine>,
    pub is_async: bool,
    pub done: Cell<bool>,
}

impl fmt::Debug for GeneratorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorObject")
            .field("is_async", &self.is_async)
            .field("done", &self.done.get())
            .finish()
    }
}

/// Promise settlement state.
#[derive(Clone, Debug, PartialEq)]
pub enum PromiseStatus {
    Pending,
    Fulfilled,
    Rejected,
}

/// A promise reaction queued for the microtask drain.
pub enum Reaction {
    /// Call the matching user callback with the settlement value and settle
    /// `derived` from its result; a missing callback passes the settlement
    /// through unchanged.
    CallUser {
        on_fulfilled: Option<Value>,
        on_rejected: Option<Value>,
        derived: Rc<PromiseData>,
    },
    /// Pure host reaction (used by combinators like `Promise.all`).
    Native(Box<dyn FnOnce(Value, bool)>),
    /// Settle a derived promise with the same outcome.
    Chain(Rc<PromiseData>),
}

impl fmt::Debug for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reaction::CallUser { .. } => write!(f, "Reaction::CallUser"),
            Reaction::Native(_) => write!(f, "Reaction::Native"),
            Reaction::Chain(_) => write!(f, "Reaction::Chain"),
        }
    }
}

/// A promise: status, settlement value, queued reactions.
#[derive(Debug, Default)]
pub struct PromiseData {
    pub status: RefCell<PromiseStatus>,
    pub value: RefCell<Option<Value>>,
    pub reactions: RefCell<Vec<Reaction>>,
    pub handled: Cell<bool>,
}

impl Default for PromiseStatus {
    fn default() -> Self {
        PromiseStatus::Pending
    }
}

impl PromiseData {
    pub fn new() -> Rc<Self> {
        Rc::new(PromiseData::default())
    }

    pub fn fulfilled(value: Value) -> Rc<Self> {
        let p = PromiseData::new();
        *p.status.borrow_mut() = PromiseStatus::Fulfilled;
        *p.value.borrow_mut() = Some(value);
        p
    }

    pub fn rejected(value: Value) -> Rc<Self> {
        let p = PromiseData::new();
        *p.status.borrow_mut() = PromiseStatus::Rejected;
        *p.value.borrow_mut() = Some(value);
        p
    }

    pub fn is_pending(&self) -> bool {
        *self.status.borrow() == PromiseStatus::Pending
    }
}

/// A regex value backed by the `regex` crate.
#[derive(Debug)]
pub struct RegexData {
    pub source: String,
    pub flags: String,
    pub compiled: regex::Regex,
    pub last_index: Cell<usize>,
}

/// Context handed to native built-ins.
pub struct NativeCtx<'a> {
    pub engine: &'a dyn crate::Engine,
}

/// A native callable with an arity range.
pub struct NativeFn {
    pub name: &'static str,
    pub min_arity: usize,
    pub max_arity: usize,
    pub f: fn(&NativeCtx<'_>, Vec<Value>) -> RtResult<Value>,
}

/// A native method bound to a receiver.
pub struct NativeMethod {
    pub name: String,
    pub receiver: Value,
    pub f: fn(&NativeCtx<'_>, &Value, Vec<Value>) -> RtResult<Value>,
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFn({})", self.name)
    }
}

impl fmt::Debug for NativeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeMethod({})", self.name)
    }
}

/// A backend-specific value (the VM's compiled function handles). The
/// owning engine downcasts through `as_any`.
pub trait OpaqueValue {
    fn type_name(&self) -> &'static str;
    fn as_any(&self) -> &dyn std::any::Any;
    /// Whether invocation is meaningful for this value.
    fn callable(&self) -> bool {
        true
    }
}

impl fmt::Debug for dyn OpaqueValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({})", self.type_name())
    }
}

/// A tagged runtime value. Cheap to clone: aggregates clone a handle.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(Rc<BigInt>),
    Str(Rc<str>),
    Symbol(Rc<SymbolData>),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<ObjectData>),
    Instance(Rc<InstanceData>),
    Class(Rc<ClassValue>),
    Function(Rc<FunctionValue>),
    Bound(Rc<BoundMethod>),
    Native(&'static NativeFn),
    NativeMethod(Rc<NativeMethod>),
    Promise(Rc<PromiseData>),
    Generator(Rc<GeneratorObject>),
    Map(Rc<RefCell<IndexMap<ValueKey, Value>>>),
    Set(Rc<RefCell<IndexSet<ValueKey>>>),
    Regex(Rc<RegexData>),
    Date(Rc<Cell<f64>>),
    Opaque(Rc<dyn OpaqueValue>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(Rc::from(s.into().as_str()))
    }

    pub fn array(values: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(values)))
    }

    pub fn object(props: IndexMap<String, Value>) -> Value {
        Value::Object(ObjectData::from_props(props))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_callable(&self) -> bool {
        match self {
            Value::Function(_)
            | Value::Bound(_)
            | Value::Native(_)
            | Value::NativeMethod(_)
            | Value::Class(_) => true,
            Value::Opaque(o) => o.callable(),
            _ => false,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Identity/equality by reference for aggregates, by value for
    /// primitives — the strict-equality backbone.
    pub fn same_identity(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a.id == b.id,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Bound(a), Value::Bound(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => std::ptr::eq(*a, *b),
            (Value::NativeMethod(a), Value::NativeMethod(b)) => Rc::ptr_eq(a, b),
            (Value::Promise(a), Value::Promise(b)) => Rc::ptr_eq(a, b),
            (Value::Generator(a), Value::Generator(b)) => Rc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
            (Value::Regex(a), Value::Regex(b)) => Rc::ptr_eq(a, b),
            (Value::Date(a), Value::Date(b)) => Rc::ptr_eq(a, b),
            (Value::Opaque(a), Value::Opaque(b)) => {
                std::ptr::eq(Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ())
            }
            _ => false,
        }
    }
}

/// A map/set key with SameValueZero semantics: `NaN` equals `NaN`, `-0`
/// equals `+0`, aggregates compare by identity.
#[derive(Clone, Debug)]
pub struct ValueKey(pub Value);

impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Value::Number(a), Value::Number(b)) => {
                (a.is_nan() && b.is_nan()) || a == b || (*a == 0.0 && *b == 0.0)
            }
            _ => self.0.same_identity(&other.0),
        }
    }
}

impl Eq for ValueKey {}

impl Hash for ValueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.0 {
            Value::Undefined => 0u8.hash(state),
            Value::Null => 1u8.hash(state),
            Value::Bool(b) => {
                2u8.hash(state);
                b.hash(state);
            }
            Value::Number(n) => {
                3u8.hash(state);
                let normalized = if n.is_nan() {
                    f64::NAN.to_bits()
                } else if *n == 0.0 {
                    0f64.to_bits()
                } else {
                    n.to_bits()
                };
                normalized.hash(state);
            }
            Value::BigInt(b) => {
                4u8.hash(state);
                b.hash(state);
            }
            Value::Str(s) => {
                5u8.hash(state);
                s.hash(state);
            }
            Value::Symbol(s) => {
                6u8.hash(state);
                s.id.hash(state);
            }
            Value::Array(rc) => {
                7u8.hash(state);
                (Rc::as_ptr(rc) as usize).hash(state);
            }
            Value::Object(rc) => {
                8u8.hash(state);
                (Rc::as_ptr(rc) as usize).hash(state);
            }
            Value::Instance(rc) => {
                9u8.hash(state);
                (Rc::as_ptr(rc) as usize).hash(state);
            }
            Value::Class(rc) => {
                10u8.hash(state);
                (Rc::as_ptr(rc) as usize).hash(state);
            }
            Value::Function(rc) => {
                11u8.hash(state);
                (Rc::as_ptr(rc) as usize).hash(state);
            }
            Value::Bound(rc) => {
                12u8.hash(state);
                (Rc::as_ptr(rc) as usize).hash(state);
            }
            Value::Native(f) => {
                13u8.hash(state);
                (*f as *const NativeFn as usize).hash(state);
            }
            Value::NativeMethod(rc) => {
                14u8.hash(state);
                (Rc::as_ptr(rc) as usize).hash(state);
            }
            Value::Promise(rc) => {
                15u8.hash(state);
                (Rc::as_ptr(rc) as usize).hash(state);
            }
            Value::Generator(rc) => {
                16u8.hash(state);
                (Rc::as_ptr(rc) as usize).hash(state);
            }
            Value::Map(rc) => {
                17u8.hash(state);
                (Rc::as_ptr(rc) as usize).hash(state);
            }
            Value::Set(rc) => {
                18u8.hash(state);
                (Rc::as_ptr(rc) as usize).hash(state);
            }
            Value::Regex(rc) => {
                19u8.hash(state);
                (Rc::as_ptr(rc) as usize).hash(state);
            }
            Value::Date(rc) => {
                20u8.hash(state);
                (Rc::as_ptr(rc) as usize).hash(state);
            }
            Value::Opaque(rc) => {
                21u8.hash(state);
                (Rc::as_ptr(rc) as *const () as usize).hash(state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_key_treats_nan_as_equal() {
        assert_eq!(ValueKey(Value::Number(f64::NAN)), ValueKey(Value::Number(f64::NAN)));
    }

    #[test]
    fn value_key_merges_signed_zero() {
        assert_eq!(ValueKey(Value::Number(0.0)), ValueKey(Value::Number(-0.0)));
    }

    #[test]
    fn aggregates_compare_by_identity() {
        let a = Value::array(vec![Value::Number(1.0)]);
        let b = Value::array(vec![Value::Number(1.0)]);
        assert!(!a.same_identity(&b));
        assert!(a.same_identity(&a.clone()));
    }
}
