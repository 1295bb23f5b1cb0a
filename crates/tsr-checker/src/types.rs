//! Semantic type representation.
//!
//! A closed tagged variant shared behind `Rc` handles. Class and interface
//! types use interior-mutable member tables so the signature-collection pass
//! can fill them in while forward references already point at them; the
//! body-checking pass freezes them (`ClassType::freeze`) and from then on the
//! tables are never written again.
//!
//! Invariants:
//! - union member lists are flat (no nested unions) and deduplicated;
//! - literal types widen to their primitive when unified with it;
//! - `never` is the bottom type, `unknown` the top, `any` both.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxHashSet;

pub type TypeRef = Rc<Type>;

/// A function parameter type.
#[derive(Clone, Debug)]
pub struct ParamType {
    pub name: String,
    pub ty: TypeRef,
    pub optional: bool,
    pub rest: bool,
}

/// A generic type parameter declaration.
#[derive(Clone, Debug)]
pub struct TypeParamInfo {
    pub name: String,
    pub constraint: Option<TypeRef>,
    pub default: Option<TypeRef>,
}

/// A function or method type.
#[derive(Clone, Debug)]
pub struct FunctionType {
    pub type_params: Vec<TypeParamInfo>,
    pub params: Vec<ParamType>,
    pub ret: TypeRef,
    /// Number of leading parameters without defaults/optional markers.
    pub required: usize,
    pub has_rest: bool,
    pub this_type: Option<TypeRef>,
    /// `param is T` — user-defined type guard.
    pub predicate: Option<(String, TypeRef)>,
    pub is_async: bool,
    pub is_generator: bool,
}

impl FunctionType {
    pub fn simple(params: Vec<ParamType>, ret: TypeRef) -> Self {
        let required = params.iter().filter(|p| !p.optional && !p.rest).count();
        let has_rest = params.iter().any(|p| p.rest);
        FunctionType {
            type_params: Vec::new(),
            params,
            ret,
            required,
            has_rest,
            this_type: None,
            predicate: None,
            is_async: false,
            is_generator: false,
        }
    }
}

/// A class member entry.
#[derive(Clone, Debug)]
pub struct MemberInfo {
    pub ty: TypeRef,
    pub readonly: bool,
    pub optional: bool,
}

/// A class type: instance shape plus static side.
///
/// During signature collection the tables are filled through `RefCell`s; the
/// frozen flag flips before body checking and nothing writes afterwards.
#[derive(Debug)]
pub struct ClassType {
    pub name: String,
    pub type_params: Vec<TypeParamInfo>,
    pub superclass: RefCell<Option<TypeRef>>,
    pub ctor: RefCell<Option<Rc<FunctionType>>>,
    pub fields: RefCell<IndexMap<String, MemberInfo>>,
    pub methods: RefCell<IndexMap<String, TypeRef>>,
    pub getters: RefCell<IndexMap<String, TypeRef>>,
    pub setters: RefCell<IndexMap<String, TypeRef>>,
    pub statics: RefCell<IndexMap<String, TypeRef>>,
    pub is_abstract: bool,
    frozen: Cell<bool>,
}

impl ClassType {
    pub fn thawed(name: String, type_params: Vec<TypeParamInfo>, is_abstract: bool) -> Rc<Self> {
        Rc::new(ClassType {
            name,
            type_params,
            superclass: RefCell::new(None),
            ctor: RefCell::new(None),
            fields: RefCell::new(IndexMap::new()),
            methods: RefCell::new(IndexMap::new()),
            getters: RefCell::new(IndexMap::new()),
            setters: RefCell::new(IndexMap::new()),
            statics: RefCell::new(IndexMap::new()),
            is_abstract,
            frozen: Cell::new(false),
        })
    }

    pub fn freeze(&self) {
        self.frozen.set(true);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.get()
    }

    /// The constructor signature, walking the superclass chain.
    pub fn constructor(&self) -> Option<Rc<FunctionType>> {
        if let Some(ctor) = self.ctor.borrow().as_ref() {
            return Some(Rc::clone(ctor));
        }
        if let Some(superclass) = self.superclass.borrow().as_ref() {
            if let Type::Class(parent) | Type::MutableClass(parent) = superclass.as_ref() {
                return parent.constructor();
            }
        }
        None
    }

    /// Look up an instance member (field, method, getter) through the
    /// superclass chain.
    pub fn instance_member(&self, name: &str) -> Option<TypeRef> {
        if let Some(info) = self.fields.borrow().get(name) {
            return Some(info.ty.clone());
        }
        if let Some(ty) = self.methods.borrow().get(name) {
            return Some(ty.clone());
        }
        if let Some(ty) = self.getters.borrow().get(name) {
            return Some(ty.clone());
        }
        if let Some(superclass) = self.superclass.borrow().as_ref() {
            if let Type::Class(parent) | Type::MutableClass(parent) = superclass.as_ref() {
                return parent.instance_member(name);
            }
        }
        None
    }

    pub fn static_member(&self, name: &str) -> Option<TypeRef> {
        if let Some(ty) = self.statics.borrow().get(name) {
            return Some(ty.clone());
        }
        if let Some(superclass) = self.superclass.borrow().as_ref() {
            if let Type::Class(parent) | Type::MutableClass(parent) = superclass.as_ref() {
                return parent.static_member(name);
            }
        }
        None
    }

    /// Whether `self` is `other` or inherits from it.
    pub fn derives_from(&self, other: &ClassType) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        if let Some(superclass) = self.superclass.borrow().as_ref() {
            if let Type::Class(parent) | Type::MutableClass(parent) = superclass.as_ref() {
                return parent.derives_from(other);
            }
        }
        false
    }
}

/// An interface type.
#[derive(Debug)]
pub struct InterfaceType {
    pub name: String,
    pub type_params: Vec<TypeParamInfo>,
    pub members: RefCell<IndexMap<String, TypeRef>>,
    pub optional: RefCell<FxHashSet<String>>,
    pub extends: RefCell<Vec<TypeRef>>,
    pub string_index: RefCell<Option<TypeRef>>,
    pub number_index: RefCell<Option<TypeRef>>,
}

impl InterfaceType {
    pub fn thawed(name: String, type_params: Vec<TypeParamInfo>) -> Rc<Self> {
        Rc::new(InterfaceType {
            name,
            type_params,
            members: RefCell::new(IndexMap::new()),
            optional: RefCell::new(FxHashSet::default()),
            extends: RefCell::new(Vec::new()),
            string_index: RefCell::new(None),
            number_index: RefCell::new(None),
        })
    }

    /// Look up a member, walking extended interfaces.
    pub fn member(&self, name: &str) -> Option<TypeRef> {
        if let Some(ty) = self.members.borrow().get(name) {
            return Some(ty.clone());
        }
        for parent in self.extends.borrow().iter() {
            if let Type::Interface(parent) = parent.as_ref() {
                if let Some(ty) = parent.member(name) {
                    return Some(ty);
                }
            }
        }
        None
    }

    pub fn is_optional(&self, name: &str) -> bool {
        self.optional.borrow().contains(name)
    }

    /// All members including inherited, in declaration order.
    pub fn all_members(&self) -> IndexMap<String, TypeRef> {
        let mut out = IndexMap::new();
        for parent in self.extends.borrow().iter() {
            if let Type::Interface(parent) = parent.as_ref() {
                out.extend(parent.all_members());
            }
        }
        for (name, ty) in self.members.borrow().iter() {
            out.insert(name.clone(), ty.clone());
        }
        out
    }
}

/// Enum flavor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnumKind {
    Numeric,
    String,
    Heterogeneous,
    Const,
}

/// The resolved value of one enum member.
#[derive(Clone, Debug, PartialEq)]
pub enum EnumMemberValue {
    Number(f64),
    String(String),
}

#[derive(Debug)]
pub struct EnumType {
    pub name: String,
    pub kind: EnumKind,
    pub members: IndexMap<String, EnumMemberValue>,
}

/// A namespace: parallel tables of type and value exports.
#[derive(Debug, Default)]
pub struct NamespaceType {
    pub types: RefCell<IndexMap<String, TypeRef>>,
    pub values: RefCell<IndexMap<String, TypeRef>>,
}

/// The intrinsic string-manipulation operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntrinsicStringOp {
    Uppercase,
    Lowercase,
    Capitalize,
    Uncapitalize,
}

/// The semantic type of an expression or binding.
#[derive(Debug)]
pub enum Type {
    Any,
    Unknown,
    Never,
    Void,
    Null,
    Undefined,
    Number,
    String,
    Boolean,
    BigInt,
    Symbol,
    StringLiteral(String),
    NumberLiteral(f64),
    BooleanLiteral(bool),
    /// `` `a${T}b` ``; `strings.len() == types.len() + 1`.
    TemplateLiteral {
        strings: Vec<String>,
        types: Vec<TypeRef>,
    },
    /// Flattened, deduplicated member list.
    Union(Vec<TypeRef>),
    Intersection(Vec<TypeRef>),
    Array(TypeRef),
    Tuple {
        elems: Vec<TypeRef>,
        rest: Option<TypeRef>,
        required: usize,
    },
    /// An anonymous object shape (object literal / object type literal).
    Record {
        fields: IndexMap<String, TypeRef>,
        optional: FxHashSet<String>,
        string_index: Option<TypeRef>,
        number_index: Option<TypeRef>,
    },
    Function(Rc<FunctionType>),
    Interface(Rc<InterfaceType>),
    /// The class constructor value (`typeof C`).
    Class(Rc<ClassType>),
    /// An instance of a class (`C`).
    Instance(Rc<ClassType>),
    /// A still-thawed class during signature collection.
    MutableClass(Rc<ClassType>),
    /// A generic class/interface applied to type arguments, resolved lazily.
    InstantiatedGeneric {
        target: TypeRef,
        args: Vec<TypeRef>,
    },
    TypeParameter {
        name: String,
        constraint: Option<TypeRef>,
    },
    KeyOf(TypeRef),
    Mapped {
        param: String,
        constraint: TypeRef,
        value: TypeRef,
        /// `Some(true)` adds `?`, `Some(false)` strips it.
        optional: Option<bool>,
        readonly: Option<bool>,
    },
    IndexedAccess {
        object: TypeRef,
        index: TypeRef,
    },
    Conditional {
        check: TypeRef,
        extends: TypeRef,
        then_ty: TypeRef,
        else_ty: TypeRef,
        infer_params: Vec<String>,
    },
    IntrinsicString {
        op: IntrinsicStringOp,
        inner: TypeRef,
    },
    Enum(Rc<EnumType>),
    Namespace(Rc<NamespaceType>),
    Promise(TypeRef),
    Generator {
        yields: TypeRef,
        returns: TypeRef,
        next: TypeRef,
    },
    AsyncGenerator {
        yields: TypeRef,
        returns: TypeRef,
        next: TypeRef,
    },
    Iterator(TypeRef),
    Map(TypeRef, TypeRef),
    Set(TypeRef),
    WeakMap(TypeRef, TypeRef),
    WeakSet(TypeRef),
    RegExp,
}

impl Type {
    pub fn any() -> TypeRef {
        thread_local! {
            static ANY: TypeRef = Rc::new(Type::Any);
        }
        ANY.with(Rc::clone)
    }

    pub fn unknown() -> TypeRef {
        thread_local! {
            static UNKNOWN: TypeRef = Rc::new(Type::Unknown);
        }
        UNKNOWN.with(Rc::clone)
    }

    pub fn never() -> TypeRef {
        thread_local! {
            static NEVER: TypeRef = Rc::new(Type::Never);
        }
        NEVER.with(Rc::clone)
    }

    pub fn void() -> TypeRef {
        thread_local! {
            static VOID: TypeRef = Rc::new(Type::Void);
        }
        VOID.with(Rc::clone)
    }

    pub fn null() -> TypeRef {
        thread_local! {
            static NULL: TypeRef = Rc::new(Type::Null);
        }
        NULL.with(Rc::clone)
    }

    pub fn undefined() -> TypeRef {
        thread_local! {
            static UNDEFINED: TypeRef = Rc::new(Type::Undefined);
        }
        UNDEFINED.with(Rc::clone)
    }

    pub fn number() -> TypeRef {
        thread_local! {
            static NUMBER: TypeRef = Rc::new(Type::Number);
        }
        NUMBER.with(Rc::clone)
    }

    pub fn string() -> TypeRef {
        thread_local! {
            static STRING: TypeRef = Rc::new(Type::String);
        }
        STRING.with(Rc::clone)
    }

    pub fn boolean() -> TypeRef {
        thread_local! {
            static BOOLEAN: TypeRef = Rc::new(Type::Boolean);
        }
        BOOLEAN.with(Rc::clone)
    }

    pub fn bigint() -> TypeRef {
        thread_local! {
            static BIGINT: TypeRef = Rc::new(Type::BigInt);
        }
        BIGINT.with(Rc::clone)
    }

    pub fn symbol() -> TypeRef {
        thread_local! {
            static SYMBOL: TypeRef = Rc::new(Type::Symbol);
        }
        SYMBOL.with(Rc::clone)
    }

    /// Build a union, flattening nested unions, dropping `never`, and
    /// deduplicating. Literals collapse into an already-present primitive.
    pub fn union(members: Vec<TypeRef>) -> TypeRef {
        let mut flat: Vec<TypeRef> = Vec::new();
        let mut stack: Vec<TypeRef> = members.into_iter().rev().collect();
        while let Some(member) = stack.pop() {
            match member.as_ref() {
                Type::Union(inner) => stack.extend(inner.iter().rev().cloned()),
                Type::Never => {}
                Type::Any => return Type::any(),
                _ => {
                    if !flat.iter().any(|t| t.same_shape(&member)) {
                        flat.push(member);
                    }
                }
            }
        }
        // Literal absorption: `"a" | string` is `string`.
        let has_string = flat.iter().any(|t| matches!(t.as_ref(), Type::String));
        let has_number = flat.iter().any(|t| matches!(t.as_ref(), Type::Number));
        let has_boolean = flat.iter().any(|t| matches!(t.as_ref(), Type::Boolean));
        flat.retain(|t| match t.as_ref() {
            Type::StringLiteral(_) => !has_string,
            Type::NumberLiteral(_) => !has_number,
            Type::BooleanLiteral(_) => !has_boolean,
            _ => true,
        });
        match flat.len() {
            0 => Type::never(),
            1 => flat.pop().unwrap(),
            _ => Rc::new(Type::Union(flat)),
        }
    }

    pub fn intersection(members: Vec<TypeRef>) -> TypeRef {
        let mut flat: Vec<TypeRef> = Vec::new();
        for member in members {
            match member.as_ref() {
                Type::Intersection(inner) => flat.extend(inner.iter().cloned()),
                Type::Unknown => {}
                Type::Never => return Type::never(),
                _ => {
                    if !flat.iter().any(|t| t.same_shape(&member)) {
                        flat.push(member);
                    }
                }
            }
        }
        match flat.len() {
            0 => Type::unknown(),
            1 => flat.pop().unwrap(),
            _ => Rc::new(Type::Intersection(flat)),
        }
    }

    /// Widen a literal type to its primitive.
    pub fn widen(ty: &TypeRef) -> TypeRef {
        match ty.as_ref() {
            Type::StringLiteral(_) => Type::string(),
            Type::NumberLiteral(_) => Type::number(),
            Type::BooleanLiteral(_) => Type::boolean(),
            Type::Union(members) => Type::union(members.iter().map(Type::widen).collect()),
            _ => ty.clone(),
        }
    }

    /// Structural identity used for union deduplication. Conservative: two
    /// types with the same printed form and shallow shape are the same.
    pub fn same_shape(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Any, Type::Any)
            | (Type::Unknown, Type::Unknown)
            | (Type::Never, Type::Never)
            | (Type::Void, Type::Void)
            | (Type::Null, Type::Null)
            | (Type::Undefined, Type::Undefined)
            | (Type::Number, Type::Number)
            | (Type::String, Type::String)
            | (Type::Boolean, Type::Boolean)
            | (Type::BigInt, Type::BigInt)
            | (Type::Symbol, Type::Symbol)
            | (Type::RegExp, Type::RegExp) => true,
            (Type::StringLiteral(a), Type::StringLiteral(b)) => a == b,
            (Type::NumberLiteral(a), Type::NumberLiteral(b)) => a == b,
            (Type::BooleanLiteral(a), Type::BooleanLiteral(b)) => a == b,
            (Type::Array(a), Type::Array(b)) => a.same_shape(b),
            (Type::Promise(a), Type::Promise(b)) => a.same_shape(b),
            (Type::Set(a), Type::Set(b)) => a.same_shape(b),
            (Type::Map(ak, av), Type::Map(bk, bv)) => ak.same_shape(bk) && av.same_shape(bv),
            (Type::Instance(a), Type::Instance(b)) => Rc::ptr_eq(a, b),
            (Type::Class(a), Type::Class(b)) => Rc::ptr_eq(a, b),
            (Type::Interface(a), Type::Interface(b)) => Rc::ptr_eq(a, b),
            (Type::Enum(a), Type::Enum(b)) => Rc::ptr_eq(a, b),
            (Type::Function(a), Type::Function(b)) => Rc::ptr_eq(a, b),
            (Type::TypeParameter { name: a, .. }, Type::TypeParameter { name: b, .. }) => a == b,
            (Type::Union(a), Type::Union(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_shape(y))
            }
            _ => false,
        }
    }

    /// Whether `undefined`/`null` inhabit this type.
    pub fn is_nullish(&self) -> bool {
        match self {
            Type::Null | Type::Undefined | Type::Void => true,
            Type::Union(members) => members.iter().any(|m| m.is_nullish()),
            _ => false,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Type::StringLiteral(_) | Type::NumberLiteral(_) | Type::BooleanLiteral(_)
        )
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Any => write!(f, "any"),
            Type::Unknown => write!(f, "unknown"),
            Type::Never => write!(f, "never"),
            Type::Void => write!(f, "void"),
            Type::Null => write!(f, "null"),
            Type::Undefined => write!(f, "undefined"),
            Type::Number => write!(f, "number"),
            Type::String => write!(f, "string"),
            Type::Boolean => write!(f, "boolean"),
            Type::BigInt => write!(f, "bigint"),
            Type::Symbol => write!(f, "symbol"),
            Type::StringLiteral(s) => write!(f, "\"{s}\""),
            Type::NumberLiteral(n) => write!(f, "{n}"),
            Type::BooleanLiteral(b) => write!(f, "{b}"),
            Type::TemplateLiteral { strings, types } => {
                write!(f, "`")?;
                for (i, chunk) in strings.iter().enumerate() {
                    write!(f, "{chunk}")?;
                    if i < types.len() {
                        write!(f, "${{{}}}", types[i])?;
                    }
                }
                write!(f, "`")
            }
            Type::Union(members) => {
                let parts: Vec<String> = members.iter().map(|m| m.to_string()).collect();
                write!(f, "{}", parts.join(" | "))
            }
            Type::Intersection(members) => {
                let parts: Vec<String> = members.iter().map(|m| m.to_string()).collect();
                write!(f, "{}", parts.join(" & "))
            }
            Type::Array(elem) => write!(f, "{elem}[]"),
            Type::Tuple { elems, rest, .. } => {
                let mut parts: Vec<String> = elems.iter().map(|e| e.to_string()).collect();
                if let Some(rest) = rest {
                    parts.push(format!("...{rest}[]"));
                }
                write!(f, "[{}]", parts.join(", "))
            }
            Type::Record { fields, .. } => {
                let parts: Vec<String> =
                    fields.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                write!(f, "{{ {} }}", parts.join("; "))
            }
            Type::Function(func) => {
                let parts: Vec<String> = func
                    .params
                    .iter()
                    .map(|p| format!("{}: {}", p.name, p.ty))
                    .collect();
                write!(f, "({}) => {}", parts.join(", "), func.ret)
            }
            Type::Interface(i) => write!(f, "{}", i.name),
            Type::Class(c) | Type::MutableClass(c) => write!(f, "typeof {}", c.name),
            Type::Instance(c) => write!(f, "{}", c.name),
            Type::InstantiatedGeneric { target, args } => {
                let parts: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{target}<{}>", parts.join(", "))
            }
            Type::TypeParameter { name, .. } => write!(f, "{name}"),
            Type::KeyOf(inner) => write!(f, "keyof {inner}"),
            Type::Mapped { param, constraint, value, .. } => {
                write!(f, "{{ [{param} in {constraint}]: {value} }}")
            }
            Type::IndexedAccess { object, index } => write!(f, "{object}[{index}]"),
            Type::Conditional { check, extends, then_ty, else_ty, .. } => {
                write!(f, "{check} extends {extends} ? {then_ty} : {else_ty}")
            }
            Type::IntrinsicString { op, inner } => {
                let name = match op {
                    IntrinsicStringOp::Uppercase => "Uppercase",
                    IntrinsicStringOp::Lowercase => "Lowercase",
                    IntrinsicStringOp::Capitalize => "Capitalize",
                    IntrinsicStringOp::Uncapitalize => "Uncapitalize",
                };
                write!(f, "{name}<{inner}>")
            }
            Type::Enum(e) => write!(f, "{}", e.name),
            Type::Namespace(_) => write!(f, "namespace"),
            Type::Promise(inner) => write!(f, "Promise<{inner}>"),
            Type::Generator { yields, .. } => write!(f, "Generator<{yields}>"),
            Type::AsyncGenerator { yields, .. } => write!(f, "AsyncGenerator<{yields}>"),
            Type::Iterator(elem) => write!(f, "Iterator<{elem}>"),
            Type::Map(k, v) => write!(f, "Map<{k}, {v}>"),
            Type::Set(e) => write!(f, "Set<{e}>"),
            Type::WeakMap(k, v) => write!(f, "WeakMap<{k}, {v}>"),
            Type::WeakSet(e) => write!(f, "WeakSet<{e}>"),
            Type::RegExp => write!(f, "RegExp"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unions_flatten_and_dedupe() {
        let u = Type::union(vec![
            Type::number(),
            Type::union(vec![Type::string(), Type::number()]),
        ]);
        let Type::Union(members) = u.as_ref() else { panic!() };
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn union_absorbs_literals_into_primitive() {
        let u = Type::union(vec![Rc::new(Type::StringLiteral("a".into())), Type::string()]);
        assert!(matches!(u.as_ref(), Type::String));
    }

    #[test]
    fn never_drops_out_of_unions() {
        let u = Type::union(vec![Type::never(), Type::number()]);
        assert!(matches!(u.as_ref(), Type::Number));
    }

    #[test]
    fn empty_union_is_never() {
        let u = Type::union(vec![]);
        assert!(matches!(u.as_ref(), Type::Never));
    }

    #[test]
    fn widening_maps_literals_to_primitives() {
        let lit: TypeRef = Rc::new(Type::NumberLiteral(3.0));
        assert!(matches!(Type::widen(&lit).as_ref(), Type::Number));
    }

    #[test]
    fn display_renders_function_types() {
        let f = Type::Function(Rc::new(FunctionType::simple(
            vec![ParamType { name: "x".into(), ty: Type::number(), optional: false, rest: false }],
            Type::string(),
        )));
        assert_eq!(f.to_string(), "(x: number) => string");
    }
}
