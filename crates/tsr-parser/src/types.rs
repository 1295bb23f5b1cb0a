//! Syntactic type annotations.
//!
//! Annotations parse into a `TypeExpr` tree that the checker resolves against
//! its environment; the parser never interprets them.

/// A type parameter declaration: `T`, `T extends U`, `T = Default`.
#[derive(Clone, Debug)]
pub struct TypeParamDecl {
    pub name: String,
    pub constraint: Option<TypeExpr>,
    pub default: Option<TypeExpr>,
}

/// One member of a tuple type.
#[derive(Clone, Debug)]
pub struct TupleMember {
    pub ty: TypeExpr,
    pub optional: bool,
    pub rest: bool,
}

/// One member of an object type literal.
#[derive(Clone, Debug)]
pub enum TypeMember {
    Property {
        name: String,
        ty: TypeExpr,
        optional: bool,
        readonly: bool,
    },
    StringIndex(Box<TypeExpr>),
    NumberIndex(Box<TypeExpr>),
}

/// A parameter of a function type.
#[derive(Clone, Debug)]
pub struct TypeFnParam {
    pub name: String,
    pub ty: TypeExpr,
    pub optional: bool,
    pub rest: bool,
}

/// A syntactic type annotation.
#[derive(Clone, Debug)]
pub enum TypeExpr {
    /// `Name` or `Name<Args>`; primitives (`string`, `number`, ...) arrive
    /// here by name, as do `any`/`unknown`/`never`/`void`.
    Named {
        name: String,
        args: Vec<TypeExpr>,
    },
    /// `A.B.C` — a qualified name (namespace or enum member type).
    Qualified {
        parts: Vec<String>,
        args: Vec<TypeExpr>,
    },
    Union(Vec<TypeExpr>),
    Intersection(Vec<TypeExpr>),
    Array(Box<TypeExpr>),
    Tuple(Vec<TupleMember>),
    Function {
        params: Vec<TypeFnParam>,
        ret: Box<TypeExpr>,
    },
    ObjectLiteral(Vec<TypeMember>),
    /// `{ [K in Keys]: V }` with optional `+/-?` and `+/-readonly` modifiers.
    Mapped {
        param: String,
        constraint: Box<TypeExpr>,
        value: Box<TypeExpr>,
        /// `Some(true)` adds `?`, `Some(false)` removes it.
        optional: Option<bool>,
        readonly: Option<bool>,
    },
    StringLiteral(String),
    NumberLiteral(f64),
    BooleanLiteral(bool),
    /// `` `a${T}b` `` — literal chunks interleaved with interpolated types;
    /// `strings.len() == types.len() + 1`.
    TemplateLiteral {
        strings: Vec<String>,
        types: Vec<TypeExpr>,
    },
    KeyOf(Box<TypeExpr>),
    /// `typeof x`
    TypeQuery(String),
    IndexedAccess {
        object: Box<TypeExpr>,
        index: Box<TypeExpr>,
    },
    Conditional {
        check: Box<TypeExpr>,
        extends: Box<TypeExpr>,
        then_ty: Box<TypeExpr>,
        else_ty: Box<TypeExpr>,
    },
    /// `infer R` inside the extends clause of a conditional type.
    Infer(String),
    /// `x is T` in a return-type position.
    Predicate {
        param: String,
        ty: Box<TypeExpr>,
    },
    Paren(Box<TypeExpr>),
}

impl TypeExpr {
    /// A bare named type with no arguments.
    pub fn named(name: impl Into<String>) -> Self {
        TypeExpr::Named {
            name: name.into(),
            args: Vec::new(),
        }
    }
}
