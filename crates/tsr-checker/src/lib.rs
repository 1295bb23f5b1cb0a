//! Static type checker for the tsr engine.
//!
//! Two passes over top-level declarations: a signature-collection pass that
//! introduces class/interface/enum/function headers (classes as thawed
//! `MutableClass` entries so forward references and mutual recursion
//! resolve), then a body-checking pass that freezes signatures and checks
//! bodies. The output is a `TypeMap` from expression nodes to resolved types,
//! consumed by both backends.

pub mod checker;
pub mod env;
pub mod type_map;
pub mod types;

pub use checker::Checker;
pub use env::TypeEnv;
pub use type_map::TypeMap;
pub use types::{
    ClassType, EnumKind, EnumMemberValue, EnumType, FunctionType, InterfaceType, IntrinsicStringOp,
    MemberInfo, NamespaceType, ParamType, Type, TypeParamInfo, TypeRef,
};
