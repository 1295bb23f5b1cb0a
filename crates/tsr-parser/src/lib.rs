//! Parser and AST types for the tsr engine.
//!
//! The parser is a recursive-descent parser with Pratt-style expression
//! precedence. It owns the desugarings both backends rely on agreeing:
//! destructuring parameters become synthetic `_paramN` bindings with a body
//! prologue, constructor parameter properties become `this.x = x` prologues,
//! and directive prologues mark functions strict.

pub mod ast;
pub mod parser;
pub mod types;

pub use ast::{
    AccessModifier, BinaryOp, ClassDecl, ClassMember, EnumDecl, EnumMember, Expr, ExprKind,
    FunctionDecl, ImportSpec, InterfaceDecl, InterfaceMember, LogicalOp, NodeId, ObjectProp,
    Param, PropKey, Stmt, StmtKind, SwitchCase, UnaryOp,
};
pub use parser::Parser;
pub use types::{TypeExpr, TypeMember, TypeParamDecl, TupleMember};
