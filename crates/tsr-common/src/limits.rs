//! Centralized limits and thresholds.
//!
//! Recursive type-operator evaluation and deeply nested source both need
//! bounds so a pathological program fails with a diagnostic instead of
//! blowing the stack.

/// Maximum depth for evaluating computed type operators (mapped, conditional,
/// indexed access). Matches the order of magnitude real-world types need.
pub const MAX_TYPE_INSTANTIATION_DEPTH: u32 = 64;

/// Maximum nesting depth the parser accepts for expressions and statements.
pub const MAX_PARSE_DEPTH: u32 = 512;

/// Maximum call depth for the interpreter before raising a range error.
pub const MAX_CALL_DEPTH: u32 = 1024;

/// Maximum number of loop iterations the const-enum evaluator will fold.
pub const MAX_CONST_FOLD_OPS: u32 = 10_000;
