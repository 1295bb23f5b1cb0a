//! Common types and utilities for the tsr engine.
//!
//! This crate provides foundational types used across all tsr crates:
//! - Source spans (`Span`) and line/column translation (`LineMap`)
//! - Diagnostics (`Diagnostic`, `DiagnosticCode`, `DiagnosticCategory`)
//! - Engine limits and thresholds

pub mod diagnostics;
pub mod limits;
pub mod position;
pub mod span;

pub use diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticCode};
pub use position::{LineCol, LineMap};
pub use span::Span;
