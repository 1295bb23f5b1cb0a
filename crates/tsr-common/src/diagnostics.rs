//! Diagnostic types shared by the scanner, parser and checker.
//!
//! A diagnostic carries a stable code, a category, a human-readable message
//! and the span it points at. The CLI translates spans to line/column with a
//! `LineMap` when printing.

use serde::Serialize;

use crate::span::Span;

/// Diagnostic category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DiagnosticCategory {
    Error,
    Warning,
}

/// Stable diagnostic codes.
///
/// Lexer and parse codes abort before checking; type codes abort before
/// execution. Runtime failures are language-level throwables and never
/// surface as `Diagnostic`s.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DiagnosticCode {
    // Scanner
    UnterminatedString,
    UnterminatedTemplate,
    UnterminatedRegex,
    UnterminatedComment,
    MalformedNumber,
    UnknownCharacter,
    // Parser
    SyntaxError,
    DuplicateParameter,
    InvalidLabel,
    InvalidAssignmentTarget,
    // Checker
    TypeError,
    UndefinedVariable,
    DuplicateIdentifier,
    ExcessProperty,
    NotCallable,
    ArityMismatch,
    UnknownProperty,
    EnumError,
    AbstractInstantiation,
    UnreachableCode,
}

impl DiagnosticCode {
    /// The name printed in CLI output, e.g. `TypeError`.
    pub fn name(&self) -> &'static str {
        match self {
            DiagnosticCode::UnterminatedString => "UnterminatedString",
            DiagnosticCode::UnterminatedTemplate => "UnterminatedTemplate",
            DiagnosticCode::UnterminatedRegex => "UnterminatedRegex",
            DiagnosticCode::UnterminatedComment => "UnterminatedComment",
            DiagnosticCode::MalformedNumber => "MalformedNumber",
            DiagnosticCode::UnknownCharacter => "UnknownCharacter",
            DiagnosticCode::SyntaxError => "SyntaxError",
            DiagnosticCode::DuplicateParameter => "DuplicateParameter",
            DiagnosticCode::InvalidLabel => "InvalidLabel",
            DiagnosticCode::InvalidAssignmentTarget => "InvalidAssignmentTarget",
            DiagnosticCode::TypeError => "TypeError",
            DiagnosticCode::UndefinedVariable => "UndefinedVariable",
            DiagnosticCode::DuplicateIdentifier => "DuplicateIdentifier",
            DiagnosticCode::ExcessProperty => "ExcessProperty",
            DiagnosticCode::NotCallable => "NotCallable",
            DiagnosticCode::ArityMismatch => "ArityMismatch",
            DiagnosticCode::UnknownProperty => "UnknownProperty",
            DiagnosticCode::EnumError => "EnumError",
            DiagnosticCode::AbstractInstantiation => "AbstractInstantiation",
            DiagnosticCode::UnreachableCode => "UnreachableCode",
        }
    }
}

/// A diagnostic produced by the frontend.
#[derive(Clone, Debug, Serialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub category: DiagnosticCategory,
    pub message: String,
    pub span: Span,
}

impl Diagnostic {
    pub fn error(code: DiagnosticCode, message: impl Into<String>, span: Span) -> Self {
        Diagnostic {
            code,
            category: DiagnosticCategory::Error,
            message: message.into(),
            span,
        }
    }

    pub fn warning(code: DiagnosticCode, message: impl Into<String>, span: Span) -> Self {
        Diagnostic {
            code,
            category: DiagnosticCategory::Warning,
            message: message.into(),
            span,
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.name(), self.message)
    }
}

impl std::error::Error for Diagnostic {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_name() {
        let d = Diagnostic::error(
            DiagnosticCode::UndefinedVariable,
            "undefined variable 'x'",
            Span::new(0, 1),
        );
        assert_eq!(d.to_string(), "UndefinedVariable: undefined variable 'x'");
    }
}
