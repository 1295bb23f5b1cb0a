//! Completion records.
//!
//! The abstract completion of a statement: normal, or one of the abrupt
//! kinds. `return`/`break`/`continue`/`throw` propagate outward as values of
//! this enum; the construct that owns the jump consumes it and everything
//! else passes it through unchanged.

use tsr_runtime::Value;

#[derive(Debug)]
pub enum Completion {
    Normal,
    Return(Value),
    Break(Option<String>),
    Continue(Option<String>),
    Throw(Value),
}

impl Completion {
    pub fn is_abrupt(&self) -> bool {
        !matches!(self, Completion::Normal)
    }

    /// Whether an unlabeled loop should consume this break.
    pub fn is_loop_break(&self, label: Option<&str>) -> bool {
        match self {
            Completion::Break(None) => label.is_none(),
            Completion::Break(Some(l)) => label == Some(l.as_str()),
            _ => false,
        }
    }

    /// Whether a loop should consume this continue and advance.
    pub fn is_loop_continue(&self, label: Option<&str>) -> bool {
        match self {
            Completion::Continue(None) => true,
            Completion::Continue(Some(l)) => label == Some(l.as_str()),
            _ => false,
        }
    }
}

/// Shorthand used by the statement executors: propagate abrupt completions.
macro_rules! propagate {
    ($completion:expr) => {{
        let completion = $completion;
        if completion.is_abrupt() {
            return completion;
        }
    }};
}
pub(crate) use propagate;

/// Convert an expression failure into a throw completion.
macro_rules! throw_on_err {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(error) => return crate::completion::Completion::Throw(error),
        }
    };
}
pub(crate) use throw_on_err;
