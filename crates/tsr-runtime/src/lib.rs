//! Runtime value model, built-in registry and cooperative scheduler.
//!
//! Everything both backends share lives here: the tagged `Value` variant,
//! the runtime scope chain, the operator helpers (`ops`) that define the
//! language's dynamic semantics, the process-wide built-in registry, the
//! member dispatch for built-in receivers, and the single-threaded event
//! loop with its microtask/timer discipline.
//!
//! The backends plug in through the `Engine` trait: built-ins and promise
//! reactions re-enter user code through it, so the interpreter and the VM
//! get identical observable behavior.

pub mod builtins;
pub mod coroutine;
pub mod env;
pub mod error;
pub mod members;
pub mod ops;
pub mod output;
pub mod scheduler;
pub mod value;

use std::future::Future;
use std::pin::Pin;

pub use env::RuntimeEnv;
pub use error::{throw_error, throw_range_error, throw_type_error};
pub use output::Output;
pub use scheduler::Scheduler;
pub use value::{
    ClassValue, Coroutine, FunctionValue, GenResume, GenStep, PromiseData, PromiseStatus, Value,
    ValueKey,
};

/// A thrown language value. Runtime failures, user throws and host errors
/// all travel this way and are caught by `try/catch`.
pub type RtResult<T> = Result<T, Value>;

/// Single-threaded boxed future used throughout the engine.
pub type LocalBoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Re-entry point for built-ins and promise reactions: both backends know
/// how to invoke a callable value.
pub trait Engine {
    /// Invoke `callee` with `this` and `args`. The returned future resolves
    /// immediately for synchronous callables and suspends only at `await`
    /// points inside async user code.
    fn call_value(&self, callee: Value, this: Value, args: Vec<Value>)
    -> LocalBoxFuture<'static, RtResult<Value>>;

    fn scheduler(&self) -> std::rc::Rc<Scheduler>;

    fn output(&self) -> std::rc::Rc<Output>;
}
