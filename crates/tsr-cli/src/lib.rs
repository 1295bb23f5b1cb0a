//! Command-line driver.
//!
//! Verbs: `run` (interpret a source file, or execute a compiled module),
//! `compile` (lower to the binary module container), `check` (type-check
//! only), `pack` (wrap a compiled module for distribution). Exit code 0 on
//! success, 1 on any parse/type/runtime error.

pub mod args;
pub mod driver;
pub mod loader;
pub mod pack;
pub mod trace;

pub use args::{Cli, Command};
pub use driver::Driver;
