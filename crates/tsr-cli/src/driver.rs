//! Phase orchestration for the CLI verbs.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{anyhow, Context as _, Result};
use colored::Colorize;
use tracing::debug;

use tsr_checker::Checker;
use tsr_common::{Diagnostic, LineMap};
use tsr_emitter::{Compiler, Module, Vm};
use tsr_interpreter::Interpreter;
use tsr_parser::Parser;
use tsr_runtime::error::{error_message, error_name};
use tsr_runtime::ops::to_display_string;
use tsr_runtime::{Output, Value};

use crate::args::Command;
use crate::loader::Loader;
use crate::pack;

/// Extension of compiled binary modules.
pub const MODULE_EXT: &str = "tsrb";

pub struct Driver;

impl Default for Driver {
    fn default() -> Self {
        Driver::new()
    }
}

impl Driver {
    pub fn new() -> Self {
        Driver
    }

    /// Run one verb; returns the process exit code.
    pub fn dispatch(&self, command: Command) -> i32 {
        let result = match command {
            Command::Run { file } => self.run(&file),
            Command::Compile { file, out } => self.compile(&file, out.as_deref()),
            Command::Check { file } => self.check(&file),
            Command::Pack { module, package_id, version, out } => {
                pack::pack(&module, package_id.as_deref(), version.as_deref(), out.as_deref())
            }
        };
        match result {
            Ok(()) => 0,
            Err(error) => {
                eprintln!("{} {error:#}", "error:".red().bold());
                1
            }
        }
    }

    /// `run`: interpret source, or execute an already-compiled module.
    pub fn run(&self, file: &Path) -> Result<()> {
        if file.extension().is_some_and(|e| e == MODULE_EXT) {
            return self.run_compiled(file);
        }
        let (_, stmts) = Loader::parse_and_check(file)?;
        let interp = Interpreter::new(Rc::new(Output::stdout()));
        let mut loader = Loader::new();
        loader.load_imports(&interp, file, &stmts)?;
        debug!(file = %file.display(), "interpreting");
        interp
            .run_program(Rc::new(stmts))
            .map_err(|error| anyhow!("{}", render_runtime_error(&error)))
    }

    fn run_compiled(&self, file: &Path) -> Result<()> {
        let bytes = std::fs::read(file)
            .with_context(|| format!("cannot read '{}'", file.display()))?;
        let module = Module::from_bytes(&bytes)
            .map_err(|e| anyhow!("'{}' is not a valid module: {e}", file.display()))?;
        debug!(file = %file.display(), "executing compiled module");
        let vm = Vm::new(Rc::new(Output::stdout()));
        vm.run_module(module)
            .map_err(|error| anyhow!("{}", render_runtime_error(&error)))
    }

    /// `check`: type-check only.
    pub fn check(&self, file: &Path) -> Result<()> {
        let source = std::fs::read_to_string(file)
            .with_context(|| format!("cannot read '{}'", file.display()))?;
        let stmts = Parser::parse_source(&source)
            .map_err(|d| anyhow!("{}", render_diagnostics(file, &source, &[d])))?;
        match Checker::new(&source).check_program(&stmts) {
            Ok(_) => Ok(()),
            Err(diags) => Err(anyhow!("{}", render_diagnostics(file, &source, &diags))),
        }
    }

    /// `compile`: lower to the binary module container.
    pub fn compile(&self, file: &Path, out: Option<&Path>) -> Result<()> {
        let source = std::fs::read_to_string(file)
            .with_context(|| format!("cannot read '{}'", file.display()))?;
        let stmts = Parser::parse_source(&source)
            .map_err(|d| anyhow!("{}", render_diagnostics(file, &source, &[d])))?;
        let checked = Checker::new(&source)
            .check_program(&stmts)
            .map_err(|diags| anyhow!("{}", render_diagnostics(file, &source, &diags)))?;
        let module = Compiler::new(Some(&checked))
            .compile_program(&stmts)
            .map_err(|d| anyhow!("{}", render_diagnostics(file, &source, &[d])))?;
        let out: PathBuf = match out {
            Some(out) => out.to_path_buf(),
            None => file.with_extension(MODULE_EXT),
        };
        let bytes = module.to_bytes().context("serializing module")?;
        std::fs::write(&out, bytes)
            .with_context(|| format!("cannot write '{}'", out.display()))?;
        debug!(out = %out.display(), "module written");
        Ok(())
    }
}

/// Render frontend diagnostics with 1-based line/column.
pub fn render_diagnostics(file: &Path, source: &str, diags: &[Diagnostic]) -> String {
    let line_map = LineMap::new(source);
    let mut out = String::new();
    for (i, diag) in diags.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if diag.span.is_dummy() {
            out.push_str(&format!("{}: {}", file.display(), diag));
        } else {
            let at = line_map.line_col(diag.span.start);
            out.push_str(&format!("{}:{}:{}: {}", file.display(), at.line, at.col, diag));
        }
    }
    out
}

/// Render an uncaught runtime error: error class plus message for
/// error-shaped values, the stringified value otherwise, with the source
/// line when known.
pub fn render_runtime_error(error: &Value) -> String {
    match (error_name(error), error_message(error)) {
        (Some(name), Some(message)) => {
            let line = match error {
                Value::Object(obj) => obj
                    .props
                    .borrow()
                    .get("line")
                    .and_then(|v| v.as_number())
                    .map(|n| n as u32),
                _ => None,
            };
            match line {
                Some(line) => format!("Uncaught {name}: {message} (line {line})"),
                None => format!("Uncaught {name}: {message}"),
            }
        }
        _ => format!("Uncaught {}", to_display_string(error)),
    }
}
