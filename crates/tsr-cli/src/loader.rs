//! Module loading.
//!
//! Imports resolve relative to the importing file (adding `.ts` when the
//! path has no extension) or through the optional project manifest. Each
//! module is parsed, checked and evaluated once; its exports become a
//! namespace object registered with the interpreter under the path exactly
//! as it was written, so the `import` statements find it at run time.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{anyhow, bail, Context as _, Result};
use rustc_hash::FxHashSet;
use serde::Deserialize;
use tracing::debug;

use tsr_checker::Checker;
use tsr_interpreter::Interpreter;
use tsr_parser::ast::{Stmt, StmtKind};
use tsr_parser::Parser;
use tsr_runtime::error::{error_message, error_name};

/// The optional project manifest (`tsr.json`) next to the entry file.
#[derive(Debug, Default, Deserialize)]
pub struct ProjectManifest {
    pub name: Option<String>,
    pub version: Option<String>,
    pub main: Option<String>,
}

impl ProjectManifest {
    pub fn load_near(file: &Path) -> Option<ProjectManifest> {
        let dir = file.parent()?;
        let manifest = dir.join("tsr.json");
        let text = std::fs::read_to_string(manifest).ok()?;
        serde_json::from_str(&text).ok()
    }
}

pub struct Loader {
    visiting: FxHashSet<PathBuf>,
    loaded: FxHashSet<PathBuf>,
}

impl Default for Loader {
    fn default() -> Self {
        Loader::new()
    }
}

impl Loader {
    pub fn new() -> Self {
        Loader {
            visiting: FxHashSet::default(),
            loaded: FxHashSet::default(),
        }
    }

    /// Parse and check one file, returning its statements.
    pub fn parse_and_check(path: &Path) -> Result<(String, Vec<Stmt>)> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read '{}'", path.display()))?;
        let stmts = Parser::parse_source(&source)
            .map_err(|d| anyhow!("{}: {d}", path.display()))?;
        if let Err(diags) = Checker::new(&source).check_program(&stmts) {
            let rendered = crate::driver::render_diagnostics(path, &source, &diags);
            bail!("{rendered}");
        }
        Ok((source, stmts))
    }

    /// Recursively evaluate the imports of `stmts` so the interpreter can
    /// bind them when the importing module runs.
    pub fn load_imports(
        &mut self,
        interp: &Interpreter,
        importer: &Path,
        stmts: &[Stmt],
    ) -> Result<()> {
        for stmt in stmts {
            let inner = match &stmt.kind {
                StmtKind::Export(inner) => inner.as_ref(),
                _ => stmt,
            };
            let StmtKind::Import { path, .. } = &inner.kind else { continue };
            let resolved = resolve_import(importer, path)?;
            if self.loaded.contains(&resolved) {
                // Evaluated before; re-register under this literal path.
                continue;
            }
            if !self.visiting.insert(resolved.clone()) {
                bail!(
                    "circular import: '{}' is already being loaded",
                    resolved.display()
                );
            }
            debug!(module = %resolved.display(), "loading module");
            let (_, module_stmts) = Self::parse_and_check(&resolved)?;
            self.load_imports(interp, &resolved, &module_stmts)?;
            let namespace = interp
                .run_module(Rc::new(module_stmts))
                .map_err(|error| {
                    anyhow!(
                        "error evaluating module '{}': {}: {}",
                        resolved.display(),
                        error_name(&error).unwrap_or_else(|| "Error".into()),
                        error_message(&error).unwrap_or_default()
                    )
                })?;
            interp.define_module(path, namespace);
            self.visiting.remove(&resolved);
            self.loaded.insert(resolved);
        }
        Ok(())
    }
}

/// Resolve an import path relative to the importing file, adding `.ts` when
/// no extension is present.
pub fn resolve_import(importer: &Path, import: &str) -> Result<PathBuf> {
    let base = importer.parent().unwrap_or_else(|| Path::new("."));
    let mut candidate = base.join(import);
    if candidate.extension().is_none() {
        candidate.set_extension("ts");
    }
    if candidate.exists() {
        return Ok(candidate);
    }
    bail!("cannot resolve module '{import}' from '{}'", importer.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_imports_gain_ts_extension() {
        let dir = tempfile::tempdir().unwrap();
        let module = dir.path().join("util.ts");
        std::fs::write(&module, "export const x = 1;").unwrap();
        let importer = dir.path().join("main.ts");
        std::fs::write(&importer, "import { x } from \"./util\";").unwrap();
        let resolved = resolve_import(&importer, "./util").unwrap();
        assert_eq!(resolved, module);
    }

    #[test]
    fn missing_modules_are_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let importer = dir.path().join("main.ts");
        std::fs::write(&importer, "").unwrap();
        assert!(resolve_import(&importer, "./missing").is_err());
    }
}
