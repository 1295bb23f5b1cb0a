//! The packaging verb.
//!
//! Wraps a compiled module in a distributable bundle: a manifest
//! (package id, version, engine version) plus the module bytes, serialized
//! with the same binary container the compiler uses. Bundles also install
//! into the package cache; `TSR_PACKAGE_CACHE` overrides its location.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context as _, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use tsr_emitter::Module;

use crate::loader::ProjectManifest;

/// A distributable package: manifest plus the emitted module.
#[derive(Debug, Serialize, Deserialize)]
pub struct PackageBundle {
    pub package_id: String,
    pub version: String,
    pub engine: String,
    pub module: Vec<u8>,
}

pub const BUNDLE_EXT: &str = "tsrpkg";

pub fn pack(
    module_path: &Path,
    package_id: Option<&str>,
    version: Option<&str>,
    out: Option<&Path>,
) -> Result<()> {
    let manifest = ProjectManifest::load_near(module_path).unwrap_or_default();
    let package_id = package_id
        .map(str::to_string)
        .or(manifest.name)
        .ok_or_else(|| anyhow!("missing package id: pass --package-id or add a tsr.json manifest"))?;
    let version = version
        .map(str::to_string)
        .or(manifest.version)
        .ok_or_else(|| anyhow!("missing version: pass --version or add a tsr.json manifest"))?;

    validate_package_id(&package_id)?;
    let version = semver::Version::parse(&version)
        .map_err(|e| anyhow!("invalid version '{version}': {e}"))?;

    let bytes = std::fs::read(module_path)
        .with_context(|| format!("cannot read '{}'", module_path.display()))?;
    let module = Module::from_bytes(&bytes)
        .map_err(|e| anyhow!("'{}' is not a compiled module: {e}", module_path.display()))?;

    let bundle = PackageBundle {
        package_id: package_id.clone(),
        version: version.to_string(),
        engine: module.engine.clone(),
        module: bytes,
    };
    let encoded = postcard::to_allocvec(&bundle).context("serializing package")?;

    let out: PathBuf = match out {
        Some(out) => out.to_path_buf(),
        None => PathBuf::from(format!("{package_id}-{version}.{BUNDLE_EXT}")),
    };
    std::fs::write(&out, &encoded)
        .with_context(|| format!("cannot write '{}'", out.display()))?;

    // Install into the package cache as well.
    let cache = cache_dir();
    if std::fs::create_dir_all(&cache).is_ok() {
        let cached = cache.join(format!("{package_id}-{version}.{BUNDLE_EXT}"));
        let _ = std::fs::write(cached, &encoded);
    }
    debug!(package = %package_id, version = %version, out = %out.display(), "packaged");
    Ok(())
}

/// The package cache directory; `TSR_PACKAGE_CACHE` overrides the default.
pub fn cache_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TSR_PACKAGE_CACHE") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".tsr").join("packages")
}

/// Package identifiers: letters, digits, `.`, `_`, `-`; no leading or
/// trailing dot; no `..`.
pub fn validate_package_id(id: &str) -> Result<()> {
    if id.is_empty() {
        bail!("package id must not be empty");
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        bail!("package id '{id}' contains invalid characters");
    }
    if id.starts_with('.') || id.ends_with('.') {
        bail!("package id '{id}' must not start or end with '.'");
    }
    if id.contains("..") {
        bail!("package id '{id}' must not contain '..'");
    }
    Ok(())
}

/// Read a bundle back (used by tests and future install verbs).
pub fn read_bundle(path: &Path) -> Result<PackageBundle> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("cannot read '{}'", path.display()))?;
    postcard::from_bytes(&bytes).map_err(|e| anyhow!("'{}' is not a package: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_id_rules() {
        assert!(validate_package_id("my.package-1_x").is_ok());
        assert!(validate_package_id("").is_err());
        assert!(validate_package_id(".leading").is_err());
        assert!(validate_package_id("trailing.").is_err());
        assert!(validate_package_id("a..b").is_err());
        assert!(validate_package_id("with space").is_err());
        assert!(validate_package_id("path/sep").is_err());
    }

    #[test]
    fn versions_must_be_semver() {
        assert!(semver::Version::parse("1.2.3").is_ok());
        assert!(semver::Version::parse("1.2.3-beta.1").is_ok());
        assert!(semver::Version::parse("not-a-version").is_err());
        assert!(semver::Version::parse("1.2").is_err());
    }
}
