//! CLI arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CLI arguments for the tsr binary.
#[derive(Parser, Debug)]
#[command(
    name = "tsr",
    version,
    about = "tsr - dual-mode engine for a statically typed superset of JavaScript"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose tracing output (equivalent to TSR_LOG=debug).
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Interpret a source file (or execute a compiled module).
    Run {
        file: PathBuf,
    },
    /// Lower a source file to a binary module.
    Compile {
        file: PathBuf,
        /// Output path (defaults to the input with a `.tsrb` extension).
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Type-check a source file without running it.
    Check {
        file: PathBuf,
    },
    /// Wrap a compiled module for distribution.
    Pack {
        /// The compiled module (`.tsrb`).
        module: PathBuf,
        /// Package identifier; letters, digits, `.`, `_`, `-` only.
        #[arg(long = "package-id")]
        package_id: Option<String>,
        /// Semantic version for the package.
        #[arg(long)]
        version: Option<String>,
        /// Output path (defaults to `<id>-<version>.tsrpkg`).
        #[arg(long)]
        out: Option<PathBuf>,
    },
}
