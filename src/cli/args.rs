//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::path::PathBuf;

/// kiln build core CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Enable verbose diagnostics
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project root (default: current directory)
    #[arg(short = 'C', long, value_hint = clap::ValueHint::DirPath)]
    pub root: Option<PathBuf>,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Compile the project into .kiln/
    #[command(visible_alias = "b")]
    Build {
        /// Build in development mode (source maps off by default)
        #[arg(short, long)]
        dev: bool,

        /// External checker command to run over stale units before
        /// compiling (e.g. "tsc --noEmit")
        #[arg(long)]
        check: Option<String>,
    },
}
