//! CLI surface: argument definitions and command dispatch.

mod args;
mod build;

pub use args::{Cli, Commands};

use anyhow::Result;

pub fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Build { dev, check } => {
            build::run(cli.root.as_ref(), *dev, check.as_deref())
        }
    }
}
