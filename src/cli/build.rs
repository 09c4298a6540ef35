//! `kiln build` command.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::build::check::{CommandCheck, NoCheck, StaticCheck};
use crate::build::{BuildOptions, build};
use crate::core::BuildMode;

pub fn run(root: Option<&PathBuf>, dev: bool, check: Option<&str>) -> Result<()> {
    let root = match root {
        Some(root) => root.clone(),
        None => env::current_dir().context("failed to resolve current directory")?,
    };

    let options = BuildOptions {
        mode: if dev {
            BuildMode::Development
        } else {
            BuildMode::Production
        },
        checker: checker_from(check),
    };

    build(&root, &options)?;
    Ok(())
}

/// Parse a `--check` command line into a checker.
fn checker_from(check: Option<&str>) -> Box<dyn StaticCheck> {
    let Some(command) = check else {
        return Box::new(NoCheck);
    };

    let mut parts = command.split_whitespace().map(str::to_string);
    match parts.next() {
        Some(program) => Box::new(CommandCheck {
            program,
            args: parts.collect(),
        }),
        None => Box::new(NoCheck),
    }
}
