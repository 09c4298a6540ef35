//! kiln - incremental build core for a server-rendered web framework.

mod build;
mod checksum;
mod cli;
mod compiler;
mod config;
mod core;
mod logger;
mod manifest;
mod pipeline;
mod route;
mod unit;

use clap::{ColorChoice, Parser};
use cli::Cli;

fn main() {
    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }

    logger::set_verbose(cli.verbose);

    if let Err(e) = cli::run(&cli) {
        log!("error"; "{:#}", e);
        std::process::exit(1);
    }
}
