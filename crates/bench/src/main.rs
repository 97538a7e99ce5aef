//! Harness executable for kernelharness.

use anyhow::Result;
use clap::Parser;
use kernelharness_runner::cli::{run_cli, Cli};
use std::process::ExitCode;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    run_cli(cli)
}
