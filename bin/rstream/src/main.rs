#![deny(unsafe_code)]

use std::process::ExitCode;

use clap::Parser;
use cli::Args;

fn main() -> ExitCode {
    let args = Args::parse();
    cli::run(args).into()
}
