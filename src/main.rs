//! Main entry point for the streamarch CLI app

use std::fs::File;
use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use streamarch::cli::{Args, Command};
use streamarch::fsx::FileIdentity;
use streamarch::{create_archive, extract_archive, list_archive, ArchiverError};

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(e) = run_app(args) {
        eprintln!("streamarch: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// Diagnostics go to stderr so they never mix with an archive on stdout.
/// `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run_app(args: Args) -> Result<(), ArchiverError> {
    match args.into_command()? {
        Command::Create { roots, output, mut config } => {
            let summary = match output {
                Some(path) => {
                    let file = File::create(&path).map_err(|e| ArchiverError::io(e, &path))?;
                    config.skip_identity = file.metadata().ok().and_then(|m| FileIdentity::of(&m));
                    create_archive(&roots, file, &config)?
                }
                None => {
                    config.skip_identity = FileIdentity::of_stdout();
                    create_archive(&roots, io::stdout().lock(), &config)?
                }
            };
            if summary.errors > 0 {
                tracing::warn!(errors = summary.errors, "some entries could not be archived");
            }
        }
        Command::Extract { input, config } => {
            match input {
                Some(path) => {
                    let file = File::open(&path).map_err(|e| ArchiverError::io(e, &path))?;
                    extract_archive(file, &config)?
                }
                None => extract_archive(io::stdin().lock(), &config)?,
            };
        }
        Command::List { input } => {
            let (entries, _) = match input {
                Some(path) => {
                    let file = File::open(&path).map_err(|e| ArchiverError::io(e, &path))?;
                    list_archive(file)?
                }
                None => list_archive(io::stdin().lock())?,
            };
            let mut out = io::stdout().lock();
            for entry in entries {
                writeln!(out, "{entry}").map_err(|e| ArchiverError::io(e, "<stdout>"))?;
            }
        }
    }
    Ok(())
}
