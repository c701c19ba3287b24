use clap::{ArgAction, Parser};
use std::ffi::OsString;
use std::path::PathBuf;

use crate::block::{DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE};
use crate::exclude::ExcludeSet;
use crate::extract::ExtractConfig;
use crate::workers::CreateConfig;
use crate::ArchiverError;

/// Concurrent streaming archiver.
///
/// Packs directory trees into a single block stream with parallel directory
/// scanners and file readers (-c), and unpacks (-x) or lists (-t) such streams.
#[derive(Parser, Debug)]
#[command(name = "streamarch", author, version, about, long_about = None)]
pub struct Args {
    /// Extract an archive.
    #[arg(short = 'x', conflicts_with_all = ["create", "list"])]
    pub extract: bool,

    /// Create an archive from the given paths.
    #[arg(short = 'c', conflicts_with = "list")]
    pub create: bool,

    /// List and verify an archive without extracting it.
    #[arg(short = 't')]
    pub list: bool,

    /// Input archive for -x/-t. Defaults to standard input.
    #[arg(short = 'i', value_name = "PATH")]
    pub input: Option<PathBuf>,

    /// Output archive for -c. Defaults to standard output.
    #[arg(short = 'o', value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Directory to extract into (-x only).
    #[arg(short = 'C', value_name = "DIR", default_value = ".")]
    pub directory: PathBuf,

    /// Maximum payload of a data block, at most 65535 (-c only).
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE as u64)]
    pub block_size: u64,

    /// Number of simultaneous directory scanners (-c only).
    #[arg(long, default_value_t = 16)]
    pub dir_readers: usize,

    /// Number of simultaneous file readers (-c only).
    #[arg(long, default_value_t = 16)]
    pub file_readers: usize,

    /// Capacity of the directory scan queue (-c only).
    #[arg(long, default_value_t = 128)]
    pub queue_dir: usize,

    /// Capacity of the file read queue (-c only).
    #[arg(long, default_value_t = 128)]
    pub queue_read: usize,

    /// Capacity of the archive write queue (-c only); larger values use more memory.
    #[arg(long, default_value_t = 128)]
    pub queue_write: usize,

    /// Maximum number of workers doing filesystem work at once. [0 = number of CPUs]
    #[arg(long, default_value_t = 0)]
    pub multicpu: usize,

    /// Glob patterns to exclude (e.g. 'core.*'), separated like PATH (':' on Unix) (-c only).
    #[arg(long, value_name = "LIST")]
    pub exclude: Option<OsString>,

    /// Verbose diagnostics on standard error.
    #[arg(short = 'v', action = ArgAction::SetTrue)]
    pub verbose: bool,

    /// Do not restore permissions (-x only).
    #[arg(long)]
    pub ignore_perms: bool,

    /// Do not restore owners (-x only).
    #[arg(long)]
    pub ignore_owners: bool,

    /// Files and directories to archive (-c only).
    #[arg(value_name = "PATH")]
    pub paths: Vec<PathBuf>,
}

/// A validated request, ready to run.
#[derive(Debug)]
pub enum Command {
    Create {
        roots: Vec<PathBuf>,
        output: Option<PathBuf>,
        config: CreateConfig,
    },
    Extract {
        input: Option<PathBuf>,
        config: ExtractConfig,
    },
    List {
        input: Option<PathBuf>,
    },
}

impl Args {
    /// Checks the flag combination and builds the immutable configuration
    /// for the selected mode.
    pub fn into_command(self) -> Result<Command, ArchiverError> {
        if self.extract {
            return Ok(Command::Extract {
                input: self.input,
                config: ExtractConfig {
                    target: self.directory,
                    ignore_perms: self.ignore_perms,
                    ignore_owners: self.ignore_owners,
                },
            });
        }
        if self.list {
            return Ok(Command::List { input: self.input });
        }
        if !self.create {
            return Err(ArchiverError::Config(
                "extract (-x), create (-c) or list (-t) flag must be provided".into(),
            ));
        }

        if self.block_size > MAX_BLOCK_SIZE as u64 {
            return Err(ArchiverError::Config(format!(
                "block-size must be less than or equal to {MAX_BLOCK_SIZE}"
            )));
        }
        if self.paths.is_empty() {
            return Err(ArchiverError::Config("paths to archive must be specified".into()));
        }
        let excludes = match &self.exclude {
            Some(list) => ExcludeSet::parse(list)?,
            None => ExcludeSet::default(),
        };
        let config = CreateConfig {
            block_size: self.block_size as usize,
            dir_readers: self.dir_readers,
            file_readers: self.file_readers,
            queue_dir: self.queue_dir,
            queue_read: self.queue_read,
            queue_write: self.queue_write,
            multicpu: self.multicpu,
            excludes,
            skip_identity: None,
        };
        config.validate()?;
        Ok(Command::Create { roots: self.paths, output: self.output, config })
    }
}
