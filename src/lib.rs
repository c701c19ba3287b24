//! # streamarch Core Library
//!
//! This crate provides the core functionality for the `streamarch` archiver.
//!
//! It is designed to be used by the `streamarch` command-line application, but its public API
//! can also be used to programmatically create, list, and extract block-stream archives.
//!
//! ## Key Modules
//!
//! - [`block`]: The block model and its length-prefixed wire framing.
//! - [`queue`]: Bounded, closable work queues connecting the pipeline stages.
//! - [`workers`]: The scanner pool, reader pool, writer and coordinator used by `-c`.
//! - [`extract`]: The path-keyed reconstruction state machine used by `-x` and `-t`.
//!
//! ## Examples
//!
//! ```no_run
//! use std::fs::File;
//! use std::path::PathBuf;
//! use streamarch::{create_archive, extract_archive, CreateConfig, ExtractConfig};
//!
//! let out = File::create("backup.sa")?;
//! create_archive(&[PathBuf::from("project")], out, &CreateConfig::default())?;
//!
//! let config = ExtractConfig { target: PathBuf::from("restore"), ..Default::default() };
//! extract_archive(File::open("backup.sa")?, &config)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod block;
pub mod cli;
pub mod error;
pub mod exclude;
pub mod extract;
pub mod queue;
pub mod stats;
pub mod workers;

// Cross-platform filesystem wrapper
pub mod fsx;

pub use error::ArchiverError;
pub use extract::{extract_archive, list_archive, ExtractConfig};
pub use workers::{create_archive, CreateConfig};
