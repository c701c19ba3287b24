//! Archive creation pipeline.
//!
//! ```text
//! roots ─► scan queue ─► [scanners] ─┬─► Directory blocks ───────────┐
//!                 ▲           │      │                               ▼
//!                 └─ subdirs ─┘      └─► read queue ─► [readers] ─► block queue ─► writer ─► output
//! ```
//!
//! Every queued scan or read item is counted by the [`WorkTracker`]. The
//! coordinator thread seeds the roots, waits for the count to reach zero and
//! then closes the queues in order scan → read → block, which lets the
//! scanners, the readers and finally the writer run dry and return.

mod reader;
mod scanner;
pub mod tracker;
mod writer;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::block::{Block, DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE};
use crate::exclude::ExcludeSet;
use crate::fsx::{self, FileIdentity};
use crate::queue::WorkQueue;
use crate::stats::{CreateStats, CreateSummary};
use crate::ArchiverError;

pub use tracker::{ExecGate, WorkTracker};

/// Holds all configuration options for a creation run.
#[derive(Debug, Clone)]
pub struct CreateConfig {
    /// Maximum payload of a Data block, 1..=65535.
    pub block_size: usize,
    /// Number of directory scanner threads.
    pub dir_readers: usize,
    /// Number of file reader threads.
    pub file_readers: usize,
    pub queue_dir: usize,
    pub queue_read: usize,
    pub queue_write: usize,
    /// Workers allowed to do filesystem work at once. [0 = number of CPUs]
    pub multicpu: usize,
    pub excludes: ExcludeSet,
    /// File that must never be archived (the archive being written).
    pub skip_identity: Option<FileIdentity>,
}

impl Default for CreateConfig {
    fn default() -> Self {
        CreateConfig {
            block_size: DEFAULT_BLOCK_SIZE,
            dir_readers: 16,
            file_readers: 16,
            queue_dir: 128,
            queue_read: 128,
            queue_write: 128,
            multicpu: 0,
            excludes: ExcludeSet::default(),
            skip_identity: None,
        }
    }
}

impl CreateConfig {
    pub fn validate(&self) -> Result<(), ArchiverError> {
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(ArchiverError::Config(format!(
                "block-size must be between 1 and {MAX_BLOCK_SIZE}, got {}",
                self.block_size
            )));
        }
        for (flag, value) in [
            ("dir-readers", self.dir_readers),
            ("file-readers", self.file_readers),
            ("queue-dir", self.queue_dir),
            ("queue-read", self.queue_read),
            ("queue-write", self.queue_write),
        ] {
            if value == 0 {
                return Err(ArchiverError::Config(format!("{flag} must be at least 1")));
            }
        }
        Ok(())
    }

    pub fn effective_multicpu(&self) -> usize {
        if self.multicpu == 0 {
            num_cpus::get()
        } else {
            self.multicpu
        }
    }
}

/// State shared by every stage of one creation run.
pub(crate) struct Pipeline<'a> {
    config: &'a CreateConfig,
    scan_queue: WorkQueue<PathBuf>,
    read_queue: WorkQueue<PathBuf>,
    block_queue: WorkQueue<Block>,
    tracker: WorkTracker,
    gate: ExecGate,
    stats: CreateStats,
    cancelled: AtomicBool,
}

impl<'a> Pipeline<'a> {
    fn new(config: &'a CreateConfig) -> Self {
        Pipeline {
            config,
            scan_queue: WorkQueue::new("scan", config.queue_dir),
            read_queue: WorkQueue::new("read", config.queue_read),
            block_queue: WorkQueue::new("block", config.queue_write),
            tracker: WorkTracker::new(),
            gate: ExecGate::new(config.effective_multicpu()),
            stats: CreateStats::default(),
            cancelled: AtomicBool::new(false),
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.config.excludes.is_excluded(path)
    }

    fn is_output(&self, meta: &std::fs::Metadata) -> bool {
        self.config.skip_identity.is_some() && FileIdentity::of(meta) == self.config.skip_identity
    }

    /// Counts `path` as outstanding and hands it to `queue`. The count is
    /// rolled back if the push fails.
    fn dispatch(&self, queue: &WorkQueue<PathBuf>, path: PathBuf) -> Result<(), ArchiverError> {
        self.tracker.add(1);
        queue.push(path).map_err(|e| {
            self.tracker.done();
            e
        })
    }

    /// Coordinator body: seed the roots, wait for quiescence, close queues.
    fn coordinate(&self, roots: &[PathBuf]) {
        self.tracker.add(roots.len());
        for root in roots {
            if let Err(e) = self.seed(root) {
                error!(path = %root.display(), error = %e, "failed to queue root");
                self.tracker.done();
            }
        }

        self.tracker.wait_idle();
        debug!("all work finished; closing queues");
        self.scan_queue.close();
        self.read_queue.close();
        self.block_queue.close();
    }

    /// Routes one root (already counted) to the right queue. Roots follow
    /// symlinks since the user named them explicitly.
    fn seed(&self, root: &Path) -> Result<(), ArchiverError> {
        if self.is_excluded(root) {
            debug!(path = %root.display(), "root excluded");
            self.stats.record_skipped();
            self.tracker.done();
            return Ok(());
        }
        let meta = match std::fs::metadata(root) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(path = %root.display(), error = %e, "cannot stat root");
                self.stats.record_error();
                self.tracker.done();
                return Ok(());
            }
        };

        if meta.is_dir() {
            let name = fsx::archive_path(root);
            if !name.as_os_str().is_empty() {
                self.block_queue.push(Block::directory(name, fsx::entry_meta(&meta)))?;
                self.stats.record_directory();
            }
            self.scan_queue.push(root.to_path_buf())
        } else if meta.is_file() {
            self.read_queue.push(root.to_path_buf())
        } else {
            warn!(path = %root.display(), "root is neither a file nor a directory; skipping");
            self.stats.record_skipped();
            self.tracker.done();
            Ok(())
        }
    }
}

/// Archives `roots` into `output` using the scanner/reader/writer pipeline.
///
/// The writer runs on the calling thread; scanners, readers and the
/// coordinator run on scoped threads. Per-entry failures are logged and
/// counted in the returned summary; only a failure to write the archive (or
/// a worker panic) fails the run.
pub fn create_archive<W: Write>(
    roots: &[PathBuf],
    output: W,
    config: &CreateConfig,
) -> Result<CreateSummary, ArchiverError> {
    config.validate()?;
    if roots.is_empty() {
        return Err(ArchiverError::Config("paths to archive must be specified".into()));
    }
    let roots = plan_roots(roots)?;

    let start = Instant::now();
    let pipeline = Pipeline::new(config);
    info!(
        roots = roots.len(),
        scanners = config.dir_readers,
        readers = config.file_readers,
        block_size = config.block_size,
        multicpu = pipeline.gate.permits(),
        "creating archive"
    );

    let written = thread::scope(|s| {
        let mut handles = Vec::with_capacity(config.dir_readers + config.file_readers + 1);
        for _ in 0..config.dir_readers {
            handles.push(s.spawn(|| scanner::run(&pipeline)));
        }
        for _ in 0..config.file_readers {
            handles.push(s.spawn(|| reader::run(&pipeline)));
        }
        handles.push(s.spawn(|| pipeline.coordinate(&roots)));

        // --- Writer (calling thread) ---
        let written = writer::run(output, &pipeline);

        let mut panicked = false;
        for handle in handles {
            panicked |= handle.join().is_err();
        }
        if panicked {
            return Err(ArchiverError::WorkerPanicked);
        }
        written
    });
    written?;

    let summary = pipeline.stats.summary(start.elapsed());
    info!(
        directories = summary.directories,
        files = summary.files,
        bytes = summary.bytes,
        blocks = summary.blocks,
        skipped = summary.skipped,
        errors = summary.errors,
        "archive complete in {:.2}s ({:.1} MiB/s)",
        summary.elapsed.as_secs_f64(),
        summary.throughput_mib_s(),
    );
    Ok(summary)
}

/// A root as given, where it really is, and the name it is archived under.
struct PlannedRoot<'a> {
    given: &'a PathBuf,
    /// `None` when the root cannot be resolved; seeding reports it.
    real: Option<PathBuf>,
    name: PathBuf,
}

/// Drops duplicate roots and roots that lie inside another root, comparing
/// resolved locations. Remaining roots must not produce the same archive
/// path: two unrelated roots that would is a configuration error.
fn plan_roots(roots: &[PathBuf]) -> Result<Vec<PathBuf>, ArchiverError> {
    let planned: Vec<PlannedRoot<'_>> = roots
        .iter()
        .map(|given| PlannedRoot {
            given,
            real: std::fs::canonicalize(given).ok(),
            name: fsx::archive_path(given),
        })
        .collect();

    let mut by_depth: Vec<usize> = (0..planned.len()).collect();
    by_depth.sort_by_key(|&i| planned[i].real.as_ref().map_or(usize::MAX, |r| r.components().count()));

    let mut keep = vec![false; planned.len()];
    let mut kept: Vec<usize> = Vec::new();
    for i in by_depth {
        if let Some(real) = &planned[i].real {
            let outer = kept.iter().copied().find(|&k| {
                planned[k].real.as_ref().is_some_and(|outer| real.starts_with(outer))
            });
            if let Some(k) = outer {
                warn!(
                    path = %planned[i].given.display(),
                    covered_by = %planned[k].given.display(),
                    "skipping root already covered by another root"
                );
                continue;
            }
        }
        keep[i] = true;
        kept.push(i);
    }

    for (a, &i) in kept.iter().enumerate() {
        for &k in &kept[a + 1..] {
            check_name_clash(&planned[i], &planned[k])?;
            check_name_clash(&planned[k], &planned[i])?;
        }
    }

    Ok(planned
        .iter()
        .zip(keep)
        .filter_map(|(root, keep)| keep.then(|| root.given.clone()))
        .collect())
}

/// Fails when `outer` contains an entry archived under `inner`'s name.
/// Both roots are known not to overlap on disk.
fn check_name_clash(outer: &PlannedRoot<'_>, inner: &PlannedRoot<'_>) -> Result<(), ArchiverError> {
    let (Some(outer_real), Some(_)) = (&outer.real, &inner.real) else {
        return Ok(());
    };
    let Ok(rest) = inner.name.strip_prefix(&outer.name) else {
        return Ok(());
    };
    let clash = if rest.as_os_str().is_empty() {
        true
    } else {
        std::fs::symlink_metadata(outer_real.join(rest)).is_ok()
    };
    if clash {
        return Err(ArchiverError::Config(format!(
            "roots '{}' and '{}' are different locations but both produce archive path '{}'",
            outer.given.display(),
            inner.given.display(),
            inner.name.display()
        )));
    }
    Ok(())
}
