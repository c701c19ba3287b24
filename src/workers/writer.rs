//! Archive writer: the single consumer of the block queue.

use std::io::{BufWriter, Write};

use tracing::error;

use super::Pipeline;
use crate::block::write_stream_header;
use crate::error::FrameError;
use crate::ArchiverError;

const WRITE_BUFFER: usize = 1 << 20; // 1 MiB

fn output_error(e: FrameError) -> ArchiverError {
    match e {
        FrameError::Io(source) => ArchiverError::io(source, "<archive output>"),
        other => ArchiverError::Frame(other),
    }
}

/// Drains the block queue in arrival order until it is closed and empty.
///
/// On the first write failure the pipeline is cancelled, but the queue is
/// still drained (and discarded) so no producer stays blocked on it.
pub(super) fn run<W: Write>(output: W, p: &Pipeline<'_>) -> Result<(), ArchiverError> {
    let mut out = BufWriter::with_capacity(WRITE_BUFFER, output);
    let mut failure = write_stream_header(&mut out)
        .err()
        .map(|e| output_error(e.into()));
    if failure.is_some() {
        p.cancel();
    }

    while let Some(block) = p.block_queue.pop() {
        if failure.is_some() {
            continue;
        }
        match block.write_to(&mut out) {
            Ok(()) => p.stats.record_block(),
            Err(e) => {
                let e = output_error(e);
                error!(path = %block.path.display(), error = %e, "archive write failed; aborting");
                p.cancel();
                failure = Some(e);
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => out.flush().map_err(|e| ArchiverError::io(e, "<archive output>")),
    }
}
