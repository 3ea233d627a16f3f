//! I/O back-end contract: two interchangeable implementations of a single
//! `write(fileOffset, buffers[]) -> bytesWritten` operation (§4.3).

pub mod sync;

#[cfg(target_os = "linux")]
pub mod uring;

use std::sync::Arc;

use crate::buffer_pool::BufferPool;
use crate::chunk::IoChunk;
use crate::error::{Error, Result};

/// Parsed OS-level open mode, derived from the mode string the original
/// benchmark's `FileIOUnix::getMode` translates: a base access mode plus an
/// optional direct-I/O indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    pub read: bool,
    pub write: bool,
    pub create_truncate: bool,
    pub append: bool,
    pub direct: bool,
}

impl OpenMode {
    /// Parse a mode string: `'r'` read-only, `'w'` write-create-truncate,
    /// `'a'` append-create, `'d'` adds a direct-I/O request.
    pub fn parse(mode: &str) -> Result<Self> {
        let mut m = OpenMode {
            read: false,
            write: false,
            create_truncate: false,
            append: false,
            direct: false,
        };
        for c in mode.chars() {
            match c {
                'r' => m.read = true,
                'w' => {
                    m.write = true;
                    m.create_truncate = true;
                }
                'a' => {
                    m.write = true;
                    m.append = true;
                }
                'd' => m.direct = true,
                other => {
                    return Err(Error::Configuration(format!(
                        "unrecognized character '{other}' in open mode string {mode:?}"
                    )))
                }
            }
        }
        if !m.read && !m.write {
            return Err(Error::Configuration(format!(
                "open mode string {mode:?} selects neither read nor write"
            )));
        }
        Ok(m)
    }
}

/// A write request that has been handed to a back-end: the chunks being
/// written, in ascending file-offset order, and the worker that submitted
/// them (for reclaim routing).
pub struct WriteRequest {
    pub file_offset: u64,
    pub chunks: Vec<Arc<IoChunk>>,
}

/// Single operation: write the concatenation of `chunks`' contents starting
/// at `file_offset`. On completion (immediately for the synchronous
/// back-end; deferred for the asynchronous one) the chunk's buffer is
/// returned to `pool`, unless the write failed, in which case the buffer is
/// dropped rather than reused.
pub trait IoBackend {
    /// Issue a write. Returns the number of bytes attempted.
    fn write(&mut self, request: WriteRequest, pool: &mut BufferPool) -> Result<u64>;

    /// Drain any outstanding completions without blocking past what the
    /// back-end can currently observe. A no-op for the synchronous
    /// back-end, which has no deferred completions.
    fn poll_completions(&mut self, pool: &mut BufferPool) -> Result<()>;

    /// Close the underlying descriptor, draining all outstanding
    /// completions first. Must be idempotent: calling twice is a no-op on
    /// the second call.
    fn close(&mut self, pool: &mut BufferPool) -> Result<()>;
}
