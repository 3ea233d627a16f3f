//! `Serializer`: owns one I/O back-end plus the buffer pool it reclaims
//! into. Workers get their own `Serializer` attached to a shared parent
//! descriptor/ring rather than synchronizing on a single one.

use std::path::Path;

use crate::align::AlignedBuf;
use crate::buffer_pool::BufferPool;
use crate::chunk::IoChunk;
#[cfg(not(target_os = "linux"))]
use crate::error::Error;
use crate::error::Result;
use crate::io_backend::sync::SyncBackend;
#[cfg(target_os = "linux")]
use crate::io_backend::uring::UringBackend;
use crate::io_backend::{IoBackend, OpenMode, WriteRequest};

enum Backend {
    Sync(SyncBackend),
    #[cfg(target_os = "linux")]
    Uring(UringBackend),
}

impl Backend {
    fn as_io_backend(&mut self) -> &mut dyn IoBackend {
        match self {
            Backend::Sync(b) => b,
            #[cfg(target_os = "linux")]
            Backend::Uring(b) => b,
        }
    }
}

pub struct Serializer {
    backend: Backend,
    pool: BufferPool,
    /// A second, always-buffered descriptor onto the same file, used only by
    /// `write_raw`'s finalize patch writes. The primary `backend` may be
    /// opened `O_DIRECT`, which requires every offset, length, and buffer
    /// address it touches to be device-block-aligned; the header and IFD
    /// patches are neither, so they go through this plain descriptor
    /// instead of the aligned one.
    metadata: SyncBackend,
}

impl Serializer {
    pub fn open(path: &Path, mode: OpenMode, flush_on_close: bool, use_uring: bool) -> Result<Self> {
        let backend = if use_uring {
            #[cfg(target_os = "linux")]
            {
                Backend::Uring(UringBackend::open(path, mode, flush_on_close)?)
            }
            #[cfg(not(target_os = "linux"))]
            {
                return Err(Error::Configuration(
                    "the io_uring back-end is only available on linux".to_string(),
                ));
            }
        } else {
            Backend::Sync(SyncBackend::open(path, mode, flush_on_close)?)
        };
        // Opened after `backend`, so the file already exists; no create or
        // truncate flags here, just a plain read/write view onto it.
        let metadata_mode = OpenMode {
            read: true,
            write: true,
            create_truncate: false,
            append: false,
            direct: false,
        };
        let metadata = SyncBackend::open(path, metadata_mode, false)?;
        Ok(Self {
            backend,
            pool: BufferPool::new(),
            metadata,
        })
    }

    /// Build a worker `Serializer` that shares `parent`'s open descriptor
    /// (and, for the uring back-end, its async work queue) with its own
    /// private buffer pool.
    pub fn attach(parent: &Serializer) -> Result<Self> {
        let backend = match &parent.backend {
            Backend::Sync(b) => Backend::Sync(SyncBackend::attach(b)),
            #[cfg(target_os = "linux")]
            Backend::Uring(b) => Backend::Uring(UringBackend::attach(b)?),
        };
        Ok(Self {
            backend,
            pool: BufferPool::new(),
            metadata: SyncBackend::attach(&parent.metadata),
        })
    }

    /// Borrow a buffer of at least `len` bytes from this serializer's pool,
    /// reusing a reclaimed one when available.
    pub fn get_pool_buffer(&mut self, len: usize) -> AlignedBuf {
        self.pool.get(len)
    }

    /// Return a buffer to the pool without going through a write (used by
    /// the non-chunked strategy's short-circuit paths, e.g. a failed fill).
    pub fn return_pool_buffer(&mut self, buf: AlignedBuf) {
        self.pool.put(buf);
    }

    /// Fill `chunk`'s writable sub-range, allocating its backing buffer from
    /// this serializer's pool on first touch.
    pub fn fill_chunk(
        &mut self,
        chunk: &IoChunk,
        strip_index: u32,
        writable_offset: usize,
        writable_len: usize,
        f: impl FnOnce(&mut [u8]),
    ) {
        chunk.fill(&mut self.pool, strip_index, writable_offset, writable_len, f);
    }

    /// Fill and write a single exclusive chunk in one step, for patch writes
    /// outside the strip chunk plan (the finalize pass's header and IFD
    /// bytes). Always goes through the plain `metadata` descriptor, not the
    /// (possibly `O_DIRECT`) primary one, since these patches are rarely
    /// block-aligned.
    pub fn write_raw(&mut self, offset: u64, data: &[u8]) -> Result<u64> {
        let chunk = IoChunk::new(offset, data.len() as u64);
        self.fill_chunk(&chunk, u32::MAX, 0, data.len(), |slice| slice.copy_from_slice(data));
        let won = chunk.acquire();
        debug_assert!(won, "a freshly created exclusive chunk always wins its own acquire");
        self.metadata.write(
            WriteRequest {
                file_offset: offset,
                chunks: vec![chunk],
            },
            &mut self.pool,
        )
    }

    pub fn write(&mut self, request: WriteRequest) -> Result<u64> {
        self.backend.as_io_backend().write(request, &mut self.pool)
    }

    pub fn poll_completions(&mut self) -> Result<()> {
        self.backend.as_io_backend().poll_completions(&mut self.pool)
    }

    pub fn close(&mut self) -> Result<()> {
        self.backend.as_io_backend().close(&mut self.pool)?;
        self.metadata.close(&mut self.pool)
    }
}
