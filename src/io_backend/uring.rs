//! Asynchronous submission-queue back-end built on `io_uring`, gated to
//! Linux. Worker rings can attach to a parent's shared async work queue so a
//! fan-out of per-worker rings does not each spin up its own kernel worker
//! pool.

use std::collections::HashMap;
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

use io_uring::{opcode, types, IoUring};
use tracing::{trace, warn};

use super::{IoBackend, OpenMode, WriteRequest};
use crate::align::AlignedBuf;
use crate::buffer_pool::BufferPool;
use crate::error::{Error, Result};

const QUEUE_DEPTH: u32 = 1024;

struct PendingWrite {
    total_len: u64,
    bufs: Vec<AlignedBuf>,
    // kept alive only so the iovec array backing the submission entry stays
    // valid until the completion is reaped.
    _iovecs: Vec<libc::iovec>,
}

pub struct UringBackend {
    fd: RawFd,
    owns_fd: bool,
    flush_on_close: bool,
    ring: IoUring,
    pending: HashMap<u64, PendingWrite>,
    next_user_data: u64,
    closed: bool,
}

// Safety: a `UringBackend` has exactly one owner at a time; it is moved
// wholesale between worker threads (never shared concurrently), and the
// iovecs it retains point only into buffers it owns alongside them.
unsafe impl Send for UringBackend {}

impl UringBackend {
    pub fn open(path: &Path, mode: OpenMode, flush_on_close: bool) -> Result<Self> {
        let fd = open_raw(path, mode)?;
        let ring = IoUring::new(QUEUE_DEPTH).map_err(Error::Io)?;
        Ok(Self {
            fd,
            owns_fd: true,
            flush_on_close,
            ring,
            pending: HashMap::new(),
            next_user_data: 0,
            closed: false,
        })
    }

    /// Build a worker ring that shares the parent's file descriptor and
    /// attaches to the parent's async work queue, so the kernel does not
    /// spawn a fresh pool of io workers per worker thread.
    pub fn attach(parent: &UringBackend) -> Result<Self> {
        let ring = IoUring::builder()
            .setup_attach_wq(parent.ring.as_raw_fd())
            .build(QUEUE_DEPTH)
            .map_err(Error::Io)?;
        Ok(Self {
            fd: parent.fd,
            owns_fd: false,
            flush_on_close: false,
            ring,
            pending: HashMap::new(),
            next_user_data: 0,
            closed: false,
        })
    }

    fn reap_completions(&mut self, pool: &mut BufferPool) -> Result<()> {
        let completed: Vec<(u64, i32)> = self
            .ring
            .completion()
            .map(|cqe| (cqe.user_data(), cqe.result()))
            .collect();

        for (user_data, res) in completed {
            let pending = match self.pending.remove(&user_data) {
                Some(p) => p,
                None => {
                    warn!(user_data, "completion for unknown submission, ignoring");
                    continue;
                }
            };
            if res < 0 {
                let err = io::Error::from_raw_os_error(-res);
                return Err(Error::CompletionFailure {
                    offset: user_data,
                    detail: err.to_string(),
                });
            }
            if res as u64 != pending.total_len {
                return Err(Error::CompletionFailure {
                    offset: user_data,
                    detail: format!(
                        "short write: attempted {}, completed {res}",
                        pending.total_len
                    ),
                });
            }
            for buf in pending.bufs {
                pool.put(buf);
            }
        }
        Ok(())
    }
}

fn open_raw(path: &Path, mode: OpenMode) -> Result<RawFd> {
    let mut flags = if mode.read && mode.write {
        libc::O_RDWR
    } else if mode.write {
        libc::O_WRONLY
    } else {
        libc::O_RDONLY
    };
    if mode.create_truncate {
        flags |= libc::O_CREAT | libc::O_TRUNC;
    }
    if mode.append {
        flags |= libc::O_CREAT | libc::O_APPEND;
    }
    if mode.direct {
        flags |= libc::O_DIRECT;
    }
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| Error::Configuration(format!("path contains a NUL byte: {e}")))?;
    let fd = unsafe { libc::open(c_path.as_ptr(), flags, 0o644) };
    if fd < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }
    Ok(fd)
}

impl IoBackend for UringBackend {
    fn write(&mut self, request: WriteRequest, pool: &mut BufferPool) -> Result<u64> {
        let bufs: Vec<_> = request.chunks.iter().map(|c| c.take_buf()).collect();
        let iovecs: Vec<libc::iovec> = bufs
            .iter()
            .map(|b| libc::iovec {
                iov_base: b.as_slice().as_ptr() as *mut _,
                iov_len: b.data_len(),
            })
            .collect();
        let total_len: u64 = iovecs.iter().map(|v| v.iov_len as u64).sum();

        let user_data = self.next_user_data;
        self.next_user_data += 1;

        let entry = opcode::Writev::new(types::Fd(self.fd), iovecs.as_ptr(), iovecs.len() as u32)
            .offset(request.file_offset)
            .build()
            .user_data(user_data);

        trace!(offset = request.file_offset, total_len, user_data, "submitting io_uring writev");

        self.pending.insert(
            user_data,
            PendingWrite {
                total_len,
                bufs,
                _iovecs: iovecs,
            },
        );

        unsafe {
            self.ring
                .submission()
                .push(&entry)
                .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))?;
        }
        self.ring.submit().map_err(Error::Io)?;
        // Submit, then opportunistically drain whatever has already
        // completed, so a worker's pool buffers get reclaimed mid-run
        // instead of only at `close`.
        self.reap_completions(pool)?;
        Ok(total_len)
    }

    fn poll_completions(&mut self, pool: &mut BufferPool) -> Result<()> {
        self.ring.submit().map_err(Error::Io)?;
        self.reap_completions(pool)
    }

    fn close(&mut self, pool: &mut BufferPool) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        while !self.pending.is_empty() {
            self.ring.submit_and_wait(1).map_err(Error::Io)?;
            self.reap_completions(pool)?;
        }
        if self.owns_fd {
            if self.flush_on_close {
                unsafe {
                    libc::fsync(self.fd);
                }
            }
            unsafe {
                libc::close(self.fd);
            }
        }
        self.closed = true;
        Ok(())
    }
}

impl Drop for UringBackend {
    fn drop(&mut self) {
        if self.owns_fd && !self.closed {
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}
