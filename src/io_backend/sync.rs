//! Synchronous positional vectored-write back-end, grounded on
//! `pwritev(2)` via `libc`.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;

use tracing::{error, trace};

use super::{IoBackend, OpenMode, WriteRequest};
use crate::buffer_pool::BufferPool;
use crate::error::{Error, Result};

/// Opens a file with OS-level flags derived from an [`OpenMode`] and issues
/// positional vectored writes, retrying on short writes.
pub struct SyncBackend {
    fd: RawFd,
    owns_fd: bool,
    flush_on_close: bool,
    closed: bool,
}

impl SyncBackend {
    pub fn open(path: &Path, mode: OpenMode, flush_on_close: bool) -> Result<Self> {
        let mut flags = 0;
        flags |= if mode.read && mode.write {
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
        #[cfg(target_os = "linux")]
        if mode.direct {
            flags |= libc::O_DIRECT;
        }

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| Error::Configuration(format!("path contains a NUL byte: {e}")))?;
        let fd = unsafe { libc::open(c_path.as_ptr(), flags, 0o644) };
        if fd < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        #[cfg(target_os = "macos")]
        if mode.direct {
            unsafe {
                libc::fcntl(fd, libc::F_NOCACHE, 1);
            }
        }

        Ok(Self {
            fd,
            owns_fd: true,
            flush_on_close,
            closed: false,
        })
    }

    /// Share a parent's already-open file descriptor. The child does not
    /// close it; only the parent's `close` does.
    pub fn attach(parent: &SyncBackend) -> Self {
        Self {
            fd: parent.fd,
            owns_fd: false,
            flush_on_close: false,
            closed: false,
        }
    }

    fn pwritev_retrying(&self, mut offset: u64, mut iovecs: Vec<libc::iovec>) -> Result<u64> {
        let total: u64 = iovecs.iter().map(|v| v.iov_len as u64).sum();
        let mut written_total = 0u64;
        while written_total < total {
            let n = unsafe {
                libc::pwritev(self.fd, iovecs.as_ptr(), iovecs.len() as i32, offset as i64)
            };
            if n <= 0 {
                let err = io::Error::last_os_error();
                error!(offset, written_total, "pwritev failed or returned zero: {err}");
                return Err(Error::Io(err));
            }
            let n = n as u64;
            written_total += n;
            offset += n;
            advance_iovecs(&mut iovecs, n as usize);
        }
        Ok(written_total)
    }
}

fn advance_iovecs(iovecs: &mut Vec<libc::iovec>, mut by: usize) {
    while by > 0 {
        let front = iovecs.first_mut().expect("advance exceeds total iovec length");
        if by >= front.iov_len {
            by -= front.iov_len;
            iovecs.remove(0);
        } else {
            front.iov_base = unsafe { (front.iov_base as *mut u8).add(by) as *mut _ };
            front.iov_len -= by;
            by = 0;
        }
    }
}

impl IoBackend for SyncBackend {
    fn write(&mut self, request: WriteRequest, pool: &mut BufferPool) -> Result<u64> {
        let bufs: Vec<_> = request.chunks.iter().map(|c| c.take_buf()).collect();
        let iovecs: Vec<libc::iovec> = bufs
            .iter()
            .map(|b| libc::iovec {
                iov_base: b.as_slice().as_ptr() as *mut _,
                iov_len: b.data_len(),
            })
            .collect();
        let total: u64 = iovecs.iter().map(|v| v.iov_len as u64).sum();
        trace!(offset = request.file_offset, total, "issuing synchronous vectored write");
        let written = self.pwritev_retrying(request.file_offset, iovecs)?;
        if written != total {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write: attempted {total}, wrote {written}"),
            )));
        }
        for buf in bufs {
            pool.put(buf);
        }
        Ok(written)
    }

    fn poll_completions(&mut self, _pool: &mut BufferPool) -> Result<()> {
        // the synchronous back-end has no deferred completions.
        Ok(())
    }

    fn close(&mut self, _pool: &mut BufferPool) -> Result<()> {
        if self.closed {
            return Ok(());
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

impl Drop for SyncBackend {
    fn drop(&mut self) {
        if self.owns_fd && !self.closed {
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}
