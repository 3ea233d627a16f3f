//! `ImageFormat`: ties the planner, chunk graph, and serializer together
//! into the one operation the task executor calls per strip, plus the
//! two-pass TIFF finalization.
//!
//! Workers call [`ImageFormat::encode_strip`] concurrently with no ordering
//! guarantee between strips, so the format's own bookkeeping (the errored
//! flag, the completed-strip counter, and the parent serializer used only by
//! the finalization pass) is behind atomics and a mutex rather than
//! `&mut self`; each worker supplies its own attached [`Serializer`] for the
//! strip write itself.

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tiff::encoder::{colortype, TiffEncoder};
use tracing::{debug, error, info, instrument};

use crate::align::WRITE_SIZE;
use crate::chunk::IoChunk;
use crate::error::{Error, Result};
use crate::geometry::ImageGeometry;
use crate::io_backend::{OpenMode, WriteRequest};
use crate::serializer::Serializer;
use crate::stripper::ImageStripper;

/// Which strip-to-chunk mapping a format instance uses. Non-chunked is the
/// default: one pool buffer per strip, one write, no alignment splitting.
/// Chunked is opt-in (CLI `-k`, or implied by `-d` direct I/O) and runs the
/// full seam-sharing machinery in [`crate::stripper`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanningStrategy {
    NonChunked,
    Chunked,
}

#[derive(Debug, Clone, Copy)]
pub struct FormatOptions {
    pub header_size: u64,
    pub planning: PlanningStrategy,
    pub direct: bool,
    pub use_uring: bool,
    pub flush_on_close: bool,
}

/// A pixel-fill callback: given the absolute logical offset (within the
/// header-less pixel stream) of the first byte of `slice`, populate it.
pub trait PixelFill: Fn(u64, &mut [u8]) + Send + Sync {}
impl<F: Fn(u64, &mut [u8]) + Send + Sync> PixelFill for F {}

pub struct ImageFormat {
    geometry: ImageGeometry,
    options: FormatOptions,
    stripper: Option<ImageStripper>,
    serializer: Mutex<Serializer>,
    encoded_count: AtomicU32,
    strip_count: u32,
    errored: AtomicBool,
}

impl ImageFormat {
    #[instrument(skip(path, options), fields(width = geometry.width(), height = geometry.height()))]
    pub fn create(path: &Path, geometry: ImageGeometry, options: FormatOptions) -> Result<Self> {
        if options.direct && options.planning == PlanningStrategy::NonChunked {
            return Err(Error::Configuration(
                "direct I/O requires the chunked planning strategy".to_string(),
            ));
        }
        if options.header_size >= WRITE_SIZE {
            return Err(Error::Configuration(format!(
                "header_size ({}) must be strictly less than WRITE_SIZE ({WRITE_SIZE})",
                options.header_size
            )));
        }
        #[cfg(not(target_os = "linux"))]
        if options.use_uring {
            return Err(Error::Configuration(
                "the io_uring back-end is only available on linux".to_string(),
            ));
        }

        let mut mode_str = String::from("w");
        if options.direct {
            mode_str.push('d');
        }
        let mode = OpenMode::parse(&mode_str)?;
        let serializer = Serializer::open(path, mode, options.flush_on_close, options.use_uring)?;

        let stripper = match options.planning {
            PlanningStrategy::Chunked => Some(ImageStripper::plan(geometry, options.header_size)?),
            PlanningStrategy::NonChunked => None,
        };

        info!(strategy = ?options.planning, "opened image format");
        Ok(Self {
            strip_count: geometry.strip_count(),
            geometry,
            options,
            stripper,
            serializer: Mutex::new(serializer),
            encoded_count: AtomicU32::new(0),
            errored: AtomicBool::new(false),
        })
    }

    /// Build a worker's own `Serializer`, attached to this format's parent
    /// descriptor (and, for the uring back-end, its work queue).
    pub fn worker_serializer(&self) -> Result<Serializer> {
        let parent = self.serializer.lock().expect("serializer mutex poisoned");
        Serializer::attach(&parent)
    }

    pub fn num_strips(&self) -> u32 {
        self.strip_count
    }

    /// Encode one strip. Must not be called twice with the same
    /// `strip_index`. `fill` is invoked once per writable sub-range with the
    /// absolute logical pixel-stream offset of that sub-range's first byte.
    /// Safe to call concurrently from multiple workers, each with its own
    /// `worker`, for distinct strip indices.
    #[instrument(skip(self, worker, fill), fields(strip_index))]
    pub fn encode_strip(&self, worker: &mut Serializer, strip_index: u32, fill: impl PixelFill) -> Result<()> {
        if self.errored.load(Ordering::Acquire) {
            return Err(Error::PlanViolation(
                "encode_strip called after a prior failure; the format is errored".to_string(),
            ));
        }
        let result = match self.options.planning {
            PlanningStrategy::NonChunked => self.encode_strip_non_chunked(worker, strip_index, &fill),
            PlanningStrategy::Chunked => self.encode_strip_chunked(worker, strip_index, &fill),
        };
        if let Err(ref e) = result {
            error!(strip_index, error = %e, "strip encode failed, format is now errored");
            self.errored.store(true, Ordering::Release);
        }
        result?;

        let completed = self.encoded_count.fetch_add(1, Ordering::AcqRel) + 1;
        if completed == self.strip_count {
            self.encode_finish()?;
        }
        Ok(())
    }

    fn encode_strip_non_chunked(
        &self,
        worker: &mut Serializer,
        strip_index: u32,
        fill: &impl PixelFill,
    ) -> Result<()> {
        let is_first = strip_index == 0;
        let header = if is_first { self.options.header_size } else { 0 };
        let byte_len = self.geometry.strip_byte_len(strip_index);
        let total_len = byte_len + header;
        let physical_offset = if is_first {
            0
        } else {
            self.options.header_size + self.geometry.logical_offset(strip_index)
        };
        let logical_pos = self.geometry.logical_offset(strip_index);

        let chunk = IoChunk::new(physical_offset, total_len);
        worker.fill_chunk(&chunk, strip_index, header as usize, byte_len as usize, |slice| {
            fill(logical_pos, slice)
        });
        let won = chunk.acquire();
        debug_assert!(won, "a non-chunked strip's buffer is always exclusively owned");
        worker.write(WriteRequest {
            file_offset: physical_offset,
            chunks: vec![chunk],
        })?;
        debug!(strip_index, physical_offset, total_len, "wrote strip (non-chunked)");
        Ok(())
    }

    fn encode_strip_chunked(
        &self,
        worker: &mut Serializer,
        strip_index: u32,
        fill: &impl PixelFill,
    ) -> Result<()> {
        let stripper = self
            .stripper
            .as_ref()
            .expect("chunked planning strategy always carries a stripper");
        let strip = stripper.strip(strip_index);
        let logical_base = self.geometry.logical_offset(strip_index);

        let mut filled = 0u64;
        let mut winners: Vec<Arc<IoChunk>> = Vec::with_capacity(strip.chunks.len());
        for sc in &strip.chunks {
            let logical_pos = logical_base + filled;
            worker.fill_chunk(&sc.chunk, strip_index, sc.writable_offset, sc.writable_len, |slice| {
                fill(logical_pos, slice)
            });
            filled += sc.writable_len as u64;
            if sc.chunk.acquire() {
                winners.push(Arc::clone(&sc.chunk));
            }
        }

        if let Some(first) = winners.first() {
            let file_offset = first.offset;
            worker.write(WriteRequest {
                file_offset,
                chunks: winners,
            })?;
            debug!(strip_index, file_offset, "wrote strip (chunked)");
        } else {
            debug!(strip_index, "strip filled its half of a seam; write deferred to its neighbor");
        }
        Ok(())
    }

    /// Second pass: drive the real TIFF encoder against an in-memory image
    /// sized to the true on-disk pixel region, then patch only the header
    /// prefix and IFD suffix bytes into the file through the parent
    /// serializer. The pixel region itself was already written for real by
    /// `encode_strip` and is discarded here. A no-op beyond closing the
    /// descriptor when `header_size` is 0: there is no reserved header slot
    /// and no container wanted, so the file is left as the raw pixel
    /// stream `encode_strip` already wrote.
    #[instrument(skip(self))]
    fn encode_finish(&self) -> Result<()> {
        let header_len = self.options.header_size as usize;
        if header_len == 0 {
            // No header reservation means no container is wanted: strip 0
            // carries no skip, and the file is the raw pixel stream with no
            // TIFF header or directory appended.
            info!("header_size is 0, skipping tiff finalize");
            return self.serializer.lock().expect("serializer mutex poisoned").close();
        }

        let pixel_len = self.geometry.total_pixel_bytes() as usize;
        let placeholder = vec![0u8; pixel_len];

        let mut image_bytes: Vec<u8> = Vec::new();
        {
            let cursor = Cursor::new(&mut image_bytes);
            let mut encoder = TiffEncoder::new(cursor)?;
            match self.geometry.component_count() {
                1 => {
                    let mut image = encoder
                        .new_image::<colortype::Gray8>(self.geometry.width(), self.geometry.height())?;
                    image.rows_per_strip(self.geometry.nominal_strip_height())?;
                    image.write_data(&placeholder)?;
                }
                3 => {
                    let mut image = encoder
                        .new_image::<colortype::RGB8>(self.geometry.width(), self.geometry.height())?;
                    image.rows_per_strip(self.geometry.nominal_strip_height())?;
                    image.write_data(&placeholder)?;
                }
                other => {
                    return Err(Error::Configuration(format!(
                        "TIFF finalize supports 1 or 3 components, got {other}"
                    )))
                }
            }
        }

        if image_bytes.len() < header_len + 8 {
            return Err(Error::PlanViolation(format!(
                "tiff finalize image ({} bytes) too short to contain a classic TIFF header",
                image_bytes.len()
            )));
        }
        // The tiff crate word-pads its directory to a 4-byte boundary before
        // writing it, so the real directory offset can land past
        // `header_len + pixel_len`; trust the offset it actually recorded in
        // the header rather than assuming the two regions are contiguous.
        let ifd_start = u32::from_le_bytes(image_bytes[4..8].try_into().expect("slice is 4 bytes")) as usize;
        if image_bytes.len() < ifd_start {
            return Err(Error::PlanViolation(format!(
                "tiff finalize image ({} bytes) shorter than its own recorded directory offset ({ifd_start})",
                image_bytes.len()
            )));
        }

        let header_bytes = image_bytes[..header_len].to_vec();
        let ifd_bytes = image_bytes[ifd_start..].to_vec();

        let mut serializer = self.serializer.lock().expect("serializer mutex poisoned");
        serializer.write_raw(0, &header_bytes)?;
        if !ifd_bytes.is_empty() {
            serializer.write_raw(ifd_start as u64, &ifd_bytes)?;
        }
        info!(header_len, ifd_len = ifd_bytes.len(), "tiff finalize complete");

        serializer.close()
    }

    /// Close the underlying descriptor. Idempotent.
    pub fn close(&self) -> Result<()> {
        self.serializer.lock().expect("serializer mutex poisoned").close()
    }

    pub fn geometry(&self) -> &ImageGeometry {
        &self.geometry
    }
}
