//! `ImageStripper`: the runtime realization of the chunk plan under the
//! *chunked* strategy — builds every strip's ordered [`StripChunk`] list,
//! sharing seam [`IoChunk`]s between adjacent strips.
//!
//! Chunked planning is opt-in (CLI `-k`, or implied by `-d` direct I/O); see
//! [`crate::format`] for the simpler non-chunked strategy used by default,
//! where each strip maps to exactly one pool buffer with no alignment
//! splitting at all.

use std::sync::Arc;

use crate::align::WRITE_SIZE;
use crate::chunk::{IoChunk, StripChunk};
use crate::error::{Error, Result};
use crate::geometry::ImageGeometry;
use crate::planner::ChunkInfo;

/// One strip's ordered chunk list.
#[derive(Debug, Clone)]
pub struct Strip {
    pub index: u32,
    pub chunks: Vec<StripChunk>,
    pub logical_len: u64,
}

impl Strip {
    pub fn first_chunk(&self) -> &StripChunk {
        self.chunks.first().expect("a strip always has at least one chunk")
    }

    pub fn final_chunk(&self) -> &StripChunk {
        self.chunks.last().expect("a strip always has at least one chunk")
    }
}

/// Divides an image into strips and, for each, its aligned I/O chunk plan.
pub struct ImageStripper {
    geometry: ImageGeometry,
    header_size: u64,
    strips: Vec<Strip>,
}

impl ImageStripper {
    /// Build the full plan for `geometry` with the given file-format header
    /// size. This is a synchronous, single-threaded pass: every `IoChunk`
    /// that will be shared between two strips is fully constructed (with
    /// its final length, possibly clamped at the image's true end) before
    /// any worker sees it, so that out-of-order strip execution can never
    /// race the plan itself.
    pub fn plan(geometry: ImageGeometry, header_size: u64) -> Result<Self> {
        let strip_count = geometry.strip_count();
        let infos: Vec<ChunkInfo> = (0..strip_count)
            .map(|i| ChunkInfo::compute(&geometry, header_size, i, strip_count))
            .collect::<Result<_>>()?;

        let mut strips = Vec::with_capacity(strip_count as usize);
        let mut pending_seam: Option<Arc<IoChunk>> = None;

        for i in 0..strip_count {
            let info = infos[i as usize];
            let n = info.num_chunks();
            let mut chunks = Vec::with_capacity(n as usize);

            if info.has_first_seam {
                let shared = pending_seam.take().ok_or_else(|| {
                    Error::PlanViolation(format!(
                        "strip {i} has a first seam but no chunk was pending from its left neighbor"
                    ))
                })?;
                let shared = shared.share();
                let writable_offset = (info.first.x0 - shared.offset) as usize;
                let writable_len = info.first.len() as usize;
                chunks.push(StripChunk::new(shared, writable_offset, writable_len));
            } else {
                let is_first_strip = i == 0;
                let chunk_len = if n == 1 {
                    info.last.x1 - info.first.x0
                } else {
                    WRITE_SIZE
                };
                let chunk = IoChunk::new(info.first.x0, chunk_len);
                let writable_offset = if is_first_strip { header_size as usize } else { 0 };
                let writable_len = chunk_len as usize - writable_offset;
                chunks.push(StripChunk::new(chunk, writable_offset, writable_len));
            }

            if n > 1 {
                let last_nonempty = info.last.x1 > info.last.x0;
                let interior_count = n - 1 - (last_nonempty as u32);
                for k in 0..interior_count {
                    let offset = info.first.x1 + k as u64 * WRITE_SIZE;
                    let chunk = IoChunk::new(offset, WRITE_SIZE);
                    chunks.push(StripChunk::new(chunk, 0, WRITE_SIZE as usize));
                }

                if last_nonempty {
                    if info.has_last_seam {
                        let next = infos[(i + 1) as usize];
                        let chunk_len = next.first.x1 - info.last.x0;
                        let chunk = IoChunk::new(info.last.x0, chunk_len);
                        let writable_len = info.last.len() as usize;
                        chunks.push(StripChunk::new(Arc::clone(&chunk), 0, writable_len));
                        pending_seam = Some(chunk);
                    } else {
                        let chunk_len = info.last.len();
                        let chunk = IoChunk::new(info.last.x0, chunk_len);
                        chunks.push(StripChunk::new(chunk, 0, chunk_len as usize));
                    }
                }
            }

            let logical_len = geometry.strip_byte_len(i);
            validate_strip(&chunks, logical_len, &info, i)?;
            strips.push(Strip {
                index: i,
                chunks,
                logical_len,
            });
        }

        Ok(Self {
            geometry,
            header_size,
            strips,
        })
    }

    pub fn geometry(&self) -> &ImageGeometry {
        &self.geometry
    }

    pub fn header_size(&self) -> u64 {
        self.header_size
    }

    pub fn num_strips(&self) -> u32 {
        self.strips.len() as u32
    }

    pub fn strip(&self, index: u32) -> &Strip {
        &self.strips[index as usize]
    }
}

/// Validation required by the plan (asserted, mandatory): sum of writable
/// lengths covers the strip's logical byte length, and the first/last
/// chunk boundaries line up with the strip's physical span.
fn validate_strip(
    chunks: &[StripChunk],
    logical_len: u64,
    info: &ChunkInfo,
    strip_index: u32,
) -> Result<()> {
    let written: u64 = chunks.iter().map(|c| c.writable_len as u64).sum();
    if written != logical_len {
        return Err(Error::PlanViolation(format!(
            "strip {strip_index}: writable bytes {written} != logical strip length {logical_len}"
        )));
    }
    let first = chunks.first().expect("non-empty chunk list");
    if first.file_offset() != info.physical_start {
        return Err(Error::PlanViolation(format!(
            "strip {strip_index}: first chunk starts at {} but physical start is {}",
            first.file_offset(),
            info.physical_start
        )));
    }
    let last = chunks.last().expect("non-empty chunk list");
    let last_end = last.file_offset() + last.writable_len as u64;
    if last_end != info.physical_end {
        return Err(Error::PlanViolation(format!(
            "strip {strip_index}: last chunk ends at {last_end} but physical end is {}",
            info.physical_end
        )));
    }
    Ok(())
}
