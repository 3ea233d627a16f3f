//! Chunk planner: pure arithmetic mapping strip geometry to aligned I/O
//! footprints. No allocation, no I/O — this module only computes offsets.

use crate::align::WRITE_SIZE;
use crate::error::{Error, Result};
use crate::geometry::ImageGeometry;

/// A half-open byte range `[x0, x1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub x0: u64,
    pub x1: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.x1 - self.x0
    }

    pub fn is_empty(&self) -> bool {
        self.x0 == self.x1
    }
}

/// The aligned I/O footprint of one strip: its first and last aligned
/// blocks, and whether either is shared with a neighboring strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    pub physical_start: u64,
    pub physical_end: u64,
    pub first: ByteRange,
    pub last: ByteRange,
    pub has_first_seam: bool,
    pub has_last_seam: bool,
}

impl ChunkInfo {
    /// Compute the chunk footprint of strip `index` out of `strip_count`.
    pub fn compute(
        geometry: &ImageGeometry,
        header_size: u64,
        index: u32,
        strip_count: u32,
    ) -> Result<Self> {
        if header_size >= WRITE_SIZE {
            return Err(Error::Configuration(format!(
                "header_size ({header_size}) must be strictly less than WRITE_SIZE ({WRITE_SIZE})"
            )));
        }
        let is_first = index == 0;
        let is_last = index == strip_count - 1;

        let physical_start = physical_start(geometry, header_size, index);
        let physical_end_value = physical_end(geometry, header_size, index, is_first);

        let last_x0 = (physical_end_value / WRITE_SIZE) * WRITE_SIZE;
        let last = ByteRange {
            x0: last_x0,
            x1: physical_end_value,
        };

        let prev_boundary = if is_first {
            0
        } else {
            let prev_end = physical_end(geometry, header_size, index - 1, index - 1 == 0);
            (prev_end / WRITE_SIZE) * WRITE_SIZE
        };
        let mut first_x1 = prev_boundary + WRITE_SIZE;
        if first_x1 > last.x1 {
            first_x1 = last.x1;
        }
        let first = ByteRange {
            x0: physical_start,
            x1: first_x1,
        };

        let has_first_seam = !is_first && first.x0 % WRITE_SIZE != 0;
        let has_last_seam = !is_last && last.x1 % WRITE_SIZE != 0;

        let info = Self {
            physical_start,
            physical_end: physical_end_value,
            first,
            last,
            has_first_seam,
            has_last_seam,
        };
        info.assert_invariants(strip_count, index);
        Ok(info)
    }

    fn assert_invariants(&self, strip_count: u32, index: u32) {
        let single_chunk = self.first.x1 == self.last.x1;
        let is_last = index == strip_count - 1;

        if !single_chunk {
            debug_assert!(
                self.first.x1 % WRITE_SIZE == 0,
                "first.x1 must be write-aligned unless the strip is single-chunk"
            );
        }
        let last_x0_is_tail_of_final_strip = self.last.x0 == self.last.x1 && is_last;
        debug_assert!(
            self.last.x0 % WRITE_SIZE == 0 || last_x0_is_tail_of_final_strip,
            "last.x0 must be write-aligned unless it is the unaligned tail of the final strip"
        );
        if self.last.x0 != self.first.x1 {
            debug_assert!(
                (self.last.x0 - self.first.x1) % WRITE_SIZE == 0,
                "interior span between first.x1 and last.x0 must be a multiple of WRITE_SIZE"
            );
        }
        debug_assert!(self.first.x0 <= self.first.x1);
        debug_assert!(self.first.x1 <= self.last.x0);
        debug_assert!(self.last.x0 <= self.last.x1);
    }

    /// Number of aligned `IOChunk`s this strip is split into, under the
    /// chunked planning strategy (see [`crate::stripper`]).
    ///
    /// A degenerate empty last range (the strip's physical end is itself
    /// write-aligned) does not count as a chunk of its own; it is already
    /// covered by the interior tiling.
    pub fn num_chunks(&self) -> u32 {
        if self.first.x1 == self.last.x1 {
            return 1;
        }
        let interior_span = self.last.x0 - self.first.x1;
        let interior_chunks = (interior_span / WRITE_SIZE) as u32;
        let last_nonempty = self.last.x1 > self.last.x0;
        1 + interior_chunks + last_nonempty as u32
    }
}

fn physical_start(geometry: &ImageGeometry, header_size: u64, index: u32) -> u64 {
    if index == 0 {
        0
    } else {
        header_size + geometry.logical_offset(index)
    }
}

fn physical_end(geometry: &ImageGeometry, header_size: u64, index: u32, is_first: bool) -> u64 {
    physical_start(geometry, header_size, index)
        + geometry.strip_byte_len(index)
        + if is_first { header_size } else { 0 }
}

#[cfg(test)]
mod test {
    use super::*;

    fn geom(width: u32, height: u32, nominal: u32) -> ImageGeometry {
        ImageGeometry::new(width, height, 1, nominal).unwrap()
    }

    #[test]
    fn s1_aligned_geometry_single_chunk_no_seams() {
        let g = geom(2048, 32, 32);
        let info = ChunkInfo::compute(&g, 0, 0, 1).unwrap();
        assert_eq!(info.physical_start, 0);
        assert_eq!(info.physical_end, 65536);
        assert!(!info.has_first_seam);
        assert!(!info.has_last_seam);
        assert_eq!(info.num_chunks(), 1);
    }

    #[test]
    fn s2_header_induced_shift() {
        let g = geom(32768, 64, 32);
        let strip0 = ChunkInfo::compute(&g, 8, 0, 2).unwrap();
        assert_eq!(strip0.physical_end, 1_048_584);
        assert!(!strip0.has_first_seam);
        assert!(strip0.has_last_seam);
        // strip 0's seam tail is 8 bytes: [1_048_576, 1_048_584)
        assert_eq!(strip0.last.len(), 8);

        let strip1 = ChunkInfo::compute(&g, 8, 1, 2).unwrap();
        assert_eq!(strip1.physical_end, 2_097_160);
        assert!(strip1.has_first_seam);
        assert!(!strip1.has_last_seam);
        // strip 1's seam head is 32,760 bytes, abutting strip 0's 8-byte tail
        assert_eq!(strip1.first.len(), 32_760);
        assert_eq!(strip0.last.len() + strip1.first.len(), WRITE_SIZE);
    }

    #[test]
    fn s3_three_strip_seam_chain_covers_without_gaps() {
        let g = geom(88000, 32005, 32);
        let strip_count = g.strip_count();
        assert_eq!(strip_count, 1001);
        let mut prev_end: Option<u64> = None;
        for i in 0..strip_count {
            let info = ChunkInfo::compute(&g, 8, i, strip_count).unwrap();
            if let Some(pe) = prev_end {
                assert_eq!(info.physical_start, pe);
            }
            prev_end = Some(info.physical_end);
        }
        assert_eq!(prev_end.unwrap(), 8 + g.total_pixel_bytes());
    }

    #[test]
    fn s4_final_short_strip_unaligned_tail() {
        let g = geom(1024, 33, 32);
        let strip_count = g.strip_count();
        assert_eq!(strip_count, 2);
        let strip0 = ChunkInfo::compute(&g, 8, 0, strip_count).unwrap();
        let strip1 = ChunkInfo::compute(&g, 8, 1, strip_count).unwrap();
        assert!(strip1.has_first_seam);
        // strip 1 is single-chunk: its sole chunk is shared with strip 0's
        // seam tail, and its real length is clamped to the true end of the
        // image rather than forced to a full WRITE_SIZE.
        assert_eq!(strip1.first.x1, strip1.last.x1);
        let shared_chunk_len = strip1.first.x1 - strip0.last.x0;
        assert_eq!(shared_chunk_len, 1024 + 8);
    }

    #[test]
    fn num_chunks_ignores_degenerate_aligned_tail() {
        // a single strip whose physical end lands exactly on a WRITE_SIZE
        // boundary must not emit a spurious zero-length trailing chunk.
        let g = geom(32768 * 3 / 32, 32, 32); // packedRowBytes * 32 == 3 * WRITE_SIZE
        let info = ChunkInfo::compute(&g, 0, 0, 1).unwrap();
        assert_eq!(info.last.len(), 0);
        assert_eq!(info.num_chunks(), 3);
    }

    #[test]
    fn header_size_equal_to_write_size_is_configuration_error() {
        let g = geom(1024, 32, 32);
        assert!(ChunkInfo::compute(&g, WRITE_SIZE, 0, 1).is_err());
    }
}
