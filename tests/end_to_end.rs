//! End-to-end encode-to-disk tests on the synchronous back-end, covering the
//! concrete scenarios this encoder is built against.

use std::sync::Barrier;

use stripwriter::{FormatOptions, ImageFormat, ImageGeometry, PlanningStrategy};
use tiff::decoder::Decoder;

fn ramp_byte(logical_offset: u64) -> u8 {
    (logical_offset % 256) as u8
}

fn fill_ramp(logical_offset: u64, slice: &mut [u8]) {
    for (i, b) in slice.iter_mut().enumerate() {
        *b = ramp_byte(logical_offset + i as u64);
    }
}

fn assert_pixel_region_matches(contents: &[u8], header_size: u64, pixel_len: u64) {
    let start = header_size as usize;
    let end = start + pixel_len as usize;
    for p in 0..pixel_len {
        assert_eq!(
            contents[start + p as usize],
            ramp_byte(p),
            "pixel byte mismatch at logical offset {p}"
        );
    }
    assert!(contents.len() >= end, "file too short to contain the full pixel region");
}

/// S1 — aligned geometry, default non-chunked strategy: one strip, one pool
/// buffer, one write, no seams.
#[test]
fn s1_aligned_geometry_non_chunked() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s1.tif");
    let geometry = ImageGeometry::new(2048, 32, 1, 32).unwrap();
    let options = FormatOptions {
        header_size: 0,
        planning: PlanningStrategy::NonChunked,
        direct: false,
        use_uring: false,
        flush_on_close: true,
    };
    let format = ImageFormat::create(&path, geometry, options).unwrap();
    let mut worker = format.worker_serializer().unwrap();
    format.encode_strip(&mut worker, 0, fill_ramp).unwrap();

    let contents = std::fs::read(&path).unwrap();
    assert_eq!(contents.len() as u64, geometry.total_pixel_bytes());
    assert_pixel_region_matches(&contents, 0, geometry.total_pixel_bytes());
}

/// S2 — header-induced shift, chunked strategy: two strips sharing one
/// seam chunk, finalized with a real TIFF header and IFD.
#[test]
fn s2_header_induced_shift_chunked() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s2.tif");
    let geometry = ImageGeometry::new(32768, 64, 1, 32).unwrap();
    let options = FormatOptions {
        header_size: 8,
        planning: PlanningStrategy::Chunked,
        direct: false,
        use_uring: false,
        flush_on_close: true,
    };
    let format = ImageFormat::create(&path, geometry, options).unwrap();
    let mut worker = format.worker_serializer().unwrap();
    for strip in 0..format.num_strips() {
        format.encode_strip(&mut worker, strip, fill_ramp).unwrap();
    }

    let contents = std::fs::read(&path).unwrap();
    assert_eq!(&contents[..4], &[0x49, 0x49, 0x2a, 0x00], "classic little-endian TIFF magic");
    assert_pixel_region_matches(&contents, 8, geometry.total_pixel_bytes());
}

/// S3 analogue — a multi-strip seam chain. The literal 1001-strip geometry
/// from the chunk-planner arithmetic is covered without I/O in
/// `planner::test::s3_*` and `stripper::test::s3_*`; this exercises the same
/// non-alignment property end to end at a size practical for a test run.
#[test]
fn s3_multi_strip_seam_chain_chunked() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s3.tif");
    let geometry = ImageGeometry::new(8800, 320, 1, 32).unwrap();
    assert_eq!(geometry.strip_count(), 10);
    let options = FormatOptions {
        header_size: 8,
        planning: PlanningStrategy::Chunked,
        direct: false,
        use_uring: false,
        flush_on_close: true,
    };
    let format = ImageFormat::create(&path, geometry, options).unwrap();
    let mut worker = format.worker_serializer().unwrap();
    for strip in 0..format.num_strips() {
        format.encode_strip(&mut worker, strip, fill_ramp).unwrap();
    }

    let contents = std::fs::read(&path).unwrap();
    assert_pixel_region_matches(&contents, 8, geometry.total_pixel_bytes());
}

/// S4 — final short strip, chunked strategy: strip 1's final chunk has an
/// unaligned length at an aligned offset.
#[test]
fn s4_final_short_strip_chunked() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s4.tif");
    let geometry = ImageGeometry::new(1024, 33, 1, 32).unwrap();
    assert_eq!(geometry.strip_count(), 2);
    let options = FormatOptions {
        header_size: 8,
        planning: PlanningStrategy::Chunked,
        direct: false,
        use_uring: false,
        flush_on_close: true,
    };
    let format = ImageFormat::create(&path, geometry, options).unwrap();
    let mut worker = format.worker_serializer().unwrap();
    for strip in 0..format.num_strips() {
        format.encode_strip(&mut worker, strip, fill_ramp).unwrap();
    }

    let contents = std::fs::read(&path).unwrap();
    assert_pixel_region_matches(&contents, 8, geometry.total_pixel_bytes());
}

/// S5 — concurrent seam: two workers race to fill and acquire a shared
/// chunk. Exactly one of them issues the write; the resulting bytes are
/// correct regardless of which one wins.
#[test]
fn s5_concurrent_seam_race() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s5.tif");
    // rowBytes=1000, stripByteLen=32000: strip 0's physical end (32008) is
    // not write-aligned, so the two strips share a seam chunk.
    let geometry = ImageGeometry::new(1000, 64, 1, 32).unwrap();
    let options = FormatOptions {
        header_size: 8,
        planning: PlanningStrategy::Chunked,
        direct: false,
        use_uring: false,
        flush_on_close: true,
    };
    let format = ImageFormat::create(&path, geometry, options).unwrap();

    let barrier = Barrier::new(2);
    std::thread::scope(|scope| {
        for strip in 0..2u32 {
            let format = &format;
            let barrier = &barrier;
            scope.spawn(move || {
                let mut worker = format.worker_serializer().unwrap();
                barrier.wait();
                format.encode_strip(&mut worker, strip, fill_ramp).unwrap();
            });
        }
    });
    format.close().unwrap();

    let contents = std::fs::read(&path).unwrap();
    assert_pixel_region_matches(&contents, 8, geometry.total_pixel_bytes());
}

/// S6 — finalization header: after all pixels encode, the file starts with
/// the classic-TIFF magic and a nonzero directory offset, and an independent
/// TIFF reader recovers the declared geometry.
#[test]
fn s6_finalization_header_decodes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s6.tif");
    let geometry = ImageGeometry::new(64, 64, 1, 32).unwrap();
    let options = FormatOptions {
        header_size: 8,
        planning: PlanningStrategy::Chunked,
        direct: false,
        use_uring: false,
        flush_on_close: true,
    };
    let format = ImageFormat::create(&path, geometry, options).unwrap();
    let mut worker = format.worker_serializer().unwrap();
    for strip in 0..format.num_strips() {
        format.encode_strip(&mut worker, strip, fill_ramp).unwrap();
    }

    let contents = std::fs::read(&path).unwrap();
    assert_eq!(&contents[..4], &[0x49, 0x49, 0x2a, 0x00]);
    let directory_offset = u32::from_le_bytes(contents[4..8].try_into().unwrap());
    assert_ne!(directory_offset, 0);

    let file = std::fs::File::open(&path).unwrap();
    let mut decoder = Decoder::new(file).unwrap();
    assert_eq!(decoder.dimensions().unwrap(), (geometry.width(), geometry.height()));
}

/// S7 — word-padded directory: a geometry whose `header_size +
/// total_pixel_bytes` is not a multiple of 4, so the tiff crate inserts 1-3
/// zero padding bytes before the directory. The directory offset must be
/// read back from the library's own header rather than assumed contiguous
/// with the end of the pixel region.
#[test]
fn s7_word_padded_directory_offset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s7.tif");
    let geometry = ImageGeometry::new(1001, 33, 1, 32).unwrap();
    assert_ne!((8 + geometry.total_pixel_bytes()) % 4, 0, "fixture must exercise word padding");
    let options = FormatOptions {
        header_size: 8,
        planning: PlanningStrategy::Chunked,
        direct: false,
        use_uring: false,
        flush_on_close: true,
    };
    let format = ImageFormat::create(&path, geometry, options).unwrap();
    let mut worker = format.worker_serializer().unwrap();
    for strip in 0..format.num_strips() {
        format.encode_strip(&mut worker, strip, fill_ramp).unwrap();
    }

    let contents = std::fs::read(&path).unwrap();
    assert_eq!(&contents[..4], &[0x49, 0x49, 0x2a, 0x00]);
    assert_pixel_region_matches(&contents, 8, geometry.total_pixel_bytes());

    let file = std::fs::File::open(&path).unwrap();
    let mut decoder = Decoder::new(file).unwrap();
    assert_eq!(decoder.dimensions().unwrap(), (geometry.width(), geometry.height()));
}

/// Running `close` twice on a format whose pixels were already fully
/// encoded (and thus already finalized and closed) is a no-op.
#[test]
fn close_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("idempotent.tif");
    let geometry = ImageGeometry::new(2048, 32, 1, 32).unwrap();
    let options = FormatOptions {
        header_size: 0,
        planning: PlanningStrategy::NonChunked,
        direct: false,
        use_uring: false,
        flush_on_close: true,
    };
    let format = ImageFormat::create(&path, geometry, options).unwrap();
    let mut worker = format.worker_serializer().unwrap();
    format.encode_strip(&mut worker, 0, fill_ramp).unwrap();

    format.close().unwrap();
    format.close().unwrap();
}
