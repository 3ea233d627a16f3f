//! High-throughput, strip-organized, uncompressed TIFF encoder with
//! write-aligned-block I/O planning.

pub mod align;
pub mod buffer_pool;
pub mod chunk;
pub mod error;
pub mod format;
pub mod geometry;
pub mod io_backend;
pub mod planner;
pub mod serializer;
pub mod stripper;

pub use align::{AlignedBuf, ALIGNMENT, WRITE_SIZE};
pub use buffer_pool::BufferPool;
pub use chunk::{IoChunk, StripChunk};
pub use error::{Error, Result};
pub use format::{FormatOptions, ImageFormat, PlanningStrategy};
pub use geometry::ImageGeometry;
pub use io_backend::{IoBackend, OpenMode, WriteRequest};
pub use planner::{ByteRange, ChunkInfo};
pub use serializer::Serializer;
pub use stripper::{ImageStripper, Strip};
