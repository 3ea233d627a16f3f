//! Image geometry: the immutable description of the pixel grid being
//! encoded, and the strip arithmetic derived from it.

use crate::error::{Error, Result};

/// Width/height/component-count/strip-height description of an image.
///
/// Bytes-per-sample is fixed at 1 (8 bits per sample), matching the only
/// sample depth this encoder emits (see [`crate::format`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageGeometry {
    width: u32,
    height: u32,
    component_count: u16,
    nominal_strip_height: u32,
}

impl ImageGeometry {
    /// Build a new geometry, validating that width, height, component count,
    /// and nominal strip height are all nonzero.
    pub fn new(
        width: u32,
        height: u32,
        component_count: u16,
        nominal_strip_height: u32,
    ) -> Result<Self> {
        if width == 0 || height == 0 || component_count == 0 || nominal_strip_height == 0 {
            return Err(Error::Configuration(format!(
                "image geometry must be nonzero in every dimension \
                 (width={width}, height={height}, components={component_count}, \
                 nominal_strip_height={nominal_strip_height})"
            )));
        }
        Ok(Self {
            width,
            height,
            component_count,
            nominal_strip_height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn component_count(&self) -> u16 {
        self.component_count
    }

    pub fn nominal_strip_height(&self) -> u32 {
        self.nominal_strip_height
    }

    /// Bytes occupied by one packed row: `width * componentCount`, one byte
    /// per sample.
    pub fn packed_row_bytes(&self) -> u64 {
        self.width as u64 * self.component_count as u64
    }

    /// Number of strips covering the image height.
    pub fn strip_count(&self) -> u32 {
        self.height.div_ceil(self.nominal_strip_height)
    }

    /// Row height of the last strip, which may be shorter than
    /// `nominal_strip_height`.
    pub fn final_strip_height(&self) -> u32 {
        self.height - (self.strip_count() - 1) * self.nominal_strip_height
    }

    /// Row height of strip `i`.
    pub fn strip_height(&self, strip: u32) -> u32 {
        debug_assert!(strip < self.strip_count());
        if strip == self.strip_count() - 1 {
            self.final_strip_height()
        } else {
            self.nominal_strip_height
        }
    }

    /// Byte length of strip `i`'s pixel data.
    pub fn strip_byte_len(&self, strip: u32) -> u64 {
        self.strip_height(strip) as u64 * self.packed_row_bytes()
    }

    /// Logical (header-less) byte offset of strip `i` within the pixel
    /// stream.
    pub fn logical_offset(&self, strip: u32) -> u64 {
        strip as u64 * self.nominal_strip_height as u64 * self.packed_row_bytes()
    }

    /// Sum of every strip's byte length; the size of the pixel region of the
    /// file, excluding the header.
    pub fn total_pixel_bytes(&self) -> u64 {
        self.logical_offset(self.strip_count() - 1) + self.strip_byte_len(self.strip_count() - 1)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_zero_dimensions() {
        assert!(ImageGeometry::new(0, 10, 1, 4).is_err());
        assert!(ImageGeometry::new(10, 0, 1, 4).is_err());
        assert!(ImageGeometry::new(10, 10, 0, 4).is_err());
        assert!(ImageGeometry::new(10, 10, 1, 0).is_err());
    }

    #[test]
    fn single_strip_exact_fit() {
        let g = ImageGeometry::new(2048, 32, 1, 32).unwrap();
        assert_eq!(g.strip_count(), 1);
        assert_eq!(g.final_strip_height(), 32);
        assert_eq!(g.strip_byte_len(0), 2048 * 32);
    }

    #[test]
    fn final_strip_shorter() {
        let g = ImageGeometry::new(1024, 33, 1, 32).unwrap();
        assert_eq!(g.strip_count(), 2);
        assert_eq!(g.strip_height(0), 32);
        assert_eq!(g.strip_height(1), 1);
        assert_eq!(g.strip_byte_len(1), 1024);
    }

    #[test]
    fn many_strip_chain() {
        let g = ImageGeometry::new(88000, 32005, 1, 32).unwrap();
        assert_eq!(g.strip_count(), 1001);
        assert_eq!(g.final_strip_height(), 32005 - 1000 * 32);
        assert_eq!(g.total_pixel_bytes(), 88000u64 * 32005);
    }
}
