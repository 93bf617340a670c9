//! CPU-side pixel buffer for the composited result.
//!
//! The compositor reads the GPU canvas back through a staging texture
//! whose row pitch is driver-chosen; [`PixelBuffer::copy_from_rows`]
//! compacts those rows into a dense `stride == width * 4` buffer. The
//! CPU tonemap path writes its output through [`PixelBuffer::blit`].

use crate::error::{CaptureError, CaptureResult};

/// Final composited image: BGRA, 4 bytes per pixel, row-major,
/// `stride >= width * 4`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    stride: usize,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Allocate a zeroed (transparent black) buffer.
    pub fn new(width: u32, height: u32) -> CaptureResult<Self> {
        let stride = (width as usize)
            .checked_mul(4)
            .ok_or(CaptureError::BufferOverflow)?;
        let len = stride
            .checked_mul(height as usize)
            .ok_or(CaptureError::BufferOverflow)?;
        Ok(Self {
            width,
            height,
            stride,
            data: vec![0u8; len],
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row. Always `width * 4` for buffers built here, but
    /// consumers should not assume that.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// BGRA bytes of the pixel at (x, y).
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.stride + x as usize * 4;
        self.data
            .get(offset..offset + 4)
            .map(|px| [px[0], px[1], px[2], px[3]])
    }

    /// Build a buffer from `height` rows starting at `rows`, each
    /// `src_pitch` bytes apart. Only `width * 4` bytes per row are
    /// copied; the pitch tail is discarded.
    ///
    /// `rows` must cover `(height - 1) * src_pitch + width * 4` bytes.
    pub fn copy_from_rows(
        width: u32,
        height: u32,
        src_pitch: usize,
        rows: &[u8],
    ) -> CaptureResult<Self> {
        let mut buffer = Self::new(width, height)?;
        let row_bytes = buffer.stride;
        if src_pitch < row_bytes {
            return Err(CaptureError::BufferOverflow);
        }
        let required = (height as usize)
            .saturating_sub(1)
            .checked_mul(src_pitch)
            .and_then(|base| base.checked_add(row_bytes))
            .ok_or(CaptureError::BufferOverflow)?;
        if height > 0 && rows.len() < required {
            return Err(CaptureError::BufferOverflow);
        }

        for y in 0..height as usize {
            let src_start = y * src_pitch;
            let dst_start = y * row_bytes;
            buffer.data[dst_start..dst_start + row_bytes]
                .copy_from_slice(&rows[src_start..src_start + row_bytes]);
        }
        Ok(buffer)
    }

    /// Copy a `width × height` block of BGRA rows into this buffer at
    /// (dst_x, dst_y). `src` rows are `src_pitch` bytes apart. Bounds
    /// are checked; partial writes never happen.
    pub fn blit(
        &mut self,
        dst_x: u32,
        dst_y: u32,
        width: u32,
        height: u32,
        src: &[u8],
        src_pitch: usize,
    ) -> CaptureResult<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }

        let row_bytes = (width as usize)
            .checked_mul(4)
            .ok_or(CaptureError::BufferOverflow)?;
        if src_pitch < row_bytes {
            return Err(CaptureError::BufferOverflow);
        }

        let dst_right = dst_x.checked_add(width).ok_or(CaptureError::BufferOverflow)?;
        let dst_bottom = dst_y
            .checked_add(height)
            .ok_or(CaptureError::BufferOverflow)?;
        if dst_right > self.width || dst_bottom > self.height {
            return Err(CaptureError::BufferOverflow);
        }

        let src_required = (height as usize - 1)
            .checked_mul(src_pitch)
            .and_then(|base| base.checked_add(row_bytes))
            .ok_or(CaptureError::BufferOverflow)?;
        if src.len() < src_required {
            return Err(CaptureError::BufferOverflow);
        }

        let mut dst_start = dst_y as usize * self.stride + dst_x as usize * 4;
        let mut src_start = 0usize;
        for _ in 0..height {
            self.data[dst_start..dst_start + row_bytes]
                .copy_from_slice(&src[src_start..src_start + row_bytes]);
            dst_start += self.stride;
            src_start += src_pitch;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_rows(width: u32, height: u32, bgra: [u8; 4]) -> Vec<u8> {
        let mut rows = vec![0u8; (width * height * 4) as usize];
        for px in rows.chunks_exact_mut(4) {
            px.copy_from_slice(&bgra);
        }
        rows
    }

    #[test]
    fn copy_from_rows_compacts_pitch() {
        // 2×2 image with an 12-byte pitch (4 bytes of tail per row).
        let rows: Vec<u8> = vec![
            1, 2, 3, 4, 5, 6, 7, 8, 0xAA, 0xAA, 0xAA, 0xAA, //
            9, 10, 11, 12, 13, 14, 15, 16, 0xBB, 0xBB, 0xBB, 0xBB,
        ];
        let buffer = PixelBuffer::copy_from_rows(2, 2, 12, &rows).unwrap();
        assert_eq!(buffer.stride(), 8);
        assert_eq!(buffer.pixel(1, 0), Some([5, 6, 7, 8]));
        assert_eq!(buffer.pixel(0, 1), Some([9, 10, 11, 12]));
        assert_eq!(buffer.pixel(1, 1), Some([13, 14, 15, 16]));
    }

    #[test]
    fn copy_from_rows_rejects_short_input() {
        let rows = vec![0u8; 8];
        assert!(matches!(
            PixelBuffer::copy_from_rows(2, 2, 8, &rows),
            Err(CaptureError::BufferOverflow)
        ));
    }

    #[test]
    fn blit_rejects_out_of_bounds_destination() {
        let mut canvas = PixelBuffer::new(100, 100).unwrap();
        let src = solid_rows(50, 50, [1, 1, 1, 255]);
        assert!(matches!(
            canvas.blit(60, 60, 50, 50, &src, 200),
            Err(CaptureError::BufferOverflow)
        ));
        // Failed blit must not have written anything.
        assert_eq!(canvas.pixel(60, 60), Some([0, 0, 0, 0]));
    }

    /// Two regions at (0,0,100,100) and (100,0,100,100): the final pixel
    /// at (150, 50) is the second region's source pixel at local (50, 50).
    #[test]
    fn side_by_side_regions_land_at_their_offsets() {
        let mut canvas = PixelBuffer::new(200, 100).unwrap();

        let first = solid_rows(100, 100, [10, 20, 30, 255]);
        let mut second = solid_rows(100, 100, [0, 0, 0, 255]);
        // Mark the second region's local (50, 50).
        let marker_offset = (50 * 100 + 50) * 4;
        second[marker_offset..marker_offset + 4].copy_from_slice(&[200, 150, 100, 255]);

        canvas.blit(0, 0, 100, 100, &first, 400).unwrap();
        canvas.blit(100, 0, 100, 100, &second, 400).unwrap();

        assert_eq!(canvas.pixel(150, 50), Some([200, 150, 100, 255]));
        assert_eq!(canvas.pixel(50, 50), Some([10, 20, 30, 255]));
        // Region boundary: (99, 50) still belongs to the first region.
        assert_eq!(canvas.pixel(99, 50), Some([10, 20, 30, 255]));
        assert_eq!(canvas.pixel(100, 50), Some([0, 0, 0, 255]));
    }
}
