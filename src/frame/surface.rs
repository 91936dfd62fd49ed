//! Host-side copy of a browser's rendered pixels.

use crate::types::Rect;

use super::BYTES_PER_PIXEL;

/// What a call to [`RenderSurface::apply`] changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceUpdate {
    /// The surface was reallocated for new dimensions.
    pub resized: bool,
    /// Region that was copied, clipped to the surface.
    pub dirty: Rect,
    /// Frame sequence number after the update.
    pub frame_number: u64,
}

/// BGRA pixel buffer for one surface (main view or popup).
#[derive(Debug, Default, Clone)]
pub struct RenderSurface {
    /// BGRA pixel data.
    data: Vec<u8>,
    /// Buffer width in pixels.
    width: i32,
    /// Buffer height in pixels.
    height: i32,
    /// Frame sequence number.
    frame_number: u64,
}

impl RenderSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// True until the first frame arrives.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// BGRA pixels, `width * 4` bytes per row.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Copies a frame into the surface.
    ///
    /// `pixels` is the whole `width` x `height` frame. When the dimensions
    /// differ from the current ones the surface is reallocated and fully
    /// copied; otherwise only `dirty` is copied, row by row.
    pub fn apply(&mut self, width: i32, height: i32, pixels: &[u8], dirty: Rect) -> SurfaceUpdate {
        let resized = width != self.width || height != self.height || self.data.is_empty();
        let stride = width.max(0) as usize * BYTES_PER_PIXEL;
        let size = stride * height.max(0) as usize;

        let dirty = if resized {
            self.data = vec![0; size];
            self.width = width;
            self.height = height;

            let len = size.min(pixels.len());
            self.data[..len].copy_from_slice(&pixels[..len]);
            Rect::full(width, height)
        } else {
            let rect = dirty.clip(width, height);
            let row_len = rect.width as usize * BYTES_PER_PIXEL;

            for row in rect.y as usize..(rect.y + rect.height) as usize {
                let offset = row * stride + rect.x as usize * BYTES_PER_PIXEL;
                if offset + row_len <= pixels.len() && offset + row_len <= self.data.len() {
                    self.data[offset..offset + row_len].copy_from_slice(&pixels[offset..offset + row_len]);
                }
            }
            rect
        };

        self.frame_number += 1;

        SurfaceUpdate {
            resized,
            dirty,
            frame_number: self.frame_number,
        }
    }

    /// Converts BGRA data to RGBA format.
    pub fn to_rgba(&self) -> Vec<u8> {
        let mut rgba = Vec::with_capacity(self.data.len());
        for chunk in self.data.chunks_exact(4) {
            // BGRA -> RGBA
            rgba.push(chunk[2]); // R
            rgba.push(chunk[1]); // G
            rgba.push(chunk[0]); // B
            rgba.push(chunk[3]); // A
        }
        rgba
    }

    /// Drops the pixel data, e.g. when a popup is hidden.
    pub fn clear(&mut self) {
        self.data = Vec::new();
        self.width = 0;
        self.height = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: i32, height: i32, value: u8) -> Vec<u8> {
        vec![value; (width * height) as usize * BYTES_PER_PIXEL]
    }

    #[test]
    fn test_first_frame_allocates() {
        let mut surface = RenderSurface::new();
        let update = surface.apply(800, 600, &frame(800, 600, 9), Rect::new(10, 10, 5, 5));

        assert!(update.resized);
        assert_eq!(update.dirty, Rect::full(800, 600));
        assert_eq!((surface.width(), surface.height()), (800, 600));
        assert!(surface.data().iter().all(|&b| b == 9));
    }

    #[test]
    fn test_dirty_rect_copy() {
        let mut surface = RenderSurface::new();
        surface.apply(4, 4, &frame(4, 4, 0), Rect::full(4, 4));

        let update = surface.apply(4, 4, &frame(4, 4, 1), Rect::new(1, 1, 2, 10));
        assert!(!update.resized);
        assert_eq!(update.dirty, Rect::new(1, 1, 2, 3));
        assert_eq!(update.frame_number, 2);

        let stride = 4 * BYTES_PER_PIXEL;
        let data = surface.data();
        // Row 0 untouched, rows 1..4 updated only in columns 1..3.
        assert!(data[..stride].iter().all(|&b| b == 0));
        assert_eq!(data[stride + 4], 1);
        assert_eq!(data[stride], 0);
        assert_eq!(data[stride + 3 * BYTES_PER_PIXEL], 0);
    }

    #[test]
    fn test_resize_reallocates() {
        let mut surface = RenderSurface::new();
        surface.apply(100, 100, &frame(100, 100, 1), Rect::full(100, 100));
        let update = surface.apply(200, 200, &frame(200, 200, 2), Rect::new(0, 0, 10, 10));

        assert!(update.resized);
        assert_eq!(surface.data().len(), 200 * 200 * BYTES_PER_PIXEL);
        assert!(surface.data().iter().all(|&b| b == 2));
    }

    #[test]
    fn test_to_rgba() {
        let mut surface = RenderSurface::new();
        surface.apply(1, 1, &[1, 2, 3, 4], Rect::full(1, 1));
        assert_eq!(surface.to_rgba(), vec![3, 2, 1, 4]);
    }
}
