//! Identifiers and geometry shared by both sides of the bridge.

use serde::{Deserialize, Serialize};

/// Identifier of a remote browser, assigned by the host's registry.
///
/// Ids are positive and monotonically increasing for the lifetime of a host;
/// they are never handed out twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrowserId(pub i32);

impl BrowserId {
    /// Returns the raw wire value.
    pub fn get(self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for BrowserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for BrowserId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

/// Opaque native window handle (HWND, X11 window, NSView pointer...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowHandle(pub i64);

impl WindowHandle {
    /// The null handle, used for windowless (off-screen) browsers.
    pub const NULL: WindowHandle = WindowHandle(0);

    /// Returns true if this is the null handle.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A rectangle in view coordinates, used for dirty regions, popups and viewports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    /// X coordinate of the top-left corner.
    pub x: i32,
    /// Y coordinate of the top-left corner.
    pub y: i32,
    /// Width of the region.
    pub width: i32,
    /// Height of the region.
    pub height: i32,
}

impl Rect {
    /// Creates a new rectangle.
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Creates a rect covering an entire surface.
    pub fn full(width: i32, height: i32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Returns the area of the region.
    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    /// Returns true if the rect covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Right edge, computed without overflow.
    fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Bottom edge, computed without overflow.
    fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Checks if this rect intersects with another.
    pub fn intersects(&self, other: &Rect) -> bool {
        (self.x as i64) < other.right()
            && self.right() > other.x as i64
            && (self.y as i64) < other.bottom()
            && self.bottom() > other.y as i64
    }

    /// Returns the union of two rectangles (smallest rect containing both).
    ///
    /// Extents that do not fit an `i32` saturate.
    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());

        Rect {
            x,
            y,
            width: saturate(right - x as i64),
            height: saturate(bottom - y as i64),
        }
    }

    /// Clips this rect to fit within bounds.
    ///
    /// Rects that end up outside the bounds clip to an empty rect at the origin.
    pub fn clip(&self, max_width: i32, max_height: i32) -> Rect {
        let x = (self.x as i64).max(0);
        let y = (self.y as i64).max(0);
        let width = self.right().min(max_width as i64) - x;
        let height = self.bottom().min(max_height as i64) - y;

        if width <= 0 || height <= 0 {
            return Rect::default();
        }

        // Both extents are now bounded by the max dimensions.
        Rect {
            x: x as i32,
            y: y as i32,
            width: width as i32,
            height: height as i32,
        }
    }
}

fn saturate(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_clip() {
        let rect = Rect::new(-10, 5, 50, 200);
        let clipped = rect.clip(30, 100);
        assert_eq!(clipped, Rect::new(0, 5, 30, 95));

        let outside = Rect::new(200, 200, 10, 10).clip(100, 100);
        assert!(outside.is_empty());
    }

    #[test]
    fn test_rect_union_and_intersection() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 5, 10, 10);
        assert!(a.intersects(&b));
        assert_eq!(a.union(&b), Rect::new(0, 0, 15, 15));
        assert!(!a.intersects(&Rect::new(20, 20, 1, 1)));
    }

    #[test]
    fn test_edges_near_i32_max_do_not_overflow() {
        let far = Rect::new(i32::MAX, 0, 10, 10);
        assert!(far.clip(10, 10).is_empty());
        assert!(!far.intersects(&Rect::new(0, 0, 10, 10)));
        assert!(far.intersects(&Rect::new(i32::MAX - 1, 5, 4, 4)));

        let merged = Rect::new(i32::MIN, 0, 1, 1).union(&far);
        assert_eq!(merged.x, i32::MIN);
        assert_eq!(merged.width, i32::MAX);

        let huge = Rect::new(-5, -5, i32::MAX, i32::MAX).clip(100, 50);
        assert_eq!(huge, Rect::new(0, 0, 100, 50));
    }

    #[test]
    fn test_ids_serialize_transparently() {
        assert_eq!(serde_json::to_string(&BrowserId(7)).unwrap(), "7");
        assert_eq!(serde_json::to_string(&WindowHandle(0x1f)).unwrap(), "31");
        assert_eq!(WindowHandle(0x1f).to_string(), "0x1f");
    }
}
