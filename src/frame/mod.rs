//! Shared-memory frame exchange between the browser process and the host.
//!
//! The browser process renders into one named region per surface (main view
//! and popup) and announces it with `NotifyPaint`. The host opens the region,
//! trusts the dimensions in the region's header and copies the dirty part
//! into its local [`RenderSurface`].

pub mod shared_memory;
pub mod surface;

pub use self::shared_memory::{FrameHeader, FrameReader, FrameWriter, BYTES_PER_PIXEL, FRAME_HEADER_LEN};
pub use surface::{RenderSurface, SurfaceUpdate};

use serde::{Deserialize, Serialize};

/// Which surface of a browser a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceKind {
    View,
    Popup,
}

impl SurfaceKind {
    pub fn from_popup_flag(is_popup: bool) -> Self {
        if is_popup {
            SurfaceKind::Popup
        } else {
            SurfaceKind::View
        }
    }

    pub fn is_popup(self) -> bool {
        self == SurfaceKind::Popup
    }
}

impl std::fmt::Display for SurfaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SurfaceKind::View => write!(f, "view"),
            SurfaceKind::Popup => write!(f, "popup"),
        }
    }
}

/// Frame transport errors
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Shared memory error: {0}")]
    Shmem(#[from] ::shared_memory::ShmemError),

    #[error("Shared memory region too small: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Invalid frame header: {width}x{height}")]
    InvalidHeader { width: i32, height: i32 },

    #[error("Pixel buffer has {actual} bytes, {width}x{height} frame needs {expected}")]
    PixelCountMismatch {
        width: i32,
        height: i32,
        expected: usize,
        actual: usize,
    },
}
