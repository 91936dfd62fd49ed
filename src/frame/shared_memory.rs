//! Named shared-memory regions carrying one BGRA frame each.
//!
//! Layout: `width: i32 LE`, `height: i32 LE`, then `width * height` BGRA
//! pixels with a stride of `width * 4`. There is no cross-process locking;
//! each region has a single writer (browser process) and a single reader
//! (host) per frame.

use shared_memory::{Shmem, ShmemConf};
use tracing::debug;
use uuid::Uuid;

use super::{FrameError, SurfaceKind};

/// Bytes before the first pixel.
pub const FRAME_HEADER_LEN: usize = 8;

/// BGRA
pub const BYTES_PER_PIXEL: usize = 4;

/// Dimensions stored at the start of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub width: i32,
    pub height: i32,
}

impl FrameHeader {
    pub fn new(width: i32, height: i32) -> Result<Self, FrameError> {
        if width <= 0 || height <= 0 {
            return Err(FrameError::InvalidHeader { width, height });
        }
        Ok(Self { width, height })
    }

    /// Size of the pixel data in bytes.
    pub fn pixel_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    /// Header plus pixels.
    pub fn frame_len(&self) -> usize {
        FRAME_HEADER_LEN + self.pixel_len()
    }

    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut bytes = [0u8; FRAME_HEADER_LEN];
        bytes[..4].copy_from_slice(&self.width.to_le_bytes());
        bytes[4..].copy_from_slice(&self.height.to_le_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(FrameError::Truncated {
                expected: FRAME_HEADER_LEN,
                actual: bytes.len(),
            });
        }

        let width = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let height = i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Self::new(width, height)
    }
}

/// A mapped region together with the name it was created or opened under.
struct SharedRegion {
    shmem: Shmem,
    name: String,
}

// SAFETY: `Shmem` only holds the mapping's raw pointer and OS handles. The
// mapping stays valid until the value is dropped, and every access through
// `SharedRegion` goes through `&self`/`&mut self`.
unsafe impl Send for SharedRegion {}

impl SharedRegion {
    fn create(kind: SurfaceKind, size: usize) -> Result<Self, FrameError> {
        let name = region_name(kind);
        let shmem = ShmemConf::new().size(size).os_id(&name).create()?;
        debug!("Created shared memory region {} ({} bytes)", name, shmem.len());
        Ok(Self { shmem, name })
    }

    fn open(name: &str) -> Result<Self, FrameError> {
        let shmem = ShmemConf::new().os_id(name).open()?;
        Ok(Self {
            shmem,
            name: name.to_string(),
        })
    }

    fn len(&self) -> usize {
        self.shmem.len()
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: the mapping is `len()` bytes long and lives as long as `self`.
        unsafe { std::slice::from_raw_parts(self.shmem.as_ptr(), self.shmem.len()) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` makes this the only view in this process.
        unsafe { std::slice::from_raw_parts_mut(self.shmem.as_ptr(), self.shmem.len()) }
    }
}

/// `kib_<kind>_<16 hex>`, with the leading slash POSIX shm names use.
fn region_name(kind: SurfaceKind) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    let name = format!("kib_{}_{}", kind, &suffix[..16]);
    if cfg!(unix) {
        format!("/{}", name)
    } else {
        name
    }
}

/// Writes frames for one surface, reusing its region while the frame fits.
pub struct FrameWriter {
    kind: SurfaceKind,
    region: Option<SharedRegion>,
}

impl FrameWriter {
    pub fn new(kind: SurfaceKind) -> Self {
        Self { kind, region: None }
    }

    pub fn kind(&self) -> SurfaceKind {
        self.kind
    }

    /// Name of the current region.
    pub fn name(&self) -> Option<&str> {
        self.region.as_ref().map(|region| region.name.as_str())
    }

    /// Size of the current region in bytes.
    pub fn capacity(&self) -> usize {
        self.region.as_ref().map(SharedRegion::len).unwrap_or(0)
    }

    /// Writes header and pixels, returning the region name to announce.
    ///
    /// A region that is too small is replaced by a new one under a fresh
    /// name; the old one is unlinked when dropped. Smaller frames reuse the
    /// current region.
    pub fn write_frame(&mut self, width: i32, height: i32, pixels: &[u8]) -> Result<&str, FrameError> {
        let header = FrameHeader::new(width, height)?;
        if pixels.len() != header.pixel_len() {
            return Err(FrameError::PixelCountMismatch {
                width,
                height,
                expected: header.pixel_len(),
                actual: pixels.len(),
            });
        }

        let needed = header.frame_len();
        let region = match self.region.take() {
            Some(region) if region.len() >= needed => region,
            old => {
                let region = SharedRegion::create(self.kind, needed)?;
                if let Some(old) = old {
                    debug!("Replacing region {} with {} for {}x{}", old.name, region.name, width, height);
                }
                region
            }
        };
        let region = self.region.insert(region);

        let bytes = region.bytes_mut();
        bytes[..FRAME_HEADER_LEN].copy_from_slice(&header.encode());
        bytes[FRAME_HEADER_LEN..needed].copy_from_slice(pixels);

        Ok(region.name.as_str())
    }
}

/// A frame region opened by the host for one paint.
pub struct FrameReader {
    region: SharedRegion,
    header: FrameHeader,
}

impl FrameReader {
    /// Opens the named region and validates its header and length.
    pub fn open(name: &str) -> Result<Self, FrameError> {
        let region = SharedRegion::open(name)?;
        let header = FrameHeader::decode(region.bytes())?;

        if region.len() < header.frame_len() {
            return Err(FrameError::Truncated {
                expected: header.frame_len(),
                actual: region.len(),
            });
        }

        Ok(Self { region, header })
    }

    pub fn name(&self) -> &str {
        &self.region.name
    }

    /// Dimensions written by the browser process.
    pub fn header(&self) -> FrameHeader {
        self.header
    }

    /// The frame's BGRA pixels.
    pub fn pixels(&self) -> &[u8] {
        &self.region.bytes()[FRAME_HEADER_LEN..self.header.frame_len()]
    }
}
