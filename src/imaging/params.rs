//! Parameter types for thumbnail derivation.
//!
//! These structs describe *what* to produce, not *how*. They are the
//! interface between the pipeline and the [`backend`](super::backend), which
//! allows swapping backends (e.g. for testing with a mock) without changing
//! pipeline logic.
//!
//! Derived file names are content hashes, so changing any parameter here
//! changes every published thumbnail name.

/// Longer edge of every derived thumbnail, in pixels.
pub const THUMBNAIL_MAX_EDGE: u32 = 512;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// Full specification of a thumbnail derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailParams {
    /// Maximum length of the longer edge; smaller images keep their size.
    pub max_edge: u32,
    pub quality: Quality,
}

impl Default for ThumbnailParams {
    fn default() -> Self {
        Self {
            max_edge: THUMBNAIL_MAX_EDGE,
            quality: Quality::default(),
        }
    }
}
