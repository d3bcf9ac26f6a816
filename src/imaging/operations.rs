//! High-level thumbnail operations.
//!
//! Combines a backend render with content-addressed naming.

use super::backend::{BackendError, ThumbnailBackend};
use super::params::ThumbnailParams;
use crate::cache::checksum;

/// Extension of every derived thumbnail.
pub const DERIVED_EXTENSION: &str = "jpg";

/// An encoded thumbnail and the file name it must be published under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedThumbnail {
    /// `<sha256 of bytes>.jpg`
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Render a thumbnail for `source` and name it after its own content.
pub fn derive_thumbnail(
    backend: &impl ThumbnailBackend,
    source: &[u8],
    params: &ThumbnailParams,
) -> Result<DerivedThumbnail, BackendError> {
    let bytes = backend.render(source, params)?;
    let name = format!("{}.{}", checksum(&bytes), DERIVED_EXTENSION);
    Ok(DerivedThumbnail { name, bytes })
}
