//! Thumbnail derivation in pure Rust, with no system image tools.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** | `image::load_from_memory` (JPEG, PNG, GIF, TIFF, WebP) |
//! | **Resize** | `image::imageops::resize` with a triangle (bilinear) filter |
//! | **Flatten** | non-opaque pixels replaced by opaque white |
//! | **Encode** | `image::codecs::jpeg::JpegEncoder` |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing the derivation
//! - **Backend**: [`ThumbnailBackend`] trait + [`RustBackend`]
//! - **Operations**: Backend call plus content-addressed naming

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, ThumbnailBackend};
pub use calculations::clamp_to_max_edge;
pub use operations::{DerivedThumbnail, derive_thumbnail};
pub use params::{Quality, THUMBNAIL_MAX_EDGE, ThumbnailParams};
pub use rust_backend::RustBackend;
