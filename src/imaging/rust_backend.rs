//! Pure Rust thumbnail backend.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, TIFF, WebP) | `image::load_from_memory` (format sniffed from content) |
//! | Resize | `image::imageops::resize` with `Triangle` |
//! | Flatten alpha | per-pixel replacement with opaque white |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` |
//!
//! JPEG has no alpha channel, and encoding an RGBA buffer directly would drop
//! alpha and reveal whatever colour the transparent pixels happen to hold
//! (usually black). Stamp scans with cut-out perforations are common, so any
//! pixel that is not fully opaque after resizing becomes white.

use super::backend::{BackendError, ThumbnailBackend};
use super::calculations::clamp_to_max_edge;
use super::params::ThumbnailParams;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};

const OPAQUE_WHITE: Rgba<u8> = Rgba([u8::MAX, u8::MAX, u8::MAX, u8::MAX]);

/// Pure Rust backend using the `image` crate.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace every pixel that is not fully opaque with opaque white.
fn flatten_onto_white(img: &mut RgbaImage) {
    for pixel in img.pixels_mut() {
        if pixel[3] != u8::MAX {
            *pixel = OPAQUE_WHITE;
        }
    }
}

fn encode_jpeg(img: RgbaImage, quality: u8) -> Result<Vec<u8>, BackendError> {
    let rgb = DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(img).to_rgb8());
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    rgb.write_with_encoder(encoder)
        .map_err(|e| BackendError::Encode(e.to_string()))?;
    Ok(out)
}

impl ThumbnailBackend for RustBackend {
    fn render(&self, source: &[u8], params: &ThumbnailParams) -> Result<Vec<u8>, BackendError> {
        let img = image::load_from_memory(source).map_err(|e| BackendError::Decode(e.to_string()))?;
        let (width, height) = clamp_to_max_edge((img.width(), img.height()), params.max_edge);

        let mut rgba = img.to_rgba8();
        if rgba.dimensions() != (width, height) {
            rgba = image::imageops::resize(&rgba, width, height, FilterType::Triangle);
        }
        flatten_onto_white(&mut rgba);

        encode_jpeg(rgba, params.quality.value() as u8)
    }
}
