//! Thumbnail backend trait and shared types.
//!
//! The [`ThumbnailBackend`] trait is the one operation the pipeline needs
//! from an imaging library: turn source bytes into encoded thumbnail bytes.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend). Tests use a recording
//! mock so pipeline behaviour (cache hits, GC, failure reporting) can be
//! checked without decoding real images.

use super::params::ThumbnailParams;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error("Failed to encode thumbnail: {0}")]
    Encode(String),
}

/// Trait for thumbnail backends.
///
/// Implementations must be deterministic: the same source bytes and params
/// must always produce the same output bytes, because the output hash is the
/// published file name.
pub trait ThumbnailBackend: Sync {
    /// Decode `source`, shrink it per `params`, and return the encoded thumbnail.
    fn render(&self, source: &[u8], params: &ThumbnailParams) -> Result<Vec<u8>, BackendError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::cache::checksum;
    use std::sync::Mutex;

    /// Mock backend that records renders without decoding anything.
    ///
    /// The "thumbnail" is a fixed prefix plus the source checksum, so equal
    /// sources give equal outputs. Sources starting with `BROKEN` fail.
    /// Uses Mutex (not RefCell) so it is Sync and works with rayon's par_iter.
    #[derive(Default)]
    pub struct MockBackend {
        pub renders: Mutex<Vec<String>>,
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        /// Checksums of every source rendered so far.
        pub fn rendered(&self) -> Vec<String> {
            self.renders.lock().unwrap().clone()
        }

        pub fn render_count(&self) -> usize {
            self.renders.lock().unwrap().len()
        }
    }

    impl ThumbnailBackend for MockBackend {
        fn render(
            &self,
            source: &[u8],
            params: &ThumbnailParams,
        ) -> Result<Vec<u8>, BackendError> {
            if source.starts_with(b"BROKEN") {
                return Err(BackendError::Decode("mock: broken source".into()));
            }
            let sum = checksum(source);
            self.renders.lock().unwrap().push(sum.clone());
            Ok(format!("thumb:{}:{}", params.max_edge, sum).into_bytes())
        }
    }

    #[test]
    fn mock_is_deterministic() {
        let backend = MockBackend::new();
        let params = ThumbnailParams::default();
        let a = backend.render(b"abc", &params).unwrap();
        let b = backend.render(b"abc", &params).unwrap();
        assert_eq!(a, b);
        assert_eq!(backend.render_count(), 2);
    }

    #[test]
    fn mock_fails_on_broken_source() {
        let backend = MockBackend::new();
        let result = backend.render(b"BROKEN data", &ThumbnailParams::default());
        assert!(matches!(result, Err(BackendError::Decode(_))));
        assert_eq!(backend.render_count(), 0);
    }
}
