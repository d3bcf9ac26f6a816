//! Rebuilding the published output directory.
//!
//! ```text
//! pages/
//! ├── index.html …              # frontend files, copied verbatim
//! └── data/
//!     ├── stamps.json           # catalog, image paths → thumbnail names
//!     ├── shops.json            # availability, [] when never scraped
//!     └── images/
//!         └── 3f9a…c1.jpg       # every thumbnail the cache references
//! ```
//!
//! The directory is deleted and written from scratch on every rebuild.

use crate::cache::{CacheError, ThumbnailCache};
use crate::catalog::{Catalog, CatalogError, STAMPS_FILENAME, Shop};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

pub const DATA_DIR: &str = "data";
pub const IMAGES_DIR: &str = "images";
pub const SHOPS_FILENAME: &str = "shops.json";

#[derive(Error, Debug)]
pub enum AssembleError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("thumbnail cache: {0}")]
    Cache(#[from] CacheError),
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("failed to copy frontend files from {path}: {source}")]
    Frontend {
        path: PathBuf,
        source: walkdir::Error,
    },
}

/// Everything one rebuild reads from.
#[derive(Debug, Clone, Copy)]
pub struct AssembleInputs<'a> {
    /// Checkout containing `stamps.json`.
    pub repo_dir: &'a Path,
    pub thumbnails_dir: &'a Path,
    pub frontend_dir: Option<&'a Path>,
    pub shop: Option<&'a Shop>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssembleReport {
    pub stamps: usize,
    pub images: usize,
    pub frontend_files: usize,
}

/// Delete `pages_dir` and write it again from `inputs`.
pub fn assemble_pages(inputs: &AssembleInputs, pages_dir: &Path) -> Result<AssembleReport, AssembleError> {
    if pages_dir.exists() {
        std::fs::remove_dir_all(pages_dir)?;
    }
    let data_dir = pages_dir.join(DATA_DIR);
    std::fs::create_dir_all(&data_dir)?;

    let mut report = AssembleReport::default();
    if let Some(frontend) = inputs.frontend_dir {
        report.frontend_files = copy_dir_contents(frontend, pages_dir)?;
    }

    let cache = ThumbnailCache::load(inputs.thumbnails_dir, true)?;
    let mut catalog = Catalog::load_from_dir(inputs.repo_dir)?;
    catalog.replace_images_with_thumbnails(&cache)?;
    catalog.save(&data_dir.join(STAMPS_FILENAME))?;
    report.stamps = catalog.entries.len();

    let shops: Vec<&Shop> = inputs.shop.into_iter().collect();
    let shops_json = serde_json::to_vec(&shops).map_err(io::Error::from)?;
    std::fs::write(data_dir.join(SHOPS_FILENAME), shops_json)?;

    let images_dir = data_dir.join(IMAGES_DIR);
    std::fs::create_dir_all(&images_dir)?;
    let mut derived: Vec<String> = cache.derived_names().into_iter().collect();
    derived.sort();
    for name in &derived {
        std::fs::copy(inputs.thumbnails_dir.join(name), images_dir.join(name))?;
    }
    report.images = derived.len();

    log::info!(
        "Assembled {}: {} stamps, {} images",
        pages_dir.display(),
        report.stamps,
        report.images
    );
    Ok(report)
}

/// Recursively copy the contents of `src` into `dst`. Returns the file count.
fn copy_dir_contents(src: &Path, dst: &Path) -> Result<usize, AssembleError> {
    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|source| AssembleError::Frontend {
            path: src.to_path_buf(),
            source,
        })?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}
