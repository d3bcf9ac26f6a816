//! End-to-end runs of the thumbnail pipeline and output assembly with the
//! real imaging backend.

use image::{ImageFormat, Rgba, RgbaImage};
use stamp_watch::assemble::{AssembleInputs, assemble_pages};
use stamp_watch::cache::{METADATA_FILENAME, ThumbnailCache, checksum};
use stamp_watch::catalog::{Catalog, STAMPS_FILENAME, StampEntry};
use stamp_watch::thumbnails::{PipelineConfig, make_thumbnails};
use stamp_watch::types::Outcome;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn png(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, seed, 255])
    });
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

fn derived_files(dst: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dst)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.file_name().unwrap() != METADATA_FILENAME)
        .collect();
    files.sort();
    files
}

fn config() -> PipelineConfig {
    PipelineConfig {
        workers: 2,
        ..Default::default()
    }
}

#[test]
fn fresh_run_produces_one_bounded_thumbnail() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("images");
    let dst = tmp.path().join("thumbnails");
    std::fs::create_dir_all(&src).unwrap();
    let source = png(2000, 1000, 7);
    std::fs::write(src.join("wide.png"), &source).unwrap();

    let outcome = make_thumbnails(&src, &dst, &config()).unwrap();

    let report = outcome.changed().expect("fresh run changes the output");
    assert_eq!(report.stats.rendered, 1);
    assert!(!report.removed_stale);
    assert!(report.deleted_files.is_empty());

    let files = derived_files(&dst);
    assert_eq!(files.len(), 1);
    let thumb = image::open(&files[0]).unwrap();
    assert_eq!((thumb.width(), thumb.height()), (512, 256));

    let cache = ThumbnailCache::load(&dst, true).unwrap();
    assert_eq!(cache.len(), 1);
    let entry = cache.find_by_source_name("wide.png").unwrap();
    assert_eq!(entry.source_checksum, checksum(&source));
    let bytes = std::fs::read(&files[0]).unwrap();
    assert_eq!(entry.derived_name, format!("{}.jpg", checksum(&bytes)));
}

#[test]
fn unchanged_sources_are_not_rewritten() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("images");
    let dst = tmp.path().join("thumbnails");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("a.png"), png(600, 800, 1)).unwrap();
    std::fs::write(src.join("b.png"), png(300, 300, 2)).unwrap();

    make_thumbnails(&src, &dst, &config()).unwrap();
    let before: Vec<_> = derived_files(&dst)
        .iter()
        .map(|p| (p.clone(), std::fs::metadata(p).unwrap().modified().unwrap()))
        .collect();

    assert_eq!(make_thumbnails(&src, &dst, &config()).unwrap(), Outcome::Unchanged);

    let after: Vec<_> = derived_files(&dst)
        .iter()
        .map(|p| (p.clone(), std::fs::metadata(p).unwrap().modified().unwrap()))
        .collect();
    assert_eq!(before, after);
}

#[test]
fn replaced_image_swaps_published_thumbnail() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("images");
    let dst = tmp.path().join("thumbnails");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("1.png"), png(100, 100, 1)).unwrap();
    make_thumbnails(&src, &dst, &config()).unwrap();
    let old = derived_files(&dst);

    std::fs::write(src.join("1.png"), png(100, 100, 200)).unwrap();
    let report = make_thumbnails(&src, &dst, &config())
        .unwrap()
        .changed()
        .cloned()
        .unwrap();

    assert_eq!(report.stats.rendered, 1);
    assert!(report.removed_stale);
    assert_eq!(report.deleted_files.len(), 1);
    let new = derived_files(&dst);
    assert_eq!(new.len(), 1);
    assert_ne!(old, new);
}

#[test]
fn thumbnails_feed_published_catalog() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    let src = repo.join("images");
    let dst = tmp.path().join("thumbnails");
    let pages = tmp.path().join("pages");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("10.png"), png(900, 400, 3)).unwrap();
    // Same scan under a second name.
    std::fs::write(src.join("11.png"), png(900, 400, 3)).unwrap();
    Catalog::new(vec![
        StampEntry {
            id: 10,
            image: Some("images/10.png".into()),
            page: "https://shop.example/10".into(),
            ..Default::default()
        },
        StampEntry {
            id: 11,
            image: Some("images/11.png".into()),
            page: "https://shop.example/10".into(),
            ..Default::default()
        },
    ])
    .save(&repo.join(STAMPS_FILENAME))
    .unwrap();

    make_thumbnails(&src, &dst, &config()).unwrap();
    let inputs = AssembleInputs {
        repo_dir: &repo,
        thumbnails_dir: &dst,
        frontend_dir: None,
        shop: None,
    };
    let report = assemble_pages(&inputs, &pages).unwrap();

    assert_eq!(report.stamps, 2);
    assert_eq!(report.images, 1);
    let published = Catalog::load_from_dir(&pages.join("data")).unwrap();
    assert_eq!(published.entries[0].image, published.entries[1].image);
    let image = published.entries[0].image.clone().unwrap();
    assert!(pages.join("data").join(&image).is_file());
}
