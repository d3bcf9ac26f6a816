//! Thumbnail generation for a directory of source images.
//!
//! Takes the data repository's image directory and keeps a directory of
//! derived thumbnails in sync with it:
//!
//! ```text
//! repo/images/                 thumbnails/
//! ├── 1234.png        ──►      ├── _metadata.json        # cache index
//! ├── 1235.jpg                 ├── 3f9a…c1.jpg           # sha256(thumbnail).jpg
//! └── 1235-copy.jpg            └── 8b02…7e.jpg           # shared by both 1235 scans
//! ```
//!
//! ## Run
//!
//! 1. Every regular, non-hidden file in the source directory is read and
//!    hashed on a bounded rayon pool (one thread per core unless capped).
//! 2. Sources are grouped by checksum and each group is one task on the same
//!    pool, so equal content is rendered at most once per run. A cache hit
//!    whose thumbnail still exists costs no rendering and no writes. A miss
//!    renders through the [`ThumbnailBackend`], writes `<hash of output>.jpg`
//!    and records it for every name in the group.
//! 3. Results are gathered after the pool drains. Failed tasks do not stop
//!    their siblings, but any failure fails the run (the cache is still saved
//!    so finished work is kept, and GC is skipped so the failed sources do
//!    not lose their thumbnails).
//! 4. The cache forgets every name and checksum not seen in this run and is
//!    saved atomically.
//! 5. Files in the thumbnail directory that the cache no longer references
//!    are deleted.
//!
//! The result is [`Outcome::Unchanged`] when nothing was rendered, linked,
//! forgotten or deleted.

use crate::cache::{CacheError, CacheStats, METADATA_FILENAME, ThumbnailCache, checksum};
use crate::config::{ProcessingConfig, effective_workers};
use crate::imaging::{BackendError, RustBackend, ThumbnailBackend, ThumbnailParams, derive_thumbnail};
use crate::types::Outcome;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Thumbnail cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("{} thumbnail task(s) failed: {}", .0.len(), describe_failures(.0))]
    Tasks(Vec<TaskFailure>),
}

/// Why a single source image could not be turned into a thumbnail.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("source changed while it was being processed")]
    SourceChanged,
}

/// A failed task, tagged with the source it was working on.
#[derive(Error, Debug)]
#[error("{source_name}: {error}")]
pub struct TaskFailure {
    pub source_name: String,
    #[source]
    pub error: TaskError,
}

fn describe_failures(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Configuration for a pipeline run.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub params: ThumbnailParams,
    /// Worker thread count.
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            params: ThumbnailParams::default(),
            workers: effective_workers(&ProcessingConfig::default()),
        }
    }
}

/// How a task was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Content and name already cached.
    Cached,
    /// Content already cached; this name was attached to it.
    Linked,
    /// Thumbnail rendered and written.
    Rendered,
}

#[derive(Debug, Clone)]
struct TaskResult {
    source_name: String,
    source_checksum: String,
    status: TaskStatus,
}

/// What a run that changed something did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub stats: CacheStats,
    /// Whether the GC pass forgot any names or entries.
    pub removed_stale: bool,
    /// Orphaned thumbnail files deleted from the destination.
    pub deleted_files: Vec<String>,
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stats)?;
        if self.removed_stale {
            write!(f, ", stale cache entries removed")?;
        }
        if !self.deleted_files.is_empty() {
            write!(f, ", {} orphaned file(s) deleted", self.deleted_files.len())?;
        }
        Ok(())
    }
}

/// Bring `dst_dir` in line with the images in `src_dir` using the pure Rust backend.
pub fn make_thumbnails(
    src_dir: &Path,
    dst_dir: &Path,
    config: &PipelineConfig,
) -> Result<Outcome<PipelineReport>, PipelineError> {
    make_thumbnails_with_backend(&RustBackend::new(), src_dir, dst_dir, config)
}

/// Bring `dst_dir` in line with `src_dir` using a specific backend (allows testing with mock).
pub fn make_thumbnails_with_backend(
    backend: &impl ThumbnailBackend,
    src_dir: &Path,
    dst_dir: &Path,
    config: &PipelineConfig,
) -> Result<Outcome<PipelineReport>, PipelineError> {
    fs::create_dir_all(dst_dir)?;
    let cache = ThumbnailCache::load(dst_dir, false)?;
    let source_names = list_source_files(src_dir)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers.max(1))
        .build()?;

    // Hash every source first, so equal content is derived by one task only.
    let hashed: Vec<Result<(String, String), TaskFailure>> = pool.install(|| {
        source_names
            .par_iter()
            .map(|name| {
                hash_source(src_dir, name)
                    .map(|sum| (name.clone(), sum))
                    .map_err(|error| TaskFailure {
                        source_name: name.clone(),
                        error,
                    })
            })
            .collect()
    });
    let mut failures = Vec::new();
    let mut by_checksum: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for result in hashed {
        match result {
            Ok((name, sum)) => by_checksum.entry(sum).or_default().push(name),
            Err(failure) => failures.push(failure),
        }
    }
    let groups: Vec<(String, Vec<String>)> = by_checksum.into_iter().collect();

    let results: Vec<Result<Vec<TaskResult>, TaskFailure>> = pool.install(|| {
        groups
            .par_iter()
            .map(|(sum, names)| {
                process_content(backend, &cache, src_dir, dst_dir, sum, names, &config.params)
                    .map_err(|error| TaskFailure {
                        source_name: names.join(", "),
                        error,
                    })
            })
            .collect()
    });
    drop(pool);

    let mut stats = CacheStats::default();
    let mut valid_names = HashSet::with_capacity(source_names.len());
    let mut valid_checksums = HashSet::with_capacity(groups.len());
    for result in results {
        match result {
            Ok(tasks) => {
                for task in tasks {
                    match task.status {
                        TaskStatus::Cached => stats.hit(),
                        TaskStatus::Linked => stats.link(),
                        TaskStatus::Rendered => stats.render(),
                    }
                    valid_names.insert(task.source_name);
                    valid_checksums.insert(task.source_checksum);
                }
            }
            Err(failure) => failures.push(failure),
        }
    }
    for failure in &failures {
        log::warn!("Thumbnail failed for {failure}");
    }

    if !failures.is_empty() {
        cache.save(dst_dir)?;
        return Err(PipelineError::Tasks(failures));
    }

    let removed_stale = cache.remove_stale(&valid_names, &valid_checksums);
    cache.save(dst_dir)?;
    let deleted_files = remove_orphans(dst_dir, &cache.derived_names())?;

    log::info!("Thumbnails: {stats}");
    if stats.linked == 0 && stats.rendered == 0 && !removed_stale && deleted_files.is_empty() {
        return Ok(Outcome::Unchanged);
    }
    Ok(Outcome::Changed(PipelineReport {
        stats,
        removed_stale,
        deleted_files,
    }))
}

/// Regular, non-hidden files directly inside `dir`, sorted by name.
fn list_source_files(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.path().is_file() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) if name.starts_with('.') => {}
            Ok(name) => names.push(name),
            Err(name) => log::warn!("Skipping non UTF-8 file name {name:?}"),
        }
    }
    names.sort();
    Ok(names)
}

fn hash_source(src_dir: &Path, name: &str) -> Result<String, TaskError> {
    Ok(checksum(&fs::read(src_dir.join(name))?))
}

/// Bring every source in `names` (all with content `source_checksum`) up to
/// date, rendering at most once.
fn process_content(
    backend: &impl ThumbnailBackend,
    cache: &ThumbnailCache,
    src_dir: &Path,
    dst_dir: &Path,
    source_checksum: &str,
    names: &[String],
    params: &ThumbnailParams,
) -> Result<Vec<TaskResult>, TaskError> {
    let result = |name: &str, status: TaskStatus| TaskResult {
        source_name: name.to_string(),
        source_checksum: source_checksum.to_string(),
        status,
    };
    let Some(first) = names.first() else {
        return Ok(Vec::new());
    };

    let cached = cache.find_by_checksum(source_checksum);
    let known = |name: &str| cached.as_ref().is_some_and(|e| e.source_names.contains(name));
    if let Some(entry) = &cached
        && dst_dir.join(&entry.derived_name).is_file()
    {
        let mut results = Vec::with_capacity(names.len());
        for name in names {
            if known(name.as_str()) {
                results.push(result(name.as_str(), TaskStatus::Cached));
            } else {
                cache.add(name, source_checksum, &entry.derived_name);
                log::debug!("{name}: reusing {}", entry.derived_name);
                results.push(result(name.as_str(), TaskStatus::Linked));
            }
        }
        return Ok(results);
    }

    let bytes = fs::read(src_dir.join(first))?;
    if checksum(&bytes) != source_checksum {
        return Err(TaskError::SourceChanged);
    }
    let derived = derive_thumbnail(backend, &bytes, params)?;
    fs::write(dst_dir.join(&derived.name), &derived.bytes)?;
    for name in names {
        cache.add(name, source_checksum, &derived.name);
    }
    if cached.is_some() {
        // The entry pointed at a file that no longer exists.
        cache.set_derived_name(source_checksum, &derived.name);
    }
    log::debug!("{first}: rendered {}", derived.name);

    let mut results = vec![result(first.as_str(), TaskStatus::Rendered)];
    for name in &names[1..] {
        let status = if known(name.as_str()) {
            TaskStatus::Cached
        } else {
            TaskStatus::Linked
        };
        results.push(result(name.as_str(), status));
    }
    Ok(results)
}

/// Delete every file in `dir` that is neither the cache metadata nor a
/// referenced thumbnail. Returns the deleted names, sorted.
fn remove_orphans(dir: &Path, valid: &HashSet<String>) -> io::Result<Vec<String>> {
    let mut deleted = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == METADATA_FILENAME || valid.contains(&name) {
            continue;
        }
        if entry.file_type()?.is_dir() {
            log::warn!("Leaving unexpected directory {} in place", entry.path().display());
            continue;
        }
        fs::remove_file(entry.path())?;
        log::debug!("Deleted orphaned thumbnail {name}");
        deleted.push(name);
    }
    deleted.sort();
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::MockBackend;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Dirs {
        _tmp: TempDir,
        src: PathBuf,
        dst: PathBuf,
    }

    fn dirs() -> Dirs {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("images");
        let dst = tmp.path().join("thumbnails");
        fs::create_dir_all(&src).unwrap();
        Dirs {
            _tmp: tmp,
            src,
            dst,
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            workers: 4,
            ..Default::default()
        }
    }

    fn run(backend: &MockBackend, d: &Dirs) -> Result<Outcome<PipelineReport>, PipelineError> {
        make_thumbnails_with_backend(backend, &d.src, &d.dst, &config())
    }

    /// Files in the destination other than the cache metadata.
    fn derived_files(dst: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dst)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n != METADATA_FILENAME)
            .collect();
        names.sort();
        names
    }

    #[test]
    fn first_run_renders_everything() {
        let d = dirs();
        fs::write(d.src.join("1.png"), "one").unwrap();
        fs::write(d.src.join("2.png"), "two").unwrap();

        let backend = MockBackend::new();
        let outcome = run(&backend, &d).unwrap();

        let report = outcome.changed().expect("first run must change");
        assert_eq!(report.stats.rendered, 2);
        assert!(!report.removed_stale);
        assert!(report.deleted_files.is_empty());
        assert_eq!(derived_files(&d.dst).len(), 2);

        let cache = ThumbnailCache::load(&d.dst, true).unwrap();
        assert_eq!(cache.len(), 2);
        let entry = cache.find_by_source_name("1.png").unwrap();
        assert_eq!(entry.source_checksum, checksum(b"one"));
        assert!(d.dst.join(&entry.derived_name).is_file());
    }

    #[test]
    fn second_run_is_unchanged() {
        let d = dirs();
        fs::write(d.src.join("1.png"), "one").unwrap();
        let backend = MockBackend::new();
        run(&backend, &d).unwrap();
        let files_before = derived_files(&d.dst);

        assert_eq!(run(&backend, &d).unwrap(), Outcome::Unchanged);
        assert_eq!(run(&backend, &d).unwrap(), Outcome::Unchanged);
        assert_eq!(backend.render_count(), 1);
        assert_eq!(derived_files(&d.dst), files_before);
    }

    #[test]
    fn rename_reuses_thumbnail() {
        let d = dirs();
        fs::write(d.src.join("old.png"), "content").unwrap();
        let backend = MockBackend::new();
        run(&backend, &d).unwrap();
        let files_before = derived_files(&d.dst);

        fs::rename(d.src.join("old.png"), d.src.join("new.png")).unwrap();
        let report = run(&backend, &d).unwrap().changed().cloned().unwrap();

        assert_eq!(report.stats.linked, 1);
        assert_eq!(report.stats.rendered, 0);
        assert!(report.removed_stale);
        assert_eq!(backend.render_count(), 1);
        assert_eq!(derived_files(&d.dst), files_before);

        let cache = ThumbnailCache::load(&d.dst, true).unwrap();
        assert!(cache.find_by_source_name("old.png").is_none());
        assert!(cache.find_by_source_name("new.png").is_some());
    }

    #[test]
    fn removed_source_is_garbage_collected() {
        let d = dirs();
        fs::write(d.src.join("a.png"), "a").unwrap();
        fs::write(d.src.join("b.png"), "b").unwrap();
        let backend = MockBackend::new();
        run(&backend, &d).unwrap();
        let a_thumb = ThumbnailCache::load(&d.dst, true)
            .unwrap()
            .find_by_source_name("a.png")
            .unwrap()
            .derived_name;

        fs::remove_file(d.src.join("a.png")).unwrap();
        let report = run(&backend, &d).unwrap().changed().cloned().unwrap();

        assert!(report.removed_stale);
        assert_eq!(report.deleted_files, vec![a_thumb.clone()]);
        assert!(!d.dst.join(&a_thumb).exists());
        let cache = ThumbnailCache::load(&d.dst, true).unwrap();
        assert_eq!(cache.find_by_checksum(&checksum(b"a")), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn shared_content_survives_partial_removal() {
        let d = dirs();
        fs::write(d.src.join("a.png"), "same").unwrap();
        fs::write(d.src.join("b.png"), "same").unwrap();
        let backend = MockBackend::new();
        run(&backend, &d).unwrap();
        assert_eq!(derived_files(&d.dst).len(), 1);

        fs::remove_file(d.src.join("a.png")).unwrap();
        let report = run(&backend, &d).unwrap().changed().cloned().unwrap();
        assert!(report.deleted_files.is_empty());
        assert_eq!(derived_files(&d.dst).len(), 1);
    }

    #[test]
    fn duplicate_content_single_entry() {
        let d = dirs();
        fs::write(d.src.join("x.png"), "dup").unwrap();
        fs::write(d.src.join("y.png"), "dup").unwrap();
        let backend = MockBackend::new();
        run(&backend, &d).unwrap();

        let cache = ThumbnailCache::load(&d.dst, true).unwrap();
        assert_eq!(cache.len(), 1);
        let entry = cache.find_by_checksum(&checksum(b"dup")).unwrap();
        let names: Vec<&str> = entry.source_names.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["x.png", "y.png"]);
        assert_eq!(derived_files(&d.dst), vec![entry.derived_name]);
        assert_eq!(backend.rendered(), vec![checksum(b"dup")]);
    }

    #[test]
    fn equal_content_is_rendered_once_per_run() {
        let d = dirs();
        for i in 0..32 {
            fs::write(d.src.join(format!("{i:02}.png")), "same scan").unwrap();
        }
        fs::write(d.src.join("other.png"), "other scan").unwrap();
        let backend = MockBackend::new();

        let report = make_thumbnails_with_backend(
            &backend,
            &d.src,
            &d.dst,
            &PipelineConfig {
                workers: 8,
                ..Default::default()
            },
        )
        .unwrap()
        .changed()
        .cloned()
        .unwrap();

        let mut rendered = backend.rendered();
        rendered.sort();
        let mut expected = vec![checksum(b"same scan"), checksum(b"other scan")];
        expected.sort();
        assert_eq!(rendered, expected);
        assert_eq!(report.stats.rendered, 2);
        assert_eq!(report.stats.linked, 31);
        assert_eq!(derived_files(&d.dst).len(), 2);
    }

    #[test]
    fn orphan_entry_from_previous_cache_is_removed() {
        let d = dirs();
        fs::create_dir_all(&d.dst).unwrap();
        fs::write(d.src.join("b.png"), "b").unwrap();
        // Cache left over from a run that still had a.png.
        let stale = ThumbnailCache::new();
        stale.add("a.png", &checksum(b"a"), "stale.jpg");
        stale.save(&d.dst).unwrap();
        fs::write(d.dst.join("stale.jpg"), "old thumbnail").unwrap();

        let backend = MockBackend::new();
        let report = run(&backend, &d).unwrap().changed().cloned().unwrap();

        assert!(report.removed_stale);
        assert_eq!(report.deleted_files, vec!["stale.jpg".to_string()]);
        let cache = ThumbnailCache::load(&d.dst, true).unwrap();
        assert!(cache.find_by_source_name("a.png").is_none());
    }

    #[test]
    fn stray_files_in_destination_are_deleted() {
        let d = dirs();
        fs::write(d.src.join("1.png"), "one").unwrap();
        let backend = MockBackend::new();
        run(&backend, &d).unwrap();

        fs::write(d.dst.join("leftover.jpg"), "junk").unwrap();
        let report = run(&backend, &d).unwrap().changed().cloned().unwrap();
        assert_eq!(report.deleted_files, vec!["leftover.jpg".to_string()]);
        assert_eq!(report.stats.hits, 1);
    }

    #[test]
    fn missing_thumbnail_is_rerendered() {
        let d = dirs();
        fs::write(d.src.join("1.png"), "one").unwrap();
        let backend = MockBackend::new();
        run(&backend, &d).unwrap();
        for name in derived_files(&d.dst) {
            fs::remove_file(d.dst.join(name)).unwrap();
        }

        let report = run(&backend, &d).unwrap().changed().cloned().unwrap();
        assert_eq!(report.stats.rendered, 1);
        assert_eq!(derived_files(&d.dst).len(), 1);
    }

    #[test]
    fn failure_reports_source_and_keeps_siblings() {
        let d = dirs();
        fs::write(d.src.join("good.png"), "fine").unwrap();
        fs::write(d.src.join("bad.png"), "BROKEN bytes").unwrap();
        let backend = MockBackend::new();

        let err = run(&backend, &d).unwrap_err();
        match &err {
            PipelineError::Tasks(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].source_name, "bad.png");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("bad.png"));

        // The good image was still rendered and its cache entry saved.
        let cache = ThumbnailCache::load(&d.dst, true).unwrap();
        assert!(cache.find_by_source_name("good.png").is_some());
        assert_eq!(derived_files(&d.dst).len(), 1);
    }

    #[test]
    fn failure_skips_garbage_collection() {
        let d = dirs();
        fs::write(d.src.join("a.png"), "a").unwrap();
        let backend = MockBackend::new();
        run(&backend, &d).unwrap();

        // a.png now fails to read as an image; its old thumbnail must stay.
        fs::write(d.src.join("a.png"), "BROKEN").unwrap();
        assert!(run(&backend, &d).is_err());
        assert_eq!(derived_files(&d.dst).len(), 1);
    }

    #[test]
    fn hidden_files_and_directories_are_ignored() {
        let d = dirs();
        fs::write(d.src.join(".gitkeep"), "").unwrap();
        fs::create_dir_all(d.src.join("nested")).unwrap();
        fs::write(d.src.join("1.png"), "one").unwrap();

        let backend = MockBackend::new();
        let report = run(&backend, &d).unwrap().changed().cloned().unwrap();
        assert_eq!(report.stats.total(), 1);
    }

    #[test]
    fn empty_source_dir_with_empty_cache_is_unchanged() {
        let d = dirs();
        let backend = MockBackend::new();
        assert_eq!(run(&backend, &d).unwrap(), Outcome::Unchanged);
        assert!(d.dst.join(METADATA_FILENAME).is_file());
    }

    #[test]
    fn missing_source_dir_errors() {
        let d = dirs();
        fs::remove_dir_all(&d.src).unwrap();
        let backend = MockBackend::new();
        assert!(matches!(run(&backend, &d), Err(PipelineError::Io(_))));
    }

    #[test]
    fn many_sources_single_worker() {
        let d = dirs();
        for i in 0..20 {
            fs::write(d.src.join(format!("{i}.png")), format!("img {i}")).unwrap();
        }
        let backend = MockBackend::new();
        let config = PipelineConfig {
            workers: 1,
            ..Default::default()
        };
        let outcome = make_thumbnails_with_backend(&backend, &d.src, &d.dst, &config).unwrap();
        assert_eq!(outcome.changed().unwrap().stats.rendered, 20);
        assert_eq!(derived_files(&d.dst).len(), 20);
    }
}
