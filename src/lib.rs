//! # stamp-watch
//!
//! Keeps a static stamp catalog site up to date. The catalog (`stamps.json`
//! plus a directory of scanned stamp images) lives in a git repository;
//! stamp-watch mirrors it, turns the scans into small content-addressed JPEG
//! thumbnails, scrapes a shop for which stamps are on sale, and republishes
//! the site whenever any of that changed.
//!
//! # Architecture: Freshness Signals
//!
//! Each update asks three independent questions, each answered with an
//! [`Outcome`](types::Outcome):
//!
//! ```text
//! 1. Data source    git fetch            →  HEAD moved?
//! 2. Thumbnails     repo/images/ → cache →  anything rendered, linked or removed?
//! 3. Availability   shop snapshot        →  missing, expired or pages changed?
//!                                 │
//!               any "yes" (or first run)
//!                                 ▼
//!   pages/ rebuilt from catalog + thumbnails + snapshot, then deployed
//! ```
//!
//! "Nothing changed" is a value, never an error, so a quiet tick and a failed
//! tick cannot be confused.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`orchestrator`] | The watch loop: checks the signals, rebuilds and deploys |
//! | [`repo`] | `SourceRepo` trait and the git CLI mirror of the data repository |
//! | [`thumbnails`] | Parallel pipeline keeping the thumbnail directory in sync with the images |
//! | [`cache`] | Persistent checksum ↔ source name ↔ thumbnail index shared by the pipeline workers |
//! | [`imaging`] | Pure-Rust thumbnail derivation: decode, shrink, flatten, JPEG |
//! | [`catalog`] | `stamps.json` and `shops.json` records |
//! | [`availability`] | Availability snapshots, their storage and staleness rules |
//! | [`scraper`] | `Scraper` trait, retry policy, external-command implementation |
//! | [`catalog_update`] | Grows the catalog from newly listed shop pages and refreshes categories |
//! | [`assemble`] | Writes the output directory |
//! | [`deploy`] | Deploy command template and runner |
//! | [`config`] | `stamp-watch.toml` loading, validation and merging |
//! | [`logging`] | `env_logger` setup |
//! | [`types`] | Shared result types |
//!
//! # Design Decisions
//!
//! ## Content-Addressed Everything
//!
//! Source images are identified by the SHA-256 of their bytes, not by name or
//! modification time. A `git checkout` that touches every mtime costs nothing,
//! and a renamed scan reuses its thumbnail. Thumbnails are named after the
//! SHA-256 of their own bytes, so a published URL changes exactly when the
//! picture does and the output can be cached forever by browsers and CDNs.
//!
//! ## Fixed Thumbnail Parameters
//!
//! The longer edge is 512 px and JPEG quality is 90. They are not
//! configurable: the cache key is the source checksum alone, so changing them
//! would leave stale thumbnails that look current.
//!
//! ## Rebuild From Scratch
//!
//! The output directory is deleted and written again on every rebuild. It is
//! small (JSON plus thumbnails) and the deploy step usually syncs it anyway,
//! so there is no partial-update logic to get wrong.
//!
//! ## Scraping Out of Process
//!
//! Shop pages change layout more often than anything else in the system.
//! The scraper is an external program speaking a small JSON protocol, so it
//! can be fixed and redeployed without touching the watcher.

pub mod assemble;
pub mod availability;
pub mod cache;
pub mod catalog;
pub mod catalog_update;
pub mod config;
pub mod deploy;
pub mod imaging;
pub mod logging;
pub mod orchestrator;
pub mod repo;
pub mod scraper;
pub mod thumbnails;
pub mod types;
