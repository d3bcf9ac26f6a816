//! Growing and refreshing the catalog from the shop's website.
//!
//! Used by the `update-catalog` command against a checkout of the data
//! repository:
//!
//! 1. **New pages** (optional): ask the scraper for every page URL, keep the
//!    ones the catalog has never seen, scrape them and append their records.
//!    Their images are written next to `stamps.json`.
//! 2. **Categories**: refreshed when asked for, and always after new records
//!    were added.
//! 3. **Save**: `stamps.json` is rewritten according to the [`SavePolicy`].

use crate::catalog::{Catalog, CatalogError, STAMPS_FILENAME};
use crate::scraper::{ScrapeError, Scraper};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Component, Path};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogUpdateError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("scraping failed: {0}")]
    Scrape(#[from] ScrapeError),
    #[error("refusing to write image outside the catalog directory: {0}")]
    InvalidImageName(String),
}

/// When to rewrite `stamps.json`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SavePolicy {
    /// Save if records were added or any categories changed.
    #[default]
    AnyChange,
    /// Save only if records were added and categories changed.
    AllChanges,
}

impl SavePolicy {
    fn should_save(self, added_entries: usize, categories_updated: usize) -> bool {
        match self {
            SavePolicy::AnyChange => added_entries > 0 || categories_updated > 0,
            SavePolicy::AllChanges => added_entries > 0 && categories_updated > 0,
        }
    }
}

impl FromStr for SavePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any" | "any-change" => Ok(SavePolicy::AnyChange),
            "all" | "all-changes" => Ok(SavePolicy::AllChanges),
            other => Err(format!("unknown save policy '{other}' (expected 'any' or 'all')")),
        }
    }
}

impl fmt::Display for SavePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SavePolicy::AnyChange => "any",
            SavePolicy::AllChanges => "all",
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    pub discover_new_pages: bool,
    pub refresh_categories: bool,
    pub save_policy: SavePolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogUpdateReport {
    pub new_pages: Vec<String>,
    pub added_entries: usize,
    pub written_images: usize,
    pub categories_updated: usize,
    pub saved: bool,
}

impl fmt::Display for CatalogUpdateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} new page(s), {} stamp(s) added, {} image(s) written, categories updated for {} stamp(s)",
            self.new_pages.len(),
            self.added_entries,
            self.written_images,
            self.categories_updated
        )?;
        if self.saved {
            write!(f, "; saved {STAMPS_FILENAME}")?;
        }
        Ok(())
    }
}

/// Update `<catalog_dir>/stamps.json` from the scraper.
pub fn update_catalog(
    scraper: &impl Scraper,
    catalog_dir: &Path,
    options: &UpdateOptions,
) -> Result<CatalogUpdateReport, CatalogUpdateError> {
    let stamps_path = catalog_dir.join(STAMPS_FILENAME);
    let mut catalog = Catalog::load(&stamps_path)?;
    let mut report = CatalogUpdateReport::default();

    if options.discover_new_pages {
        let known_pages = catalog.pages();
        let new_pages: Vec<String> = scraper
            .list_page_urls()?
            .into_iter()
            .filter(|url| !known_pages.contains(url))
            .collect();
        if new_pages.is_empty() {
            log::info!("No new pages found");
        }

        let mut images = BTreeMap::new();
        for url in &new_pages {
            log::info!("Scanning new page {url}");
            let page = scraper.fetch_new_page_entries(url)?;
            for entry in &page.entries {
                log::debug!("Adding stamp {}", entry.id);
            }
            report.added_entries += page.entries.len();
            catalog.entries.extend(page.entries);
            images.extend(page.images);
        }

        if report.added_entries > 0 {
            catalog.sort_entries();
            for name in images.keys() {
                validate_image_name(name)?;
            }
            for (name, bytes) in &images {
                let path = catalog_dir.join(name);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, bytes)?;
                log::debug!("Wrote image {name}");
            }
            report.written_images = images.len();
        }
        report.new_pages = new_pages;
    }

    if options.refresh_categories || report.added_entries > 0 {
        report.categories_updated = scraper.fetch_category_assignments(&mut catalog.entries)?;
        log::info!("Updated categories for {} stamp(s)", report.categories_updated);
    }

    if options
        .save_policy
        .should_save(report.added_entries, report.categories_updated)
    {
        catalog.save(&stamps_path)?;
        report.saved = true;
        log::info!("Saved {}", stamps_path.display());
    }
    Ok(report)
}

/// Image names come from the scraper and must stay inside the catalog directory.
fn validate_image_name(name: &str) -> Result<(), CatalogUpdateError> {
    let path = Path::new(name);
    let inside = !name.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
    if inside {
        Ok(())
    } else {
        Err(CatalogUpdateError::InvalidImageName(name.to_string()))
    }
}
