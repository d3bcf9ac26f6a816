//! Shop availability: the last scraped snapshot and when to refresh it.
//!
//! A snapshot records which stamp ids a shop offered, which catalog pages
//! were visited to find out, and when. It is persisted as
//! `<root>/availability.json` and published as one [`Shop`] record in
//! `shops.json`.
//!
//! A snapshot goes stale in three ways:
//!
//! | Condition                                   | Reason                        |
//! |---------------------------------------------|-------------------------------|
//! | no snapshot on disk                         | [`RefreshReason::NoSnapshot`] |
//! | `now - timestamp >= ttl`                    | [`RefreshReason::Expired`]    |
//! | visited pages ≠ catalog pages (as sets)     | [`RefreshReason::PagesChanged`] |

use crate::catalog::{Shop, ShopItem};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File name of the persisted snapshot within the working root.
pub const AVAILABILITY_FILENAME: &str = "availability.json";

/// Date format of `reportDate` in `shops.json`.
const REPORT_DATE_FORMAT: &str = "%d.%m.%Y";

#[derive(Error, Debug)]
pub enum AvailabilityError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("{path} is not a valid availability snapshot: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Which stamps a shop offered at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilitySnapshot {
    pub available_stamp_ids: Vec<i64>,
    pub visited_pages: Vec<String>,
    /// Unix seconds.
    pub timestamp: i64,
}

impl AvailabilitySnapshot {
    /// Build a snapshot, dropping duplicate ids and pages (first occurrence wins).
    pub fn new(available_stamp_ids: Vec<i64>, visited_pages: Vec<String>, timestamp: i64) -> Self {
        Self {
            available_stamp_ids: dedup(available_stamp_ids),
            visited_pages: dedup(visited_pages),
            timestamp,
        }
    }

    /// Whether the visited pages are exactly `pages`, ignoring order and duplicates.
    pub fn visited_pages_equal(&self, pages: &BTreeSet<String>) -> bool {
        let visited: BTreeSet<&str> = self.visited_pages.iter().map(String::as_str).collect();
        visited.len() == pages.len() && pages.iter().all(|page| visited.contains(page.as_str()))
    }

    /// Project the snapshot into a `shops.json` record, one item per stamp.
    pub fn to_shop(&self, shop: &ShopInfo) -> Shop {
        let items = self
            .available_stamp_ids
            .iter()
            .map(|id| ShopItem {
                name: id.to_string(),
                ids: vec![*id],
            })
            .collect();
        Shop {
            id: shop.id.clone(),
            display_name: shop.display_name.clone(),
            link: shop.link.clone(),
            report_date: report_date(self.timestamp),
            items,
        }
    }
}

fn dedup<T: Clone + Ord>(items: Vec<T>) -> Vec<T> {
    let mut seen = BTreeSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// `dd.mm.yyyy` in UTC.
fn report_date(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|date| date.format(REPORT_DATE_FORMAT).to_string())
        .unwrap_or_default()
}

/// How the shop is presented in `shops.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShopInfo {
    pub id: String,
    pub display_name: String,
    pub link: String,
}

impl Default for ShopInfo {
    fn default() -> Self {
        Self {
            id: "rusmarka".to_string(),
            display_name: "rusmarka.ru".to_string(),
            link: "https://rusmarka.ru".to_string(),
        }
    }
}

/// Reads and writes the snapshot file.
#[derive(Debug, Clone)]
pub struct AvailabilityStore {
    path: PathBuf,
}

impl AvailabilityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the standard location inside a working root.
    pub fn in_root(root: &Path) -> Self {
        Self::new(root.join(AVAILABILITY_FILENAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The last snapshot, or `None` if nothing was ever scraped.
    pub fn load(&self) -> Result<Option<AvailabilitySnapshot>, AvailabilityError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| AvailabilityError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    pub fn save(&self, snapshot: &AvailabilitySnapshot) -> Result<(), AvailabilityError> {
        let json = serde_json::to_vec(snapshot).map_err(io::Error::from)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

/// Why a snapshot must be refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    NoSnapshot,
    Expired,
    PagesChanged,
}

impl fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RefreshReason::NoSnapshot => "no previous snapshot",
            RefreshReason::Expired => "previous snapshot expired",
            RefreshReason::PagesChanged => "catalog pages changed",
        })
    }
}

/// Decide whether `snapshot` needs refreshing at time `now` (unix seconds).
///
/// Returns `None` when the snapshot is fresh.
pub fn refresh_reason(
    snapshot: Option<&AvailabilitySnapshot>,
    catalog_pages: &BTreeSet<String>,
    now: i64,
    ttl: Duration,
) -> Option<RefreshReason> {
    let Some(snapshot) = snapshot else {
        return Some(RefreshReason::NoSnapshot);
    };
    let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
    if now.saturating_sub(snapshot.timestamp) >= ttl_secs {
        return Some(RefreshReason::Expired);
    }
    if !snapshot.visited_pages_equal(catalog_pages) {
        return Some(RefreshReason::PagesChanged);
    }
    None
}
