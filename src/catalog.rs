//! The stamp catalog (`stamps.json`) and shop availability records (`shops.json`).
//!
//! `stamps.json` lives at the root of the data repository and is a JSON array
//! of [`StampEntry`] records, pretty-printed with two-space indentation and
//! sorted by id. Image references are relative to the repository root
//! (`images/1234.png`); the published copy rewrites them to the derived
//! thumbnail names (`images/3f9a…c1.jpg`).

use crate::cache::ThumbnailCache;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the catalog within the data repository.
pub const STAMPS_FILENAME: &str = "stamps.json";

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("{path} is not a valid catalog: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("no thumbnail found for {0}")]
    MissingThumbnail(String),
}

fn is_zero(n: &f64) -> bool {
    *n == 0.0
}

/// Physical shape of a stamp, as printed in the source catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StampShape {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub w: f64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub h: f64,
    /// Diameter, for round stamps.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub d: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub original_text: String,
}

/// One stamp in the catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StampEntry {
    pub id: i64,
    #[serde(default)]
    pub image: Option<String>,
    /// Face value.
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub year: Option<i32>,
    /// URL of the catalog page the stamp was scraped from.
    #[serde(default)]
    pub page: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub series: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<StampShape>,
}

/// The whole catalog, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    pub entries: Vec<StampEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<StampEntry>) -> Self {
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let bytes = std::fs::read(path)?;
        let entries = serde_json::from_slice(&bytes).map_err(|source| CatalogError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { entries })
    }

    /// Load `stamps.json` from a data directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self, CatalogError> {
        Self::load(&dir.join(STAMPS_FILENAME))
    }

    pub fn save(&self, path: &Path) -> Result<(), CatalogError> {
        let json = serde_json::to_string_pretty(&self.entries).map_err(io::Error::from)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn sort_entries(&mut self) {
        self.entries.sort_by_key(|entry| entry.id);
    }

    /// Distinct catalog page URLs.
    pub fn pages(&self) -> BTreeSet<String> {
        self.entries.iter().map(|entry| entry.page.clone()).collect()
    }

    /// Rewrite every image reference to the thumbnail derived from it.
    ///
    /// `images/1234.png` becomes `images/<derived name>`; the lookup uses the
    /// file name only. Fails on the first image the cache does not know.
    pub fn replace_images_with_thumbnails(
        &mut self,
        cache: &ThumbnailCache,
    ) -> Result<(), CatalogError> {
        for entry in &mut self.entries {
            let Some(image) = &entry.image else {
                continue;
            };
            let (dir, file_name) = match image.rsplit_once('/') {
                Some((dir, name)) => (Some(dir), name),
                None => (None, image.as_str()),
            };
            let thumbnail = cache
                .find_by_source_name(file_name)
                .ok_or_else(|| CatalogError::MissingThumbnail(image.clone()))?;
            let rewritten = match dir {
                Some(dir) => format!("{dir}/{}", thumbnail.derived_name),
                None => thumbnail.derived_name,
            };
            entry.image = Some(rewritten);
        }
        Ok(())
    }
}

/// One line of a shop's availability report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopItem {
    pub name: String,
    pub ids: Vec<i64>,
}

/// A shop and the stamps it currently offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shop {
    pub id: String,
    pub display_name: String,
    pub link: String,
    /// `dd.mm.yyyy`
    pub report_date: String,
    pub items: Vec<ShopItem>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(id: i64, image: Option<&str>, page: &str) -> StampEntry {
        StampEntry {
            id,
            image: image.map(String::from),
            page: page.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn parse_full_entry() {
        let json = r#"[{
            "id": 3001,
            "image": "images/3001.png",
            "value": 25.5,
            "year": 2023,
            "page": "https://example.org/p/1",
            "categories": ["fauna", "birds"],
            "series": "Birds",
            "name": "Owl",
            "shape": {"type": "rect", "w": 30, "h": 42, "originalText": "30x42"}
        }]"#;
        let entries: Vec<StampEntry> = serde_json::from_str(json).unwrap();
        let e = &entries[0];
        assert_eq!(e.id, 3001);
        assert_eq!(e.value, Some(25.5));
        assert_eq!(e.year, Some(2023));
        assert_eq!(e.categories, vec!["fauna", "birds"]);
        let shape = e.shape.as_ref().unwrap();
        assert_eq!(shape.kind, "rect");
        assert_eq!(shape.w, 30.0);
        assert_eq!(shape.d, 0.0);
        assert_eq!(shape.original_text, "30x42");
    }

    #[test]
    fn serialize_omits_empty_optionals_but_keeps_nulls() {
        let json = serde_json::to_value(entry(1, None, "p")).unwrap();
        let obj = json.as_object().unwrap();
        assert!(obj["image"].is_null());
        assert!(obj["value"].is_null());
        assert!(obj["year"].is_null());
        assert_eq!(obj["categories"], serde_json::json!([]));
        assert!(!obj.contains_key("series"));
        assert!(!obj.contains_key("name"));
        assert!(!obj.contains_key("shape"));
    }

    #[test]
    fn shape_omits_zero_dimensions() {
        let shape = StampShape {
            kind: "round".into(),
            d: 40.0,
            ..Default::default()
        };
        let json = serde_json::to_value(&shape).unwrap();
        assert_eq!(json, serde_json::json!({"type": "round", "d": 40.0}));
    }

    #[test]
    fn save_and_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(STAMPS_FILENAME);
        let catalog = Catalog::new(vec![entry(2, Some("images/2.png"), "a"), entry(1, None, "b")]);
        catalog.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("[\n  {"));
        assert_eq!(Catalog::load_from_dir(tmp.path()).unwrap(), catalog);
    }

    #[test]
    fn load_invalid_json_is_parse_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(STAMPS_FILENAME);
        std::fs::write(&path, "{").unwrap();
        assert!(matches!(Catalog::load(&path), Err(CatalogError::Parse { .. })));
    }

    #[test]
    fn sort_by_id() {
        let mut catalog = Catalog::new(vec![entry(3, None, ""), entry(1, None, ""), entry(2, None, "")]);
        catalog.sort_entries();
        let ids: Vec<i64> = catalog.entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn pages_are_distinct() {
        let catalog = Catalog::new(vec![entry(1, None, "a"), entry(2, None, "b"), entry(3, None, "a")]);
        let pages: Vec<String> = catalog.pages().into_iter().collect();
        assert_eq!(pages, vec!["a", "b"]);
    }

    #[test]
    fn replace_images_keeps_directory() {
        let cache = ThumbnailCache::new();
        cache.add("1.png", "sum1", "d1.jpg");
        cache.add("plain.png", "sum2", "d2.jpg");
        let mut catalog = Catalog::new(vec![
            entry(1, Some("images/1.png"), ""),
            entry(2, None, ""),
            entry(3, Some("plain.png"), ""),
        ]);

        catalog.replace_images_with_thumbnails(&cache).unwrap();

        assert_eq!(catalog.entries[0].image.as_deref(), Some("images/d1.jpg"));
        assert_eq!(catalog.entries[1].image, None);
        assert_eq!(catalog.entries[2].image.as_deref(), Some("d2.jpg"));
    }

    #[test]
    fn replace_images_missing_thumbnail_errors() {
        let cache = ThumbnailCache::new();
        let mut catalog = Catalog::new(vec![entry(1, Some("images/1.png"), "")]);
        let err = catalog.replace_images_with_thumbnails(&cache).unwrap_err();
        assert!(matches!(err, CatalogError::MissingThumbnail(ref image) if image == "images/1.png"));
    }

    #[test]
    fn shop_serializes_camel_case() {
        let shop = Shop {
            id: "shop".into(),
            display_name: "Shop".into(),
            link: "https://shop.example".into(),
            report_date: "01.02.2024".into(),
            items: vec![ShopItem {
                name: "7".into(),
                ids: vec![7],
            }],
        };
        let json = serde_json::to_value(&shop).unwrap();
        assert_eq!(json["displayName"], "Shop");
        assert_eq!(json["reportDate"], "01.02.2024");
        assert_eq!(json["items"][0]["ids"], serde_json::json!([7]));
    }
}
