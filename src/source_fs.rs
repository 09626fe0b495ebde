//! Local feed files.
//!
//! Walks `root`, applying include and exclude globs to paths relative to
//! the root. `.xml` files are parsed as RSS/Atom feeds (keyword-filtered
//! like the network feed, without an age cutoff); `.json` files hold either
//! an array of listing objects or an object with an `items` array, read the
//! same way as the JSON API. Useful for seeding, offline runs, and tests.

use async_trait::async_trait;
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::FilesystemSourceConfig;
use crate::error::{DiscoveryError, Result};
use crate::models::{RawListing, SourceKind};
use crate::source_api::listings_from_json;
use crate::source_rss::{entry_to_listing, filter_entries, parse_feed};
use crate::traits::GrantSource;

pub struct FilesystemSource {
    name: String,
    config: FilesystemSourceConfig,
}

impl FilesystemSource {
    pub fn new(name: String, config: FilesystemSourceConfig) -> Self {
        Self { name, config }
    }

    fn scan(&self) -> std::result::Result<Vec<RawListing>, String> {
        let root = &self.config.root;
        if !root.exists() {
            return Err(format!("root does not exist: {}", root.display()));
        }

        let include_set = build_globset(&self.config.include_globs)?;
        let mut excludes = vec!["**/.git/**".to_string()];
        excludes.extend(self.config.exclude_globs.clone());
        let exclude_set = build_globset(&excludes)?;

        let mut files = Vec::new();
        for entry in WalkDir::new(root) {
            let entry = entry.map_err(|e| e.to_string())?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");
            if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
                continue;
            }
            files.push((path.to_path_buf(), rel_str));
        }
        files.sort_by(|a, b| a.1.cmp(&b.1));

        let mut listings = Vec::new();
        for (path, rel) in files {
            let found = self
                .read_file(&path)
                .map_err(|e| format!("{}: {}", rel, e))?;
            tracing::debug!(
                source = %self.name,
                file = %rel,
                items = found.len(),
                "read feed file"
            );
            listings.extend(found);
        }
        Ok(listings)
    }

    fn read_file(&self, path: &Path) -> std::result::Result<Vec<RawListing>, String> {
        let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                let body: serde_json::Value =
                    serde_json::from_slice(&bytes).map_err(|e| e.to_string())?;
                let items_path = if body.is_array() { "" } else { "items" };
                let mut listings =
                    listings_from_json(&self.name, SourceKind::Filesystem, &body, items_path)?;
                for l in &mut listings {
                    if l.source_url.is_none() {
                        l.source_url = Some(format!("file://{}", path.display()));
                    }
                }
                Ok(listings)
            }
            _ => {
                let entries = parse_feed(&bytes)?;
                let kept = filter_entries(entries, &self.config.keywords, None, Utc::now());
                Ok(kept
                    .into_iter()
                    .map(|e| entry_to_listing(&self.name, SourceKind::Filesystem, e))
                    .collect())
            }
        }
    }
}

#[async_trait]
impl GrantSource for FilesystemSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Local RSS/Atom and JSON feed files"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Filesystem
    }

    async fn fetch(&self) -> Result<Vec<RawListing>> {
        self.scan()
            .map_err(|e| DiscoveryError::fetch(self.source_label(), e))
    }
}

fn build_globset(patterns: &[String]) -> std::result::Result<GlobSet, String> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|e| e.to_string())?);
    }
    builder.build().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source(root: &Path) -> FilesystemSource {
        FilesystemSource::new(
            "seed".to_string(),
            FilesystemSourceConfig {
                root: root.to_path_buf(),
                include_globs: vec!["**/*.xml".into(), "**/*.json".into()],
                exclude_globs: vec!["skip/**".into()],
                keywords: vec![],
                weight: None,
            },
        )
    }

    #[tokio::test]
    async fn test_reads_xml_and_json_files() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("feed.xml"),
            r#"<rss><channel><item><title>Roof Grant</title><guid>r1</guid></item></channel></rss>"#,
        )
        .unwrap();
        std::fs::write(
            tmp.path().join("programs.json"),
            r#"{"items": [{"id": "p1", "name": "Porch Repair", "agency": "City"}]}"#,
        )
        .unwrap();
        std::fs::create_dir_all(tmp.path().join("skip")).unwrap();
        std::fs::write(tmp.path().join("skip/ignored.json"), "[]").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "not a feed").unwrap();

        let listings = source(tmp.path()).fetch().await.unwrap();
        let ids: Vec<_> = listings.iter().map(|l| l.source_item_id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "p1"]);
        assert!(listings.iter().all(|l| l.source_kind == SourceKind::Filesystem));
        assert_eq!(listings[1].fields.get("agency").map(String::as_str), Some("City"));
    }

    #[tokio::test]
    async fn test_missing_root_is_fetch_error() {
        let tmp = TempDir::new().unwrap();
        let err = source(&tmp.path().join("nope")).fetch().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_malformed_file_fails_source() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("broken.json"), "{ not json").unwrap();
        assert!(source(tmp.path()).fetch().await.is_err());
    }
}
