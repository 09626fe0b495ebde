//! RSS and Atom feed source.
//!
//! Fetches each configured feed URL, parses items with `quick-xml`, keeps
//! entries that mention one of the housing keywords and are no older than
//! `max_age_days`, and drops repeated links. The parsing and filtering
//! helpers are shared with the filesystem source, which reads the same feed
//! format from disk.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::config::{DiscoveryConfig, RssSourceConfig};
use crate::error::{DiscoveryError, Result};
use crate::models::{RawListing, SourceKind};
use crate::traits::GrantSource;

/// Shared HTTP client for network sources.
pub fn http_client(config: &DiscoveryConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.timeout_secs))
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| DiscoveryError::Internal(e.into()))
}

/// One `<item>` (RSS) or `<entry>` (Atom).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedEntry {
    pub title: String,
    pub link: Option<String>,
    pub description: String,
    pub guid: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy)]
enum Field {
    Title,
    Link,
    Description,
    Guid,
    Date,
}

fn field_for(name: &[u8]) -> Option<Field> {
    match name {
        b"title" => Some(Field::Title),
        b"link" => Some(Field::Link),
        b"description" | b"summary" | b"content" | b"encoded" => Some(Field::Description),
        b"guid" | b"id" => Some(Field::Guid),
        b"pubDate" | b"published" | b"updated" | b"date" => Some(Field::Date),
        _ => None,
    }
}

fn href_of(e: &quick_xml::events::BytesStart<'_>) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == b"href")
        .and_then(|a| a.unescape_value().ok().map(|v| v.trim().to_string()))
        .filter(|v| !v.is_empty())
}

/// Parses an RSS 2.0 or Atom document into entries.
pub fn parse_feed(xml: &[u8]) -> std::result::Result<Vec<FeedEntry>, String> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut entries = Vec::new();
    let mut current: Option<FeedEntry> = None;
    let mut field: Option<Field> = None;
    let mut date_text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let local = e.local_name();
                let name = local.as_ref();
                if name == b"item" || name == b"entry" {
                    current = Some(FeedEntry::default());
                    field = None;
                } else if let Some(entry) = current.as_mut() {
                    field = field_for(name);
                    if matches!(field, Some(Field::Link)) && entry.link.is_none() {
                        entry.link = href_of(&e);
                    }
                    if matches!(field, Some(Field::Date)) {
                        date_text.clear();
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(entry) = current.as_mut() {
                    if e.local_name().as_ref() == b"link" && entry.link.is_none() {
                        entry.link = href_of(&e);
                    }
                }
            }
            Ok(Event::Text(te)) => {
                if let (Some(entry), Some(f)) = (current.as_mut(), field) {
                    let text = te.unescape().unwrap_or_default();
                    append_field(entry, f, &text, &mut date_text);
                }
            }
            Ok(Event::CData(cd)) => {
                if let (Some(entry), Some(f)) = (current.as_mut(), field) {
                    let raw = cd.into_inner();
                    let text = String::from_utf8_lossy(&raw);
                    append_field(entry, f, &text, &mut date_text);
                }
            }
            Ok(Event::End(e)) => {
                let local = e.local_name();
                let name = local.as_ref();
                if name == b"item" || name == b"entry" {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                    field = None;
                } else if current.is_some() {
                    if matches!(field, Some(Field::Date)) {
                        if let Some(entry) = current.as_mut() {
                            if entry.published.is_none() {
                                entry.published = parse_date(&date_text);
                            }
                        }
                    }
                    field = None;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                ))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

fn append_field(entry: &mut FeedEntry, field: Field, text: &str, date_text: &mut String) {
    match field {
        Field::Title => entry.title.push_str(text),
        Field::Description => {
            if !entry.description.is_empty() {
                entry.description.push(' ');
            }
            entry.description.push_str(text);
        }
        Field::Link => {
            if entry.link.is_none() {
                entry.link = Some(text.trim().to_string()).filter(|l| !l.is_empty());
            }
        }
        Field::Guid => {
            if entry.guid.is_none() {
                entry.guid = Some(text.trim().to_string()).filter(|g| !g.is_empty());
            }
        }
        Field::Date => date_text.push_str(text),
    }
}

fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    DateTime::parse_from_rfc2822(text)
        .or_else(|_| DateTime::parse_from_rfc3339(text))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Keeps recent entries that mention a keyword, one per link.
///
/// Undated entries are kept, as is everything when `max_age_days` is
/// `None`. An empty keyword list keeps everything.
pub fn filter_entries(
    entries: Vec<FeedEntry>,
    keywords: &[String],
    max_age_days: Option<i64>,
    now: DateTime<Utc>,
) -> Vec<FeedEntry> {
    let cutoff = max_age_days.map(|d| now - Duration::days(d));
    let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
    let mut seen = HashSet::new();

    entries
        .into_iter()
        .filter(|e| match (e.published, cutoff) {
            (Some(p), Some(c)) => p >= c,
            _ => true,
        })
        .filter(|e| {
            if keywords.is_empty() {
                return true;
            }
            let text = format!("{} {}", e.title, e.description).to_lowercase();
            keywords.iter().any(|k| text.contains(k.as_str()))
        })
        .filter(|e| match &e.link {
            Some(link) => seen.insert(link.clone()),
            None => true,
        })
        .collect()
}

/// Stable identifier for an entry: guid, then link, then a content hash.
pub fn entry_id(entry: &FeedEntry) -> String {
    entry
        .guid
        .clone()
        .or_else(|| entry.link.clone())
        .unwrap_or_else(|| {
            let mut hasher = Sha256::new();
            hasher.update(entry.title.as_bytes());
            hasher.update(b"\n");
            hasher.update(entry.description.as_bytes());
            format!("sha256:{}", hex::encode(hasher.finalize()))
        })
}

pub fn entry_to_listing(source_name: &str, kind: SourceKind, entry: FeedEntry) -> RawListing {
    let id = entry_id(&entry);
    let mut listing = RawListing::text(source_name, kind, &id, &entry.title, &entry.description);
    listing.source_url = entry.link;
    listing.published_at = entry.published;
    listing
}

pub struct RssSource {
    name: String,
    config: RssSourceConfig,
    client: reqwest::Client,
}

impl RssSource {
    pub fn new(name: String, config: RssSourceConfig, client: reqwest::Client) -> Self {
        Self {
            name,
            config,
            client,
        }
    }

    async fn fetch_url(&self, url: &str) -> std::result::Result<Vec<FeedEntry>, String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?;
        let bytes = resp.bytes().await.map_err(|e| e.to_string())?;
        parse_feed(&bytes)
    }
}

#[async_trait]
impl GrantSource for RssSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "RSS/Atom grant feeds"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Rss
    }

    /// Fails only when no configured URL could be read.
    async fn fetch(&self) -> Result<Vec<RawListing>> {
        let mut entries = Vec::new();
        let mut failures = Vec::new();

        for url in &self.config.urls {
            match self.fetch_url(url).await {
                Ok(found) => {
                    tracing::debug!(
                        source = %self.name,
                        url = %url,
                        items = found.len(),
                        "parsed feed"
                    );
                    entries.extend(found);
                }
                Err(e) => {
                    tracing::warn!(
                        source = %self.name,
                        url = %url,
                        error = %e,
                        "feed fetch failed"
                    );
                    failures.push(format!("{}: {}", url, e));
                }
            }
        }

        if failures.len() == self.config.urls.len() {
            return Err(DiscoveryError::fetch(self.source_label(), failures.join("; ")));
        }

        let kept = filter_entries(
            entries,
            &self.config.keywords,
            Some(self.config.max_age_days),
            Utc::now(),
        );
        Ok(kept
            .into_iter()
            .map(|e| entry_to_listing(&self.name, SourceKind::Rss, e))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Grants Feed</title>
    <item>
      <title>Home Repair Grant</title>
      <link>https://example.org/grants/1</link>
      <guid>grant-1</guid>
      <description><![CDATA[<p>Housing repairs up to $5,000</p>]]></description>
      <pubDate>Mon, 05 Oct 2026 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Bridge Maintenance &amp; Paving</title>
      <link>https://example.org/grants/2</link>
      <description>Road work funding</description>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Grants</title>
  <entry>
    <title>Weatherization Assistance</title>
    <link href="https://example.org/wx"/>
    <id>urn:wx</id>
    <updated>2026-10-01T12:00:00Z</updated>
    <summary>Energy efficiency upgrades for homeowners</summary>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss_items() {
        let entries = parse_feed(RSS.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "Home Repair Grant");
        assert_eq!(entries[0].guid.as_deref(), Some("grant-1"));
        assert_eq!(entries[0].link.as_deref(), Some("https://example.org/grants/1"));
        assert!(entries[0].description.contains("$5,000"));
        assert!(entries[0].published.is_some());
        assert_eq!(entries[1].title, "Bridge Maintenance & Paving");
        assert!(entries[1].published.is_none());
    }

    #[test]
    fn test_parse_atom_entries() {
        let entries = parse_feed(ATOM.as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].link.as_deref(), Some("https://example.org/wx"));
        assert_eq!(entries[0].guid.as_deref(), Some("urn:wx"));
        assert!(entries[0].description.contains("Energy efficiency"));
        assert!(entries[0].published.is_some());
    }

    #[test]
    fn test_malformed_feed_is_error() {
        assert!(parse_feed(b"<rss><channel><item></channel>").is_err());
    }

    #[test]
    fn test_filter_by_keyword_age_and_link() {
        let now = Utc::now();
        let entry = |title: &str, link: &str, days_old: Option<i64>| FeedEntry {
            title: title.to_string(),
            link: Some(link.to_string()),
            published: days_old.map(|d| now - Duration::days(d)),
            ..Default::default()
        };
        let entries = vec![
            entry("Housing rehab grant", "https://a", Some(1)),
            entry("Housing rehab grant (repost)", "https://a", Some(2)),
            entry("Old housing program", "https://b", Some(90)),
            entry("Highway funding", "https://c", Some(1)),
            entry("Undated roof program", "https://d", None),
        ];
        let keywords = crate::config::default_housing_keywords();
        let kept = filter_entries(entries, &keywords, Some(30), now);
        let titles: Vec<_> = kept.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Housing rehab grant", "Undated roof program"]);
    }

    #[test]
    fn test_entry_id_fallbacks() {
        let mut e = FeedEntry {
            title: "t".into(),
            ..Default::default()
        };
        assert!(entry_id(&e).starts_with("sha256:"));
        e.link = Some("https://x".into());
        assert_eq!(entry_id(&e), "https://x");
        e.guid = Some("g".into());
        assert_eq!(entry_id(&e), "g");
    }
}
