//! Structured grants API source.
//!
//! GETs a JSON document and reads the array found at `items_path` (a dotted
//! path, empty for a top-level array). Each object becomes one listing;
//! recognized keys are passed through as structured fields so the extractor
//! does not have to guess them from text.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::ApiSourceConfig;
use crate::error::{DiscoveryError, Result};
use crate::models::{RawListing, SourceKind};
use crate::traits::GrantSource;

const ID_KEYS: &[&str] = &["id", "opportunity_id", "number", "key"];
const TITLE_KEYS: &[&str] = &["title", "name", "program_name"];
const DESCRIPTION_KEYS: &[&str] = &["description", "synopsis", "summary"];
const URL_KEYS: &[&str] = &["url", "link", "source_url"];

/// Keys copied verbatim into [`RawListing::fields`].
const STRUCTURED_KEYS: &[&str] = &[
    "name",
    "agency",
    "max_benefit",
    "deadline",
    "eligibility",
    "phone",
    "email",
    "website",
    "jurisdiction",
    "menu_category",
];

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_text(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| obj.get(*k).and_then(scalar_text))
}

/// Walks `items_path` and returns the array found there.
pub fn items_at<'a>(
    body: &'a Value,
    items_path: &str,
) -> std::result::Result<&'a Vec<Value>, String> {
    let mut node = body;
    for segment in items_path.split('.').filter(|s| !s.is_empty()) {
        node = node
            .get(segment)
            .ok_or_else(|| format!("response has no '{}' (items_path '{}')", segment, items_path))?;
    }
    node.as_array()
        .ok_or_else(|| format!("items_path '{}' does not point at an array", items_path))
}

/// Converts an API response into listings. Items that are not objects or
/// carry no identifier are skipped.
pub fn listings_from_json(
    source_name: &str,
    kind: SourceKind,
    body: &Value,
    items_path: &str,
) -> std::result::Result<Vec<RawListing>, String> {
    let items = items_at(body, items_path)?;
    let mut listings = Vec::with_capacity(items.len());

    for item in items {
        let Some(obj) = item.as_object() else {
            tracing::debug!(source = %source_name, "skipping non-object item");
            continue;
        };
        let title = first_text(obj, TITLE_KEYS).unwrap_or_default();
        let url = first_text(obj, URL_KEYS);
        let Some(id) = first_text(obj, ID_KEYS).or_else(|| url.clone()) else {
            tracing::debug!(source = %source_name, title = %title, "skipping item without id");
            continue;
        };

        let mut listing = RawListing::text(
            source_name,
            kind,
            &id,
            &title,
            &first_text(obj, DESCRIPTION_KEYS).unwrap_or_default(),
        );
        listing.source_url = url;
        listing.published_at = obj
            .get("published_at")
            .or_else(|| obj.get("posted_date"))
            .and_then(Value::as_str)
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc));
        for key in STRUCTURED_KEYS {
            if let Some(text) = obj.get(*key).and_then(scalar_text) {
                listing.fields.insert((*key).to_string(), text);
            }
        }
        listing.raw_json = serde_json::to_string(item).ok();
        listings.push(listing);
    }

    Ok(listings)
}

pub struct ApiSource {
    name: String,
    config: ApiSourceConfig,
    client: reqwest::Client,
}

impl ApiSource {
    pub fn new(name: String, config: ApiSourceConfig, client: reqwest::Client) -> Self {
        Self {
            name,
            config,
            client,
        }
    }
}

#[async_trait]
impl GrantSource for ApiSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Structured JSON grants API"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    async fn fetch(&self) -> Result<Vec<RawListing>> {
        let label = self.source_label();
        let mut request = self.client.get(&self.config.url);
        if let Some(token) = self.config.bearer_token.as_deref().filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }

        let body: Value = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DiscoveryError::fetch(&label, e))?
            .json()
            .await
            .map_err(|e| DiscoveryError::fetch(&label, e))?;

        let listings =
            listings_from_json(&self.name, SourceKind::Api, &body, &self.config.items_path)
                .map_err(|e| DiscoveryError::fetch(&label, e))?;
        tracing::debug!(source = %label, items = listings.len(), "fetched api listings");
        Ok(listings)
    }
}
