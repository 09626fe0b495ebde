//! End-of-run notifications.
//!
//! A [`RunSummary`] describes a closed run plus the highest-confidence
//! pending grants it produced. [`WebhookNotifier`] POSTs it as JSON, signed
//! with `X-Signature-256: sha256=<hex>` when a secret is configured;
//! [`LogNotifier`] writes it to the log when no webhook is set up.

use async_trait::async_trait;
use serde::Serialize;

use crate::auth::sign;
use crate::config::NotifyConfig;
use crate::error::{DiscoveryError, Result};
use crate::models::{DiscoveredGrant, DiscoveryRun};

/// Most grants listed in a single notification.
pub const MAX_NOTIFIED_GRANTS: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct NotifiedGrant {
    pub id: String,
    pub name: String,
    pub agency: Option<String>,
    pub confidence_score: f64,
    pub match_class: String,
    pub source_url: Option<String>,
}

impl From<&DiscoveredGrant> for NotifiedGrant {
    fn from(g: &DiscoveredGrant) -> Self {
        Self {
            id: g.id.clone(),
            name: g.name.clone(),
            agency: g.agency.clone(),
            confidence_score: g.confidence_score,
            match_class: g.match_class.to_string(),
            source_url: g.source_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: String,
    pub sources_checked: i64,
    pub grants_discovered: i64,
    pub duplicates_found: i64,
    pub errors: i64,
    pub high_confidence: Vec<NotifiedGrant>,
}

impl RunSummary {
    pub fn new(run: &DiscoveryRun, high_confidence: &[DiscoveredGrant]) -> Self {
        Self {
            run_id: run.id.clone(),
            status: run.status.to_string(),
            sources_checked: run.sources_checked,
            grants_discovered: run.grants_discovered,
            duplicates_found: run.duplicates_found,
            errors: run.errors,
            high_confidence: high_confidence
                .iter()
                .take(MAX_NOTIFIED_GRANTS)
                .map(NotifiedGrant::from)
                .collect(),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, summary: &RunSummary) -> Result<()>;
}

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, summary: &RunSummary) -> Result<()> {
        tracing::info!(
            run_id = %summary.run_id,
            status = %summary.status,
            discovered = summary.grants_discovered,
            duplicates = summary.duplicates_found,
            errors = summary.errors,
            high_confidence = summary.high_confidence.len(),
            "discovery run finished"
        );
        for grant in &summary.high_confidence {
            tracing::info!(
                grant_id = %grant.id,
                name = %grant.name,
                confidence = grant.confidence_score,
                "high-confidence grant awaiting review"
            );
        }
        Ok(())
    }
}

pub struct WebhookNotifier {
    url: String,
    secret: Option<String>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String, secret: Option<String>, client: reqwest::Client) -> Self {
        Self {
            url,
            secret,
            client,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, summary: &RunSummary) -> Result<()> {
        let body = serde_json::to_vec(summary).map_err(|e| DiscoveryError::Internal(e.into()))?;
        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = self.secret.as_deref().filter(|s| !s.is_empty()) {
            request = request.header("X-Signature-256", format!("sha256={}", sign(secret, &body)));
        }

        request
            .body(body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DiscoveryError::fetch("webhook", e))?;
        Ok(())
    }
}

/// Picks the notifier for a config: the webhook when a URL is set,
/// otherwise the log.
pub fn notifier_from_config(
    config: &NotifyConfig,
    client: reqwest::Client,
) -> Box<dyn Notifier> {
    match config.webhook_url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => Box::new(WebhookNotifier::new(
            url.to_string(),
            config.webhook_secret.clone(),
            client,
        )),
        None => Box::new(LogNotifier),
    }
}
