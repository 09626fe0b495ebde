//! TOML configuration parsing and validation.
//!
//! All settings live in one file (default `./config/grants.toml`). String
//! values may reference environment variables as `${NAME}`; they are
//! expanded before parsing so secrets can stay out of the file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::models::SourceKind;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Secret used to sign and verify admin bearer tokens.
    #[serde(default)]
    pub admin_secret: Option<String>,
}

/// How `POST /api/discovery/run` executes.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Return the freshly created run immediately; work continues in a task.
    Background,
    /// Return only after the run has closed.
    Sync,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    #[serde(default = "default_trigger_mode")]
    pub trigger_mode: TriggerMode,
    #[serde(default = "default_sources")]
    pub default_sources: Vec<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_page_limit")]
    pub page_limit: i64,
    /// Confidence at or above which a pending grant is called out in
    /// run notifications.
    #[serde(default = "default_high_confidence")]
    pub high_confidence: f64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            trigger_mode: default_trigger_mode(),
            default_sources: default_sources(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            page_limit: default_page_limit(),
            high_confidence: default_high_confidence(),
        }
    }
}

fn default_trigger_mode() -> TriggerMode {
    TriggerMode::Background
}
fn default_sources() -> Vec<String> {
    vec!["all".to_string()]
}
fn default_user_agent() -> String {
    format!("grant-discovery/{}", env!("CARGO_PKG_VERSION"))
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_page_limit() -> i64 {
    50
}
fn default_high_confidence() -> f64 {
    0.8
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    #[serde(default = "default_name_weight")]
    pub name_weight: f64,
    #[serde(default = "default_agency_weight")]
    pub agency_weight: f64,
    #[serde(default = "default_probable_threshold")]
    pub probable_threshold: f64,
    #[serde(default = "default_possible_threshold")]
    pub possible_threshold: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            name_weight: default_name_weight(),
            agency_weight: default_agency_weight(),
            probable_threshold: default_probable_threshold(),
            possible_threshold: default_possible_threshold(),
        }
    }
}

fn default_name_weight() -> f64 {
    0.85
}
fn default_agency_weight() -> f64 {
    0.70
}
fn default_probable_threshold() -> f64 {
    0.80
}
fn default_possible_threshold() -> f64 {
    0.50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Six-field cron expression (seconds first).
    #[serde(default = "default_cron")]
    pub cron: String,
    #[serde(default = "default_true")]
    pub send_notification: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cron: default_cron(),
            send_notification: true,
        }
    }
}

fn default_cron() -> String {
    "0 0 2 * * *".to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
}

/// Named source instances, grouped by kind:
/// `[sources.rss.<name>]`, `[sources.api.<name>]`, `[sources.filesystem.<name>]`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub rss: BTreeMap<String, RssSourceConfig>,
    #[serde(default)]
    pub api: BTreeMap<String, ApiSourceConfig>,
    #[serde(default)]
    pub filesystem: BTreeMap<String, FilesystemSourceConfig>,
}

impl SourcesConfig {
    pub fn is_empty(&self) -> bool {
        self.rss.is_empty() && self.api.is_empty() && self.filesystem.is_empty()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RssSourceConfig {
    pub urls: Vec<String>,
    #[serde(default = "default_housing_keywords")]
    pub keywords: Vec<String>,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
    #[serde(default)]
    pub weight: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiSourceConfig {
    pub url: String,
    /// Dotted path to the array of listings inside the response body.
    /// Empty means the body itself is the array.
    #[serde(default)]
    pub items_path: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub weight: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemSourceConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Keyword filter applied to feed files; empty keeps everything.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub weight: Option<f64>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.xml".to_string(), "**/*.json".to_string()]
}

fn default_max_age_days() -> i64 {
    30
}

pub fn default_housing_keywords() -> Vec<String> {
    [
        "housing",
        "homeowner",
        "home repair",
        "home improvement",
        "rehabilitation",
        "weatherization",
        "energy efficiency",
        "accessibility",
        "lead",
        "roof",
        "heating",
        "plumbing",
        "home ownership",
        "affordable housing",
        "community development",
        "neighborhood",
        "residential",
        "dwelling",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Config {
    /// A config with no sources, pointing at `db_path`. Used by tests and
    /// by commands that only touch the database.
    pub fn minimal(db_path: PathBuf) -> Self {
        Self {
            db: DbConfig { path: db_path },
            server: ServerConfig {
                bind: "127.0.0.1:8080".to_string(),
                admin_secret: None,
            },
            discovery: DiscoveryConfig::default(),
            matching: MatchingConfig::default(),
            schedule: ScheduleConfig::default(),
            notify: NotifyConfig::default(),
            sources: SourcesConfig::default(),
        }
    }

    /// Reliability weight for a named source, honoring per-source overrides.
    pub fn source_weight(&self, kind: SourceKind, name: &str) -> f64 {
        let configured = match kind {
            SourceKind::Rss => self.sources.rss.get(name).and_then(|s| s.weight),
            SourceKind::Api => self.sources.api.get(name).and_then(|s| s.weight),
            SourceKind::Filesystem => self.sources.filesystem.get(name).and_then(|s| s.weight),
        };
        configured.unwrap_or_else(|| kind.default_weight())
    }
}

/// Replaces `${NAME}` references with environment values. Unset
/// variables expand to an empty string.
pub fn expand_env(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                out.push_str(&std::env::var(name).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn parse_config(content: &str) -> Result<Config> {
    let expanded = expand_env(content);
    let config: Config =
        toml::from_str(&expanded).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

fn validate(config: &Config) -> Result<()> {
    let m = &config.matching;
    for (label, value) in [
        ("matching.probable_threshold", m.probable_threshold),
        ("matching.possible_threshold", m.possible_threshold),
        ("discovery.high_confidence", config.discovery.high_confidence),
    ] {
        if !(0.0..=1.0).contains(&value) {
            bail!("{} must be in [0.0, 1.0]", label);
        }
    }
    if m.possible_threshold > m.probable_threshold {
        bail!("matching.possible_threshold must not exceed matching.probable_threshold");
    }
    if m.name_weight <= 0.0 || m.agency_weight < 0.0 {
        bail!("matching.name_weight must be > 0 and matching.agency_weight must be >= 0");
    }

    if config.discovery.page_limit < 1 {
        bail!("discovery.page_limit must be >= 1");
    }
    if config.discovery.timeout_secs == 0 {
        bail!("discovery.timeout_secs must be > 0");
    }

    let weights = config
        .sources
        .rss
        .iter()
        .map(|(n, s)| (format!("rss:{}", n), s.weight))
        .chain(
            config
                .sources
                .api
                .iter()
                .map(|(n, s)| (format!("api:{}", n), s.weight)),
        )
        .chain(
            config
                .sources
                .filesystem
                .iter()
                .map(|(n, s)| (format!("filesystem:{}", n), s.weight)),
        );
    for (label, weight) in weights {
        if let Some(w) = weight {
            if !(0.0..=1.0).contains(&w) {
                bail!("sources.{} weight must be in [0.0, 1.0]", label.replace(':', "."));
            }
        }
    }

    for (name, rss) in &config.sources.rss {
        if rss.urls.is_empty() {
            bail!("sources.rss.{} must list at least one url", name);
        }
    }

    if config.schedule.enabled && config.schedule.cron.split_whitespace().count() != 6 {
        bail!(
            "schedule.cron must have six fields (sec min hour day month weekday), got '{}'",
            config.schedule.cron
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[db]
path = "/tmp/grants.sqlite"

[server]
bind = "127.0.0.1:0"
"#;

    #[test]
    fn test_defaults_applied() {
        let cfg = parse_config(BASE).unwrap();
        assert_eq!(cfg.discovery.trigger_mode, TriggerMode::Background);
        assert_eq!(cfg.discovery.default_sources, vec!["all"]);
        assert!((cfg.matching.name_weight - 0.85).abs() < 1e-9);
        assert!((cfg.matching.agency_weight - 0.70).abs() < 1e-9);
        assert!(!cfg.schedule.enabled);
        assert!(cfg.sources.is_empty());
    }

    #[test]
    fn test_sources_parsed_by_kind() {
        let content = format!(
            r#"{}
[sources.rss.grants_gov]
urls = ["https://www.grants.gov/rss/GG_NewOpp.xml"]

[sources.api.hud]
url = "https://api.example/grants"
items_path = "data.items"
weight = 0.9

[sources.filesystem.seed]
root = "./feeds"
"#,
            BASE
        );
        let cfg = parse_config(&content).unwrap();
        assert_eq!(cfg.sources.rss["grants_gov"].max_age_days, 30);
        assert!(cfg.sources.rss["grants_gov"]
            .keywords
            .contains(&"weatherization".to_string()));
        assert!((cfg.source_weight(SourceKind::Api, "hud") - 0.9).abs() < 1e-9);
        assert!((cfg.source_weight(SourceKind::Rss, "grants_gov") - 0.6).abs() < 1e-9);
        assert_eq!(
            cfg.sources.filesystem["seed"].include_globs,
            vec!["**/*.xml", "**/*.json"]
        );
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let content = format!(
            "{}\n[matching]\nprobable_threshold = 0.4\npossible_threshold = 0.6\n",
            BASE
        );
        let err = parse_config(&content).unwrap_err();
        assert!(err.to_string().contains("possible_threshold"));
    }

    #[test]
    fn test_rejects_five_field_cron_when_enabled() {
        let content = format!("{}\n[schedule]\nenabled = true\ncron = \"0 2 * * *\"\n", BASE);
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn test_expand_env() {
        std::env::set_var("GRANTS_TEST_SECRET", "s3cret");
        assert_eq!(
            expand_env("admin_secret = \"${GRANTS_TEST_SECRET}\""),
            "admin_secret = \"s3cret\""
        );
        assert_eq!(expand_env("no refs here"), "no refs here");
        assert_eq!(expand_env("dangling ${OPEN"), "dangling ${OPEN");
    }
}
