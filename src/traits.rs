//! Source extension trait and registry.
//!
//! Every source of grant listings implements [`GrantSource`]. Built-in
//! sources (RSS feeds, a JSON API, local feed files) are created from the
//! config by [`SourceRegistry::from_config`]; callers embedding the library
//! can [`register`](SourceRegistry::register) their own.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │             SourceRegistry               │
//! │  ┌─────────┐ ┌─────────┐ ┌────────────┐  │
//! │  │  RSS    │ │  API    │ │ Filesystem │  │
//! │  └─────────┘ └─────────┘ └────────────┘  │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!        select(specs) → discovery run
//! ```

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{DiscoveryError, Result};
use crate::models::{RawListing, SourceKind};

/// A source of raw grant listings.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use grant_discovery::error::Result;
/// use grant_discovery::models::{RawListing, SourceKind};
/// use grant_discovery::traits::GrantSource;
///
/// pub struct StaticSource;
///
/// #[async_trait]
/// impl GrantSource for StaticSource {
///     fn name(&self) -> &str { "static" }
///     fn description(&self) -> &str { "A fixed list of listings" }
///     fn kind(&self) -> SourceKind { SourceKind::Api }
///
///     async fn fetch(&self) -> Result<Vec<RawListing>> {
///         Ok(vec![RawListing::text("static", SourceKind::Api, "1", "Roof Grant", "")])
///     }
/// }
/// ```
#[async_trait]
pub trait GrantSource: Send + Sync {
    /// Instance name from the config (e.g. `"grants_gov"`).
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// `"{kind}:{name}"`, used in error logs and source selection.
    fn source_label(&self) -> String {
        format!("{}:{}", self.kind(), self.name())
    }

    /// Retrieves the current listings. Failures are reported as
    /// [`DiscoveryError::Fetch`] and recorded against the run.
    async fn fetch(&self) -> Result<Vec<RawListing>>;
}

/// Registry of configured sources.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn GrantSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Builds every source named in the config.
    pub fn from_config(config: &Config) -> Result<Self> {
        use crate::source_api::ApiSource;
        use crate::source_fs::FilesystemSource;
        use crate::source_rss::RssSource;

        let client = crate::source_rss::http_client(&config.discovery)?;
        let mut registry = Self::new();

        for (name, cfg) in &config.sources.rss {
            registry.register(Arc::new(RssSource::new(
                name.clone(),
                cfg.clone(),
                client.clone(),
            )));
        }
        for (name, cfg) in &config.sources.api {
            registry.register(Arc::new(ApiSource::new(
                name.clone(),
                cfg.clone(),
                client.clone(),
            )));
        }
        for (name, cfg) in &config.sources.filesystem {
            registry.register(Arc::new(FilesystemSource::new(name.clone(), cfg.clone())));
        }

        Ok(registry)
    }

    pub fn register(&mut self, source: Arc<dyn GrantSource>) {
        self.sources.push(source);
    }

    pub fn sources(&self) -> &[Arc<dyn GrantSource>] {
        &self.sources
    }

    pub fn find(&self, kind: SourceKind, name: &str) -> Option<Arc<dyn GrantSource>> {
        self.sources
            .iter()
            .find(|s| s.kind() == kind && s.name() == name)
            .cloned()
    }

    /// Resolves source specifiers into the sources a run should check.
    ///
    /// A specifier is `all`, a kind (`rss`, `api`, `filesystem`), or
    /// `kind:name`. Duplicates are dropped while keeping registry order.
    /// Unknown specifiers and empty selections are validation errors.
    pub fn select(&self, specs: &[String]) -> Result<Vec<Arc<dyn GrantSource>>> {
        if specs.is_empty() {
            return Err(DiscoveryError::validation("no sources requested"));
        }

        let mut wanted = vec![false; self.sources.len()];
        for spec in specs {
            let spec = spec.trim();
            if spec == "all" {
                wanted.iter_mut().for_each(|w| *w = true);
                continue;
            }
            match spec.split_once(':') {
                Some((kind, name)) => {
                    let kind: SourceKind = kind.parse()?;
                    let idx = self
                        .sources
                        .iter()
                        .position(|s| s.kind() == kind && s.name() == name)
                        .ok_or_else(|| {
                            DiscoveryError::validation(format!("unknown source '{}'", spec))
                        })?;
                    wanted[idx] = true;
                }
                None => {
                    let kind: SourceKind = spec.parse()?;
                    for (i, s) in self.sources.iter().enumerate() {
                        if s.kind() == kind {
                            wanted[i] = true;
                        }
                    }
                }
            }
        }

        let selected: Vec<_> = self
            .sources
            .iter()
            .zip(wanted)
            .filter(|(_, w)| *w)
            .map(|(s, _)| s.clone())
            .collect();

        if selected.is_empty() {
            return Err(DiscoveryError::validation(format!(
                "no configured sources match {:?}",
                specs
            )));
        }
        Ok(selected)
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }
}
