//! Configured source overview for `grants sources` and `GET /api/sources`.

use serde::Serialize;

use crate::config::Config;
use crate::models::SourceKind;

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub kind: SourceKind,
    pub name: String,
    pub label: String,
    pub weight: f64,
    /// Where the source reads from: feed URLs, API URL, or root directory.
    pub location: String,
    pub healthy: bool,
    pub notes: Option<String>,
}

/// Lists every configured source. Filesystem sources are healthy when their
/// root exists; network sources are not probed.
pub fn get_sources(config: &Config) -> Vec<SourceStatus> {
    let mut out = Vec::new();

    for (name, rss) in &config.sources.rss {
        out.push(SourceStatus {
            kind: SourceKind::Rss,
            name: name.clone(),
            label: format!("rss:{}", name),
            weight: config.source_weight(SourceKind::Rss, name),
            location: rss.urls.join(", "),
            healthy: true,
            notes: Some(format!(
                "{} feed(s), max age {} days",
                rss.urls.len(),
                rss.max_age_days
            )),
        });
    }
    for (name, api) in &config.sources.api {
        out.push(SourceStatus {
            kind: SourceKind::Api,
            name: name.clone(),
            label: format!("api:{}", name),
            weight: config.source_weight(SourceKind::Api, name),
            location: api.url.clone(),
            healthy: true,
            notes: None,
        });
    }
    for (name, fs) in &config.sources.filesystem {
        let exists = fs.root.exists();
        out.push(SourceStatus {
            kind: SourceKind::Filesystem,
            name: name.clone(),
            label: format!("filesystem:{}", name),
            weight: config.source_weight(SourceKind::Filesystem, name),
            location: fs.root.display().to_string(),
            healthy: exists,
            notes: (!exists).then(|| "root does not exist".to_string()),
        });
    }

    out
}

pub fn list_sources(config: &Config) {
    let sources = get_sources(config);
    if sources.is_empty() {
        println!("No sources configured.");
        return;
    }
    println!("{:<28} {:<7} {:<8} LOCATION", "SOURCE", "WEIGHT", "HEALTHY");
    for s in &sources {
        println!(
            "{:<28} {:<7.2} {:<8} {}",
            s.label, s.weight, s.healthy, s.location
        );
        if let Some(notes) = &s.notes {
            println!("{:<28} {}", "", notes);
        }
    }
}
