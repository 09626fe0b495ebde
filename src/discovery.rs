//! Discovery run orchestration.
//!
//! A run checks the selected sources one after another:
//!
//! ```text
//! fetch → extract → score → match → persist (one transaction per source)
//! ```
//!
//! A source that fails to fetch or persist is recorded in the run's error
//! log and the run moves on. The run ends `completed` when at least one
//! source succeeded and `failed` otherwise. Every inserted grant starts
//! `pending`; the pipeline never decides a grant's final disposition.
//!
//! Listings without a name are skipped, as are listings already discovered
//! by an earlier run (same source name and item id).

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

use crate::catalog;
use crate::config::Config;
use crate::confidence::confidence_score;
use crate::db;
use crate::error::{DiscoveryError, Result};
use crate::extract::extract;
use crate::matcher::{find_best_match, CatalogSnapshot};
use crate::models::{
    DiscoveredGrant, DiscoveryRun, Extracted, MatchClass, RawListing, ReviewStatus,
    RunErrorEntry, RunStatus,
};
use crate::notify::{notifier_from_config, Notifier, RunSummary, MAX_NOTIFIED_GRANTS};
use crate::traits::{GrantSource, SourceRegistry};

/// Everything a run needs: config, database, sources, and a notifier.
#[derive(Clone)]
pub struct Pipeline {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub registry: SourceRegistry,
    pub notifier: Arc<dyn Notifier>,
}

/// Outcome of persisting one source's batch.
#[derive(Debug, Default, Clone, Copy)]
struct BatchCounts {
    inserted: i64,
    probable: i64,
}

/// A listing ready to be stored.
struct Candidate {
    listing: RawListing,
    extracted: Extracted,
    confidence: f64,
    similarity: Option<f64>,
    matched_program_key: Option<String>,
    match_class: MatchClass,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        pool: SqlitePool,
        registry: SourceRegistry,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            pool,
            registry,
            notifier,
        }
    }

    /// Builds the configured sources and notifier.
    pub fn from_config(config: Arc<Config>, pool: SqlitePool) -> Result<Self> {
        let registry = SourceRegistry::from_config(&config)?;
        let client = crate::source_rss::http_client(&config.discovery)?;
        let notifier: Arc<dyn Notifier> = Arc::from(notifier_from_config(&config.notify, client));
        Ok(Self::new(config, pool, registry, notifier))
    }

    /// Resolves the requested sources and records a new `running` run.
    ///
    /// Source selection is validated before anything is written.
    pub async fn start_run(
        &self,
        specs: &[String],
    ) -> Result<(DiscoveryRun, Vec<Arc<dyn GrantSource>>)> {
        let sources = self.registry.select(specs)?;
        let run = DiscoveryRun {
            id: Uuid::new_v4().to_string(),
            started_at: crate::models::ts_to_datetime(Utc::now().timestamp()),
            completed_at: None,
            status: RunStatus::Running,
            sources_checked: 0,
            grants_discovered: 0,
            duplicates_found: 0,
            errors: 0,
            error_log: Vec::new(),
        };

        sqlx::query(
            "INSERT INTO discovery_runs (id, started_at, status, error_log) VALUES (?, ?, ?, '[]')",
        )
        .bind(&run.id)
        .bind(run.started_at.timestamp())
        .bind(run.status.as_str())
        .execute(&self.pool)
        .await?;

        tracing::info!(
            run_id = %run.id,
            sources = ?sources.iter().map(|s| s.source_label()).collect::<Vec<_>>(),
            "discovery run started"
        );
        Ok((run, sources))
    }

    /// Runs discovery to completion and returns the closed run.
    pub async fn run_discovery(
        &self,
        specs: &[String],
        send_notification: bool,
    ) -> Result<DiscoveryRun> {
        let (run, sources) = self.start_run(specs).await?;
        self.execute_run(run, sources, send_notification).await
    }

    /// Records a run and continues it on a background task. Returns the
    /// freshly created `running` run.
    pub async fn spawn_run(
        &self,
        specs: &[String],
        send_notification: bool,
    ) -> Result<DiscoveryRun> {
        let (run, sources) = self.start_run(specs).await?;
        let pipeline = self.clone();
        let started = run.clone();
        tokio::spawn(async move {
            let run_id = run.id.clone();
            if let Err(e) = pipeline.execute_run(run, sources, send_notification).await {
                tracing::error!(run_id = %run_id, error = %e, "background discovery run failed");
            }
        });
        Ok(started)
    }

    /// Processes every source of a started run and closes it.
    ///
    /// If bookkeeping itself fails the run is closed as `failed` on a best
    /// effort basis so it does not stay `running`.
    pub async fn execute_run(
        &self,
        mut run: DiscoveryRun,
        sources: Vec<Arc<dyn GrantSource>>,
        send_notification: bool,
    ) -> Result<DiscoveryRun> {
        match self.process_sources(&mut run, &sources, send_notification).await {
            Ok(()) => Ok(run),
            Err(e) => {
                run.status = RunStatus::Failed;
                run.completed_at = Some(Utc::now());
                run.error_log.push(RunErrorEntry {
                    source: "pipeline".to_string(),
                    stage: "run".to_string(),
                    error: e.to_string(),
                });
                run.errors += 1;
                if let Err(save_err) = save_run(&self.pool, &run).await {
                    tracing::error!(
                        run_id = %run.id,
                        error = %save_err,
                        "could not close failed run"
                    );
                }
                Err(e)
            }
        }
    }

    async fn process_sources(
        &self,
        run: &mut DiscoveryRun,
        sources: &[Arc<dyn GrantSource>],
        send_notification: bool,
    ) -> Result<()> {
        let catalog = catalog::load_snapshot(&self.pool).await?;
        tracing::debug!(run_id = %run.id, programs = catalog.len(), "loaded catalog snapshot");

        let mut succeeded = 0usize;
        for source in sources {
            let label = source.source_label();
            run.sources_checked += 1;

            match self.process_source(&run.id, source.as_ref(), &catalog).await {
                Ok(counts) => {
                    succeeded += 1;
                    run.grants_discovered += counts.inserted;
                    run.duplicates_found += counts.probable;
                    tracing::info!(
                        run_id = %run.id,
                        source = %label,
                        inserted = counts.inserted,
                        probable_duplicates = counts.probable,
                        "source processed"
                    );
                }
                Err((stage, e)) => {
                    tracing::warn!(
                        run_id = %run.id,
                        source = %label,
                        stage,
                        error = %e,
                        "source failed"
                    );
                    run.errors += 1;
                    run.error_log.push(RunErrorEntry {
                        source: label,
                        stage: stage.to_string(),
                        error: e.to_string(),
                    });
                }
            }

            save_run(&self.pool, run).await?;
        }

        run.status = if succeeded > 0 {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };

        if send_notification {
            if let Err(e) = self.send_summary(run).await {
                tracing::warn!(run_id = %run.id, error = %e, "notification failed");
                run.errors += 1;
                run.error_log.push(RunErrorEntry {
                    source: "notifier".to_string(),
                    stage: "notify".to_string(),
                    error: e.to_string(),
                });
            }
        }

        run.completed_at = Some(Utc::now());
        save_run(&self.pool, run).await?;

        tracing::info!(
            run_id = %run.id,
            status = %run.status,
            sources_checked = run.sources_checked,
            discovered = run.grants_discovered,
            duplicates = run.duplicates_found,
            errors = run.errors,
            "discovery run finished"
        );
        Ok(())
    }

    async fn process_source(
        &self,
        run_id: &str,
        source: &dyn GrantSource,
        catalog: &CatalogSnapshot,
    ) -> std::result::Result<BatchCounts, (&'static str, DiscoveryError)> {
        let listings = source.fetch().await.map_err(|e| ("fetch", e))?;
        let weight = self.config.source_weight(source.kind(), source.name());

        let mut candidates = Vec::with_capacity(listings.len());
        for listing in listings {
            match self.evaluate(listing, weight, catalog) {
                Some(c) => candidates.push(c),
                None => continue,
            }
        }

        let mut tx = db::begin_immediate(&self.pool)
            .await
            .map_err(|e| ("persist", e))?;
        let result = insert_batch(&mut tx, run_id, &candidates).await;
        db::finish(tx, result)
            .await
            .map_err(|e| ("persist", e))
    }

    fn evaluate(
        &self,
        listing: RawListing,
        weight: f64,
        catalog: &CatalogSnapshot,
    ) -> Option<Candidate> {
        let extracted = extract(&listing);
        if extracted.fields.name.is_none() {
            tracing::debug!(
                source = %listing.source_name,
                item = %listing.source_item_id,
                "skipping listing without a name"
            );
            return None;
        }

        let confidence = confidence_score(&extracted, weight);
        let matched = find_best_match(&extracted.fields, catalog, &self.config.matching);
        if matched.class != MatchClass::Novel {
            tracing::debug!(
                item = %listing.source_item_id,
                program = ?matched.program_key(),
                similarity = matched.similarity,
                class = %matched.class,
                "catalog match"
            );
        }

        Some(Candidate {
            similarity: (!catalog.is_empty()).then_some(matched.similarity),
            matched_program_key: matched.program_key().map(str::to_string),
            match_class: matched.class,
            listing,
            extracted,
            confidence,
        })
    }

    async fn send_summary(&self, run: &DiscoveryRun) -> Result<()> {
        let high = high_confidence_grants(
            &self.pool,
            &run.id,
            self.config.discovery.high_confidence,
            MAX_NOTIFIED_GRANTS as i64,
        )
        .await?;
        self.notifier.notify(&RunSummary::new(run, &high)).await
    }
}

/// Inserts a source's candidates, skipping ones already discovered.
async fn insert_batch(
    conn: &mut SqliteConnection,
    run_id: &str,
    candidates: &[Candidate],
) -> Result<BatchCounts> {
    let now = Utc::now().timestamp();
    let mut counts = BatchCounts::default();

    for c in candidates {
        let f = &c.extracted.fields;
        let missing: Vec<_> = c.extracted.missing.iter().collect();
        let missing_json =
            serde_json::to_string(&missing).map_err(|e| DiscoveryError::Internal(e.into()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO discovered_grants (id, run_id, source_kind, source_name, source_item_id,
                source_url, name, agency, max_benefit, deadline, eligibility, phone, email, website,
                jurisdiction, menu_category, missing_fields, confidence_score, similarity_score,
                matched_program_key, match_class, review_status, raw_json, discovered_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_name, source_item_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(run_id)
        .bind(c.listing.source_kind.as_str())
        .bind(&c.listing.source_name)
        .bind(&c.listing.source_item_id)
        .bind(&c.listing.source_url)
        .bind(&f.name)
        .bind(&f.agency)
        .bind(&f.max_benefit)
        .bind(&f.deadline)
        .bind(&f.eligibility)
        .bind(&f.phone)
        .bind(&f.email)
        .bind(&f.website)
        .bind(&f.jurisdiction)
        .bind(&f.menu_category)
        .bind(&missing_json)
        .bind(c.confidence)
        .bind(c.similarity)
        .bind(&c.matched_program_key)
        .bind(c.match_class.as_str())
        .bind(ReviewStatus::Pending.as_str())
        .bind(&c.listing.raw_json)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(
                source = %c.listing.source_name,
                item = %c.listing.source_item_id,
                "already discovered, skipping"
            );
            continue;
        }
        counts.inserted += 1;
        if c.match_class == MatchClass::ProbableDuplicate {
            counts.probable += 1;
        }
    }

    Ok(counts)
}

async fn save_run(pool: &SqlitePool, run: &DiscoveryRun) -> Result<()> {
    let error_log =
        serde_json::to_string(&run.error_log).map_err(|e| DiscoveryError::Internal(e.into()))?;
    sqlx::query(
        r#"
        UPDATE discovery_runs
        SET status = ?, completed_at = ?, sources_checked = ?, grants_discovered = ?,
            duplicates_found = ?, errors = ?, error_log = ?
        WHERE id = ?
        "#,
    )
    .bind(run.status.as_str())
    .bind(run.completed_at.map(|t| t.timestamp()))
    .bind(run.sources_checked)
    .bind(run.grants_discovered)
    .bind(run.duplicates_found)
    .bind(run.errors)
    .bind(&error_log)
    .bind(&run.id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Pending grants from a run at or above `min_confidence`, best first.
pub async fn high_confidence_grants(
    pool: &SqlitePool,
    run_id: &str,
    min_confidence: f64,
    limit: i64,
) -> Result<Vec<DiscoveredGrant>> {
    let sql = format!(
        "SELECT {} FROM discovered_grants \
         WHERE run_id = ? AND review_status = 'pending' AND confidence_score >= ? \
         ORDER BY confidence_score DESC, name ASC LIMIT ?",
        DiscoveredGrant::COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(run_id)
        .bind(min_confidence)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    rows.iter().map(DiscoveredGrant::from_row).collect()
}
