//! Discovery statistics.
//!
//! Aggregates run history and the review queue into one overview, shown by
//! `grants stats` and served at `GET /api/discovery/stats`.

use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::error::Result;
use crate::models::ts_to_datetime;

#[derive(Debug, Clone, Serialize)]
pub struct SourceBreakdown {
    pub source_kind: String,
    pub source_name: String,
    pub discovered: i64,
    pub pending: i64,
    pub approved: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryStats {
    pub total_runs: i64,
    pub total_discovered: i64,
    pub total_duplicates: i64,
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
    pub duplicates_marked: i64,
    pub avg_confidence: Option<f64>,
    pub last_run_at: Option<String>,
    pub sources: Vec<SourceBreakdown>,
}

pub async fn discovery_stats(pool: &SqlitePool) -> Result<DiscoveryStats> {
    let total_runs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM discovery_runs")
        .fetch_one(pool)
        .await?;
    let last_run_at: Option<i64> = sqlx::query_scalar("SELECT MAX(started_at) FROM discovery_runs")
        .fetch_one(pool)
        .await?;

    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COALESCE(SUM(CASE WHEN match_class = 'probable_duplicate' THEN 1 ELSE 0 END), 0) AS probable,
            COALESCE(SUM(CASE WHEN review_status = 'pending' THEN 1 ELSE 0 END), 0) AS pending,
            COALESCE(SUM(CASE WHEN review_status = 'approved' THEN 1 ELSE 0 END), 0) AS approved,
            COALESCE(SUM(CASE WHEN review_status = 'rejected' THEN 1 ELSE 0 END), 0) AS rejected,
            COALESCE(SUM(CASE WHEN review_status = 'duplicate' THEN 1 ELSE 0 END), 0) AS duplicate,
            AVG(confidence_score) AS avg_confidence
        FROM discovered_grants
        "#,
    )
    .fetch_one(pool)
    .await?;

    let source_rows = sqlx::query(
        r#"
        SELECT source_kind, source_name,
               COUNT(*) AS discovered,
               COALESCE(SUM(CASE WHEN review_status = 'pending' THEN 1 ELSE 0 END), 0) AS pending,
               COALESCE(SUM(CASE WHEN review_status = 'approved' THEN 1 ELSE 0 END), 0) AS approved
        FROM discovered_grants
        GROUP BY source_kind, source_name
        ORDER BY source_kind, source_name
        "#,
    )
    .fetch_all(pool)
    .await?;

    let sources = source_rows
        .iter()
        .map(|r| SourceBreakdown {
            source_kind: r.get("source_kind"),
            source_name: r.get("source_name"),
            discovered: r.get("discovered"),
            pending: r.get("pending"),
            approved: r.get("approved"),
        })
        .collect();

    Ok(DiscoveryStats {
        total_runs,
        total_discovered: row.get("total"),
        total_duplicates: row.get("probable"),
        pending: row.get("pending"),
        approved: row.get("approved"),
        rejected: row.get("rejected"),
        duplicates_marked: row.get("duplicate"),
        avg_confidence: row.get("avg_confidence"),
        last_run_at: last_run_at.map(|ts| ts_to_datetime(ts).to_rfc3339()),
        sources,
    })
}

/// Prints the overview for `grants stats`.
pub fn print_stats(stats: &DiscoveryStats) {
    println!("Grant Discovery — Stats");
    println!("=======================");
    println!();
    println!("  Runs:              {}", stats.total_runs);
    println!(
        "  Last run:          {}",
        stats.last_run_at.as_deref().unwrap_or("never")
    );
    println!("  Discovered:        {}", stats.total_discovered);
    println!("  Probable dups:     {}", stats.total_duplicates);
    println!(
        "  Avg confidence:    {}",
        stats
            .avg_confidence
            .map(|c| format!("{:.2}", c))
            .unwrap_or_else(|| "-".to_string())
    );
    println!();
    println!("  Review queue:");
    println!("    pending:   {}", stats.pending);
    println!("    approved:  {}", stats.approved);
    println!("    rejected:  {}", stats.rejected);
    println!("    duplicate: {}", stats.duplicates_marked);

    if !stats.sources.is_empty() {
        println!();
        println!(
            "  {:<12} {:<20} {:>10} {:>8} {:>9}",
            "KIND", "SOURCE", "DISCOVERED", "PENDING", "APPROVED"
        );
        for s in &stats.sources {
            println!(
                "  {:<12} {:<20} {:>10} {:>8} {:>9}",
                s.source_kind, s.source_name, s.discovered, s.pending, s.approved
            );
        }
    }
}
