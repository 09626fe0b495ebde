use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates every table and index. Safe to run repeatedly.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Catalog programs (owned by the CRUD side; discovery only inserts)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS programs (
            id TEXT PRIMARY KEY,
            program_key TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            agency TEXT,
            jurisdiction TEXT,
            menu_category TEXT NOT NULL DEFAULT 'GENERAL',
            priority_rank REAL NOT NULL DEFAULT 50.0,
            max_benefit TEXT,
            status_or_deadline TEXT,
            phone TEXT,
            email TEXT,
            website TEXT,
            eligibility_summary TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS discovery_runs (
            id TEXT PRIMARY KEY,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            status TEXT NOT NULL DEFAULT 'running',
            sources_checked INTEGER NOT NULL DEFAULT 0,
            grants_discovered INTEGER NOT NULL DEFAULT 0,
            duplicates_found INTEGER NOT NULL DEFAULT 0,
            errors INTEGER NOT NULL DEFAULT 0,
            error_log TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS discovered_grants (
            id TEXT PRIMARY KEY,
            run_id TEXT,
            source_kind TEXT NOT NULL,
            source_name TEXT NOT NULL,
            source_item_id TEXT NOT NULL,
            source_url TEXT,
            name TEXT NOT NULL,
            agency TEXT,
            max_benefit TEXT,
            deadline TEXT,
            eligibility TEXT,
            phone TEXT,
            email TEXT,
            website TEXT,
            jurisdiction TEXT,
            menu_category TEXT,
            missing_fields TEXT NOT NULL DEFAULT '[]',
            confidence_score REAL NOT NULL DEFAULT 0.0,
            similarity_score REAL,
            matched_program_key TEXT,
            match_class TEXT NOT NULL DEFAULT 'novel',
            review_status TEXT NOT NULL DEFAULT 'pending',
            review_notes TEXT,
            reviewed_by TEXT,
            created_program_key TEXT,
            raw_json TEXT,
            discovered_at INTEGER NOT NULL,
            reviewed_at INTEGER,
            UNIQUE(source_name, source_item_id),
            FOREIGN KEY (run_id) REFERENCES discovery_runs(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_programs_active ON programs(is_active)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_discovered_grants_status ON discovered_grants(review_status)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_discovered_grants_confidence ON discovered_grants(confidence_score DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_discovered_grants_run ON discovered_grants(run_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_discovery_runs_started_at ON discovery_runs(started_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
