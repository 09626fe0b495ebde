use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;
use crate::error::DiscoveryError;

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Opens a write transaction that takes the database write lock up front.
///
/// Review actions and batch inserts go through here so that concurrent
/// writers queue on the busy handler instead of failing when a deferred
/// transaction tries to upgrade a stale read snapshot. The returned
/// transaction rolls back when dropped without a commit.
pub async fn begin_immediate(
    pool: &SqlitePool,
) -> Result<Transaction<'static, Sqlite>, DiscoveryError> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

/// Commits on `Ok`, rolls back on `Err`, and passes the result through.
///
/// A failed commit returns the error and the dropped transaction rolls back.
pub async fn finish<T>(
    tx: Transaction<'static, Sqlite>,
    result: Result<T, DiscoveryError>,
) -> Result<T, DiscoveryError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}
