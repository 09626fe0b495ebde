//! Admin review actions on discovered grants.
//!
//! Each action is a single compare-and-swap transition out of `pending`,
//! executed inside an immediate transaction so concurrent reviewers queue
//! behind each other. Whoever commits first wins; everyone else sees
//! [`DiscoveryError::InvalidState`]. Approval also creates the catalog
//! program in the same transaction.

use chrono::Utc;
use serde::Deserialize;
use sqlx::{SqliteConnection, SqlitePool};

use crate::catalog::{self, NewProgram};
use crate::db;
use crate::error::{DiscoveryError, Result};
use crate::models::{DiscoveredGrant, Program, ReviewStatus};

pub const MAX_REASON_CHARS: usize = 500;

/// Admin edits applied when a grant is approved. Unset fields fall back to
/// the extracted values.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApproveOverrides {
    #[serde(default)]
    pub program_key: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub agency: Option<String>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub menu_category: Option<String>,
    #[serde(default)]
    pub priority_rank: Option<f64>,
    #[serde(default)]
    pub max_benefit: Option<String>,
    #[serde(default)]
    pub status_or_deadline: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub eligibility_summary: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn pick(over: Option<String>, extracted: &Option<String>) -> Option<String> {
    over.filter(|v| !v.trim().is_empty())
        .or_else(|| extracted.clone())
}

fn check_reviewer(reviewer: &str) -> Result<()> {
    if reviewer.trim().is_empty() {
        return Err(DiscoveryError::validation("reviewer must not be empty"));
    }
    Ok(())
}

async fn load_grant(conn: &mut SqliteConnection, grant_id: &str) -> Result<DiscoveredGrant> {
    let sql = format!(
        "SELECT {} FROM discovered_grants WHERE id = ?",
        DiscoveredGrant::COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(grant_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DiscoveryError::not_found(format!("discovered grant '{}'", grant_id)))?;
    DiscoveredGrant::from_row(&row)
}

fn ensure_pending(grant: &DiscoveredGrant) -> Result<()> {
    if grant.review_status != ReviewStatus::Pending {
        return Err(DiscoveryError::invalid_state(format!(
            "grant '{}' is already {}",
            grant.id, grant.review_status
        )));
    }
    Ok(())
}

/// Moves a grant out of `pending`. Zero affected rows means another
/// reviewer got there first.
async fn transition(
    conn: &mut SqliteConnection,
    grant_id: &str,
    to: ReviewStatus,
    reviewer: &str,
    notes: Option<&str>,
    matched_program_key: Option<&str>,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE discovered_grants
        SET review_status = ?, reviewed_by = ?, reviewed_at = ?, review_notes = ?,
            matched_program_key = COALESCE(?, matched_program_key)
        WHERE id = ? AND review_status = 'pending'
        "#,
    )
    .bind(to.as_str())
    .bind(reviewer)
    .bind(Utc::now().timestamp())
    .bind(notes)
    .bind(matched_program_key)
    .bind(grant_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DiscoveryError::invalid_state(format!(
            "grant '{}' is no longer pending",
            grant_id
        )));
    }
    Ok(())
}

/// Approves a pending grant and creates its catalog program.
pub async fn approve(
    pool: &SqlitePool,
    grant_id: &str,
    reviewer: &str,
    overrides: ApproveOverrides,
) -> Result<Program> {
    check_reviewer(reviewer)?;
    if let Some(rank) = overrides.priority_rank {
        if !(0.0..=100.0).contains(&rank) {
            return Err(DiscoveryError::validation(
                "priority_rank must be between 0 and 100",
            ));
        }
    }

    let mut tx = db::begin_immediate(pool).await?;
    let result = approve_in_tx(&mut tx, grant_id, reviewer, overrides).await;
    let program = db::finish(tx, result).await?;

    tracing::info!(
        grant_id = %grant_id,
        reviewer = %reviewer,
        program_key = %program.program_key,
        "grant approved"
    );
    Ok(program)
}

async fn approve_in_tx(
    conn: &mut SqliteConnection,
    grant_id: &str,
    reviewer: &str,
    overrides: ApproveOverrides,
) -> Result<Program> {
    let grant = load_grant(conn, grant_id).await?;
    ensure_pending(&grant)?;
    transition(
        conn,
        grant_id,
        ReviewStatus::Approved,
        reviewer,
        overrides.notes.as_deref(),
        None,
    )
    .await?;

    let new = NewProgram {
        program_key: overrides.program_key,
        name: overrides
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| grant.name.clone()),
        agency: pick(overrides.agency, &grant.agency),
        jurisdiction: pick(overrides.jurisdiction, &grant.jurisdiction),
        menu_category: pick(overrides.menu_category, &grant.menu_category),
        priority_rank: overrides.priority_rank,
        max_benefit: pick(overrides.max_benefit, &grant.max_benefit),
        status_or_deadline: pick(overrides.status_or_deadline, &grant.deadline),
        phone: pick(overrides.phone, &grant.phone),
        email: pick(overrides.email, &grant.email),
        website: pick(overrides.website, &grant.website.clone().or(grant.source_url.clone())),
        eligibility_summary: pick(overrides.eligibility_summary, &grant.eligibility),
    };
    let program = catalog::create_program(conn, new).await?;

    sqlx::query("UPDATE discovered_grants SET created_program_key = ? WHERE id = ?")
        .bind(&program.program_key)
        .bind(grant_id)
        .execute(&mut *conn)
        .await?;

    Ok(program)
}

/// Rejects a pending grant. The reason is required.
pub async fn reject(
    pool: &SqlitePool,
    grant_id: &str,
    reviewer: &str,
    reason: &str,
) -> Result<DiscoveredGrant> {
    check_reviewer(reviewer)?;
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(DiscoveryError::validation("rejection reason must not be empty"));
    }
    if reason.chars().count() > MAX_REASON_CHARS {
        return Err(DiscoveryError::validation(format!(
            "rejection reason must be at most {} characters",
            MAX_REASON_CHARS
        )));
    }

    let mut tx = db::begin_immediate(pool).await?;
    let result = reject_in_tx(&mut tx, grant_id, reviewer, reason).await;
    let grant = db::finish(tx, result).await?;

    tracing::info!(grant_id = %grant_id, reviewer = %reviewer, "grant rejected");
    Ok(grant)
}

/// Marks a pending grant as a duplicate of an existing active program.
pub async fn mark_duplicate(
    pool: &SqlitePool,
    grant_id: &str,
    reviewer: &str,
    program_key: &str,
    notes: Option<&str>,
) -> Result<DiscoveredGrant> {
    check_reviewer(reviewer)?;
    let program_key = program_key.trim();
    if program_key.is_empty() {
        return Err(DiscoveryError::validation("program_key must not be empty"));
    }
    let notes = notes.map(str::trim).filter(|n| !n.is_empty());

    let mut tx = db::begin_immediate(pool).await?;
    let result = mark_duplicate_in_tx(&mut tx, grant_id, reviewer, program_key, notes).await;
    let grant = db::finish(tx, result).await?;

    tracing::info!(
        grant_id = %grant_id,
        reviewer = %reviewer,
        program_key = %program_key,
        "grant marked duplicate"
    );
    Ok(grant)
}

async fn reject_in_tx(
    conn: &mut SqliteConnection,
    grant_id: &str,
    reviewer: &str,
    reason: &str,
) -> Result<DiscoveredGrant> {
    let grant = load_grant(conn, grant_id).await?;
    ensure_pending(&grant)?;
    transition(conn, grant_id, ReviewStatus::Rejected, reviewer, Some(reason), None).await?;
    load_grant(conn, grant_id).await
}

async fn mark_duplicate_in_tx(
    conn: &mut SqliteConnection,
    grant_id: &str,
    reviewer: &str,
    program_key: &str,
    notes: Option<&str>,
) -> Result<DiscoveredGrant> {
    let grant = load_grant(conn, grant_id).await?;
    if catalog::find_active_program(conn, program_key).await?.is_none() {
        return Err(DiscoveryError::not_found(format!(
            "active program '{}'",
            program_key
        )));
    }
    ensure_pending(&grant)?;
    transition(
        conn,
        grant_id,
        ReviewStatus::Duplicate,
        reviewer,
        notes,
        Some(program_key),
    )
    .await?;
    load_grant(conn, grant_id).await
}
