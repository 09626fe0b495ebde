//! Program catalog access.
//!
//! The catalog is owned by the CRUD side of the application. Discovery reads
//! active programs once per run as a [`CatalogSnapshot`] and creates new
//! programs only through [`create_program`], which approval calls inside its
//! own transaction. `catalog import` seeds the table from a JSON file.

use chrono::Utc;
use serde::Deserialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::path::Path;
use uuid::Uuid;

use crate::error::{DiscoveryError, Result};
use crate::matcher::CatalogSnapshot;
use crate::models::Program;

const MAX_KEY_LEN: usize = 100;
pub const DEFAULT_PRIORITY_RANK: f64 = 50.0;

/// Fields for a catalog program about to be created.
#[derive(Debug, Clone, Default)]
pub struct NewProgram {
    /// Explicit key; generated from the name when absent.
    pub program_key: Option<String>,
    pub name: String,
    pub agency: Option<String>,
    pub jurisdiction: Option<String>,
    pub menu_category: Option<String>,
    pub priority_rank: Option<f64>,
    pub max_benefit: Option<String>,
    pub status_or_deadline: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub eligibility_summary: Option<String>,
}

/// One entry in a catalog import file.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportProgram {
    #[serde(default)]
    pub program_key: Option<String>,
    pub name: String,
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
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Turns a program name into a catalog key: lowercase ASCII letters and
/// digits joined by single underscores.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars().filter(|c| *c != '\'' && *c != '"') {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let trimmed: String = slug.trim_matches('_').chars().take(MAX_KEY_LEN).collect();
    let trimmed = trimmed.trim_end_matches('_').to_string();
    if trimmed.is_empty() {
        "program".to_string()
    } else {
        trimmed
    }
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

async fn key_exists(conn: &mut SqliteConnection, key: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM programs WHERE program_key = ?")
        .bind(key)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count > 0)
}

async fn unique_key(conn: &mut SqliteConnection, base: &str) -> Result<String> {
    if !key_exists(conn, base).await? {
        return Ok(base.to_string());
    }
    let mut n = 2;
    loop {
        let suffix = format!("_{}", n);
        let stem: String = base.chars().take(MAX_KEY_LEN - suffix.len()).collect();
        let candidate = format!("{}{}", stem, suffix);
        if !key_exists(conn, &candidate).await? {
            return Ok(candidate);
        }
        n += 1;
    }
}

/// Inserts a new program and returns it.
///
/// Runs on the caller's connection so it joins whatever transaction the
/// caller holds.
pub async fn create_program(conn: &mut SqliteConnection, new: NewProgram) -> Result<Program> {
    let name = new.name.trim().to_string();
    if name.is_empty() {
        return Err(DiscoveryError::validation("program name must not be empty"));
    }
    let priority_rank = new.priority_rank.unwrap_or(DEFAULT_PRIORITY_RANK);
    if !(0.0..=100.0).contains(&priority_rank) {
        return Err(DiscoveryError::validation(
            "priority_rank must be between 0 and 100",
        ));
    }

    let program_key = match new.program_key.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => {
            if !is_valid_key(key) {
                return Err(DiscoveryError::validation(format!(
                    "program_key '{}' must contain only lowercase letters, digits, and underscores",
                    key
                )));
            }
            if key_exists(conn, key).await? {
                return Err(DiscoveryError::validation(format!(
                    "program_key '{}' already exists",
                    key
                )));
            }
            key.to_string()
        }
        _ => unique_key(conn, &slugify(&name)).await?,
    };

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().timestamp();
    let menu_category = new
        .menu_category
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| crate::extract::DEFAULT_CATEGORY.to_string());

    sqlx::query(
        r#"
        INSERT INTO programs (id, program_key, name, agency, jurisdiction, menu_category,
            priority_rank, max_benefit, status_or_deadline, phone, email, website,
            eligibility_summary, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&program_key)
    .bind(&name)
    .bind(&new.agency)
    .bind(&new.jurisdiction)
    .bind(&menu_category)
    .bind(priority_rank)
    .bind(&new.max_benefit)
    .bind(&new.status_or_deadline)
    .bind(&new.phone)
    .bind(&new.email)
    .bind(&new.website)
    .bind(&new.eligibility_summary)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    tracing::info!(program_key = %program_key, "created catalog program");

    find_program(conn, &program_key)
        .await?
        .ok_or_else(|| DiscoveryError::not_found(format!("program '{}'", program_key)))
}

pub async fn find_program(conn: &mut SqliteConnection, key: &str) -> Result<Option<Program>> {
    let sql = format!(
        "SELECT {} FROM programs WHERE program_key = ?",
        Program::COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(Program::from_row).transpose()
}

/// Looks up a program that duplicates may point at.
pub async fn find_active_program(
    conn: &mut SqliteConnection,
    key: &str,
) -> Result<Option<Program>> {
    Ok(find_program(conn, key).await?.filter(|p| p.is_active))
}

pub async fn list_programs(pool: &SqlitePool, include_inactive: bool) -> Result<Vec<Program>> {
    let sql = format!(
        "SELECT {} FROM programs {} ORDER BY priority_rank DESC, name ASC",
        Program::COLUMNS,
        if include_inactive { "" } else { "WHERE is_active = 1" }
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(Program::from_row).collect()
}

/// Active programs as seen by the matcher.
pub async fn load_snapshot(pool: &SqlitePool) -> Result<CatalogSnapshot> {
    Ok(CatalogSnapshot::new(list_programs(pool, false).await?))
}

/// Upserts programs from a JSON array file, keyed by `program_key`.
/// Entries without a key get one generated from their name.
pub async fn import_programs(pool: &SqlitePool, path: &Path) -> Result<usize> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        DiscoveryError::validation(format!("cannot read {}: {}", path.display(), e))
    })?;
    let entries: Vec<ImportProgram> = serde_json::from_str(&content).map_err(|e| {
        DiscoveryError::validation(format!("invalid catalog file {}: {}", path.display(), e))
    })?;

    let mut tx = crate::db::begin_immediate(pool).await?;
    let result = import_entries(&mut tx, entries).await;
    crate::db::finish(tx, result).await
}

async fn import_entries(conn: &mut SqliteConnection, entries: Vec<ImportProgram>) -> Result<usize> {
    let now = Utc::now().timestamp();
    let mut count = 0;
    for entry in entries {
        let name = entry.name.trim().to_string();
        if name.is_empty() {
            return Err(DiscoveryError::validation("catalog entry with empty name"));
        }
        let key = match entry.program_key.as_deref().map(str::trim) {
            Some(k) if !k.is_empty() => {
                if !is_valid_key(k) {
                    return Err(DiscoveryError::validation(format!(
                        "invalid program_key '{}'",
                        k
                    )));
                }
                k.to_string()
            }
            _ => slugify(&name),
        };

        sqlx::query(
            r#"
            INSERT INTO programs (id, program_key, name, agency, jurisdiction, menu_category,
                priority_rank, max_benefit, status_or_deadline, phone, email, website,
                eligibility_summary, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(program_key) DO UPDATE SET
                name = excluded.name,
                agency = excluded.agency,
                jurisdiction = excluded.jurisdiction,
                menu_category = excluded.menu_category,
                priority_rank = excluded.priority_rank,
                max_benefit = excluded.max_benefit,
                status_or_deadline = excluded.status_or_deadline,
                phone = excluded.phone,
                email = excluded.email,
                website = excluded.website,
                eligibility_summary = excluded.eligibility_summary,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&key)
        .bind(&name)
        .bind(&entry.agency)
        .bind(&entry.jurisdiction)
        .bind(
            entry
                .menu_category
                .as_deref()
                .unwrap_or(crate::extract::DEFAULT_CATEGORY),
        )
        .bind(entry.priority_rank.unwrap_or(DEFAULT_PRIORITY_RANK))
        .bind(&entry.max_benefit)
        .bind(&entry.status_or_deadline)
        .bind(&entry.phone)
        .bind(&entry.email)
        .bind(&entry.website)
        .bind(&entry.eligibility_summary)
        .bind(entry.is_active)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Syracuse Roof Program"), "syracuse_roof_program");
        assert_eq!(slugify("Owner's  \"Lead\" -- Safe!"), "owners_lead_safe");
        assert_eq!(slugify("   "), "program");
        assert_eq!(slugify(&"a".repeat(150)).len(), 100);
    }

    #[test]
    fn test_key_validation() {
        assert!(is_valid_key("roof_repair_2"));
        assert!(!is_valid_key("Roof Repair"));
        assert!(!is_valid_key(""));
    }
}
