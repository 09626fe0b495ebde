//! Core data models used throughout the discovery pipeline.
//!
//! These types represent the raw listings produced by sources, the
//! normalized records the extractor builds from them, and the rows the
//! pipeline persists: discovered grants, discovery runs, and catalog
//! programs.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::DiscoveryError;

// ============ Enumerations ============

/// Kind of external source a listing came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Rss,
    Api,
    Filesystem,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::Rss, SourceKind::Api, SourceKind::Filesystem];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Rss => "rss",
            SourceKind::Api => "api",
            SourceKind::Filesystem => "filesystem",
        }
    }

    /// Reliability weight used when a source does not configure its own.
    ///
    /// Structured API feeds are fully trusted; free-text RSS descriptions
    /// are the least reliable.
    pub fn default_weight(&self) -> f64 {
        match self {
            SourceKind::Api => 1.0,
            SourceKind::Filesystem => 0.8,
            SourceKind::Rss => 0.6,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rss" => Ok(SourceKind::Rss),
            "api" => Ok(SourceKind::Api),
            "filesystem" => Ok(SourceKind::Filesystem),
            other => Err(DiscoveryError::validation(format!(
                "unknown source kind '{}'. Must be rss, api, or filesystem",
                other
            ))),
        }
    }
}

/// Admin-decision lifecycle of a discovered grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
    Duplicate,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
            ReviewStatus::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReviewStatus::Pending),
            "approved" => Ok(ReviewStatus::Approved),
            "rejected" => Ok(ReviewStatus::Rejected),
            "duplicate" => Ok(ReviewStatus::Duplicate),
            other => Err(DiscoveryError::validation(format!(
                "unknown review status '{}'. Must be pending, approved, rejected, or duplicate",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(DiscoveryError::validation(format!(
                "unknown run status '{}'. Must be running, completed, or failed",
                other
            ))),
        }
    }
}

/// How strongly a candidate resembles an existing catalog program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchClass {
    Novel,
    PossibleDuplicate,
    ProbableDuplicate,
}

impl MatchClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchClass::Novel => "novel",
            MatchClass::PossibleDuplicate => "possible_duplicate",
            MatchClass::ProbableDuplicate => "probable_duplicate",
        }
    }
}

impl fmt::Display for MatchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchClass {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "novel" => Ok(MatchClass::Novel),
            "possible_duplicate" => Ok(MatchClass::PossibleDuplicate),
            "probable_duplicate" => Ok(MatchClass::ProbableDuplicate),
            other => Err(DiscoveryError::validation(format!(
                "unknown match class '{}'",
                other
            ))),
        }
    }
}

/// Fields the extractor tries to recognize. Completeness is measured
/// against [`FieldName::EXPECTED`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    Name,
    Agency,
    MaxBenefit,
    Deadline,
    Eligibility,
    Phone,
    Email,
    Website,
}

impl FieldName {
    pub const EXPECTED: [FieldName; 8] = [
        FieldName::Name,
        FieldName::Agency,
        FieldName::MaxBenefit,
        FieldName::Deadline,
        FieldName::Eligibility,
        FieldName::Phone,
        FieldName::Email,
        FieldName::Website,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldName::Name => "name",
            FieldName::Agency => "agency",
            FieldName::MaxBenefit => "max_benefit",
            FieldName::Deadline => "deadline",
            FieldName::Eligibility => "eligibility",
            FieldName::Phone => "phone",
            FieldName::Email => "email",
            FieldName::Website => "website",
        }
    }
}

// ============ Source output ============

/// Raw listing produced by a source before extraction.
#[derive(Debug, Clone)]
pub struct RawListing {
    pub source_name: String,
    pub source_kind: SourceKind,
    /// Stable identifier within the source (GUID, API id, link).
    pub source_item_id: String,
    pub source_url: Option<String>,
    pub title: String,
    pub description: String,
    pub published_at: Option<DateTime<Utc>>,
    /// Structured fields supplied directly by the source, keyed by
    /// [`FieldName::as_str`] (plus `jurisdiction`/`menu_category`).
    pub fields: BTreeMap<String, String>,
    pub raw_json: Option<String>,
}

impl RawListing {
    /// A listing with only a title and description, as produced by feeds.
    pub fn text(
        source_name: &str,
        source_kind: SourceKind,
        source_item_id: &str,
        title: &str,
        description: &str,
    ) -> Self {
        Self {
            source_name: source_name.to_string(),
            source_kind,
            source_item_id: source_item_id.to_string(),
            source_url: None,
            title: title.to_string(),
            description: description.to_string(),
            published_at: None,
            fields: BTreeMap::new(),
            raw_json: None,
        }
    }
}

/// Normalized record built from a raw listing. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialRecord {
    pub name: Option<String>,
    pub agency: Option<String>,
    pub max_benefit: Option<String>,
    pub deadline: Option<String>,
    pub eligibility: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub jurisdiction: Option<String>,
    pub menu_category: Option<String>,
}

impl PartialRecord {
    pub fn get(&self, field: FieldName) -> Option<&str> {
        let value = match field {
            FieldName::Name => &self.name,
            FieldName::Agency => &self.agency,
            FieldName::MaxBenefit => &self.max_benefit,
            FieldName::Deadline => &self.deadline,
            FieldName::Eligibility => &self.eligibility,
            FieldName::Phone => &self.phone,
            FieldName::Email => &self.email,
            FieldName::Website => &self.website,
        };
        value.as_deref().filter(|v| !v.trim().is_empty())
    }
}

/// Result of field extraction: what was found and what is missing.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub fields: PartialRecord,
    pub missing: BTreeSet<FieldName>,
}

impl Extracted {
    /// Builds the missing-field set from the populated fields.
    pub fn from_fields(fields: PartialRecord) -> Self {
        let missing = FieldName::EXPECTED
            .iter()
            .copied()
            .filter(|f| fields.get(*f).is_none())
            .collect();
        Self { fields, missing }
    }

    pub fn present_count(&self) -> usize {
        FieldName::EXPECTED.len() - self.missing.len()
    }
}

// ============ Persisted rows ============

/// A candidate grant pulled from an external source, awaiting review.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredGrant {
    pub id: String,
    pub run_id: Option<String>,
    pub source_kind: SourceKind,
    pub source_name: String,
    pub source_item_id: String,
    pub source_url: Option<String>,
    pub name: String,
    pub agency: Option<String>,
    pub max_benefit: Option<String>,
    pub deadline: Option<String>,
    pub eligibility: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub jurisdiction: Option<String>,
    pub menu_category: Option<String>,
    pub missing_fields: Vec<FieldName>,
    pub confidence_score: f64,
    pub similarity_score: Option<f64>,
    pub matched_program_key: Option<String>,
    pub match_class: MatchClass,
    pub review_status: ReviewStatus,
    pub review_notes: Option<String>,
    pub reviewed_by: Option<String>,
    pub created_program_key: Option<String>,
    pub discovered_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl DiscoveredGrant {
    pub const COLUMNS: &'static str = "id, run_id, source_kind, source_name, source_item_id, source_url, \
        name, agency, max_benefit, deadline, eligibility, phone, email, website, jurisdiction, \
        menu_category, missing_fields, confidence_score, similarity_score, matched_program_key, \
        match_class, review_status, review_notes, reviewed_by, created_program_key, \
        discovered_at, reviewed_at";

    pub fn from_row(row: &SqliteRow) -> Result<Self, DiscoveryError> {
        let source_kind: String = row.try_get("source_kind")?;
        let match_class: String = row.try_get("match_class")?;
        let review_status: String = row.try_get("review_status")?;
        let missing_json: String = row.try_get("missing_fields")?;
        let discovered_at: i64 = row.try_get("discovered_at")?;
        let reviewed_at: Option<i64> = row.try_get("reviewed_at")?;

        Ok(Self {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            source_kind: source_kind.parse()?,
            source_name: row.try_get("source_name")?,
            source_item_id: row.try_get("source_item_id")?,
            source_url: row.try_get("source_url")?,
            name: row.try_get("name")?,
            agency: row.try_get("agency")?,
            max_benefit: row.try_get("max_benefit")?,
            deadline: row.try_get("deadline")?,
            eligibility: row.try_get("eligibility")?,
            phone: row.try_get("phone")?,
            email: row.try_get("email")?,
            website: row.try_get("website")?,
            jurisdiction: row.try_get("jurisdiction")?,
            menu_category: row.try_get("menu_category")?,
            missing_fields: serde_json::from_str(&missing_json).unwrap_or_default(),
            confidence_score: row.try_get("confidence_score")?,
            similarity_score: row.try_get("similarity_score")?,
            matched_program_key: row.try_get("matched_program_key")?,
            match_class: match_class.parse()?,
            review_status: review_status.parse()?,
            review_notes: row.try_get("review_notes")?,
            reviewed_by: row.try_get("reviewed_by")?,
            created_program_key: row.try_get("created_program_key")?,
            discovered_at: ts_to_datetime(discovered_at),
            reviewed_at: reviewed_at.map(ts_to_datetime),
        })
    }
}

/// One entry in a run's error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunErrorEntry {
    pub source: String,
    pub stage: String,
    pub error: String,
}

/// One invocation of the discovery pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryRun {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub sources_checked: i64,
    pub grants_discovered: i64,
    pub duplicates_found: i64,
    pub errors: i64,
    pub error_log: Vec<RunErrorEntry>,
}

impl DiscoveryRun {
    pub const COLUMNS: &'static str = "id, started_at, completed_at, status, sources_checked, \
        grants_discovered, duplicates_found, errors, error_log";

    pub fn from_row(row: &SqliteRow) -> Result<Self, DiscoveryError> {
        let status: String = row.try_get("status")?;
        let started_at: i64 = row.try_get("started_at")?;
        let completed_at: Option<i64> = row.try_get("completed_at")?;
        let error_log: String = row.try_get("error_log")?;

        Ok(Self {
            id: row.try_get("id")?,
            started_at: ts_to_datetime(started_at),
            completed_at: completed_at.map(ts_to_datetime),
            status: status.parse()?,
            sources_checked: row.try_get("sources_checked")?,
            grants_discovered: row.try_get("grants_discovered")?,
            duplicates_found: row.try_get("duplicates_found")?,
            errors: row.try_get("errors")?,
            error_log: serde_json::from_str(&error_log).unwrap_or_default(),
        })
    }
}

/// Canonical catalog entry, owned by the CRUD side of the application.
#[derive(Debug, Clone, Serialize)]
pub struct Program {
    pub id: String,
    pub program_key: String,
    pub name: String,
    pub agency: Option<String>,
    pub jurisdiction: Option<String>,
    pub menu_category: String,
    pub priority_rank: f64,
    pub max_benefit: Option<String>,
    pub status_or_deadline: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub eligibility_summary: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Program {
    pub const COLUMNS: &'static str = "id, program_key, name, agency, jurisdiction, menu_category, \
        priority_rank, max_benefit, status_or_deadline, phone, email, website, \
        eligibility_summary, is_active, created_at, updated_at";

    pub fn from_row(row: &SqliteRow) -> Result<Self, DiscoveryError> {
        let created_at: i64 = row.try_get("created_at")?;
        let updated_at: i64 = row.try_get("updated_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            program_key: row.try_get("program_key")?,
            name: row.try_get("name")?,
            agency: row.try_get("agency")?,
            jurisdiction: row.try_get("jurisdiction")?,
            menu_category: row.try_get("menu_category")?,
            priority_rank: row.try_get("priority_rank")?,
            max_benefit: row.try_get("max_benefit")?,
            status_or_deadline: row.try_get("status_or_deadline")?,
            phone: row.try_get("phone")?,
            email: row.try_get("email")?,
            website: row.try_get("website")?,
            eligibility_summary: row.try_get("eligibility_summary")?,
            is_active: row.try_get("is_active")?,
            created_at: ts_to_datetime(created_at),
            updated_at: ts_to_datetime(updated_at),
        })
    }
}

pub fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_default()
}
