//! Read side of the review queue: discovered grants and run history.
//!
//! Used by the `grants` and `runs` CLI commands and the corresponding HTTP
//! endpoints. Filters arrive as strings from both surfaces and are parsed
//! here, so an unknown status or sort field is a validation error in both.

use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::error::{DiscoveryError, Result};
use crate::models::{DiscoveredGrant, DiscoveryRun, MatchClass, ReviewStatus, RunStatus, SourceKind};

pub const MAX_PAGE_LIMIT: i64 = 200;

/// One page of results plus the total matching the filter.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub offset: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Confidence,
    DiscoveredAt,
    Name,
    Similarity,
}

impl SortField {
    fn column(&self) -> &'static str {
        match self {
            SortField::Confidence => "confidence_score",
            SortField::DiscoveredAt => "discovered_at",
            SortField::Name => "name",
            SortField::Similarity => "similarity_score",
        }
    }
}

/// Raw grant filter as received from a query string or CLI flags.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GrantQuery {
    pub status: Option<String>,
    pub min_confidence: Option<f64>,
    pub source_type: Option<String>,
    pub match_class: Option<String>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

/// Validated grant filter.
#[derive(Debug, Clone)]
pub struct GrantFilter {
    pub status: Option<ReviewStatus>,
    pub min_confidence: Option<f64>,
    pub source_type: Option<SourceKind>,
    pub match_class: Option<MatchClass>,
    pub search: Option<String>,
    pub sort_by: SortField,
    pub descending: bool,
    pub offset: i64,
    pub limit: i64,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn page_bounds(offset: Option<i64>, limit: Option<i64>, default_limit: i64) -> Result<(i64, i64)> {
    let offset = offset.unwrap_or(0);
    let limit = limit.unwrap_or(default_limit);
    if offset < 0 {
        return Err(DiscoveryError::validation("offset must be >= 0"));
    }
    if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
        return Err(DiscoveryError::validation(format!(
            "limit must be between 1 and {}",
            MAX_PAGE_LIMIT
        )));
    }
    Ok((offset, limit))
}

impl GrantQuery {
    pub fn parse(&self, default_limit: i64) -> Result<GrantFilter> {
        if let Some(min) = self.min_confidence {
            if !(0.0..=1.0).contains(&min) {
                return Err(DiscoveryError::validation(
                    "min_confidence must be between 0 and 1",
                ));
            }
        }

        let sort_by = match non_empty(&self.sort_by) {
            None | Some("confidence") => SortField::Confidence,
            Some("discovered_at") => SortField::DiscoveredAt,
            Some("name") => SortField::Name,
            Some("similarity") => SortField::Similarity,
            Some(other) => {
                return Err(DiscoveryError::validation(format!(
                    "unknown sort_by '{}'. Must be confidence, discovered_at, name, or similarity",
                    other
                )))
            }
        };
        let descending = match non_empty(&self.sort_order) {
            None | Some("desc") => true,
            Some("asc") => false,
            Some(other) => {
                return Err(DiscoveryError::validation(format!(
                    "unknown sort_order '{}'. Must be asc or desc",
                    other
                )))
            }
        };
        let (offset, limit) = page_bounds(self.offset, self.limit, default_limit)?;

        Ok(GrantFilter {
            status: non_empty(&self.status).map(str::parse).transpose()?,
            min_confidence: self.min_confidence,
            source_type: non_empty(&self.source_type).map(str::parse).transpose()?,
            match_class: non_empty(&self.match_class).map(str::parse).transpose()?,
            search: non_empty(&self.search).map(str::to_string),
            sort_by,
            descending,
            offset,
            limit,
        })
    }
}

fn push_grant_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &GrantFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(status) = filter.status {
        qb.push(" AND review_status = ").push_bind(status.as_str());
    }
    if let Some(min) = filter.min_confidence {
        qb.push(" AND confidence_score >= ").push_bind(min);
    }
    if let Some(kind) = filter.source_type {
        qb.push(" AND source_kind = ").push_bind(kind.as_str());
    }
    if let Some(class) = filter.match_class {
        qb.push(" AND match_class = ").push_bind(class.as_str());
    }
    if let Some(search) = &filter.search {
        let pattern = format!(
            "%{}%",
            search.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        qb.push(" AND (name LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR agency LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR eligibility LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
}

pub async fn list_grants(pool: &SqlitePool, filter: &GrantFilter) -> Result<Page<DiscoveredGrant>> {
    let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM discovered_grants");
    push_grant_filters(&mut count_qb, filter);
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {} FROM discovered_grants",
        DiscoveredGrant::COLUMNS
    ));
    push_grant_filters(&mut qb, filter);
    let order = if filter.descending { "DESC" } else { "ASC" };
    // NULL similarity sorts last either way.
    qb.push(format!(
        " ORDER BY {col} IS NULL, {col} {order}, discovered_at DESC, id ASC LIMIT ",
        col = filter.sort_by.column(),
        order = order
    ))
    .push_bind(filter.limit)
    .push(" OFFSET ")
    .push_bind(filter.offset);

    let rows = qb.build().fetch_all(pool).await?;
    let items = rows
        .iter()
        .map(DiscoveredGrant::from_row)
        .collect::<Result<Vec<_>>>()?;

    Ok(Page {
        items,
        total,
        offset: filter.offset,
        limit: filter.limit,
    })
}

pub async fn get_grant(pool: &SqlitePool, id: &str) -> Result<DiscoveredGrant> {
    let sql = format!(
        "SELECT {} FROM discovered_grants WHERE id = ?",
        DiscoveredGrant::COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DiscoveryError::not_found(format!("discovered grant '{}'", id)))?;
    DiscoveredGrant::from_row(&row)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunQuery {
    pub status: Option<String>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn list_runs(
    pool: &SqlitePool,
    query: &RunQuery,
    default_limit: i64,
) -> Result<Page<DiscoveryRun>> {
    let status: Option<RunStatus> = non_empty(&query.status).map(str::parse).transpose()?;
    let (offset, limit) = page_bounds(query.offset, query.limit, default_limit)?;

    let mut count_qb =
        QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM discovery_runs WHERE 1 = 1");
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {} FROM discovery_runs WHERE 1 = 1",
        DiscoveryRun::COLUMNS
    ));
    if let Some(status) = status {
        count_qb.push(" AND status = ").push_bind(status.as_str());
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    qb.push(" ORDER BY started_at DESC, id ASC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);
    let rows = qb.build().fetch_all(pool).await?;
    let items = rows
        .iter()
        .map(DiscoveryRun::from_row)
        .collect::<Result<Vec<_>>>()?;

    Ok(Page {
        items,
        total,
        offset,
        limit,
    })
}

pub async fn get_run(pool: &SqlitePool, id: &str) -> Result<DiscoveryRun> {
    let sql = format!(
        "SELECT {} FROM discovery_runs WHERE id = ?",
        DiscoveryRun::COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DiscoveryError::not_found(format!("discovery run '{}'", id)))?;
    DiscoveryRun::from_row(&row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let f = GrantQuery::default().parse(50).unwrap();
        assert_eq!(f.sort_by, SortField::Confidence);
        assert!(f.descending);
        assert_eq!((f.offset, f.limit), (0, 50));
        assert!(f.status.is_none());
    }

    #[test]
    fn test_parses_filters() {
        let q = GrantQuery {
            status: Some("pending".into()),
            source_type: Some("rss".into()),
            match_class: Some("probable_duplicate".into()),
            sort_by: Some("name".into()),
            sort_order: Some("asc".into()),
            limit: Some(200),
            ..Default::default()
        };
        let f = q.parse(50).unwrap();
        assert_eq!(f.status, Some(ReviewStatus::Pending));
        assert_eq!(f.source_type, Some(SourceKind::Rss));
        assert_eq!(f.match_class, Some(MatchClass::ProbableDuplicate));
        assert_eq!(f.sort_by, SortField::Name);
        assert!(!f.descending);
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad = [
            GrantQuery { limit: Some(0), ..Default::default() },
            GrantQuery { limit: Some(201), ..Default::default() },
            GrantQuery { offset: Some(-1), ..Default::default() },
            GrantQuery { min_confidence: Some(1.5), ..Default::default() },
            GrantQuery { status: Some("maybe".into()), ..Default::default() },
            GrantQuery { sort_by: Some("agency".into()), ..Default::default() },
            GrantQuery { sort_order: Some("up".into()), ..Default::default() },
        ];
        for q in bad {
            assert!(matches!(q.parse(50), Err(DiscoveryError::Validation(_))), "{:?}", q);
        }
    }
}
