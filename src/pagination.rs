//! Search, sort and paging helpers shared by the list endpoints.
//!
//! Sort columns are never taken from the request verbatim: callers map the
//! requested name through an allow-list of `(api name, SQL column)` pairs and
//! only the matched static column text is pushed into the query.

use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};

use crate::errors::AppError;

pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;

/// Query parameters common to every list endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub search: Option<String>,
    #[serde(alias = "sort_by")]
    pub sort_by: Option<String>,
    #[serde(alias = "sort_order")]
    pub sort_order: Option<String>,
    /// Kept as text so empty values (`?limit=`) mean "default" instead of a parse error.
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl ListParams {
    pub fn page(&self) -> Result<Page, AppError> {
        Page::parse(self.limit.as_deref(), self.offset.as_deref())
    }

    pub fn pattern(&self) -> Option<String> {
        search_pattern(self.search.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    /// Anything other than ASC/DESC (any case) falls back to `default`.
    pub fn parse_or(raw: Option<&str>, default: SortOrder) -> SortOrder {
        match raw.map(|s| s.trim().to_ascii_uppercase()).as_deref() {
            Some("ASC") => SortOrder::Asc,
            Some("DESC") => SortOrder::Desc,
            Some(other) => {
                tracing::debug!("Ignoring unsupported sortOrder '{}'", other);
                default
            }
            None => default,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Resolves a requested sort key against an allow-list, falling back to the first entry.
pub fn sort_column(requested: Option<&str>, allowed: &[(&str, &'static str)]) -> &'static str {
    let fallback = allowed.first().map(|(_, column)| *column).unwrap_or("id");
    match requested.map(str::trim).filter(|s| !s.is_empty()) {
        Some(key) => allowed
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, column)| *column)
            .unwrap_or_else(|| {
                tracing::debug!("Ignoring unsupported sortBy '{}'", key);
                fallback
            }),
        None => fallback,
    }
}

/// Validated limit/offset pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

fn parse_number(name: &str, raw: Option<&str>) -> Result<Option<i64>, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(value) => value
            .parse::<i64>()
            .map(Some)
            .map_err(|_| AppError::BadRequest(format!("{} must be an integer", name))),
        None => Ok(None),
    }
}

impl Page {
    /// Parses raw query values; blank means default.
    pub fn parse(limit: Option<&str>, offset: Option<&str>) -> Result<Self, AppError> {
        Self::from_params(parse_number("limit", limit)?, parse_number("offset", offset)?)
    }

    pub fn from_params(limit: Option<i64>, offset: Option<i64>) -> Result<Self, AppError> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT);
        let offset = offset.unwrap_or(0);
        if limit <= 0 {
            return Err(AppError::BadRequest("limit must be positive".to_string()));
        }
        if offset < 0 {
            return Err(AppError::BadRequest("offset cannot be negative".to_string()));
        }
        Ok(Self {
            limit: limit.min(MAX_LIMIT),
            offset,
        })
    }

    pub fn push(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" LIMIT ")
            .push_bind(self.limit)
            .push(" OFFSET ")
            .push_bind(self.offset);
    }
}

/// Trimmed, non-empty search term wrapped for ILIKE.
pub fn search_pattern(search: Option<&str>) -> Option<String> {
    search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let escaped = s
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            format!("%{}%", escaped)
        })
}

/// Appends `(<col> ILIKE $n OR ...)` for the given columns.
///
/// `joiner` is the keyword placed before the group (" WHERE " or " AND ").
pub fn push_search(
    qb: &mut QueryBuilder<'_, Postgres>,
    joiner: &str,
    columns: &[&str],
    pattern: &str,
) {
    qb.push(joiner).push("(");
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            qb.push(" OR ");
        }
        qb.push(*column)
            .push(" ILIKE ")
            .push_bind(pattern.to_string());
    }
    qb.push(")");
}
