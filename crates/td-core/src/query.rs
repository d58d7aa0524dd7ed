//! # Unified Query
//!
//! The platform-agnostic query descriptor. Built once through
//! [`UnifiedQueryBuilder`], immutable afterwards.

use crate::error::QueryError;
use crate::platform::PlatformId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_LIMIT: usize = 1000;

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn is_ordered(&self) -> bool {
        self.start <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterConstraint {
    Equals(String),
    In(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    #[serde(alias = "asc")]
    Ascending,
    #[serde(alias = "desc")]
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedQuery {
    date_range: DateRange,
    dimensions: Vec<String>,
    metrics: Vec<String>,
    filters: BTreeMap<String, FilterConstraint>,
    order_by: Vec<OrderBy>,
    limit: usize,
    offset: usize,
    targets: Option<BTreeSet<PlatformId>>,
}

impl UnifiedQuery {
    pub fn builder(start: NaiveDate, end: NaiveDate) -> UnifiedQueryBuilder {
        UnifiedQueryBuilder {
            date_range: DateRange::new(start, end),
            dimensions: Vec::new(),
            metrics: Vec::new(),
            filters: BTreeMap::new(),
            order_by: Vec::new(),
            limit: DEFAULT_LIMIT,
            offset: 0,
            targets: None,
        }
    }

    pub fn date_range(&self) -> DateRange {
        self.date_range
    }

    pub fn dimensions(&self) -> &[String] {
        &self.dimensions
    }

    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    pub fn filters(&self) -> &BTreeMap<String, FilterConstraint> {
        &self.filters
    }

    pub fn order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn targets(&self) -> Option<&BTreeSet<PlatformId>> {
        self.targets.as_ref()
    }

    /// Dimensions then metrics: the fields a normalized row carries.
    pub fn output_fields(&self) -> impl Iterator<Item = &str> {
        self.dimensions
            .iter()
            .chain(self.metrics.iter())
            .map(String::as_str)
    }

    /// Every canonical name the query references, deduplicated, in
    /// dimensions, metrics, filters, ordering order.
    pub fn referenced_fields(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.output_fields()
            .chain(self.filters.keys().map(String::as_str))
            .chain(self.order_by.iter().map(|o| o.field.as_str()))
            .filter(|name| seen.insert(*name))
            .collect()
    }
}

pub struct UnifiedQueryBuilder {
    date_range: DateRange,
    dimensions: Vec<String>,
    metrics: Vec<String>,
    filters: BTreeMap<String, FilterConstraint>,
    order_by: Vec<OrderBy>,
    limit: usize,
    offset: usize,
    targets: Option<BTreeSet<PlatformId>>,
}

impl UnifiedQueryBuilder {
    pub fn dimension(mut self, name: impl Into<String>) -> Self {
        self.dimensions.push(name.into());
        self
    }

    pub fn dimensions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dimensions.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn metric(mut self, name: impl Into<String>) -> Self {
        self.metrics.push(name.into());
        self
    }

    pub fn metrics<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metrics.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn filter(mut self, dimension: impl Into<String>, constraint: FilterConstraint) -> Self {
        self.filters.insert(dimension.into(), constraint);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn target(mut self, platform: PlatformId) -> Self {
        self.targets.get_or_insert_with(BTreeSet::new).insert(platform);
        self
    }

    /// Validates structure. Name resolution and range checks are left to
    /// translation, which knows the platform.
    pub fn build(self) -> Result<UnifiedQuery, QueryError> {
        let dimensions = dedup_names(self.dimensions, "dimension")?;
        let metrics = dedup_names(self.metrics, "metric")?;
        if metrics.is_empty() {
            return Err(QueryError::InvalidQuery(
                "at least one metric is required".into(),
            ));
        }
        if let Some(name) = dimensions.iter().find(|d| metrics.contains(d)) {
            return Err(QueryError::InvalidQuery(format!(
                "'{}' is requested as both dimension and metric",
                name
            )));
        }

        for (field, constraint) in &self.filters {
            if field.trim().is_empty() {
                return Err(QueryError::InvalidQuery("filter on an empty field name".into()));
            }
            if let FilterConstraint::In(values) = constraint {
                if values.is_empty() {
                    return Err(QueryError::InvalidQuery(format!(
                        "filter on '{}' has an empty value list",
                        field
                    )));
                }
            }
        }

        for order in &self.order_by {
            if !dimensions.contains(&order.field) && !metrics.contains(&order.field) {
                return Err(QueryError::InvalidQuery(format!(
                    "cannot order by '{}': not a requested dimension or metric",
                    order.field
                )));
            }
        }

        if let Some(targets) = &self.targets {
            if targets.is_empty() {
                return Err(QueryError::InvalidQuery("empty target set".into()));
            }
        }

        Ok(UnifiedQuery {
            date_range: self.date_range,
            dimensions,
            metrics,
            filters: self.filters,
            order_by: self.order_by,
            limit: self.limit,
            offset: self.offset,
            targets: self.targets,
        })
    }
}

fn dedup_names(names: Vec<String>, what: &str) -> Result<Vec<String>, QueryError> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(QueryError::InvalidQuery(format!("empty {} name", what)));
        }
        if !out.contains(&name) {
            out.push(name);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn test_builder_defaults() {
        let q = UnifiedQuery::builder(day(1), day(7))
            .metric("clicks")
            .build()
            .unwrap();
        assert_eq!(q.limit(), DEFAULT_LIMIT);
        assert_eq!(q.offset(), 0);
        assert!(q.targets().is_none());
    }

    #[test]
    fn test_metrics_required() {
        let err = UnifiedQuery::builder(day(1), day(2))
            .dimension("query")
            .build()
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidQuery(_)));
    }

    #[test]
    fn test_duplicate_names_collapse_in_order() {
        let q = UnifiedQuery::builder(day(1), day(2))
            .metrics(["clicks", "impressions", "clicks"])
            .dimensions(["query", " query "])
            .build()
            .unwrap();
        assert_eq!(q.metrics(), ["clicks", "impressions"]);
        assert_eq!(q.dimensions(), ["query"]);
    }

    #[test]
    fn test_order_by_must_reference_output_field() {
        let err = UnifiedQuery::builder(day(1), day(2))
            .metric("clicks")
            .order_by("impressions", SortDirection::Descending)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("impressions"));
    }

    #[test]
    fn test_empty_in_list_rejected() {
        let err = UnifiedQuery::builder(day(1), day(2))
            .metric("clicks")
            .filter("country", FilterConstraint::In(vec![]))
            .build()
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidQuery(_)));
    }

    #[test]
    fn test_unordered_range_is_left_to_translation() {
        let q = UnifiedQuery::builder(day(9), day(2)).metric("clicks").build();
        assert!(q.is_ok());
        assert!(!q.unwrap().date_range().is_ordered());
    }

    #[test]
    fn test_referenced_fields_dedup() {
        let q = UnifiedQuery::builder(day(1), day(2))
            .dimension("query")
            .metric("clicks")
            .filter("country", FilterConstraint::Equals("fra".into()))
            .filter("query", FilterConstraint::Equals("rust".into()))
            .order_by("clicks", SortDirection::Descending)
            .build()
            .unwrap();
        assert_eq!(q.referenced_fields(), vec!["query", "clicks", "country"]);
    }
}
