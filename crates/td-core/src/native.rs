//! # Native Request and Page Shapes
//!
//! Wire bodies for each platform, exactly as the upstream APIs expect them
//! (camelCase JSON), plus the raw page type execution clients hand back.

use crate::platform::PlatformId;
use serde::Serialize;
use std::collections::BTreeMap;

// =============================================================================
// GA4 Data API: properties.runReport
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ga4ReportRequest {
    pub date_ranges: Vec<Ga4DateRange>,
    pub dimensions: Vec<Ga4Name>,
    pub metrics: Vec<Ga4Name>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension_filter: Option<Ga4FilterExpression>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub order_bys: Vec<Ga4OrderBy>,
    pub limit: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ga4DateRange {
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ga4Name {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Ga4FilterExpression {
    AndGroup(Ga4FilterExpressionList),
    Filter(Ga4Filter),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ga4FilterExpressionList {
    pub expressions: Vec<Ga4FilterExpression>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ga4Filter {
    pub field_name: String,
    #[serde(flatten)]
    pub kind: Ga4FilterKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Ga4FilterKind {
    StringFilter(Ga4StringFilter),
    InListFilter(Ga4InListFilter),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ga4StringFilter {
    pub match_type: Ga4MatchType,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Ga4MatchType {
    Exact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ga4InListFilter {
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ga4OrderBy {
    #[serde(flatten)]
    pub target: Ga4OrderTarget,
    pub desc: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Ga4OrderTarget {
    Metric(Ga4MetricOrder),
    Dimension(Ga4DimensionOrder),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ga4MetricOrder {
    pub metric_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ga4DimensionOrder {
    pub dimension_name: String,
}

// =============================================================================
// Search Console: searchanalytics.query
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GscQueryRequest {
    pub start_date: String,
    pub end_date: String,
    pub dimensions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dimension_filter_groups: Vec<GscFilterGroup>,
    pub row_limit: u32,
    pub start_row: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GscFilterGroup {
    pub group_type: GscGroupType,
    pub filters: Vec<GscFilter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GscGroupType {
    And,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GscFilter {
    pub dimension: String,
    pub operator: GscOperator,
    pub expression: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GscOperator {
    Equals,
}

// =============================================================================
// Platform-neutral envelope
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum NativeBody {
    Ga4(Ga4ReportRequest),
    Gsc(GscQueryRequest),
}

/// A translated request, produced fresh per run and consumed by one fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeRequest {
    pub platform: PlatformId,
    pub body: NativeBody,
    /// Rows requested per page.
    pub page_size: u32,
    /// Rows the pipeline needs in total. `None` reads every page.
    pub row_budget: Option<u64>,
}

/// One raw row: native field name to the value exactly as the platform
/// returned it.
pub type NativeRow = BTreeMap<String, serde_json::Value>;

/// Opaque cursor to the next page of one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultPage {
    pub rows: Vec<NativeRow>,
    /// Present iff more rows remain upstream.
    pub continuation: Option<ContinuationToken>,
}

impl ResultPage {
    pub fn new(rows: Vec<NativeRow>, continuation: Option<ContinuationToken>) -> Self {
        Self { rows, continuation }
    }

    pub fn has_more(&self) -> bool {
        self.continuation.is_some()
    }
}
