//! JSON request body for `POST /api/query`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use td_core::{FilterConstraint, OrderBy, PlatformId, QueryError, UnifiedQuery};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub dimensions: Vec<String>,
    pub metrics: Vec<String>,
    #[serde(default)]
    pub filters: BTreeMap<String, FilterValue>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
    /// Platform names; aliases such as `analytics` or `search_console` are
    /// accepted. Omitted means every platform that can answer.
    #[serde(default)]
    pub targets: Vec<String>,
}

/// A filter written as `{"equals": v}`, `{"in": [..]}`, a bare string
/// (equality) or a bare array (inclusion).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Constraint(FilterConstraint),
    Value(String),
    Values(Vec<String>),
}

impl From<FilterValue> for FilterConstraint {
    fn from(value: FilterValue) -> Self {
        match value {
            FilterValue::Constraint(c) => c,
            FilterValue::Value(v) => FilterConstraint::Equals(v),
            FilterValue::Values(vs) => FilterConstraint::In(vs),
        }
    }
}

impl QueryRequest {
    pub fn into_query(self) -> Result<UnifiedQuery, QueryError> {
        let mut builder = UnifiedQuery::builder(self.start_date, self.end_date)
            .dimensions(self.dimensions)
            .metrics(self.metrics)
            .offset(self.offset);
        if let Some(limit) = self.limit {
            builder = builder.limit(limit);
        }
        for (field, value) in self.filters {
            builder = builder.filter(field, value.into());
        }
        for order in self.order_by {
            builder = builder.order_by(order.field, order.direction);
        }
        for target in &self.targets {
            builder = builder.target(target.parse::<PlatformId>()?);
        }
        builder.build()
    }
}
