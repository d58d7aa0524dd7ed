//! # Query Translator
//!
//! Pure translation of a [`UnifiedQuery`] into one platform's
//! [`NativeRequest`], validated against that platform's descriptor.
//!
//! Translation reads no clock: the reference date for lookback checks is
//! passed in, so the same query, descriptor and `as_of` always produce an
//! equal request.

use crate::capability::{CapabilityDescriptor, FieldSpec};
use crate::error::QueryError;
use crate::native::*;
use crate::platform::PlatformId;
use crate::query::{DateRange, FilterConstraint, SortDirection, UnifiedQuery};
use chrono::{Days, NaiveDate};

#[derive(Clone, Copy, PartialEq)]
enum Usage {
    Dimension,
    Metric,
    Filter,
    Ordering,
}

/// Translate `query` for the platform described by `descriptor`.
pub fn translate(
    query: &UnifiedQuery,
    descriptor: &CapabilityDescriptor,
    as_of: NaiveDate,
) -> Result<NativeRequest, QueryError> {
    let platform = descriptor.platform();

    let dimensions = query
        .dimensions()
        .iter()
        .map(|name| resolve(descriptor, name, Usage::Dimension))
        .collect::<Result<Vec<_>, _>>()?;
    let metrics = query
        .metrics()
        .iter()
        .map(|name| resolve(descriptor, name, Usage::Metric))
        .collect::<Result<Vec<_>, _>>()?;
    let filters = query
        .filters()
        .iter()
        .map(|(name, constraint)| {
            let spec = resolve(descriptor, name, Usage::Filter)?;
            native_filter(descriptor, spec, constraint)
        })
        .collect::<Result<Vec<_>, _>>()?;
    let ordering = query
        .order_by()
        .iter()
        .map(|order| {
            resolve(descriptor, &order.field, Usage::Ordering)
                .map(|spec| (spec, order.direction == SortDirection::Descending))
        })
        .collect::<Result<Vec<_>, _>>()?;

    check_range(query.date_range(), descriptor, as_of)?;

    let row_budget = if query.order_by().is_empty() || descriptor.native_ordering() {
        Some(query.offset().saturating_add(query.limit()) as u64)
    } else {
        None
    };
    let page_size = match row_budget {
        Some(budget) => budget.clamp(1, descriptor.max_page_size() as u64) as u32,
        None => descriptor.max_page_size(),
    };

    let range = query.date_range();
    let start_date = range.start.format("%Y-%m-%d").to_string();
    let end_date = range.end.format("%Y-%m-%d").to_string();

    let body = match platform {
        PlatformId::Ga4 => NativeBody::Ga4(Ga4ReportRequest {
            date_ranges: vec![Ga4DateRange {
                start_date,
                end_date,
            }],
            dimensions: dimensions
                .iter()
                .map(|spec| Ga4Name {
                    name: spec.native.clone(),
                })
                .collect(),
            metrics: metrics
                .iter()
                .map(|spec| Ga4Name {
                    name: spec.native.clone(),
                })
                .collect(),
            dimension_filter: ga4_filter(filters),
            order_bys: if descriptor.native_ordering() {
                ordering
                    .iter()
                    .map(|(spec, desc)| ga4_order(query, spec, *desc))
                    .collect()
            } else {
                Vec::new()
            },
            limit: page_size as u64,
            offset: 0,
        }),
        PlatformId::Gsc => NativeBody::Gsc(GscQueryRequest {
            start_date,
            end_date,
            dimensions: dimensions.iter().map(|spec| spec.native.clone()).collect(),
            dimension_filter_groups: gsc_filter_groups(filters),
            row_limit: page_size,
            start_row: 0,
        }),
    };

    Ok(NativeRequest {
        platform,
        body,
        page_size,
        row_budget,
    })
}

fn resolve<'d>(
    descriptor: &'d CapabilityDescriptor,
    name: &str,
    usage: Usage,
) -> Result<&'d FieldSpec, QueryError> {
    let unsupported = |reason: String| QueryError::UnsupportedField {
        platform: Some(descriptor.platform()),
        field: name.to_string(),
        reason,
    };

    let spec = descriptor.resolve(name).ok_or_else(|| {
        unsupported(format!(
            "not in the {} catalog",
            descriptor.platform().display_name()
        ))
    })?;

    match usage {
        Usage::Dimension | Usage::Filter if !spec.role.allows_dimension() => {
            Err(unsupported("is a metric and cannot be used as a dimension".into()))
        }
        Usage::Metric if !spec.role.allows_metric() => {
            Err(unsupported("is a dimension and cannot be used as a metric".into()))
        }
        _ => Ok(spec),
    }
}

enum NativeFilter {
    Equals { native: String, value: String },
    InList { native: String, values: Vec<String> },
}

fn native_filter(
    descriptor: &CapabilityDescriptor,
    spec: &FieldSpec,
    constraint: &FilterConstraint,
) -> Result<NativeFilter, QueryError> {
    let support = descriptor.filter_support();
    let unsupported = |shape: &str| QueryError::UnsupportedField {
        platform: Some(descriptor.platform()),
        field: spec.canonical.clone(),
        reason: format!("no native support for {} filters", shape),
    };

    match constraint {
        FilterConstraint::Equals(value) if support.equality => Ok(NativeFilter::Equals {
            native: spec.native.clone(),
            value: value.clone(),
        }),
        FilterConstraint::Equals(_) => Err(unsupported("equality")),
        FilterConstraint::In(values) if support.in_list => Ok(NativeFilter::InList {
            native: spec.native.clone(),
            values: values.clone(),
        }),
        // A one-element inclusion is an equality.
        FilterConstraint::In(values) if values.len() == 1 && support.equality => {
            Ok(NativeFilter::Equals {
                native: spec.native.clone(),
                value: values[0].clone(),
            })
        }
        FilterConstraint::In(_) => Err(unsupported("inclusion")),
    }
}

fn check_range(
    range: DateRange,
    descriptor: &CapabilityDescriptor,
    as_of: NaiveDate,
) -> Result<(), QueryError> {
    if !range.is_ordered() {
        return Err(QueryError::InvalidRange {
            platform: Some(descriptor.platform()),
            reason: format!("start {} is after end {}", range.start, range.end),
        });
    }

    let lookback = descriptor.max_lookback_days();
    // A window reaching past the calendar's start has no lower bound.
    let Some(earliest) = as_of.checked_sub_days(Days::new(lookback as u64)) else {
        return Ok(());
    };
    if range.start < earliest {
        return Err(QueryError::InvalidRange {
            platform: Some(descriptor.platform()),
            reason: format!(
                "start {} is beyond the {}-day lookback window (earliest {})",
                range.start, lookback, earliest
            ),
        });
    }
    Ok(())
}

fn ga4_filter(filters: Vec<NativeFilter>) -> Option<Ga4FilterExpression> {
    let mut expressions: Vec<Ga4FilterExpression> = filters
        .into_iter()
        .map(|filter| {
            let (field_name, kind) = match filter {
                NativeFilter::Equals { native, value } => (
                    native,
                    Ga4FilterKind::StringFilter(Ga4StringFilter {
                        match_type: Ga4MatchType::Exact,
                        value,
                    }),
                ),
                NativeFilter::InList { native, values } => {
                    (native, Ga4FilterKind::InListFilter(Ga4InListFilter { values }))
                }
            };
            Ga4FilterExpression::Filter(Ga4Filter { field_name, kind })
        })
        .collect();

    match expressions.len() {
        0 => None,
        1 => expressions.pop(),
        _ => Some(Ga4FilterExpression::AndGroup(Ga4FilterExpressionList {
            expressions,
        })),
    }
}

fn ga4_order(query: &UnifiedQuery, spec: &FieldSpec, desc: bool) -> Ga4OrderBy {
    let is_metric = query.metrics().contains(&spec.canonical);
    let target = if is_metric {
        Ga4OrderTarget::Metric(Ga4MetricOrder {
            metric_name: spec.native.clone(),
        })
    } else {
        Ga4OrderTarget::Dimension(Ga4DimensionOrder {
            dimension_name: spec.native.clone(),
        })
    };
    Ga4OrderBy { target, desc }
}

fn gsc_filter_groups(filters: Vec<NativeFilter>) -> Vec<GscFilterGroup> {
    let filters: Vec<GscFilter> = filters
        .into_iter()
        .filter_map(|filter| match filter {
            NativeFilter::Equals { native, value } => Some(GscFilter {
                dimension: native,
                operator: GscOperator::Equals,
                expression: value,
            }),
            // Unreachable: gsc declares no in-list support, so
            // native_filter never yields InList for it.
            NativeFilter::InList { .. } => None,
        })
        .collect();

    if filters.is_empty() {
        Vec::new()
    } else {
        vec![GscFilterGroup {
            group_type: GscGroupType::And,
            filters,
        }]
    }
}
