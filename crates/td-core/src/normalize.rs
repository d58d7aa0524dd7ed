//! # Result Normalizer
//!
//! Maps native rows back to canonical names and typed values using the same
//! descriptor translation used, projected onto the fields the query asked for.
//!
//! A row that cannot be normalized yields a `MalformedRow` error in place of
//! that row; the rest of the page is unaffected.

use crate::capability::{CapabilityDescriptor, Casing, FieldSpec};
use crate::error::QueryError;
use crate::native::{NativeRow, ResultPage};
use crate::platform::PlatformId;
use crate::query::UnifiedQuery;
use crate::value::{FieldType, Value};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One result row in canonical vocabulary, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRow {
    pub platform: PlatformId,
    #[serde(flatten)]
    pub values: BTreeMap<String, Value>,
}

impl NormalizedRow {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }
}

pub struct Normalizer {
    descriptor: Arc<CapabilityDescriptor>,
    projection: Vec<FieldSpec>,
}

impl Normalizer {
    /// Prepare a normalizer for one platform's share of `query`. Every output
    /// field must resolve on the descriptor.
    pub fn for_query(
        descriptor: Arc<CapabilityDescriptor>,
        query: &UnifiedQuery,
    ) -> Result<Self, QueryError> {
        let projection = query
            .output_fields()
            .map(|name| {
                descriptor
                    .resolve(name)
                    .cloned()
                    .ok_or_else(|| QueryError::UnsupportedField {
                        platform: Some(descriptor.platform()),
                        field: name.to_string(),
                        reason: "cannot be normalized from this platform".into(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            descriptor,
            projection,
        })
    }

    pub fn platform(&self) -> PlatformId {
        self.descriptor.platform()
    }

    /// Normalize every row of `page`, in upstream order.
    pub fn normalize(
        &self,
        page: ResultPage,
    ) -> impl Iterator<Item = Result<NormalizedRow, QueryError>> + '_ {
        page.rows.into_iter().map(move |row| self.normalize_row(&row))
    }

    pub fn normalize_row(&self, row: &NativeRow) -> Result<NormalizedRow, QueryError> {
        let platform = self.platform();
        let mut values = BTreeMap::new();

        for spec in &self.projection {
            let raw = row.get(&spec.native).ok_or_else(|| QueryError::MalformedRow {
                platform,
                field: spec.canonical.clone(),
                detail: format!("native field '{}' missing", spec.native),
            })?;
            let value = coerce(raw, spec, self.descriptor.native_date_format()).map_err(
                |detail| QueryError::MalformedRow {
                    platform,
                    field: spec.canonical.clone(),
                    detail,
                },
            )?;
            values.insert(spec.canonical.clone(), value);
        }

        Ok(NormalizedRow { platform, values })
    }
}

/// Coerce one raw native value to the declared canonical type.
pub fn coerce(raw: &Json, spec: &FieldSpec, date_format: &str) -> Result<Value, String> {
    match spec.field_type {
        FieldType::Integer => match raw {
            Json::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(Value::Integer)
                .ok_or_else(|| format!("{} is not an integer", n)),
            Json::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| format!("'{}' is not an integer", s)),
            other => Err(format!("expected integer, got {}", json_kind(other))),
        },
        FieldType::Float => {
            let parsed = match raw {
                Json::Number(n) => n.as_f64(),
                Json::String(s) => s.trim().parse::<f64>().ok(),
                other => return Err(format!("expected number, got {}", json_kind(other))),
            };
            match parsed {
                Some(f) if f.is_finite() => Ok(Value::Float(f)),
                _ => Err(format!("{} is not a finite number", raw)),
            }
        }
        FieldType::Date => match raw {
            Json::String(s) => NaiveDate::parse_from_str(s.trim(), date_format)
                .map(Value::Date)
                .map_err(|e| format!("'{}' does not match {}: {}", s, date_format, e)),
            other => Err(format!("expected date string, got {}", json_kind(other))),
        },
        FieldType::String => {
            let text = match raw {
                Json::String(s) => s.clone(),
                Json::Number(n) => n.to_string(),
                Json::Bool(b) => b.to_string(),
                other => return Err(format!("expected string, got {}", json_kind(other))),
            };
            Ok(Value::String(match spec.casing {
                Casing::Preserve => text,
                Casing::Lower => text.to_lowercase(),
            }))
        }
    }
}

fn json_kind(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}
