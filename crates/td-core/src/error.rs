//! # Error Taxonomy
//!
//! One error type for the whole query path. Validation errors are fatal to a
//! run, upstream and rate-limit errors are isolated per platform, and
//! malformed rows are recovered where they occur.

use crate::platform::PlatformId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Machine-readable error category, surfaced in result metadata and API
/// error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidQuery,
    UnsupportedField,
    InvalidRange,
    RateLimitExceeded,
    UpstreamUnavailable,
    UpstreamRejected,
    MalformedRow,
    NoEligiblePlatform,
    AllPlatformsFailed,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidQuery => "invalid_query",
            Self::UnsupportedField => "unsupported_field",
            Self::InvalidRange => "invalid_range",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::UpstreamRejected => "upstream_rejected",
            Self::MalformedRow => "malformed_row",
            Self::NoEligiblePlatform => "no_eligible_platform",
            Self::AllPlatformsFailed => "all_platforms_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One platform's terminal failure inside a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlatformFailure {
    pub platform: PlatformId,
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for PlatformFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.platform, self.kind, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    /// Structurally invalid query (empty metrics, empty in-list, ...).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("unsupported field '{field}'{}: {reason}", scope(.platform))]
    UnsupportedField {
        platform: Option<PlatformId>,
        field: String,
        reason: String,
    },

    #[error("invalid date range{}: {reason}", scope(.platform))]
    InvalidRange {
        platform: Option<PlatformId>,
        reason: String,
    },

    #[error("rate limit exceeded on {platform} after waiting {waited_ms} ms")]
    RateLimitExceeded { platform: PlatformId, waited_ms: u64 },

    #[error("{platform} unavailable after {attempts} attempts: {last_error}")]
    UpstreamUnavailable {
        platform: PlatformId,
        attempts: u32,
        last_error: String,
    },

    #[error("{platform} rejected the request: {reason}")]
    UpstreamRejected { platform: PlatformId, reason: String },

    #[error("malformed {platform} row, field '{field}': {detail}")]
    MalformedRow {
        platform: PlatformId,
        field: String,
        detail: String,
    },

    #[error("no single platform supports all requested fields {fields:?}")]
    NoEligiblePlatform { fields: Vec<String> },

    #[error("all targeted platforms failed: {}", join_failures(.failures))]
    AllPlatformsFailed { failures: Vec<PlatformFailure> },

    #[error("query cancelled")]
    Cancelled,
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidQuery(_) => ErrorKind::InvalidQuery,
            Self::UnsupportedField { .. } => ErrorKind::UnsupportedField,
            Self::InvalidRange { .. } => ErrorKind::InvalidRange,
            Self::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            Self::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            Self::UpstreamRejected { .. } => ErrorKind::UpstreamRejected,
            Self::MalformedRow { .. } => ErrorKind::MalformedRow,
            Self::NoEligiblePlatform { .. } => ErrorKind::NoEligiblePlatform,
            Self::AllPlatformsFailed { .. } => ErrorKind::AllPlatformsFailed,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// The platform this error is attributed to, where there is one.
    pub fn platform(&self) -> Option<PlatformId> {
        match self {
            Self::UnsupportedField { platform, .. } | Self::InvalidRange { platform, .. } => {
                *platform
            }
            Self::RateLimitExceeded { platform, .. }
            | Self::UpstreamUnavailable { platform, .. }
            | Self::UpstreamRejected { platform, .. }
            | Self::MalformedRow { platform, .. } => Some(*platform),
            _ => None,
        }
    }

    /// Errors that degrade a single platform instead of aborting the run.
    pub fn is_platform_local(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded { .. }
                | Self::UpstreamUnavailable { .. }
                | Self::UpstreamRejected { .. }
        )
    }

    pub fn to_failure(&self, platform: PlatformId) -> PlatformFailure {
        PlatformFailure {
            platform: self.platform().unwrap_or(platform),
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

fn scope(platform: &Option<PlatformId>) -> String {
    match platform {
        Some(p) => format!(" on {}", p),
        None => String::new(),
    }
}

fn join_failures(failures: &[PlatformFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_platform_and_cause() {
        let err = QueryError::UpstreamUnavailable {
            platform: PlatformId::Gsc,
            attempts: 3,
            last_error: "HTTP 503".into(),
        };
        assert_eq!(err.to_string(), "gsc unavailable after 3 attempts: HTTP 503");
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
        assert_eq!(err.platform(), Some(PlatformId::Gsc));
        assert!(err.is_platform_local());
    }

    #[test]
    fn test_unsupported_field_scope_is_optional() {
        let scoped = QueryError::UnsupportedField {
            platform: Some(PlatformId::Ga4),
            field: "clicks".into(),
            reason: "not in catalog".into(),
        };
        assert_eq!(scoped.to_string(), "unsupported field 'clicks' on ga4: not in catalog");

        let global = QueryError::UnsupportedField {
            platform: None,
            field: "revenue".into(),
            reason: "unknown to every platform".into(),
        };
        assert_eq!(
            global.to_string(),
            "unsupported field 'revenue': unknown to every platform"
        );
        assert!(!global.is_platform_local());
    }

    #[test]
    fn test_all_failed_lists_each_platform() {
        let err = QueryError::AllPlatformsFailed {
            failures: vec![
                PlatformFailure {
                    platform: PlatformId::Ga4,
                    kind: ErrorKind::UpstreamRejected,
                    message: "401".into(),
                },
                PlatformFailure {
                    platform: PlatformId::Gsc,
                    kind: ErrorKind::RateLimitExceeded,
                    message: "bucket empty".into(),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("ga4 (upstream_rejected): 401"));
        assert!(text.contains("gsc (rate_limit_exceeded): bucket empty"));
    }
}
