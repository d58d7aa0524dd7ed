//! # Unified Result
//!
//! The merged answer to one query, with enough metadata for a caller to
//! tell a complete answer from a degraded one.

use crate::error::{ErrorKind, PlatformFailure};
use crate::normalize::NormalizedRow;
use crate::platform::PlatformId;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResultStatus {
    Complete,
    /// At least one targeted platform failed; rows from the rest are present.
    Partial { degraded: Vec<PlatformFailure> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlatformOutcome {
    Succeeded,
    Failed { kind: ErrorKind, message: String },
}

/// Per-platform accounting for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlatformReport {
    pub platform: PlatformId,
    #[serde(flatten)]
    pub outcome: PlatformOutcome,
    /// Native rows received from upstream.
    pub rows_fetched: u64,
    /// Normalized rows that survived the final limit/offset window.
    pub rows_returned: u64,
    pub pages_fetched: u32,
    pub malformed_rows: u64,
    /// Fetching stopped early because the row budget was met.
    pub truncated: bool,
}

impl PlatformReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, PlatformOutcome::Succeeded)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedResult {
    pub rows: Vec<NormalizedRow>,
    pub status: ResultStatus,
    /// Rows available after merge, before offset/limit.
    pub total_rows: u64,
    /// More rows existed than were returned.
    pub truncated: bool,
    pub platforms: Vec<PlatformReport>,
    pub query_time_ms: u64,
}

impl UnifiedResult {
    pub fn is_complete(&self) -> bool {
        matches!(self.status, ResultStatus::Complete)
    }

    pub fn report(&self, platform: PlatformId) -> Option<&PlatformReport> {
        self.platforms.iter().find(|r| r.platform == platform)
    }

    pub fn degraded(&self) -> &[PlatformFailure] {
        match &self.status {
            ResultStatus::Complete => &[],
            ResultStatus::Partial { degraded } => degraded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_value(ResultStatus::Complete).unwrap(),
            json!({"state": "complete"})
        );
        let partial = ResultStatus::Partial {
            degraded: vec![PlatformFailure {
                platform: PlatformId::Gsc,
                kind: ErrorKind::UpstreamUnavailable,
                message: "HTTP 503".into(),
            }],
        };
        assert_eq!(
            serde_json::to_value(partial).unwrap(),
            json!({"state": "partial", "degraded": [
                {"platform": "gsc", "kind": "upstream_unavailable", "message": "HTTP 503"}
            ]})
        );
    }

    #[test]
    fn test_report_lookup_and_degraded() {
        let result = UnifiedResult {
            rows: Vec::new(),
            status: ResultStatus::Partial {
                degraded: vec![PlatformFailure {
                    platform: PlatformId::Ga4,
                    kind: ErrorKind::UpstreamRejected,
                    message: "403".into(),
                }],
            },
            total_rows: 0,
            truncated: false,
            platforms: vec![PlatformReport {
                platform: PlatformId::Ga4,
                outcome: PlatformOutcome::Failed {
                    kind: ErrorKind::UpstreamRejected,
                    message: "403".into(),
                },
                rows_fetched: 0,
                rows_returned: 0,
                pages_fetched: 1,
                malformed_rows: 0,
                truncated: false,
            }],
            query_time_ms: 4,
        };
        assert!(!result.is_complete());
        assert_eq!(result.degraded().len(), 1);
        assert!(!result.report(PlatformId::Ga4).unwrap().succeeded());
        assert!(result.report(PlatformId::Gsc).is_none());
    }
}
