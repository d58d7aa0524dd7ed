//! Upstream platform identifiers.

use crate::error::QueryError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One upstream measurement service.
///
/// The derived `Ord` (`Ga4 < Gsc`) is the tie-breaker used when merged rows
/// compare equal under a query's ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PlatformId {
    /// Page/event analytics (GA4 Data API).
    #[serde(rename = "ga4")]
    Ga4,
    /// Search visibility (Search Console Search Analytics API).
    #[serde(rename = "gsc")]
    Gsc,
}

impl PlatformId {
    pub const ALL: [PlatformId; 2] = [PlatformId::Ga4, PlatformId::Gsc];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ga4 => "ga4",
            Self::Gsc => "gsc",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Ga4 => "Google Analytics 4",
            Self::Gsc => "Google Search Console",
        }
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformId {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ga4" | "analytics" => Ok(Self::Ga4),
            "gsc" | "search_console" | "searchconsole" => Ok(Self::Gsc),
            other => Err(QueryError::InvalidQuery(format!(
                "unknown platform '{}' (expected ga4 or gsc)",
                other
            ))),
        }
    }
}
