//! Fixed-period dashboards: the combined report over a window ending today.

use super::{CombinedReport, ReportRunner};
use chrono::{Days, NaiveDate, Utc};
use serde::Serialize;
use std::str::FromStr;
use td_core::QueryError;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Today,
    Yesterday,
    Week,
    Month,
}

impl Period {
    pub const ALL: [Period; 4] = [Period::Today, Period::Yesterday, Period::Week, Period::Month];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Yesterday => "yesterday",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    /// Inclusive date window for this period relative to `today`.
    pub fn range(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let back = |days| today.checked_sub_days(Days::new(days)).unwrap_or(today);
        match self {
            Self::Today => (today, today),
            Self::Yesterday => (back(1), back(1)),
            Self::Week => (back(7), today),
            Self::Month => (back(30), today),
        }
    }
}

impl FromStr for Period {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| QueryError::InvalidQuery(format!("unknown dashboard period '{}'", s)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub period: Period,
    #[serde(flatten)]
    pub report: CombinedReport,
}

impl ReportRunner {
    pub async fn dashboard(
        &self,
        period: Period,
        cancel: CancellationToken,
    ) -> Result<Dashboard, QueryError> {
        let (start, end) = period.range(Utc::now().date_naive());
        tracing::info!("dashboard {} for {}..{}", period.as_str(), start, end);
        let report = self.combined(start, end, cancel).await?;
        let ga = &report.google_analytics;
        let failed = [
            &report.search_console.top_queries,
            &ga.overview,
            &ga.top_pages,
            &ga.top_sources,
        ]
        .iter()
        .filter(|s| !s.is_ok())
        .count();
        if failed > 0 {
            tracing::warn!("dashboard {}: {} of 4 sections failed", period.as_str(), failed);
        }
        tracing::info!(
            "dashboard {} ready: {} top queries",
            period.as_str(),
            report.search_console.top_queries.rows().len()
        );
        Ok(Dashboard { period, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_ranges() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let d = |m, day| NaiveDate::from_ymd_opt(2024, m, day).unwrap();

        assert_eq!(Period::Today.range(today), (today, today));
        assert_eq!(Period::Yesterday.range(today), (d(3, 4), d(3, 4)));
        assert_eq!(Period::Week.range(today), (d(2, 27), today));
        assert_eq!(Period::Month.range(today), (d(2, 4), today));
    }

    #[test]
    fn test_period_parse() {
        assert_eq!("week".parse::<Period>().unwrap(), Period::Week);
        assert!("quarter".parse::<Period>().is_err());
    }
}
