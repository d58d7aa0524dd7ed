//! # Report Presets
//!
//! Named tools, each a fixed [`UnifiedQuery`] shape run through the adapter.
//! Composite reports run their sections concurrently and record a failing
//! section in place rather than failing the whole report.

pub mod dashboards;

use crate::adapter::UnifiedQueryAdapter;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use td_core::{
    DateRange, ErrorKind, FilterConstraint, NormalizedRow, PlatformFailure, PlatformId,
    QueryError, SortDirection, UnifiedQuery, UnifiedResult,
};
use tokio_util::sync::CancellationToken;

// =============================================================================
// Tool catalog
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    GscSearchAnalytics,
    GscTopQueries,
    Ga4TrafficOverview,
    Ga4TopPages,
    Ga4AcquisitionReport,
    CombinedPerformanceReport,
    PageAnalysis,
}

impl Tool {
    pub const ALL: [Tool; 7] = [
        Tool::GscSearchAnalytics,
        Tool::GscTopQueries,
        Tool::Ga4TrafficOverview,
        Tool::Ga4TopPages,
        Tool::Ga4AcquisitionReport,
        Tool::CombinedPerformanceReport,
        Tool::PageAnalysis,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::GscSearchAnalytics => "gsc_search_analytics",
            Self::GscTopQueries => "gsc_top_queries",
            Self::Ga4TrafficOverview => "ga4_traffic_overview",
            Self::Ga4TopPages => "ga4_top_pages",
            Self::Ga4AcquisitionReport => "ga4_acquisition_report",
            Self::CombinedPerformanceReport => "combined_performance_report",
            Self::PageAnalysis => "page_analysis",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::GscSearchAnalytics => "Search Console clicks, impressions, CTR and position",
            Self::GscTopQueries => "Top search queries by clicks",
            Self::Ga4TrafficOverview => "GA4 headline traffic metrics as a single row",
            Self::Ga4TopPages => "Top pages by sessions, page views or users",
            Self::Ga4AcquisitionReport => "Sessions and users by source and medium",
            Self::CombinedPerformanceReport => "Search and analytics summary for a date range",
            Self::PageAnalysis => "One page's search queries and analytics",
        }
    }
}

impl FromStr for Tool {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| QueryError::InvalidQuery(format!("unknown tool '{}'", s)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: &'static str,
    pub description: &'static str,
}

pub fn catalog() -> Vec<ToolInfo> {
    Tool::ALL
        .iter()
        .map(|t| ToolInfo {
            name: t.name(),
            description: t.description(),
        })
        .collect()
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Debug, Deserialize)]
struct RangeArgs {
    start_date: NaiveDate,
    end_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct SearchAnalyticsArgs {
    start_date: NaiveDate,
    end_date: NaiveDate,
    #[serde(default)]
    dimensions: Vec<String>,
    #[serde(default = "default_row_limit")]
    row_limit: usize,
}

#[derive(Debug, Deserialize)]
struct LimitArgs {
    start_date: NaiveDate,
    end_date: NaiveDate,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct TopPagesArgs {
    start_date: NaiveDate,
    end_date: NaiveDate,
    #[serde(default = "default_top_pages_metric")]
    metric: String,
    #[serde(default = "default_top_pages_limit")]
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct PageArgs {
    page_path: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
}

fn default_row_limit() -> usize {
    1000
}
fn default_top_pages_metric() -> String {
    "page_views".into()
}
fn default_top_pages_limit() -> usize {
    20
}

fn parse_args<T: for<'de> Deserialize<'de>>(tool: Tool, args: serde_json::Value) -> Result<T, QueryError> {
    let args = if args.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args)
        .map_err(|e| QueryError::InvalidQuery(format!("{}: {}", tool.name(), e)))
}

// =============================================================================
// Output shapes
// =============================================================================

/// One section of a composite report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Section {
    Ok {
        rows: Vec<NormalizedRow>,
        total_rows: u64,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        degraded: Vec<PlatformFailure>,
    },
    Failed {
        kind: ErrorKind,
        error: String,
    },
}

impl Section {
    fn from_run(result: Result<UnifiedResult, QueryError>) -> Result<Self, QueryError> {
        match result {
            Ok(result) => Ok(Self::Ok {
                degraded: result.degraded().to_vec(),
                total_rows: result.total_rows,
                rows: result.rows,
            }),
            Err(QueryError::Cancelled) => Err(QueryError::Cancelled),
            Err(err) => {
                tracing::warn!("report section failed: {}", err);
                Ok(Self::Failed {
                    kind: err.kind(),
                    error: err.to_string(),
                })
            }
        }
    }

    pub fn rows(&self) -> &[NormalizedRow] {
        match self {
            Self::Ok { rows, .. } => rows,
            Self::Failed { .. } => &[],
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchSection {
    pub top_queries: Section,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsSection {
    pub overview: Section,
    pub top_pages: Section,
    pub top_sources: Section,
}

#[derive(Debug, Clone, Serialize)]
pub struct CombinedReport {
    pub date_range: DateRange,
    pub search_console: SearchSection,
    pub google_analytics: AnalyticsSection,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageAnalysis {
    pub page_path: String,
    /// The Search Console page URL the path resolved to, when a site URL is
    /// configured.
    pub page_url: Option<String>,
    pub date_range: DateRange,
    pub search_console: Section,
    pub google_analytics: Section,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Query(UnifiedResult),
    Combined(CombinedReport),
    Page(PageAnalysis),
}

// =============================================================================
// Runner
// =============================================================================

const SEARCH_METRICS: [&str; 4] = ["clicks", "impressions", "ctr", "position"];
const OVERVIEW_METRICS: [&str; 7] = [
    "sessions",
    "users",
    "new_users",
    "page_views",
    "bounce_rate",
    "avg_session_duration",
    "sessions_per_user",
];
const TOP_PAGES_METRICS: [&str; 3] = ["sessions", "page_views", "users"];

pub struct ReportRunner {
    adapter: Arc<UnifiedQueryAdapter>,
    site_url: Option<String>,
}

impl ReportRunner {
    pub fn new(adapter: Arc<UnifiedQueryAdapter>, site_url: Option<String>) -> Self {
        Self { adapter, site_url }
    }

    pub async fn call(
        &self,
        tool: Tool,
        args: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<ToolOutput, QueryError> {
        let output = match tool {
            Tool::GscSearchAnalytics => {
                let a: SearchAnalyticsArgs = parse_args(tool, args)?;
                let q = self.search_analytics(a.start_date, a.end_date, &a.dimensions, a.row_limit)?;
                ToolOutput::Query(self.adapter.run(&q, cancel).await?)
            }
            Tool::GscTopQueries => {
                let a: LimitArgs = parse_args(tool, args)?;
                let q = top_queries(a.start_date, a.end_date, a.limit.unwrap_or(50))?;
                ToolOutput::Query(self.adapter.run(&q, cancel).await?)
            }
            Tool::Ga4TrafficOverview => {
                let a: RangeArgs = parse_args(tool, args)?;
                let q = traffic_overview(a.start_date, a.end_date)?;
                ToolOutput::Query(self.adapter.run(&q, cancel).await?)
            }
            Tool::Ga4TopPages => {
                let a: TopPagesArgs = parse_args(tool, args)?;
                let q = self.top_pages(a.start_date, a.end_date, &a.metric, a.limit)?;
                ToolOutput::Query(self.adapter.run(&q, cancel).await?)
            }
            Tool::Ga4AcquisitionReport => {
                let a: LimitArgs = parse_args(tool, args)?;
                let q = acquisition(a.start_date, a.end_date, a.limit.unwrap_or(25))?;
                ToolOutput::Query(self.adapter.run(&q, cancel).await?)
            }
            Tool::CombinedPerformanceReport => {
                let a: RangeArgs = parse_args(tool, args)?;
                ToolOutput::Combined(self.combined(a.start_date, a.end_date, cancel).await?)
            }
            Tool::PageAnalysis => {
                let a: PageArgs = parse_args(tool, args)?;
                ToolOutput::Page(
                    self.page_analysis(&a.page_path, a.start_date, a.end_date, cancel)
                        .await?,
                )
            }
        };
        Ok(output)
    }

    /// Top queries, analytics overview, top pages and top sources, run
    /// concurrently.
    pub async fn combined(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        cancel: CancellationToken,
    ) -> Result<CombinedReport, QueryError> {
        let queries = top_queries(start, end, 10)?;
        let overview = traffic_overview(start, end)?;
        let pages = self.top_pages(start, end, "page_views", 5)?;
        let sources = acquisition(start, end, 5)?;

        let (queries, overview, pages, sources) = tokio::join!(
            self.adapter.run(&queries, cancel.clone()),
            self.adapter.run(&overview, cancel.clone()),
            self.adapter.run(&pages, cancel.clone()),
            self.adapter.run(&sources, cancel.clone()),
        );

        Ok(CombinedReport {
            date_range: DateRange::new(start, end),
            search_console: SearchSection {
                top_queries: Section::from_run(queries)?,
            },
            google_analytics: AnalyticsSection {
                overview: Section::from_run(overview)?,
                top_pages: Section::from_run(pages)?,
                top_sources: Section::from_run(sources)?,
            },
        })
    }

    pub async fn page_analysis(
        &self,
        page_path: &str,
        start: NaiveDate,
        end: NaiveDate,
        cancel: CancellationToken,
    ) -> Result<PageAnalysis, QueryError> {
        let page_path = page_path.trim();
        if page_path.is_empty() {
            return Err(QueryError::InvalidQuery("page_path is empty".into()));
        }
        let page_url = self.site_url.as_deref().and_then(|site| page_url(site, page_path));

        let analytics_query = UnifiedQuery::builder(start, end)
            .dimension("page_path")
            .metrics(["page_views", "sessions", "users", "bounce_rate", "avg_session_duration"])
            .filter("page_path", FilterConstraint::Equals(page_path.to_string()))
            .target(PlatformId::Ga4)
            .limit(1)
            .build()?;

        let search = async {
            let Some(url) = &page_url else {
                return Err(QueryError::InvalidQuery(
                    "no Search Console site URL configured".into(),
                ));
            };
            let q = UnifiedQuery::builder(start, end)
                .dimension("query")
                .metrics(SEARCH_METRICS)
                .filter("page", FilterConstraint::Equals(url.clone()))
                .order_by("clicks", SortDirection::Descending)
                .target(PlatformId::Gsc)
                .limit(10)
                .build()?;
            self.adapter.run(&q, cancel.clone()).await
        };

        let (search, analytics) =
            tokio::join!(search, self.adapter.run(&analytics_query, cancel.clone()));

        Ok(PageAnalysis {
            page_path: page_path.to_string(),
            page_url,
            date_range: DateRange::new(start, end),
            search_console: Section::from_run(search)?,
            google_analytics: Section::from_run(analytics)?,
        })
    }

    fn search_analytics(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        dimensions: &[String],
        row_limit: usize,
    ) -> Result<UnifiedQuery, QueryError> {
        let dimensions = dimensions
            .iter()
            .map(|d| self.canonical(PlatformId::Gsc, d))
            .collect::<Vec<_>>();
        UnifiedQuery::builder(start, end)
            .dimensions(dimensions)
            .metrics(SEARCH_METRICS)
            .target(PlatformId::Gsc)
            .limit(row_limit)
            .build()
    }

    fn top_pages(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        metric: &str,
        limit: usize,
    ) -> Result<UnifiedQuery, QueryError> {
        let metric = self.canonical(PlatformId::Ga4, metric);
        if !TOP_PAGES_METRICS.contains(&metric.as_str()) {
            return Err(QueryError::InvalidQuery(format!(
                "ga4_top_pages metric must be one of {:?}, got '{}'",
                TOP_PAGES_METRICS, metric
            )));
        }
        UnifiedQuery::builder(start, end)
            .dimensions(["page_path", "page_title"])
            .metric(metric.clone())
            .metrics(["sessions", "users", "bounce_rate"])
            .order_by(metric, SortDirection::Descending)
            .target(PlatformId::Ga4)
            .limit(limit)
            .build()
    }

    /// Accept a native field name where a canonical one is expected.
    fn canonical(&self, platform: PlatformId, name: &str) -> String {
        match self.adapter.descriptor(platform) {
            Some(d) if !d.supports(name) => d.canonical_for(name).unwrap_or(name).to_string(),
            _ => name.to_string(),
        }
    }
}

fn top_queries(start: NaiveDate, end: NaiveDate, limit: usize) -> Result<UnifiedQuery, QueryError> {
    UnifiedQuery::builder(start, end)
        .dimension("query")
        .metrics(SEARCH_METRICS)
        .order_by("clicks", SortDirection::Descending)
        .target(PlatformId::Gsc)
        .limit(limit)
        .build()
}

fn traffic_overview(start: NaiveDate, end: NaiveDate) -> Result<UnifiedQuery, QueryError> {
    UnifiedQuery::builder(start, end)
        .metrics(OVERVIEW_METRICS)
        .target(PlatformId::Ga4)
        .limit(1)
        .build()
}

fn acquisition(start: NaiveDate, end: NaiveDate, limit: usize) -> Result<UnifiedQuery, QueryError> {
    UnifiedQuery::builder(start, end)
        .dimensions(["source", "medium"])
        .metrics(["sessions", "users", "new_users", "bounce_rate", "avg_session_duration"])
        .order_by("sessions", SortDirection::Descending)
        .target(PlatformId::Ga4)
        .limit(limit)
        .build()
}

/// Search Console reports pages as absolute URLs. Join a path onto the
/// property's site URL; domain properties (`sc-domain:`) resolve to https.
pub fn page_url(site_url: &str, page_path: &str) -> Option<String> {
    if page_path.starts_with("http://") || page_path.starts_with("https://") {
        return Some(page_path.to_string());
    }
    let base = match site_url.strip_prefix("sc-domain:") {
        Some(domain) if !domain.is_empty() => format!("https://{}", domain),
        Some(_) => return None,
        None => site_url.to_string(),
    };
    Some(format!(
        "{}/{}",
        base.trim_end_matches('/'),
        page_path.trim_start_matches('/')
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::tests::{adapter, day, native, transports};
    use serde_json::json;
    use std::collections::BTreeMap;
    use td_core::{ResultPage, Value};
    use td_io::TransportError;

    fn single_row(section: &Section) -> Option<&BTreeMap<String, Value>> {
        section.rows().first().map(|row| &row.values)
    }

    fn runner(adapter: UnifiedQueryAdapter) -> ReportRunner {
        ReportRunner::new(Arc::new(adapter), Some("https://example.com/".into()))
    }

    #[test]
    fn test_tool_names_round_trip() {
        for tool in Tool::ALL {
            assert_eq!(tool.name().parse::<Tool>().unwrap(), tool);
        }
        assert!("ga4_revenue".parse::<Tool>().is_err());
        assert_eq!(catalog().len(), 7);
    }

    #[test]
    fn test_page_url_join() {
        assert_eq!(
            page_url("https://example.com/", "/blog/post").as_deref(),
            Some("https://example.com/blog/post")
        );
        assert_eq!(
            page_url("sc-domain:example.com", "pricing").as_deref(),
            Some("https://example.com/pricing")
        );
        assert_eq!(
            page_url("https://example.com", "https://other.org/x").as_deref(),
            Some("https://other.org/x")
        );
        assert_eq!(page_url("sc-domain:", "/"), None);
    }

    #[test]
    fn test_top_pages_metric_validation_and_aliases() {
        let (ga4, gsc) = transports();
        let r = runner(adapter(&ga4, &gsc));

        let q = r.top_pages(day(1), day(2), "screenPageViews", 20).unwrap();
        assert_eq!(q.metrics()[0], "page_views");
        assert_eq!(q.order_by()[0].field, "page_views");
        assert_eq!(q.metrics(), ["page_views", "sessions", "users", "bounce_rate"]);

        let q = r.top_pages(day(1), day(2), "sessions", 20).unwrap();
        assert_eq!(q.metrics(), ["sessions", "users", "bounce_rate"]);

        assert!(r.top_pages(day(1), day(2), "bounce_rate", 20).is_err());
    }

    #[test]
    fn test_search_analytics_accepts_native_dimension_names() {
        let (ga4, gsc) = transports();
        let r = runner(adapter(&ga4, &gsc));
        let q = r
            .search_analytics(day(1), day(2), &["searchAppearance".into(), "query".into()], 100)
            .unwrap();
        assert_eq!(q.dimensions(), ["search_appearance", "query"]);
        assert_eq!(q.limit(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_call_with_defaults() {
        let (ga4, gsc) = transports();
        gsc.push_page(ResultPage::new(
            vec![native(&[
                ("query", json!("rust")),
                ("clicks", json!(3)),
                ("impressions", json!(30)),
                ("ctr", json!(0.1)),
                ("position", json!(4.0)),
            ])],
            None,
        ));
        let today = chrono::Utc::now().date_naive();
        let r = runner(adapter(&ga4, &gsc));
        let out = r
            .call(
                Tool::GscTopQueries,
                json!({"start_date": today - chrono::Days::new(7), "end_date": today}),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        let ToolOutput::Query(result) = out else {
            panic!("expected a query result");
        };
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].get("clicks"), Some(&Value::Integer(3)));
        // Client-side ordering fetches full pages.
        assert_eq!(gsc.cursors()[0].page_size, 25_000);
        assert_eq!(ga4.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_arguments_are_invalid_query() {
        let (ga4, gsc) = transports();
        let r = runner(adapter(&ga4, &gsc));
        let err = r
            .call(Tool::PageAnalysis, json!({"start_date": "2024-06-01"}), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);
        assert_eq!(ga4.calls() + gsc.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_combined_report_isolates_failing_sections() {
        let (ga4, gsc) = transports();
        gsc.push_error(TransportError::Status {
            status: 403,
            body: "User does not have sufficient permission".into(),
        });
        let today = chrono::Utc::now().date_naive();
        let r = runner(adapter(&ga4, &gsc));

        let report = r
            .combined(today, today, CancellationToken::new())
            .await
            .unwrap();
        match &report.search_console.top_queries {
            Section::Failed { kind, .. } => assert_eq!(*kind, ErrorKind::AllPlatformsFailed),
            other => panic!("expected failed section, got {:?}", other),
        }
        // Exhausted scripts answer with empty pages.
        assert!(report.google_analytics.overview.is_ok());
        assert!(report.google_analytics.top_pages.is_ok());
        assert!(single_row(&report.google_analytics.overview).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_analysis_filters_both_platforms() {
        let (ga4, gsc) = transports();
        ga4.push_page(ResultPage::new(
            vec![native(&[
                ("pagePath", json!("/pricing")),
                ("screenPageViews", json!("80")),
                ("sessions", json!("60")),
                ("totalUsers", json!("50")),
                ("bounceRate", json!("0.3")),
                ("averageSessionDuration", json!("41.5")),
            ])],
            None,
        ));
        let today = chrono::Utc::now().date_naive();
        let r = runner(adapter(&ga4, &gsc));

        let report = r
            .page_analysis("/pricing", today, today, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.page_url.as_deref(), Some("https://example.com/pricing"));
        assert!(report.search_console.is_ok());
        let row = single_row(&report.google_analytics).unwrap();
        assert_eq!(row.get("page_views"), Some(&Value::Integer(80)));
        assert_eq!(gsc.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_analysis_without_site_url() {
        let (ga4, gsc) = transports();
        let r = ReportRunner::new(Arc::new(adapter(&ga4, &gsc)), None);
        let today = chrono::Utc::now().date_naive();
        let report = r
            .page_analysis("/", today, today, CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            report.search_console,
            Section::Failed {
                kind: ErrorKind::InvalidQuery,
                ..
            }
        ));
        assert_eq!(gsc.calls(), 0);
    }
}
