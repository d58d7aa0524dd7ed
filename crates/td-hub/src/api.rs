//! # API Handlers
//!
//! Axum handlers over the query adapter and report presets. Each request
//! owns a cancellation token whose drop guard lives in the handler future,
//! so a caller that disconnects cancels its in-flight run.

use crate::adapter::QueryRequest;
use crate::reports::dashboards::{Dashboard, Period};
use crate::reports::{catalog, Tool, ToolInfo, ToolOutput};
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use td_core::{CapabilitySummary, ErrorKind, PlatformId, QueryError, UnifiedResult};
use tokio_util::sync::CancellationToken;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    error: String,
    kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    platform: Option<PlatformId>,
}

impl ApiError {
    fn not_found(err: QueryError) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            ..Self::from(err)
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::from(QueryError::InvalidQuery(rejection.body_text()))
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        let status = match err.kind() {
            ErrorKind::InvalidQuery
            | ErrorKind::UnsupportedField
            | ErrorKind::InvalidRange
            | ErrorKind::NoEligiblePlatform => StatusCode::BAD_REQUEST,
            ErrorKind::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            tracing::warn!("request failed: {}", err);
        }
        Self {
            status,
            error: err.to_string(),
            kind: err.kind(),
            platform: err.platform(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

// =============================================================================
// Status & capabilities
// =============================================================================

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub platforms: Vec<PlatformId>,
    pub uptime_secs: u64,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        platforms: state.adapter.platforms(),
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

pub async fn capabilities(State(state): State<Arc<AppState>>) -> Json<Vec<CapabilitySummary>> {
    Json(state.adapter.list_capabilities())
}

// =============================================================================
// Query
// =============================================================================

pub async fn run_query(
    State(state): State<Arc<AppState>>,
    req: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<UnifiedResult>, ApiError> {
    let Json(req) = req?;
    let query = req.into_query()?;
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let result = state.adapter.run(&query, cancel).await?;
    Ok(Json(result))
}

// =============================================================================
// Tools & dashboards
// =============================================================================

pub async fn list_tools() -> Json<Vec<ToolInfo>> {
    Json(catalog())
}

pub async fn call_tool(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    args: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<ToolOutput>, ApiError> {
    let tool: Tool = name.parse().map_err(ApiError::not_found)?;
    // A bodiless call runs the tool with its defaults.
    let args = match args {
        Ok(Json(v)) => v,
        Err(JsonRejection::MissingJsonContentType(_)) => serde_json::Value::Null,
        Err(rejection) => return Err(rejection.into()),
    };
    tracing::info!("tool {}", tool.name());

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let output = state.reports.call(tool, args, cancel).await?;
    Ok(Json(output))
}

pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    Path(period): Path<String>,
) -> Result<Json<Dashboard>, ApiError> {
    let period: Period = period.parse().map_err(ApiError::not_found)?;

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let dashboard = state.reports.dashboard(period, cancel).await?;
    Ok(Json(dashboard))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::tests::{adapter, transports};
    use crate::reports::ReportRunner;
    use serde_json::json;
    use std::time::Instant;
    use td_io::TransportError;

    fn state() -> (Arc<AppState>, Arc<td_io::scripted::ScriptedTransport>) {
        let (ga4, gsc) = transports();
        let adapter = Arc::new(adapter(&ga4, &gsc));
        let state = AppState {
            reports: ReportRunner::new(adapter.clone(), Some("https://example.com/".into())),
            adapter,
            started: Instant::now(),
        };
        (Arc::new(state), gsc)
    }

    fn request(body: serde_json::Value) -> Result<Json<QueryRequest>, JsonRejection> {
        Ok(Json(serde_json::from_value(body).unwrap()))
    }

    #[test]
    fn test_error_status_mapping() {
        let e = ApiError::from(QueryError::InvalidQuery("x".into()));
        assert_eq!(e.status, StatusCode::BAD_REQUEST);
        let e = ApiError::from(QueryError::AllPlatformsFailed { failures: vec![] });
        assert_eq!(e.status, StatusCode::BAD_GATEWAY);
        let e = ApiError::from(QueryError::Cancelled);
        assert_eq!(e.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_error_body_shape() {
        let e = ApiError::from(QueryError::UnsupportedField {
            platform: Some(PlatformId::Gsc),
            field: "revenue".into(),
            reason: "not in the catalog".into(),
        });
        let body = serde_json::to_value(&e).unwrap();
        assert_eq!(body["kind"], "unsupported_field");
        assert_eq!(body["platform"], "gsc");
        assert!(body["error"].as_str().unwrap().contains("revenue"));
        assert!(body.get("status").is_none());
    }

    #[tokio::test]
    async fn test_status_lists_platforms() {
        let (state, _) = state();
        let Json(status) = super::status(State(state)).await;
        assert_eq!(status.platforms, vec![PlatformId::Ga4, PlatformId::Gsc]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_validation_is_bad_request() {
        let (state, gsc) = state();
        let today = chrono::Utc::now().date_naive();
        let err = run_query(
            State(state),
            request(json!({
                "start_date": today,
                "end_date": today,
                "metrics": ["revenue"]
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.kind, ErrorKind::UnsupportedField);
        assert_eq!(gsc.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_all_failed_is_bad_gateway() {
        let (state, gsc) = state();
        gsc.push_error(TransportError::Status {
            status: 400,
            body: "bad request".into(),
        });
        let today = chrono::Utc::now().date_naive();
        let err = run_query(
            State(state),
            request(json!({
                "start_date": today,
                "end_date": today,
                "metrics": ["clicks"]
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert_eq!(err.kind, ErrorKind::AllPlatformsFailed);
    }

    #[tokio::test]
    async fn test_malformed_body_is_structured_bad_request() {
        let (state, gsc) = state();
        let rejection = Json::<QueryRequest>::from_bytes(b"{\"start_date\": ").unwrap_err();
        let err = run_query(State(state.clone()), Err(rejection))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.kind, ErrorKind::InvalidQuery);
        assert!(!err.error.is_empty());
        assert_eq!(gsc.calls(), 0);

        let rejection = Json::<serde_json::Value>::from_bytes(b"[1,").unwrap_err();
        let err = call_tool(State(state), Path("gsc_top_queries".into()), Err(rejection))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let body = serde_json::to_value(&err).unwrap();
        assert_eq!(body["kind"], "invalid_query");
    }

    #[tokio::test]
    async fn test_unknown_tool_and_period_are_not_found() {
        let (state, _) = state();
        let err = call_tool(State(state.clone()), Path("ga4_revenue".into()), Ok(Json(json!({}))))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err = dashboard(State(state), Path("quarter".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dashboard_runs_combined_report() {
        let (state, gsc) = state();
        let Json(board) = dashboard(State(state), Path("week".into())).await.unwrap();
        assert_eq!(board.period, Period::Week);
        assert!(board.report.search_console.top_queries.is_ok());
        assert_eq!(gsc.calls(), 1);
    }
}
