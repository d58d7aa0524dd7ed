//! Search Console transport (`searchanalytics.query`).

use super::{read_json, PageCursor, PlatformTransport, TransportError};
use crate::credentials::CredentialProvider;
use reqwest::Url;
use serde::Deserialize;
use std::sync::Arc;
use td_core::{ContinuationToken, NativeBody, NativeRequest, NativeRow, PlatformId, ResultPage};

pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";

pub struct GscTransport {
    http: reqwest::Client,
    base_url: String,
    site_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl GscTransport {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        site_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            site_url: site_url.into(),
            credentials,
        }
    }

    /// The site URL travels as a single percent-encoded path segment.
    pub fn endpoint(&self) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| TransportError::Network(format!("bad base url '{}': {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| TransportError::Network(format!("base url '{}' cannot hold a path", self.base_url)))?
            .pop_if_empty()
            .extend(["webmasters", "v3", "sites", self.site_url.as_str(), "searchAnalytics", "query"]);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl PlatformTransport for GscTransport {
    fn platform(&self) -> PlatformId {
        PlatformId::Gsc
    }

    async fn fetch_page(
        &self,
        request: &NativeRequest,
        cursor: &PageCursor,
    ) -> Result<ResultPage, TransportError> {
        let NativeBody::Gsc(body) = &request.body else {
            return Err(TransportError::Mismatch {
                expected: PlatformId::Gsc,
                got: request.platform,
            });
        };
        let start_row = cursor.start_row()?;
        let mut body = body.clone();
        body.start_row = start_row;
        body.row_limit = cursor.page_size;

        let token = self.credentials.bearer_token().await?;
        let response = self
            .http
            .post(self.endpoint()?)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let json = read_json(response).await?;
        decode_query(json, &body.dimensions, start_row, cursor.page_size)
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    rows: Vec<QueryRow>,
}

#[derive(Debug, Deserialize)]
struct QueryRow {
    #[serde(default)]
    keys: Vec<serde_json::Value>,
    #[serde(flatten)]
    values: serde_json::Map<String, serde_json::Value>,
}

const METRICS: [&str; 4] = ["clicks", "impressions", "ctr", "position"];

/// Rows carry dimension values positionally in `keys`, in the order the
/// request listed them. A row missing a metric still decodes. Search Console reports no total, so a full page
/// implies there may be more.
pub fn decode_query(
    json: serde_json::Value,
    dimensions: &[String],
    start_row: u64,
    page_size: u32,
) -> Result<ResultPage, TransportError> {
    let response: QueryResponse =
        serde_json::from_value(json).map_err(|e| TransportError::Decode(e.to_string()))?;

    let rows: Vec<NativeRow> = response
        .rows
        .into_iter()
        .map(|row| {
            let QueryRow { keys, mut values } = row;
            let mut native: NativeRow = dimensions.iter().cloned().zip(keys).collect();
            // Absent metrics stay absent; the normalizer decides whether the
            // query needed them.
            for metric in METRICS {
                if let Some(value) = values.remove(metric) {
                    native.insert(metric.to_string(), value);
                }
            }
            native
        })
        .collect();

    let continuation = (rows.len() as u64 >= page_size as u64 && !rows.is_empty())
        .then(|| ContinuationToken::new((start_row + rows.len() as u64).to_string()));
    Ok(ResultPage::new(rows, continuation))
}
