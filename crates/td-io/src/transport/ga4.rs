//! GA4 Data API transport (`properties.runReport`).

use super::{read_json, PageCursor, PlatformTransport, TransportError};
use crate::credentials::CredentialProvider;
use serde::Deserialize;
use std::sync::Arc;
use td_core::{ContinuationToken, NativeBody, NativeRequest, NativeRow, PlatformId, ResultPage};

pub const DEFAULT_BASE_URL: &str = "https://analyticsdata.googleapis.com";

pub struct Ga4Transport {
    http: reqwest::Client,
    base_url: String,
    property_id: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl Ga4Transport {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        property_id: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            property_id: property_id.into(),
            credentials,
        }
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/properties/{}:runReport",
            self.base_url.trim_end_matches('/'),
            self.property_id
        )
    }
}

#[async_trait::async_trait]
impl PlatformTransport for Ga4Transport {
    fn platform(&self) -> PlatformId {
        PlatformId::Ga4
    }

    async fn fetch_page(
        &self,
        request: &NativeRequest,
        cursor: &PageCursor,
    ) -> Result<ResultPage, TransportError> {
        let NativeBody::Ga4(body) = &request.body else {
            return Err(TransportError::Mismatch {
                expected: PlatformId::Ga4,
                got: request.platform,
            });
        };
        let start_row = cursor.start_row()?;
        let mut body = body.clone();
        body.offset = start_row;
        body.limit = cursor.page_size as u64;

        let token = self.credentials.bearer_token().await?;
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let json = read_json(response).await?;
        decode_report(json, start_row)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunReportResponse {
    #[serde(default)]
    dimension_headers: Vec<Header>,
    #[serde(default)]
    metric_headers: Vec<Header>,
    #[serde(default)]
    rows: Vec<ReportRow>,
    #[serde(default)]
    row_count: u64,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportRow {
    #[serde(default)]
    dimension_values: Vec<Cell>,
    #[serde(default)]
    metric_values: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
struct Cell {
    #[serde(default)]
    value: serde_json::Value,
}

/// Zip header names with cell values. GA4 returns every value as a string;
/// typing is the normalizer's job.
pub fn decode_report(json: serde_json::Value, start_row: u64) -> Result<ResultPage, TransportError> {
    let report: RunReportResponse =
        serde_json::from_value(json).map_err(|e| TransportError::Decode(e.to_string()))?;

    let rows: Vec<NativeRow> = report
        .rows
        .into_iter()
        .map(|row| {
            let dims = report
                .dimension_headers
                .iter()
                .zip(row.dimension_values);
            let metrics = report.metric_headers.iter().zip(row.metric_values);
            dims.chain(metrics)
                .map(|(header, cell)| (header.name.clone(), cell.value))
                .collect()
        })
        .collect();

    let next_row = start_row + rows.len() as u64;
    let continuation = (!rows.is_empty() && next_row < report.row_count)
        .then(|| ContinuationToken::new(next_row.to_string()));
    Ok(ResultPage::new(rows, continuation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_zips_headers() {
        let page = decode_report(
            json!({
                "dimensionHeaders": [{"name": "pagePath"}],
                "metricHeaders": [{"name": "sessions", "type": "TYPE_INTEGER"}],
                "rows": [
                    {"dimensionValues": [{"value": "/"}], "metricValues": [{"value": "120"}]},
                    {"dimensionValues": [{"value": "/blog"}], "metricValues": [{"value": "45"}]}
                ],
                "rowCount": 5
            }),
            0,
        )
        .unwrap();
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.rows[1]["pagePath"], json!("/blog"));
        assert_eq!(page.rows[0]["sessions"], json!("120"));
        assert_eq!(page.continuation, Some(ContinuationToken::new("2")));
    }

    #[test]
    fn test_last_page_has_no_continuation() {
        let page = decode_report(
            json!({
                "metricHeaders": [{"name": "sessions"}],
                "rows": [{"metricValues": [{"value": "7"}]}],
                "rowCount": 3
            }),
            2,
        )
        .unwrap();
        assert!(!page.has_more());
    }

    #[test]
    fn test_empty_report() {
        let page = decode_report(json!({"kind": "analyticsData#runReport"}), 0).unwrap();
        assert!(page.rows.is_empty());
        assert!(!page.has_more());
    }

    #[test]
    fn test_non_object_is_decode_error() {
        assert!(matches!(
            decode_report(json!([1, 2]), 0),
            Err(TransportError::Decode(_))
        ));
    }

    #[test]
    fn test_endpoint() {
        let t = Ga4Transport::new(
            reqwest::Client::new(),
            "http://localhost:9000/",
            "123456",
            Arc::new(crate::credentials::StaticToken::new("t")),
        );
        assert_eq!(
            t.endpoint(),
            "http://localhost:9000/v1beta/properties/123456:runReport"
        );
    }
}
