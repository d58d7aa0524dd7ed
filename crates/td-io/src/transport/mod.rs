//! # Platform Transports
//!
//! The HTTP edge of an execution client. A transport issues exactly one
//! page request and decodes the response; paging, rate limiting and retry
//! live in [`crate::client`].

pub mod ga4;
pub mod gsc;

use reqwest::StatusCode;
use td_core::{ContinuationToken, NativeRequest, PlatformId, ResultPage};
use thiserror::Error;

pub use ga4::Ga4Transport;
pub use gsc::GscTransport;

/// Which page to fetch next.
#[derive(Debug, Clone, PartialEq)]
pub struct PageCursor {
    /// `None` for the first page.
    pub continuation: Option<ContinuationToken>,
    /// Rows to ask for on this page.
    pub page_size: u32,
}

impl PageCursor {
    pub fn first(page_size: u32) -> Self {
        Self {
            continuation: None,
            page_size,
        }
    }

    /// Row offset encoded in the continuation token. Both built-in
    /// transports use the decimal start row as their token.
    pub fn start_row(&self) -> Result<u64, TransportError> {
        match &self.continuation {
            None => Ok(0),
            Some(token) => token
                .as_str()
                .parse()
                .map_err(|_| TransportError::Decode(format!("bad continuation '{}'", token.as_str()))),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("undecodable response: {0}")]
    Decode(String),

    #[error("credentials unavailable: {0}")]
    Credentials(String),

    /// A request body built for another platform was handed to this one.
    #[error("request for {got} sent to the {expected} transport")]
    Mismatch { expected: PlatformId, got: PlatformId },
}

impl TransportError {
    pub fn status(status: StatusCode, body: impl Into<String>) -> Self {
        Self::Status {
            status: status.as_u16(),
            body: body.into(),
        }
    }

    /// Network failures, 5xx, 429 and quota-flavoured 403s are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, body } => match *status {
                429 => true,
                500..=599 => true,
                403 => is_quota_reason(body),
                _ => false,
            },
            Self::Decode(_) | Self::Credentials(_) | Self::Mismatch { .. } => false,
        }
    }
}

fn is_quota_reason(body: &str) -> bool {
    let body = body.to_ascii_lowercase();
    ["ratelimitexceeded", "userratelimitexceeded", "quotaexceeded", "resource_exhausted"]
        .iter()
        .any(|needle| body.contains(needle))
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// One upstream platform's page endpoint.
#[async_trait::async_trait]
pub trait PlatformTransport: Send + Sync {
    fn platform(&self) -> PlatformId;

    /// Fetch the page at `cursor` for `request`.
    async fn fetch_page(
        &self,
        request: &NativeRequest,
        cursor: &PageCursor,
    ) -> Result<ResultPage, TransportError>;
}

/// Read a response, mapping non-success statuses to [`TransportError::Status`].
pub(crate) async fn read_json(response: reqwest::Response) -> Result<serde_json::Value, TransportError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TransportError::status(status, body));
    }
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))
}
