//! # Execution Client
//!
//! One per platform. Turns a [`NativeRequest`] into a lazy stream of raw
//! pages: follows continuation tokens, stops at the row budget, takes a
//! rate-limit token before every attempt, retries transient failures, and
//! gives up promptly when the run is cancelled.

use crate::bucket::TokenBucket;
use crate::retry::{RetryDecision, RetryPolicy, RetryState};
use crate::transport::{PageCursor, PlatformTransport};
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use td_core::{ContinuationToken, NativeRequest, PlatformId, QueryError, ResultPage};
use tokio_util::sync::CancellationToken;

pub type PageStream = BoxStream<'static, Result<ResultPage, QueryError>>;

pub struct ExecutionClient {
    platform: PlatformId,
    transport: Arc<dyn PlatformTransport>,
    bucket: Arc<TokenBucket>,
    retry: RetryPolicy,
}

impl ExecutionClient {
    pub fn new(
        transport: Arc<dyn PlatformTransport>,
        bucket: Arc<TokenBucket>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            platform: transport.platform(),
            transport,
            bucket,
            retry,
        }
    }

    pub fn platform(&self) -> PlatformId {
        self.platform
    }

    /// Stream the pages for `request`. Nothing is sent until the stream is
    /// polled; the stream ends after the last page or the first error.
    pub fn fetch(&self, request: NativeRequest, cancel: CancellationToken) -> PageStream {
        let first_page = request.page_size.max(1);
        let state = Fetch {
            platform: self.platform,
            transport: Arc::clone(&self.transport),
            bucket: Arc::clone(&self.bucket),
            retry: self.retry.clone(),
            cancel,
            request,
            next: Some(PageCursor::first(first_page)),
            fetched: 0,
            pages: 0,
        };

        stream::try_unfold(state, |mut state| async move {
            let Some(cursor) = state.next.take() else {
                return Ok(None);
            };
            let page = state.fetch_with_retry(&cursor).await?;
            let page = state.advance(page);
            Ok(Some((page, state)))
        })
        .boxed()
    }
}

struct Fetch {
    platform: PlatformId,
    transport: Arc<dyn PlatformTransport>,
    bucket: Arc<TokenBucket>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    request: NativeRequest,
    next: Option<PageCursor>,
    fetched: u64,
    pages: u32,
}

impl Fetch {
    async fn fetch_with_retry(&self, cursor: &PageCursor) -> Result<ResultPage, QueryError> {
        let mut retry = RetryState::new(self.platform, &self.retry);
        loop {
            self.bucket.acquire(&self.cancel).await?;
            let attempt = retry.begin_attempt();
            tracing::debug!(
                "{} page {} attempt {} (size {})",
                self.platform,
                self.pages + 1,
                attempt,
                cursor.page_size
            );

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return Err(QueryError::Cancelled),
                outcome = self.transport.fetch_page(&self.request, cursor) => outcome,
            };

            let error = match outcome {
                Ok(page) => return Ok(page),
                Err(error) => error,
            };

            match retry.on_failure(&error) {
                RetryDecision::Retry { attempt, delay } => {
                    tracing::warn!(
                        "{} request failed: {}; attempt {} in {:?}",
                        self.platform,
                        error,
                        attempt,
                        delay
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(QueryError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::Fail(err) => {
                    tracing::warn!("{} giving up: {}", self.platform, err);
                    return Err(err);
                }
            }
        }
    }

    /// Account for a received page and decide where the next one starts.
    fn advance(&mut self, mut page: ResultPage) -> ResultPage {
        self.pages += 1;
        self.fetched += page.rows.len() as u64;

        let Some(budget) = self.request.row_budget else {
            self.next = page
                .continuation
                .clone()
                .filter(|_| !page.rows.is_empty())
                .map(|token| PageCursor {
                    continuation: Some(token),
                    page_size: self.request.page_size.max(1),
                });
            return page;
        };

        if self.fetched >= budget {
            let excess = (self.fetched - budget) as usize;
            if excess > 0 {
                let keep = page.rows.len() - excess;
                page.rows.truncate(keep);
                self.fetched = budget;
                // Rows beyond the budget exist upstream even if this was the
                // platform's last page.
                if page.continuation.is_none() {
                    page.continuation = Some(ContinuationToken::new(budget.to_string()));
                }
            }
            self.next = None;
            return page;
        }

        let remaining = budget - self.fetched;
        self.next = page
            .continuation
            .clone()
            .filter(|_| !page.rows.is_empty())
            .map(|token| PageCursor {
                continuation: Some(token),
                page_size: remaining.min(self.request.page_size.max(1) as u64) as u32,
            });
        page
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::RateLimit;
    use crate::scripted::{native_rows, ScriptedTransport};
    use crate::transport::TransportError;
    use futures::TryStreamExt;
    use std::time::Duration;
    use td_core::{CapabilityDescriptor, NativeBody, UnifiedQuery};

    fn request(platform: PlatformId, page_size: u32, row_budget: Option<u64>) -> NativeRequest {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let q = UnifiedQuery::builder(date, date)
            .metric(match platform {
                PlatformId::Ga4 => "sessions",
                PlatformId::Gsc => "clicks",
            })
            .build()
            .unwrap();
        let descriptor = CapabilityDescriptor::builtin(platform);
        let mut req = td_core::translate(&q, &descriptor, date).unwrap();
        req.page_size = page_size;
        req.row_budget = row_budget;
        assert!(matches!(
            (&req.body, platform),
            (NativeBody::Ga4(_), PlatformId::Ga4) | (NativeBody::Gsc(_), PlatformId::Gsc)
        ));
        req
    }

    fn generous() -> RateLimit {
        RateLimit {
            refill_per_sec: 1_000.0,
            burst: 1_000,
            max_wait: Duration::from_secs(1),
        }
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            exponential_base: 2.0,
            jitter: false,
        }
    }

    fn client(transport: Arc<ScriptedTransport>, limit: RateLimit) -> ExecutionClient {
        let platform = transport.platform();
        ExecutionClient::new(
            transport,
            Arc::new(TokenBucket::new(platform, limit)),
            quick_retry(),
        )
    }

    fn page(rows: usize, start: usize, more: Option<&str>) -> ResultPage {
        ResultPage::new(
            native_rows("clicks", start..start + rows),
            more.map(ContinuationToken::new),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_follows_continuations_until_exhausted() {
        let transport = Arc::new(ScriptedTransport::new(PlatformId::Gsc));
        transport.push_page(page(2, 0, Some("2")));
        transport.push_page(page(2, 2, Some("4")));
        transport.push_page(page(1, 4, None));

        let pages: Vec<_> = client(transport.clone(), generous())
            .fetch(request(PlatformId::Gsc, 2, None), CancellationToken::new())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(transport.calls(), 3);
        let cursors = transport.cursors();
        assert_eq!(cursors[0].continuation, None);
        assert_eq!(cursors[2].continuation, Some(ContinuationToken::new("4")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_row_budget_and_shrinks_last_page() {
        let transport = Arc::new(ScriptedTransport::new(PlatformId::Ga4));
        transport.push_page(page(4, 0, Some("4")));
        transport.push_page(page(2, 4, Some("6")));
        transport.push_page(page(4, 6, None));

        let pages: Vec<_> = client(transport.clone(), generous())
            .fetch(request(PlatformId::Ga4, 4, Some(6)), CancellationToken::new())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(transport.calls(), 2);
        assert_eq!(transport.cursors()[1].page_size, 2);
        assert!(pages[1].has_more());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_page_is_trimmed_to_budget() {
        let transport = Arc::new(ScriptedTransport::new(PlatformId::Gsc));
        transport.push_page(page(5, 0, None));

        let pages: Vec<_> = client(transport, generous())
            .fetch(request(PlatformId::Gsc, 3, Some(3)), CancellationToken::new())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(pages[0].rows.len(), 3);
        assert!(pages[0].has_more());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let transport = Arc::new(ScriptedTransport::new(PlatformId::Gsc));
        transport.push_error(TransportError::Status {
            status: 503,
            body: "backend".into(),
        });
        transport.push_error(TransportError::Network("reset".into()));
        transport.push_page(page(1, 0, None));

        let pages: Vec<_> = client(transport.clone(), generous())
            .fetch(request(PlatformId::Gsc, 10, None), CancellationToken::new())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhaust_to_unavailable() {
        let transport = Arc::new(ScriptedTransport::new(PlatformId::Gsc));
        for _ in 0..3 {
            transport.push_error(TransportError::Status {
                status: 429,
                body: String::new(),
            });
        }

        let err = client(transport.clone(), generous())
            .fetch(request(PlatformId::Gsc, 10, None), CancellationToken::new())
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueryError::UpstreamUnavailable {
                platform: PlatformId::Gsc,
                attempts: 3,
                ..
            }
        ));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(PlatformId::Ga4));
        transport.push_error(TransportError::Status {
            status: 403,
            body: "PERMISSION_DENIED".into(),
        });

        let err = client(transport.clone(), generous())
            .fetch(request(PlatformId::Ga4, 10, None), CancellationToken::new())
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::UpstreamRejected { .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhaustion_surfaces() {
        let transport = Arc::new(ScriptedTransport::new(PlatformId::Gsc));
        transport.push_page(page(1, 0, Some("1")));
        transport.push_page(page(1, 1, None));

        let starved = RateLimit {
            refill_per_sec: 0.01,
            burst: 1,
            max_wait: Duration::from_millis(100),
        };
        let err = client(transport.clone(), starved)
            .fetch(request(PlatformId::Gsc, 1, None), CancellationToken::new())
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::RateLimitExceeded { .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_slow_call() {
        let transport = Arc::new(
            ScriptedTransport::new(PlatformId::Ga4).with_latency(Duration::from_secs(60)),
        );
        transport.push_page(page(1, 0, None));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            trigger.cancel();
        });

        let err = client(transport, generous())
            .fetch(request(PlatformId::Ga4, 10, None), cancel)
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();
        assert_eq!(err, QueryError::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_sent_until_polled() {
        let transport = Arc::new(ScriptedTransport::new(PlatformId::Gsc));
        let stream = client(transport.clone(), generous())
            .fetch(request(PlatformId::Gsc, 10, None), CancellationToken::new());
        assert_eq!(transport.calls(), 0);
        drop(stream);
        assert_eq!(transport.calls(), 0);
    }
}
