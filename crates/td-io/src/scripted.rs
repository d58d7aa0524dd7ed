//! In-memory transport that replays a script of pages and errors, for tests
//! here and in downstream crates (`testing` feature).

use crate::transport::{PageCursor, PlatformTransport, TransportError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use td_core::{NativeRequest, NativeRow, PlatformId, ResultPage};

pub struct ScriptedTransport {
    platform: PlatformId,
    script: Mutex<VecDeque<Result<ResultPage, TransportError>>>,
    cursors: Mutex<Vec<PageCursor>>,
    calls: AtomicUsize,
    latency: Duration,
}

impl ScriptedTransport {
    pub fn new(platform: PlatformId) -> Self {
        Self {
            platform,
            script: Mutex::new(VecDeque::new()),
            cursors: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            latency: Duration::ZERO,
        }
    }

    /// Every call sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push_page(&self, page: ResultPage) {
        self.script.lock().push_back(Ok(page));
    }

    pub fn push_error(&self, error: TransportError) {
        self.script.lock().push_back(Err(error));
    }

    /// Page requests received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn cursors(&self) -> Vec<PageCursor> {
        self.cursors.lock().clone()
    }
}

#[async_trait::async_trait]
impl PlatformTransport for ScriptedTransport {
    fn platform(&self) -> PlatformId {
        self.platform
    }

    async fn fetch_page(
        &self,
        _request: &NativeRequest,
        cursor: &PageCursor,
    ) -> Result<ResultPage, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.cursors.lock().push(cursor.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        // An exhausted script answers with an empty final page.
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| Ok(ResultPage::default()))
    }
}

/// Rows carrying a single numeric `field`, valued by index.
pub fn native_rows(field: &str, values: Range<usize>) -> Vec<NativeRow> {
    values
        .map(|i| {
            let mut row = NativeRow::new();
            row.insert(field.to_string(), serde_json::json!(i));
            row
        })
        .collect()
}
