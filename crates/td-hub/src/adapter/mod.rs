//! # Unified Query Adapter
//!
//! Accepts a [`UnifiedQuery`], picks the platforms that can answer it,
//! translates for every one of them before touching the network, then
//! drives one fetch/normalize pipeline per platform concurrently and merges
//! what comes back.
//!
//! A platform that fails upstream is dropped from the answer and recorded
//! in the result metadata; only when every platform fails does the run fail.

pub mod merge;
pub mod request;

use chrono::{NaiveDate, Utc};
use futures_util::future::join_all;
use futures_util::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use td_core::{
    translate, CapabilityDescriptor, CapabilityRegistry, CapabilitySummary, NativeRequest,
    NormalizedRow, Normalizer, PlatformFailure, PlatformId, PlatformOutcome, PlatformReport,
    QueryError, ResultStatus, UnifiedQuery, UnifiedResult,
};
use td_io::ExecutionClient;
use tokio_util::sync::CancellationToken;

pub use request::QueryRequest;

/// A platform the adapter can actually reach: its descriptor plus the
/// execution client bound to it.
struct Platform {
    descriptor: Arc<CapabilityDescriptor>,
    client: Arc<ExecutionClient>,
}

pub struct UnifiedQueryAdapter {
    platforms: BTreeMap<PlatformId, Platform>,
}

impl UnifiedQueryAdapter {
    /// Platforms with a descriptor but no client are not configured and are
    /// never targeted.
    pub fn new<I>(registry: &CapabilityRegistry, clients: I) -> Self
    where
        I: IntoIterator<Item = ExecutionClient>,
    {
        let platforms = clients
            .into_iter()
            .filter_map(|client| {
                let descriptor = registry.get(client.platform())?.clone();
                Some((
                    client.platform(),
                    Platform {
                        descriptor,
                        client: Arc::new(client),
                    },
                ))
            })
            .collect();
        Self { platforms }
    }

    pub fn platforms(&self) -> Vec<PlatformId> {
        self.platforms.keys().copied().collect()
    }

    pub fn list_capabilities(&self) -> Vec<CapabilitySummary> {
        self.platforms
            .values()
            .map(|p| p.descriptor.summary())
            .collect()
    }

    pub fn descriptor(&self, platform: PlatformId) -> Option<&Arc<CapabilityDescriptor>> {
        self.platforms.get(&platform).map(|p| &p.descriptor)
    }

    /// Run `query` with today's UTC date as the lookback reference.
    pub async fn run(
        &self,
        query: &UnifiedQuery,
        cancel: CancellationToken,
    ) -> Result<UnifiedResult, QueryError> {
        self.run_as_of(query, Utc::now().date_naive(), cancel).await
    }

    pub async fn run_as_of(
        &self,
        query: &UnifiedQuery,
        as_of: NaiveDate,
        cancel: CancellationToken,
    ) -> Result<UnifiedResult, QueryError> {
        let started = Instant::now();
        let targets = self.select_targets(query)?;

        // Validation is all-or-nothing: nothing is fetched unless every
        // target translates.
        let mut prepared = Vec::with_capacity(targets.len());
        for platform in &targets {
            let target = &self.platforms[platform];
            let request = translate(query, &target.descriptor, as_of)?;
            let normalizer = Normalizer::for_query(Arc::clone(&target.descriptor), query)?;
            prepared.push((Arc::clone(&target.client), request, normalizer));
        }

        tracing::info!(
            "query {} .. {} on [{}]",
            query.date_range().start,
            query.date_range().end,
            targets
                .iter()
                .map(PlatformId::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let pipelines = prepared
            .into_iter()
            .map(|(client, request, normalizer)| {
                run_pipeline(client, request, normalizer, cancel.clone())
            });

        let outputs = tokio::select! {
            _ = cancel.cancelled() => return Err(QueryError::Cancelled),
            outputs = join_all(pipelines) => outputs,
        };

        if outputs
            .iter()
            .any(|o| matches!(o.error, Some(QueryError::Cancelled)))
        {
            return Err(QueryError::Cancelled);
        }

        let mut batches = Vec::with_capacity(outputs.len());
        let mut reports = Vec::with_capacity(outputs.len());
        let mut failures: Vec<PlatformFailure> = Vec::new();
        for output in outputs {
            let PipelineOutput {
                platform,
                rows,
                report,
                error,
            } = output;
            if let Some(err) = error {
                tracing::warn!("{} degraded: {}", platform, err);
                failures.push(err.to_failure(platform));
            } else {
                batches.push(rows);
            }
            reports.push(report);
        }

        if batches.is_empty() {
            return Err(QueryError::AllPlatformsFailed { failures });
        }

        let merged = merge::merge(batches, query);
        for report in &mut reports {
            report.rows_returned = merged.returned.get(&report.platform).copied().unwrap_or(0);
        }

        let window_end = (query.offset() as u64).saturating_add(query.limit() as u64);
        let truncated =
            merged.total_rows > window_end || reports.iter().any(|r| r.succeeded() && r.truncated);

        let status = if failures.is_empty() {
            ResultStatus::Complete
        } else {
            ResultStatus::Partial { degraded: failures }
        };

        let elapsed = started.elapsed().as_millis() as u64;
        tracing::info!(
            "query returned {} of {} rows in {}ms{}",
            merged.rows.len(),
            merged.total_rows,
            elapsed,
            if matches!(status, ResultStatus::Complete) { "" } else { " (partial)" }
        );

        Ok(UnifiedResult {
            rows: merged.rows,
            status,
            total_rows: merged.total_rows,
            truncated,
            platforms: reports,
            query_time_ms: elapsed,
        })
    }

    /// Platforms that will run `query`, in platform order.
    fn select_targets(&self, query: &UnifiedQuery) -> Result<Vec<PlatformId>, QueryError> {
        let fields = query.referenced_fields();

        if let Some(unknown) = fields
            .iter()
            .find(|f| !self.platforms.values().any(|p| p.descriptor.supports(f)))
        {
            return Err(QueryError::UnsupportedField {
                platform: None,
                field: unknown.to_string(),
                reason: "unknown to every configured platform".into(),
            });
        }

        match query.targets() {
            Some(explicit) => explicit
                .iter()
                .map(|platform| {
                    let target = self.platforms.get(platform).ok_or_else(|| {
                        QueryError::InvalidQuery(format!("platform {} is not configured", platform))
                    })?;
                    match fields.iter().find(|f| !target.descriptor.supports(f)) {
                        Some(field) => Err(QueryError::UnsupportedField {
                            platform: Some(*platform),
                            field: field.to_string(),
                            reason: format!("not in the {} catalog", platform.display_name()),
                        }),
                        None => Ok(*platform),
                    }
                })
                .collect(),
            None => {
                let eligible: Vec<PlatformId> = self
                    .platforms
                    .iter()
                    .filter(|(_, p)| p.descriptor.covers(fields.iter().copied()))
                    .map(|(id, _)| *id)
                    .collect();
                if eligible.is_empty() {
                    return Err(QueryError::NoEligiblePlatform {
                        fields: fields.iter().map(|f| f.to_string()).collect(),
                    });
                }
                Ok(eligible)
            }
        }
    }
}

struct PipelineOutput {
    platform: PlatformId,
    rows: Vec<NormalizedRow>,
    report: PlatformReport,
    error: Option<QueryError>,
}

/// Fetch and normalize one platform's share of the query.
async fn run_pipeline(
    client: Arc<ExecutionClient>,
    request: NativeRequest,
    normalizer: Normalizer,
    cancel: CancellationToken,
) -> PipelineOutput {
    let platform = client.platform();
    let mut report = PlatformReport {
        platform,
        outcome: PlatformOutcome::Succeeded,
        rows_fetched: 0,
        rows_returned: 0,
        pages_fetched: 0,
        malformed_rows: 0,
        truncated: false,
    };
    let mut rows = Vec::new();
    let mut pages = client.fetch(request, cancel);

    while let Some(page) = pages.next().await {
        let page = match page {
            Ok(page) => page,
            Err(err) => {
                report.outcome = PlatformOutcome::Failed {
                    kind: err.kind(),
                    message: err.to_string(),
                };
                return PipelineOutput {
                    platform,
                    rows: Vec::new(),
                    report,
                    error: Some(err),
                };
            }
        };

        report.pages_fetched += 1;
        report.rows_fetched += page.rows.len() as u64;
        report.truncated = page.has_more();

        for row in normalizer.normalize(page) {
            match row {
                Ok(row) => rows.push(row),
                Err(err) => {
                    report.malformed_rows += 1;
                    tracing::debug!("{} skipping row: {}", platform, err);
                }
            }
        }
    }

    if report.malformed_rows > 0 {
        tracing::warn!(
            "{}: skipped {} malformed of {} rows",
            platform,
            report.malformed_rows,
            report.rows_fetched
        );
    }

    PipelineOutput {
        platform,
        rows,
        report,
        error: None,
    }
}
