use crate::api_client::{AdsApi, Breakdown, DataSource, DateChunk, RawInsightRow};
use crate::config::RetryPolicy;
use crate::error::Error;
use crate::retry::retry_with_backoff;
use crate::workers::WorkerPool;
use chrono::{Duration, NaiveDate};
use log::{error, info};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Splits `[start, end]` into inclusive windows of at most `days` days.
pub fn date_chunks(start: NaiveDate, end: NaiveDate, days: u32) -> Vec<DateChunk> {
    let step = Duration::days(i64::from(days.max(1)));
    let mut chunks = Vec::new();
    let mut since = start;
    while since <= end {
        let until = (since + step - Duration::days(1)).min(end);
        chunks.push(DateChunk { since, until });
        since = until + Duration::days(1);
    }
    chunks
}

/// Rows pulled for one window, with per-source counts and the chunks that
/// actually came back.
#[derive(Debug, Default)]
pub struct Extraction {
    pub rows: Vec<RawInsightRow>,
    pub rows_by_source: BTreeMap<DataSource, usize>,
    pub fetched_chunks: BTreeMap<DataSource, Vec<DateChunk>>,
    pub failed_chunks: usize,
}

impl Extraction {
    fn absorb(&mut self, source: DataSource, chunk: DateChunk, rows: Vec<RawInsightRow>) {
        *self.rows_by_source.entry(source).or_default() += rows.len();
        self.fetched_chunks.entry(source).or_default().push(chunk);
        self.rows.extend(rows);
    }

    fn merge(&mut self, other: Extraction) {
        self.failed_chunks += other.failed_chunks;
        for (source, count) in other.rows_by_source {
            *self.rows_by_source.entry(source).or_default() += count;
        }
        for (source, chunks) in other.fetched_chunks {
            self.fetched_chunks.entry(source).or_default().extend(chunks);
        }
        self.rows.extend(other.rows);
    }

    /// Chunks of `source` that were fetched successfully, in date order.
    pub fn chunks_for(&self, source: DataSource) -> Vec<DateChunk> {
        let mut chunks = self.fetched_chunks.get(&source).cloned().unwrap_or_default();
        chunks.sort_by_key(|chunk| chunk.since);
        chunks
    }
}

pub struct InsightsExtractor<A: AdsApi> {
    api: Arc<A>,
    pool: WorkerPool,
    chunk_days: u32,
    retry: RetryPolicy,
}

impl<A: AdsApi> InsightsExtractor<A> {
    pub fn new(api: Arc<A>, pool: WorkerPool, chunk_days: u32, retry: RetryPolicy) -> Self {
        InsightsExtractor {
            api,
            pool,
            chunk_days,
            retry,
        }
    }

    /// Core rows plus one pass per breakdown.
    ///
    /// # Arguments
    /// * `start` - First day of the window, inclusive
    /// * `end` - Last day of the window, inclusive
    /// * `breakdowns` - Breakdown passes to run after the core pass
    ///
    /// # Returns
    /// A Result containing the merged [`Extraction`] or an [`Error`] on
    /// authentication failure
    pub async fn extract_all(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        breakdowns: &[Breakdown],
    ) -> Result<Extraction, Error> {
        let mut extraction = self.extract(start, end, None).await?;
        for breakdown in breakdowns {
            let partial = self.extract(start, end, Some(*breakdown)).await?;
            extraction.merge(partial);
        }
        Ok(extraction)
    }

    /// Fetches every chunk of the range concurrently. Failed chunks are logged
    /// and left out; only authentication failures abort the extraction.
    pub async fn extract(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        breakdown: Option<Breakdown>,
    ) -> Result<Extraction, Error> {
        let source = breakdown.map(|b| b.data_source()).unwrap_or(DataSource::Core);
        let chunks = date_chunks(start, end, self.chunk_days);
        info!(
            "Extracting {} insights for {} to {} in {} chunks on {} workers",
            source.as_str(),
            start,
            end,
            chunks.len(),
            self.pool.size()
        );

        let jobs = chunks.into_iter().map(|chunk| {
            let api = self.api.clone();
            let retry = self.retry;
            async move {
                let result = retry_with_backoff(&retry, "insights chunk", || {
                    api.fetch_insights(chunk, breakdown)
                })
                .await;
                (chunk, result)
            }
        });

        let mut extraction = Extraction::default();
        extraction.rows_by_source.insert(source, 0);
        for (chunk, result) in self.pool.run_all(jobs).await {
            match result {
                Ok(rows) => {
                    let rows = rows
                        .into_iter()
                        .map(|fields| RawInsightRow { source, fields })
                        .collect();
                    extraction.absorb(source, chunk, rows);
                }
                Err(err) if err.is_auth_failure() => return Err(err),
                Err(err) => {
                    error!(
                        "Dropping {} chunk {} to {}: {}",
                        source.as_str(),
                        chunk.since,
                        chunk.until,
                        err
                    );
                    extraction.failed_chunks += 1;
                }
            }
        }

        info!(
            "Extracted {} {} rows ({} failed chunks)",
            extraction.rows.len(),
            source.as_str(),
            extraction.failed_chunks
        );
        Ok(extraction)
    }
}
