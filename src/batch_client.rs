use crate::api_client::{AdsApi, EntityRecord};
use crate::config::{PipelineSettings, RetryPolicy, BATCH_SIZE};
use crate::entities::EntityKind;
use crate::error::Error;
use crate::retry::retry_with_backoff;
use crate::workers::WorkerPool;
use indexmap::{IndexMap, IndexSet};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Resolves entity IDs to metadata records, one record per requested ID.
pub struct BatchClient<A: AdsApi> {
    api: Arc<A>,
    pool: WorkerPool,
    batch_timeout: Duration,
    bulk_fetch_threshold: usize,
    batch_retry: RetryPolicy,
    individual_retry: RetryPolicy,
}

impl<A: AdsApi> BatchClient<A> {
    pub fn new(api: Arc<A>, pool: WorkerPool, settings: &PipelineSettings) -> Self {
        BatchClient {
            api,
            pool,
            batch_timeout: settings.batch_timeout,
            bulk_fetch_threshold: settings.bulk_fetch_threshold,
            batch_retry: settings.batch_retry,
            individual_retry: settings.individual_retry,
        }
    }

    /// Fetches `ids` of `kind`. Failed IDs come back as safe-default records;
    /// only authentication failures are returned as errors.
    ///
    /// # Arguments
    /// * `kind` - The [`EntityKind`] to fetch
    /// * `ids` - Entity IDs; duplicates are fetched once
    ///
    /// # Returns
    /// A Result containing one [`EntityRecord`] per distinct ID in request order,
    /// or an [`Error`]
    pub async fn fetch_entities(
        &self,
        kind: EntityKind,
        ids: &[String],
    ) -> Result<Vec<EntityRecord>, Error> {
        let ids: IndexSet<String> = ids.iter().filter(|id| !id.is_empty()).cloned().collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let fields = kind.spec().api_fields;
        let bulk = ids.len() > self.bulk_fetch_threshold && kind.listing_edge().is_some();
        let mut records = if bulk {
            self.fetch_by_listing(kind, &ids, fields).await?
        } else {
            self.fetch_in_batches(&ids, fields).await?
        };

        // Restore request order; chunk results arrive in completion order.
        let ordered = ids
            .iter()
            .map(|id| {
                records
                    .swap_remove(id)
                    .unwrap_or_else(|| EntityRecord::safe_default(id))
            })
            .collect::<Vec<_>>();

        let failed = ordered.iter().filter(|r| r.is_fetch_error()).count();
        info!(
            "Fetched {} {:?} records ({} unresolved)",
            ordered.len(),
            kind,
            failed
        );
        Ok(ordered)
    }

    async fn fetch_by_listing(
        &self,
        kind: EntityKind,
        ids: &IndexSet<String>,
        fields: &str,
    ) -> Result<IndexMap<String, EntityRecord>, Error> {
        info!(
            "{} {:?} IDs exceed the bulk threshold of {}, listing the whole account",
            ids.len(),
            kind,
            self.bulk_fetch_threshold
        );
        let listed = retry_with_backoff(&self.batch_retry, "account listing", || {
            self.api.list_account_entities(kind, fields)
        })
        .await?;

        let mut records: IndexMap<String, EntityRecord> = listed
            .into_iter()
            .filter(|record| ids.contains(&record.id))
            .map(|record| (record.id.clone(), record))
            .collect();

        let missing = ids.iter().filter(|id| !records.contains_key(*id)).count();
        if missing > 0 {
            warn!("{} {:?} IDs were not in the account listing", missing, kind);
            for id in ids {
                if !records.contains_key(id) {
                    records.insert(id.clone(), EntityRecord::safe_default(id));
                }
            }
        }
        Ok(records)
    }

    async fn fetch_in_batches(
        &self,
        ids: &IndexSet<String>,
        fields: &'static str,
    ) -> Result<IndexMap<String, EntityRecord>, Error> {
        let chunks: Vec<Vec<String>> = ids
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .chunks(BATCH_SIZE)
            .map(|chunk| chunk.to_vec())
            .collect();
        debug!("Fetching {} IDs in {} batches", ids.len(), chunks.len());

        let jobs = chunks.into_iter().map(|chunk| {
            let job = ChunkJob {
                api: self.api.clone(),
                fields,
                timeout: self.batch_timeout,
                batch_retry: self.batch_retry,
                individual_retry: self.individual_retry,
            };
            let token = self.pool.job_token();
            async move { job.run(chunk, token).await }
        });

        let mut records = IndexMap::with_capacity(ids.len());
        for result in self.pool.run_all(jobs).await {
            for record in result? {
                records.insert(record.id.clone(), record);
            }
        }
        Ok(records)
    }
}

/// Everything one chunk needs, owned so it can run on the pool.
struct ChunkJob<A: AdsApi> {
    api: Arc<A>,
    fields: &'static str,
    timeout: Duration,
    batch_retry: RetryPolicy,
    individual_retry: RetryPolicy,
}

impl<A: AdsApi> ChunkJob<A> {
    async fn run(
        self,
        chunk: Vec<String>,
        token: tokio_util::sync::CancellationToken,
    ) -> Result<Vec<EntityRecord>, Error> {
        let timer = {
            let token = token.clone();
            let timeout = self.timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                token.cancel();
            })
        };

        let batch = tokio::select! {
            result = retry_with_backoff(&self.batch_retry, "batch lookup", || {
                self.api.fetch_by_ids(&chunk, self.fields)
            }) => result,
            _ = token.cancelled() => Err(Error::Timeout {
                operation: format!("batch lookup of {} IDs", chunk.len()),
            }),
        };
        timer.abort();

        let mut found: HashMap<String, EntityRecord> = match batch {
            Ok(records) => records.into_iter().map(|r| (r.id.clone(), r)).collect(),
            Err(err) if err.is_auth_failure() => return Err(err),
            Err(err) => {
                warn!(
                    "Batch of {} IDs failed, falling back to individual requests: {}",
                    chunk.len(),
                    err
                );
                HashMap::new()
            }
        };

        let mut records = Vec::with_capacity(chunk.len());
        for id in &chunk {
            match found.remove(id) {
                Some(record) => records.push(record),
                None => records.push(self.fetch_single(id).await?),
            }
        }
        Ok(records)
    }

    async fn fetch_single(&self, id: &str) -> Result<EntityRecord, Error> {
        let result = retry_with_backoff(&self.individual_retry, "entity lookup", || {
            self.api.fetch_entity(id, self.fields)
        })
        .await;

        match result {
            Ok(record) => Ok(record),
            Err(err) if err.is_auth_failure() => Err(err),
            Err(err) => {
                warn!("Entity {} could not be fetched, using a safe default: {}", id, err);
                Ok(EntityRecord::safe_default(id))
            }
        }
    }
}
