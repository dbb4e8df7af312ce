//! Enricher (spec §4.7): a worker pool that drains the enrichment queue,
//! calls the metadata provider in batches, writes results via the store,
//! and forwards finished documents to the search index.

use std::sync::Arc;
use std::time::Duration;

use catalog_core::{EnrichItem, EnrichQueue, PipelineState};
use catalog_index::SearchIndex;
use catalog_metadata::MetadataClient;
use catalog_store::CatalogStore;
use tokio::task::JoinSet;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct EnrichConfig {
    pub workers: usize,
    pub batch_size: usize,
    pub worker_delay_ms: u64,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self { workers: 4, batch_size: catalog_metadata::MAX_BATCH, worker_delay_ms: 1000 }
    }
}

/// Poll interval while waiting for either a full batch or crawl completion.
const POLL_DELAY: Duration = Duration::from_millis(100);

pub struct EnrichPool {
    metadata: Arc<MetadataClient>,
    store: Arc<CatalogStore>,
    index: Arc<SearchIndex>,
    queue: Arc<EnrichQueue>,
    state: Arc<PipelineState>,
    config: EnrichConfig,
}

impl EnrichPool {
    pub fn new(
        metadata: Arc<MetadataClient>,
        store: Arc<CatalogStore>,
        index: Arc<SearchIndex>,
        queue: Arc<EnrichQueue>,
        state: Arc<PipelineState>,
        config: EnrichConfig,
    ) -> Self {
        Self { metadata, store, index, queue, state, config }
    }

    /// Run the full worker pool until the crawl is complete and the queue
    /// is drained, or cancellation is observed.
    pub async fn run(&self) {
        let mut set: JoinSet<()> = JoinSet::new();
        // The sole admission control against the provider's rate limit
        // (spec §4.7): each worker starts `worker_delay_ms / workers` after
        // the previous one, so steady state issues one provider request per
        // that interval across the whole pool.
        let stagger_unit_ms = self.config.worker_delay_ms / self.config.workers.max(1) as u64;
        for worker_id in 0..self.config.workers {
            let worker = Worker {
                id: worker_id,
                metadata: self.metadata.clone(),
                store: self.store.clone(),
                index: self.index.clone(),
                queue: self.queue.clone(),
                state: self.state.clone(),
                batch_size: self.config.batch_size,
                delay: Duration::from_millis(self.config.worker_delay_ms),
            };
            let stagger = Duration::from_millis(stagger_unit_ms * worker_id as u64);
            set.spawn(async move {
                tokio::time::sleep(stagger).await;
                worker.run_loop().await;
            });
        }
        while set.join_next().await.is_some() {}
    }
}

struct Worker {
    id: usize,
    metadata: Arc<MetadataClient>,
    store: Arc<CatalogStore>,
    index: Arc<SearchIndex>,
    queue: Arc<EnrichQueue>,
    state: Arc<PipelineState>,
    batch_size: usize,
    delay: Duration,
}

impl Worker {
    async fn run_loop(&self) {
        loop {
            if self.state.is_cancelled() {
                break;
            }

            let qlen = self.queue.len().await;
            if qlen < self.batch_size && !self.state.scrape_complete() {
                tokio::time::sleep(POLL_DELAY).await;
                continue;
            }
            if qlen == 0 && self.state.scrape_complete() {
                break;
            }

            let batch = self.queue.drain_batch(self.batch_size).await;
            self.state.set_queue_size(self.queue.len().await as i64);

            if batch.is_empty() {
                // Another worker won the race for the last items; loop and
                // re-check the exit condition rather than sleeping blindly.
                continue;
            }

            self.process_batch(batch).await;
            tokio::time::sleep(self.delay).await;
        }
    }

    async fn process_batch(&self, batch: Vec<EnrichItem>) {
        let names: Vec<(i64, String)> = batch.iter().map(|item| (item.id, item.game_name.clone())).collect();

        let hits = match self.metadata.batch_lookup(&names).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(worker = self.id, error = %e, batch = batch.len(), "metadata lookup failed, skipping batch");
                self.state.log(format!("worker {}: metadata lookup failed: {e}", self.id)).await;
                return;
            }
        };

        // Spec §4.7 step 5: per-item normalize + write is done in parallel
        // within the batch, not one row at a time.
        let writes = batch.iter().map(|item| {
            let fields = hits.get(&item.id).cloned().unwrap_or_default();
            async move { (item.id, self.store.update_fields(item.id, &fields).await) }
        });
        let results = futures::future::join_all(writes).await;

        let mut updated_games = Vec::new();
        for (id, result) in results {
            match result {
                Ok(game) => {
                    self.state.incr_enriched(1);
                    updated_games.push(game);
                }
                Err(e) => {
                    warn!(worker = self.id, id, error = %e, "update_fields failed, skipping item");
                    self.state.log(format!("worker {}: update_fields({id}) failed: {e}", self.id)).await;
                }
            }
        }

        if !updated_games.is_empty() {
            let indexed = self.index.add_documents(&updated_games).await;
            self.state.incr_indexed(indexed as i64);
        }
    }
}
