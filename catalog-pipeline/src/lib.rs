//! Pipeline Orchestrator (spec.md §4.8): wires the crawler and the enrich
//! worker pool around a fresh, per-run enrichment queue, holds the
//! observable [`PipelineState`], and implements the start/stop/snapshot
//! contract other crates depend on through [`catalog_core::PipelineRunner`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use catalog_core::{Error, PipelineRunner, PipelineState, PipelineStateSnapshot, PipelineStatus, Result, RunMode};
use catalog_crawler::{Crawler, CrawlerConfig};
use catalog_enrich::{EnrichConfig, EnrichPool};
use catalog_index::SearchIndex;
use catalog_metadata::MetadataClient;
use catalog_store::CatalogStore;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<CatalogStore>,
    index: Arc<SearchIndex>,
    metadata: Arc<MetadataClient>,
    state: Arc<PipelineState>,
    running: Arc<AtomicBool>,
    crawler_config: CrawlerConfig,
    enrich_config: EnrichConfig,
    has_metadata_credentials: bool,
}

impl Orchestrator {
    pub fn new(
        store: Arc<CatalogStore>,
        index: Arc<SearchIndex>,
        metadata: Arc<MetadataClient>,
        crawler_config: CrawlerConfig,
        enrich_config: EnrichConfig,
        has_metadata_credentials: bool,
    ) -> Self {
        Self {
            store,
            index,
            metadata,
            state: Arc::new(PipelineState::new()),
            running: Arc::new(AtomicBool::new(false)),
            crawler_config,
            enrich_config,
            has_metadata_credentials,
        }
    }

    pub fn state(&self) -> Arc<PipelineState> {
        self.state.clone()
    }

    /// The full run (spec §4.8): schema init, clean-mode wipe, provider
    /// auth, then crawler + enrich pool concurrently until both finish or
    /// cancellation is observed.
    async fn run_to_completion(self, mode: RunMode) {
        self.state.log(format!("pipeline run starting in {mode:?} mode")).await;

        if let Err(e) = self.store.init().await {
            warn!(error = %e, "store schema init failed (continuing)");
            self.state.log(format!("store init warning: {e}")).await;
        }
        if let Err(e) = self.index.init().await {
            warn!(error = %e, "index init failed (continuing)");
            self.state.log(format!("index init warning: {e}")).await;
        }

        if mode == RunMode::Clean {
            if let Err(e) = self.index.delete_all().await {
                warn!(error = %e, "clean-mode index wipe failed (continuing)");
                self.state.log(format!("clean wipe warning (index): {e}")).await;
            }
            if let Err(e) = self.store.delete_all().await {
                warn!(error = %e, "clean-mode store wipe failed (continuing)");
                self.state.log(format!("clean wipe warning (store): {e}")).await;
            }
        }

        let enrichment_enabled = self.has_metadata_credentials && self.authenticate_provider().await;
        if !enrichment_enabled {
            // No workers will drain the queue; mark the crawl-complete gate
            // immediately so nothing downstream waits on it forever.
            self.state.log("running scrape-only (no provider credentials or auth failed)".to_string()).await;
        }

        let queue = Arc::new(catalog_core::EnrichQueue::new());

        let crawler = match Crawler::new(
            self.crawler_config.clone(),
            self.store.clone(),
            self.index.clone(),
            queue.clone(),
            self.state.clone(),
        ) {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "failed to construct crawler");
                self.state.log(format!("fatal: crawler construction failed: {e}")).await;
                self.running.store(false, Ordering::SeqCst);
                self.state.finish(PipelineStatus::Error).await;
                return;
            }
        };

        let crawl_mode = mode;
        let crawl_task = tokio::spawn(async move { crawler.run(crawl_mode).await });

        let enrich_task = if enrichment_enabled {
            let pool = EnrichPool::new(
                self.metadata.clone(),
                self.store.clone(),
                self.index.clone(),
                queue.clone(),
                self.state.clone(),
                self.enrich_config,
            );
            Some(tokio::spawn(async move {
                pool.run().await;
            }))
        } else {
            None
        };

        let crawl_result = crawl_task.await;
        if let Some(task) = enrich_task {
            if let Err(join_err) = task.await {
                error!(error = %join_err, "enrich pool task panicked");
            }
        }

        self.running.store(false, Ordering::SeqCst);

        let final_status = match crawl_result {
            Ok(Ok(())) => {
                if self.state.is_cancelled() {
                    PipelineStatus::Idle
                } else {
                    PipelineStatus::Done
                }
            }
            Ok(Err(e)) => {
                error!(error = %e, "crawl returned an error");
                self.state.log(format!("fatal: crawl error: {e}")).await;
                PipelineStatus::Error
            }
            Err(join_err) => {
                error!(error = %join_err, "crawl task panicked");
                self.state.log(format!("fatal: crawl task panicked: {join_err}")).await;
                PipelineStatus::Error
            }
        };

        self.state.finish(final_status).await;
        info!(status = ?final_status, "pipeline run finished");
    }

    /// Authenticate against the metadata provider once per run. Returns
    /// `false` (and logs) on any failure, per the "scrape-only" error
    /// handling taxonomy entry in spec §7.
    async fn authenticate_provider(&self) -> bool {
        match self.metadata.authenticate().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "metadata provider authentication failed, running scrape-only");
                self.state.log(format!("provider auth failed: {e}")).await;
                false
            }
        }
    }
}

#[async_trait]
impl PipelineRunner for Orchestrator {
    async fn start(&self, mode: RunMode) -> Result<()> {
        if self.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return Err(Error::AlreadyRunning);
        }

        // Reset and flip to `Running` here, synchronously, so a caller that
        // polls `snapshot()` right after `start()` returns never observes
        // the pre-run `Idle` status (the spawned task below would otherwise
        // race it).
        self.state.reset(mode).await;

        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.run_to_completion(mode).await });
        Ok(())
    }

    fn request_stop(&self) {
        self.state.signal_cancel();
    }

    async fn snapshot(&self) -> PipelineStateSnapshot {
        self.state.snapshot().await
    }
}
