//! Binary entry point: wires every catalog-* crate into one running
//! service — store, index, metadata client, orchestrator, scheduler, and
//! the admin router — the way the teacher's `rootsignal-server::main`
//! assembles its dependencies before calling `axum::serve`.

use std::sync::Arc;

use anyhow::{Context, Result};
use catalog_admin::AdminState;
use catalog_core::{Config, PipelineRunner};
use catalog_crawler::CrawlerConfig;
use catalog_enrich::EnrichConfig;
use catalog_index::SearchIndex;
use catalog_metadata::MetadataClient;
use catalog_pipeline::Orchestrator;
use catalog_scheduler::Scheduler;
use catalog_store::CatalogStore;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "catalog-pipeline", about = "ROM archive ingestion pipeline")]
struct Cli {
    /// Run one pipeline pass in the given mode, then exit, instead of
    /// starting the admin server and scheduler.
    #[arg(long)]
    run_once: Option<RunOnceMode>,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum RunOnceMode {
    Incremental,
    Clean,
}

impl From<RunOnceMode> for catalog_core::RunMode {
    fn from(m: RunOnceMode) -> Self {
        match m {
            RunOnceMode::Incremental => catalog_core::RunMode::Incremental,
            RunOnceMode::Clean => catalog_core::RunMode::Clean,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_redacted();

    tracing::info!(archive = %config.archive_base_url, "starting catalog-pipeline");

    let pool_size = (config.crawl_concurrency + config.igdb_workers + 8) as u32;
    let store = Arc::new(
        CatalogStore::connect(&config.database_url, pool_size)
            .await
            .context("connecting to catalog store")?,
    );
    let index = Arc::new(
        SearchIndex::new(&config.index_host, &config.index_api_key)
            .context("constructing search index client")?,
    );
    let metadata = Arc::new(MetadataClient::new(
        config.metadata_client_id.clone(),
        config.metadata_client_secret.clone(),
        config.metadata_auth_host.clone(),
        config.metadata_api_host.clone(),
    ));

    let orchestrator = Orchestrator::new(
        store.clone(),
        index.clone(),
        metadata,
        CrawlerConfig {
            base_url: config.archive_base_url.clone(),
            concurrency: config.crawl_concurrency,
            db_batch_size: config.db_batch_size,
        },
        EnrichConfig {
            workers: config.igdb_workers,
            batch_size: config.igdb_batch_size,
            worker_delay_ms: config.igdb_worker_delay_ms,
        },
        config.has_metadata_credentials(),
    );

    if let Some(mode) = cli.run_once {
        orchestrator.start(mode.into()).await.context("starting pipeline run")?;
        loop {
            let snapshot = orchestrator.snapshot().await;
            match snapshot.status {
                catalog_core::PipelineStatus::Running => {
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
                other => {
                    tracing::info!(status = ?other, "run-once pipeline finished");
                    break;
                }
            }
        }
        return Ok(());
    }

    let runner: Arc<dyn PipelineRunner> = Arc::new(orchestrator);
    let scheduler = Arc::new(Scheduler::load(&config.schedule_config_path, runner.clone()).await);
    scheduler.start().await.context("starting persisted scheduler job")?;

    let admin_state = AdminState {
        runner,
        scheduler,
        store,
        index,
        admin_shared_key: Arc::new(config.admin_shared_key.clone()),
    };
    let app = catalog_admin::build_router(admin_state);

    let addr = format!("{}:{}", config.admin_host, config.admin_port);
    let listener = tokio::net::TcpListener::bind(&addr).await.context("binding admin listener")?;
    tracing::info!(%addr, "admin surface listening");
    axum::serve(listener, app).await.context("admin server failed")?;

    Ok(())
}
