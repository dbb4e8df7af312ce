//! Scheduler (spec.md §4.9): persists a single cron configuration document
//! and fires the pipeline orchestrator on schedule. Depends only on the
//! [`catalog_core::PipelineRunner`] trait, not on the orchestrator's
//! concrete wiring — see spec.md §9, "cycle in ownership".

use std::path::{Path, PathBuf};
use std::sync::Arc;

use catalog_core::{Error, PipelineRunner, Result, RunMode, ScheduleConfig};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

/// Persists and runs the single scheduler configuration document
/// (spec §3 "Scheduler configuration", §6 "Persisted state outside the
/// databases").
pub struct Scheduler {
    config_path: PathBuf,
    config: Mutex<ScheduleConfig>,
    runner: Arc<dyn PipelineRunner>,
    job_scheduler: Mutex<Option<JobScheduler>>,
}

impl Scheduler {
    /// Load the persisted config (or fall back to [`ScheduleConfig::default`]
    /// if the file is absent) without starting any job yet.
    pub async fn load(config_path: impl Into<PathBuf>, runner: Arc<dyn PipelineRunner>) -> Self {
        let config_path = config_path.into();
        let config = read_config(&config_path).unwrap_or_default();
        Self {
            config_path,
            config: Mutex::new(config),
            runner,
            job_scheduler: Mutex::new(None),
        }
    }

    pub async fn config(&self) -> ScheduleConfig {
        self.config.lock().await.clone()
    }

    /// Start the persisted job if the config says `enabled`. A no-op
    /// otherwise (and on an invalid persisted expression — that's a
    /// configuration problem surfaced at `apply_config` time, not here).
    pub async fn start(&self) -> Result<()> {
        let config = self.config.lock().await.clone();
        if !config.enabled {
            return Ok(());
        }
        self.start_job(&config).await
    }

    /// Validate, persist, and (re)start the job for a new configuration.
    /// Invalid expressions are rejected synchronously without mutating any
    /// state (spec §4.9, §7 "Configuration error").
    pub async fn apply_config(&self, new: ScheduleConfig) -> Result<ScheduleConfig> {
        validate_cron(&new.expression)?;

        self.stop_job().await;
        write_config(&self.config_path, &new)?;
        *self.config.lock().await = new.clone();

        if new.enabled {
            self.start_job(&new).await?;
        }

        Ok(new)
    }

    async fn start_job(&self, config: &ScheduleConfig) -> Result<()> {
        validate_cron(&config.expression)?;

        let js = JobScheduler::new().await.map_err(|e| Error::Config(e.to_string()))?;
        let runner = self.runner.clone();
        let mode = config.mode;
        // tokio-cron-scheduler's `cron` backend expects a leading seconds
        // field; the spec's expressions are standard 5-field, so pin
        // seconds at :00 and keep the 5-field string as the source of truth
        // everywhere else (persistence, validation, the admin API).
        let six_field = format!("0 {}", config.expression);

        let job = Job::new_async(six_field.as_str(), move |_uuid, _lock| {
            let runner = runner.clone();
            Box::pin(async move {
                match runner.start(mode).await {
                    Ok(()) => info!(?mode, "scheduled pipeline run started"),
                    Err(e) => warn!(error = %e, "scheduled run skipped (already running)"),
                }
            })
        })
        .map_err(|e| Error::Config(e.to_string()))?;

        js.add(job).await.map_err(|e| Error::Config(e.to_string()))?;
        js.start().await.map_err(|e| Error::Config(e.to_string()))?;

        *self.job_scheduler.lock().await = Some(js);
        info!(expression = %config.expression, ?mode, "scheduler job registered");
        Ok(())
    }

    async fn stop_job(&self) {
        if let Some(js) = self.job_scheduler.lock().await.take() {
            if let Err(e) = js.shutdown().await {
                warn!(error = %e, "scheduler shutdown reported an error (ignored)");
            }
        }
    }
}

fn validate_cron(expression: &str) -> Result<()> {
    let field_count = expression.split_whitespace().count();
    if field_count != 5 {
        return Err(Error::Config(format!(
            "cron expression must have 5 fields (minute hour day-of-month month day-of-week), got {field_count}"
        )));
    }
    let six_field = format!("0 {expression}");
    std::str::FromStr::from_str(&six_field)
        .map(|_: cron::Schedule| ())
        .map_err(|e: cron::error::Error| Error::Config(format!("invalid cron expression: {e}")))?;
    Ok(())
}

fn read_config(path: &Path) -> Option<ScheduleConfig> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn write_config(path: &Path, config: &ScheduleConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::Config(e.to_string()))?;
    }
    let bytes = serde_json::to_vec_pretty(config)?;
    std::fs::write(path, bytes).map_err(|e| Error::Config(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use catalog_core::PipelineStateSnapshot;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRunner {
        starts: AtomicUsize,
    }

    #[async_trait]
    impl PipelineRunner for CountingRunner {
        async fn start(&self, _mode: RunMode) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn request_stop(&self) {}
        async fn snapshot(&self) -> PipelineStateSnapshot {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn apply_config_rejects_invalid_expression_without_mutating_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.json");
        let runner = Arc::new(CountingRunner { starts: AtomicUsize::new(0) });
        let scheduler = Scheduler::load(&path, runner).await;

        let before = scheduler.config().await;
        let bad = ScheduleConfig { enabled: true, mode: RunMode::Incremental, expression: "not a cron".to_string() };
        let err = scheduler.apply_config(bad).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let after = scheduler.config().await;
        assert_eq!(before.expression, after.expression);
        assert!(!path.exists(), "invalid config must not be persisted");
    }

    #[tokio::test]
    async fn apply_config_persists_valid_expression() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.json");
        let runner = Arc::new(CountingRunner { starts: AtomicUsize::new(0) });
        let scheduler = Scheduler::load(&path, runner).await;

        let good = ScheduleConfig { enabled: false, mode: RunMode::Clean, expression: "0 3 * * *".to_string() };
        let applied = scheduler.apply_config(good.clone()).await.unwrap();
        assert_eq!(applied.expression, "0 3 * * *");

        let persisted: ScheduleConfig = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(persisted.expression, good.expression);
        assert_eq!(persisted.mode, RunMode::Clean);
    }

    #[tokio::test]
    async fn load_without_existing_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let runner = Arc::new(CountingRunner { starts: AtomicUsize::new(0) });
        let scheduler = Scheduler::load(&path, runner).await;
        let config = scheduler.config().await;
        assert_eq!(config, ScheduleConfig::default());
    }
}
