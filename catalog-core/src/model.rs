use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

/// The canonical catalog entity (spec.md §3, "Game record").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: Option<i64>,
    pub download_url: String,
    pub game_name: String,
    pub filename: String,
    pub platform: String,
    pub group_name: String,
    pub region: String,
    pub size: String,
    pub tags: Vec<String>,

    pub description: Option<String>,
    pub rating: Option<f64>,
    pub release_date: Option<NaiveDate>,
    pub developer: Option<String>,
    pub publisher: Option<String>,
    pub genre: Option<String>,
    pub images: Option<Vec<String>>,

    pub created_at: Option<DateTime<Utc>>,
}

impl Game {
    /// A record is "enriched" once `description` has been set, even to the
    /// empty-string sentinel meaning "provider had no hit" (spec.md I2).
    pub fn is_enriched(&self) -> bool {
        self.description.is_some()
    }
}

/// The subset of enrichment fields an enrich worker writes back after a
/// metadata lookup (spec.md §4.3, `updateFields`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentFields {
    pub description: Option<String>,
    pub rating: Option<f64>,
    pub release_date: Option<NaiveDate>,
    pub developer: Option<String>,
    pub publisher: Option<String>,
    pub genre: Option<String>,
    pub images: Option<Vec<String>>,
}

/// A single search-log row (spec.md §3, "Search-log record").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchLogEntry {
    pub query: String,
    pub results: i64,
    pub searched_at: DateTime<Utc>,
}

/// Run mode for a pipeline pass (spec.md §3, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Incremental,
    Clean,
}

impl Default for RunMode {
    fn default() -> Self {
        RunMode::Incremental
    }
}

/// The persisted scheduler document (spec.md §3, "Scheduler configuration").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub mode: RunMode,
    pub expression: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: RunMode::Incremental,
            expression: "0 3 * * *".to_string(),
        }
    }
}

/// Pipeline run status (spec.md §3, "Pipeline state").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Idle,
    Running,
    Done,
    Error,
}

/// Longest number of log lines retained in the in-memory ring (spec.md §3).
const LOG_RING_CAPACITY: usize = 1000;

/// Process-wide, observable pipeline state (spec.md §3 and §5). Shared via
/// `Arc` between the orchestrator, the crawler, and the enrich workers:
/// every field is independently synchronized so concurrent writers from
/// different tasks never block each other on unrelated fields (spec.md §5,
/// "readers may observe any consistent-per-field view").
pub struct PipelineState {
    status: RwLock<PipelineStatus>,
    mode: RwLock<RunMode>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    ended_at: RwLock<Option<DateTime<Utc>>>,
    scrape_total: AtomicI64,
    scrape_new: AtomicI64,
    queue_size: AtomicI64,
    enriched: AtomicI64,
    indexed: AtomicI64,
    scrape_complete: AtomicBool,
    cancelled: AtomicBool,
    logs: Mutex<VecDeque<String>>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            status: RwLock::new(PipelineStatus::Idle),
            mode: RwLock::new(RunMode::Incremental),
            started_at: RwLock::new(None),
            ended_at: RwLock::new(None),
            scrape_total: AtomicI64::new(0),
            scrape_new: AtomicI64::new(0),
            queue_size: AtomicI64::new(0),
            enriched: AtomicI64::new(0),
            indexed: AtomicI64::new(0),
            scrape_complete: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            logs: Mutex::new(VecDeque::with_capacity(LOG_RING_CAPACITY)),
        }
    }
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset every field for a new run (spec.md §3, "A new run resets all fields").
    pub async fn reset(&self, mode: RunMode) {
        *self.status.write().await = PipelineStatus::Running;
        *self.mode.write().await = mode;
        *self.started_at.write().await = Some(Utc::now());
        *self.ended_at.write().await = None;
        self.scrape_total.store(0, Ordering::SeqCst);
        self.scrape_new.store(0, Ordering::SeqCst);
        self.queue_size.store(0, Ordering::SeqCst);
        self.enriched.store(0, Ordering::SeqCst);
        self.indexed.store(0, Ordering::SeqCst);
        self.scrape_complete.store(false, Ordering::SeqCst);
        self.cancelled.store(false, Ordering::SeqCst);
        self.logs.lock().await.clear();
    }

    pub async fn finish(&self, status: PipelineStatus) {
        *self.status.write().await = status;
        *self.ended_at.write().await = Some(Utc::now());
    }

    pub fn signal_cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn set_scrape_complete(&self) {
        self.scrape_complete.store(true, Ordering::SeqCst);
    }

    pub fn scrape_complete(&self) -> bool {
        self.scrape_complete.load(Ordering::SeqCst)
    }

    pub fn incr_scrape_total(&self) {
        self.scrape_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn incr_scrape_new(&self) {
        self.scrape_new.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_queue_size(&self, n: i64) {
        self.queue_size.store(n, Ordering::SeqCst);
    }

    pub fn incr_enriched(&self, n: i64) {
        self.enriched.fetch_add(n, Ordering::SeqCst);
    }

    pub fn incr_indexed(&self, n: i64) {
        self.indexed.fetch_add(n, Ordering::SeqCst);
    }

    /// Append one line to the bounded log ring, dropping the oldest line
    /// once the ring is full.
    pub async fn log(&self, line: impl Into<String>) {
        let mut logs = self.logs.lock().await;
        if logs.len() >= LOG_RING_CAPACITY {
            logs.pop_front();
        }
        logs.push_back(line.into());
    }

    pub async fn snapshot(&self) -> PipelineStateSnapshot {
        PipelineStateSnapshot {
            status: *self.status.read().await,
            mode: *self.mode.read().await,
            started_at: *self.started_at.read().await,
            ended_at: *self.ended_at.read().await,
            scrape_total: self.scrape_total.load(Ordering::SeqCst),
            scrape_new: self.scrape_new.load(Ordering::SeqCst),
            queue_size: self.queue_size.load(Ordering::SeqCst),
            enriched: self.enriched.load(Ordering::SeqCst),
            indexed: self.indexed.load(Ordering::SeqCst),
            scrape_complete: self.scrape_complete(),
            cancelled: self.is_cancelled(),
            logs: self.logs.lock().await.iter().cloned().collect(),
        }
    }

    pub async fn status(&self) -> PipelineStatus {
        *self.status.read().await
    }
}

/// Cheap, serializable read of [`PipelineState`] for admin handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStateSnapshot {
    pub status: PipelineStatus,
    pub mode: RunMode,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub scrape_total: i64,
    pub scrape_new: i64,
    pub queue_size: i64,
    pub enriched: i64,
    pub indexed: i64,
    pub scrape_complete: bool,
    pub cancelled: bool,
    pub logs: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reset_clears_counters_and_logs() {
        let state = PipelineState::new();
        state.incr_scrape_total();
        state.log("boot").await;
        state.reset(RunMode::Clean).await;

        let snap = state.snapshot().await;
        assert_eq!(snap.scrape_total, 0);
        assert!(snap.logs.is_empty());
        assert_eq!(snap.status, PipelineStatus::Running);
        assert_eq!(snap.mode, RunMode::Clean);
    }

    #[tokio::test]
    async fn cancellation_flag_is_observable_across_clones() {
        let state = std::sync::Arc::new(PipelineState::new());
        let other = state.clone();
        assert!(!state.is_cancelled());
        other.signal_cancel();
        assert!(state.is_cancelled());
    }

    #[tokio::test]
    async fn log_ring_drops_oldest_past_capacity() {
        let state = PipelineState::new();
        for i in 0..(LOG_RING_CAPACITY + 10) {
            state.log(format!("line {i}")).await;
        }
        let snap = state.snapshot().await;
        assert_eq!(snap.logs.len(), LOG_RING_CAPACITY);
        assert_eq!(snap.logs.first().unwrap(), "line 10");
    }
}
