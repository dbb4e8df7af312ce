//! The orchestrator-facing seam (spec.md §9, "cycle in ownership"): the
//! scheduler and the admin router both need to start/stop/observe a pipeline
//! run, but neither owns the orchestrator's concrete wiring (store, index,
//! metadata, crawler, enrich pool). They depend on this trait instead of on
//! `catalog-pipeline` directly, which keeps the crate graph acyclic.

use async_trait::async_trait;

use crate::model::{PipelineStateSnapshot, RunMode};
use crate::Result;

#[async_trait]
pub trait PipelineRunner: Send + Sync {
    /// Start a run in the given mode. Fails with [`crate::Error::AlreadyRunning`]
    /// if a run is already in progress (spec §4.8).
    async fn start(&self, mode: RunMode) -> Result<()>;

    /// Request cancellation of the in-progress run (spec §4.8 `stopPipeline`).
    /// A no-op if nothing is running.
    fn request_stop(&self);

    /// A cheap, serializable read of the current pipeline state.
    async fn snapshot(&self) -> PipelineStateSnapshot;
}
