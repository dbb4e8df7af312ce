//! The enrichment queue (spec.md §5): a single multi-producer /
//! multi-consumer queue the crawler pushes into and enrich workers drain
//! from. `drain_batch` is the `splice(0, n)` spec calls for — it locks
//! once and removes up to `n` items atomically with respect to other
//! consumers.

use std::collections::VecDeque;

use tokio::sync::Mutex;

/// One item queued for metadata enrichment: the store row id and the
/// parsed game name to search the provider with.
#[derive(Debug, Clone)]
pub struct EnrichItem {
    pub id: i64,
    pub game_name: String,
}

#[derive(Default)]
pub struct EnrichQueue {
    items: Mutex<VecDeque<EnrichItem>>,
}

impl EnrichQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, item: EnrichItem) {
        self.items.lock().await.push_back(item);
    }

    pub async fn push_many(&self, items: impl IntoIterator<Item = EnrichItem>) {
        self.items.lock().await.extend(items);
    }

    /// Remove up to `n` items from the front, atomically.
    pub async fn drain_batch(&self, n: usize) -> Vec<EnrichItem> {
        let mut guard = self.items.lock().await;
        let take = n.min(guard.len());
        guard.drain(..take).collect()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
