//! Intention cache
//!
//! Processed intentions wait here, in arrival order, until the next bundle.
//! Draining is two-phase: the sequencer takes a snapshot, persists it, and
//! only then commits the first `n` entries away. Anything appended while the
//! bundle was being persisted stays queued for the next cycle.

use std::sync::Arc;

use tokio::sync::RwLock;

use tessera_types::ProcessedIntention;

#[derive(Clone, Default)]
pub struct IntentionCache {
    entries: Arc<RwLock<Vec<ProcessedIntention>>>,
}

impl IntentionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, intention: ProcessedIntention) {
        self.entries.write().await.push(intention);
    }

    /// Append several entries back to back, with nothing interleaved
    pub async fn append_all(&self, intentions: impl IntoIterator<Item = ProcessedIntention>) {
        self.entries.write().await.extend(intentions);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Copy of every queued entry, oldest first
    pub async fn snapshot(&self) -> Vec<ProcessedIntention> {
        self.entries.read().await.clone()
    }

    /// Drop the first `n` entries after they were persisted
    pub async fn commit(&self, n: usize) {
        let mut entries = self.entries.write().await;
        let n = n.min(entries.len());
        entries.drain(..n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tessera_types::{ActionKind, Address, Intention, IntentionId};

    fn processed(nonce: u64) -> ProcessedIntention {
        ProcessedIntention {
            id: IntentionId::new(),
            action: ActionKind::CreateVault,
            controller: Address::zero(),
            signature: "0x".to_string(),
            intention: Intention {
                action: ActionKind::CreateVault,
                nonce,
                inputs: Vec::new(),
                outputs: Vec::new(),
                vault_id: None,
                update: None,
                rules: None,
            },
            proofs: Vec::new(),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_commit_keeps_late_arrivals() {
        let cache = IntentionCache::new();
        cache.append(processed(1)).await;
        cache.append(processed(2)).await;

        let snapshot = cache.snapshot().await;
        cache.append(processed(3)).await;
        cache.commit(snapshot.len()).await;

        let left = cache.snapshot().await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].intention.nonce, 3);
    }

    #[tokio::test]
    async fn test_append_all_keeps_entries_together() {
        let cache = IntentionCache::new();
        let tasks: Vec<_> = (0..10u64)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    cache.append_all([processed(i), processed(i)]).await;
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let entries = cache.snapshot().await;
        assert_eq!(entries.len(), 20);
        for pair in entries.chunks(2) {
            assert_eq!(pair[0].intention.nonce, pair[1].intention.nonce);
        }
    }

    #[tokio::test]
    async fn test_commit_past_end() {
        let cache = IntentionCache::new();
        cache.append(processed(1)).await;
        cache.commit(5).await;
        assert!(cache.is_empty().await);
    }
}
