//! Persistent store contract
//!
//! The core only needs append-only tables for classifications and
//! transformation results; no update or delete is ever invoked. The audit
//! ledger keeps its own strictly-ordered table (see [`crate::ledger`]).

use crate::classify::Classification;
use crate::error::Result;
use crate::transform::TransformationResult;
use async_trait::async_trait;
use tokio::sync::RwLock;

/// Append-only persistence contract consumed by the orchestrator
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Append one classification (with its detection)
    async fn append_classification(&self, classification: &Classification) -> Result<()>;

    /// Append one transformation result
    async fn append_result(&self, result: &TransformationResult) -> Result<()>;
}

/// In-memory store used by tests and the CLI shell
#[derive(Default)]
pub struct MemoryStore {
    classifications: RwLock<Vec<Classification>>,
    results: RwLock<Vec<TransformationResult>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of stored classifications
    pub async fn classifications(&self) -> Vec<Classification> {
        self.classifications.read().await.clone()
    }

    /// Snapshot of stored transformation results
    pub async fn results(&self) -> Vec<TransformationResult> {
        self.results.read().await.clone()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn append_classification(&self, classification: &Classification) -> Result<()> {
        self.classifications.write().await.push(classification.clone());
        Ok(())
    }

    async fn append_result(&self, result: &TransformationResult) -> Result<()> {
        self.results.write().await.push(result.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::SensitivityTier;
    use crate::detect::{Detection, PiiCategory, Span};

    #[tokio::test]
    async fn test_memory_store_appends() {
        let store = MemoryStore::new();
        let classification = Classification {
            detection: Detection {
                record_id: "r-1".to_string(),
                field_name: "email".to_string(),
                category: PiiCategory::Email,
                confidence: 1.0,
                span: Span { start: 0, end: 7 },
                value: "a@x.com".to_string(),
            },
            tier: SensitivityTier::Direct,
        };
        store.append_classification(&classification).await.unwrap();
        store.append_classification(&classification).await.unwrap();
        assert_eq!(store.classifications().await.len(), 2);
        assert!(store.results().await.is_empty());
    }
}
