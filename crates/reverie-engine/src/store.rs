//! Fault-tolerant facade over a repository
//!
//! Every call is bounded by a timeout. Failures are logged and replaced by a
//! safe default (empty list, zero count, no weights) so the loop keeps going.

use crate::repository::Repository;
use chrono::{DateTime, Utc};
use reverie_core::{
    AxisScores, CoreBelief, MemoryKind, MemoryRecord, Result, SignificantThought, UnresolvedIdea,
    WeightHistoryRow,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct Store {
    repo: Arc<dyn Repository>,
    timeout: Duration,
}

impl Store {
    pub fn new(repo: Arc<dyn Repository>, timeout: Duration) -> Self {
        Self { repo, timeout }
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    async fn guard<T>(&self, operation: &str, fut: impl Future<Output = Result<T>>, fallback: T) -> T {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                warn!("Store {} failed: {} — using default", operation, e);
                fallback
            }
            Err(_) => {
                warn!(
                    "Store {} timed out after {}ms — using default",
                    operation,
                    self.timeout.as_millis()
                );
                fallback
            }
        }
    }

    /// Returns whether the record was persisted.
    pub async fn insert(&self, record: impl Into<MemoryRecord>) -> bool {
        self.guard("insert", async { self.repo.insert(record.into()).await.map(|_| true) }, false)
            .await
    }

    pub async fn list(&self, kind: MemoryKind, limit: usize) -> Vec<MemoryRecord> {
        self.guard("list", self.repo.list(kind, limit), Vec::new()).await
    }

    pub async fn oldest(
        &self,
        kind: MemoryKind,
        older_than: DateTime<Utc>,
        min_confidence: f64,
        limit: usize,
    ) -> Vec<MemoryRecord> {
        self.guard("oldest", self.repo.oldest(kind, older_than, min_confidence, limit), Vec::new())
            .await
    }

    pub async fn delete(&self, kind: MemoryKind, ids: &[String]) -> usize {
        if ids.is_empty() {
            return 0;
        }
        self.guard("delete", self.repo.delete(kind, ids), 0).await
    }

    pub async fn delete_older_than(&self, kind: MemoryKind, cutoff: DateTime<Utc>) -> usize {
        self.guard("delete_older_than", self.repo.delete_older_than(kind, cutoff), 0).await
    }

    pub async fn append_weights(&self, row: WeightHistoryRow) -> bool {
        self.guard("append_weights", async { self.repo.append_weights(row).await.map(|_| true) }, false)
            .await
    }

    pub async fn latest_weights(&self) -> Option<WeightHistoryRow> {
        self.guard("weight_history", self.repo.weight_history(1), Vec::new())
            .await
            .into_iter()
            .next()
    }

    pub async fn weight_history(&self, limit: usize) -> Vec<WeightHistoryRow> {
        self.guard("weight_history", self.repo.weight_history(limit), Vec::new()).await
    }

    pub async fn append_scores(&self, scores: AxisScores) -> bool {
        self.guard("append_scores", async { self.repo.append_scores(scores).await.map(|_| true) }, false)
            .await
    }

    pub async fn score_history(&self, limit: usize) -> Vec<AxisScores> {
        self.guard("score_history", self.repo.score_history(limit), Vec::new()).await
    }

    // Typed views

    pub async fn ideas(&self, limit: usize) -> Vec<UnresolvedIdea> {
        self.list(MemoryKind::UnresolvedIdea, limit)
            .await
            .into_iter()
            .filter_map(|r| match r {
                MemoryRecord::UnresolvedIdea(i) => Some(i),
                _ => None,
            })
            .collect()
    }

    pub async fn thoughts(&self, limit: usize) -> Vec<SignificantThought> {
        self.list(MemoryKind::SignificantThought, limit)
            .await
            .into_iter()
            .filter_map(|r| match r {
                MemoryRecord::SignificantThought(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub async fn beliefs(&self, limit: usize) -> Vec<CoreBelief> {
        self.list(MemoryKind::CoreBelief, limit)
            .await
            .into_iter()
            .filter_map(|r| match r {
                MemoryRecord::CoreBelief(b) => Some(b),
                _ => None,
            })
            .collect()
    }
}
