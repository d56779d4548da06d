//! Persistence contract and the in-memory backend
//!
//! The repository is keyed by record kind, id and timestamp. `insert` replaces
//! a record with the same id, which is how beliefs are strengthened in place.
//! Lists come back newest first; `oldest` comes back oldest first.

use chrono::{DateTime, Utc};
use reverie_core::{AxisScores, MemoryKind, MemoryRecord, Result, WeightHistoryRow};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[async_trait::async_trait]
pub trait Repository: Send + Sync {
    async fn insert(&self, record: MemoryRecord) -> Result<()>;

    /// Up to `limit` records of `kind`, newest first.
    async fn list(&self, kind: MemoryKind, limit: usize) -> Result<Vec<MemoryRecord>>;

    /// Up to `limit` records of `kind` created before `older_than` whose
    /// confidence (or importance/strength) is at least `min_confidence`, oldest first.
    async fn oldest(
        &self,
        kind: MemoryKind,
        older_than: DateTime<Utc>,
        min_confidence: f64,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>>;

    /// Delete records by id. Returns how many existed.
    async fn delete(&self, kind: MemoryKind, ids: &[String]) -> Result<usize>;

    /// Delete records created before `cutoff`. Returns how many were removed.
    async fn delete_older_than(&self, kind: MemoryKind, cutoff: DateTime<Utc>) -> Result<usize>;

    async fn append_weights(&self, row: WeightHistoryRow) -> Result<()>;

    /// Up to `limit` weight rows, newest first.
    async fn weight_history(&self, limit: usize) -> Result<Vec<WeightHistoryRow>>;

    async fn append_scores(&self, scores: AxisScores) -> Result<()>;

    /// Up to `limit` score rows, newest first.
    async fn score_history(&self, limit: usize) -> Result<Vec<AxisScores>>;
}

/// Everything a repository holds. Shared by the in-memory and file backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySnapshot {
    pub records: Vec<MemoryRecord>,
    pub weight_history: Vec<WeightHistoryRow>,
    pub score_history: Vec<AxisScores>,
}

impl MemorySnapshot {
    pub fn insert(&mut self, record: MemoryRecord) {
        match self.records.iter_mut().find(|r| r.id() == record.id()) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    pub fn list(&self, kind: MemoryKind, limit: usize) -> Vec<MemoryRecord> {
        let mut out: Vec<MemoryRecord> = self.records.iter().filter(|r| r.kind() == kind).cloned().collect();
        out.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        out.truncate(limit);
        out
    }

    pub fn oldest(
        &self,
        kind: MemoryKind,
        older_than: DateTime<Utc>,
        min_confidence: f64,
        limit: usize,
    ) -> Vec<MemoryRecord> {
        let mut out: Vec<MemoryRecord> = self
            .records
            .iter()
            .filter(|r| r.kind() == kind && r.created_at() < older_than && r.weight() >= min_confidence)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.created_at());
        out.truncate(limit);
        out
    }

    pub fn delete(&mut self, kind: MemoryKind, ids: &[String]) -> usize {
        let before = self.records.len();
        self.records.retain(|r| !(r.kind() == kind && ids.iter().any(|id| id == r.id())));
        before - self.records.len()
    }

    pub fn delete_older_than(&mut self, kind: MemoryKind, cutoff: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|r| !(r.kind() == kind && r.created_at() < cutoff));
        before - self.records.len()
    }

    pub fn weight_history(&self, limit: usize) -> Vec<WeightHistoryRow> {
        self.weight_history.iter().rev().take(limit).cloned().collect()
    }

    pub fn score_history(&self, limit: usize) -> Vec<AxisScores> {
        self.score_history.iter().rev().take(limit).cloned().collect()
    }

    pub fn count(&self, kind: MemoryKind) -> usize {
        self.records.iter().filter(|r| r.kind() == kind).count()
    }
}

/// Process-local repository. Contents are lost on exit.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: RwLock<MemorySnapshot>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: MemorySnapshot) -> Self {
        Self { state: RwLock::new(snapshot) }
    }

    pub async fn snapshot(&self) -> MemorySnapshot {
        self.state.read().await.clone()
    }
}

#[async_trait::async_trait]
impl Repository for InMemoryRepository {
    async fn insert(&self, record: MemoryRecord) -> Result<()> {
        self.state.write().await.insert(record);
        Ok(())
    }

    async fn list(&self, kind: MemoryKind, limit: usize) -> Result<Vec<MemoryRecord>> {
        Ok(self.state.read().await.list(kind, limit))
    }

    async fn oldest(
        &self,
        kind: MemoryKind,
        older_than: DateTime<Utc>,
        min_confidence: f64,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        Ok(self.state.read().await.oldest(kind, older_than, min_confidence, limit))
    }

    async fn delete(&self, kind: MemoryKind, ids: &[String]) -> Result<usize> {
        Ok(self.state.write().await.delete(kind, ids))
    }

    async fn delete_older_than(&self, kind: MemoryKind, cutoff: DateTime<Utc>) -> Result<usize> {
        Ok(self.state.write().await.delete_older_than(kind, cutoff))
    }

    async fn append_weights(&self, row: WeightHistoryRow) -> Result<()> {
        self.state.write().await.weight_history.push(row);
        Ok(())
    }

    async fn weight_history(&self, limit: usize) -> Result<Vec<WeightHistoryRow>> {
        Ok(self.state.read().await.weight_history(limit))
    }

    async fn append_scores(&self, scores: AxisScores) -> Result<()> {
        self.state.write().await.score_history.push(scores);
        Ok(())
    }

    async fn score_history(&self, limit: usize) -> Result<Vec<AxisScores>> {
        Ok(self.state.read().await.score_history(limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use reverie_core::{Category, CoreBelief, SignificantThought, UnresolvedIdea};

    fn aged_thought(content: &str, confidence: f64, hours: i64) -> MemoryRecord {
        let mut t = SignificantThought::new(content, None, confidence);
        t.created_at = Utc::now() - Duration::hours(hours);
        t.into()
    }

    #[tokio::test]
    async fn insert_replaces_same_id() {
        let repo = InMemoryRepository::new();
        let mut belief = CoreBelief::new("Honesty builds trust", 0.5);
        repo.insert(belief.clone().into()).await.unwrap();
        belief.strength = 0.9;
        repo.insert(belief.clone().into()).await.unwrap();
        let all = repo.list(MemoryKind::CoreBelief, 10).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].weight(), 0.9);
    }

    #[tokio::test]
    async fn list_is_newest_first_and_limited() {
        let repo = InMemoryRepository::new();
        for h in [5, 1, 3] {
            repo.insert(aged_thought(&format!("t{}", h), 0.8, h)).await.unwrap();
        }
        let listed = repo.list(MemoryKind::SignificantThought, 2).await.unwrap();
        let texts: Vec<&str> = listed.iter().map(|r| r.text()).collect();
        assert_eq!(texts, vec!["t1", "t3"]);
    }

    #[tokio::test]
    async fn oldest_filters_age_and_confidence() {
        let repo = InMemoryRepository::new();
        repo.insert(aged_thought("old confident", 0.9, 10)).await.unwrap();
        repo.insert(aged_thought("old unsure", 0.2, 12)).await.unwrap();
        repo.insert(aged_thought("fresh", 0.9, 1)).await.unwrap();
        repo.insert(aged_thought("oldest confident", 0.8, 20)).await.unwrap();

        let cutoff = Utc::now() - Duration::hours(6);
        let got = repo.oldest(MemoryKind::SignificantThought, cutoff, 0.7, 10).await.unwrap();
        let texts: Vec<&str> = got.iter().map(|r| r.text()).collect();
        assert_eq!(texts, vec!["oldest confident", "old confident"]);
    }

    #[tokio::test]
    async fn delete_is_scoped_to_kind() {
        let repo = InMemoryRepository::new();
        let idea = UnresolvedIdea::new("q", Category::Social, 0.5);
        let id = idea.id.clone();
        repo.insert(idea.into()).await.unwrap();
        assert_eq!(repo.delete(MemoryKind::CoreBelief, &[id.clone()]).await.unwrap(), 0);
        assert_eq!(repo.delete(MemoryKind::UnresolvedIdea, &[id]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_older_than_cutoff() {
        let repo = InMemoryRepository::new();
        repo.insert(aged_thought("ancient", 0.9, 72)).await.unwrap();
        repo.insert(aged_thought("recent", 0.9, 2)).await.unwrap();
        let removed = repo
            .delete_older_than(MemoryKind::SignificantThought, Utc::now() - Duration::hours(48))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(repo.snapshot().await.count(MemoryKind::SignificantThought), 1);
    }

    #[tokio::test]
    async fn histories_are_newest_first() {
        let repo = InMemoryRepository::new();
        for v in 1..=3u64 {
            let mut w = reverie_core::AxisWeights::default_split();
            w.version = v;
            repo.append_weights(WeightHistoryRow::from_weights(&w, "manual", serde_json::Value::Null))
                .await
                .unwrap();
        }
        let rows = repo.weight_history(2).await.unwrap();
        assert_eq!(rows.iter().map(|r| r.version).collect::<Vec<_>>(), vec![3, 2]);
    }
}
