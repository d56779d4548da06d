//! JSON snapshot file repository
//!
//! The whole memory lives in one JSON document. Every mutation rewrites it
//! through a tmp file and a rename, so a crash leaves either the old or the
//! new snapshot on disk, never a torn one.

use crate::repository::{MemorySnapshot, Repository};
use chrono::{DateTime, Utc};
use reverie_core::{AxisScores, Error, MemoryKind, MemoryRecord, Result, WeightHistoryRow};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct JsonFileRepository {
    path: PathBuf,
    state: RwLock<MemorySnapshot>,
}

impl JsonFileRepository {
    /// Open the snapshot at `path`. A missing file starts empty; an unreadable
    /// one is moved aside to `<path>.corrupt` and also starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<MemorySnapshot>(&content) {
                Ok(s) => {
                    info!(
                        "Loaded memory snapshot from {} ({} records)",
                        path.display(),
                        s.records.len()
                    );
                    s
                }
                Err(e) => {
                    let aside = path.with_extension("json.corrupt");
                    warn!(
                        "Failed to parse {}: {} — moving to {} and starting empty",
                        path.display(),
                        e,
                        aside.display()
                    );
                    tokio::fs::rename(&path, &aside).await?;
                    MemorySnapshot::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No memory snapshot at {} — starting empty", path.display());
                MemorySnapshot::default()
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        Ok(Self { path, state: RwLock::new(snapshot) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> MemorySnapshot {
        self.state.read().await.clone()
    }

    /// Apply `f` to a copy and keep it only once it is on disk.
    async fn mutate<T>(&self, operation: &str, f: impl FnOnce(&mut MemorySnapshot) -> T) -> Result<T> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let out = f(&mut next);
        checkpoint(&self.path, &next)
            .await
            .map_err(|e| Error::repository(operation, e.to_string()))?;
        *state = next;
        Ok(out)
    }
}

async fn checkpoint(path: &Path, snapshot: &MemorySnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    debug!("Checkpointed memory to {} ({} bytes)", path.display(), json.len());
    Ok(())
}

#[async_trait::async_trait]
impl Repository for JsonFileRepository {
    async fn insert(&self, record: MemoryRecord) -> Result<()> {
        self.mutate("insert", |s| s.insert(record)).await
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
        if ids.is_empty() {
            return Ok(0);
        }
        self.mutate("delete", |s| s.delete(kind, ids)).await
    }

    async fn delete_older_than(&self, kind: MemoryKind, cutoff: DateTime<Utc>) -> Result<usize> {
        self.mutate("delete_older_than", |s| s.delete_older_than(kind, cutoff)).await
    }

    async fn append_weights(&self, row: WeightHistoryRow) -> Result<()> {
        self.mutate("append_weights", |s| s.weight_history.push(row)).await
    }

    async fn weight_history(&self, limit: usize) -> Result<Vec<WeightHistoryRow>> {
        Ok(self.state.read().await.weight_history(limit))
    }

    async fn append_scores(&self, scores: AxisScores) -> Result<()> {
        self.mutate("append_scores", |s| s.score_history.push(scores)).await
    }

    async fn score_history(&self, limit: usize) -> Result<Vec<AxisScores>> {
        Ok(self.state.read().await.score_history(limit))
    }
}
