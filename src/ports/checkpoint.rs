//! Snapshot-based checkpoint store.
//!
//! Each checkpoint copies every readable text artifact in the tree into
//! memory. Binary, oversized and unreadable artifacts are skipped and left
//! alone by [`SnapshotCheckpointStore::restore`]. Only the newest snapshots
//! are kept. Commits are kept as an in-memory audit trail and optionally
//! appended to a JSONL journal.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CycleError, Result};
use crate::ports::journal::JsonlJournal;
use crate::ports::traits::{ArtifactStore, Checkpoint, CheckpointStore, CommitMetadata};
use crate::util::MAX_FILE_SIZE;

/// Snapshots retained by default: a pre/post pair for each of four turns.
pub const DEFAULT_MAX_SNAPSHOTS: usize = 8;

/// One committed change record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub id: String,
    pub message: String,
    pub metadata: CommitMetadata,
    pub committed_at: DateTime<Utc>,
}

struct Snapshot {
    checkpoint: Checkpoint,
    files: BTreeMap<String, String>,
    /// Present in the tree but not captured.
    skipped: BTreeSet<String>,
}

/// Checkpoints the artifact tree by copying it.
pub struct SnapshotCheckpointStore {
    artifacts: Arc<dyn ArtifactStore>,
    snapshots: Mutex<VecDeque<Snapshot>>,
    max_snapshots: usize,
    commits: Mutex<Vec<CommitRecord>>,
    journal: Option<JsonlJournal>,
}

impl SnapshotCheckpointStore {
    pub fn new(artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            artifacts,
            snapshots: Mutex::new(VecDeque::new()),
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            commits: Mutex::new(Vec::new()),
            journal: None,
        }
    }

    /// Also append commits to `journal`.
    pub fn with_journal(mut self, journal: JsonlJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Keep at most `max` snapshots, evicting the oldest.
    pub fn with_max_snapshots(mut self, max: usize) -> Self {
        self.max_snapshots = max.max(1);
        self
    }

    /// Retained checkpoints, oldest first.
    pub fn checkpoints(&self) -> Vec<Checkpoint> {
        self.snapshots
            .lock()
            .map(|s| s.iter().map(|snap| snap.checkpoint.clone()).collect())
            .unwrap_or_default()
    }

    /// Commits recorded so far, oldest first.
    pub fn commits(&self) -> Vec<CommitRecord> {
        self.commits.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Restore the tree to the state captured by checkpoint `id`.
    ///
    /// Artifacts created after the checkpoint are deleted. Artifacts the
    /// checkpoint skipped are never touched.
    pub async fn restore(&self, id: &str) -> Result<()> {
        let (files, skipped) = {
            let snapshots = self.lock_snapshots()?;
            snapshots
                .iter()
                .find(|s| s.checkpoint.id == id)
                .map(|s| (s.files.clone(), s.skipped.clone()))
                .ok_or_else(|| CycleError::invalid_state(format!("unknown checkpoint: {}", id)))?
        };

        for meta in self.artifacts.list().await? {
            if !files.contains_key(&meta.path) && !skipped.contains(&meta.path) {
                self.artifacts.delete(&meta.path).await?;
            }
        }
        for (path, content) in &files {
            self.artifacts.write(path, content).await?;
        }

        tracing::info!(checkpoint = %id, files = files.len(), "restored checkpoint");
        Ok(())
    }

    fn lock_snapshots(&self) -> Result<std::sync::MutexGuard<'_, VecDeque<Snapshot>>> {
        self.snapshots
            .lock()
            .map_err(|_| CycleError::invalid_state("checkpoint lock poisoned"))
    }
}

#[async_trait]
impl CheckpointStore for SnapshotCheckpointStore {
    async fn create_checkpoint(&self, label: &str) -> Result<Checkpoint> {
        let mut files = BTreeMap::new();
        let mut skipped = BTreeSet::new();
        for meta in self.artifacts.list().await? {
            if meta.size > MAX_FILE_SIZE {
                tracing::warn!(path = %meta.path, size = meta.size, "checkpoint skipped oversized artifact");
                skipped.insert(meta.path);
                continue;
            }
            match self.artifacts.read(&meta.path).await {
                Ok(Some(content)) => {
                    files.insert(meta.path, content);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(path = %meta.path, error = %err, "checkpoint skipped unreadable artifact");
                    skipped.insert(meta.path);
                }
            }
        }

        let checkpoint = Checkpoint {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.to_string(),
            created_at: Utc::now(),
        };
        tracing::debug!(
            checkpoint = %checkpoint.id,
            files = files.len(),
            skipped = skipped.len(),
            "checkpoint created"
        );

        let mut snapshots = self.lock_snapshots()?;
        snapshots.push_back(Snapshot {
            checkpoint: checkpoint.clone(),
            files,
            skipped,
        });
        while snapshots.len() > self.max_snapshots {
            if let Some(evicted) = snapshots.pop_front() {
                tracing::debug!(checkpoint = %evicted.checkpoint.id, "checkpoint evicted");
            }
        }

        Ok(checkpoint)
    }

    async fn commit_changes(&self, message: &str, metadata: CommitMetadata) -> Result<String> {
        let record = CommitRecord {
            id: uuid::Uuid::new_v4().to_string(),
            message: message.to_string(),
            metadata,
            committed_at: Utc::now(),
        };

        if let Some(ref journal) = self.journal {
            journal.append(&record)?;
        }

        let id = record.id.clone();
        self.commits
            .lock()
            .map_err(|_| CycleError::invalid_state("commit lock poisoned"))?
            .push(record);
        Ok(id)
    }
}
