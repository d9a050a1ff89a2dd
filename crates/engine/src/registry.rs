//! Process-wide service objects shared across task groups.
//!
//! Four independent concurrent maps, each behind its own lock: the task
//! group registry (live status and logs), the cancellation registry, the
//! upload cache, and the output gallery. Locks are held only for the
//! duration of one read or update, never across network calls, so
//! unrelated groups' workers are never blocked on each other.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use banana_core::artifact::OutputArtifact;
use banana_core::status::{GroupStatus, Progress};

/// How many log events a status snapshot carries.
pub const LOG_DISPLAY_TAIL: usize = 50;

/// One timestamped entry in a group's append-only log.
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub at: DateTime<Utc>,
    pub message: String,
}

impl LogEvent {
    fn now(message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            message: message.into(),
        }
    }
}

/// Mutable per-group record owned by the registry.
#[derive(Debug, Clone)]
pub struct GroupRecord {
    pub status: GroupStatus,
    /// Short human phrase describing the current state.
    pub status_line: String,
    pub upload: Progress,
    pub api: Progress,
    pub log: Vec<LogEvent>,
    pub created_at: DateTime<Utc>,
}

impl GroupRecord {
    /// Append a timestamped message to the group log.
    pub fn append(&mut self, message: impl Into<String>) {
        self.log.push(LogEvent::now(message));
    }
}

/// Read-only copy of a group's state handed to polling callers.
#[derive(Debug, Clone, Serialize)]
pub struct GroupSnapshot {
    pub group_id: Uuid,
    pub status: GroupStatus,
    pub status_line: String,
    pub upload: Progress,
    pub api: Progress,
    /// Bounded tail of the group log, oldest first.
    pub log: Vec<LogEvent>,
}

/// Live status of every task group in the process.
#[derive(Default)]
pub struct TaskGroupRegistry {
    groups: RwLock<HashMap<Uuid, GroupRecord>>,
}

impl TaskGroupRegistry {
    /// Register a freshly submitted group with zeroed progress.
    pub async fn create(&self, group_id: Uuid) {
        let record = GroupRecord {
            status: GroupStatus::Created,
            status_line: GroupStatus::Created.label(),
            upload: Progress::default(),
            api: Progress::default(),
            log: Vec::new(),
            created_at: Utc::now(),
        };
        self.groups.write().await.insert(group_id, record);
    }

    /// Mutate one group's record under the registry lock.
    ///
    /// Unknown ids are ignored; the closure runs synchronously while the
    /// lock is held, so it must not block.
    pub async fn update(&self, group_id: Uuid, mutate: impl FnOnce(&mut GroupRecord)) {
        if let Some(record) = self.groups.write().await.get_mut(&group_id) {
            mutate(record);
        }
    }

    /// Append one log line to a group.
    pub async fn append_log(&self, group_id: Uuid, message: impl Into<String>) {
        let message = message.into();
        self.update(group_id, |record| record.append(message)).await;
    }

    /// Snapshot one group, log capped to [`LOG_DISPLAY_TAIL`].
    pub async fn snapshot(&self, group_id: Uuid) -> Option<GroupSnapshot> {
        self.groups
            .read()
            .await
            .get(&group_id)
            .map(|record| snapshot_of(group_id, record))
    }

    /// Snapshot every group, most recently created first.
    pub async fn snapshot_all(&self) -> Vec<GroupSnapshot> {
        let groups = self.groups.read().await;
        let mut entries: Vec<(&Uuid, &GroupRecord)> = groups.iter().collect();
        entries.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at));
        entries
            .into_iter()
            .map(|(id, record)| snapshot_of(*id, record))
            .collect()
    }
}

fn snapshot_of(group_id: Uuid, record: &GroupRecord) -> GroupSnapshot {
    let tail_start = record.log.len().saturating_sub(LOG_DISPLAY_TAIL);
    GroupSnapshot {
        group_id,
        status: record.status,
        status_line: record.status_line.clone(),
        upload: record.upload,
        api: record.api,
        log: record.log[tail_start..].to_vec(),
    }
}

/// Per-group cooperative cancellation flags.
#[derive(Default)]
pub struct CancellationRegistry {
    tokens: RwLock<HashMap<Uuid, CancellationToken>>,
}

impl CancellationRegistry {
    /// Create and store a token for a new group.
    pub async fn register(&self, group_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.write().await.insert(group_id, token.clone());
        token
    }

    /// Trigger one group's token. Returns false for unknown groups.
    pub async fn cancel(&self, group_id: Uuid) -> bool {
        match self.tokens.read().await.get(&group_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Trigger every registered token and return the affected ids.
    pub async fn cancel_all(&self) -> Vec<Uuid> {
        let tokens = self.tokens.read().await;
        let mut ids = Vec::with_capacity(tokens.len());
        for (id, token) in tokens.iter() {
            token.cancel();
            ids.push(*id);
        }
        ids
    }

    /// Drop a group's token once its run finishes (any outcome), so the
    /// map does not leak entries.
    pub async fn remove(&self, group_id: Uuid) {
        self.tokens.write().await.remove(&group_id);
    }

    /// Whether no tokens are registered.
    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }
}

/// Process-wide memo of completed uploads, shared across all task groups.
///
/// Write-through, last writer wins; uploads are idempotent per asset so a
/// racing duplicate is harmless. Lives until explicitly cleared.
#[derive(Default)]
pub struct UploadCache {
    entries: RwLock<HashMap<PathBuf, String>>,
}

impl UploadCache {
    /// Remote reference for an asset, if it was uploaded before.
    pub async fn get(&self, path: &Path) -> Option<String> {
        self.entries.read().await.get(path).cloned()
    }

    /// Record a completed upload.
    pub async fn insert(&self, path: PathBuf, url: String) {
        self.entries.write().await.insert(path, url);
    }

    /// Drop every cached reference, returning how many were held.
    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        count
    }

    /// Number of cached references.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Append-only list of every artifact produced by any group.
#[derive(Default)]
pub struct OutputGallery {
    artifacts: RwLock<Vec<OutputArtifact>>,
}

impl OutputGallery {
    /// Append one saved artifact.
    pub async fn push(&self, artifact: OutputArtifact) {
        self.artifacts.write().await.push(artifact);
    }

    /// Copy of the full artifact list, in completion order.
    pub async fn snapshot(&self) -> Vec<OutputArtifact> {
        self.artifacts.read().await.clone()
    }

    /// Drop every artifact record, returning how many were held.
    pub async fn clear(&self) -> usize {
        let mut artifacts = self.artifacts.write().await;
        let count = artifacts.len();
        artifacts.clear();
        count
    }
}

/// The four shared services, bundled for injection into the engine.
///
/// Constructed once per process; tests build fresh instances to stay
/// isolated.
#[derive(Clone, Default)]
pub struct EngineServices {
    pub registry: Arc<TaskGroupRegistry>,
    pub cancellations: Arc<CancellationRegistry>,
    pub upload_cache: Arc<UploadCache>,
    pub gallery: Arc<OutputGallery>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
