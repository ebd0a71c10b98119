//! In-memory task record store.
//!
//! All state lives behind a single async mutex, which makes `claim_next` a
//! true compare-and-set: the selection, the state flip, and the ownership
//! stamp happen under one critical section, so concurrent workers can never
//! observe the same record as claimable. A `BTreeSet` keyed by
//! `(run_at, id)` gives claim-order iteration without scanning.

use super::{StoreStats, TaskStore};
use crate::config::StoreSettings;
use crate::error::{ForgeError, ForgeResult};
use crate::record::{Outcome, RecordId, TaskRecord, TaskState};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::time::SystemTime;
use tokio::sync::Mutex;

#[derive(Default)]
struct StoreInner {
    records: HashMap<RecordId, TaskRecord>,
    /// Claim-order index over `ready` records.
    ready: BTreeSet<(SystemTime, RecordId)>,
    total_enqueued: u64,
}

/// Store backend holding every record in process memory.
pub struct InMemoryStore {
    inner: Mutex<StoreInner>,
    settings: StoreSettings,
}

impl InMemoryStore {
    /// Create a store with default settings.
    pub fn new() -> Self {
        Self::with_settings(StoreSettings::default())
    }

    /// Create a store with custom settings.
    pub fn with_settings(settings: StoreSettings) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            settings,
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn enqueue(&self, mut record: TaskRecord) -> ForgeResult<RecordId> {
        let mut inner = self.inner.lock().await;

        if self.settings.max_records > 0 && inner.records.len() >= self.settings.max_records {
            return Err(ForgeError::storage_msg(format!(
                "store is full (max records: {})",
                self.settings.max_records
            )));
        }

        record.state = TaskState::Ready;
        let id = record.id;
        inner.ready.insert((record.run_at, id));
        inner.records.insert(id, record);
        inner.total_enqueued += 1;

        tracing::debug!(record = %id, "enqueued task record");
        Ok(id)
    }

    async fn claim_next(
        &self,
        now: SystemTime,
        process_tag: &str,
    ) -> ForgeResult<Option<TaskRecord>> {
        let mut inner = self.inner.lock().await;

        // The index is ordered by (run_at, id), so the first entry is the
        // claim candidate; if its run_at is in the future, nothing is.
        let candidate = match inner.ready.iter().next().copied() {
            Some((run_at, id)) if run_at <= now => (run_at, id),
            _ => return Ok(None),
        };

        inner.ready.remove(&candidate);
        let (_, id) = candidate;
        let record = inner
            .records
            .get_mut(&id)
            .ok_or_else(|| ForgeError::storage_msg(format!("ready index out of sync: {id}")))?;

        record.state = TaskState::Busy;
        record.process_tag = Some(process_tag.to_string());
        record.started_at = Some(now);
        record.attempts += 1;

        tracing::debug!(record = %id, worker = process_tag, "claimed task record");
        Ok(Some(record.clone()))
    }

    async fn finalize(
        &self,
        id: RecordId,
        outcome: Outcome,
        process_tag: &str,
    ) -> ForgeResult<()> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .records
            .get_mut(&id)
            .ok_or(ForgeError::RecordNotFound { id: id.to_string() })?;

        if record.state != TaskState::Busy {
            return Err(ForgeError::InvalidTransition {
                id: id.to_string(),
                detail: format!("finalize requires busy, record is {}", record.state),
            });
        }
        if record.process_tag.as_deref() != Some(process_tag) {
            return Err(ForgeError::InvalidTransition {
                id: id.to_string(),
                detail: format!(
                    "claim is owned by {:?}, not '{process_tag}'",
                    record.process_tag
                ),
            });
        }

        let (state, result_kind, result) = outcome.into_parts();
        record.state = state;
        record.result_kind = Some(result_kind);
        record.result = Some(result);
        record.finished_at = Some(SystemTime::now());

        tracing::debug!(record = %id, state = %state, "finalized task record");
        Ok(())
    }

    async fn requeue_stale(&self, cutoff: SystemTime) -> ForgeResult<u64> {
        let mut inner = self.inner.lock().await;
        let stale: Vec<RecordId> = inner
            .records
            .values()
            .filter(|r| {
                r.state == TaskState::Busy && r.started_at.is_some_and(|t| t < cutoff)
            })
            .map(|r| r.id)
            .collect();

        let count = stale.len() as u64;
        for id in stale {
            if let Some(record) = inner.records.get_mut(&id) {
                record.state = TaskState::Ready;
                record.process_tag = None;
                record.started_at = None;
                record.attempts += 1;
                let key = (record.run_at, record.id);
                inner.ready.insert(key);
                tracing::warn!(record = %id, "requeued stale claim");
            }
        }

        Ok(count)
    }

    async fn find_ready(&self, now: SystemTime) -> ForgeResult<Vec<TaskRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .ready
            .iter()
            .take_while(|(run_at, _)| *run_at <= now)
            .filter_map(|(_, id)| inner.records.get(id).cloned())
            .collect())
    }

    async fn get(&self, id: RecordId) -> ForgeResult<Option<TaskRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.records.get(&id).cloned())
    }

    async fn cancel(&self, id: RecordId) -> ForgeResult<()> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .records
            .get(&id)
            .ok_or(ForgeError::RecordNotFound { id: id.to_string() })?;

        if record.state != TaskState::Ready {
            return Err(ForgeError::InvalidTransition {
                id: id.to_string(),
                detail: format!("cancel requires ready, record is {}", record.state),
            });
        }

        let key = (record.run_at, record.id);
        inner.ready.remove(&key);
        inner.records.remove(&id);

        tracing::debug!(record = %id, "cancelled task record");
        Ok(())
    }

    async fn stats(&self) -> ForgeResult<StoreStats> {
        let inner = self.inner.lock().await;
        let mut stats = StoreStats {
            total_enqueued: inner.total_enqueued,
            ..Default::default()
        };
        for record in inner.records.values() {
            match record.state {
                TaskState::Ready => stats.ready += 1,
                TaskState::Busy => stats.busy += 1,
                TaskState::Complete => stats.complete += 1,
                TaskState::Error => stats.error += 1,
            }
        }
        Ok(stats)
    }

    async fn purge(&self) -> ForgeResult<u64> {
        let mut inner = self.inner.lock().await;
        let purged = inner.records.len() as u64;
        inner.records.clear();
        inner.ready.clear();
        tracing::warn!(count = purged, "purged all task records");
        Ok(purged)
    }

    async fn health_check(&self) -> ForgeResult<()> {
        let inner = self.inner.lock().await;
        for (run_at, id) in &inner.ready {
            match inner.records.get(id) {
                Some(record) if record.state == TaskState::Ready && record.run_at == *run_at => {}
                _ => {
                    return Err(ForgeError::storage_msg(format!(
                        "ready index entry {id} does not match a ready record"
                    )));
                }
            }
        }
        Ok(())
    }
}
