//! Task record stores.
//!
//! A store is the single shared mutable resource of the system: it persists
//! records and mediates all concurrency between workers through the atomic
//! [`TaskStore::claim_next`] operation. Any backend with an atomic
//! compare-and-set can implement the trait; the crate ships an in-memory
//! store suitable for tests and single-process deployments.

use crate::config::StoreSettings;
use crate::error::ForgeResult;
use crate::record::{Outcome, RecordId, TaskRecord};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::SystemTime;

pub mod memory;
pub use memory::InMemoryStore;

/// Record counts per state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Records waiting to be claimed
    pub ready: u64,
    /// Records currently claimed
    pub busy: u64,
    /// Records finished successfully
    pub complete: u64,
    /// Records finished with a failure
    pub error: u64,
    /// Records ever enqueued
    pub total_enqueued: u64,
}

/// Durable persistence with atomic claim semantics.
///
/// Claim is the only operation requiring strict atomicity: two workers
/// calling [`TaskStore::claim_next`] concurrently must never both observe
/// the same record. Everything else may be ordinary read/write traffic.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new record in `ready`.
    async fn enqueue(&self, record: TaskRecord) -> ForgeResult<RecordId>;

    /// Atomically claim the next runnable record for `process_tag`.
    ///
    /// Selects the `ready` record with the smallest `(run_at, id)` whose
    /// `run_at` has passed, flips it to `busy`, stamps `started_at`, and
    /// increments `attempts`. Returns `None` when nothing is eligible.
    async fn claim_next(
        &self,
        now: SystemTime,
        process_tag: &str,
    ) -> ForgeResult<Option<TaskRecord>>;

    /// Move a claimed record to its terminal state.
    ///
    /// Rejected unless the record is `busy` and owned by `process_tag`, so
    /// a task that completes after being requeued by the sweeper is
    /// finalized at most once per claim.
    async fn finalize(
        &self,
        id: RecordId,
        outcome: Outcome,
        process_tag: &str,
    ) -> ForgeResult<()>;

    /// Return every `busy` record whose claim started before `cutoff` to
    /// `ready`, incrementing `attempts`. Idempotent; reports the count.
    async fn requeue_stale(&self, cutoff: SystemTime) -> ForgeResult<u64>;

    /// Snapshot of currently claimable records in claim order. Diagnostic.
    async fn find_ready(&self, now: SystemTime) -> ForgeResult<Vec<TaskRecord>>;

    /// Fetch a record by id.
    async fn get(&self, id: RecordId) -> ForgeResult<Option<TaskRecord>>;

    /// Delete a record that is still `ready`; fails once it has been
    /// claimed or finished.
    async fn cancel(&self, id: RecordId) -> ForgeResult<()>;

    /// Record counts per state.
    async fn stats(&self) -> ForgeResult<StoreStats>;

    /// Delete all records. Test helper; returns the number removed.
    async fn purge(&self) -> ForgeResult<u64>;

    /// Verify the store's internal consistency.
    async fn health_check(&self) -> ForgeResult<()>;
}

/// Convenient alias for a store shared between workers.
pub type SharedStore = Arc<dyn TaskStore>;

/// Factory methods for creating stores.
pub struct StoreFactory;

impl StoreFactory {
    /// Create an in-memory store.
    pub fn in_memory(settings: StoreSettings) -> SharedStore {
        Arc::new(InMemoryStore::with_settings(settings))
    }
}
