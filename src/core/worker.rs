//! Worker loop.
//!
//! A worker is a single-threaded cooperative executor: it claims one record
//! at a time, runs the bound handler under the record's captured context,
//! and finalizes the outcome. Concurrency between workers exists only at
//! the store's atomic claim; the loop itself never retries user logic and
//! never lets a task failure escape into the loop.

use crate::config::WorkerSettings;
use crate::context;
use crate::core::registry::{TaskRegistry, global_registry};
use crate::error::{ExecutionFailure, ForgeResult};
use crate::record::{Outcome, TaskRecord};
use crate::store::SharedStore;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::time::sleep;

/// Bounded exponential idle backoff, in milliseconds.
fn idle_backoff(empty_polls: u32, base_ms: u64, cap_ms: u64) -> u64 {
    let shift = empty_polls.saturating_sub(1).min(6);
    base_ms.checked_shl(shift).unwrap_or(u64::MAX).min(cap_ms)
}

/// Single-threaded cooperative executor of queued records.
pub struct WorkerLoop {
    tag: String,
    store: SharedStore,
    registry: &'static TaskRegistry,
    settings: WorkerSettings,
}

impl WorkerLoop {
    /// Create a worker over the global registry.
    pub fn new(store: SharedStore, tag: impl Into<String>, settings: WorkerSettings) -> Self {
        Self::with_registry(store, global_registry(), tag, settings)
    }

    /// Create a worker bound to a specific registry.
    pub fn with_registry(
        store: SharedStore,
        registry: &'static TaskRegistry,
        tag: impl Into<String>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            tag: tag.into(),
            store,
            registry,
            settings,
        }
    }

    /// This worker's claim tag.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Process at most one runnable record.
    ///
    /// Returns whether a record was found. Test harnesses drain the queue
    /// deterministically by looping until this returns `false`.
    pub async fn run_ready(&self) -> ForgeResult<bool> {
        let now = SystemTime::now();
        let Some(record) = self.store.claim_next(now, &self.tag).await? else {
            return Ok(false);
        };

        tracing::info!(
            worker = %self.tag,
            record = %record.id,
            task = %record.task_name,
            attempt = record.attempts,
            "executing task"
        );

        let outcome = self.execute(&record).await;
        self.store.finalize(record.id, outcome, &self.tag).await?;
        Ok(true)
    }

    /// Run one claimed record to an outcome. Never errors: every failure is
    /// classified into the outcome instead.
    async fn execute(&self, record: &TaskRecord) -> Outcome {
        let entry = match self.registry.resolve(&record.task_name).await {
            Ok(entry) => entry,
            Err(_) => {
                tracing::warn!(
                    record = %record.id,
                    task = %record.task_name,
                    "task not registered, finalizing as error"
                );
                return Outcome::Failure(ExecutionFailure::unknown_task(&record.task_name));
            }
        };

        let result = context::enter(
            record.context.clone(),
            record.notifications_suppressed,
            entry.handler.call(&record.args),
        )
        .await;

        match result {
            Ok(value) => Outcome::Success(value),
            Err(error) => {
                tracing::warn!(record = %record.id, task = %record.task_name, %error, "task failed");
                Outcome::Failure(ExecutionFailure::from_task_error(error))
            }
        }
    }

    /// Run until shutdown is signalled.
    ///
    /// Empty claims sleep with a bounded backoff; storage errors are logged
    /// and retried after a pause. Both sleeps are interruptible, and an
    /// in-flight record is always finalized before the loop exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(worker = %self.tag, "worker started");
        let mut empty_polls = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_ready().await {
                Ok(true) => {
                    empty_polls = 0;
                }
                Ok(false) => {
                    empty_polls += 1;
                    let pause = idle_backoff(
                        empty_polls,
                        self.settings.idle_backoff_ms,
                        self.settings.max_idle_backoff_ms,
                    );
                    tokio::select! {
                        _ = sleep(Duration::from_millis(pause)) => {}
                        _ = shutdown.changed() => break,
                    }
                }
                Err(error) => {
                    tracing::error!(worker = %self.tag, %error, "storage error, backing off");
                    tokio::select! {
                        _ = sleep(Duration::from_millis(self.settings.storage_retry_ms)) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        tracing::info!(worker = %self.tag, "worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{TaskContext, notifications_suppressed};
    use crate::core::registry::{TaskHandler, TaskOptions};
    use crate::error::{CompoundError, ErrorKind, SubError, TaskError};
    use crate::handle::TaskHandle;
    use crate::record::{ResultKind, TaskArgs, TaskState};
    use crate::store::{InMemoryStore, SharedStore};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Arc;

    #[derive(Default)]
    struct EchoTask;

    #[async_trait]
    impl TaskHandler for EchoTask {
        async fn call(&self, args: &TaskArgs) -> Result<Value, TaskError> {
            Ok(args.get(0).cloned().unwrap_or(Value::Null))
        }
    }

    #[derive(Default)]
    struct BoomTask;

    #[async_trait]
    impl TaskHandler for BoomTask {
        async fn call(&self, _args: &TaskArgs) -> Result<Value, TaskError> {
            Err(TaskError::failure("divide-by-zero", "cannot divide by zero"))
        }
    }

    #[derive(Default)]
    struct BatchTask;

    #[async_trait]
    impl TaskHandler for BatchTask {
        async fn call(&self, args: &TaskArgs) -> Result<Value, TaskError> {
            let mut compound = CompoundError::new();
            for item in &args.args {
                compound.push(SubError::new("item-failed", format!("item {item} failed")));
            }
            compound.into_result(Value::Null)
        }
    }

    /// Returns the ambient context and suppression flag it observes.
    #[derive(Default)]
    struct ProbeTask;

    #[async_trait]
    impl TaskHandler for ProbeTask {
        async fn call(&self, _args: &TaskArgs) -> Result<Value, TaskError> {
            let ctx = TaskContext::current();
            Ok(json!({
                "project_id": ctx.project_id,
                "user_id": ctx.user_id,
                "suppressed": notifications_suppressed(),
            }))
        }
    }

    struct Fixture {
        store: SharedStore,
        registry: &'static TaskRegistry,
        worker: WorkerLoop,
    }

    async fn fixture() -> Fixture {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let registry: &'static TaskRegistry = Box::leak(Box::new(TaskRegistry::new()));
        registry
            .register("echo", EchoTask, TaskOptions::default())
            .await
            .unwrap();
        registry
            .register("boom", BoomTask, TaskOptions::default())
            .await
            .unwrap();
        registry
            .register("batch", BatchTask, TaskOptions::default())
            .await
            .unwrap();
        registry
            .register("probe", ProbeTask, TaskOptions::quiet())
            .await
            .unwrap();

        let worker = WorkerLoop::with_registry(
            Arc::clone(&store),
            registry,
            "test-worker",
            WorkerSettings::default(),
        );
        Fixture {
            store,
            registry,
            worker,
        }
    }

    async fn drain(worker: &WorkerLoop) {
        while worker.run_ready().await.unwrap() {}
    }

    #[tokio::test]
    async fn echo_round_trip() {
        let f = fixture().await;
        let handle = TaskHandle::resolved_in(f.registry, Arc::clone(&f.store), "echo")
            .await
            .unwrap();
        let id = handle
            .post(TaskArgs::new().arg("hello").unwrap())
            .await
            .unwrap();

        drain(&f.worker).await;

        let record = f.store.get(id).await.unwrap().unwrap();
        assert_eq!(record.state, TaskState::Complete);
        assert_eq!(record.result_kind, Some(ResultKind::Ok));
        assert_eq!(record.result, Some(json!("hello")));
        assert!(record.finished_at.is_some());
    }

    #[tokio::test]
    async fn run_ready_reports_empty_queue() {
        let f = fixture().await;
        assert!(!f.worker.run_ready().await.unwrap());
    }

    #[tokio::test]
    async fn user_failure_is_classified_with_original_kind() {
        let f = fixture().await;
        let handle = TaskHandle::resolved_in(f.registry, Arc::clone(&f.store), "boom")
            .await
            .unwrap();
        let id = handle.post(TaskArgs::new()).await.unwrap();

        drain(&f.worker).await;

        let record = f.store.get(id).await.unwrap().unwrap();
        assert_eq!(record.state, TaskState::Error);
        assert_eq!(record.result_kind, Some(ResultKind::Error));
        let failure = record.failure().unwrap();
        assert_eq!(failure.kind, ErrorKind::UserError);
        assert_eq!(failure.errors[0].kind, "divide-by-zero");
    }

    #[tokio::test]
    async fn compound_failure_keeps_sub_errors_in_order() {
        let f = fixture().await;
        let handle = TaskHandle::resolved_in(f.registry, Arc::clone(&f.store), "batch")
            .await
            .unwrap();
        let args = TaskArgs::new().arg(1).unwrap().arg(2).unwrap().arg(3).unwrap();
        let id = handle.post(args).await.unwrap();

        drain(&f.worker).await;

        let failure = f.store.get(id).await.unwrap().unwrap().failure().unwrap();
        assert_eq!(failure.kind, ErrorKind::Compound);
        assert_eq!(failure.errors.len(), 3);
        let messages: Vec<_> = failure.errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            ["item 1 failed", "item 2 failed", "item 3 failed"]
        );
    }

    #[tokio::test]
    async fn empty_batch_completes() {
        let f = fixture().await;
        let handle = TaskHandle::resolved_in(f.registry, Arc::clone(&f.store), "batch")
            .await
            .unwrap();
        let id = handle.post(TaskArgs::new()).await.unwrap();

        drain(&f.worker).await;

        let record = f.store.get(id).await.unwrap().unwrap();
        assert_eq!(record.state, TaskState::Complete);
    }

    #[tokio::test]
    async fn unknown_task_is_finalized_not_crashed() {
        let f = fixture().await;
        let record = crate::record::TaskRecord::new(
            "no-such-task",
            TaskArgs::new(),
            TaskContext::anonymous(),
            false,
            SystemTime::now(),
        );
        let id = f.store.enqueue(record).await.unwrap();

        drain(&f.worker).await;

        let record = f.store.get(id).await.unwrap().unwrap();
        assert_eq!(record.state, TaskState::Error);
        assert_eq!(record.failure().unwrap().kind, ErrorKind::UnknownTask);
    }

    #[tokio::test]
    async fn context_is_restored_around_execution() {
        let f = fixture().await;
        let handle = TaskHandle::resolved_in(f.registry, Arc::clone(&f.store), "probe")
            .await
            .unwrap();

        let ctx = TaskContext::anonymous()
            .with_project("p-42")
            .with_user("bob");
        let id = ctx
            .scope(async { handle.post(TaskArgs::new()).await })
            .await
            .unwrap();

        drain(&f.worker).await;

        // The handler observed the posted context plus the task's quiet
        // default; the worker's own ambient context is untouched afterwards.
        let record = f.store.get(id).await.unwrap().unwrap();
        let observed = record.result.unwrap();
        assert_eq!(observed["project_id"], json!("p-42"));
        assert_eq!(observed["user_id"], json!("bob"));
        assert_eq!(observed["suppressed"], json!(true));
        assert_eq!(TaskContext::current(), TaskContext::anonymous());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let f = fixture().await;
        let (tx, rx) = watch::channel(false);
        let worker = WorkerLoop::with_registry(
            Arc::clone(&f.store),
            f.registry,
            "stoppable",
            WorkerSettings::default(),
        );

        let join = tokio::spawn(worker.run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), join)
            .await
            .expect("worker should stop promptly")
            .unwrap();
    }

    #[test]
    fn idle_backoff_grows_to_the_cap() {
        assert_eq!(idle_backoff(1, 250, 5000), 250);
        assert_eq!(idle_backoff(2, 250, 5000), 500);
        assert_eq!(idle_backoff(3, 250, 5000), 1000);
        assert_eq!(idle_backoff(100, 250, 5000), 5000);
    }
}
