//! Callable handles for registered tasks.
//!
//! A [`TaskHandle`] is the enqueue-side face of one registered task: it can
//! run the handler synchronously in-process (`invoke`), or write a record
//! for asynchronous execution (`post`, `post_delayed`, `post_at`).

use crate::context::TaskContext;
use crate::core::registry::{TaskHandler, TaskOptions, TaskRegistry, global_registry};
use crate::error::{ForgeError, ForgeResult, TaskError};
use crate::record::{RecordId, TaskArgs, TaskRecord};
use crate::store::SharedStore;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Options accepted by [`TaskHandle::post_with`].
#[derive(Debug, Clone, Default)]
pub struct PostOptions {
    /// Run no earlier than `now + delay`; mutually exclusive with `run_at`
    pub delay: Option<Duration>,
    /// Run no earlier than this absolute time; mutually exclusive with `delay`
    pub run_at: Option<SystemTime>,
    /// Override the task's default notification suppression
    pub notifications_suppressed: Option<bool>,
    /// Explicit context in place of the caller's ambient context
    pub context_override: Option<TaskContext>,
}

impl PostOptions {
    fn resolve_run_at(&self, now: SystemTime) -> ForgeResult<SystemTime> {
        match (self.delay, self.run_at) {
            (Some(_), Some(_)) => Err(ForgeError::InvalidOptions {
                message: "delay and run_at are mutually exclusive".into(),
            }),
            (Some(delay), None) => Ok(now + delay),
            (None, Some(run_at)) => Ok(run_at),
            (None, None) => Ok(now),
        }
    }
}

/// Enqueue-side handle for one registered task.
#[derive(Clone)]
pub struct TaskHandle {
    name: String,
    options: TaskOptions,
    handler: Arc<dyn TaskHandler>,
    store: SharedStore,
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl TaskHandle {
    /// Build a handle for `name`, resolving it in the global registry.
    ///
    /// Fails with [`ForgeError::UnknownTask`] when the name is not
    /// registered, so misspelled names surface at handle creation rather
    /// than at execution.
    pub async fn new(store: SharedStore, name: &str) -> ForgeResult<Self> {
        Self::resolved_in(global_registry(), store, name).await
    }

    /// Build a handle resolving `name` in a specific registry.
    pub async fn resolved_in(
        registry: &TaskRegistry,
        store: SharedStore,
        name: &str,
    ) -> ForgeResult<Self> {
        let entry = registry.resolve(name).await?;
        Ok(Self {
            name: name.to_string(),
            options: entry.options,
            handler: entry.handler,
            store,
        })
    }

    /// The task name this handle posts under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute the handler synchronously in-process, bypassing the queue.
    ///
    /// Runs under the caller's ambient context; errors re-raise unchanged.
    /// Used by tests and trusted local paths.
    pub async fn invoke(&self, args: TaskArgs) -> Result<Value, TaskError> {
        self.handler.call(&args).await
    }

    /// Enqueue for asynchronous execution, eligible immediately.
    pub async fn post(&self, args: TaskArgs) -> ForgeResult<RecordId> {
        self.post_with(args, PostOptions::default()).await
    }

    /// Enqueue with a relative delay: `run_at = now + delay`.
    ///
    /// The contract promises whole-second granularity; finer delays are
    /// passed through but not guaranteed by every store.
    pub async fn post_delayed(&self, args: TaskArgs, delay: Duration) -> ForgeResult<RecordId> {
        self.post_with(
            args,
            PostOptions {
                delay: Some(delay),
                ..Default::default()
            },
        )
        .await
    }

    /// Enqueue with an explicit absolute run time.
    pub async fn post_at(&self, args: TaskArgs, run_at: SystemTime) -> ForgeResult<RecordId> {
        self.post_with(
            args,
            PostOptions {
                run_at: Some(run_at),
                ..Default::default()
            },
        )
        .await
    }

    /// Enqueue with full options.
    ///
    /// Captures the caller's ambient context (or the override), assigns a
    /// correlation id when none is present, and applies the task's default
    /// options subject to per-post overrides.
    pub async fn post_with(&self, args: TaskArgs, options: PostOptions) -> ForgeResult<RecordId> {
        let now = SystemTime::now();
        let run_at = options.resolve_run_at(now)?;

        let mut context = options
            .context_override
            .unwrap_or_else(TaskContext::current);
        if context.correlation_id.is_none() {
            context.correlation_id = Some(Uuid::new_v4().to_string());
        }

        let suppressed = options
            .notifications_suppressed
            .unwrap_or(self.options.notifications_suppressed);

        let record = TaskRecord::new(&self.name, args, context, suppressed, run_at);
        let id = self.store.enqueue(record).await?;

        tracing::debug!(task = %self.name, record = %id, "posted task");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::TaskHandler;
    use crate::record::TaskState;
    use crate::store::{InMemoryStore, SharedStore};
    use async_trait::async_trait;
    use serde_json::json;

    #[derive(Default)]
    struct EchoTask;

    #[async_trait]
    impl TaskHandler for EchoTask {
        async fn call(&self, args: &TaskArgs) -> Result<Value, TaskError> {
            Ok(args.get(0).cloned().unwrap_or(Value::Null))
        }
    }

    fn leaked_registry() -> &'static TaskRegistry {
        Box::leak(Box::new(TaskRegistry::new()))
    }

    async fn echo_handle(store: SharedStore) -> TaskHandle {
        let registry = leaked_registry();
        registry
            .register("echo", EchoTask, TaskOptions::default())
            .await
            .unwrap();
        TaskHandle::resolved_in(registry, store, "echo").await.unwrap()
    }

    #[tokio::test]
    async fn handle_creation_fails_for_unknown_name() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let registry = leaked_registry();
        let err = TaskHandle::resolved_in(registry, store, "ghost")
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::UnknownTask { .. }));
    }

    #[tokio::test]
    async fn invoke_runs_in_process() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let handle = echo_handle(Arc::clone(&store)).await;

        let result = handle
            .invoke(TaskArgs::new().arg("direct").unwrap())
            .await
            .unwrap();
        assert_eq!(result, json!("direct"));

        // Nothing touched the store.
        assert_eq!(store.stats().await.unwrap().total_enqueued, 0);
    }

    #[tokio::test]
    async fn post_writes_a_ready_record_with_arguments() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let handle = echo_handle(Arc::clone(&store)).await;

        let args = TaskArgs::new().arg("hello").unwrap().kwarg("n", 3).unwrap();
        let id = handle.post(args.clone()).await.unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.state, TaskState::Ready);
        assert_eq!(record.task_name, "echo");
        assert_eq!(record.args, args);
        assert!(record.context.correlation_id.is_some());
    }

    #[tokio::test]
    async fn post_captures_ambient_context() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let handle = echo_handle(Arc::clone(&store)).await;

        let ctx = TaskContext::anonymous()
            .with_project("proj-9")
            .with_user("alice");
        let id = ctx
            .scope(async { handle.post(TaskArgs::new()).await })
            .await
            .unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.context.project_id.as_deref(), Some("proj-9"));
        assert_eq!(record.context.user_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn context_override_replaces_ambient() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let handle = echo_handle(Arc::clone(&store)).await;

        let explicit = TaskContext::anonymous().with_project("override");
        let ambient = TaskContext::anonymous().with_project("ambient");
        let id = ambient
            .scope(async {
                handle
                    .post_with(
                        TaskArgs::new(),
                        PostOptions {
                            context_override: Some(explicit),
                            ..Default::default()
                        },
                    )
                    .await
            })
            .await
            .unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.context.project_id.as_deref(), Some("override"));
    }

    #[tokio::test]
    async fn delay_sets_future_run_at() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let handle = echo_handle(Arc::clone(&store)).await;

        let before = SystemTime::now();
        let id = handle
            .post_delayed(TaskArgs::new(), Duration::from_secs(30))
            .await
            .unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert!(record.run_at >= before + Duration::from_secs(30));
    }

    #[tokio::test]
    async fn delay_and_run_at_are_mutually_exclusive() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let handle = echo_handle(Arc::clone(&store)).await;

        let err = handle
            .post_with(
                TaskArgs::new(),
                PostOptions {
                    delay: Some(Duration::from_secs(1)),
                    run_at: Some(SystemTime::now()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::InvalidOptions { .. }));
    }

    #[tokio::test]
    async fn suppression_override_beats_task_default() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let registry = leaked_registry();
        registry
            .register("quiet-echo", EchoTask, TaskOptions::quiet())
            .await
            .unwrap();
        let handle = TaskHandle::resolved_in(registry, Arc::clone(&store), "quiet-echo")
            .await
            .unwrap();

        let default_id = handle.post(TaskArgs::new()).await.unwrap();
        let overridden_id = handle
            .post_with(
                TaskArgs::new(),
                PostOptions {
                    notifications_suppressed: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let default_rec = store.get(default_id).await.unwrap().unwrap();
        let overridden_rec = store.get(overridden_id).await.unwrap().unwrap();
        assert!(default_rec.notifications_suppressed);
        assert!(!overridden_rec.notifications_suppressed);
    }
}
