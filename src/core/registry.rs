//! Task registry.
//!
//! Process-wide mapping from stable task names to handlers. The registry is
//! populated during startup by declaration hooks and treated as read-only
//! afterwards; names must stay stable across deploys so in-flight records
//! remain executable.
//!
//! # Declaring a task
//!
//! ```rust,ignore
//! use forgeq::prelude::*;
//! use serde_json::{Value, json};
//!
//! #[derive(Default)]
//! struct EchoTask;
//!
//! #[async_trait::async_trait]
//! impl TaskHandler for EchoTask {
//!     async fn call(&self, args: &TaskArgs) -> Result<Value, TaskError> {
//!         Ok(args.get(0).cloned().unwrap_or(Value::Null))
//!     }
//! }
//!
//! declare_task!("echo", EchoTask);
//! ```
//!
//! `declare_task!` queues a registration hook at program load; the runtime
//! executes pending hooks via [`run_pending_registrations`] when a forge
//! starts.

use crate::error::{ForgeError, ForgeResult, TaskError};
use crate::record::TaskArgs;
use async_trait::async_trait;
use serde_json::Value;
use std::any::TypeId;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;

/// Bound handler executing one task invocation.
///
/// Handlers take no context parameter: the ambient
/// [`TaskContext`](crate::context::TaskContext) is re-established around the
/// call and read through [`TaskContext::current`](crate::context::TaskContext::current).
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute with the recorded arguments.
    async fn call(&self, args: &TaskArgs) -> Result<Value, TaskError>;
}

/// Per-task default options, applied when a record is posted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskOptions {
    /// Suppress side-channel notifications while the task executes
    pub notifications_suppressed: bool,
}

impl TaskOptions {
    /// Options with notifications suppressed.
    pub fn quiet() -> Self {
        Self {
            notifications_suppressed: true,
        }
    }
}

struct Registration {
    handler: Arc<dyn TaskHandler>,
    options: TaskOptions,
    fingerprint: TypeId,
}

/// A resolved registry entry: the handler plus its default options.
#[derive(Clone)]
pub struct RegistryEntry {
    /// The bound handler
    pub handler: Arc<dyn TaskHandler>,
    /// Default options declared with the task
    pub options: TaskOptions,
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Process-wide name → handler mapping.
pub struct TaskRegistry {
    entries: RwLock<HashMap<String, Registration>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register `handler` under `name`.
    ///
    /// Idempotent: registering the same name with the same handler type is
    /// a no-op; a different handler type fails with
    /// [`ForgeError::DuplicateTaskName`].
    pub async fn register<H>(
        &self,
        name: impl Into<String>,
        handler: H,
        options: TaskOptions,
    ) -> ForgeResult<()>
    where
        H: TaskHandler + 'static,
    {
        let name = name.into();
        let fingerprint = TypeId::of::<H>();
        let mut entries = self.entries.write().await;

        if let Some(existing) = entries.get(&name) {
            if existing.fingerprint == fingerprint {
                tracing::debug!(task = %name, "task already registered, skipping");
                return Ok(());
            }
            return Err(ForgeError::DuplicateTaskName { name });
        }

        tracing::info!(task = %name, "registered task");
        entries.insert(
            name,
            Registration {
                handler: Arc::new(handler),
                options,
                fingerprint,
            },
        );
        Ok(())
    }

    /// Look up a task by name.
    pub async fn resolve(&self, name: &str) -> ForgeResult<RegistryEntry> {
        let entries = self.entries.read().await;
        entries
            .get(name)
            .map(|r| RegistryEntry {
                handler: Arc::clone(&r.handler),
                options: r.options,
            })
            .ok_or_else(|| ForgeError::UnknownTask {
                name: name.to_string(),
            })
    }

    /// Whether a name is registered.
    pub async fn is_registered(&self, name: &str) -> bool {
        self.entries.read().await.contains_key(name)
    }

    /// All registered names, sorted.
    pub async fn registered_names(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut names: Vec<String> = entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered tasks.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True when nothing is registered.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global singleton registry instance.
static TASK_REGISTRY: OnceLock<TaskRegistry> = OnceLock::new();

/// Get the global task registry.
pub fn global_registry() -> &'static TaskRegistry {
    TASK_REGISTRY.get_or_init(TaskRegistry::new)
}

// Startup declaration hooks. `declare_task!` call sites enqueue one hook at
// program load; `run_pending_registrations` executes them all. Hooks are
// kept (not drained) so repeated startups stay harmless through idempotent
// registration.
type RegistrationHook = fn() -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

static PENDING_HOOKS: OnceLock<std::sync::Mutex<Vec<RegistrationHook>>> = OnceLock::new();

fn pending_hooks() -> &'static std::sync::Mutex<Vec<RegistrationHook>> {
    PENDING_HOOKS.get_or_init(|| std::sync::Mutex::new(Vec::new()))
}

/// Queue a registration hook to run at startup.
pub fn add_pending_registration(hook: RegistrationHook) {
    if let Ok(mut hooks) = pending_hooks().lock() {
        hooks.push(hook);
    }
}

/// Execute every queued registration hook.
pub async fn run_pending_registrations() {
    let hooks: Vec<RegistrationHook> = match pending_hooks().lock() {
        Ok(hooks) => hooks.clone(),
        Err(_) => return,
    };
    for hook in hooks {
        hook().await;
    }
}

/// Declare a task at its definition site.
///
/// Registers `$handler` (via `Default`) under `$name` in the global
/// registry when pending registrations run. An optional third argument
/// supplies [`TaskOptions`].
///
/// ```rust,ignore
/// declare_task!("email.send", SendEmailTask);
/// declare_task!("search.reindex", ReindexTask, TaskOptions::quiet());
/// ```
#[macro_export]
macro_rules! declare_task {
    ($name:literal, $handler:ident) => {
        $crate::declare_task!(
            $name,
            $handler,
            $crate::core::registry::TaskOptions::default()
        );
    };
    ($name:literal, $handler:ident, $options:expr) => {
        paste::paste! {
            #[ctor::ctor]
            fn [<enlist_task_ $handler:snake>]() {
                $crate::core::registry::add_pending_registration(|| {
                    Box::pin(async {
                        let registry = $crate::core::registry::global_registry();
                        if let Err(error) = registry
                            .register($name, $handler::default(), $options)
                            .await
                        {
                            tracing::error!(task = $name, %error, "task registration rejected");
                        }
                    })
                });
            }
        }
    };
}
