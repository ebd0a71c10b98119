//! The ForgeQ runtime: registry, workers, sweeper, and the `Forge` facade
//! that wires them together over one store.

use crate::config::ForgeConfig;
use crate::core::registry::run_pending_registrations;
use crate::error::{ForgeError, ForgeResult};
use crate::handle::TaskHandle;
use crate::record::RecordId;
use crate::script::Script;
use crate::store::{SharedStore, StoreFactory, StoreStats};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

pub mod registry;
pub mod sweeper;
pub mod worker;

pub use registry::{TaskHandler, TaskOptions, TaskRegistry, global_registry};
pub use sweeper::StaleSweeper;
pub use worker::WorkerLoop;

struct ForgeRuntime {
    shutdown: watch::Sender<bool>,
    loops: Vec<JoinHandle<()>>,
}

/// The main ForgeQ runtime handle.
///
/// Owns the store and the lifecycle of the worker pool plus the stale-claim
/// sweeper. Tasks are posted through [`Forge::handle`]; scripts through
/// [`Forge::post_script`].
///
/// # Examples
///
/// ```rust,ignore
/// use forgeq::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> ForgeResult<()> {
///     let forge = Forge::new(ForgeConfig::default())?;
///     forge.start().await?;
///
///     let echo = forge.handle("echo").await?;
///     echo.post(TaskArgs::new().arg("hello")?).await?;
///
///     forge.wait_for_shutdown().await
/// }
/// ```
pub struct Forge {
    config: ForgeConfig,
    store: SharedStore,
    runtime: Mutex<Option<ForgeRuntime>>,
}

impl std::fmt::Debug for Forge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forge")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Forge {
    /// Create a forge over an in-memory store.
    pub fn new(config: ForgeConfig) -> ForgeResult<Self> {
        let store = StoreFactory::in_memory(config.store.clone());
        Self::with_store(config, store)
    }

    /// Create a forge over a custom store.
    pub fn with_store(config: ForgeConfig, store: SharedStore) -> ForgeResult<Self> {
        if let Err(errors) = config.validate() {
            return Err(ForgeError::config(errors.join("; ")));
        }
        Ok(Self {
            config,
            store,
            runtime: Mutex::new(None),
        })
    }

    /// Start the worker pool and the sweeper.
    ///
    /// Runs every pending task/script declaration first, so records posted
    /// before the first claim can already resolve.
    pub async fn start(&self) -> ForgeResult<()> {
        let mut runtime = self.runtime.lock().await;
        if runtime.is_some() {
            return Err(ForgeError::AlreadyRunning);
        }

        run_pending_registrations().await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut loops = Vec::with_capacity(self.config.workers.count + 1);

        for index in 0..self.config.workers.count {
            let tag = format!("forge-{}-{index}", std::process::id());
            let worker = WorkerLoop::new(
                Arc::clone(&self.store),
                tag,
                self.config.workers.clone(),
            );
            loops.push(tokio::spawn(worker.run(shutdown_rx.clone())));
        }

        let sweeper = StaleSweeper::new(Arc::clone(&self.store), &self.config.sweeper);
        loops.push(tokio::spawn(sweeper.run(shutdown_rx)));

        *runtime = Some(ForgeRuntime {
            shutdown: shutdown_tx,
            loops,
        });

        tracing::info!(workers = self.config.workers.count, "forge started");
        Ok(())
    }

    /// Graceful shutdown: signal every loop, then wait for them to finish
    /// their in-flight work within the configured timeout.
    pub async fn shutdown(&self) -> ForgeResult<()> {
        let runtime = {
            let mut guard = self.runtime.lock().await;
            guard.take().ok_or(ForgeError::NotRunning)?
        };

        let _ = runtime.shutdown.send(true);

        let timeout = Duration::from_secs(self.config.workers.shutdown_timeout_secs);
        if tokio::time::timeout(timeout, futures::future::join_all(runtime.loops))
            .await
            .is_err()
        {
            tracing::warn!("shutdown timed out before every loop exited");
        }

        tracing::info!("forge stopped");
        Ok(())
    }

    /// Block until ctrl-c, then shut down gracefully.
    pub async fn wait_for_shutdown(&self) -> ForgeResult<()> {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| ForgeError::config(format!("signal handler failed: {e}")))?;
        tracing::info!("received ctrl-c, shutting down");
        self.shutdown().await
    }

    /// Build a posting handle for a registered task.
    pub async fn handle(&self, name: &str) -> ForgeResult<TaskHandle> {
        run_pending_registrations().await;
        TaskHandle::new(Arc::clone(&self.store), name).await
    }

    /// Post an argument string for asynchronous execution of script `S`.
    pub async fn post_script<S: Script>(&self, arg_string: &str) -> ForgeResult<RecordId> {
        crate::script::post_script::<S>(Arc::clone(&self.store), arg_string).await
    }

    /// The store this forge runs over.
    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    /// Record counts per state.
    pub async fn stats(&self) -> ForgeResult<StoreStats> {
        self.store.stats().await
    }

    /// Whether the worker pool is currently running.
    pub async fn is_running(&self) -> bool {
        self.runtime.lock().await.is_some()
    }

    /// The configuration used by this forge.
    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }
}
