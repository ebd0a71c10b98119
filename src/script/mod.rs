//! Script dispatch.
//!
//! Ad-hoc imperative scripts are queued without registering each one as a
//! separate task: a single registered `dispatch` task carries a
//! `(locator, method, arg_string)` triple, resolves the locator through the
//! script registry, tokenizes the argument string, and invokes the script.
//! Nothing is deserialized into code; the locator is a plain string looked
//! up in a process-wide table.
//!
//! Scripts keep a stand-alone CLI path too: [`run_script_main`] parses the
//! process's own command line with the same parser the dispatcher uses, so
//! the two invocation forms tokenize identically.

use crate::core::registry::TaskHandler;
use crate::error::{ForgeError, ForgeResult, TaskError};
use crate::record::{RecordId, TaskArgs};
use crate::store::SharedStore;
use async_trait::async_trait;
use serde_json::Value;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;

pub mod args;
pub use args::split_args;

/// Name the dispatcher task is registered under.
pub const DISPATCH_TASK: &str = "dispatch";

/// The only method the dispatcher knows how to invoke on a script.
const RUN_METHOD: &str = "run";

/// A command-line-style entry point that can be posted via the dispatcher.
///
/// Invocation states: posted → dispatched → parsed → executed → finalized.
/// A parse failure is finalized as a terminal `bad-arguments` error.
#[async_trait]
pub trait Script: Send + Sync + 'static {
    /// Stable owner locator, resolvable across deploys.
    fn locator() -> &'static str
    where
        Self: Sized;

    /// Argument parser describing the accepted flags.
    fn parser() -> clap::Command
    where
        Self: Sized;

    /// The script body.
    async fn execute(&self, matches: clap::ArgMatches) -> Result<Value, TaskError>;
}

/// Object-safe adapter over a [`Script`] type.
#[async_trait]
trait ScriptRunner: Send + Sync {
    fn command(&self) -> clap::Command;
    async fn run(&self, matches: clap::ArgMatches) -> Result<Value, TaskError>;
}

struct Runner<S: Script>(S);

#[async_trait]
impl<S: Script> ScriptRunner for Runner<S> {
    fn command(&self) -> clap::Command {
        S::parser()
    }

    async fn run(&self, matches: clap::ArgMatches) -> Result<Value, TaskError> {
        self.0.execute(matches).await
    }
}

struct ScriptEntry {
    runner: Arc<dyn ScriptRunner>,
    fingerprint: TypeId,
}

/// Process-wide locator → script table, the dispatcher's secondary lookup.
pub struct ScriptRegistry {
    entries: RwLock<HashMap<String, ScriptEntry>>,
}

impl ScriptRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register script type `S` under its locator.
    ///
    /// Idempotent for the same type; a different type under the same
    /// locator fails with [`ForgeError::DuplicateScriptLocator`].
    pub async fn register<S>(&self) -> ForgeResult<()>
    where
        S: Script + Default,
    {
        let locator = S::locator();
        let fingerprint = TypeId::of::<S>();
        let mut entries = self.entries.write().await;

        if let Some(existing) = entries.get(locator) {
            if existing.fingerprint == fingerprint {
                tracing::debug!(script = locator, "script already registered, skipping");
                return Ok(());
            }
            return Err(ForgeError::DuplicateScriptLocator {
                locator: locator.to_string(),
            });
        }

        tracing::info!(script = locator, "registered script");
        entries.insert(
            locator.to_string(),
            ScriptEntry {
                runner: Arc::new(Runner(S::default())),
                fingerprint,
            },
        );
        Ok(())
    }

    async fn resolve(&self, locator: &str) -> Option<Arc<dyn ScriptRunner>> {
        let entries = self.entries.read().await;
        entries.get(locator).map(|e| Arc::clone(&e.runner))
    }

    /// Whether a locator is registered.
    pub async fn is_registered(&self, locator: &str) -> bool {
        self.entries.read().await.contains_key(locator)
    }

    /// All registered locators, sorted.
    pub async fn registered_locators(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut locators: Vec<String> = entries.keys().cloned().collect();
        locators.sort();
        locators
    }
}

impl Default for ScriptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static SCRIPT_REGISTRY: OnceLock<ScriptRegistry> = OnceLock::new();

/// Get the global script registry.
pub fn global_scripts() -> &'static ScriptRegistry {
    SCRIPT_REGISTRY.get_or_init(ScriptRegistry::new)
}

/// Declare a script at its definition site.
///
/// Registers the type in the global script registry when pending
/// registrations run, making it reachable through the dispatcher.
#[macro_export]
macro_rules! declare_script {
    ($script:ident) => {
        paste::paste! {
            #[ctor::ctor]
            fn [<enlist_script_ $script:snake>]() {
                $crate::core::registry::add_pending_registration(|| {
                    Box::pin(async {
                        if let Err(error) =
                            $crate::script::global_scripts().register::<$script>().await
                        {
                            tracing::error!(%error, "script registration rejected");
                        }
                    })
                });
            }
        }
    };
}

/// The dispatcher: a registered task that invokes an inner script resolved
/// from its arguments.
#[derive(Default)]
pub struct DispatchTask;

#[async_trait]
impl TaskHandler for DispatchTask {
    async fn call(&self, args: &TaskArgs) -> Result<Value, TaskError> {
        let locator = args.str_arg(0).ok_or_else(bad_shape)?;
        let method = args.str_arg(1).ok_or_else(bad_shape)?;
        let arg_string = args.str_arg(2).ok_or_else(bad_shape)?;

        if method != RUN_METHOD {
            return Err(TaskError::BadArguments(format!(
                "unknown dispatch method '{method}'"
            )));
        }

        let runner = global_scripts().resolve(locator).await.ok_or_else(|| {
            TaskError::BadArguments(format!("unknown script locator '{locator}'"))
        })?;

        let tokens = split_args(arg_string).map_err(TaskError::BadArguments)?;
        let argv = std::iter::once(locator.to_string()).chain(tokens);
        let matches = runner
            .command()
            .try_get_matches_from(argv)
            .map_err(|error| TaskError::BadArguments(error.to_string()))?;

        runner.run(matches).await
    }
}

fn bad_shape() -> TaskError {
    TaskError::BadArguments("dispatch requires (locator, method, arg_string)".into())
}

// Keep the literal in lockstep with DISPATCH_TASK.
crate::declare_task!("dispatch", DispatchTask);

/// Post `arg_string` for asynchronous execution of script `S`.
///
/// The enqueued record is a `dispatch` invocation whose inner callable is
/// the script's `run` method.
pub async fn post_script<S: Script>(
    store: SharedStore,
    arg_string: &str,
) -> ForgeResult<RecordId> {
    crate::core::registry::run_pending_registrations().await;

    let locator = S::locator();
    if !global_scripts().is_registered(locator).await {
        return Err(ForgeError::UnknownScript {
            locator: locator.to_string(),
        });
    }

    let args = TaskArgs::new()
        .arg(locator)?
        .arg(RUN_METHOD)?
        .arg(arg_string)?;
    let handle = crate::handle::TaskHandle::new(store, DISPATCH_TASK).await?;
    handle.post(args).await
}

/// Run script `S` synchronously against an explicit argument vector.
///
/// Returns the process exit code: 0 on success, 1 on execution failure, 2
/// on a parse error (clap's convention).
pub async fn run_script_from<S, I>(argv: I) -> i32
where
    S: Script + Default,
    I: IntoIterator<Item = String>,
{
    let full_argv = std::iter::once(S::locator().to_string()).chain(argv);
    let matches = match S::parser().try_get_matches_from(full_argv) {
        Ok(matches) => matches,
        Err(error) => {
            let _ = error.print();
            return 2;
        }
    };

    match S::default().execute(matches).await {
        Ok(_) => 0,
        Err(error) => {
            tracing::error!(script = S::locator(), %error, "script failed");
            1
        }
    }
}

/// Stand-alone entry point: run script `S` with the process's own
/// command-line arguments.
pub async fn run_script_main<S>() -> i32
where
    S: Script + Default,
{
    run_script_from::<S, _>(std::env::args().skip(1)).await
}
