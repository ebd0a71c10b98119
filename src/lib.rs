//! # ForgeQ
//!
//! A durable, pollable task queue with scheduled execution.
//!
//! ## Features
//!
//! - **Durable records**: every enqueued invocation is a persisted record
//!   with a full state history
//! - **Atomic claims**: concurrent workers never observe the same record;
//!   FIFO by `(run_at, id)`
//! - **Scheduled execution**: post with a delay or an absolute run time
//! - **Script dispatch**: queue command-line-style scripts through a single
//!   dispatcher task, no per-script registration
//! - **Ambient context**: project/app/user/correlation ids captured at
//!   enqueue time and re-established around execution
//! - **Crash recovery**: a stale-claim sweeper returns orphaned records to
//!   the queue
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use forgeq::prelude::*;
//! use serde_json::{Value, json};
//!
//! #[derive(Default)]
//! struct EmailTask;
//!
//! #[async_trait::async_trait]
//! impl TaskHandler for EmailTask {
//!     async fn call(&self, args: &TaskArgs) -> Result<Value, TaskError> {
//!         let to = args.str_arg(0).ok_or_else(|| {
//!             TaskError::BadArguments("expected a recipient".into())
//!         })?;
//!         // Your email sending logic
//!         Ok(json!(format!("email sent to {to}")))
//!     }
//! }
//!
//! declare_task!("email.send", EmailTask);
//!
//! #[tokio::main]
//! async fn main() -> ForgeResult<()> {
//!     let forge = Forge::new(ForgeConfig::default())?;
//!     forge.start().await?;
//!
//!     let send = forge.handle("email.send").await?;
//!     let id = send.post(TaskArgs::new().arg("user@example.com")?).await?;
//!     println!("posted {id}");
//!
//!     forge.wait_for_shutdown().await
//! }
//! ```

pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod handle;
pub mod record;
pub mod script;
pub mod store;

pub mod prelude {
    pub use crate::config::*;
    pub use crate::context::{TaskContext, notifications_suppressed};
    pub use crate::core::registry::{
        TaskHandler, TaskOptions, TaskRegistry, global_registry,
    };
    pub use crate::core::{Forge, StaleSweeper, WorkerLoop};
    pub use crate::error::{
        CompoundError, ErrorKind, ForgeError, ForgeResult, SubError, TaskError,
    };
    pub use crate::handle::{PostOptions, TaskHandle};
    pub use crate::record::{
        Outcome, RecordId, ResultKind, TaskArgs, TaskRecord, TaskState,
    };
    pub use crate::script::{
        DISPATCH_TASK, Script, global_scripts, post_script, run_script_from,
        run_script_main,
    };
    pub use crate::store::{
        InMemoryStore, SharedStore, StoreFactory, StoreStats, TaskStore,
    };
    pub use async_trait::async_trait;
}

pub use crate::config::ForgeConfig;
pub use crate::context::TaskContext;
pub use crate::core::registry::{TaskHandler, TaskOptions, global_registry};
pub use crate::core::{Forge, StaleSweeper, WorkerLoop};
pub use crate::error::{CompoundError, ErrorKind, ForgeError, ForgeResult, TaskError};
pub use crate::handle::{PostOptions, TaskHandle};
pub use crate::record::{RecordId, TaskArgs, TaskRecord, TaskState};
pub use crate::script::Script;
pub use crate::store::{InMemoryStore, SharedStore, TaskStore};
pub use async_trait::async_trait;
