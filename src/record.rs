//! Task records and their argument encoding.

use crate::context::TaskContext;
use crate::error::{ExecutionFailure, ForgeError, ForgeResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Mutex, OnceLock};
use std::time::SystemTime;
use uuid::{ContextV7, Timestamp, Uuid};

/// Unique, time-ordered identifier for a task record.
///
/// Ids generated in one process sort in creation order, which gives the
/// store its FIFO tiebreak within equal `run_at` timestamps.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RecordId(Uuid);

static ID_CONTEXT: OnceLock<Mutex<ContextV7>> = OnceLock::new();

impl RecordId {
    /// Generate a fresh id. Monotonic within the process.
    pub fn generate() -> Self {
        let context = ID_CONTEXT
            .get_or_init(|| Mutex::new(ContextV7::new()))
            .lock()
            .unwrap();
        Self(Uuid::new_v7(Timestamp::now(&*context)))
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// State of a record in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    /// Eligible to be claimed once `run_at` has passed
    Ready,
    /// Claimed by exactly one worker
    Busy,
    /// Finished successfully; terminal
    Complete,
    /// Finished with a failure; terminal
    Error,
}

impl TaskState {
    /// Terminal states are never mutated again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Complete | TaskState::Error)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Ready => "ready",
            TaskState::Busy => "busy",
            TaskState::Complete => "complete",
            TaskState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Whether a terminal record carries a return value or an error description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultKind {
    /// `result` is the serialized return value
    Ok,
    /// `result` is a serialized [`ExecutionFailure`]
    Error,
}

/// Positional and keyword arguments for one task invocation.
///
/// The encoding is `serde_json::Value`: primitives, strings, sequences and
/// string-keyed maps round-trip by value. Anything else is rejected at
/// enqueue time, before a record is written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskArgs {
    /// Ordered positional values
    pub args: Vec<Value>,
    /// Keyword values by name
    pub kwargs: serde_json::Map<String, Value>,
}

impl TaskArgs {
    /// Empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg<T: Serialize>(mut self, value: T) -> ForgeResult<Self> {
        let encoded = serde_json::to_value(value).map_err(ForgeError::unserializable)?;
        self.args.push(encoded);
        Ok(self)
    }

    /// Set a keyword argument.
    pub fn kwarg<T: Serialize>(mut self, key: impl Into<String>, value: T) -> ForgeResult<Self> {
        let encoded = serde_json::to_value(value).map_err(ForgeError::unserializable)?;
        self.kwargs.insert(key.into(), encoded);
        Ok(self)
    }

    /// Positional argument by index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Positional argument by index, as a string slice.
    pub fn str_arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(Value::as_str)
    }

    /// Keyword argument by name.
    pub fn kwarg_value(&self, key: &str) -> Option<&Value> {
        self.kwargs.get(key)
    }
}

/// A durable unit of work: one enqueued invocation of a named task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique, sortable identifier
    pub id: RecordId,
    /// Key into the task registry
    pub task_name: String,
    /// Recorded invocation arguments
    pub args: TaskArgs,
    /// Context captured at enqueue time
    pub context: TaskContext,
    /// Current state
    pub state: TaskState,
    /// `None` until terminal
    pub result_kind: Option<ResultKind>,
    /// Serialized return value or failure description
    pub result: Option<Value>,
    /// Whether side-channel notifications are suppressed during execution
    pub notifications_suppressed: bool,
    /// Earliest eligible execution time
    pub run_at: SystemTime,
    /// When the record was created
    pub created_at: SystemTime,
    /// When the current (or last) claim started
    pub started_at: Option<SystemTime>,
    /// When the record reached a terminal state
    pub finished_at: Option<SystemTime>,
    /// Tag of the claiming worker while `busy`
    pub process_tag: Option<String>,
    /// Claims so far, including sweeper requeues
    pub attempts: u32,
}

impl TaskRecord {
    /// Build a fresh `ready` record.
    pub fn new(
        task_name: impl Into<String>,
        args: TaskArgs,
        context: TaskContext,
        notifications_suppressed: bool,
        run_at: SystemTime,
    ) -> Self {
        Self {
            id: RecordId::generate(),
            task_name: task_name.into(),
            args,
            context,
            state: TaskState::Ready,
            result_kind: None,
            result: None,
            notifications_suppressed,
            run_at,
            created_at: SystemTime::now(),
            started_at: None,
            finished_at: None,
            process_tag: None,
            attempts: 0,
        }
    }

    /// Decode a terminal failure description, if this record holds one.
    pub fn failure(&self) -> Option<ExecutionFailure> {
        if self.result_kind != Some(ResultKind::Error) {
            return None;
        }
        self.result
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
    }
}

/// What a worker reports when it finalizes a claimed record.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The callable returned a value
    Success(Value),
    /// The execution failed; classification included
    Failure(ExecutionFailure),
}

impl Outcome {
    /// Split into the stored `(state, result_kind, result)` triple.
    pub fn into_parts(self) -> (TaskState, ResultKind, Value) {
        match self {
            Outcome::Success(value) => (TaskState::Complete, ResultKind::Ok, value),
            Outcome::Failure(failure) => {
                let value = serde_json::to_value(&failure)
                    .unwrap_or_else(|_| Value::String(failure.message));
                (TaskState::Error, ResultKind::Error, value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_ids_sort_in_generation_order() {
        let ids: Vec<RecordId> = (0..64).map(|_| RecordId::generate()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn args_builder_round_trips_values() {
        let args = TaskArgs::new()
            .arg("hello")
            .unwrap()
            .arg(vec![1, 2, 3])
            .unwrap()
            .kwarg("flag", true)
            .unwrap();

        assert_eq!(args.str_arg(0), Some("hello"));
        assert_eq!(args.get(1), Some(&json!([1, 2, 3])));
        assert_eq!(args.kwarg_value("flag"), Some(&json!(true)));

        let encoded = serde_json::to_value(&args).unwrap();
        let back: TaskArgs = serde_json::from_value(encoded).unwrap();
        assert_eq!(back, args);
    }

    #[test]
    fn non_string_map_keys_are_rejected() {
        let bad = std::collections::HashMap::from([(vec![1u8, 2], "x")]);
        let err = TaskArgs::new().arg(bad).unwrap_err();
        assert!(matches!(
            err,
            ForgeError::UnserializableArgument { .. }
        ));
    }

    #[test]
    fn fresh_record_is_ready() {
        let record = TaskRecord::new(
            "echo",
            TaskArgs::new(),
            TaskContext::default(),
            false,
            SystemTime::now(),
        );
        assert_eq!(record.state, TaskState::Ready);
        assert_eq!(record.attempts, 0);
        assert!(record.result_kind.is_none());
        assert!(!record.state.is_terminal());
    }

    #[test]
    fn outcome_splits_into_stored_parts() {
        let (state, kind, value) = Outcome::Success(json!("done")).into_parts();
        assert_eq!(state, TaskState::Complete);
        assert_eq!(kind, ResultKind::Ok);
        assert_eq!(value, json!("done"));

        let failure = crate::error::ExecutionFailure::unknown_task("ghost");
        let (state, kind, value) = Outcome::Failure(failure).into_parts();
        assert_eq!(state, TaskState::Error);
        assert_eq!(kind, ResultKind::Error);
        assert_eq!(value["kind"], json!("unknown-task"));
    }

    #[test]
    fn state_serializes_kebab_case() {
        assert_eq!(serde_json::to_string(&TaskState::Ready).unwrap(), "\"ready\"");
        assert_eq!(TaskState::Busy.to_string(), "busy");
        assert!(TaskState::Complete.is_terminal());
        assert!(TaskState::Error.is_terminal());
    }
}
