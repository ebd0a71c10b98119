//! Error types for ForgeQ operations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used throughout ForgeQ.
pub type ForgeResult<T> = Result<T, ForgeError>;

/// Main error type for ForgeQ operations.
#[derive(Error, Debug)]
pub enum ForgeError {
    /// Task name not found in the registry
    #[error("task '{name}' is not registered")]
    UnknownTask {
        /// The task name that wasn't found
        name: String,
    },

    /// A different handler is already registered under this name
    #[error("task name '{name}' is already registered with a different handler")]
    DuplicateTaskName {
        /// The contested task name
        name: String,
    },

    /// Script locator not found in the script registry
    #[error("script '{locator}' is not registered")]
    UnknownScript {
        /// The locator that wasn't found
        locator: String,
    },

    /// A different script is already registered under this locator
    #[error("script locator '{locator}' is already registered with a different script")]
    DuplicateScriptLocator {
        /// The contested locator
        locator: String,
    },

    /// An argument could not be encoded at enqueue time
    #[error("argument cannot be serialized: {detail}")]
    UnserializableArgument {
        /// What the encoder rejected
        detail: String,
    },

    /// Task record store failure
    #[error("storage error: {message}")]
    Storage {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Record exists but is not in a state that permits the operation
    #[error("record {id} cannot transition: {detail}")]
    InvalidTransition {
        /// The record in question
        id: String,
        /// Why the transition was rejected
        detail: String,
    },

    /// Record does not exist
    #[error("record {id} not found")]
    RecordNotFound {
        /// The missing record id
        id: String,
    },

    /// Mutually exclusive or otherwise invalid post options
    #[error("invalid post options: {message}")]
    InvalidOptions {
        /// Error message
        message: String,
    },

    /// Configuration error
    #[error("configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Forge is already running
    #[error("forge is already running")]
    AlreadyRunning,

    /// Forge is not running
    #[error("forge is not running")]
    NotRunning,
}

impl ForgeError {
    /// Create a new storage error wrapping an underlying cause.
    pub fn storage<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a storage error with no underlying cause.
    pub fn storage_msg(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an enqueue-time rejection from a serialization failure.
    pub fn unserializable(source: serde_json::Error) -> Self {
        Self::UnserializableArgument {
            detail: source.to_string(),
        }
    }
}

/// Failure taxonomy recorded on terminal `error` records.
///
/// These are classification kinds, not error types: every failure a worker
/// finalizes carries exactly one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// The recorded task name is not present in the registry
    UnknownTask,
    /// Argument decoding or parsing failed before user code ran
    BadArguments,
    /// The user callable raised a plain failure
    UserError,
    /// The user callable raised an aggregator of sub-errors
    Compound,
    /// The store failed during claim or finalize
    StorageError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::UnknownTask => "unknown-task",
            ErrorKind::BadArguments => "bad-arguments",
            ErrorKind::UserError => "user-error",
            ErrorKind::Compound => "compound",
            ErrorKind::StorageError => "storage-error",
        };
        f.write_str(s)
    }
}

/// One failure inside a batch, or the embedded original error of a
/// `user-error` classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubError {
    /// Domain-specific kind, e.g. "divide-by-zero"
    pub kind: String,
    /// Human-readable message
    pub message: String,
    /// Optional causal chain, rendered as text
    pub cause: Option<String>,
}

impl SubError {
    /// Build a sub-error without a cause.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            cause: None,
        }
    }

    /// Attach a causal chain rendered from an error value.
    pub fn caused_by<E: std::error::Error>(mut self, cause: &E) -> Self {
        self.cause = Some(render_chain(cause));
        self
    }
}

fn render_chain(error: &dyn std::error::Error) -> String {
    let mut out = error.to_string();
    let mut current = error.source();
    while let Some(cause) = current {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        current = cause.source();
    }
    out
}

/// Composite failure from a batch operation.
///
/// Batch tasks collect per-item failures into one aggregator and raise it
/// once at the end. An empty aggregator means the batch succeeded and must
/// not be raised; [`CompoundError::into_result`] encodes that rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompoundError {
    /// Per-item failures in the order they occurred
    pub errors: Vec<SubError>,
}

impl CompoundError {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one sub-error.
    pub fn push(&mut self, error: SubError) {
        self.errors.push(error);
    }

    /// Number of collected sub-errors.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// True when no sub-error has been collected.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Finish a batch: `Ok(value)` when nothing failed, otherwise the
    /// aggregator raised as a [`TaskError`].
    pub fn into_result<T>(self, value: T) -> Result<T, TaskError> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(TaskError::Compound(self))
        }
    }
}

impl std::fmt::Display for CompoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "batch failed with {} sub-error(s)", self.errors.len())
    }
}

impl std::error::Error for CompoundError {}

/// Error raised by task handlers and scripts.
///
/// The worker loop classifies each variant into an [`ErrorKind`] when it
/// finalizes the record; nothing re-raises into the loop itself.
#[derive(Error, Debug)]
pub enum TaskError {
    /// A plain failure with a domain-specific kind
    #[error("{kind}: {message}")]
    Failure {
        /// Domain-specific kind, e.g. "divide-by-zero"
        kind: String,
        /// Human-readable message
        message: String,
    },

    /// Argument decoding or parsing failed before user code ran
    #[error("bad arguments: {0}")]
    BadArguments(String),

    /// Aggregated per-item failures from a batch
    #[error(transparent)]
    Compound(#[from] CompoundError),
}

impl TaskError {
    /// Create a plain failure.
    pub fn failure(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failure {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Serialized description of a failed execution, stored in `result` on
/// terminal `error` records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    /// Classification kind
    pub kind: ErrorKind,
    /// Top-level message
    pub message: String,
    /// Embedded original errors: one for `user-error`, the ordered batch
    /// for `compound`, empty otherwise
    pub errors: Vec<SubError>,
}

impl ExecutionFailure {
    /// Classify a handler-raised error.
    pub fn from_task_error(error: TaskError) -> Self {
        match error {
            TaskError::Failure { kind, message } => Self {
                kind: ErrorKind::UserError,
                message: message.clone(),
                errors: vec![SubError::new(kind, message)],
            },
            TaskError::BadArguments(message) => Self {
                kind: ErrorKind::BadArguments,
                message,
                errors: Vec::new(),
            },
            TaskError::Compound(compound) => Self {
                kind: ErrorKind::Compound,
                message: compound.to_string(),
                errors: compound.errors,
            },
        }
    }

    /// Failure for a record whose task name resolves to nothing.
    pub fn unknown_task(name: &str) -> Self {
        Self {
            kind: ErrorKind::UnknownTask,
            message: format!("task '{name}' is not registered"),
            errors: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&ErrorKind::UnknownTask).unwrap();
        assert_eq!(json, "\"unknown-task\"");
        assert_eq!(ErrorKind::BadArguments.to_string(), "bad-arguments");
    }

    #[test]
    fn empty_aggregator_is_success() {
        let compound = CompoundError::new();
        assert!(compound.into_result(42).is_ok());
    }

    #[test]
    fn aggregator_preserves_order() {
        let mut compound = CompoundError::new();
        compound.push(SubError::new("io", "first"));
        compound.push(SubError::new("parse", "second"));
        compound.push(SubError::new("io", "third"));

        let err = compound.into_result(()).unwrap_err();
        let failure = ExecutionFailure::from_task_error(err);
        assert_eq!(failure.kind, ErrorKind::Compound);
        let messages: Vec<_> = failure.errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["first", "second", "third"]);
    }

    #[test]
    fn user_error_embeds_original_kind() {
        let err = TaskError::failure("divide-by-zero", "cannot divide by zero");
        let failure = ExecutionFailure::from_task_error(err);
        assert_eq!(failure.kind, ErrorKind::UserError);
        assert_eq!(failure.errors.len(), 1);
        assert_eq!(failure.errors[0].kind, "divide-by-zero");
    }

    #[test]
    fn sub_error_renders_cause_chain() {
        let io = std::io::Error::other("disk gone");
        let sub = SubError::new("io", "write failed").caused_by(&io);
        assert!(sub.cause.unwrap().contains("disk gone"));
    }

    #[test]
    fn failure_round_trips_through_json() {
        let failure = ExecutionFailure::from_task_error(TaskError::failure("x", "boom"));
        let value = serde_json::to_value(&failure).unwrap();
        let back: ExecutionFailure = serde_json::from_value(value).unwrap();
        assert_eq!(back, failure);
    }
}
