//! Error types for cfgd Core
//!
//! Provides error handling for:
//! - Callback failures inside a task protocol (`StepError`)
//! - The terminal record of a failed task (`TaskFailure`)
//! - Polling and repository lookups (`TaskError`)
//! - Request assembly (`RequestError`)
//!
//! A mutation rejected by validation is not an error anywhere in this module:
//! it is a succeeded task whose problems crossed the rejection threshold.

use crate::types::TaskId;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Protocol step that invokes a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    /// Produce the read result
    Build,
    /// Inspect state and report problems
    Validate,
    /// Apply a mutation in memory
    Update,
    /// Persist an accepted mutation
    Save,
    /// Undo an in-memory mutation
    Revert,
    /// Plain submitted work
    Work,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Build => "build",
            Step::Validate => "validate",
            Step::Update => "update",
            Step::Save => "save",
            Step::Revert => "revert",
            Step::Work => "work",
        };
        f.write_str(name)
    }
}

/// A callback failed
///
/// The original error is kept behind an `Arc` so task snapshots stay `Clone`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StepError {
    /// Read result could not be produced
    #[error("build failed: {0:#}")]
    Build(Arc<anyhow::Error>),

    /// Validator itself failed (not: validator found problems)
    #[error("validation failed: {0:#}")]
    Validate(Arc<anyhow::Error>),

    /// Mutator failed; configuration presumed unchanged
    #[error("update failed: {0:#}")]
    Update(Arc<anyhow::Error>),

    /// Persisting an accepted mutation failed
    #[error("save failed: {0:#}")]
    Save(Arc<anyhow::Error>),

    /// Undoing a mutation failed
    #[error("revert failed: {0:#}")]
    Revert(Arc<anyhow::Error>),

    /// Plain submitted work failed
    #[error("work failed: {0:#}")]
    Work(Arc<anyhow::Error>),

    /// Callback panicked
    #[error("{step} panicked: {message}")]
    Panicked {
        /// Step whose callback panicked
        step: Step,
        /// Panic payload, if it was a string
        message: String,
    },

    /// Worker ended without reporting an outcome
    #[error("task worker aborted: {0}")]
    Aborted(String),
}

impl StepError {
    /// Wrap a callback error for the given step
    #[must_use]
    pub fn from_step(step: Step, error: anyhow::Error) -> Self {
        let error = Arc::new(error);
        match step {
            Step::Build => Self::Build(error),
            Step::Validate => Self::Validate(error),
            Step::Update => Self::Update(error),
            Step::Save => Self::Save(error),
            Step::Revert => Self::Revert(error),
            Step::Work => Self::Work(error),
        }
    }

    /// Step that failed, `None` for an aborted worker
    #[must_use]
    pub fn step(&self) -> Option<Step> {
        match self {
            Self::Build(_) => Some(Step::Build),
            Self::Validate(_) => Some(Step::Validate),
            Self::Update(_) => Some(Step::Update),
            Self::Save(_) => Some(Step::Save),
            Self::Revert(_) => Some(Step::Revert),
            Self::Work(_) => Some(Step::Work),
            Self::Panicked { step, .. } => Some(*step),
            Self::Aborted(_) => None,
        }
    }

    /// Error returned by the callback, if it returned one
    #[must_use]
    pub fn callback_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Build(e)
            | Self::Validate(e)
            | Self::Update(e)
            | Self::Save(e)
            | Self::Revert(e)
            | Self::Work(e) => Some(e),
            Self::Panicked { .. } | Self::Aborted(_) => None,
        }
    }
}

impl Serialize for StepError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("StepError", 2)?;
        state.serialize_field("step", &self.step())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Terminal record of a failed task
#[derive(Debug, Clone, Serialize)]
pub struct TaskFailure {
    /// What made the task fail
    pub error: StepError,
    /// Compensating revert that failed afterwards, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compensation: Option<StepError>,
}

impl TaskFailure {
    /// Failure with no compensation attempted or needed
    #[inline]
    #[must_use]
    pub fn new(error: StepError) -> Self {
        Self {
            error,
            compensation: None,
        }
    }

    /// Record a failed compensating revert
    #[inline]
    #[must_use]
    pub fn with_compensation(mut self, compensation: StepError) -> Self {
        self.compensation = Some(compensation);
        self
    }

    /// Step that made the task fail
    #[inline]
    #[must_use]
    pub fn step(&self) -> Option<Step> {
        self.error.step()
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some(compensation) = &self.compensation {
            write!(f, "; compensating {compensation}")?;
        }
        Ok(())
    }
}

impl std::error::Error for TaskFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<StepError> for TaskFailure {
    fn from(error: StepError) -> Self {
        Self::new(error)
    }
}

/// Polling and lookup errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// No task with this id was submitted (or it was reaped)
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// Result requested while the task is still running
    #[error("task {0} is still running")]
    NotReady(TaskId),

    /// Task ended in failure
    #[error("task {id} failed: {failure}")]
    Failed {
        /// Task id
        id: TaskId,
        /// Captured failure
        failure: TaskFailure,
    },

    /// Typed lookup with the wrong result type
    #[error("task {id} produces {actual}, not {expected}")]
    TypeMismatch {
        /// Task id
        id: TaskId,
        /// Requested result type
        expected: &'static str,
        /// Result type the task was submitted with
        actual: &'static str,
    },

    /// Repository created outside a tokio runtime
    #[error("no tokio runtime available to run tasks")]
    NoRuntime,
}

impl TaskError {
    /// Check if this only means "poll again later"
    #[inline]
    #[must_use]
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady(_))
    }
}

/// Request assembly errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// Required callback never set
    #[error("{request} request is missing its {callback} callback")]
    MissingCallback {
        /// Request kind
        request: &'static str,
        /// Callback name
        callback: &'static str,
    },
}

/// Illegal state or stage transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    /// Transition not in the allowed table
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },
}
