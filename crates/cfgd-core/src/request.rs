//! Requests executed by tasks
//!
//! A request is an immutable, single-use bundle of callbacks plus the fixed
//! protocol that drives them. Builders assemble the callbacks; `build()`
//! consumes the builder, and submitting consumes the request.
//!
//! - [`ReadRequest`]: build, then optionally validate
//! - [`crate::UpdateRequest`]: update, validate, revert or save
//! - [`FnRequest`]: any closure, for plain background work

use crate::error::{RequestError, Step, StepError, TaskFailure};
use crate::task::Progress;
use crate::types::{EngineConfig, MutationStage};
use cfgd_problem::{ProblemSet, Severity, Validation};
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Callback producing a read result
pub type BuildFn<T> = Box<dyn FnOnce() -> anyhow::Result<T> + Send>;
/// Callback inspecting shared state and reporting findings
pub type ValidateFn = Box<dyn FnOnce() -> anyhow::Result<ProblemSet> + Send>;
/// Callback with a side effect only (update, revert, save)
pub type ActionFn = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// What a protocol produced when it ran to completion
#[derive(Debug, Clone, PartialEq)]
pub struct Response<T> {
    /// Domain result; `None` for mutations
    pub body: Option<T>,
    /// Reported (already filtered) findings
    pub validation: Validation,
}

/// A protocol that ended in failure
#[derive(Debug, Clone)]
pub struct ProtocolFailure {
    /// Terminal failure record
    pub failure: TaskFailure,
    /// Validation reached before failing, if any
    pub validation: Option<Validation>,
}

impl ProtocolFailure {
    /// Failure carrying the findings reached so far
    #[inline]
    #[must_use]
    pub fn with_validation(failure: TaskFailure, validation: Validation) -> Self {
        Self {
            failure,
            validation: Some(validation),
        }
    }
}

impl From<StepError> for ProtocolFailure {
    fn from(error: StepError) -> Self {
        Self {
            failure: TaskFailure::new(error),
            validation: None,
        }
    }
}

impl From<TaskFailure> for ProtocolFailure {
    fn from(failure: TaskFailure) -> Self {
        Self {
            failure,
            validation: None,
        }
    }
}

/// A unit of work the repository can schedule
///
/// `execute` runs on a blocking worker thread and must drive the protocol to
/// an outcome. It is called exactly once.
pub trait Request: Send + 'static {
    /// Domain result type
    type Output: Clone + Serialize + Send + Sync + 'static;

    /// Task name shown in snapshots and logs
    fn name(&self) -> &str;

    /// Stage the task starts in; `Some` only for staged protocols
    fn initial_stage(&self) -> Option<MutationStage> {
        None
    }

    /// Run the protocol
    ///
    /// # Errors
    /// Returns `ProtocolFailure` if a callback failed.
    fn execute(self, progress: &Progress) -> Result<Response<Self::Output>, ProtocolFailure>;
}

/// Invoke one callback, turning errors and panics into a `StepError`
pub(crate) fn invoke<T>(
    step: Step,
    callback: impl FnOnce() -> anyhow::Result<T>,
) -> Result<T, StepError> {
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(StepError::from_step(step, e)),
        Err(payload) => Err(StepError::Panicked {
            step,
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Read protocol: build a result, optionally validate, report both
pub struct ReadRequest<T> {
    name: String,
    severity: Severity,
    build: BuildFn<T>,
    validate: Option<ValidateFn>,
}

impl<T> ReadRequest<T> {
    /// Start assembling a read request
    #[inline]
    #[must_use]
    pub fn builder() -> ReadRequestBuilder<T> {
        ReadRequestBuilder::new()
    }

    /// Report threshold
    #[inline]
    #[must_use]
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Whether validation will run
    #[inline]
    #[must_use]
    pub fn validates(&self) -> bool {
        self.validate.is_some()
    }
}

impl<T> Request for ReadRequest<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    fn execute(self, progress: &Progress) -> Result<Response<T>, ProtocolFailure> {
        let ReadRequest {
            severity,
            build,
            validate,
            ..
        } = self;

        let body = invoke(Step::Build, build)?;

        let validation = match validate {
            Some(validate) => {
                let problems = invoke(Step::Validate, validate)?;
                tracing::debug!(
                    task_id = ?progress.task_id(),
                    found = problems.len(),
                    %severity,
                    "read validation finished"
                );
                Validation::Completed(problems.filter_by_severity(severity))
            }
            None => Validation::Skipped,
        };

        Ok(Response {
            body: Some(body),
            validation,
        })
    }
}

impl<T> fmt::Debug for ReadRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadRequest")
            .field("name", &self.name)
            .field("severity", &self.severity)
            .field("validate", &self.validate.is_some())
            .finish_non_exhaustive()
    }
}

/// Assembles a [`ReadRequest`]
pub struct ReadRequestBuilder<T> {
    name: String,
    severity: Severity,
    build: Option<BuildFn<T>>,
    validate: Option<ValidateFn>,
}

impl<T> ReadRequestBuilder<T> {
    /// Empty builder, reporting warnings and above
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "read".to_string(),
            severity: Severity::Warning,
            build: None,
            validate: None,
        }
    }

    /// Take the report threshold from engine configuration
    #[must_use]
    pub fn defaults(mut self, config: &EngineConfig) -> Self {
        self.severity = config.default_severity;
        self
    }

    /// Task name
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Minimum severity reported
    #[must_use]
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Callback producing the result
    #[must_use]
    pub fn build_response<F>(mut self, build: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        self.build = Some(Box::new(build));
        self
    }

    /// Callback validating the result's source
    #[must_use]
    pub fn validate_response<F>(mut self, validate: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<ProblemSet> + Send + 'static,
    {
        self.validate = Some(Box::new(validate));
        self
    }

    /// Set the validator only when `enabled`
    #[must_use]
    pub fn validate_response_if<F>(self, enabled: bool, validate: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<ProblemSet> + Send + 'static,
    {
        if enabled {
            self.validate_response(validate)
        } else {
            self
        }
    }

    /// Finish assembly
    ///
    /// # Errors
    /// - `RequestError::MissingCallback` if no build callback was set
    pub fn build(self) -> Result<ReadRequest<T>, RequestError> {
        let build = self.build.ok_or(RequestError::MissingCallback {
            request: "read",
            callback: "build",
        })?;
        Ok(ReadRequest {
            name: self.name,
            severity: self.severity,
            build,
            validate: self.validate,
        })
    }
}

impl<T> Default for ReadRequestBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ReadRequestBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadRequestBuilder")
            .field("name", &self.name)
            .field("severity", &self.severity)
            .field("build", &self.build.is_some())
            .field("validate", &self.validate.is_some())
            .finish()
    }
}

/// Plain closure submitted as a task
///
/// `Ok` becomes the result, `Err` or a panic fails the task.
pub struct FnRequest<F> {
    name: String,
    work: F,
}

impl<F> FnRequest<F> {
    /// Wrap a closure
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, work: F) -> Self {
        Self {
            name: name.into(),
            work,
        }
    }
}

impl<F, T> Request for FnRequest<F>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Clone + Serialize + Send + Sync + 'static,
{
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    fn execute(self, _progress: &Progress) -> Result<Response<T>, ProtocolFailure> {
        let body = invoke(Step::Work, self.work)?;
        Ok(Response {
            body: Some(body),
            validation: Validation::Skipped,
        })
    }
}
