//! Config Mutation Coordinator
//!
//! Drives the mutate protocol around a shared, file-backed configuration:
//!
//! 1. `update` applies the mutation in memory
//! 2. `validate` inspects the mutated state (or is skipped)
//! 3. findings at or above the rejection threshold ⇒ `revert`, task succeeds
//!    as a reported rejection; otherwise `save`
//! 4. a failing `save` (or validator) is compensated by `revert`
//!
//! # Critical Invariant
//!
//! The configuration is never left changed-but-unsaved by a finished task,
//! unless the compensating revert itself failed; that case is recorded in
//! the failure's `compensation` and the stage ends in `RevertFailed`.
//!
//! `revert` may run after a partially applied `update` only through the
//! validator-failure path; stores must make `revert` safe to call on any
//! in-memory state.

use crate::error::{RequestError, Step, StepError, TaskFailure};
use crate::request::{invoke, ActionFn, ProtocolFailure, Request, Response, ValidateFn};
use crate::task::Progress;
use crate::types::{EngineConfig, MutationStage};
use cfgd_problem::{ProblemSet, Severity, Validation};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Mutate protocol: update → validate → revert or save
pub struct UpdateRequest {
    name: String,
    severity: Severity,
    reject_at: Severity,
    update: ActionFn,
    validate: Option<ValidateFn>,
    revert: ActionFn,
    save: ActionFn,
    exclusive: Option<Arc<Mutex<()>>>,
}

impl UpdateRequest {
    /// Start assembling an update request
    #[inline]
    #[must_use]
    pub fn builder() -> UpdateRequestBuilder {
        UpdateRequestBuilder::new()
    }

    /// Report threshold
    #[inline]
    #[must_use]
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Rejection threshold
    #[inline]
    #[must_use]
    pub fn reject_at(&self) -> Severity {
        self.reject_at
    }

    /// Whether validation will run
    #[inline]
    #[must_use]
    pub fn validates(&self) -> bool {
        self.validate.is_some()
    }

    fn compensate(revert: ActionFn, error: StepError, progress: &Progress) -> TaskFailure {
        match invoke(Step::Revert, revert) {
            Ok(()) => {
                progress.advance(MutationStage::Reverted);
                TaskFailure::new(error)
            }
            Err(revert_error) => {
                tracing::error!(
                    task_id = ?progress.task_id(),
                    error = %revert_error,
                    "compensating revert failed; in-memory configuration may be dirty"
                );
                progress.advance(MutationStage::RevertFailed);
                TaskFailure::new(error).with_compensation(revert_error)
            }
        }
    }
}

impl Request for UpdateRequest {
    type Output = ();

    fn name(&self) -> &str {
        &self.name
    }

    fn initial_stage(&self) -> Option<MutationStage> {
        Some(MutationStage::Pending)
    }

    fn execute(self, progress: &Progress) -> Result<Response<()>, ProtocolFailure> {
        let UpdateRequest {
            severity,
            reject_at,
            update,
            validate,
            revert,
            save,
            exclusive,
            ..
        } = self;

        let _guard = exclusive.as_ref().map(|lock| lock.lock());

        // 1. Tentative apply
        if let Err(e) = invoke(Step::Update, update) {
            progress.advance(MutationStage::UpdateFailed);
            return Err(e.into());
        }
        progress.advance(MutationStage::Updated);

        // 2. Validate the mutated state
        let validation = match validate {
            Some(validate) => match invoke(Step::Validate, validate) {
                Ok(problems) => Validation::Completed(problems),
                Err(e) => {
                    progress.advance(MutationStage::ValidationFailed);
                    return Err(Self::compensate(revert, e, progress).into());
                }
            },
            None => Validation::Skipped,
        };
        progress.advance(MutationStage::Validated);

        // Problems below the report threshold take no part in the decision
        let reported = validation.filtered(severity);
        let rejected = reported.problems().has_severity_at_least(reject_at);

        // 3. Commit or compensate
        if rejected {
            tracing::warn!(
                task_id = ?progress.task_id(),
                max_severity = ?reported.problems().max_severity(),
                %reject_at,
                "mutation rejected by validation, reverting"
            );
            if let Err(e) = invoke(Step::Revert, revert) {
                progress.advance(MutationStage::RevertFailed);
                return Err(ProtocolFailure::with_validation(TaskFailure::new(e), reported));
            }
            progress.advance(MutationStage::Reverted);
            return Ok(Response {
                body: None,
                validation: reported,
            });
        }

        if let Err(e) = invoke(Step::Save, save) {
            progress.advance(MutationStage::SaveFailed);
            let failure = Self::compensate(revert, e, progress);
            return Err(ProtocolFailure::with_validation(failure, reported));
        }
        progress.advance(MutationStage::Saved);

        Ok(Response {
            body: None,
            validation: reported,
        })
    }
}

impl fmt::Debug for UpdateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateRequest")
            .field("name", &self.name)
            .field("severity", &self.severity)
            .field("reject_at", &self.reject_at)
            .field("validate", &self.validate.is_some())
            .field("exclusive", &self.exclusive.is_some())
            .finish_non_exhaustive()
    }
}

/// Assembles an [`UpdateRequest`]
pub struct UpdateRequestBuilder {
    name: String,
    severity: Severity,
    reject_at: Severity,
    update: Option<ActionFn>,
    validate: Option<ValidateFn>,
    revert: Option<ActionFn>,
    save: Option<ActionFn>,
    exclusive: Option<Arc<Mutex<()>>>,
}

impl UpdateRequestBuilder {
    /// Empty builder: report warnings and above, reject errors and above
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "update".to_string(),
            severity: Severity::Warning,
            reject_at: Severity::Error,
            update: None,
            validate: None,
            revert: None,
            save: None,
            exclusive: None,
        }
    }

    /// Take both thresholds from engine configuration
    #[must_use]
    pub fn defaults(mut self, config: &EngineConfig) -> Self {
        self.severity = config.default_severity;
        self.reject_at = config.reject_at;
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

    /// Minimum severity that rejects the mutation
    #[must_use]
    pub fn reject_at(mut self, severity: Severity) -> Self {
        self.reject_at = severity;
        self
    }

    /// Mutator; must apply fully or not at all
    #[must_use]
    pub fn update<F>(mut self, update: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.update = Some(Box::new(update));
        self
    }

    /// Validator run against the mutated state
    #[must_use]
    pub fn validate<F>(mut self, validate: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<ProblemSet> + Send + 'static,
    {
        self.validate = Some(Box::new(validate));
        self
    }

    /// Set the validator only when `enabled`
    #[must_use]
    pub fn validate_if<F>(self, enabled: bool, validate: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<ProblemSet> + Send + 'static,
    {
        if enabled {
            self.validate(validate)
        } else {
            self
        }
    }

    /// Undo for the mutator
    #[must_use]
    pub fn revert<F>(mut self, revert: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.revert = Some(Box::new(revert));
        self
    }

    /// Durable persist of an accepted mutation
    #[must_use]
    pub fn save<F>(mut self, save: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.save = Some(Box::new(save));
        self
    }

    /// Hold `lock` for the whole protocol
    ///
    /// Serializes mutations that share the lock, e.g. all mutations of one
    /// deployment.
    #[must_use]
    pub fn exclusive(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.exclusive = Some(lock);
        self
    }

    /// Finish assembly
    ///
    /// # Errors
    /// - `RequestError::MissingCallback` if update, revert or save is missing
    pub fn build(self) -> Result<UpdateRequest, RequestError> {
        let missing = |callback: &'static str| RequestError::MissingCallback {
            request: "update",
            callback,
        };
        Ok(UpdateRequest {
            name: self.name,
            severity: self.severity,
            reject_at: self.reject_at,
            update: self.update.ok_or_else(|| missing("update"))?,
            validate: self.validate,
            revert: self.revert.ok_or_else(|| missing("revert"))?,
            save: self.save.ok_or_else(|| missing("save"))?,
            exclusive: self.exclusive,
        })
    }
}

impl Default for UpdateRequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UpdateRequestBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateRequestBuilder")
            .field("name", &self.name)
            .field("severity", &self.severity)
            .field("reject_at", &self.reject_at)
            .field("update", &self.update.is_some())
            .field("validate", &self.validate.is_some())
            .field("revert", &self.revert.is_some())
            .field("save", &self.save.is_some())
            .finish()
    }
}
