//! Task handles
//!
//! A task is shared between the repository, the worker executing it, and any
//! number of pollers. Only the worker writes to it (through [`Progress`] and the
//! crate-private completion methods); handles only observe.

use crate::error::{StepError, TaskError, TaskFailure};
use crate::request::Response;
use crate::state_machine;
use crate::types::{MutationStage, TaskId, TaskState};
use cfgd_problem::{ProblemSet, Validation};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::watch;

type AnyResult = Arc<dyn Any + Send + Sync>;

/// Shared task state, owned by the repository
pub(crate) struct TaskCell {
    id: TaskId,
    name: String,
    submitted_at: DateTime<Utc>,
    output_type: TypeId,
    output_type_name: &'static str,
    inner: RwLock<TaskInner>,
    state_tx: watch::Sender<TaskState>,
}

struct TaskInner {
    status: Status,
    stage: Option<MutationStage>,
    validation: Validation,
    finished_at: Option<DateTime<Utc>>,
}

enum Status {
    Running,
    Succeeded {
        result: Option<AnyResult>,
        rendered: Option<serde_json::Value>,
    },
    Failed(TaskFailure),
}

impl Status {
    fn state(&self) -> TaskState {
        match self {
            Status::Running => TaskState::Running,
            Status::Succeeded { .. } => TaskState::Succeeded,
            Status::Failed(_) => TaskState::Failed,
        }
    }
}

impl TaskCell {
    pub(crate) fn new<T: 'static>(name: String, stage: Option<MutationStage>) -> Self {
        let (state_tx, _) = watch::channel(TaskState::Running);
        Self {
            id: TaskId::new(),
            name,
            submitted_at: Utc::now(),
            output_type: TypeId::of::<T>(),
            output_type_name: type_name::<T>(),
            inner: RwLock::new(TaskInner {
                status: Status::Running,
                stage,
                validation: Validation::Skipped,
                finished_at: None,
            }),
            state_tx,
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Record a successful protocol run
    pub(crate) fn succeed<T>(&self, response: Response<T>)
    where
        T: Serialize + Send + Sync + 'static,
    {
        let Response { body, validation } = response;
        if body.is_some() && TypeId::of::<T>() != self.output_type {
            tracing::error!(
                task_id = %self.id,
                expected = self.output_type_name,
                actual = type_name::<T>(),
                "task result has the wrong type"
            );
            let failure = TaskFailure::new(StepError::Aborted(format!(
                "result type {} does not match task type {}",
                type_name::<T>(),
                self.output_type_name
            )));
            self.finish(Status::Failed(failure), Some(validation));
            return;
        }
        let rendered = body.as_ref().and_then(|value| match serde_json::to_value(value) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::warn!(
                    task_id = %self.id,
                    error = %e,
                    "task result is not representable as JSON"
                );
                None
            }
        });
        let result = body.map(|value| Arc::new(value) as AnyResult);
        self.finish(Status::Succeeded { result, rendered }, Some(validation));
    }

    /// Record a failed protocol run, keeping whatever validation it reached
    pub(crate) fn fail(&self, failure: TaskFailure, validation: Option<Validation>) {
        self.finish(Status::Failed(failure), validation);
    }

    fn finish(&self, status: Status, validation: Option<Validation>) {
        let to = status.state();
        {
            let mut inner = self.inner.write();
            let from = inner.status.state();
            if let Err(e) = state_machine::validate_transition(from, to) {
                tracing::error!(
                    task_id = %self.id,
                    error = %e,
                    "ignoring completion of finished task"
                );
                return;
            }
            inner.status = status;
            if let Some(validation) = validation {
                inner.validation = validation;
            }
            inner.finished_at = Some(Utc::now());
        }
        self.state_tx.send_replace(to);
    }

    pub(crate) fn set_stage(&self, to: MutationStage) {
        let mut inner = self.inner.write();
        match inner.stage {
            Some(from) => {
                if let Err(e) = state_machine::validate_stage_transition(from, to) {
                    tracing::error!(
                        task_id = %self.id,
                        error = %e,
                        "illegal mutation stage transition"
                    );
                    return;
                }
            }
            None => {
                tracing::error!(
                    task_id = %self.id,
                    stage = %to,
                    "stage update on a task without stages"
                );
                return;
            }
        }
        inner.stage = Some(to);
    }
}

/// Untyped handle to a submitted task
///
/// Cheap to clone. Every accessor observes the current state without blocking
/// on the worker.
#[derive(Clone)]
pub struct AnyTask {
    cell: Arc<TaskCell>,
}

impl AnyTask {
    pub(crate) fn from_cell(cell: Arc<TaskCell>) -> Self {
        Self { cell }
    }

    /// Task id
    #[inline]
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.cell.id
    }

    /// Human-readable task name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.cell.name
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.cell.inner.read().status.state()
    }

    /// Whether the task reached a terminal state
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Mutate-protocol stage, `None` for read and plain tasks
    #[must_use]
    pub fn stage(&self) -> Option<MutationStage> {
        self.cell.inner.read().stage
    }

    /// True for a mutation that validation rejected and that was reverted
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        let inner = self.cell.inner.read();
        matches!(inner.status, Status::Succeeded { .. })
            && inner.stage == Some(MutationStage::Reverted)
    }

    /// Validation outcome so far
    #[must_use]
    pub fn validation(&self) -> Validation {
        self.cell.inner.read().validation.clone()
    }

    /// Reported problems; empty if validation never ran
    #[must_use]
    pub fn problems(&self) -> ProblemSet {
        self.cell.inner.read().validation.problems().clone()
    }

    /// Failure record, present only once the task failed
    #[must_use]
    pub fn failure(&self) -> Option<TaskFailure> {
        match &self.cell.inner.read().status {
            Status::Failed(failure) => Some(failure.clone()),
            _ => None,
        }
    }

    /// Submission time
    #[inline]
    #[must_use]
    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.cell.submitted_at
    }

    /// Completion time, once terminal
    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.cell.inner.read().finished_at
    }

    /// Result rendered as JSON, once succeeded with a result
    ///
    /// # Errors
    /// - `TaskError::NotReady` while running
    /// - `TaskError::Failed` with the captured failure
    pub fn result_json(&self) -> Result<Option<serde_json::Value>, TaskError> {
        let inner = self.cell.inner.read();
        match &inner.status {
            Status::Running => Err(TaskError::NotReady(self.cell.id)),
            Status::Failed(failure) => Err(TaskError::Failed {
                id: self.cell.id,
                failure: failure.clone(),
            }),
            Status::Succeeded { rendered, .. } => Ok(rendered.clone()),
        }
    }

    /// Consistent copy of everything observable about the task
    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        let inner = self.cell.inner.read();
        let (result, failure) = match &inner.status {
            Status::Running => (None, None),
            Status::Succeeded { rendered, .. } => (rendered.clone(), None),
            Status::Failed(failure) => (None, Some(failure.clone())),
        };
        let state = inner.status.state();
        TaskSnapshot {
            id: self.cell.id,
            name: self.cell.name.clone(),
            state,
            stage: inner.stage,
            rejected: state == TaskState::Succeeded && inner.stage == Some(MutationStage::Reverted),
            result,
            validation: inner.validation.clone(),
            failure,
            submitted_at: self.cell.submitted_at,
            finished_at: inner.finished_at,
        }
    }

    /// Wait until the task is terminal, without polling
    pub async fn wait(&self) -> TaskState {
        let mut rx = self.cell.state_tx.subscribe();
        let state = match rx.wait_for(TaskState::is_terminal).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }

    /// Typed view of this task
    ///
    /// # Errors
    /// - `TaskError::TypeMismatch` if the task was submitted with another result type
    pub fn typed<T: 'static>(&self) -> Result<Task<T>, TaskError> {
        if self.cell.output_type == TypeId::of::<T>() {
            Ok(Task {
                handle: self.clone(),
                _output: PhantomData,
            })
        } else {
            Err(TaskError::TypeMismatch {
                id: self.cell.id,
                expected: type_name::<T>(),
                actual: self.cell.output_type_name,
            })
        }
    }
}

impl fmt::Debug for AnyTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyTask")
            .field("id", &self.cell.id)
            .field("name", &self.cell.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Typed handle to a submitted task
///
/// Dereferences to [`AnyTask`] for every untyped observer.
pub struct Task<T> {
    handle: AnyTask,
    _output: PhantomData<fn() -> T>,
}

impl<T> Task<T> {
    pub(crate) fn from_cell(cell: Arc<TaskCell>) -> Self {
        Self {
            handle: AnyTask::from_cell(cell),
            _output: PhantomData,
        }
    }

    /// Untyped handle
    #[inline]
    #[must_use]
    pub fn untyped(&self) -> AnyTask {
        self.handle.clone()
    }
}

impl<T: Clone + 'static> Task<T> {
    /// Domain result
    ///
    /// `Ok(None)` for a succeeded task that produces no payload (every
    /// mutation, rejected or saved).
    ///
    /// # Errors
    /// - `TaskError::NotReady` while running
    /// - `TaskError::Failed` with the captured failure
    /// - `TaskError::TypeMismatch` if the stored result is not a `T`
    pub fn result(&self) -> Result<Option<T>, TaskError> {
        let cell = &self.handle.cell;
        let inner = cell.inner.read();
        match &inner.status {
            Status::Running => Err(TaskError::NotReady(cell.id)),
            Status::Failed(failure) => Err(TaskError::Failed {
                id: cell.id,
                failure: failure.clone(),
            }),
            Status::Succeeded { result: None, .. } => Ok(None),
            Status::Succeeded {
                result: Some(value),
                ..
            } => value
                .downcast_ref::<T>()
                .cloned()
                .map(Some)
                .ok_or(TaskError::TypeMismatch {
                    id: cell.id,
                    expected: type_name::<T>(),
                    actual: cell.output_type_name,
                }),
        }
    }

    /// Wait for completion, then return the result
    ///
    /// # Errors
    /// - `TaskError::Failed` with the captured failure
    pub async fn outcome(&self) -> Result<Option<T>, TaskError> {
        self.handle.wait().await;
        self.result()
    }
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            _output: PhantomData,
        }
    }
}

impl<T> Deref for Task<T> {
    type Target = AnyTask;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.handle.id())
            .field("output", &type_name::<T>())
            .field("state", &self.handle.state())
            .finish()
    }
}

/// Point-in-time view of a task, safe to hand to other layers
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    /// Task id
    pub id: TaskId,
    /// Task name
    pub name: String,
    /// State at snapshot time
    pub state: TaskState,
    /// Mutate-protocol stage, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<MutationStage>,
    /// Mutation rejected by validation and reverted
    pub rejected: bool,
    /// Result as JSON, when succeeded with a payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Validation outcome
    pub validation: Validation,
    /// Failure record, when failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,
    /// Submission time
    pub submitted_at: DateTime<Utc>,
    /// Completion time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Stage reporter handed to a request while it executes
///
/// Detached reporters only keep the trail, which lets protocols run outside
/// a repository.
pub struct Progress {
    cell: Option<Arc<TaskCell>>,
    trail: Mutex<Vec<MutationStage>>,
}

impl Progress {
    pub(crate) fn attached(cell: Arc<TaskCell>) -> Self {
        Self {
            cell: Some(cell),
            trail: Mutex::new(Vec::new()),
        }
    }

    /// Reporter not bound to any task
    #[must_use]
    pub fn detached() -> Self {
        Self {
            cell: None,
            trail: Mutex::new(Vec::new()),
        }
    }

    /// Task being executed, if attached
    #[must_use]
    pub fn task_id(&self) -> Option<TaskId> {
        self.cell.as_ref().map(|cell| cell.id())
    }

    /// Record that the mutate protocol reached `stage`
    pub fn advance(&self, stage: MutationStage) {
        tracing::debug!(task_id = ?self.task_id(), %stage, "mutation stage");
        self.trail.lock().push(stage);
        if let Some(cell) = &self.cell {
            cell.set_stage(stage);
        }
    }

    /// Stages reported so far, in order
    #[must_use]
    pub fn trail(&self) -> Vec<MutationStage> {
        self.trail.lock().clone()
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("task_id", &self.task_id())
            .field("trail", &self.trail())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Step;
    use cfgd_problem::Problem;

    fn cell<T: 'static>() -> Arc<TaskCell> {
        Arc::new(TaskCell::new::<T>("test".to_string(), None))
    }

    #[test]
    fn running_task_is_not_ready() {
        let task: Task<String> = Task::from_cell(cell::<String>());
        assert_eq!(task.state(), TaskState::Running);
        assert!(task.result().unwrap_err().is_not_ready());
        assert!(task.failure().is_none());
        assert!(task.finished_at().is_none());
    }

    #[test]
    fn succeeded_task_exposes_result_and_problems() {
        let cell = cell::<String>();
        let task: Task<String> = Task::from_cell(cell.clone());

        let problems = ProblemSet::new().with_problem(Problem::warning("w"));
        cell.succeed(Response {
            body: Some("security".to_string()),
            validation: Validation::Completed(problems),
        });

        assert_eq!(task.state(), TaskState::Succeeded);
        assert_eq!(task.result().unwrap(), Some("security".to_string()));
        assert_eq!(task.problems().len(), 1);
        assert_eq!(task.snapshot().result, Some(serde_json::json!("security")));
    }

    #[test]
    fn failed_task_wraps_failure() {
        let cell = cell::<()>();
        let task: Task<()> = Task::from_cell(cell.clone());

        cell.fail(
            TaskFailure::new(StepError::from_step(Step::Update, anyhow::anyhow!("nope"))),
            None,
        );

        match task.result() {
            Err(TaskError::Failed { failure, .. }) => {
                assert_eq!(failure.step(), Some(Step::Update));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn terminal_state_is_never_overwritten() {
        let cell = cell::<u32>();
        let task: Task<u32> = Task::from_cell(cell.clone());

        cell.succeed(Response {
            body: Some(1u32),
            validation: Validation::Skipped,
        });
        cell.fail(
            TaskFailure::new(StepError::Aborted("late".to_string())),
            None,
        );

        assert_eq!(task.state(), TaskState::Succeeded);
        assert_eq!(task.result().unwrap(), Some(1));
    }

    #[test]
    fn typed_view_checks_result_type() {
        let any = AnyTask::from_cell(cell::<String>());
        assert!(any.typed::<String>().is_ok());
        assert!(matches!(
            any.typed::<u64>(),
            Err(TaskError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn result_of_the_wrong_type_fails_the_task() {
        let cell = cell::<u32>();
        let task: Task<u32> = Task::from_cell(cell.clone());

        cell.succeed(Response {
            body: Some(-1i32),
            validation: Validation::Skipped,
        });

        assert_eq!(task.state(), TaskState::Failed);
        assert!(task.snapshot().result.is_none());
        let failure = task.failure().unwrap();
        assert!(matches!(failure.error, StepError::Aborted(_)));
        assert!(failure.to_string().contains("i32"));
    }

    #[test]
    fn empty_body_of_any_type_succeeds() {
        let cell = cell::<u32>();
        let task: Task<u32> = Task::from_cell(cell.clone());

        cell.succeed(Response::<()> {
            body: None,
            validation: Validation::Skipped,
        });

        assert_eq!(task.state(), TaskState::Succeeded);
        assert_eq!(task.result().unwrap(), None);
    }

    #[test]
    fn detached_progress_keeps_trail() {
        let progress = Progress::detached();
        progress.advance(MutationStage::Updated);
        progress.advance(MutationStage::Validated);
        assert_eq!(
            progress.trail(),
            vec![MutationStage::Updated, MutationStage::Validated]
        );
        assert!(progress.task_id().is_none());
    }

    #[test]
    fn attached_progress_rejects_illegal_stage() {
        let cell = Arc::new(TaskCell::new::<()>(
            "mutate".to_string(),
            Some(MutationStage::Pending),
        ));
        let progress = Progress::attached(cell.clone());
        let task = AnyTask::from_cell(cell);

        progress.advance(MutationStage::Saved);
        assert_eq!(task.stage(), Some(MutationStage::Pending));

        progress.advance(MutationStage::Updated);
        assert_eq!(task.stage(), Some(MutationStage::Updated));
    }

    #[tokio::test]
    async fn wait_returns_after_completion() {
        let cell = cell::<u8>();
        let task: Task<u8> = Task::from_cell(cell.clone());

        let worker = tokio::spawn(async move {
            tokio::task::yield_now().await;
            cell.succeed(Response {
                body: Some(7u8),
                validation: Validation::Skipped,
            });
        });

        assert_eq!(task.outcome().await.unwrap(), Some(7));
        worker.await.unwrap();
    }
}
