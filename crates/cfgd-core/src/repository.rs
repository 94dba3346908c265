//! Task repository
//!
//! The process-wide registry of tasks:
//! - Submission (allocate id, schedule, return handle immediately)
//! - Lookup by id (untyped or typed)
//! - Reaping of finished tasks

use crate::error::{StepError, TaskError, TaskFailure};
use crate::request::{FnRequest, Request};
use crate::task::{AnyTask, Progress, Task, TaskCell, TaskSnapshot};
use crate::types::{EngineConfig, TaskId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

/// Registry and scheduler for tasks
///
/// Each submission runs as its own tokio task; callbacks run on the blocking
/// pool. At most `max_concurrent_tasks` protocols execute at once, the rest
/// wait for a permit while already reported as `Running`.
#[derive(Debug)]
pub struct TaskRepository {
    /// Submitted tasks
    tasks: DashMap<TaskId, AnyTask>,
    /// Execution permits
    permits: Arc<Semaphore>,
    /// Runtime tasks are spawned on
    runtime: Handle,
    /// Configuration
    config: EngineConfig,
}

impl TaskRepository {
    /// Create a repository on the current tokio runtime
    ///
    /// # Errors
    /// - `TaskError::NoRuntime` if called outside a tokio runtime
    pub fn new(config: EngineConfig) -> Result<Self, TaskError> {
        let runtime = Handle::try_current().map_err(|_| TaskError::NoRuntime)?;
        Ok(Self::with_runtime(config, runtime))
    }

    /// Create a repository spawning onto `runtime`
    #[must_use]
    pub fn with_runtime(config: EngineConfig, runtime: Handle) -> Self {
        Self {
            tasks: DashMap::new(),
            permits: Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1))),
            runtime,
            config,
        }
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Submit a request for asynchronous execution
    ///
    /// Returns as soon as the task is registered; the handle reports
    /// `Running` until the protocol finishes.
    pub fn submit<R: Request>(&self, request: R) -> Task<R::Output> {
        let cell = Arc::new(TaskCell::new::<R::Output>(
            request.name().to_string(),
            request.initial_stage(),
        ));
        let task = Task::from_cell(cell.clone());
        self.tasks.insert(cell.id(), task.untyped());

        tracing::info!(task_id = %cell.id(), name = cell.name(), "task submitted");

        let permits = self.permits.clone();
        self.runtime.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            let worker_cell = cell.clone();
            let joined = tokio::task::spawn_blocking(move || {
                let progress = Progress::attached(worker_cell);
                request.execute(&progress)
            })
            .await;

            match joined {
                Ok(Ok(response)) => {
                    tracing::info!(
                        task_id = %cell.id(),
                        problems = response.validation.problems().len(),
                        "task succeeded"
                    );
                    cell.succeed(response);
                }
                Ok(Err(failure)) => {
                    tracing::error!(task_id = %cell.id(), error = %failure.failure, "task failed");
                    cell.fail(failure.failure, failure.validation);
                }
                Err(join_error) => {
                    tracing::error!(
                        task_id = %cell.id(),
                        error = %join_error,
                        "task worker aborted"
                    );
                    cell.fail(
                        TaskFailure::new(StepError::Aborted(join_error.to_string())),
                        None,
                    );
                }
            }
        });

        task
    }

    /// Submit a plain closure
    pub fn submit_fn<T, F>(&self, name: impl Into<String>, work: F) -> Task<T>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Clone + Serialize + Send + Sync + 'static,
    {
        self.submit(FnRequest::new(name, work))
    }

    /// Look up a task
    ///
    /// # Errors
    /// - `TaskError::NotFound` if no such task was submitted, or it was reaped
    pub fn get(&self, id: TaskId) -> Result<AnyTask, TaskError> {
        self.tasks
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(TaskError::NotFound(id))
    }

    /// Look up a task with its result type
    ///
    /// # Errors
    /// - `TaskError::NotFound` for unknown ids
    /// - `TaskError::TypeMismatch` if `T` is not the task's result type
    pub fn get_typed<T: 'static>(&self, id: TaskId) -> Result<Task<T>, TaskError> {
        self.get(id)?.typed::<T>()
    }

    /// Snapshot of a task
    ///
    /// # Errors
    /// - `TaskError::NotFound` for unknown ids
    pub fn snapshot(&self, id: TaskId) -> Result<TaskSnapshot, TaskError> {
        Ok(self.get(id)?.snapshot())
    }

    /// Remove a finished task
    ///
    /// # Errors
    /// - `TaskError::NotFound` for unknown ids
    /// - `TaskError::NotReady` if the task is still running
    pub fn reap(&self, id: TaskId) -> Result<TaskSnapshot, TaskError> {
        let removed = self
            .tasks
            .remove_if(&id, |_, task| task.is_finished())
            .map(|(_, task)| task.snapshot());

        match removed {
            Some(snapshot) => {
                tracing::debug!(task_id = %id, "task reaped");
                Ok(snapshot)
            }
            None if self.tasks.contains_key(&id) => Err(TaskError::NotReady(id)),
            None => Err(TaskError::NotFound(id)),
        }
    }

    /// Remove every task that finished before `cutoff`; returns how many
    pub fn reap_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, task| match task.finished_at() {
            Some(finished) => finished >= cutoff,
            None => true,
        });
        let reaped = before.saturating_sub(self.tasks.len());
        if reaped > 0 {
            tracing::debug!(reaped, "finished tasks reaped");
        }
        reaped
    }

    /// Remove tasks finished longer ago than the configured retention
    pub fn reap_expired(&self) -> usize {
        let cutoff = i64::try_from(self.config.retention_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|retention| Utc::now().checked_sub_signed(retention));
        match cutoff {
            Some(cutoff) => self.reap_finished_before(cutoff),
            None => 0,
        }
    }

    /// Number of tasks held
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when no tasks are held
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Ids of all tasks held, oldest first
    #[must_use]
    pub fn ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.tasks.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }
}
