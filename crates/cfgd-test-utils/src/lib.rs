//! Testing utilities for cfgd workspace
//!
//! Shared fixtures, recording callbacks and polling helpers.

#![allow(missing_docs)]

use anyhow::bail;
use cfgd_core::{
    EngineConfig, TaskError, TaskId, TaskRepository, TaskSnapshot, UpdateRequestBuilder,
};
use cfgd_problem::{Problem, ProblemSet, Severity};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Callback names in invocation order
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: &'static str) {
        self.calls.lock().push(call);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }
}

#[derive(Debug, Default)]
struct FlagState {
    current: bool,
    saved: bool,
}

/// In-memory stand-in for a configuration store holding one boolean flag
///
/// `update_to` changes the working value, `revert` restores the saved value
/// and `save` commits the working value. Every callback is logged.
#[derive(Debug, Clone, Default)]
pub struct FlagStore {
    state: Arc<Mutex<FlagState>>,
    log: CallLog,
    fail_update: bool,
    fail_validate: bool,
    fail_save: bool,
    fail_revert: bool,
}

impl FlagStore {
    pub fn new(initial: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(FlagState {
                current: initial,
                saved: initial,
            })),
            ..Self::default()
        }
    }

    pub fn failing_update(mut self) -> Self {
        self.fail_update = true;
        self
    }

    pub fn failing_validate(mut self) -> Self {
        self.fail_validate = true;
        self
    }

    pub fn failing_save(mut self) -> Self {
        self.fail_save = true;
        self
    }

    pub fn failing_revert(mut self) -> Self {
        self.fail_revert = true;
        self
    }

    pub fn flag(&self) -> bool {
        self.state.lock().current
    }

    pub fn saved_flag(&self) -> bool {
        self.state.lock().saved
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    pub fn count(&self, call: &str) -> usize {
        self.log.count(call)
    }

    pub fn update_to(&self, value: bool) -> impl FnOnce() -> anyhow::Result<()> + Send + 'static {
        let store = self.clone();
        move || {
            store.log.record("update");
            if store.fail_update {
                bail!("update rejected by store");
            }
            store.state.lock().current = value;
            Ok(())
        }
    }

    pub fn validator(
        &self,
        problems: ProblemSet,
    ) -> impl FnOnce() -> anyhow::Result<ProblemSet> + Send + 'static {
        let store = self.clone();
        move || {
            store.log.record("validate");
            if store.fail_validate {
                bail!("validator crashed");
            }
            Ok(problems)
        }
    }

    pub fn revert(&self) -> impl FnOnce() -> anyhow::Result<()> + Send + 'static {
        let store = self.clone();
        move || {
            store.log.record("revert");
            if store.fail_revert {
                bail!("revert failed");
            }
            let mut state = store.state.lock();
            state.current = state.saved;
            Ok(())
        }
    }

    pub fn save(&self) -> impl FnOnce() -> anyhow::Result<()> + Send + 'static {
        let store = self.clone();
        move || {
            store.log.record("save");
            if store.fail_save {
                bail!("disk full");
            }
            let mut state = store.state.lock();
            state.saved = state.current;
            Ok(())
        }
    }

    /// Builder setting the flag to `value`, validating with `problems` if given
    pub fn mutation(&self, value: bool, problems: Option<ProblemSet>) -> UpdateRequestBuilder {
        let builder = UpdateRequestBuilder::new()
            .name("set-flag")
            .update(self.update_to(value))
            .revert(self.revert())
            .save(self.save());
        match problems {
            Some(problems) => builder.validate(self.validator(problems)),
            None => builder,
        }
    }
}

/// One problem per severity, in order
pub fn problems(severities: &[Severity]) -> ProblemSet {
    severities
        .iter()
        .enumerate()
        .map(|(i, severity)| Problem::new(*severity, format!("problem {i}")))
        .collect()
}

pub fn test_repository() -> TaskRepository {
    TaskRepository::new(EngineConfig::new()).unwrap()
}

/// Poll `id` until terminal, failing the test after `timeout`
pub async fn poll_until_finished(
    repo: &TaskRepository,
    id: TaskId,
    timeout: Duration,
) -> Result<TaskSnapshot, TaskError> {
    let polling = async {
        loop {
            let snapshot = repo.snapshot(id)?;
            if snapshot.state.is_terminal() {
                return Ok(snapshot);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    match tokio::time::timeout(timeout, polling).await {
        Ok(result) => result,
        Err(_) => panic!("task {id} still running after {timeout:?}"),
    }
}
