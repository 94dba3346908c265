//! Task and mutation-stage transition tables

use crate::error::StateMachineError;
use crate::types::{MutationStage, TaskState};

/// Validates a task state transition.
///
/// Only `Running` may move, and only to a terminal state.
pub fn validate_transition(from: TaskState, to: TaskState) -> Result<(), StateMachineError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// States reachable from `from` in one step
pub fn allowed_transitions(from: TaskState) -> Vec<TaskState> {
    use TaskState::*;
    match from {
        Running => vec![Succeeded, Failed],
        Succeeded | Failed => vec![],
    }
}

/// Validates a mutate-protocol stage transition.
pub fn validate_stage_transition(
    from: MutationStage,
    to: MutationStage,
) -> Result<(), StateMachineError> {
    if allowed_stage_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Stages reachable from `from` in one step
pub fn allowed_stage_transitions(from: MutationStage) -> Vec<MutationStage> {
    use MutationStage::*;
    match from {
        Pending => vec![Updated, UpdateFailed],
        Updated => vec![Validated, ValidationFailed],
        Validated => vec![Reverted, Saved, SaveFailed, RevertFailed],
        ValidationFailed | SaveFailed => vec![Reverted, RevertFailed],
        Reverted | Saved | UpdateFailed | RevertFailed => vec![],
    }
}
