//! Core types for cfgd
//!
//! Defines:
//! - Task identity and task state
//! - Engine configuration

use cfgd_problem::Severity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Unique task identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Ulid);

impl TaskId {
    /// Generate new task ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// Lifecycle state of a task
///
/// `Running → Succeeded` or `Running → Failed`; terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Submitted, protocol not finished
    Running,
    /// Protocol finished; a rejected mutation also ends here
    Succeeded,
    /// A callback failed or the worker died
    Failed,
}

impl TaskState {
    /// Whether the state is final
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Running)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Running => "RUNNING",
            TaskState::Succeeded => "SUCCEEDED",
            TaskState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Progress of the mutate protocol inside one task
///
/// `Pending` and `Updated` are transient. `Reverted`, `Saved`, `UpdateFailed`
/// and `RevertFailed` end the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationStage {
    /// Nothing applied yet
    Pending,
    /// Mutation applied in memory
    Updated,
    /// Validator returned (or was skipped)
    Validated,
    /// Validator itself failed after the update
    ValidationFailed,
    /// Mutation undone in memory
    Reverted,
    /// Mutation persisted
    Saved,
    /// Mutator failed
    UpdateFailed,
    /// Persisting failed; revert follows
    SaveFailed,
    /// Compensating revert failed; configuration state unknown
    RevertFailed,
}

impl MutationStage {
    /// Whether the protocol is over
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MutationStage::Reverted
                | MutationStage::Saved
                | MutationStage::UpdateFailed
                | MutationStage::RevertFailed
        )
    }
}

impl fmt::Display for MutationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Engine configuration
///
/// Request builders take their defaults from here via `defaults(&config)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum severity reported when a request does not say otherwise
    pub default_severity: Severity,
    /// Minimum severity that rejects a mutation
    pub reject_at: Severity,
    /// Whether requests validate unless told otherwise
    pub validate_by_default: bool,
    /// Tasks allowed to execute at the same time
    pub max_concurrent_tasks: usize,
    /// How long finished tasks stay in the repository, in seconds
    pub retention_secs: u64,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With default report severity
    #[inline]
    #[must_use]
    pub fn with_default_severity(mut self, severity: Severity) -> Self {
        self.default_severity = severity;
        self
    }

    /// With rejection threshold
    #[inline]
    #[must_use]
    pub fn with_reject_at(mut self, severity: Severity) -> Self {
        self.reject_at = severity;
        self
    }

    /// With validate-by-default flag
    #[inline]
    #[must_use]
    pub fn with_validate_by_default(mut self, validate: bool) -> Self {
        self.validate_by_default = validate;
        self
    }

    /// With max concurrent tasks (at least one)
    #[inline]
    #[must_use]
    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max.max(1);
        self
    }

    /// With retention of finished tasks
    #[inline]
    #[must_use]
    pub fn with_retention_secs(mut self, secs: u64) -> Self {
        self.retention_secs = secs;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_severity: Severity::Warning,
            reject_at: Severity::Error,
            validate_by_default: true,
            max_concurrent_tasks: 16,
            retention_secs: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_roundtrips_through_string() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn task_ids_are_unique() {
        let a = TaskId::new();
        let b = TaskId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn task_state_terminal() {
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Failed.is_terminal());
    }

    #[test]
    fn engine_config_defaults() {
        let config = EngineConfig::new();
        assert_eq!(config.default_severity, Severity::Warning);
        assert_eq!(config.reject_at, Severity::Error);
        assert!(config.validate_by_default);
    }

    #[test]
    fn engine_config_builder_clamps_concurrency() {
        let config = EngineConfig::new().with_max_concurrent_tasks(0);
        assert_eq!(config.max_concurrent_tasks, 1);
    }

    #[test]
    fn engine_config_partial_deserialize() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"reject_at": "fatal"}"#).unwrap();
        assert_eq!(config.reject_at, Severity::Fatal);
        assert_eq!(config.default_severity, Severity::Warning);
    }
}
