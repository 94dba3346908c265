//! Configuration service
//!
//! Turns section reads and writes into cfgd tasks. Every call assembles the
//! matching request builder around the shared store: reads build the section
//! and optionally validate it, writes edit the working copy, validate the
//! edited section, then undo or save. Validation runs only the rules whose
//! paths overlap the section, so a broken neighbour never blocks an edit.

use anyhow::Context;
use cfgd_core::{
    AnyTask, EngineConfig, ReadRequest, RequestError, Task, TaskError, TaskId, TaskRepository,
    UpdateRequest,
};
use cfgd_problem::{ProblemSet, Severity};
use cfgd_store::{ConfigStore, DeploymentLocks, RuleSet};
use serde_yaml::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Per-call overrides of the engine defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Minimum severity reported
    pub severity: Option<Severity>,
    /// Whether to validate
    pub validate: Option<bool>,
}

impl RequestOptions {
    /// Engine defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report findings at or above `severity`
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Turn validation on or off
    #[must_use]
    pub fn with_validate(mut self, validate: bool) -> Self {
        self.validate = Some(validate);
        self
    }

    fn severity_or(&self, config: &EngineConfig) -> Severity {
        self.severity.unwrap_or(config.default_severity)
    }

    fn validate_or(&self, config: &EngineConfig) -> bool {
        self.validate.unwrap_or(config.validate_by_default)
    }
}

/// Section reads and writes over one deployment's configuration
#[derive(Debug)]
pub struct ConfigService {
    repository: Arc<TaskRepository>,
    store: Arc<ConfigStore>,
    rules: Arc<RuleSet>,
    locks: DeploymentLocks,
    deployment: String,
}

impl ConfigService {
    /// Create a service over `store`
    pub fn new(
        repository: Arc<TaskRepository>,
        store: Arc<ConfigStore>,
        rules: RuleSet,
        deployment: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            store,
            rules: Arc::new(rules),
            locks: DeploymentLocks::new(),
            deployment: deployment.into(),
        }
    }

    /// Task repository
    #[must_use]
    pub fn repository(&self) -> &Arc<TaskRepository> {
        &self.repository
    }

    /// Configuration store
    #[must_use]
    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Look up a task submitted through this service
    ///
    /// # Errors
    /// - `TaskError::NotFound` for unknown ids
    pub fn task(&self, id: TaskId) -> Result<AnyTask, TaskError> {
        self.repository.get(id)
    }

    /// Validator running only the rules that touch `section`
    fn validator(
        &self,
        section: &str,
    ) -> impl FnOnce() -> anyhow::Result<ProblemSet> + Send + 'static {
        let store = self.store.clone();
        let rules = self.rules.scoped(section);
        move || Ok(store.validate(&rules))
    }

    /// Read the section at `section`
    ///
    /// The task fails if the section does not exist.
    ///
    /// # Errors
    /// - `RequestError` if the request cannot be assembled
    pub fn get_section(
        &self,
        section: &str,
        options: RequestOptions,
    ) -> Result<Task<Value>, RequestError> {
        let config = self.repository.config();
        let store = self.store.clone();
        let path = section.to_string();

        let request = ReadRequest::builder()
            .name(format!("get {section}"))
            .severity(options.severity_or(config))
            .build_response(move || {
                store
                    .get(&path)?
                    .with_context(|| format!("no configuration at {path}"))
            })
            .validate_response_if(options.validate_or(config), self.validator(section))
            .build()?;

        Ok(self.repository.submit(request))
    }

    /// Replace the section at `section` with `value`
    ///
    /// # Errors
    /// - `RequestError` if the request cannot be assembled
    pub fn set_section(
        &self,
        section: &str,
        value: Value,
        options: RequestOptions,
    ) -> Result<Task<()>, RequestError> {
        let store = self.store.clone();
        let path = section.to_string();
        self.submit_update(section, format!("set {section}"), options, move || {
            store.set(&path, value)?;
            Ok(())
        })
    }

    /// Set `<section>.enabled`
    ///
    /// # Errors
    /// - `RequestError` if the request cannot be assembled
    pub fn set_enabled(
        &self,
        section: &str,
        enabled: bool,
        options: RequestOptions,
    ) -> Result<Task<()>, RequestError> {
        let store = self.store.clone();
        let path = format!("{section}.enabled");
        let name = format!("set {path}={enabled}");
        self.submit_update(section, name, options, move || {
            store.set(&path, enabled)?;
            Ok(())
        })
    }

    fn submit_update<F>(
        &self,
        section: &str,
        name: String,
        options: RequestOptions,
        update: F,
    ) -> Result<Task<()>, RequestError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let config = self.repository.config();
        let revert_store = self.store.clone();
        let save_store = self.store.clone();

        let request = UpdateRequest::builder()
            .defaults(config)
            .name(name)
            .severity(options.severity_or(config))
            .update(update)
            .validate_if(options.validate_or(config), self.validator(section))
            .revert(move || {
                revert_store.undo_changes();
                Ok(())
            })
            .save(move || Ok(save_store.save()?))
            .exclusive(self.locks.lock_for(&self.deployment))
            .build()?;

        Ok(self.repository.submit(request))
    }

    /// Periodically drop finished tasks older than the configured retention
    pub fn spawn_reaper(&self, every: Duration) -> JoinHandle<()> {
        let repository = self.repository.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let reaped = repository.reap_expired();
                if reaped > 0 {
                    tracing::info!(reaped, remaining = repository.len(), "expired tasks reaped");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfgd_core::TaskState;

    fn service(yaml: &str, rules: RuleSet) -> ConfigService {
        let repository = Arc::new(TaskRepository::new(EngineConfig::new()).unwrap());
        let store = Arc::new(ConfigStore::from_yaml("unused.yml", yaml).unwrap());
        ConfigService::new(repository, store, rules, "default")
    }

    #[tokio::test]
    async fn get_missing_section_fails() {
        let service = service("{}", RuleSet::new());
        let task = service.get_section("security", RequestOptions::new()).unwrap();

        assert_eq!(task.wait().await, TaskState::Failed);
        assert!(task
            .failure()
            .unwrap()
            .to_string()
            .contains("no configuration at security"));
    }

    #[tokio::test]
    async fn get_section_without_validation_skips_rules() {
        let service = service(
            "security:\n  enabled: maybe\n",
            RuleSet::new().boolean("security.enabled"),
        );
        let options = RequestOptions::new().with_validate(false);
        let task = service.get_section("security", options).unwrap();

        let section = task.outcome().await.unwrap().unwrap();
        assert_eq!(section["enabled"], Value::from("maybe"));
        assert!(!task.validation().ran());
    }

    #[tokio::test]
    async fn reaper_drops_expired_tasks() {
        let config = EngineConfig::new().with_retention_secs(0);
        let repository = Arc::new(TaskRepository::new(config).unwrap());
        let store = Arc::new(ConfigStore::from_yaml("unused.yml", "{}").unwrap());
        let service = ConfigService::new(repository, store, RuleSet::new(), "default");

        let task = service.repository().submit_fn("noise", || Ok(()));
        assert_eq!(task.wait().await, TaskState::Succeeded);
        assert_eq!(service.repository().len(), 1);

        let reaper = service.spawn_reaper(Duration::from_millis(10));
        for _ in 0..100 {
            if service.repository().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        reaper.abort();

        assert!(service.repository().is_empty());
        assert!(matches!(
            service.task(task.id()),
            Err(TaskError::NotFound(id)) if id == task.id()
        ));
    }

    #[tokio::test]
    async fn reaper_keeps_running_tasks() {
        let repository = Arc::new(
            TaskRepository::new(EngineConfig::new().with_retention_secs(0)).unwrap(),
        );
        let store = Arc::new(ConfigStore::from_yaml("unused.yml", "{}").unwrap());
        let service = ConfigService::new(repository, store, RuleSet::new(), "default");

        let (release, gate) = std::sync::mpsc::channel::<()>();
        let task = service.repository().submit_fn("blocked", move || {
            gate.recv()?;
            Ok(())
        });

        let reaper = service.spawn_reaper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(service.repository().len(), 1);

        release.send(()).unwrap();
        assert_eq!(task.wait().await, TaskState::Succeeded);
        reaper.abort();
    }

    #[test]
    fn options_override_engine_defaults() {
        let config = EngineConfig::new();
        let options = RequestOptions::new().with_severity(Severity::Fatal);
        assert_eq!(options.severity_or(&config), Severity::Fatal);
        assert_eq!(options.validate_or(&config), config.validate_by_default);
    }
}
