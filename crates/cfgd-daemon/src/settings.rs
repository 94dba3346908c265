//! Daemon settings
//!
//! Read from a TOML file; every field has a default so an empty file (or no
//! file at all) is valid.
//!
//! ```toml
//! [engine]
//! default_severity = "warning"
//! reject_at = "error"
//!
//! [log]
//! filter = "cfgd=debug,info"
//! json = true
//!
//! [[rules]]
//! kind = "required_when"
//! flag = "security.authn.ldap.enabled"
//! path = "security.authn.ldap.url"
//! ```

use anyhow::{Context, Result};
use cfgd_core::EngineConfig;
use cfgd_store::RuleSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the settings file
pub const SETTINGS_ENV: &str = "CFGD_SETTINGS";

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Everything the daemon reads at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Task engine defaults
    pub engine: EngineConfig,
    /// Logging
    pub log: LogSettings,
    /// Deployment whose mutations share one lock
    pub deployment: Option<String>,
    /// Checks run by validating requests
    pub rules: RuleSet,
}

impl Settings {
    /// Parse settings from TOML text
    ///
    /// # Errors
    /// Returns error if the text is not valid settings TOML
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("parse cfgd settings")
    }

    /// Read settings from a file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read settings file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Resolve settings: explicit path, then `CFGD_SETTINGS`, then defaults
    ///
    /// # Errors
    /// Returns error if a named settings file cannot be loaded
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(SETTINGS_ENV).map(PathBuf::from));
        match path {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Deployment name, `default` if unset
    #[must_use]
    pub fn deployment(&self) -> &str {
        self.deployment.as_deref().unwrap_or("default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfgd_problem::Severity;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_text_is_all_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings.engine, EngineConfig::default());
        assert_eq!(settings.log, LogSettings::default());
        assert!(settings.rules.is_empty());
        assert_eq!(settings.deployment(), "default");
    }

    #[test]
    fn full_settings_parse() {
        let settings = Settings::from_toml(
            r#"
            deployment = "staging"

            [engine]
            default_severity = "error"
            reject_at = "fatal"
            validate_by_default = false

            [log]
            json = true

            [[rules]]
            kind = "boolean"
            path = "security.enabled"

            [[rules]]
            kind = "required_when"
            flag = "security.authn.ldap.enabled"
            path = "security.authn.ldap.url"
            severity = "fatal"
            "#,
        )
        .unwrap();

        assert_eq!(settings.deployment(), "staging");
        assert_eq!(settings.engine.default_severity, Severity::Error);
        assert_eq!(settings.engine.reject_at, Severity::Fatal);
        assert!(!settings.engine.validate_by_default);
        assert_eq!(settings.engine.max_concurrent_tasks, 16);
        assert!(settings.log.json);
        assert_eq!(settings.log.filter, "info");
        assert_eq!(settings.rules.len(), 2);
    }

    #[test]
    fn unknown_severity_is_an_error() {
        assert!(Settings::from_toml("[engine]\nreject_at = \"catastrophic\"\n").is_err());
    }

    #[test]
    fn explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfgd.toml");
        std::fs::write(&path, "deployment = \"from-file\"\n").unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.deployment(), "from-file");
        assert!(Settings::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
