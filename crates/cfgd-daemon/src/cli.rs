//! `cfgd` command line

use crate::observability::init_tracing;
use crate::service::{ConfigService, RequestOptions};
use crate::settings::{Settings, SETTINGS_ENV};
use anyhow::{Context, Result};
use cfgd_core::{TaskRepository, TaskSnapshot, TaskState};
use cfgd_problem::Severity;
use cfgd_store::ConfigStore;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

/// Read and change a YAML configuration through validated tasks
#[derive(Debug, Parser)]
#[command(name = "cfgd", version, about)]
pub struct Cli {
    /// Configuration file to operate on
    #[arg(long, short, env = "CFGD_CONFIG", default_value = "cfgd.yml")]
    pub config: PathBuf,

    /// Settings file (TOML)
    #[arg(long, env = SETTINGS_ENV)]
    pub settings: Option<PathBuf>,

    /// Minimum severity to report (none, warning, error, fatal)
    #[arg(long)]
    pub severity: Option<Severity>,

    /// Skip validation
    #[arg(long)]
    pub no_validate: bool,

    /// Log as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Operations
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print a section
    Get {
        /// Dotted path, e.g. `security.authn`
        section: String,
    },
    /// Replace a section with a YAML value
    Set {
        /// Dotted path
        section: String,
        /// YAML text, e.g. `{enabled: true}`
        value: String,
    },
    /// Set `<section>.enabled: true`
    Enable {
        /// Dotted path
        section: String,
    },
    /// Set `<section>.enabled: false`
    Disable {
        /// Dotted path
        section: String,
    },
}

impl Cli {
    fn options(&self) -> RequestOptions {
        let mut options = RequestOptions::new();
        if let Some(severity) = self.severity {
            options = options.with_severity(severity);
        }
        if self.no_validate {
            options = options.with_validate(false);
        }
        options
    }
}

/// Run one command to completion and return its task snapshot
///
/// # Errors
/// Returns error if settings, the configuration file or the command's
/// arguments are invalid. A failed or rejected task is not an error; inspect
/// the snapshot.
pub async fn run(cli: Cli) -> Result<TaskSnapshot> {
    let mut settings = Settings::load(cli.settings.as_deref())?;
    settings.log.json |= cli.json_logs;
    init_tracing(&settings.log);

    let store = ConfigStore::open(&cli.config)
        .with_context(|| format!("open {}", cli.config.display()))?;
    let repository = TaskRepository::new(settings.engine.clone())?;
    let service = ConfigService::new(
        Arc::new(repository),
        Arc::new(store),
        settings.rules.clone(),
        settings.deployment(),
    );

    let options = cli.options();
    let task = match &cli.command {
        Command::Get { section } => service.get_section(section, options)?.untyped(),
        Command::Set { section, value } => {
            let value: serde_yaml::Value =
                serde_yaml::from_str(value).context("parse section value as YAML")?;
            service.set_section(section, value, options)?.untyped()
        }
        Command::Enable { section } => service.set_enabled(section, true, options)?.untyped(),
        Command::Disable { section } => service.set_enabled(section, false, options)?.untyped(),
    };

    tracing::debug!(task_id = %task.id(), "waiting for task");
    task.wait().await;
    Ok(service.repository().snapshot(task.id())?)
}

/// Process exit code for a finished task: 0 ok, 1 failed, 2 rejected
#[must_use]
pub fn exit_code(snapshot: &TaskSnapshot) -> i32 {
    match snapshot.state {
        TaskState::Failed => 1,
        _ if snapshot.rejected => 2,
        _ => 0,
    }
}
