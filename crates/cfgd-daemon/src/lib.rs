//! cfgd Daemon
//!
//! Glue between the task engine and a file-backed configuration:
//! - [`ConfigService`]: section reads and writes submitted as tasks
//! - [`Settings`]: TOML settings with engine defaults, logging and rules
//! - [`observability`]: tracing subscriber setup
//! - [`cli`]: the `cfgd` command line

#![warn(unreachable_pub)]

pub mod cli;
pub mod observability;
pub mod service;
pub mod settings;

pub use service::{ConfigService, RequestOptions};
pub use settings::{LogSettings, Settings};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
