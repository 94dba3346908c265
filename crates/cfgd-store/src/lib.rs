//! cfgd Store
//!
//! File-backed YAML configuration used as the mutable collaborator of cfgd
//! tasks:
//! - [`ConfigStore`]: working and committed documents, dotted-path edits,
//!   `undo_changes` and atomic `save`
//! - [`RuleSet`]: structural checks producing a `ProblemSet`
//! - [`DeploymentLocks`]: one exclusive lock per deployment
//!
//! # Example
//!
//! ```rust
//! use cfgd_store::{ConfigStore, RuleSet};
//!
//! let store = ConfigStore::from_yaml("config.yml", "security:\n  enabled: false\n").unwrap();
//! store.set("security.enabled", true).unwrap();
//! assert!(store.is_dirty());
//!
//! let rules = RuleSet::new().boolean("security.enabled");
//! assert!(store.validate(&rules).is_empty());
//!
//! store.undo_changes();
//! assert_eq!(store.get_as::<bool>("security.enabled").unwrap(), Some(false));
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
mod locks;
mod path;
pub mod rules;
mod store;

pub use error::{Result, StoreError};
pub use locks::DeploymentLocks;
pub use rules::{Rule, RuleSet};
pub use store::ConfigStore;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
