//! cfgd Problem Model
//!
//! Validation findings for configuration tasks.
//!
//! # Core Concepts
//!
//! - [`Severity`]: Totally ordered finding level (`None < Warning < Error < Fatal`)
//! - [`Problem`]: One immutable finding
//! - [`ProblemSet`]: Ordered findings of one validation pass
//! - [`Validation`]: Whether validation ran at all, and what it found
//!
//! # Example
//!
//! ```rust
//! use cfgd_problem::{Problem, ProblemSet, Severity};
//!
//! let mut problems = ProblemSet::new();
//! problems.add_problem(Problem::new(Severity::Warning, "ldap url uses plain ldap://"));
//! problems.add_problem(Problem::new(Severity::Error, "oauth2 client secret missing"));
//!
//! assert!(problems.has_severity_at_least(Severity::Error));
//! assert_eq!(problems.filter_by_severity(Severity::Error).len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod problem;
mod set;
mod severity;
mod validation;

pub use problem::Problem;
pub use set::ProblemSet;
pub use severity::{ParseSeverityError, Severity};
pub use validation::Validation;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
