//! cfgd Core - staged configuration tasks
//!
//! Every configuration read or write runs as an asynchronous task:
//! - Reads build a response, then optionally validate it
//! - Mutations update, validate, then either revert (rejected) or save
//! - A failed save is compensated with a revert before the task fails
//! - Callers poll the [`TaskRepository`] by id or wait on the handle
//!
//! # Example
//!
//! ```rust,ignore
//! use cfgd_core::prelude::*;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let repo = TaskRepository::new(EngineConfig::new())?;
//!
//! let request = UpdateRequest::builder()
//!     .name("set-security")
//!     .update(|| Ok(()))
//!     .validate(|| Ok(ProblemSet::new()))
//!     .revert(|| Ok(()))
//!     .save(|| Ok(()))
//!     .build()?;
//!
//! let task = repo.submit(request);
//! task.wait().await;
//! assert!(!task.is_rejected());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod coordinator;
pub mod error;
pub mod repository;
pub mod request;
pub mod state_machine;
pub mod task;
pub mod types;

pub use coordinator::{UpdateRequest, UpdateRequestBuilder};
pub use error::{RequestError, StateMachineError, Step, StepError, TaskError, TaskFailure};
pub use repository::TaskRepository;
pub use request::{
    ActionFn, BuildFn, FnRequest, ProtocolFailure, ReadRequest, ReadRequestBuilder, Request,
    Response, ValidateFn,
};
pub use task::{AnyTask, Progress, Task, TaskSnapshot};
pub use types::{EngineConfig, MutationStage, TaskId, TaskState};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with cfgd tasks
    pub use crate::{
        AnyTask, EngineConfig, MutationStage, ReadRequest, Request, Task, TaskError, TaskId,
        TaskRepository, TaskState, UpdateRequest,
    };
    pub use cfgd_problem::{Problem, ProblemSet, Severity, Validation};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
