//! jobloom - Job Automation Engine
//!
//! Users define jobs made of ordered steps, attach schedules, and the
//! engine runs each trigger as an execution of a frozen snapshot of the job,
//! one step after another, on a bounded worker pool.
//!
//! # Architecture
//!
//! - [`model`]: jobs, steps, schedules, executions and their statuses
//! - [`store`]: the persistence trait and an in-memory implementation
//! - [`command`]: the step command contract, registry and builtin commands
//! - [`execution`]: snapshots, the job runner and the coordinator
//! - [`scheduler`]: the once-per-minute schedule evaluator
//! - [`definitions`]: YAML job definitions
//! - [`settings`]: engine configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use jobloom::{CommandRegistry, Coordinator, MemoryStore, Settings};
//! use jobloom::definitions::load_into;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let jobs = load_into(store.as_ref(), "jobs.yaml", CommandRegistry::builtin())?;
//!
//!     let coordinator = Coordinator::new(store, CommandRegistry::with_builtins(), &Settings::default());
//!     let execution_id = coordinator.trigger_manual(jobs[0].id, 1).await?;
//!     coordinator.drain().await;
//!
//!     println!("{}", coordinator.query_status(execution_id)?.render());
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod definitions;
pub mod error;
pub mod execution;
pub mod model;
pub mod scheduler;
pub mod settings;
pub mod store;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use command::{Command, CommandRegistry};
pub use error::{CommandError, EngineError, StoreError};
pub use execution::{Coordinator, ExecutionReport, JobRunner};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use settings::{Settings, SubmissionPolicy};
pub use store::{MemoryStore, Store};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "jobloom";
