//! Execution Module
//!
//! Everything between a trigger and a finished execution:
//!
//! - [`snapshot`]: freezes a job before it runs
//! - [`runner`]: walks one execution's steps sequentially
//! - [`coordinator`]: trigger, cancel and query, plus the worker pool
//! - [`report`]: read-only status projection

pub mod coordinator;
pub mod report;
pub mod runner;
pub mod snapshot;

pub use coordinator::Coordinator;
pub use report::{ExecutionReport, StepReport};
pub use runner::JobRunner;
pub use snapshot::{build_snapshot, Snapshot};
