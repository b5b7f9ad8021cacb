//! Entity Model
//!
//! Plain data structures for the six entities the engine works with.
//!
//! # Structure
//!
//! - [`job`]: Definitions edited by users (Job, JobTag, JobStep, JobSchedule)
//! - [`execution`]: Run records created by the engine (JobExecution, JobExecutionStep)

pub mod execution;
pub mod job;

pub use execution::{
    ExecutionErrorType, ExecutionStatus, JobExecution, JobExecutionStep, StepStatus, Trigger,
};
pub use job::{Job, JobSchedule, JobStep, JobTag, WeekDays};

/// Primary key type shared by every entity. Assigned by the store on insert.
pub type Id = u64;
