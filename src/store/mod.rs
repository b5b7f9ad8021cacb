//! Entity Store
//!
//! The engine reads and writes entities only through the [`Store`] trait:
//! create/read/update/delete by primary key, plus the few filtered reads
//! the runner and scheduler need.
//!
//! Status and timestamp transitions on run records go through
//! [`Store::modify_execution`] and [`Store::modify_execution_step`], which
//! apply a closure atomically to one row. A cancellation request and a
//! worker's status update therefore never overwrite each other.

pub mod memory;

pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::model::{Id, Job, JobExecution, JobExecutionStep, JobSchedule, JobStep, JobTag};

pub type StoreResult<T> = Result<T, StoreError>;

/// Abstract persistence for the six engine entities.
///
/// `insert_*` assigns a fresh id and returns the stored entity. Writes are
/// durable once the call returns.
///
/// Rows of a snapshot job are immutable once inserted: updates and deletes
/// touching them fail with [`StoreError::Conflict`]. Run records can only
/// be deleted after their execution reached a terminal status. Schedule
/// times are clamped into range on write.
pub trait Store: Send + Sync {
    // Jobs
    fn insert_job(&self, job: Job) -> StoreResult<Job>;
    fn job(&self, id: Id) -> StoreResult<Job>;
    fn update_job(&self, job: &Job) -> StoreResult<()>;
    fn delete_job(&self, id: Id) -> StoreResult<()>;
    fn jobs(&self) -> StoreResult<Vec<Job>>;

    // Tags
    fn insert_tag(&self, tag: JobTag) -> StoreResult<JobTag>;
    fn delete_tag(&self, id: Id) -> StoreResult<()>;
    fn tags_for_job(&self, job_id: Id) -> StoreResult<Vec<JobTag>>;

    // Steps
    fn insert_step(&self, step: JobStep) -> StoreResult<JobStep>;
    fn step(&self, id: Id) -> StoreResult<JobStep>;
    fn update_step(&self, step: &JobStep) -> StoreResult<()>;
    fn delete_step(&self, id: Id) -> StoreResult<()>;
    /// All steps of a job, ordered by index.
    fn steps_for_job(&self, job_id: Id) -> StoreResult<Vec<JobStep>>;

    // Schedules
    fn insert_schedule(&self, schedule: JobSchedule) -> StoreResult<JobSchedule>;
    fn schedule(&self, id: Id) -> StoreResult<JobSchedule>;
    fn update_schedule(&self, schedule: &JobSchedule) -> StoreResult<()>;
    fn delete_schedule(&self, id: Id) -> StoreResult<()>;
    fn schedules(&self) -> StoreResult<Vec<JobSchedule>>;
    fn schedules_for_job(&self, job_id: Id) -> StoreResult<Vec<JobSchedule>>;

    // Executions
    fn insert_execution(&self, execution: JobExecution) -> StoreResult<JobExecution>;
    fn execution(&self, id: Id) -> StoreResult<JobExecution>;
    fn executions_for_job(&self, job_id: Id) -> StoreResult<Vec<JobExecution>>;
    /// Applies `apply` to one execution row under a single write.
    fn modify_execution(
        &self,
        id: Id,
        apply: &mut dyn FnMut(&mut JobExecution),
    ) -> StoreResult<JobExecution>;
    /// Removes a finished execution and its step rows.
    fn delete_execution(&self, id: Id) -> StoreResult<()>;

    // Execution steps
    fn insert_execution_step(&self, step: JobExecutionStep) -> StoreResult<JobExecutionStep>;
    /// All step rows of one execution, in creation order.
    fn execution_steps(&self, execution_id: Id) -> StoreResult<Vec<JobExecutionStep>>;
    fn modify_execution_step(
        &self,
        id: Id,
        apply: &mut dyn FnMut(&mut JobExecutionStep),
    ) -> StoreResult<JobExecutionStep>;
    /// Removes one step row of a finished execution.
    fn delete_execution_step(&self, id: Id) -> StoreResult<()>;
}
