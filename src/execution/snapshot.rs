//! Execution Snapshots
//!
//! Before an execution is queued, the live job is deep-copied into a
//! snapshot job. The execution runs the snapshot's steps, so edits to the
//! live job never affect executions already created from it.

use log::debug;

use crate::error::EngineError;
use crate::model::{Id, Job, JobStep, JobTag};
use crate::store::Store;

/// A frozen copy of a job and its active steps.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub job: Job,
    /// Active steps, ascending by index
    pub steps: Vec<JobStep>,
    pub tags: Vec<JobTag>,
}

/// Copies job `job_id` into a new snapshot job.
///
/// Only active steps are copied. Every copied row gets a fresh id; all
/// other fields, including the step parameter blob and index, are kept.
///
/// # Returns
///
/// * `Ok(Snapshot)` - the stored snapshot rows
/// * `Err(EngineError::Store)` - the job does not exist
/// * `Err(EngineError::JobUnavailable)` - the job is deleted or itself a snapshot
pub fn build_snapshot(store: &dyn Store, job_id: Id) -> Result<Snapshot, EngineError> {
    let source = store.job(job_id)?;
    if source.deleted {
        return Err(EngineError::JobUnavailable {
            job_id,
            reason: "job is deleted".to_string(),
        });
    }
    if source.is_snapshot {
        return Err(EngineError::JobUnavailable {
            job_id,
            reason: "job is an execution snapshot".to_string(),
        });
    }

    let job = store.insert_job(Job {
        id: 0,
        is_snapshot: true,
        ..source.clone()
    })?;

    let mut steps = Vec::new();
    for step in store.steps_for_job(job_id)?.into_iter().filter(|s| s.active) {
        steps.push(store.insert_step(JobStep {
            id: 0,
            job_id: job.id,
            ..step
        })?);
    }

    let mut tags = Vec::new();
    for tag in store.tags_for_job(job_id)? {
        tags.push(store.insert_tag(JobTag::new(job.id, tag.name))?);
    }

    debug!(
        "Snapshot {} of job {} '{}' with {} step(s)",
        job.id,
        job_id,
        source.name,
        steps.len()
    );

    Ok(Snapshot { job, steps, tags })
}
