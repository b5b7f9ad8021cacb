//! In-memory Store
//!
//! A [`Store`] backed by ordered maps behind one mutex. Ids are assigned
//! from a single counter shared by all tables.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use log::debug;

use super::{Store, StoreResult};
use crate::error::StoreError;
use crate::model::{Id, Job, JobExecution, JobExecutionStep, JobSchedule, JobStep, JobTag};

#[derive(Default)]
struct Tables {
    next_id: Id,
    jobs: BTreeMap<Id, Job>,
    tags: BTreeMap<Id, JobTag>,
    steps: BTreeMap<Id, JobStep>,
    schedules: BTreeMap<Id, JobSchedule>,
    executions: BTreeMap<Id, JobExecution>,
    execution_steps: BTreeMap<Id, JobExecutionStep>,
}

impl Tables {
    fn allocate_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }

    /// Rejects a step whose index is already used by another step of the same job.
    fn check_step_index(&self, step: &JobStep) -> StoreResult<()> {
        let clash = self
            .steps
            .values()
            .find(|s| s.job_id == step.job_id && s.index == step.index && s.id != step.id);

        match clash {
            Some(existing) => Err(StoreError::Conflict(format!(
                "job {} already has step {} at index {}",
                step.job_id, existing.id, step.index
            ))),
            None => Ok(()),
        }
    }

    fn is_snapshot_job(&self, job_id: Id) -> bool {
        self.jobs.get(&job_id).is_some_and(|j| j.is_snapshot)
    }

    /// Rejects any write touching a row owned by a snapshot job.
    fn check_not_snapshot(&self, job_id: Id, what: &str) -> StoreResult<()> {
        if self.is_snapshot_job(job_id) {
            return Err(StoreError::Conflict(format!(
                "{} is part of snapshot job {}",
                what, job_id
            )));
        }
        Ok(())
    }

    /// Rejects removal of rows belonging to an execution that has not finished.
    fn check_execution_finished(&self, execution_id: Id) -> StoreResult<()> {
        let execution = self
            .executions
            .get(&execution_id)
            .ok_or_else(|| missing("execution", execution_id))?;
        if !execution.status.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "execution {} is still {}",
                execution_id, execution.status
            )));
        }
        Ok(())
    }
}

/// Brings hour and minute into range, the same way [`JobSchedule::set_time`] does.
fn clamped(schedule: &JobSchedule) -> JobSchedule {
    let mut schedule = schedule.clone();
    if !schedule.time_in_range() {
        schedule.set_time(schedule.hour.into(), schedule.minute.into());
    }
    schedule
}

fn missing(entity: &'static str, id: Id) -> StoreError {
    StoreError::NotFound { entity, id }
}

/// Thread-safe in-memory entity store.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl Store for MemoryStore {
    fn insert_job(&self, mut job: Job) -> StoreResult<Job> {
        let mut tables = self.lock()?;
        job.id = tables.allocate_id();
        tables.jobs.insert(job.id, job.clone());
        debug!("Stored job {} '{}'", job.id, job.name);
        Ok(job)
    }

    fn job(&self, id: Id) -> StoreResult<Job> {
        self.lock()?.jobs.get(&id).cloned().ok_or_else(|| missing("job", id))
    }

    fn update_job(&self, job: &Job) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let slot = tables.jobs.get_mut(&job.id).ok_or_else(|| missing("job", job.id))?;
        if slot.is_snapshot || job.is_snapshot {
            return Err(StoreError::Conflict(format!(
                "job {} cannot be changed to or from a snapshot",
                job.id
            )));
        }
        *slot = job.clone();
        Ok(())
    }

    fn delete_job(&self, id: Id) -> StoreResult<()> {
        let mut tables = self.lock()?;
        if !tables.jobs.contains_key(&id) {
            return Err(missing("job", id));
        }
        tables.check_not_snapshot(id, &format!("job {}", id))?;
        tables.jobs.remove(&id);
        tables.tags.retain(|_, t| t.job_id != id);
        tables.steps.retain(|_, s| s.job_id != id);
        tables.schedules.retain(|_, s| s.job_id != id);
        Ok(())
    }

    fn jobs(&self) -> StoreResult<Vec<Job>> {
        Ok(self.lock()?.jobs.values().cloned().collect())
    }

    fn insert_tag(&self, mut tag: JobTag) -> StoreResult<JobTag> {
        let mut tables = self.lock()?;
        if !tables.jobs.contains_key(&tag.job_id) {
            return Err(missing("job", tag.job_id));
        }
        tag.id = tables.allocate_id();
        tables.tags.insert(tag.id, tag.clone());
        Ok(tag)
    }

    fn delete_tag(&self, id: Id) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let owner = tables.tags.get(&id).map(|t| t.job_id).ok_or_else(|| missing("tag", id))?;
        tables.check_not_snapshot(owner, &format!("tag {}", id))?;
        tables.tags.remove(&id);
        Ok(())
    }

    fn tags_for_job(&self, job_id: Id) -> StoreResult<Vec<JobTag>> {
        Ok(self
            .lock()?
            .tags
            .values()
            .filter(|t| t.job_id == job_id)
            .cloned()
            .collect())
    }

    fn insert_step(&self, mut step: JobStep) -> StoreResult<JobStep> {
        let mut tables = self.lock()?;
        if !tables.jobs.contains_key(&step.job_id) {
            return Err(missing("job", step.job_id));
        }
        tables.check_step_index(&step)?;
        step.id = tables.allocate_id();
        tables.steps.insert(step.id, step.clone());
        Ok(step)
    }

    fn step(&self, id: Id) -> StoreResult<JobStep> {
        self.lock()?.steps.get(&id).cloned().ok_or_else(|| missing("step", id))
    }

    fn update_step(&self, step: &JobStep) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let owner = tables
            .steps
            .get(&step.id)
            .map(|s| s.job_id)
            .ok_or_else(|| missing("step", step.id))?;
        tables.check_not_snapshot(owner, &format!("step {}", step.id))?;
        if !tables.jobs.contains_key(&step.job_id) {
            return Err(missing("job", step.job_id));
        }
        tables.check_not_snapshot(step.job_id, &format!("step {}", step.id))?;
        tables.check_step_index(step)?;
        tables.steps.insert(step.id, step.clone());
        Ok(())
    }

    fn delete_step(&self, id: Id) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let owner = tables.steps.get(&id).map(|s| s.job_id).ok_or_else(|| missing("step", id))?;
        tables.check_not_snapshot(owner, &format!("step {}", id))?;
        tables.steps.remove(&id);
        Ok(())
    }

    fn steps_for_job(&self, job_id: Id) -> StoreResult<Vec<JobStep>> {
        let mut steps: Vec<JobStep> = self
            .lock()?
            .steps
            .values()
            .filter(|s| s.job_id == job_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.index);
        Ok(steps)
    }

    fn insert_schedule(&self, schedule: JobSchedule) -> StoreResult<JobSchedule> {
        let mut tables = self.lock()?;
        if !tables.jobs.contains_key(&schedule.job_id) {
            return Err(missing("job", schedule.job_id));
        }
        let mut schedule = clamped(&schedule);
        schedule.id = tables.allocate_id();
        tables.schedules.insert(schedule.id, schedule.clone());
        Ok(schedule)
    }

    fn schedule(&self, id: Id) -> StoreResult<JobSchedule> {
        self.lock()?
            .schedules
            .get(&id)
            .cloned()
            .ok_or_else(|| missing("schedule", id))
    }

    fn update_schedule(&self, schedule: &JobSchedule) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let slot = tables
            .schedules
            .get_mut(&schedule.id)
            .ok_or_else(|| missing("schedule", schedule.id))?;
        *slot = clamped(schedule);
        Ok(())
    }

    fn delete_schedule(&self, id: Id) -> StoreResult<()> {
        self.lock()?
            .schedules
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| missing("schedule", id))
    }

    fn schedules(&self) -> StoreResult<Vec<JobSchedule>> {
        Ok(self.lock()?.schedules.values().cloned().collect())
    }

    fn schedules_for_job(&self, job_id: Id) -> StoreResult<Vec<JobSchedule>> {
        Ok(self
            .lock()?
            .schedules
            .values()
            .filter(|s| s.job_id == job_id)
            .cloned()
            .collect())
    }

    fn insert_execution(&self, mut execution: JobExecution) -> StoreResult<JobExecution> {
        let mut tables = self.lock()?;
        execution.id = tables.allocate_id();
        tables.executions.insert(execution.id, execution.clone());
        Ok(execution)
    }

    fn execution(&self, id: Id) -> StoreResult<JobExecution> {
        self.lock()?
            .executions
            .get(&id)
            .cloned()
            .ok_or_else(|| missing("execution", id))
    }

    fn executions_for_job(&self, job_id: Id) -> StoreResult<Vec<JobExecution>> {
        Ok(self
            .lock()?
            .executions
            .values()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect())
    }

    fn modify_execution(
        &self,
        id: Id,
        apply: &mut dyn FnMut(&mut JobExecution),
    ) -> StoreResult<JobExecution> {
        let mut tables = self.lock()?;
        let execution = tables
            .executions
            .get_mut(&id)
            .ok_or_else(|| missing("execution", id))?;
        apply(execution);
        Ok(execution.clone())
    }

    fn delete_execution(&self, id: Id) -> StoreResult<()> {
        let mut tables = self.lock()?;
        tables.check_execution_finished(id)?;
        tables.executions.remove(&id);
        tables.execution_steps.retain(|_, s| s.execution_id != id);
        Ok(())
    }

    fn insert_execution_step(&self, mut step: JobExecutionStep) -> StoreResult<JobExecutionStep> {
        let mut tables = self.lock()?;
        if !tables.executions.contains_key(&step.execution_id) {
            return Err(missing("execution", step.execution_id));
        }
        step.id = tables.allocate_id();
        tables.execution_steps.insert(step.id, step.clone());
        Ok(step)
    }

    fn execution_steps(&self, execution_id: Id) -> StoreResult<Vec<JobExecutionStep>> {
        Ok(self
            .lock()?
            .execution_steps
            .values()
            .filter(|s| s.execution_id == execution_id)
            .cloned()
            .collect())
    }

    fn modify_execution_step(
        &self,
        id: Id,
        apply: &mut dyn FnMut(&mut JobExecutionStep),
    ) -> StoreResult<JobExecutionStep> {
        let mut tables = self.lock()?;
        let step = tables
            .execution_steps
            .get_mut(&id)
            .ok_or_else(|| missing("execution step", id))?;
        apply(step);
        Ok(step.clone())
    }

    fn delete_execution_step(&self, id: Id) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let execution_id = tables
            .execution_steps
            .get(&id)
            .map(|s| s.execution_id)
            .ok_or_else(|| missing("execution step", id))?;
        tables.check_execution_finished(execution_id)?;
        tables.execution_steps.remove(&id);
        Ok(())
    }
}
