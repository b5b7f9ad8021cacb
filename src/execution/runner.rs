//! Job Runner
//!
//! Walks the steps of one execution's snapshot sequentially on the calling
//! thread. Every status and timestamp change is a single store write.
//!
//! # Step loop
//!
//! For each snapshot step, in ascending index order:
//!
//! 1. Insert its execution step row as `pending`
//! 2. Check for a cancellation request; if present, skip this and every remaining step
//! 3. Mark the row `running`
//! 4. Resolve, parameterize, validate and execute the command
//! 5. Mark the row `completed`, or `failed` and stop
//!
//! Steps after a failure keep their `pending` rows and never start.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use serde_json::Value;

use crate::command::{CommandContext, CommandRegistry};
use crate::error::EngineError;
use crate::model::{
    ExecutionErrorType, ExecutionStatus, Id, JobExecution, JobExecutionStep, JobStep, StepStatus,
};
use crate::store::Store;

/// How the step loop ended.
enum Outcome {
    Completed,
    Cancelled,
    Failed {
        error_type: ExecutionErrorType,
        message: String,
    },
}

/// Runs executions to completion.
#[derive(Clone)]
pub struct JobRunner {
    store: Arc<dyn Store>,
    registry: Arc<CommandRegistry>,
    work_dir: PathBuf,
}

impl JobRunner {
    /// Creates a runner writing command outputs below `work_dir`.
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<CommandRegistry>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            registry,
            work_dir: work_dir.into(),
        }
    }

    /// Runs execution `execution_id` and returns its final status.
    ///
    /// Step failures are recorded on the execution and reported as
    /// `Ok(ExecutionStatus::Failed)`. `Err` means the store itself failed
    /// and the execution may be left unfinished.
    pub fn run(&self, execution_id: Id) -> Result<ExecutionStatus, EngineError> {
        let execution = self.store.modify_execution(execution_id, &mut |e| {
            if !e.status.is_terminal() {
                e.status = ExecutionStatus::Running;
                e.started_on = Some(Utc::now());
            }
        })?;
        if execution.status != ExecutionStatus::Running {
            warn!(
                "Execution {} is already {}; not running it",
                execution_id, execution.status
            );
            return Ok(execution.status);
        }

        let steps = self.store.steps_for_job(execution.snapshot_job_id)?;
        info!(
            "Starting execution {} of job {} ({} steps)",
            execution_id,
            execution.job_id,
            steps.len()
        );

        let mut outcome = Outcome::Completed;
        for step in &steps {
            let row = self.store.insert_execution_step(JobExecutionStep::new(
                execution_id,
                step.id,
                StepStatus::Pending,
            ))?;

            match outcome {
                Outcome::Failed { .. } => continue,
                Outcome::Cancelled => {
                    self.skip(row.id)?;
                    continue;
                }
                Outcome::Completed => {}
            }

            if self.store.execution(execution_id)?.cancellation_requested() {
                info!("Execution {} cancelled before step {}", execution_id, step.label());
                self.skip(row.id)?;
                outcome = Outcome::Cancelled;
                continue;
            }

            self.store.modify_execution_step(row.id, &mut |r| {
                r.status = StepStatus::Running;
                r.started_on = Some(Utc::now());
            })?;
            info!("Starting step: {}", step.label());

            match self.run_step(&execution, step, row.id) {
                Ok(()) => {
                    self.store.modify_execution_step(row.id, &mut |r| {
                        r.status = StepStatus::Completed;
                        r.completed_on = Some(Utc::now());
                    })?;
                    info!("Step '{}' completed successfully", step.label());
                }
                Err(err) => {
                    let message = err.to_string();
                    error!("Step '{}' failed: {}", step.label(), message);
                    self.store.modify_execution_step(row.id, &mut |r| {
                        r.status = StepStatus::Failed;
                        r.completed_on = Some(Utc::now());
                        r.error = Some(message.clone());
                    })?;
                    outcome = Outcome::Failed {
                        error_type: classify(&err),
                        message: format!("step {} failed: {}", step.label(), message),
                    };
                }
            }
        }

        let finished = self.finish(execution_id, outcome)?;
        info!("Execution {} {}", execution_id, finished.status);
        Ok(finished.status)
    }

    /// Marks a non-terminal execution failed because its worker could not finish it.
    ///
    /// Step rows still `running` are failed with the same reason.
    pub fn abandon(&self, execution_id: Id, reason: &str) -> Result<(), EngineError> {
        let now = Utc::now();
        let execution = self.store.modify_execution(execution_id, &mut |e| {
            if !e.status.is_terminal() {
                e.status = ExecutionStatus::Failed;
                e.completed_on = Some(now);
                e.error_type = Some(ExecutionErrorType::Other);
                e.error_message = Some(reason.to_string());
            }
        })?;
        if execution.completed_on != Some(now) {
            return Ok(());
        }

        for row in self.store.execution_steps(execution_id)? {
            if row.status == StepStatus::Running {
                self.store.modify_execution_step(row.id, &mut |r| {
                    r.status = StepStatus::Failed;
                    r.completed_on = Some(now);
                    r.error = Some(reason.to_string());
                })?;
            }
        }
        error!("Execution {} abandoned: {}", execution_id, reason);
        Ok(())
    }

    fn run_step(&self, execution: &JobExecution, step: &JobStep, row_id: Id) -> Result<(), EngineError> {
        let mut command = self.registry.resolve(&step.command_type)?;
        let values = decode_step_data(step)?;
        debug!("Step {} has {} parameter(s)", step.label(), values.len());

        command.set_parameters(&values);
        command.validate()?;

        let ctx = CommandContext::new(&self.work_dir, execution.id, row_id);
        command.execute(&ctx)?;
        Ok(())
    }

    fn skip(&self, row_id: Id) -> Result<(), EngineError> {
        self.store.modify_execution_step(row_id, &mut |r| {
            r.status = StepStatus::Skipped;
        })?;
        Ok(())
    }

    fn finish(&self, execution_id: Id, outcome: Outcome) -> Result<JobExecution, EngineError> {
        let now = Utc::now();
        let execution = self.store.modify_execution(execution_id, &mut |e| {
            e.completed_on = Some(now);
            match &outcome {
                Outcome::Completed => e.status = ExecutionStatus::Completed,
                Outcome::Cancelled => e.status = ExecutionStatus::Cancelled,
                Outcome::Failed {
                    error_type,
                    message,
                } => {
                    e.status = ExecutionStatus::Failed;
                    e.error_type = Some(*error_type);
                    e.error_message = Some(message.clone());
                }
            }
        })?;
        Ok(execution)
    }
}

/// Decodes a step's parameter blob into a name to value map.
///
/// An empty blob means no parameters. Numbers and booleans are accepted
/// and converted to text; nulls are dropped.
pub fn decode_step_data(step: &JobStep) -> Result<HashMap<String, String>, EngineError> {
    let invalid = |reason: String| EngineError::InvalidStepData {
        step_id: step.id,
        reason,
    };

    if step.data.trim().is_empty() {
        return Ok(HashMap::new());
    }

    let object: serde_json::Map<String, Value> =
        serde_json::from_str(&step.data).map_err(|e| invalid(e.to_string()))?;

    let mut values = HashMap::with_capacity(object.len());
    for (name, value) in object {
        let text = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => continue,
            Value::Array(_) | Value::Object(_) => {
                return Err(invalid(format!("parameter '{}' is not a scalar", name)))
            }
        };
        values.insert(name, text);
    }
    Ok(values)
}

fn classify(err: &EngineError) -> ExecutionErrorType {
    match err {
        EngineError::Command(e) if e.is_validation() => ExecutionErrorType::Validation,
        EngineError::Command(_) => ExecutionErrorType::Command,
        EngineError::UnknownCommandType(_) | EngineError::InvalidStepData { .. } => {
            ExecutionErrorType::Validation
        }
        _ => ExecutionErrorType::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::snapshot::build_snapshot;
    use crate::model::{Job, Trigger};
    use crate::store::MemoryStore;
    use crate::testing::{labelled_job, record_job, Probe};
    use tempfile::tempdir;

    struct Fixture {
        store: Arc<MemoryStore>,
        probe: Probe,
        runner: JobRunner,
        _work_dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let probe = Probe::new();
        let work_dir = tempdir().unwrap();
        let runner = JobRunner::new(
            store.clone(),
            Arc::new(probe.registry()),
            work_dir.path(),
        );
        Fixture {
            store,
            probe,
            runner,
            _work_dir: work_dir,
        }
    }

    fn queue(store: &MemoryStore, job: &Job) -> Id {
        let snapshot = build_snapshot(store, job.id).unwrap();
        store
            .insert_execution(JobExecution::queued(
                job.id,
                snapshot.job.id,
                Trigger::Manual { user_id: 1 },
            ))
            .unwrap()
            .id
    }

    fn statuses(store: &MemoryStore, execution_id: Id) -> Vec<StepStatus> {
        store
            .execution_steps(execution_id)
            .unwrap()
            .into_iter()
            .map(|r| r.status)
            .collect()
    }

    #[test]
    fn test_steps_run_in_index_order() {
        let f = fixture();
        let job = record_job(
            f.store.as_ref(),
            "ordered",
            &[
                (30, &[("Label", "third")]),
                (10, &[("Label", "first")]),
                (20, &[("Label", "second")]),
            ],
        );
        let id = queue(&f.store, &job);

        assert_eq!(f.runner.run(id).unwrap(), ExecutionStatus::Completed);
        assert_eq!(f.probe.calls(), vec!["first", "second", "third"]);

        let rows = f.store.execution_steps(id).unwrap();
        assert_eq!(rows.len(), 3);
        let snapshot_steps = f.store.steps_for_job(f.store.execution(id).unwrap().snapshot_job_id).unwrap();
        let row_steps: Vec<Id> = rows.iter().map(|r| r.snapshot_step_id).collect();
        let expected: Vec<Id> = snapshot_steps.iter().map(|s| s.id).collect();
        assert_eq!(row_steps, expected);
        assert!(rows.iter().all(|r| r.status == StepStatus::Completed));
        assert!(rows.iter().all(|r| r.started_on.is_some() && r.completed_on.is_some()));

        let execution = f.store.execution(id).unwrap();
        assert!(execution.started_on.is_some());
        assert!(execution.completed_on.is_some());
        assert_eq!(execution.error_type, None);
    }

    #[test]
    fn test_failure_stops_remaining_steps() {
        let f = fixture();
        let job = record_job(
            f.store.as_ref(),
            "fail fast",
            &[
                (1, &[("Label", "one")]),
                (2, &[("Label", "two"), ("Fail", "true")]),
                (3, &[("Label", "three")]),
            ],
        );
        let id = queue(&f.store, &job);

        assert_eq!(f.runner.run(id).unwrap(), ExecutionStatus::Failed);
        assert_eq!(f.probe.calls(), vec!["one", "two"]);
        assert_eq!(
            statuses(&f.store, id),
            vec![StepStatus::Completed, StepStatus::Failed, StepStatus::Pending]
        );

        let rows = f.store.execution_steps(id).unwrap();
        assert!(rows[1].error.as_deref().unwrap().contains("failed on purpose"));
        assert!(rows[2].started_on.is_none());

        let execution = f.store.execution(id).unwrap();
        assert_eq!(execution.error_type, Some(ExecutionErrorType::Command));
        assert!(execution.error_message.unwrap().contains("#2"));
    }

    #[test]
    fn test_unknown_command_type_fails_step_as_validation() {
        let f = fixture();
        let job = f.store.insert_job(Job::new("unknown")).unwrap();
        f.store.insert_step(JobStep::new(job.id, 0, "SendEmail")).unwrap();
        let id = queue(&f.store, &job);

        assert_eq!(f.runner.run(id).unwrap(), ExecutionStatus::Failed);
        let rows = f.store.execution_steps(id).unwrap();
        assert!(rows[0].error.as_deref().unwrap().contains("SendEmail"));
        assert_eq!(
            f.store.execution(id).unwrap().error_type,
            Some(ExecutionErrorType::Validation)
        );
    }

    #[test]
    fn test_missing_parameter_fails_before_execute() {
        let f = fixture();
        let job = record_job(
            f.store.as_ref(),
            "strict",
            &[(0, &[("Label", "never"), ("Strict", "true")])],
        );
        let id = queue(&f.store, &job);

        assert_eq!(f.runner.run(id).unwrap(), ExecutionStatus::Failed);
        assert!(f.probe.calls().is_empty());
        assert_eq!(
            f.store.execution(id).unwrap().error_type,
            Some(ExecutionErrorType::Validation)
        );
    }

    #[test]
    fn test_cancellation_before_start_skips_everything() {
        let f = fixture();
        let job = labelled_job(f.store.as_ref(), "cancelled", &["a", "b"]);
        let id = queue(&f.store, &job);
        f.store
            .modify_execution(id, &mut |e| e.cancelled_on = Some(Utc::now()))
            .unwrap();

        assert_eq!(f.runner.run(id).unwrap(), ExecutionStatus::Cancelled);
        assert!(f.probe.calls().is_empty());
        assert_eq!(
            statuses(&f.store, id),
            vec![StepStatus::Skipped, StepStatus::Skipped]
        );
    }

    #[test]
    fn test_empty_job_completes() {
        let f = fixture();
        let job = f.store.insert_job(Job::new("empty")).unwrap();
        let id = queue(&f.store, &job);

        assert_eq!(f.runner.run(id).unwrap(), ExecutionStatus::Completed);
        assert!(f.store.execution_steps(id).unwrap().is_empty());
    }

    #[test]
    fn test_terminal_execution_is_not_rerun() {
        let f = fixture();
        let job = labelled_job(f.store.as_ref(), "once", &["a"]);
        let id = queue(&f.store, &job);

        f.runner.run(id).unwrap();
        assert_eq!(f.runner.run(id).unwrap(), ExecutionStatus::Completed);
        assert_eq!(f.probe.calls(), vec!["a"]);
        assert_eq!(f.store.execution_steps(id).unwrap().len(), 1);
    }

    #[test]
    fn test_abandon_marks_failed_with_other() {
        let f = fixture();
        let job = labelled_job(f.store.as_ref(), "abandoned", &["a"]);
        let id = queue(&f.store, &job);

        f.runner.abandon(id, "worker panicked").unwrap();

        let execution = f.store.execution(id).unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error_type, Some(ExecutionErrorType::Other));
        assert_eq!(execution.error_message.as_deref(), Some("worker panicked"));

        // Terminal executions are left alone.
        f.runner.abandon(id, "again").unwrap();
        assert_eq!(
            f.store.execution(id).unwrap().error_message.as_deref(),
            Some("worker panicked")
        );
    }

    #[test]
    fn test_decode_step_data() {
        let step = JobStep::new(1, 0, "Record").with_data(r#"{"Label":"x","Retries":3,"Dry":true,"Gone":null}"#);
        let values = decode_step_data(&step).unwrap();
        assert_eq!(values["Label"], "x");
        assert_eq!(values["Retries"], "3");
        assert_eq!(values["Dry"], "true");
        assert!(!values.contains_key("Gone"));

        assert!(decode_step_data(&JobStep::new(1, 0, "Record")).unwrap().is_empty());
        assert!(matches!(
            decode_step_data(&JobStep::new(1, 0, "Record").with_data("not json")),
            Err(EngineError::InvalidStepData { .. })
        ));
        assert!(decode_step_data(&JobStep::new(1, 0, "Record").with_data(r#"{"a":[1]}"#)).is_err());
    }
}
