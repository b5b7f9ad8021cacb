//! Execution Reports
//!
//! Read-only projection of an execution: the execution row plus each of
//! its step rows joined with the snapshot step it ran.

use colored::Colorize;

use crate::error::EngineError;
use crate::model::{ExecutionStatus, Id, JobExecution, JobExecutionStep, JobStep, StepStatus};
use crate::store::Store;

/// One step row with the snapshot step it belongs to.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub record: JobExecutionStep,
    pub step: JobStep,
}

/// Status of an execution and all of its steps.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub execution: JobExecution,
    pub job_name: String,
    /// Step rows in creation order
    pub steps: Vec<StepReport>,
}

impl ExecutionReport {
    /// Loads the report for `execution_id`.
    pub fn load(store: &dyn Store, execution_id: Id) -> Result<Self, EngineError> {
        let execution = store.execution(execution_id)?;
        let job_name = store.job(execution.snapshot_job_id)?.name;

        let steps = store
            .execution_steps(execution_id)?
            .into_iter()
            .map(|record| -> Result<StepReport, EngineError> {
                let step = store.step(record.snapshot_step_id)?;
                Ok(StepReport { record, step })
            })
            .collect::<Result<Vec<_>, EngineError>>()?;

        Ok(Self {
            execution,
            job_name,
            steps,
        })
    }

    pub fn status(&self) -> ExecutionStatus {
        self.execution.status
    }

    /// Number of step rows in each status.
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.record.status == status).count()
    }

    /// Total run time in milliseconds once the execution has finished.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.execution.started_on, self.execution.completed_on) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    /// Renders a per-step table for terminal output.
    pub fn render(&self) -> String {
        let mut output = format!(
            "\nExecution {} of '{}': {}\n\n",
            self.execution.id,
            self.job_name,
            paint_execution(self.execution.status)
        );

        for entry in &self.steps {
            let duration = entry
                .record
                .duration_ms()
                .map(|ms| format!("({} ms)", ms))
                .unwrap_or_default();
            output.push_str(&format!(
                "  {:24} {:>10} {}\n",
                truncate(&entry.step.label(), 24),
                paint_step(entry.record.status),
                duration
            ));
            if let Some(error) = &entry.record.error {
                output.push_str(&format!("      {}\n", error.red()));
            }
        }

        if let Some(message) = &self.execution.error_message {
            output.push_str(&format!("\n{} {}\n", "Error:".red().bold(), message));
        }
        if let Some(ms) = self.duration_ms() {
            output.push_str(&format!("\nTotal: {} ms\n", ms));
        }
        output
    }
}

fn paint_execution(status: ExecutionStatus) -> colored::ColoredString {
    match status {
        ExecutionStatus::Completed => status.as_str().green().bold(),
        ExecutionStatus::Failed => status.as_str().red().bold(),
        ExecutionStatus::Cancelled => status.as_str().yellow().bold(),
        ExecutionStatus::Queued | ExecutionStatus::Running => status.as_str().cyan(),
    }
}

fn paint_step(status: StepStatus) -> colored::ColoredString {
    match status {
        StepStatus::Completed => status.as_str().green(),
        StepStatus::Failed => status.as_str().red(),
        StepStatus::Skipped => status.as_str().yellow(),
        StepStatus::Pending | StepStatus::Running => status.as_str().normal(),
    }
}

/// Pads or truncates a label to `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::snapshot::build_snapshot;
    use crate::model::{Job, Trigger};
    use crate::store::MemoryStore;
    use chrono::{Duration, Utc};

    fn finished_execution(store: &MemoryStore) -> Id {
        let job = store.insert_job(Job::new("report job")).unwrap();
        store
            .insert_step(JobStep::new(job.id, 0, "SqlQuery").with_name("extract"))
            .unwrap();
        store.insert_step(JobStep::new(job.id, 1, "ShellScript")).unwrap();
        let snapshot = build_snapshot(store, job.id).unwrap();

        let execution = store
            .insert_execution(JobExecution::queued(
                job.id,
                snapshot.job.id,
                Trigger::Manual { user_id: 1 },
            ))
            .unwrap();
        let start = Utc::now();

        let mut first = JobExecutionStep::new(execution.id, snapshot.steps[0].id, StepStatus::Completed);
        first.started_on = Some(start);
        first.completed_on = Some(start + Duration::milliseconds(40));
        store.insert_execution_step(first).unwrap();

        let mut second = JobExecutionStep::new(execution.id, snapshot.steps[1].id, StepStatus::Failed);
        second.error = Some("script exited with code 2".to_string());
        store.insert_execution_step(second).unwrap();

        store
            .modify_execution(execution.id, &mut |e| {
                e.status = ExecutionStatus::Failed;
                e.started_on = Some(start);
                e.completed_on = Some(start + Duration::milliseconds(90));
                e.error_message = Some("step #1 ShellScript failed".to_string());
            })
            .unwrap();
        execution.id
    }

    #[test]
    fn test_report_joins_snapshot_steps() {
        let store = MemoryStore::new();
        let id = finished_execution(&store);

        let report = ExecutionReport::load(&store, id).unwrap();
        assert_eq!(report.status(), ExecutionStatus::Failed);
        assert_eq!(report.job_name, "report job");
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.steps[0].step.name, "extract");
        assert_eq!(report.count(StepStatus::Completed), 1);
        assert_eq!(report.count(StepStatus::Failed), 1);
        assert_eq!(report.duration_ms(), Some(90));
    }

    #[test]
    fn test_render_lists_steps_and_errors() {
        let store = MemoryStore::new();
        let id = finished_execution(&store);

        let rendered = ExecutionReport::load(&store, id).unwrap().render();
        assert!(rendered.contains("report job"));
        assert!(rendered.contains("#0 extract"));
        assert!(rendered.contains("#1 ShellScript"));
        assert!(rendered.contains("(40 ms)"));
        assert!(rendered.contains("script exited with code 2"));
        assert!(rendered.contains("Total: 90 ms"));
    }

    #[test]
    fn test_missing_execution() {
        let store = MemoryStore::new();
        assert!(ExecutionReport::load(&store, 5).is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 8), "short   ");
        assert_eq!(truncate("a very long label", 8), "a ver...");
    }
}
