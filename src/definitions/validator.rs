//! Definitions Validation
//!
//! Checks a parsed definitions file before anything is written:
//! - Job names are present and unique
//! - Step command types are registered
//! - Step indexes are unique per job
//! - Schedule days and cron expressions parse
//!
//! Out-of-range schedule times are not errors: they are clamped when the
//! schedule is installed, with a warning here.

use std::collections::HashSet;

use log::{debug, info, warn};

use super::parser::{needs_clamp, parameter_strings, parse_days};
use super::{Definitions, JobDefinition};
use crate::command::CommandRegistry;
use crate::scheduler::rule::parse_cron;

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    NoJobs,
    EmptyJobName,
    DuplicateJobName(String),
    UnknownCommandType { job: String, command_type: String },
    DuplicateStepIndex { job: String, index: i32 },
    InvalidParameters { job: String, reason: String },
    InvalidDays { job: String, reason: String },
    InvalidCron { job: String, reason: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoJobs => write!(f, "Definitions contain no jobs"),
            Self::EmptyJobName => write!(f, "Job has empty or whitespace-only name"),
            Self::DuplicateJobName(name) => write!(f, "Duplicate job name: '{}'", name),
            Self::UnknownCommandType { job, command_type } => {
                write!(f, "Job '{}' uses unknown step type '{}'", job, command_type)
            }
            Self::DuplicateStepIndex { job, index } => {
                write!(f, "Job '{}' has more than one step at index {}", job, index)
            }
            Self::InvalidParameters { job, reason } => write!(f, "Job '{}': {}", job, reason),
            Self::InvalidDays { job, reason } => write!(f, "Job '{}' schedule: {}", job, reason),
            Self::InvalidCron { job, reason } => write!(f, "Job '{}' schedule: {}", job, reason),
        }
    }
}

/// Validates a single job definition.
fn validate_job(job: &JobDefinition, registry: &CommandRegistry) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let name = job.name.trim().to_string();

    if job.steps.is_empty() {
        warn!("Job '{}' has no steps", name);
    }

    let mut seen_indexes = HashSet::new();
    for (step, index) in job.steps.iter().zip(job.step_indexes()) {
        if !registry.contains(step.command_type.trim()) {
            errors.push(ValidationError::UnknownCommandType {
                job: name.clone(),
                command_type: step.command_type.clone(),
            });
        }
        if !seen_indexes.insert(index) {
            errors.push(ValidationError::DuplicateStepIndex {
                job: name.clone(),
                index,
            });
        }
        if let Err(reason) = parameter_strings(&step.parameters) {
            errors.push(ValidationError::InvalidParameters {
                job: name.clone(),
                reason,
            });
        }
    }

    for schedule in &job.schedules {
        match &schedule.cron {
            Some(expression) => {
                if let Err(reason) = parse_cron(expression) {
                    errors.push(ValidationError::InvalidCron {
                        job: name.clone(),
                        reason,
                    });
                }
                if !schedule.days.is_empty() {
                    warn!("Job '{}': schedule has both cron and days; days are ignored", name);
                }
            }
            None => {
                match parse_days(&schedule.days) {
                    Ok(days) if days.is_empty() => {
                        warn!("Job '{}': schedule has no days and will never fire", name)
                    }
                    Ok(_) => {}
                    Err(reason) => errors.push(ValidationError::InvalidDays {
                        job: name.clone(),
                        reason,
                    }),
                }
                if needs_clamp(schedule.hour, 23) || needs_clamp(schedule.minute, 59) {
                    warn!(
                        "Job '{}': schedule time {}:{} is out of range and will be clamped",
                        name, schedule.hour, schedule.minute
                    );
                }
            }
        }
    }

    if !job.active {
        debug!("Job '{}' is inactive and will only run when triggered manually", name);
    }

    errors
}

/// Validates every job in `definitions`.
///
/// All problems are collected and returned together, one per line.
pub fn validate_definitions(
    definitions: &Definitions,
    registry: &CommandRegistry,
) -> Result<(), String> {
    info!("Validating {} job definition(s)", definitions.jobs.len());

    if definitions.jobs.is_empty() {
        return Err(ValidationError::NoJobs.to_string());
    }

    let mut all_errors = Vec::new();
    let mut seen_names: HashSet<String> = HashSet::new();

    for job in &definitions.jobs {
        let name = job.name.trim();
        if name.is_empty() {
            all_errors.push(ValidationError::EmptyJobName);
            continue;
        }
        if !seen_names.insert(name.to_string()) {
            all_errors.push(ValidationError::DuplicateJobName(name.to_string()));
        }
        all_errors.extend(validate_job(job, registry));
    }

    if !all_errors.is_empty() {
        let error_messages: Vec<String> = all_errors.iter().map(|e| e.to_string()).collect();
        return Err(error_messages.join("\n"));
    }

    info!("Definitions validated: {} job(s)", definitions.jobs.len());
    Ok(())
}
