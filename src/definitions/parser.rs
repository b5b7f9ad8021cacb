//! Definitions Parser
//!
//! Reads a definitions file, validates it and writes its jobs to a store.

use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::str::FromStr;

use chrono::Weekday;
use log::{debug, info};

use super::validator::validate_definitions;
use super::{Definitions, ScheduleDefinition, StepDefinition};
use crate::command::CommandRegistry;
use crate::model::job::clamp_time;
use crate::model::{Id, Job, JobSchedule, JobStep, JobTag, WeekDays};
use crate::store::Store;

/// Parses definitions from YAML text.
pub fn parse_definitions(yaml: &str) -> Result<Definitions, String> {
    serde_yaml::from_str(yaml)
        .map_err(|e| format!("Failed to parse definitions YAML: {}. Check the file format.", e))
}

/// Reads and parses a definitions file.
///
/// # Arguments
///
/// * `path` - Path to the YAML file
///
/// # Returns
///
/// * `Ok(Definitions)` - Parsed, not yet validated
/// * `Err` - The file could not be read or parsed
pub fn load_definitions(path: &str) -> Result<Definitions, Box<dyn Error>> {
    info!("Loading definitions from: {}", path);

    let yaml_content = fs::read_to_string(path).map_err(|e| {
        format!(
            "Failed to read definitions file '{}': {}. Check that the file exists and is readable.",
            path, e
        )
    })?;
    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    let definitions = parse_definitions(&yaml_content)?;
    info!("Parsed {} job definition(s)", definitions.jobs.len());
    Ok(definitions)
}

/// Loads, validates and installs a definitions file.
///
/// # Example
///
/// ```rust,no_run
/// use jobloom::command::CommandRegistry;
/// use jobloom::definitions::load_into;
/// use jobloom::store::MemoryStore;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStore::new();
///     let jobs = load_into(&store, "jobs.yaml", CommandRegistry::builtin())?;
///     println!("Loaded {} jobs", jobs.len());
///     Ok(())
/// }
/// ```
pub fn load_into(
    store: &dyn Store,
    path: &str,
    registry: &CommandRegistry,
) -> Result<Vec<Job>, Box<dyn Error>> {
    let definitions = load_definitions(path)?;
    validate_definitions(&definitions, registry)?;
    install(store, &definitions)
}

/// Writes validated definitions to `store` as live jobs.
pub fn install(store: &dyn Store, definitions: &Definitions) -> Result<Vec<Job>, Box<dyn Error>> {
    let mut jobs = Vec::with_capacity(definitions.jobs.len());

    for definition in &definitions.jobs {
        let mut job = Job::new(&definition.name).with_description(definition.description.clone());
        job.active = definition.active;
        let job = store.insert_job(job)?;

        for tag in &definition.tags {
            store.insert_tag(JobTag::new(job.id, tag.as_str()))?;
        }

        for (step, index) in definition.steps.iter().zip(definition.step_indexes()) {
            store.insert_step(build_step(job.id, index, step)?)?;
        }

        for schedule in &definition.schedules {
            store.insert_schedule(build_schedule(job.id, schedule)?)?;
        }

        info!(
            "Installed job {} '{}': {} step(s), {} schedule(s)",
            job.id,
            job.name,
            definition.steps.len(),
            definition.schedules.len()
        );
        jobs.push(job);
    }

    Ok(jobs)
}

fn build_step(job_id: Id, index: i32, definition: &StepDefinition) -> Result<JobStep, String> {
    let values = parameter_strings(&definition.parameters)?;
    let data = serde_json::to_string(&values).map_err(|e| e.to_string())?;

    let mut step = JobStep::new(job_id, index, definition.command_type.as_str())
        .with_name(definition.name.clone())
        .with_data(data);
    step.description = definition.description.clone();
    step.active = definition.active;
    Ok(step)
}

fn build_schedule(job_id: Id, definition: &ScheduleDefinition) -> Result<JobSchedule, String> {
    let mut schedule = match &definition.cron {
        Some(expression) => JobSchedule::cron(job_id, expression.as_str()),
        None => JobSchedule::weekly(
            job_id,
            parse_days(&definition.days)?,
            definition.hour,
            definition.minute,
        ),
    };
    schedule.active = definition.active;
    Ok(schedule)
}

/// Converts YAML parameter values to the text the commands receive.
///
/// Numbers and booleans are written as text; nulls are dropped.
pub fn parameter_strings(
    parameters: &BTreeMap<String, serde_yaml::Value>,
) -> Result<BTreeMap<String, String>, String> {
    let mut values = BTreeMap::new();
    for (name, value) in parameters {
        let text = match value {
            serde_yaml::Value::String(s) => s.clone(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Null => continue,
            _ => return Err(format!("parameter '{}' must be a single value", name)),
        };
        values.insert(name.clone(), text);
    }
    Ok(values)
}

/// Parses day names (`mon`, `Monday`, ...) plus `daily` and `weekdays`.
pub fn parse_days(days: &[String]) -> Result<WeekDays, String> {
    let mut set = WeekDays::none();
    for day in days {
        match day.trim().to_lowercase().as_str() {
            "daily" | "everyday" => set = WeekDays::every_day(),
            "weekdays" => {
                for weekday in [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri] {
                    set.set(weekday, true);
                }
            }
            name => {
                let weekday = Weekday::from_str(name).map_err(|_| format!("unknown day '{}'", day))?;
                set.set(weekday, true);
            }
        }
    }
    Ok(set)
}

/// True when `value` lies outside `0..=max` and would be clamped.
pub(crate) fn needs_clamp(value: i64, max: u32) -> bool {
    clamp_time(value, max) as i64 != value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
jobs:
  - name: nightly export
    description: Export orders
    tags: [reports, nightly]
    steps:
      - type: SqlQuery
        name: extract
        parameters:
          ConnectionString: /data/shop.db
          SQL: SELECT * FROM orders
          OutputFile01: orders.tsv
      - type: ShellScript
        index: 5
        parameters:
          Script: gzip orders.tsv
          Retries: 3
    schedules:
      - days: [mon, Wednesday]
        hour: 2
        minute: 30
      - cron: "*/15 * * * *"
        active: false
  - name: paused job
    active: false
"#;

    #[test]
    fn test_parse_sample() {
        let definitions = parse_definitions(SAMPLE).unwrap();
        assert_eq!(definitions.jobs.len(), 2);

        let job = &definitions.jobs[0];
        assert_eq!(job.tags, vec!["reports", "nightly"]);
        assert_eq!(job.step_indexes(), vec![0, 5]);
        assert_eq!(job.schedules[1].cron.as_deref(), Some("*/15 * * * *"));
        assert!(!definitions.jobs[1].active);
    }

    #[test]
    fn test_install_writes_entities() {
        let store = MemoryStore::new();
        let definitions = parse_definitions(SAMPLE).unwrap();

        let jobs = install(&store, &definitions).unwrap();
        assert_eq!(jobs.len(), 2);

        let job = &jobs[0];
        assert_eq!(job.description, "Export orders");
        assert_eq!(store.tags_for_job(job.id).unwrap().len(), 2);

        let steps = store.steps_for_job(job.id).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].name, "extract");
        assert!(steps[0].data.contains("orders.tsv"));
        assert_eq!(steps[1].index, 5);
        assert!(steps[1].data.contains(r#""Retries":"3""#));

        let schedules = store.schedules_for_job(job.id).unwrap();
        assert_eq!(schedules.len(), 2);
        assert!(schedules[0].days.monday && schedules[0].days.wednesday);
        assert!(!schedules[0].days.friday);
        assert_eq!((schedules[0].hour, schedules[0].minute), (2, 30));
        assert!(!schedules[1].active);

        assert!(!jobs[1].active);
    }

    #[test]
    fn test_load_into_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let store = MemoryStore::new();
        let jobs = load_into(
            &store,
            file.path().to_str().unwrap(),
            CommandRegistry::builtin(),
        )
        .unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(store.jobs().unwrap().len(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_definitions("/nonexistent/jobs.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read definitions file"));
    }

    #[test]
    fn test_parse_invalid_yaml() {
        assert!(parse_definitions("jobs: [ {name: ").is_err());
        assert!(parse_definitions("jobs:\n  - steps: []").is_err());
    }

    #[test]
    fn test_parse_days() {
        let days = parse_days(&["Mon".to_string(), "friday".to_string()]).unwrap();
        assert!(days.monday && days.friday && !days.sunday);

        let weekdays = parse_days(&["weekdays".to_string()]).unwrap();
        assert!(weekdays.thursday && !weekdays.saturday);

        assert_eq!(parse_days(&["daily".to_string()]).unwrap(), WeekDays::every_day());
        assert!(parse_days(&["someday".to_string()]).is_err());
    }

    #[test]
    fn test_parameter_strings_rejects_nested_values() {
        let mut parameters = BTreeMap::new();
        parameters.insert(
            "List".to_string(),
            serde_yaml::Value::Sequence(vec![serde_yaml::Value::Bool(true)]),
        );
        assert!(parameter_strings(&parameters).is_err());
    }

    #[test]
    fn test_needs_clamp() {
        assert!(needs_clamp(24, 23));
        assert!(needs_clamp(-1, 59));
        assert!(!needs_clamp(59, 59));
    }
}
