//! Job Definition Entities
//!
//! Jobs, their tags, ordered steps and recurring schedules. Live jobs are
//! edited by users; snapshot copies (`is_snapshot = true`) are created by
//! the engine per execution and never edited again.

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use super::Id;

/// A reusable automation definition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Job {
    pub id: Id,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub is_snapshot: bool,
}

fn default_true() -> bool {
    true
}

impl Job {
    /// Creates a new live job. The id is assigned when the job is stored.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into().trim().to_string(),
            description: String::new(),
            active: true,
            deleted: false,
            is_snapshot: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// True when the scheduler may fire this job's schedules.
    pub fn is_schedulable(&self) -> bool {
        self.active && !self.deleted && !self.is_snapshot
    }
}

/// Free-form label on a job.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobTag {
    pub id: Id,
    pub job_id: Id,
    pub name: String,
}

impl JobTag {
    pub fn new(job_id: Id, name: impl Into<String>) -> Self {
        Self {
            id: 0,
            job_id,
            name: name.into().trim().to_string(),
        }
    }
}

/// One ordered unit of work in a job.
///
/// `index` defines execution order and is unique per job. `data` is the
/// command's parameters serialized as a JSON object of strings; only the
/// command named by `command_type` interprets it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobStep {
    pub id: Id,
    pub job_id: Id,
    #[serde(default = "default_true")]
    pub active: bool,
    pub index: i32,
    pub command_type: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl JobStep {
    /// Creates a new active step with an empty parameter blob.
    ///
    /// # Example
    ///
    /// ```
    /// use jobloom::model::JobStep;
    ///
    /// let step = JobStep::new(1, 0, "SqlQuery")
    ///     .with_name("export")
    ///     .with_parameter("ConnectionString", "reports.db")
    ///     .with_parameter("SQL", "SELECT 1");
    /// assert!(step.data.contains("reports.db"));
    /// ```
    pub fn new(job_id: Id, index: i32, command_type: impl Into<String>) -> Self {
        Self {
            id: 0,
            job_id,
            active: true,
            index,
            command_type: command_type.into().trim().to_string(),
            data: String::new(),
            name: String::new(),
            description: String::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Sets the raw parameter blob.
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    /// Adds one parameter to the JSON blob, keeping any already present.
    pub fn with_parameter(mut self, name: &str, value: impl Into<String>) -> Self {
        let mut values: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&self.data).unwrap_or_default();
        values.insert(name.to_string(), serde_json::Value::String(value.into()));
        self.data = serde_json::Value::Object(values).to_string();
        self
    }

    /// Label used in logs and reports.
    pub fn label(&self) -> String {
        if self.name.trim().is_empty() {
            format!("#{} {}", self.index, self.command_type)
        } else {
            format!("#{} {}", self.index, self.name)
        }
    }
}

/// The seven day-of-week bits of a weekly schedule.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeekDays {
    #[serde(default)]
    pub sunday: bool,
    #[serde(default)]
    pub monday: bool,
    #[serde(default)]
    pub tuesday: bool,
    #[serde(default)]
    pub wednesday: bool,
    #[serde(default)]
    pub thursday: bool,
    #[serde(default)]
    pub friday: bool,
    #[serde(default)]
    pub saturday: bool,
}

impl WeekDays {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn every_day() -> Self {
        Self {
            sunday: true,
            monday: true,
            tuesday: true,
            wednesday: true,
            thursday: true,
            friday: true,
            saturday: true,
        }
    }

    /// Builds a set from the given days.
    pub fn of(days: &[Weekday]) -> Self {
        let mut set = Self::none();
        for day in days {
            set.set(*day, true);
        }
        set
    }

    pub fn contains(&self, day: Weekday) -> bool {
        match day {
            Weekday::Sun => self.sunday,
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
        }
    }

    pub fn set(&mut self, day: Weekday, enabled: bool) {
        match day {
            Weekday::Sun => self.sunday = enabled,
            Weekday::Mon => self.monday = enabled,
            Weekday::Tue => self.tuesday = enabled,
            Weekday::Wed => self.wednesday = enabled,
            Weekday::Thu => self.thursday = enabled,
            Weekday::Fri => self.friday = enabled,
            Weekday::Sat => self.saturday = enabled,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::none()
    }
}

/// A recurring trigger rule attached to a job.
///
/// When `cron` is present it takes precedence over the day/hour/minute
/// fields.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobSchedule {
    pub id: Id,
    pub job_id: Id,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub days: WeekDays,
    pub hour: u32,
    pub minute: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
}

impl JobSchedule {
    /// Creates a weekly schedule. Out-of-range times are clamped.
    pub fn weekly(job_id: Id, days: WeekDays, hour: i64, minute: i64) -> Self {
        let mut schedule = Self {
            id: 0,
            job_id,
            active: true,
            days,
            hour: 0,
            minute: 0,
            cron: None,
        };
        schedule.set_time(hour, minute);
        schedule
    }

    /// Creates a schedule driven by a cron expression.
    pub fn cron(job_id: Id, expression: impl Into<String>) -> Self {
        Self {
            id: 0,
            job_id,
            active: true,
            days: WeekDays::none(),
            hour: 0,
            minute: 0,
            cron: Some(expression.into().trim().to_string()),
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Sets hour and minute, clamping each into its valid range.
    pub fn set_time(&mut self, hour: i64, minute: i64) {
        self.hour = clamp_time(hour, 23);
        self.minute = clamp_time(minute, 59);
    }

    /// True when the stored hour/minute are already in range.
    pub fn time_in_range(&self) -> bool {
        self.hour <= 23 && self.minute <= 59
    }
}

pub(crate) fn clamp_time(value: i64, max: u32) -> u32 {
    value.clamp(0, max as i64) as u32
}
