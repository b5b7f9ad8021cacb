//! Job Definitions
//!
//! Jobs, their steps, tags and schedules described in a YAML file and
//! loaded into a [`Store`](crate::store::Store).
//!
//! # Format
//!
//! ```yaml
//! jobs:
//!   - name: nightly export
//!     tags: [reports]
//!     steps:
//!       - type: SqlQuery
//!         name: extract
//!         parameters:
//!           ConnectionString: /data/shop.db
//!           SQL: SELECT * FROM orders
//!           OutputFile01: orders.tsv
//!     schedules:
//!       - days: [mon, wed, fri]
//!         hour: 2
//!         minute: 30
//!       - cron: "*/15 * * * *"
//! ```
//!
//! # Structure
//!
//! - [`parser`]: reads the file and writes the entities to a store
//! - [`validator`]: checks names, command types, step indexes and schedules

pub mod parser;
pub mod validator;

use std::collections::BTreeMap;

use serde::Deserialize;

pub use parser::{install, load_definitions, load_into, parse_definitions};
pub use validator::{validate_definitions, ValidationError};

/// The contents of a definitions file.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Definitions {
    #[serde(default)]
    pub jobs: Vec<JobDefinition>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct JobDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub schedules: Vec<ScheduleDefinition>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StepDefinition {
    #[serde(rename = "type")]
    pub command_type: String,
    /// Defaults to the step's position in the list
    pub index: Option<i32>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_yaml::Value>,
}

/// A weekly rule (`days`, `hour`, `minute`) or a `cron` expression.
#[derive(Deserialize, Debug, Clone)]
pub struct ScheduleDefinition {
    #[serde(default)]
    pub days: Vec<String>,
    #[serde(default)]
    pub hour: i64,
    #[serde(default)]
    pub minute: i64,
    pub cron: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl JobDefinition {
    /// Step indexes, explicit or positional, in list order.
    pub fn step_indexes(&self) -> Vec<i32> {
        self.steps
            .iter()
            .enumerate()
            .map(|(position, step)| step.index.unwrap_or(position as i32))
            .collect()
    }
}
