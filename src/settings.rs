//! Engine Settings
//!
//! Every tunable option of the engine, with its default. Values come from
//! `JOBLOOM_*` environment variables; the CLI overrides them with flags.
//!
//! | Variable | Default |
//! |---|---|
//! | `JOBLOOM_WORKER_THREADS` | number of CPUs |
//! | `JOBLOOM_TICK_SECONDS` | 15 (1 to 30) |
//! | `JOBLOOM_SUBMISSION_POLICY` | `queue` (`queue` or `reject`) |
//! | `JOBLOOM_WORK_DIR` | `<temp dir>/jobloom` |
//! | `JOBLOOM_LOG_LEVEL` | `info` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Prefix shared by all settings variables.
pub const ENV_PREFIX: &str = "JOBLOOM_";

const DEFAULT_TICK_SECONDS: u64 = 15;

/// Longest tick that still lands in every wall-clock minute despite jitter.
pub const MAX_TICK_SECONDS: u64 = 30;

/// What happens to a submission when every worker is busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmissionPolicy {
    /// Wait for a free worker, in arrival order
    #[default]
    Queue,
    /// Fail immediately with `ConcurrencyExhausted`
    Reject,
}

impl SubmissionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Reject => "reject",
        }
    }
}

impl FromStr for SubmissionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "queue" => Ok(Self::Queue),
            "reject" => Ok(Self::Reject),
            other => Err(format!("expected 'queue' or 'reject', got '{}'", other)),
        }
    }
}

/// A settings variable holds an unusable value.
#[derive(Debug, Error)]
#[error("invalid value '{value}' for {name}: {reason}")]
pub struct SettingsError {
    pub name: String,
    pub value: String,
    pub reason: String,
}

/// Engine configuration, fixed for the life of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Size of the worker pool
    pub worker_threads: usize,
    /// Scheduler tick period
    pub tick_interval: Duration,
    pub submission_policy: SubmissionPolicy,
    /// Root of the per-execution output directories
    pub work_dir: PathBuf,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get().max(1),
            tick_interval: Duration::from_secs(DEFAULT_TICK_SECONDS),
            submission_policy: SubmissionPolicy::Queue,
            work_dir: std::env::temp_dir().join("jobloom"),
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`, which maps a full variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();
        let read = |key: &str| {
            let name = format!("{}{}", ENV_PREFIX, key);
            lookup(&name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (name, v))
        };

        if let Some((name, value)) = read("WORKER_THREADS") {
            settings.worker_threads = match value.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(invalid(name, value, "expected a positive integer")),
            };
        }

        if let Some((name, value)) = read("TICK_SECONDS") {
            settings.tick_interval = match value.parse::<u64>() {
                Ok(n) if (1..=MAX_TICK_SECONDS).contains(&n) => Duration::from_secs(n),
                _ => return Err(invalid(name, value, "expected seconds between 1 and 30")),
            };
        }

        if let Some((name, value)) = read("SUBMISSION_POLICY") {
            settings.submission_policy = value
                .parse()
                .map_err(|reason: String| invalid(name, value.clone(), &reason))?;
        }

        if let Some((name, value)) = read("WORK_DIR") {
            settings.work_dir = absolute_dir(PathBuf::from(&value))
                .map_err(|e| invalid(name, value, &e.to_string()))?;
        }

        if let Some((_, value)) = read("LOG_LEVEL") {
            settings.log_level = value.to_lowercase();
        }

        Ok(settings)
    }

    /// Every option with its current value, for display at startup.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("worker_threads", self.worker_threads.to_string()),
            (
                "tick_interval",
                format!("{}s", self.tick_interval.as_secs()),
            ),
            (
                "submission_policy",
                self.submission_policy.as_str().to_string(),
            ),
            ("work_dir", self.work_dir.display().to_string()),
            ("log_level", self.log_level.clone()),
        ]
    }
}

/// Anchors a relative directory at the current working directory.
///
/// Commands change their working directory to the execution directory,
/// so the work dir must not depend on it.
pub fn absolute_dir(path: PathBuf) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }
    Ok(std::env::current_dir()?.join(path))
}

fn invalid(name: String, value: String, reason: &str) -> SettingsError {
    SettingsError {
        name,
        value,
        reason: reason.to_string(),
    }
}
