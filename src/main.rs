//! jobloom CLI Entry Point
//!
//! Loads job definitions, then either runs one job immediately or keeps
//! evaluating schedules until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Run the scheduler until Ctrl-C
//! jobloom jobs.yaml
//!
//! # Run one job now and print its report
//! jobloom jobs.yaml --run "nightly export"
//!
//! # Four workers, reject triggers while all are busy
//! jobloom jobs.yaml --workers 4 --reject-when-busy
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use log::{error, info};

use jobloom::definitions::load_into;
use jobloom::model::{ExecutionStatus, Id, Job};
use jobloom::settings::{absolute_dir, MAX_TICK_SECONDS};
use jobloom::{
    CommandRegistry, Coordinator, MemoryStore, Scheduler, Settings, Store, SubmissionPolicy,
    APP_NAME, VERSION,
};

/// User id recorded for manual runs started from the command line.
const DEFAULT_USER_ID: Id = 0;

/// Command-line configuration parsed from arguments.
#[derive(Debug, Default)]
struct Config {
    definitions_path: Option<String>,
    run_job: Option<String>,
    user_id: Option<Id>,
    workers: Option<usize>,
    tick_seconds: Option<u64>,
    reject_when_busy: bool,
    work_dir: Option<PathBuf>,
    verbose: bool,
}

impl Config {
    /// Applies command-line overrides on top of environment settings.
    fn apply(&self, settings: &mut Settings) -> Result<(), String> {
        if let Some(workers) = self.workers {
            if workers == 0 {
                return Err("--workers must be at least 1".to_string());
            }
            settings.worker_threads = workers;
        }
        if let Some(seconds) = self.tick_seconds {
            if !(1..=MAX_TICK_SECONDS).contains(&seconds) {
                return Err(format!(
                    "--tick must be between 1 and {} seconds",
                    MAX_TICK_SECONDS
                ));
            }
            settings.tick_interval = Duration::from_secs(seconds);
        }
        if self.reject_when_busy {
            settings.submission_policy = SubmissionPolicy::Reject;
        }
        if let Some(dir) = &self.work_dir {
            settings.work_dir = absolute_dir(dir.clone())
                .map_err(|e| format!("Invalid work dir {}: {}", dir.display(), e))?;
        }
        if self.verbose {
            settings.log_level = "debug".to_string();
        }
        Ok(())
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Scheduled Job Execution Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: jobloom [OPTIONS] <DEFINITIONS_FILE>");
    println!();
    println!("Arguments:");
    println!("  <DEFINITIONS_FILE>  Path to the job definitions YAML file");
    println!();
    println!("Options:");
    println!("  --run JOB           Run the named job once and exit");
    println!("  --user ID           User id recorded for --run (default: {})", DEFAULT_USER_ID);
    println!("  --workers N         Worker pool size (default: number of CPUs)");
    println!("  --tick SECS         Scheduler tick interval, 1 to 30 (default: 15)");
    println!("  --reject-when-busy  Reject triggers while every worker is busy");
    println!("  --work-dir PATH     Root directory for execution outputs");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Every option also has a JOBLOOM_* environment variable.");
}

fn next_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires a value", flag))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => config.verbose = true,
            "--reject-when-busy" => config.reject_when_busy = true,
            "--run" => config.run_job = Some(next_value(args, &mut i, "--run")?.to_string()),
            "--user" => {
                let value = next_value(args, &mut i, "--user")?;
                config.user_id = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid user id: {}", value))?,
                );
            }
            "--workers" => {
                let value = next_value(args, &mut i, "--workers")?;
                config.workers = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid workers value: {}", value))?,
                );
            }
            "--tick" => {
                let value = next_value(args, &mut i, "--tick")?;
                config.tick_seconds = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid tick value: {}", value))?,
                );
            }
            "--work-dir" => {
                config.work_dir = Some(PathBuf::from(next_value(args, &mut i, "--work-dir")?));
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if config.definitions_path.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.definitions_path = Some(arg.clone());
            }
        }
        i += 1;
    }

    if config.definitions_path.is_none() {
        return Err("A definitions file is required".to_string());
    }
    Ok(config)
}

fn find_job(jobs: &[Job], name: &str) -> Result<Id, String> {
    jobs.iter()
        .find(|job| job.name.eq_ignore_ascii_case(name.trim()))
        .map(|job| job.id)
        .ok_or_else(|| {
            let known: Vec<&str> = jobs.iter().map(|job| job.name.as_str()).collect();
            format!("No job named '{}' (known: {})", name, known.join(", "))
        })
}

/// Triggers one job and waits for it.
async fn run_once(
    coordinator: &Coordinator,
    job_id: Id,
    user_id: Id,
) -> Result<(), Box<dyn std::error::Error>> {
    let execution_id = coordinator.trigger_manual(job_id, user_id).await?;
    coordinator.drain().await;

    let report = coordinator.query_status(execution_id)?;
    println!("{}", report.render());

    match report.status() {
        ExecutionStatus::Completed => Ok(()),
        status => Err(format!("Execution {} ended {}", execution_id, status).into()),
    }
}

/// Runs the scheduler until Ctrl-C, then waits for running executions.
async fn serve(coordinator: Coordinator, settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let schedules = coordinator.store().schedules()?;
    info!(
        "{} schedule(s) loaded, checking every {}s",
        schedules.iter().filter(|s| s.active).count(),
        settings.tick_interval.as_secs()
    );

    let handle = Scheduler::new(coordinator.clone()).spawn(settings.tick_interval);
    tokio::signal::ctrl_c().await?;

    println!();
    info!("Interrupted - stopping scheduler and waiting for running executions");
    handle.stop().await;
    coordinator.drain().await;
    info!("All executions finished");
    Ok(())
}

/// Main application entry point.
async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    let mut settings = Settings::from_env()?;
    config.apply(&mut settings)?;

    setup_logging(&settings.log_level);
    print_banner();

    for (name, value) in settings.entries() {
        info!("{:18} {}", name, value);
    }
    std::fs::create_dir_all(&settings.work_dir)?;

    let definitions_path = config.definitions_path.clone().unwrap_or_default();
    let store = Arc::new(MemoryStore::new());
    let registry = CommandRegistry::with_builtins();
    let jobs = load_into(store.as_ref(), &definitions_path, &registry).map_err(|e| {
        error!("Failed to load definitions: {}", e);
        format!(
            "Could not load definitions from '{}': {}",
            definitions_path, e
        )
    })?;
    info!("Definitions loaded: {} job(s)", jobs.len());

    let coordinator = Coordinator::new(store, registry, &settings);

    match &config.run_job {
        Some(name) => {
            let job_id = find_job(&jobs, name)?;
            run_once(&coordinator, job_id, config.user_id.unwrap_or(DEFAULT_USER_ID)).await
        }
        None => serve(coordinator, &settings).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
