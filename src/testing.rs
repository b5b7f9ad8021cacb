//! Test commands and fixtures shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crate::command::{
    Command, CommandContext, CommandRegistry, ParameterDescriptor, ParameterKind, Parameters,
};
use crate::error::CommandError;
use crate::model::{Job, JobStep};
use crate::store::Store;

/// Observes every `Record` command created from one registry.
#[derive(Clone, Default)]
pub struct Probe {
    calls: Arc<Mutex<Vec<String>>>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    gate: Arc<(Mutex<bool>, Condvar)>,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    /// A builtin registry extended with `Record` commands reporting to this probe.
    pub fn registry(&self) -> CommandRegistry {
        let mut registry = CommandRegistry::with_builtins();
        let probe = self.clone();
        registry.register(RecordingCommand::TYPE_NAME, move || {
            Box::new(RecordingCommand::with_probe(probe.clone()))
        });
        registry
    }

    /// Labels of executed commands, in execution order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of commands observed running at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Releases every command waiting on `Hold`.
    pub fn open_gate(&self) {
        let (open, signal) = &*self.gate;
        *open.lock().unwrap() = true;
        signal.notify_all();
    }

    /// Polls until `label` has been recorded.
    pub async fn wait_for_call(&self, label: &str) {
        for _ in 0..500 {
            if self.calls().iter().any(|c| c == label) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("command '{}' never ran; calls: {:?}", label, self.calls());
    }

    fn wait_at_gate(&self) {
        let (open, signal) = &*self.gate;
        let mut guard = open.lock().unwrap();
        while !*guard {
            guard = signal.wait(guard).unwrap();
        }
    }
}

/// Test command driven by its parameters.
///
/// - `Label`: recorded on the probe when executed
/// - `Fail`: when `true`, execution fails after recording
/// - `SleepMs`: sleeps before returning
/// - `Hold`: when `true`, blocks until the probe's gate opens
/// - `Required`: declared required, only checked when `Strict` is `true`
#[derive(Default)]
pub struct RecordingCommand {
    parameters: Parameters,
    probe: Probe,
}

impl RecordingCommand {
    pub const TYPE_NAME: &'static str = "Record";

    pub fn with_probe(probe: Probe) -> Self {
        Self {
            parameters: Parameters::new(),
            probe,
        }
    }
}

impl Command for RecordingCommand {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn declare_parameters(&self) -> Vec<ParameterDescriptor> {
        let mut declared = vec![
            ParameterDescriptor::optional("Label", ParameterKind::String, "Recorded name"),
            ParameterDescriptor::optional("Fail", ParameterKind::String, "Fail when true"),
            ParameterDescriptor::optional("SleepMs", ParameterKind::String, "Delay"),
            ParameterDescriptor::optional("Hold", ParameterKind::String, "Wait for the gate"),
        ];
        if self.parameters.get("Strict") == Some("true") {
            declared.push(ParameterDescriptor::required(
                "Required",
                ParameterKind::String,
                "Must be present",
            ));
        }
        declared
    }

    fn set_parameters(&mut self, values: &HashMap<String, String>) {
        self.parameters = Parameters::from(values);
    }

    fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    fn execute(&mut self, ctx: &CommandContext) -> Result<(), CommandError> {
        let now = self.probe.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.peak.fetch_max(now, Ordering::SeqCst);

        let label = self
            .parameters
            .get("Label")
            .map(str::to_string)
            .unwrap_or_else(|| format!("step-{}", ctx.execution_step_id));
        self.probe.calls.lock().unwrap().push(label.clone());

        if self.parameters.get("Hold") == Some("true") {
            self.probe.wait_at_gate();
        }
        if let Some(ms) = self.parameters.get("SleepMs").and_then(|v| v.parse().ok()) {
            thread::sleep(Duration::from_millis(ms));
        }

        self.probe.running.fetch_sub(1, Ordering::SeqCst);

        if self.parameters.get("Fail") == Some("true") {
            return Err(CommandError::execution(
                Self::TYPE_NAME,
                format!("{} failed on purpose", label),
            ));
        }
        Ok(())
    }
}

/// Stores an active job with one `Record` step per entry of `steps`.
///
/// Each entry is `(index, parameters)`.
pub fn record_job(store: &dyn Store, name: &str, steps: &[(i32, &[(&str, &str)])]) -> Job {
    let job = store.insert_job(Job::new(name)).unwrap();
    for (index, parameters) in steps {
        let mut step = JobStep::new(job.id, *index, RecordingCommand::TYPE_NAME);
        for (key, value) in parameters.iter() {
            step = step.with_parameter(key, *value);
        }
        store.insert_step(step).unwrap();
    }
    job
}

/// Stores a job with one labelled `Record` step per entry, at indexes 0, 1, ...
pub fn labelled_job(store: &dyn Store, name: &str, labels: &[&str]) -> Job {
    let job = store.insert_job(Job::new(name)).unwrap();
    for (index, label) in labels.iter().enumerate() {
        store
            .insert_step(
                JobStep::new(job.id, index as i32, RecordingCommand::TYPE_NAME)
                    .with_parameter("Label", *label),
            )
            .unwrap();
    }
    job
}
