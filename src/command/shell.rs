//! ShellScript Command
//!
//! Writes the step's script into the execution directory and runs it with
//! bash, with the execution directory as working directory. The script
//! runs with `set -e`, so the first failing line fails the step.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command as Process;

use log::{debug, error, warn};

use super::{Command, CommandContext, ParameterDescriptor, ParameterKind, Parameters};
use crate::error::CommandError;

const SCRIPT: &str = "Script";
const SHELL: &str = "Shell";

/// Default interpreter when `Shell` is not supplied.
const DEFAULT_SHELL: &str = "bash";

/// Typed view of the parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellScriptParameters {
    pub script: String,
    pub shell: String,
}

impl ShellScriptParameters {
    pub fn from_parameters(params: &Parameters) -> Result<Self, CommandError> {
        Ok(Self {
            script: params.required(SCRIPT, ShellScript::TYPE_NAME)?.to_string(),
            shell: params.get(SHELL).unwrap_or(DEFAULT_SHELL).trim().to_string(),
        })
    }
}

/// Runs a shell script.
#[derive(Debug, Default)]
pub struct ShellScript {
    parameters: Parameters,
}

impl ShellScript {
    pub const TYPE_NAME: &'static str = "ShellScript";
}

fn fail(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> CommandError {
    CommandError::execution(ShellScript::TYPE_NAME, source)
}

impl Command for ShellScript {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn declare_parameters(&self) -> Vec<ParameterDescriptor> {
        vec![
            ParameterDescriptor::required(SCRIPT, ParameterKind::MultilineText, "Script body"),
            ParameterDescriptor::optional(
                SHELL,
                ParameterKind::String,
                "Interpreter used to run the script (default: bash)",
            ),
        ]
    }

    fn set_parameters(&mut self, values: &HashMap<String, String>) {
        self.parameters = Parameters::from(values);
    }

    fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    fn execute(&mut self, ctx: &CommandContext) -> Result<(), CommandError> {
        let params = ShellScriptParameters::from_parameters(&self.parameters)?;

        fs::create_dir_all(&ctx.output_dir).map_err(fail)?;
        // The script path must survive the change of working directory.
        let output_dir = fs::canonicalize(&ctx.output_dir).map_err(fail)?;
        let script_path = create_execution_script(&output_dir, ctx.execution_step_id, &params.script)
            .map_err(fail)?;

        let output = Process::new(&params.shell)
            .arg(&script_path)
            .current_dir(&output_dir)
            .env("JOBLOOM_EXECUTION_ID", ctx.execution_id.to_string())
            .env("JOBLOOM_OUTPUT_DIR", &output_dir)
            .output()
            .map_err(|e| fail(format!("cannot start '{}': {}", params.shell, e)))?;

        if let Err(e) = fs::remove_file(&script_path) {
            warn!("Failed to clean up script {}: {}", script_path.display(), e);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("Script output:\n{}", stdout);
        }

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("Script failed with exit code: {:?}", output.status.code());
        if !stderr.trim().is_empty() {
            error!("stderr:\n{}", stderr);
        }

        Err(fail(format!(
            "script exited with {}: {}",
            output
                .status
                .code()
                .map_or_else(|| "a signal".to_string(), |c| format!("code {}", c)),
            last_line(&stderr)
        )))
    }
}

/// Writes the script file for one execution step.
fn create_execution_script(
    dir: &Path,
    execution_step_id: u64,
    script: &str,
) -> std::io::Result<PathBuf> {
    let script_path = dir.join(format!("step-{}.sh", execution_step_id));
    let mut file = File::create(&script_path)?;

    writeln!(file, "#!/bin/bash")?;
    writeln!(file, "set -e")?;
    writeln!(file, "{}", script)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))?;
    }

    Ok(script_path)
}

fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("no error output")
        .trim()
}
