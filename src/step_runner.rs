//! Type-Safe Step Execution
//!
//! `run_step_safe` is the only place casync-pull starts an external program.
//! Going through it guarantees:
//!
//! - Process group isolation, so a signal takes down `scp` and its `ssh`
//! - Registration of the group with the global `ChildRegistry` for cleanup
//! - Arguments and environment come from a `ToolInvocation`, never raw strings

use crate::error::{PullError, Result};
use crate::pipeline::Step;
use crate::process_guard::{ChildRegistry, SupervisedCommand};
use crate::step_traits::ToolInvocation;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus, Stdio};
use tracing::{debug, info, warn};

/// What to do with the child's stdout/stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Stream straight to our terminal (copy progress, upload logs).
    Inherit,
    /// Collect stdout; stderr still streams so errors stay visible.
    Capture,
}

/// Execute a step with type-safe arguments.
///
/// # Returns
///
/// - `Ok(output)` once the program ran to completion, whatever its status;
///   call [`StepOutput::ensure_success`] to turn a failure into an error
/// - `Err(PullError::Spawn)` when the program could not be started
pub fn run_step_safe<T: ToolInvocation>(args: &T, mode: OutputMode) -> Result<StepOutput> {
    let step = args.step();
    let program = args.program();
    let cli_args = args.to_cli_args();
    let env_vars = args.get_env_vars();

    info!("{}: {}", step, args.display_command());

    let mut cmd = Command::new(&program);
    cmd.args(&cli_args)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .supervised();
    match mode {
        OutputMode::Inherit => cmd.stdout(Stdio::inherit()),
        OutputMode::Capture => cmd.stdout(Stdio::piped()),
    };
    for (key, value) in &env_vars {
        cmd.env(key, value);
    }

    let child = cmd.spawn().map_err(|e| spawn_error(step, &program, e))?;
    let pid = child.id();
    ChildRegistry::with_global(|registry| registry.register(pid, step));

    let waited = child.wait_with_output();
    ChildRegistry::with_global(|registry| registry.unregister(pid));

    let output = waited.map_err(|e| PullError::Spawn {
        step,
        program: program.clone(),
        reason: format!("failed waiting for process: {}", e),
        not_found: false,
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let result = StepOutput::from_status(args, output.status, stdout);

    if result.success {
        debug!("{} finished successfully", step);
    } else {
        warn!(
            "{} failed (exit code {:?}, signal {:?})",
            step, result.exit_code, result.signal
        );
    }
    Ok(result)
}

fn spawn_error(step: Step, program: &str, err: io::Error) -> PullError {
    PullError::Spawn {
        step,
        program: program.to_string(),
        not_found: err.kind() == io::ErrorKind::NotFound,
        reason: err.to_string(),
    }
}

/// Output from a step execution.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub step: Step,
    pub program: String,
    /// Captured stdout; empty in `OutputMode::Inherit`.
    pub stdout: String,
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
    /// Terminating signal, if any.
    pub signal: Option<i32>,
    pub success: bool,
}

impl StepOutput {
    fn from_status<T: ToolInvocation>(args: &T, status: ExitStatus, stdout: String) -> Self {
        Self {
            step: args.step(),
            program: args.program(),
            stdout,
            exit_code: status.code(),
            signal: status.signal(),
            success: status.success(),
        }
    }

    /// Turn a non-zero exit or a signal into the matching error.
    pub fn ensure_success(&self) -> Result<()> {
        if self.success {
            return Ok(());
        }
        match (self.exit_code, self.signal) {
            (Some(code), _) => Err(PullError::StepFailed {
                step: self.step,
                program: self.program.clone(),
                code,
            }),
            (None, Some(signal)) => Err(PullError::Killed {
                step: self.step,
                program: self.program.clone(),
                signal,
            }),
            (None, None) => Err(PullError::StepFailed {
                step: self.step,
                program: self.program.clone(),
                code: crate::error::EXIT_FAILURE,
            }),
        }
    }
}
