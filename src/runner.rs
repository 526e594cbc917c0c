//! External command execution
//!
//! The consensus store client and the service manager are both driven
//! through external binaries. [`CommandRunner`] is the seam between them and
//! the operating system; [`ProcessRunner`] is the production implementation
//! and `mock::MockRunner` the test double.

use std::process::Command;
use tracing::debug;

/// Why a command did not produce output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunFailure {
    /// The program could not be started at all
    Launch(String),
    /// The program ran and exited non-zero; carries stderr (or stdout if stderr is empty)
    Exit(String),
}

/// Trait for executing a program with arguments, returning its stdout
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<String, RunFailure>;
}

/// Runs commands as child processes and waits for them
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<String, RunFailure> {
        debug!(program, args = ?args, "running command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| RunFailure::Launch(e.to_string()))?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.is_empty() {
                Err(RunFailure::Exit(stdout.trim().to_string()))
            } else {
                Err(RunFailure::Exit(stderr))
            }
        }
    }
}
