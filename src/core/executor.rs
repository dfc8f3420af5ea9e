use std::process::Command;
use std::time::Instant;

use tracing::{debug, info};

use crate::core::error::RunnerError;
use crate::core::job::Invocation;

/// Runs a job program and reports its exit code.
///
/// A nonzero exit is a normal outcome; `Err` means the process never started.
pub trait JobExecutor {
    fn run(&self, invocation: &Invocation) -> Result<i32, RunnerError>;
}

/// Spawns the job as a child process sharing this process's stdio. No timeout
/// is applied: a job that never exits blocks the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor {
    dry_run: bool,
}

impl ProcessExecutor {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

impl JobExecutor for ProcessExecutor {
    fn run(&self, invocation: &Invocation) -> Result<i32, RunnerError> {
        if self.dry_run {
            info!("Would run: {invocation}");
            return Ok(0);
        }

        debug!("Running command: {invocation}");
        let started_at = Instant::now();

        let status = Command::new(&invocation.program)
            .args(&invocation.args)
            .status()
            .map_err(|e| RunnerError::Execution {
                program: invocation.program.clone(),
                message: if e.kind() == std::io::ErrorKind::NotFound {
                    "binary not found in PATH".to_string()
                } else {
                    e.to_string()
                },
            })?;

        // Killed by a signal: no code, count it as a failure.
        let code = status.code().unwrap_or(-1);
        debug!(
            "Command completed with return code {} after {:.1}s",
            code,
            started_at.elapsed().as_secs_f32()
        );
        Ok(code)
    }
}
