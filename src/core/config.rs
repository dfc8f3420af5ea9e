//! Worker configuration.
//!
//! Built once at startup from defaults, then the environment, then CLI
//! overrides, and handed to each component by reference.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::core::command::DEFAULT_INTERPRETER;
use crate::core::error::RunnerError;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Shared job table (JOBS_QUEUE_FILE)
    pub queue_file: PathBuf,

    /// Directory job programs write artifacts into (RESULTS_DIR)
    pub results_dir: PathBuf,

    /// Working copy the git transport runs in (GITRUNNER_REPO)
    pub repo_dir: PathBuf,

    /// Base interval for scan backoff (SLEEP_TIME, seconds)
    pub sleep_time: Duration,

    /// Consecutive failed scans or claims before giving up (MAX_ATTEMPTS)
    pub max_attempts: u32,

    /// Runs of a failing job within one claim (MAX_JOB_ATTEMPTS)
    pub max_job_attempts: u32,

    pub git_user_name: Option<String>,
    pub git_user_email: Option<String>,

    /// Program that runs job scripts (JOB_INTERPRETER)
    pub interpreter: String,

    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_file: PathBuf::from("queue.csv"),
            results_dir: PathBuf::from("results"),
            repo_dir: PathBuf::from("."),
            sleep_time: Duration::from_secs(2),
            max_attempts: 3,
            max_job_attempts: 1,
            git_user_name: None,
            git_user_email: None,
            interpreter: DEFAULT_INTERPRETER.to_string(),
            dry_run: false,
        }
    }
}

impl Config {
    /// Reads the process environment.
    ///
    /// Recognised variables: JOBS_QUEUE_FILE, RESULTS_DIR, GITRUNNER_REPO,
    /// SLEEP_TIME, MAX_ATTEMPTS, MAX_JOB_ATTEMPTS, GIT_USER_NAME,
    /// GIT_USER_EMAIL, JOB_INTERPRETER.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Self {
            queue_file: text("JOBS_QUEUE_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.queue_file),
            results_dir: text("RESULTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.results_dir),
            repo_dir: text("GITRUNNER_REPO")
                .map(PathBuf::from)
                .unwrap_or(defaults.repo_dir),
            sleep_time: parsed(text("SLEEP_TIME"), "SLEEP_TIME", defaults.sleep_time.as_secs())
                .map(Duration::from_secs)
                .unwrap_or(defaults.sleep_time),
            max_attempts: parsed(text("MAX_ATTEMPTS"), "MAX_ATTEMPTS", defaults.max_attempts)
                .unwrap_or(defaults.max_attempts),
            max_job_attempts: parsed(
                text("MAX_JOB_ATTEMPTS"),
                "MAX_JOB_ATTEMPTS",
                defaults.max_job_attempts,
            )
            .unwrap_or(defaults.max_job_attempts),
            git_user_name: text("GIT_USER_NAME"),
            git_user_email: text("GIT_USER_EMAIL"),
            interpreter: text("JOB_INTERPRETER").unwrap_or(defaults.interpreter),
            dry_run: false,
        }
    }

    pub fn validate(&self) -> Result<(), RunnerError> {
        let invalid = |message: &str| {
            Err(RunnerError::Config {
                message: message.to_string(),
            })
        };

        if self.queue_file.as_os_str().is_empty() {
            return invalid("queue file path cannot be empty");
        }
        if self.results_dir.as_os_str().is_empty() {
            return invalid("results directory cannot be empty");
        }
        if self.max_attempts == 0 {
            return invalid("max attempts must be greater than 0");
        }
        if self.max_job_attempts == 0 {
            return invalid("max job attempts must be greater than 0");
        }
        if self.interpreter.trim().is_empty() {
            return invalid("interpreter cannot be empty");
        }
        Ok(())
    }

    /// Backoff after `failures` consecutive empty or failed scans.
    pub fn backoff(&self, failures: u32) -> Duration {
        self.sleep_time.saturating_mul(failures.saturating_add(1))
    }
}

fn parsed<T>(value: Option<String>, key: &str, default: T) -> Option<T>
where
    T: FromStr + std::fmt::Display,
{
    let value = value?;
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Ignoring {key}={value:?}: not a valid number, using {default}");
            None
        }
    }
}
