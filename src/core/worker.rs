//! The polling worker.
//!
//! ```text
//! SCANNING -> CLAIMING -> EXECUTING -> FINALIZING -> SCANNING
//!     |           |
//!     +-> DRAINED +-> ABORTED
//! ```
//!
//! Claiming is optimistic. Two workers that both read a job as `ready` before
//! either publishes its claim will both run it; the loop only keeps that
//! window short by pulling right before the scan and publishing the claim
//! before executing.

use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::core::command::to_invocation;
use crate::core::config::Config;
use crate::core::error::RunnerError;
use crate::core::executor::JobExecutor;
use crate::core::formatter::{format_claim_message, format_finish_message, format_results_message};
use crate::core::job::{JobRecord, JobStatus};
use crate::core::queue::QueueStore;
use crate::core::sync::{PublishOutcome, SyncGateway};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Scanning,
    Claiming(JobRecord),
    Executing(JobRecord),
    /// `exit_code` is `None` when the job program could not be started.
    Finalizing {
        job: JobRecord,
        exit_code: Option<i32>,
    },
    Drained,
    Aborted,
}

impl WorkerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Drained | WorkerState::Aborted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// No ready jobs were left.
    Drained,
    /// The queue or the remote stayed unusable.
    Aborted,
}

impl LoopOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            LoopOutcome::Drained => 0,
            LoopOutcome::Aborted => 1,
        }
    }
}

pub struct Worker<'a> {
    config: &'a Config,
    store: &'a dyn QueueStore,
    gateway: &'a dyn SyncGateway,
    executor: &'a dyn JobExecutor,
    scan_failures: u32,
    claim_failures: u32,
}

impl<'a> Worker<'a> {
    pub fn new(
        config: &'a Config,
        store: &'a dyn QueueStore,
        gateway: &'a dyn SyncGateway,
        executor: &'a dyn JobExecutor,
    ) -> Self {
        Self {
            config,
            store,
            gateway,
            executor,
            scan_failures: 0,
            claim_failures: 0,
        }
    }

    /// Runs until the queue is drained or the attempt ceiling is hit.
    pub fn run(&mut self) -> LoopOutcome {
        info!("Starting job processing loop");
        let mut state = WorkerState::Scanning;
        while !state.is_terminal() {
            state = self.step(state);
        }
        match state {
            WorkerState::Aborted => LoopOutcome::Aborted,
            _ => LoopOutcome::Drained,
        }
    }

    /// Performs one transition.
    pub fn step(&mut self, state: WorkerState) -> WorkerState {
        match state {
            WorkerState::Scanning => self.scan(),
            WorkerState::Claiming(job) => self.claim(job),
            WorkerState::Executing(job) => self.execute(job),
            WorkerState::Finalizing { job, exit_code } => self.finalize(job, exit_code),
            terminal => terminal,
        }
    }

    fn scan(&mut self) -> WorkerState {
        self.pull();

        let jobs = match self.store.read_all() {
            Ok(jobs) => jobs,
            Err(err) => {
                warn!(
                    "Error reading job file ({}/{}): {err}",
                    self.scan_failures + 1,
                    self.config.max_attempts
                );
                if self.back_off() {
                    error!(
                        "Failed to read job file after {} attempts. Exiting...",
                        self.config.max_attempts
                    );
                    return WorkerState::Aborted;
                }
                return WorkerState::Scanning;
            }
        };

        match jobs.into_iter().find(|job| job.status == JobStatus::Ready) {
            Some(job) => {
                self.scan_failures = 0;
                info!("Found ready job: {}", job.program);
                WorkerState::Claiming(job)
            }
            None => {
                info!(
                    "No available jobs. ({}/{}) Sleeping...",
                    self.scan_failures + 1,
                    self.config.max_attempts
                );
                if self.back_off() {
                    info!(
                        "No jobs available after {} attempts. Exiting...",
                        self.config.max_attempts
                    );
                    return WorkerState::Drained;
                }
                WorkerState::Scanning
            }
        }
    }

    /// Sleeps `sleep_time * (failures + 1)` and reports whether the ceiling
    /// has now been reached.
    fn back_off(&mut self) -> bool {
        self.sleep(self.config.backoff(self.scan_failures));
        self.scan_failures += 1;
        self.scan_failures >= self.config.max_attempts
    }

    fn claim(&mut self, job: JobRecord) -> WorkerState {
        let message = format_claim_message(&job);
        info!("Claiming job: {message}");

        let published = self
            .set_status(&job, JobStatus::Running)
            .and_then(|_| self.publish(self.store.path(), &message));

        match published {
            Ok(()) => {
                self.claim_failures = 0;
                WorkerState::Executing(job.with_status(JobStatus::Running))
            }
            Err(reason) => {
                self.claim_failures += 1;
                warn!(
                    "Failed to claim job ({}/{}): {reason}",
                    self.claim_failures, self.config.max_attempts
                );

                // Keep the job in the ready pool rather than leave a claim
                // nobody else can see.
                if let Err(reset) = self.set_status(&job, JobStatus::Ready) {
                    error!("Could not reset job to ready: {reset}");
                }

                if self.claim_failures >= self.config.max_attempts {
                    error!(
                        "Failed to claim a job after {} attempts. Exiting...",
                        self.config.max_attempts
                    );
                    return WorkerState::Aborted;
                }
                self.sleep(self.config.sleep_time);
                WorkerState::Scanning
            }
        }
    }

    fn execute(&mut self, job: JobRecord) -> WorkerState {
        let invocation = to_invocation(&job, &self.config.interpreter);
        let attempts = self.config.max_job_attempts;

        let mut exit_code = None;
        for attempt in 1..=attempts {
            info!("Running ({attempt}/{attempts}): {invocation}");
            match self.executor.run(&invocation) {
                Ok(0) => {
                    exit_code = Some(0);
                    break;
                }
                Ok(code) => {
                    warn!("Job exited with code {code}");
                    exit_code = Some(code);
                }
                Err(err) => {
                    error!("{err}");
                    exit_code = None;
                    break;
                }
            }
        }

        WorkerState::Finalizing { job, exit_code }
    }

    fn finalize(&mut self, job: JobRecord, exit_code: Option<i32>) -> WorkerState {
        let succeeded = exit_code == Some(0);
        let status = if succeeded {
            JobStatus::Done
        } else {
            JobStatus::Failed
        };
        let message = format_finish_message(&job, succeeded);

        if let Err(reason) = self.set_status(&job, status) {
            error!("Failed to record job as {status}: {reason}");
            return WorkerState::Scanning;
        }

        // A rejected status push means the remote moved while the job ran.
        // Start over from the remote table and record the outcome there.
        let queue = self.store.path();
        let recorded = self.publish_with_retry(queue, &message, |worker: &Self| {
            worker.gateway.discard(&[queue])?;
            worker.pull();
            worker.set_status(&job, status)
        });
        match recorded {
            Ok(()) => info!("Recorded job as {status}"),
            Err(reason) => {
                error!("Failed to publish job status {status}, dropping local change: {reason}");
                if let Err(err) = self.gateway.discard(&[queue]) {
                    error!("Could not restore queue file: {err}");
                }
            }
        }

        if succeeded {
            let results = format_results_message(&job);
            let pushed = self.publish_with_retry(&self.config.results_dir, &results, |worker| {
                worker.pull();
                Ok(())
            });
            match pushed {
                Ok(()) => info!("Pushed results to repository: {results}"),
                Err(reason) => warn!("Failed to push results: {reason}"),
            }
        }

        info!("{message}. Looking for the next job...");
        WorkerState::Scanning
    }

    fn set_status(&self, job: &JobRecord, status: JobStatus) -> Result<(), RunnerError> {
        info!("Setting job status: {} -> {status}", job.program);
        match self.store.update_status(&job.identity(), status)? {
            0 => Err(RunnerError::StoreWrite {
                path: self.store.path().to_path_buf(),
                message: format!("job {} is no longer in the queue", job.program),
            }),
            _ => Ok(()),
        }
    }

    /// Publishes `path`. After each failed attempt `reapply` brings the local
    /// change back on top of fresh remote state, up to `max_attempts` tries.
    fn publish_with_retry(
        &self,
        path: &Path,
        message: &str,
        mut reapply: impl FnMut(&Self) -> Result<(), RunnerError>,
    ) -> Result<(), RunnerError> {
        let attempts = self.config.max_attempts;
        let mut attempt = 1;
        loop {
            let err = match self.publish(path, message) {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            if attempt >= attempts {
                return Err(err);
            }
            warn!("Publish failed ({attempt}/{attempts}), retrying on fresh state: {err}");
            self.sleep(self.config.backoff(attempt - 1));
            reapply(self)?;
            attempt += 1;
        }
    }

    fn pull(&self) {
        if let Err(err) = self.gateway.pull() {
            warn!("Pull failed, using local queue state: {err}");
        }
    }

    fn publish(&self, path: &Path, message: &str) -> Result<(), RunnerError> {
        if self.gateway.publish(&[path], message)? == PublishOutcome::NothingToCommit {
            info!("No changes to publish for {}", path.display());
        }
        Ok(())
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}
