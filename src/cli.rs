use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use crate::core::batch::load_job_file;
use crate::core::command::{decode, encode};
use crate::core::config::Config;
use crate::core::error::RunnerError;
use crate::core::executor::ProcessExecutor;
use crate::core::formatter::{format_added_message, format_list_header, format_list_line};
use crate::core::job::JobStatus;
use crate::core::queue::{CsvQueue, QueueStore};
use crate::core::sync::{GitGateway, LocalGateway, SyncGateway};
use crate::core::worker::Worker;

#[derive(Debug, Parser)]
#[command(name = "gitrunner", version, about = "Run a job queue shared through a git repository")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn debug(&self) -> bool {
        matches!(&self.command, Commands::Work(args) if args.debug)
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Add a job to the queue
    Add(AddArgs),
    /// List jobs in the queue
    List(ListArgs),
    /// Claim and run ready jobs until the queue is drained
    Work(WorkArgs),
}

#[derive(Debug, Args)]
pub struct AddArgs {
    /// The full command string (in quotes) to run
    #[arg(value_name = "COMMAND", required_unless_present = "file", conflicts_with = "file")]
    pub job_command: Option<String>,
    /// Add every command in a job file
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,
    /// Path to queue file
    #[arg(long, value_name = "PATH")]
    pub queue: Option<PathBuf>,
    /// Do not commit or push the queue
    #[arg(long)]
    pub no_sync: bool,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Filter by status (ready, running, done, failed)
    #[arg(long)]
    pub status: Option<JobStatus>,
    /// Path to queue file
    #[arg(long, value_name = "PATH")]
    pub queue: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct WorkArgs {
    /// Log verbosely and only pretend to run jobs
    #[arg(long)]
    pub debug: bool,
    /// Directory to track results in
    #[arg(long, value_name = "PATH")]
    pub results_dir: Option<PathBuf>,
    /// Consecutive empty or failed scans before exiting
    #[arg(long)]
    pub max_attempts: Option<u32>,
    /// Maximum number of runs per job before recording it as failed
    #[arg(long)]
    pub max_job_attempts: Option<u32>,
    /// Path to the queue file
    #[arg(long, value_name = "PATH")]
    pub queue_file: Option<PathBuf>,
    /// Seconds to sleep between job checks
    #[arg(long, value_name = "SECONDS")]
    pub sleep_time: Option<u64>,
    /// Work on the local queue without pulling or pushing
    #[arg(long)]
    pub no_sync: bool,
}

impl WorkArgs {
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(results_dir) = &self.results_dir {
            config.results_dir = results_dir.clone();
        }
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }
        if let Some(max_job_attempts) = self.max_job_attempts {
            config.max_job_attempts = max_job_attempts;
        }
        if let Some(queue_file) = &self.queue_file {
            config.queue_file = queue_file.clone();
        }
        if let Some(sleep_time) = self.sleep_time {
            config.sleep_time = Duration::from_secs(sleep_time);
        }
        config.dry_run |= self.debug;
    }
}

/// Runs one subcommand and returns the process exit code.
pub fn execute(command: Commands, config: Config) -> Result<i32, RunnerError> {
    match command {
        Commands::Add(args) => add(args, &config).map(|_| 0),
        Commands::List(args) => list(args, &config).map(|_| 0),
        Commands::Work(args) => work(args, config),
    }
}

fn gateway(config: &Config, no_sync: bool) -> Box<dyn SyncGateway> {
    if no_sync {
        Box::new(LocalGateway::new())
    } else {
        Box::new(GitGateway::new(config.repo_dir.clone()))
    }
}

fn add(args: AddArgs, config: &Config) -> Result<(), RunnerError> {
    let store = CsvQueue::new(args.queue.unwrap_or_else(|| config.queue_file.clone()));

    let jobs = match (args.job_command, args.file) {
        (Some(command), _) => vec![decode(&command)?],
        (None, Some(file)) => load_job_file(&file)?,
        (None, None) => {
            return Err(RunnerError::MalformedCommand {
                message: "no command given".to_string(),
            })
        }
    };

    if store.ensure_exists()? {
        info!("Created queue file {}", store.path().display());
    }

    for job in &jobs {
        store.append(job)?;
        info!("Added job to queue: {}", encode(job).invocation);
    }

    let message = match jobs.as_slice() {
        [job] => format_added_message(job),
        jobs => format!("Added {} jobs", jobs.len()),
    };

    match gateway(config, args.no_sync).publish(&[store.path()], &message) {
        Ok(_) => info!("Committed and pushed job to remote"),
        Err(err) => warn!("Failed to commit/push job ({err}). You'll need to commit manually."),
    }
    Ok(())
}

fn list(args: ListArgs, config: &Config) -> Result<(), RunnerError> {
    let store = CsvQueue::new(args.queue.unwrap_or_else(|| config.queue_file.clone()));
    store.ensure_exists()?;

    let jobs: Vec<_> = store
        .read_all()?
        .into_iter()
        .filter(|job| args.status.map_or(true, |status| job.status == status))
        .collect();

    println!("{}", format_list_header(jobs.len(), args.status));
    for (index, job) in jobs.iter().enumerate() {
        println!("{}", format_list_line(index + 1, job));
    }
    Ok(())
}

fn work(args: WorkArgs, mut config: Config) -> Result<i32, RunnerError> {
    args.apply_to(&mut config);
    config.validate()?;

    if config.dry_run {
        info!("Debug mode enabled: jobs will not be executed");
    }

    fs::create_dir_all(&config.results_dir).map_err(|e| RunnerError::Config {
        message: format!(
            "cannot create results directory {}: {e}",
            config.results_dir.display()
        ),
    })?;
    info!("Results will be stored in: {}", config.results_dir.display());

    let gateway = gateway(&config, args.no_sync);
    if let Err(err) = gateway.sync_identity(
        config.git_user_name.as_deref(),
        config.git_user_email.as_deref(),
    ) {
        warn!("Could not configure commit identity: {err}");
    }
    if let Err(err) = gateway.pull() {
        warn!("Initial pull failed: {err}");
    }

    let store = CsvQueue::new(config.queue_file.clone());
    let executor = ProcessExecutor::new(config.dry_run);
    let outcome = Worker::new(&config, &store, gateway.as_ref(), &executor).run();
    Ok(outcome.exit_code())
}
