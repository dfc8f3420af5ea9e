pub mod batch;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod formatter;
pub mod job;
pub mod queue;
pub mod sync;
pub mod worker;

pub use command::{decode, encode, EncodedCommand};
pub use config::Config;
pub use error::RunnerError;
pub use executor::{JobExecutor, ProcessExecutor};
pub use job::{Invocation, JobIdentity, JobRecord, JobStatus};
pub use queue::{CsvQueue, QueueStore};
pub use sync::{GitGateway, LocalGateway, PublishOutcome, SyncGateway};
pub use worker::{LoopOutcome, Worker, WorkerState};
