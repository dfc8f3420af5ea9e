use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to read queue {path}: {message}")]
    StoreRead { path: PathBuf, message: String },
    #[error("failed to write queue {path}: {message}")]
    StoreWrite { path: PathBuf, message: String },
    #[error("malformed command: {message}")]
    MalformedCommand { message: String },
    #[error("git {operation} failed: {message}")]
    Sync {
        operation: &'static str,
        message: String,
    },
    #[error("push rejected, remote has diverged: {message}")]
    PushRejected { message: String },
    #[error("failed to launch {program}: {message}")]
    Execution { program: String, message: String },
    #[error("invalid configuration: {message}")]
    Config { message: String },
}
