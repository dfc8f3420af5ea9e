//! Runs a queue of jobs kept in a CSV file inside a shared git repository.
//!
//! Workers pull the repository, claim the first `ready` job by committing and
//! pushing a `running` status, run it, and publish the outcome. Git push/pull
//! is the only coordination between workers.

pub mod cli;
pub mod core;
