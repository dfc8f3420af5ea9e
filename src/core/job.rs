use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Ready,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Ready,
        JobStatus::Running,
        JobStatus::Done,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Ready => "ready",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| format!("unknown job status '{value}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub program: String,
    pub positional_args: Vec<String>,
    pub named_options: IndexMap<String, String>,
    pub status: JobStatus,
}

/// Full-content identity of a job. Two textually identical jobs share one
/// identity and cannot be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobIdentity<'a> {
    pub program: &'a str,
    pub positional_args: &'a [String],
    pub named_options: &'a IndexMap<String, String>,
}

impl JobRecord {
    pub fn new(
        program: impl Into<String>,
        positional_args: Vec<String>,
        named_options: IndexMap<String, String>,
    ) -> Self {
        Self {
            program: program.into(),
            positional_args,
            named_options,
            status: JobStatus::Ready,
        }
    }

    pub fn identity(&self) -> JobIdentity<'_> {
        JobIdentity {
            program: &self.program,
            positional_args: &self.positional_args,
            named_options: &self.named_options,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }
}

/// A structured process invocation: no shell is involved in running it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut words = Vec::with_capacity(self.args.len() + 1);
        words.push(self.program.as_str());
        words.extend(self.args.iter().map(String::as_str));
        f.write_str(&shell_words::join(words))
    }
}
