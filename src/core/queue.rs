//! The shared job table.
//!
//! The queue is a CSV file with the header `script,args,kwargs,status`. The
//! `args` column holds a JSON array of strings and `kwargs` a JSON object of
//! string values. Every status change rewrites the whole file.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::RunnerError;
use crate::core::job::{JobIdentity, JobRecord, JobStatus};

pub const HEADER: [&str; 4] = ["script", "args", "kwargs", "status"];

/// Storage seam for the job table, so the worker does not depend on the file
/// layout.
pub trait QueueStore {
    fn path(&self) -> &Path;

    /// Returns `true` when the table had to be created.
    fn ensure_exists(&self) -> Result<bool, RunnerError>;

    fn append(&self, record: &JobRecord) -> Result<(), RunnerError>;

    fn read_all(&self) -> Result<Vec<JobRecord>, RunnerError>;

    /// Sets `status` on every row matching `identity` and returns how many
    /// rows matched.
    fn update_status(&self, identity: &JobIdentity<'_>, status: JobStatus)
        -> Result<usize, RunnerError>;
}

/// One row as stored. `args` and `kwargs` stay in their serialized form so a
/// rewrite leaves untouched cells byte-identical.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueueRow {
    script: String,
    args: String,
    kwargs: String,
    status: JobStatus,
}

impl QueueRow {
    fn encode(record: &JobRecord) -> Result<Self, serde_json::Error> {
        Ok(Self {
            script: record.program.clone(),
            args: serde_json::to_string(&record.positional_args)?,
            kwargs: serde_json::to_string(&record.named_options)?,
            status: record.status,
        })
    }

    fn decode(&self) -> Result<JobRecord, serde_json::Error> {
        let positional_args: Vec<String> = serde_json::from_str(&self.args)?;
        let named_options: IndexMap<String, String> = serde_json::from_str(&self.kwargs)?;
        Ok(JobRecord {
            program: self.script.clone(),
            positional_args,
            named_options,
            status: self.status,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CsvQueue {
    path: PathBuf,
}

impl CsvQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_error(&self, message: impl Into<String>) -> RunnerError {
        RunnerError::StoreRead {
            path: self.path.clone(),
            message: message.into(),
        }
    }

    fn write_error(&self, message: impl Into<String>) -> RunnerError {
        RunnerError::StoreWrite {
            path: self.path.clone(),
            message: message.into(),
        }
    }

    fn read_rows(&self) -> Result<Vec<QueueRow>, RunnerError> {
        let mut reader =
            csv::Reader::from_path(&self.path).map_err(|e| self.read_error(e.to_string()))?;

        let headers = reader
            .headers()
            .map_err(|e| self.read_error(e.to_string()))?;
        if headers.iter().ne(HEADER) {
            return Err(self.read_error(format!(
                "unexpected header '{}', expected '{}'",
                headers.iter().collect::<Vec<_>>().join(","),
                HEADER.join(",")
            )));
        }

        let mut rows = Vec::new();
        for (index, row) in reader.deserialize::<QueueRow>().enumerate() {
            // Line 1 is the header.
            let row = row.map_err(|e| self.read_error(format!("row {}: {e}", index + 2)))?;
            rows.push(row);
        }
        Ok(rows)
    }

    fn write_rows(&self, rows: &[QueueRow]) -> Result<(), RunnerError> {
        let staging = staging_path(&self.path);
        let result = (|| -> Result<(), csv::Error> {
            let mut writer = csv_writer(File::create(&staging)?, true);
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
            Ok(())
        })();

        if let Err(err) = result {
            let _ = fs::remove_file(&staging);
            return Err(self.write_error(err.to_string()));
        }

        fs::rename(&staging, &self.path).map_err(|e| {
            let _ = fs::remove_file(&staging);
            self.write_error(e.to_string())
        })
    }
}

impl QueueStore for CsvQueue {
    fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_exists(&self) -> Result<bool, RunnerError> {
        if self.path.exists() {
            return Ok(false);
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.write_error(e.to_string()))?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path);
        let file = match file {
            Ok(file) => file,
            // Lost a creation race; the other writer's table stands.
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(err) => return Err(self.write_error(err.to_string())),
        };

        let mut writer = csv_writer(file, false);
        writer
            .write_record(HEADER)
            .and_then(|_| writer.flush().map_err(csv::Error::from))
            .map_err(|e| self.write_error(e.to_string()))?;

        debug!("Created queue table at {}", self.path.display());
        Ok(true)
    }

    fn append(&self, record: &JobRecord) -> Result<(), RunnerError> {
        let row = QueueRow::encode(&record.clone().with_status(JobStatus::Ready))
            .map_err(|e| self.write_error(e.to_string()))?;

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| self.write_error(e.to_string()))?;

        let mut writer = csv_writer(file, false);
        writer
            .serialize(&row)
            .and_then(|_| writer.flush().map_err(csv::Error::from))
            .map_err(|e| self.write_error(e.to_string()))
    }

    fn read_all(&self) -> Result<Vec<JobRecord>, RunnerError> {
        self.read_rows()?
            .iter()
            .enumerate()
            .map(|(index, row)| {
                row.decode()
                    .map_err(|e| self.read_error(format!("row {}: {e}", index + 2)))
            })
            .collect()
    }

    fn update_status(
        &self,
        identity: &JobIdentity<'_>,
        status: JobStatus,
    ) -> Result<usize, RunnerError> {
        let mut rows = self.read_rows()?;

        let mut matched = 0;
        for (index, row) in rows.iter_mut().enumerate() {
            let record = row
                .decode()
                .map_err(|e| self.read_error(format!("row {}: {e}", index + 2)))?;
            if record.identity() == *identity {
                row.status = status;
                matched += 1;
            }
        }

        if matched > 1 {
            debug!(
                "{} identical rows for {} share one identity; all set to {}",
                matched, identity.program, status
            );
        }

        self.write_rows(&rows)?;
        Ok(matched)
    }
}

fn csv_writer<W: io::Write>(inner: W, has_headers: bool) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .has_headers(has_headers)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(inner)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
