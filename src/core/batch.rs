use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::core::command::decode;
use crate::core::error::RunnerError;
use crate::core::job::JobRecord;

/// Reads a job file: one command per line, `#` comments, and a trailing `\`
/// joining a line with the next. Returns each command with the line it
/// started on.
pub fn parse_job_file(path: &Path) -> Result<Vec<(usize, String)>, RunnerError> {
    let file = File::open(path).map_err(|e| RunnerError::MalformedCommand {
        message: format!("cannot open job file {}: {e}", path.display()),
    })?;
    let reader = BufReader::new(file);
    let mut commands = Vec::new();
    let mut current_command = String::new();
    let mut started_at = 0;

    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| RunnerError::MalformedCommand {
            message: format!("cannot read job file {}: {e}", path.display()),
        })?;
        let trimmed = line.trim();

        if trimmed.starts_with('#') || (trimmed.is_empty() && current_command.is_empty()) {
            continue;
        }

        if current_command.is_empty() {
            started_at = index + 1;
        }

        if let Some(stripped) = trimmed.strip_suffix('\\') {
            current_command.push_str(stripped.trim());
            current_command.push(' ');
        } else {
            current_command.push_str(trimmed);
            let command = std::mem::take(&mut current_command);
            let command = command.trim();
            if !command.is_empty() {
                commands.push((started_at, command.to_string()));
            }
        }
    }

    let command = current_command.trim();
    if !command.is_empty() {
        commands.push((started_at, command.to_string()));
    }

    Ok(commands)
}

/// Decodes every command in a job file, failing on the first bad line.
pub fn load_job_file(path: &Path) -> Result<Vec<JobRecord>, RunnerError> {
    parse_job_file(path)?
        .into_iter()
        .map(|(line, command)| {
            decode(&command).map_err(|err| RunnerError::MalformedCommand {
                message: format!("{}:{line}: {err}", path.display()),
            })
        })
        .collect()
}
