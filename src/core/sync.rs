use std::cell::RefCell;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::core::error::RunnerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Committed,
    NothingToCommit,
}

/// Pull/publish against the shared remote.
///
/// Implementations never merge job-status conflicts themselves: a rejected
/// publish leaves the local repository as it was before the call, and the
/// caller decides how to retry.
pub trait SyncGateway {
    /// Missing name or email is not an error; commits fall back to the
    /// transport's own defaults.
    fn sync_identity(&self, name: Option<&str>, email: Option<&str>) -> Result<(), RunnerError>;

    fn pull(&self) -> Result<(), RunnerError>;

    fn publish(&self, paths: &[&Path], message: &str) -> Result<PublishOutcome, RunnerError>;

    /// Restores `paths` to their last committed contents, dropping local edits
    /// so the next pull can merge.
    fn discard(&self, paths: &[&Path]) -> Result<(), RunnerError>;
}

static RE_PUSH_REJECTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?m)(\[rejected\]|\[remote rejected\]|non-fast-forward",
        r"|fetch first|Updates were rejected)",
    ))
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushFailure {
    Diverged,
    Transport,
}

pub fn classify_push_failure(stderr: &str) -> PushFailure {
    if RE_PUSH_REJECTED.is_match(stderr) {
        PushFailure::Diverged
    } else {
        PushFailure::Transport
    }
}

/// Drives the `git` binary inside a working copy.
#[derive(Debug, Clone)]
pub struct GitGateway {
    repo_dir: PathBuf,
}

impl GitGateway {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    fn git<I, S>(&self, operation: &'static str, args: I) -> Result<Output, RunnerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.repo_dir).args(args);
        debug!("Running git {operation}: {cmd:?}");

        cmd.output().map_err(|e| RunnerError::Sync {
            operation,
            message: if e.kind() == std::io::ErrorKind::NotFound {
                "git binary not found in PATH".to_string()
            } else {
                e.to_string()
            },
        })
    }

    fn git_checked<I, S>(&self, operation: &'static str, args: I) -> Result<Output, RunnerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.git(operation, args)?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(RunnerError::Sync {
                operation,
                message: failure_text(&output),
            })
        }
    }

    /// Relative paths are taken from the process working directory, which
    /// need not be the repository root.
    fn pathspec(&self, paths: &[&Path]) -> Result<Vec<OsString>, RunnerError> {
        if paths.iter().all(|p| p.is_absolute()) || self.repo_dir == Path::new(".") {
            return Ok(paths.iter().map(|p| p.as_os_str().to_os_string()).collect());
        }
        let cwd = std::env::current_dir().map_err(|e| RunnerError::Sync {
            operation: "add",
            message: e.to_string(),
        })?;
        Ok(paths.iter().map(|p| cwd.join(p).into_os_string()).collect())
    }

    /// Undoes our own staging so a failed publish leaves no trace in the index.
    fn unstage(&self, pathspec: &[OsString]) {
        let mut args: Vec<OsString> = vec!["reset".into(), "--quiet".into(), "--".into()];
        args.extend(pathspec.iter().cloned());
        if let Err(err) = self.git_checked("reset", args) {
            warn!("Could not unstage after failed publish: {err}");
        }
    }
}

impl SyncGateway for GitGateway {
    fn sync_identity(&self, name: Option<&str>, email: Option<&str>) -> Result<(), RunnerError> {
        let (Some(name), Some(email)) = (name, email) else {
            warn!("GIT_USER_NAME or GIT_USER_EMAIL not set. Git commits will use system defaults.");
            return Ok(());
        };

        info!("Setting up git with user {name} <{email}>");
        self.git_checked("config", ["config", "user.name", name])?;
        self.git_checked("config", ["config", "user.email", email])?;
        Ok(())
    }

    fn pull(&self) -> Result<(), RunnerError> {
        debug!("Pulling latest changes from repository");
        self.git_checked("pull", ["pull", "--no-rebase", "--no-edit", "--quiet"])?;
        Ok(())
    }

    fn publish(&self, paths: &[&Path], message: &str) -> Result<PublishOutcome, RunnerError> {
        let pathspec = self.pathspec(paths)?;

        let mut add: Vec<OsString> = vec!["add".into(), "--".into()];
        add.extend(pathspec.iter().cloned());
        self.git_checked("add", add)?;

        let mut staged: Vec<OsString> =
            vec!["diff".into(), "--cached".into(), "--quiet".into(), "--".into()];
        staged.extend(pathspec.iter().cloned());
        if self.git("diff", staged)?.status.success() {
            debug!("No changes to publish for {message:?}");
            return Ok(PublishOutcome::NothingToCommit);
        }

        let mut commit: Vec<OsString> = vec![
            "commit".into(),
            "--quiet".into(),
            "-m".into(),
            message.into(),
            "--".into(),
        ];
        commit.extend(pathspec.iter().cloned());
        if let Err(err) = self.git_checked("commit", commit) {
            self.unstage(&pathspec);
            return Err(err);
        }

        let push = self.git("push", ["push", "--quiet"])?;
        if push.status.success() {
            return Ok(PublishOutcome::Committed);
        }

        // Drop the commit but keep the working tree; the caller restores file
        // contents.
        if let Err(err) = self.git_checked("reset", ["reset", "--quiet", "HEAD~1"]) {
            warn!("Could not roll back unpublished commit: {err}");
        }

        let message = failure_text(&push);
        match classify_push_failure(&message) {
            PushFailure::Diverged => Err(RunnerError::PushRejected { message }),
            PushFailure::Transport => Err(RunnerError::Sync {
                operation: "push",
                message,
            }),
        }
    }

    fn discard(&self, paths: &[&Path]) -> Result<(), RunnerError> {
        let mut checkout: Vec<OsString> = vec!["checkout".into(), "HEAD".into(), "--".into()];
        checkout.extend(self.pathspec(paths)?);
        self.git_checked("checkout", checkout)?;
        debug!("Discarded local changes to {} path(s)", paths.len());
        Ok(())
    }
}

fn failure_text(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let text = if stderr.trim().is_empty() {
        String::from_utf8_lossy(&output.stdout)
    } else {
        stderr
    };
    let text = text.trim();
    if text.is_empty() {
        format!("exited with {}", output.status)
    } else {
        text.to_string()
    }
}

/// Transport for a queue that is not shared: pulls and publishes succeed
/// without touching any remote.
#[derive(Debug, Default)]
pub struct LocalGateway {
    published: RefCell<Vec<String>>,
}

impl LocalGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit messages that would have been published, oldest first.
    pub fn published(&self) -> Vec<String> {
        self.published.borrow().clone()
    }
}

impl SyncGateway for LocalGateway {
    fn sync_identity(&self, _name: Option<&str>, _email: Option<&str>) -> Result<(), RunnerError> {
        Ok(())
    }

    fn pull(&self) -> Result<(), RunnerError> {
        Ok(())
    }

    fn publish(&self, _paths: &[&Path], message: &str) -> Result<PublishOutcome, RunnerError> {
        debug!("Skipping publish (no sync): {message}");
        self.published.borrow_mut().push(message.to_string());
        Ok(PublishOutcome::Committed)
    }

    fn discard(&self, _paths: &[&Path]) -> Result<(), RunnerError> {
        Ok(())
    }
}
