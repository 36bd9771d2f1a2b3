//! Running the `git` executable.
//!
//! Every interaction with a repository goes through [`GitRunner`]. The real
//! implementation ([`GitCli`]) spawns `git -C <repo> <args...>`; tests swap in
//! a scripted runner. Output interpretation (acceptable exit codes, error
//! classification) is shared so both behave the same way.
use std::{
    collections::{BTreeSet, HashSet},
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use utils::{shell::resolve_git_executable, text::excerpt};

use crate::git_error::{GitErrorKind, parse_error};

const MAX_LOGGED_OUTPUT_BYTES: usize = 200;

/// Everything git told us about one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Classified failure, only set when the exit code was not acceptable.
    pub git_error: Option<GitErrorKind>,
    pub git_error_description: Option<String>,
    /// Undecoded stdout, only kept when [`RunOptions::binary_stdout`] is set.
    pub raw_stdout: Option<Vec<u8>>,
}

impl GitResult {
    /// Raw process output, stderr first, in the form shown to users when no
    /// classification applies.
    pub fn combined_output(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => "Command failed with no output".to_string(),
            (false, false) => format!("--- stderr\n{stderr}\n--- stdout\n{stdout}"),
            (false, true) => format!("--- stdout\n{stdout}"),
            (true, false) => format!("--- stderr\n{stderr}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub success_exit_codes: BTreeSet<i32>,
    pub expected_errors: HashSet<GitErrorKind>,
    /// Keep stdout as bytes (e.g. blob contents) instead of decoding it.
    pub binary_stdout: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            success_exit_codes: BTreeSet::from([0]),
            expected_errors: HashSet::new(),
            binary_stdout: false,
        }
    }
}

impl RunOptions {
    pub fn with_success_exit_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.success_exit_codes = codes.into_iter().collect();
        self
    }

    pub fn allow_exit_code(mut self, code: i32) -> Self {
        self.success_exit_codes.insert(code);
        self
    }

    pub fn expect_error(mut self, kind: GitErrorKind) -> Self {
        self.expected_errors.insert(kind);
        self
    }

    pub fn with_binary_stdout(mut self) -> Self {
        self.binary_stdout = true;
        self
    }
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git executable not found or not runnable")]
    NotAvailable,
    #[error("git {args} timed out after {secs}s")]
    TimedOut { args: String, secs: u64 },
    #[error("failed to run git: {0}")]
    Io(#[from] std::io::Error),
    #[error("{description}")]
    Git {
        kind: GitErrorKind,
        description: String,
        result: Box<GitResult>,
    },
    #[error("git command failed: {message}")]
    CommandFailed {
        message: String,
        result: Box<GitResult>,
    },
}

impl GitError {
    pub fn kind(&self) -> Option<GitErrorKind> {
        match self {
            GitError::Git { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&GitResult> {
        match self {
            GitError::Git { result, .. } | GitError::CommandFailed { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.result().map(|r| r.exit_code)
    }
}

/// Turn raw process output into a [`GitResult`] or a [`GitError`].
///
/// Classification only happens when the exit code is not acceptable: stderr
/// is tried first, then stdout. A classified kind listed in
/// `expected_errors` is handed back to the caller as a result.
pub fn interpret_output(
    stdout: String,
    stderr: String,
    exit_code: i32,
    options: &RunOptions,
) -> Result<GitResult, GitError> {
    let acceptable = options.success_exit_codes.contains(&exit_code);

    let mut result = GitResult {
        stdout,
        stderr,
        exit_code,
        git_error: None,
        git_error_description: None,
        raw_stdout: None,
    };

    if acceptable {
        return Ok(result);
    }

    let kind = parse_error(&result.stderr).or_else(|| parse_error(&result.stdout));
    result.git_error = kind;
    result.git_error_description = kind.and_then(GitErrorKind::description).map(str::to_string);

    match kind {
        Some(kind) if options.expected_errors.contains(&kind) => {
            tracing::debug!(?kind, exit_code, "Tolerating expected git error");
            Ok(result)
        }
        Some(kind) => {
            let description = result
                .git_error_description
                .clone()
                .unwrap_or_else(|| result.combined_output());
            Err(GitError::Git {
                kind,
                description,
                result: Box::new(result),
            })
        }
        None => {
            let message = result.combined_output();
            tracing::debug!(
                exit_code,
                output = %excerpt(&message, MAX_LOGGED_OUTPUT_BYTES),
                "Unclassified git failure"
            );
            Err(GitError::CommandFailed {
                message,
                result: Box::new(result),
            })
        }
    }
}

#[async_trait]
pub trait GitRunner: Send + Sync {
    /// Run `git <args>` inside `repo`.
    async fn run(
        &self,
        repo: &Path,
        args: &[&str],
        options: RunOptions,
    ) -> Result<GitResult, GitError>;
}

/// Runs the system `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    executable: PathBuf,
    timeout: Option<Duration>,
}

impl GitCli {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            timeout: None,
        }
    }

    /// Locate git, honouring an explicitly configured executable.
    pub async fn discover(configured: Option<&str>) -> Result<Self, GitError> {
        let executable = resolve_git_executable(configured)
            .await
            .ok_or(GitError::NotAvailable)?;
        Ok(Self::new(executable))
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

#[async_trait]
impl GitRunner for GitCli {
    async fn run(
        &self,
        repo: &Path,
        args: &[&str],
        options: RunOptions,
    ) -> Result<GitResult, GitError> {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("-C").arg(repo).args(args);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::trace!(repo = ?repo, "Running git command: {:?}", args);

        let child = cmd.spawn().map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => GitError::NotAvailable,
            _ => GitError::Io(err),
        })?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| GitError::TimedOut {
                    args: args.join(" "),
                    secs: limit.as_secs(),
                })??,
            None => child.wait_with_output().await?,
        };

        let (stdout, raw_stdout) = if options.binary_stdout {
            (String::new(), Some(output.stdout))
        } else {
            (String::from_utf8_lossy(&output.stdout).into_owned(), None)
        };
        let mut result = interpret_output(
            stdout,
            String::from_utf8_lossy(&output.stderr).into_owned(),
            output.status.code().unwrap_or(-1),
            &options,
        )?;
        result.raw_stdout = raw_stdout;
        Ok(result)
    }
}
