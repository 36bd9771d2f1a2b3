use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;

pub mod branch;
pub mod cli;
pub mod delimiter;
pub mod diff;
pub mod git_error;
pub mod log;
pub mod repo_state;
pub mod stash;
pub mod status;

pub use branch::{AheadBehind, Branch, BranchTip, BranchType};
pub use cli::{GitCli, GitError, GitResult, GitRunner, RunOptions};
pub use delimiter::DelimitedParseError;
pub use diff::{Diff, FileContents, Image};
pub use git_error::GitErrorKind;
pub use log::{ChangesetData, Commit, CommitIdentity, NumstatParseError};
pub use repo_state::{ConflictState, RepositoryState};
pub use stash::{StashEntry, StashResult};
pub use status::{
    AppFileStatus, CommittedFileChange, DEFAULT_MAX_STATUS_BUFFER_BYTES, FileChange,
    StatusParseError, StatusResult, WorkingDirectoryFileChange, WorkingDirectoryStatus,
};

#[derive(Debug, Error)]
pub enum GitServiceError {
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Delimited(#[from] DelimitedParseError),
    #[error(transparent)]
    Status(#[from] StatusParseError),
    #[error(transparent)]
    Numstat(#[from] NumstatParseError),
    #[error(transparent)]
    DiffParse(#[from] utils::diff::DiffParseError),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Unexpected git output: {0}")]
    InvalidOutput(String),
}

impl GitServiceError {
    /// Classified git failure, if this error came from one.
    pub fn git_error_kind(&self) -> Option<GitErrorKind> {
        match self {
            GitServiceError::Git(err) => err.kind(),
            _ => None,
        }
    }
}

/// Read-only queries against repositories, answered by parsing the output
/// of the `git` executable.
#[derive(Clone)]
pub struct GitService {
    runner: Arc<dyn GitRunner>,
    max_status_buffer_bytes: usize,
}

impl GitService {
    pub fn new(runner: Arc<dyn GitRunner>) -> Self {
        Self {
            runner,
            max_status_buffer_bytes: DEFAULT_MAX_STATUS_BUFFER_BYTES,
        }
    }

    pub fn with_max_status_buffer_bytes(mut self, bytes: usize) -> Self {
        self.max_status_buffer_bytes = bytes;
        self
    }

    pub fn max_status_buffer_bytes(&self) -> usize {
        self.max_status_buffer_bytes
    }

    pub fn runner(&self) -> &Arc<dyn GitRunner> {
        &self.runner
    }

    pub(crate) async fn git(
        &self,
        repo: &Path,
        args: &[&str],
        options: RunOptions,
    ) -> Result<GitResult, GitServiceError> {
        Ok(self.runner.run(repo, args, options).await?)
    }

    /// The repository's git directory. Worktrees and submodules keep it
    /// outside `repo`, so git is asked when `repo/.git` is not a directory.
    pub async fn git_dir(&self, repo: &Path) -> Result<PathBuf, GitServiceError> {
        let dot_git = repo.join(".git");
        if tokio::fs::metadata(&dot_git)
            .await
            .is_ok_and(|meta| meta.is_dir())
        {
            return Ok(dot_git);
        }

        let result = self
            .git(
                repo,
                &["rev-parse", "--absolute-git-dir"],
                RunOptions::default(),
            )
            .await?;
        let path = result.stdout.trim();
        if path.is_empty() {
            return Err(GitServiceError::InvalidOutput(
                "rev-parse returned no git directory".to_string(),
            ));
        }
        Ok(PathBuf::from(path))
    }
}

impl std::fmt::Debug for GitService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitService")
            .field("max_status_buffer_bytes", &self.max_status_buffer_bytes)
            .finish_non_exhaustive()
    }
}
