//! Keeps the latest view of one repository: status, branches, stashes and
//! the diff of the selected file. Each refresh replaces the snapshot as a
//! whole.
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use git::{
    Branch, Diff, FileChange, FileContents, GitService, GitServiceError, StashResult,
    StatusResult, WorkingDirectoryStatus, diff::TextDiff,
};
use serde::Serialize;
use thiserror::Error;
use ts_rs::TS;
use utils::diff::{
    DiffRow, DiffRowError, DiffSelectionType, RawDiff, diff_rows,
    expansion::{ExpansionDirection, expand_hunk, expand_whole, with_bottom_dummy_hunk},
};

use super::{
    config::Settings,
    store::{PersistenceError, StateStore},
};

pub const DEFAULT_REMOTE: &str = "origin";
const RECENT_BRANCHES_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Git(#[from] GitServiceError),
    #[error(transparent)]
    Rows(#[from] DiffRowError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("No changed file at {0}")]
    FileNotFound(String),
    #[error("No text diff is selected")]
    NoTextDiff,
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
pub struct SelectedDiff {
    pub file: FileChange,
    pub diff: Diff,
    /// File versions used for hunk expansion; only loaded for text diffs
    /// when expansion is enabled.
    #[serde(skip)]
    pub contents: Option<FileContents>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, TS)]
pub struct RepositorySnapshot {
    /// `None` until the first refresh, or when the path is not a repository.
    pub status: Option<StatusResult>,
    pub branches: Vec<Branch>,
    pub recent_branches: Vec<String>,
    pub default_branch: Option<Branch>,
    pub stashes: StashResult,
    pub selected_diff: Option<SelectedDiff>,
}

impl RepositorySnapshot {
    pub fn working_directory(&self) -> Option<&WorkingDirectoryStatus> {
        self.status.as_ref().map(|status| &status.working_directory)
    }
}

/// Carry file selections over from the previous status so a refresh does not
/// reset what the user picked for the next commit.
pub fn merge_selections(
    previous: Option<&WorkingDirectoryStatus>,
    next: WorkingDirectoryStatus,
) -> WorkingDirectoryStatus {
    let Some(previous) = previous else {
        return next;
    };
    let files = next.files().iter().map(|file| {
        match previous.find_file_by_path(&file.path) {
            Some(existing) => match existing.selection.selection_type() {
                DiffSelectionType::All => file.with_include_all(true),
                DiffSelectionType::None => file.with_include_all(false),
                DiffSelectionType::Partial => file.with_selection(existing.selection.clone()),
            },
            None => file.clone(),
        }
    });
    WorkingDirectoryStatus::from_files(files.collect::<Vec<_>>())
}

fn with_status(
    snapshot: &RepositorySnapshot,
    status: Option<StatusResult>,
) -> RepositorySnapshot {
    let status = status.map(|mut status| {
        status.working_directory =
            merge_selections(snapshot.working_directory(), status.working_directory);
        status
    });
    RepositorySnapshot {
        status,
        ..snapshot.clone()
    }
}

fn text_diff(selected: Option<&SelectedDiff>) -> Result<(&TextDiff, &FileContents)> {
    match selected {
        Some(SelectedDiff {
            diff: Diff::Text(text),
            contents: Some(contents),
            ..
        }) => Ok((text, contents)),
        _ => Err(RepositoryError::NoTextDiff),
    }
}

pub struct RepositoryService {
    git: GitService,
    path: PathBuf,
    settings: Arc<StateStore<Settings>>,
    state: StateStore<RepositorySnapshot>,
}

impl RepositoryService {
    pub fn new(
        git: GitService,
        path: impl Into<PathBuf>,
        settings: Arc<StateStore<Settings>>,
    ) -> Self {
        Self {
            git,
            path: path.into(),
            settings,
            state: StateStore::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn git(&self) -> &GitService {
        &self.git
    }

    pub fn snapshot(&self) -> Arc<RepositorySnapshot> {
        self.state.snapshot()
    }

    /// Re-read the working directory status only.
    pub async fn refresh_status(&self) -> Result<Arc<RepositorySnapshot>> {
        let status = self.git.get_status(&self.path).await?;
        Ok(self
            .state
            .update(|snapshot| with_status(snapshot, status))
            .await?)
    }

    /// Re-read status, branches and stashes.
    pub async fn refresh(&self) -> Result<Arc<RepositorySnapshot>> {
        let Some(status) = self.git.get_status(&self.path).await? else {
            tracing::debug!(path = ?self.path, "Not a repository, clearing snapshot");
            return Ok(self.state.replace(RepositorySnapshot::default()).await?);
        };

        let (branches, recent_branches, stashes) = tokio::try_join!(
            self.git.get_branches(&self.path, &[]),
            self.git.get_recent_branches(&self.path, RECENT_BRANCHES_LIMIT),
            self.git.get_stashes(&self.path),
        )?;

        let fallback_name = self.settings.snapshot().default_branch.clone();
        let default_branch = self
            .git
            .find_default_branch(&self.path, &branches, Some(DEFAULT_REMOTE), &fallback_name)
            .await?;

        tracing::debug!(
            path = ?self.path,
            files = status.working_directory.len(),
            branches = branches.len(),
            "Repository refreshed"
        );

        Ok(self
            .state
            .update(|snapshot| RepositorySnapshot {
                branches,
                recent_branches,
                default_branch,
                stashes,
                ..with_status(snapshot, Some(status))
            })
            .await?)
    }

    /// Include or exclude a whole file from the next commit.
    pub async fn set_file_included(
        &self,
        path: &str,
        include: bool,
    ) -> Result<Arc<RepositorySnapshot>> {
        if self
            .snapshot()
            .working_directory()
            .and_then(|wd| wd.find_file_by_path(path))
            .is_none()
        {
            return Err(RepositoryError::FileNotFound(path.to_string()));
        }

        Ok(self
            .state
            .update(|snapshot| {
                let mut next = snapshot.clone();
                if let Some(status) = next.status.as_mut()
                    && let Some(file) = status.working_directory.find_file_by_path(path)
                {
                    let file = file.with_include_all(include);
                    status.working_directory = status.working_directory.with_file(file);
                }
                next
            })
            .await?)
    }

    pub async fn set_all_included(&self, include: bool) -> Result<Arc<RepositorySnapshot>> {
        Ok(self
            .state
            .update(|snapshot| {
                let mut next = snapshot.clone();
                if let Some(status) = next.status.as_mut() {
                    status.working_directory =
                        status.working_directory.with_include_all_files(include);
                }
                next
            })
            .await?)
    }

    /// Load the diff of a working directory file and make it the selection.
    pub async fn select_working_file(&self, path: &str) -> Result<Arc<RepositorySnapshot>> {
        let file = self
            .snapshot()
            .working_directory()
            .and_then(|wd| wd.find_file_by_path(path))
            .cloned()
            .ok_or_else(|| RepositoryError::FileNotFound(path.to_string()))?;

        let settings = self.settings.snapshot();
        let diff = self
            .git
            .get_working_directory_diff(&self.path, &file, settings.hide_whitespace_in_diff)
            .await?;
        let selected = self.prepare_selection(FileChange::Working(file), diff).await?;

        Ok(self
            .state
            .update(|snapshot| {
                let mut next = snapshot.clone();
                // Line selections are only meaningful once the diff is known.
                if let (Some(status), Diff::Text(text), FileChange::Working(file)) =
                    (next.status.as_mut(), &selected.diff, &selected.file)
                    && let Some(current) = status.working_directory.find_file_by_path(&file.path)
                {
                    let selection = current
                        .selection
                        .for_diff_lines(text.hunks.iter().flat_map(|hunk| hunk.lines.iter()));
                    let updated = current.with_selection(selection);
                    status.working_directory = status.working_directory.with_file(updated);
                }
                next.selected_diff = Some(selected);
                next
            })
            .await?)
    }

    /// Load the diff of `path` as changed by commit `sha`.
    pub async fn select_commit_file(
        &self,
        sha: &str,
        path: &str,
    ) -> Result<Arc<RepositorySnapshot>> {
        let changes = self.git.get_changed_files(&self.path, sha).await?;
        let file = changes
            .files
            .into_iter()
            .find(|file| file.path == path)
            .ok_or_else(|| RepositoryError::FileNotFound(path.to_string()))?;

        let settings = self.settings.snapshot();
        let diff = self
            .git
            .get_commit_diff(&self.path, &file, sha, settings.hide_whitespace_in_diff)
            .await?;
        let selected = self.prepare_selection(FileChange::Committed(file), diff).await?;

        Ok(self
            .state
            .update(|snapshot| RepositorySnapshot {
                selected_diff: Some(selected),
                ..snapshot.clone()
            })
            .await?)
    }

    async fn prepare_selection(&self, file: FileChange, diff: Diff) -> Result<SelectedDiff> {
        let Diff::Text(text) = diff else {
            return Ok(SelectedDiff {
                file,
                diff,
                contents: None,
            });
        };
        if !self.settings.snapshot().enable_diff_expansion {
            return Ok(SelectedDiff {
                file,
                diff: Diff::Text(text),
                contents: None,
            });
        }

        let contents = self.git.get_file_contents(&self.path, &file).await?;
        let raw = with_bottom_dummy_hunk(&RawDiff::from(text), contents.new_contents.len());
        Ok(SelectedDiff {
            file,
            diff: Diff::Text(raw.into()),
            contents: Some(contents),
        })
    }

    /// Rows for the selected diff, laid out per the current settings. Diffs
    /// without text have no rows.
    pub fn diff_rows(&self) -> Result<Vec<DiffRow>> {
        let snapshot = self.snapshot();
        let Some(SelectedDiff {
            diff: Diff::Text(text),
            ..
        }) = snapshot.selected_diff.as_ref()
        else {
            return Ok(Vec::new());
        };
        Ok(diff_rows(
            &text.hunks,
            self.settings.snapshot().diff_row_options(),
        )?)
    }

    /// Reveal more lines around hunk `hunk_index`. Returns `false` when
    /// there is nothing left to reveal there.
    pub async fn expand_hunk(
        &self,
        hunk_index: usize,
        direction: ExpansionDirection,
    ) -> Result<bool> {
        let snapshot = self.snapshot();
        let (text, contents) = text_diff(snapshot.selected_diff.as_ref())?;
        let raw = RawDiff::from(text.clone());
        match expand_hunk(&raw, hunk_index, direction, &contents.new_contents) {
            Some(expanded) => {
                self.replace_selected_text(expanded).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Expand every gap so the selected diff covers the whole file.
    pub async fn expand_whole_file(&self) -> Result<bool> {
        let snapshot = self.snapshot();
        let (text, contents) = text_diff(snapshot.selected_diff.as_ref())?;
        match expand_whole(&RawDiff::from(text.clone()), &contents.new_contents) {
            Some(expanded) => {
                self.replace_selected_text(expanded).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn replace_selected_text(&self, raw: RawDiff) -> Result<()> {
        self.state
            .update(|snapshot| {
                let mut next = snapshot.clone();
                if let Some(selected) = next.selected_diff.as_mut() {
                    selected.diff = Diff::Text(raw.into());
                }
                next
            })
            .await?;
        Ok(())
    }
}
