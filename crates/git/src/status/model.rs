use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utils::diff::{DiffSelection, DiffSelectionType};

/// One side of a porcelain `XY` status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum GitStatusEntry {
    Modified,
    Added,
    Deleted,
    Renamed,
    Copied,
    Unchanged,
    Untracked,
    Ignored,
    UpdatedButUnmerged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
pub struct SubmoduleStatus {
    /// The submodule points at a different commit than the superproject
    /// records.
    pub commit_changed: bool,
    pub modified_changes: bool,
    pub untracked_changes: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum OrdinaryChange {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum UnmergedEntrySummary {
    BothDeleted,
    AddedByUs,
    DeletedByThem,
    AddedByThem,
    DeletedByUs,
    BothAdded,
    BothModified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct UnmergedEntry {
    pub action: UnmergedEntrySummary,
    pub us: GitStatusEntry,
    pub them: GitStatusEntry,
    pub submodule_status: Option<SubmoduleStatus>,
}

/// Result of looking up a porcelain status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEntry {
    Ordinary {
        kind: OrdinaryChange,
        index: Option<GitStatusEntry>,
        working_tree: Option<GitStatusEntry>,
        submodule_status: Option<SubmoduleStatus>,
    },
    Renamed {
        index: Option<GitStatusEntry>,
        working_tree: Option<GitStatusEntry>,
        submodule_status: Option<SubmoduleStatus>,
    },
    Copied {
        index: Option<GitStatusEntry>,
        working_tree: Option<GitStatusEntry>,
        submodule_status: Option<SubmoduleStatus>,
    },
    Untracked {
        submodule_status: Option<SubmoduleStatus>,
    },
    Conflicted(UnmergedEntry),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppFileStatus {
    New {
        submodule_status: Option<SubmoduleStatus>,
    },
    Modified {
        submodule_status: Option<SubmoduleStatus>,
    },
    Deleted {
        submodule_status: Option<SubmoduleStatus>,
    },
    Copied {
        old_path: String,
        submodule_status: Option<SubmoduleStatus>,
    },
    Renamed {
        old_path: String,
        submodule_status: Option<SubmoduleStatus>,
    },
    Untracked {
        submodule_status: Option<SubmoduleStatus>,
    },
    Conflicted {
        entry: UnmergedEntry,
        /// Only known for text files both sides touched.
        conflict_marker_count: Option<usize>,
    },
}

impl AppFileStatus {
    pub fn submodule_status(&self) -> Option<SubmoduleStatus> {
        match self {
            AppFileStatus::New { submodule_status }
            | AppFileStatus::Modified { submodule_status }
            | AppFileStatus::Deleted { submodule_status }
            | AppFileStatus::Copied {
                submodule_status, ..
            }
            | AppFileStatus::Renamed {
                submodule_status, ..
            }
            | AppFileStatus::Untracked { submodule_status } => *submodule_status,
            AppFileStatus::Conflicted { entry, .. } => entry.submodule_status,
        }
    }

    pub fn old_path(&self) -> Option<&str> {
        match self {
            AppFileStatus::Copied { old_path, .. } | AppFileStatus::Renamed { old_path, .. } => {
                Some(old_path)
            }
            _ => None,
        }
    }

    /// The file has no previous version to compare against.
    pub fn is_new(&self) -> bool {
        matches!(
            self,
            AppFileStatus::New { .. } | AppFileStatus::Untracked { .. }
        )
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, AppFileStatus::Deleted { .. })
    }

    pub fn is_conflicted(&self) -> bool {
        matches!(self, AppFileStatus::Conflicted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct WorkingDirectoryFileChange {
    pub path: String,
    pub status: AppFileStatus,
    pub selection: DiffSelection,
}

impl WorkingDirectoryFileChange {
    pub fn new(path: impl Into<String>, status: AppFileStatus, selection: DiffSelection) -> Self {
        Self {
            path: path.into(),
            status,
            selection,
        }
    }

    pub fn with_include_all(&self, include: bool) -> Self {
        let selection = if include {
            self.selection.with_select_all()
        } else {
            self.selection.with_select_none()
        };
        self.with_selection(selection)
    }

    pub fn with_selection(&self, selection: DiffSelection) -> Self {
        Self {
            selection,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct CommittedFileChange {
    pub path: String,
    pub status: AppFileStatus,
    pub commit_sha: String,
    pub parent_commitish: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum FileChange {
    Working(WorkingDirectoryFileChange),
    Committed(CommittedFileChange),
}

impl FileChange {
    pub fn path(&self) -> &str {
        match self {
            FileChange::Working(change) => &change.path,
            FileChange::Committed(change) => &change.path,
        }
    }

    pub fn status(&self) -> &AppFileStatus {
        match self {
            FileChange::Working(change) => &change.status,
            FileChange::Committed(change) => &change.status,
        }
    }

    /// Path of the previous version for renames and copies, otherwise the
    /// current path.
    pub fn old_path_or_default(&self) -> &str {
        self.status().old_path().unwrap_or_else(|| self.path())
    }
}

impl From<WorkingDirectoryFileChange> for FileChange {
    fn from(change: WorkingDirectoryFileChange) -> Self {
        FileChange::Working(change)
    }
}

impl From<CommittedFileChange> for FileChange {
    fn from(change: CommittedFileChange) -> Self {
        FileChange::Committed(change)
    }
}

/// Changed files in the working directory, in git's order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, TS)]
pub struct WorkingDirectoryStatus {
    files: Vec<WorkingDirectoryFileChange>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl WorkingDirectoryStatus {
    /// Later entries for the same path replace earlier ones in place.
    pub fn from_files(files: impl IntoIterator<Item = WorkingDirectoryFileChange>) -> Self {
        let mut status = Self::default();
        for file in files {
            match status.index.get(&file.path) {
                Some(&idx) => status.files[idx] = file,
                None => {
                    status.index.insert(file.path.clone(), status.files.len());
                    status.files.push(file);
                }
            }
        }
        status
    }

    pub fn files(&self) -> &[WorkingDirectoryFileChange] {
        &self.files
    }

    pub fn find_file_by_path(&self, path: &str) -> Option<&WorkingDirectoryFileChange> {
        self.index.get(path).map(|&idx| &self.files[idx])
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Combined inclusion state of every file, `None` when there are no
    /// files.
    pub fn include_all(&self) -> Option<DiffSelectionType> {
        let mut types = self.files.iter().map(|f| f.selection.selection_type());
        let first = types.next()?;
        if types.all(|t| t == first) {
            Some(first)
        } else {
            Some(DiffSelectionType::Partial)
        }
    }

    pub fn with_include_all_files(&self, include: bool) -> Self {
        Self::from_files(self.files.iter().map(|f| f.with_include_all(include)))
    }

    /// Replace a single file, keeping its position.
    pub fn with_file(&self, file: WorkingDirectoryFileChange) -> Self {
        Self::from_files(self.files.iter().cloned().chain(std::iter::once(file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modified(path: &str) -> WorkingDirectoryFileChange {
        WorkingDirectoryFileChange::new(
            path,
            AppFileStatus::Modified {
                submodule_status: None,
            },
            DiffSelection::all(),
        )
    }

    #[test]
    fn lookup_by_path_keeps_order() {
        let status = WorkingDirectoryStatus::from_files([modified("b.txt"), modified("a.txt")]);

        assert_eq!(status.files()[0].path, "b.txt");
        assert!(status.find_file_by_path("a.txt").is_some());
        assert!(status.find_file_by_path("c.txt").is_none());
    }

    #[test]
    fn include_all_reports_mixed_selection() {
        let status = WorkingDirectoryStatus::from_files([modified("a"), modified("b")]);
        assert_eq!(status.include_all(), Some(DiffSelectionType::All));

        let status = status.with_file(modified("b").with_include_all(false));
        assert_eq!(status.include_all(), Some(DiffSelectionType::Partial));
        assert_eq!(status.files()[1].path, "b");

        assert_eq!(WorkingDirectoryStatus::default().include_all(), None);
    }

    #[test]
    fn file_change_old_path_defaults_to_path() {
        let renamed = FileChange::Committed(CommittedFileChange {
            path: "new.rs".into(),
            status: AppFileStatus::Renamed {
                old_path: "old.rs".into(),
                submodule_status: None,
            },
            commit_sha: "abc".into(),
            parent_commitish: "abc^".into(),
        });
        assert_eq!(renamed.old_path_or_default(), "old.rs");
        assert_eq!(FileChange::from(modified("x")).old_path_or_default(), "x");
    }

    #[test]
    fn app_status_serializes_with_kind_tag() {
        let json = serde_json::to_value(AppFileStatus::Renamed {
            old_path: "a".into(),
            submodule_status: None,
        })
        .unwrap();
        assert_eq!(json["kind"], "renamed");
        assert_eq!(json["old_path"], "a");
    }
}
