//! Working directory status.
//!
//! `git status` output is parsed by [`porcelain`], mapped to [`model`] types
//! and enriched with conflict details when a merge, rebase or conflicting
//! stash is in progress.
mod model;
pub mod porcelain;

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::LazyLock,
};

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use ts_rs::TS;
use utils::diff::DiffSelection;

pub use model::{
    AppFileStatus, CommittedFileChange, FileChange, FileEntry, GitStatusEntry, OrdinaryChange,
    SubmoduleStatus, UnmergedEntry, UnmergedEntrySummary, WorkingDirectoryFileChange,
    WorkingDirectoryStatus,
};
pub use porcelain::{
    StatusEntry, StatusEntryKind, StatusHeader, StatusItem, StatusParseError, map_status,
    map_submodule_status, parse_porcelain_status,
};

use crate::{
    GitService, GitServiceError,
    branch::AheadBehind,
    cli::RunOptions,
    repo_state::{ConflictState, RebaseInternalState, RepositoryState, read_repository_state},
};
use porcelain::{CONFLICT_STATUS_CODES, STATUS_ARGS};

/// Status output above this size is not parsed.
pub const DEFAULT_MAX_STATUS_BUFFER_BYTES: usize = 20_000_000;

static BRANCH_OID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^branch\.oid ([a-f0-9]+)$").expect("branch.oid regex"));
static BRANCH_HEAD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^branch\.head (.*)").expect("branch.head regex"));
static BRANCH_UPSTREAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^branch\.upstream (.*)").expect("branch.upstream regex"));
static BRANCH_AB_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^branch\.ab \+(\d+) -(\d+)$").expect("branch.ab regex"));

static CONFLICT_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"(.+):\d+: leftover conflict marker")
        .case_insensitive(true)
        .build()
        .expect("conflict marker regex")
});

// Renames list the old and new path as separate NUL-terminated fields.
static BINARY_NUMSTAT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-\t-\t(?:\x00[^\x00]+\x00)?([^\x00]*)").expect("binary regex"));

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, TS)]
pub struct StatusHeadersData {
    pub current_branch: Option<String>,
    pub current_upstream_branch: Option<String>,
    pub current_tip: Option<String>,
    pub branch_ahead_behind: Option<AheadBehind>,
}

/// Fold `# branch.*` headers. Each header is matched against the oid, head,
/// upstream and ahead/behind patterns in that order; the first match wins.
pub fn parse_status_headers<'a>(
    headers: impl IntoIterator<Item = &'a StatusHeader>,
) -> StatusHeadersData {
    headers
        .into_iter()
        .fold(StatusHeadersData::default(), |mut data, header| {
            let value = header.value.as_str();
            // `branch.oid (initial)` deliberately does not match.
            if let Some(caps) = BRANCH_OID_RE.captures(value) {
                data.current_tip = Some(caps[1].to_string());
            } else if let Some(caps) = BRANCH_HEAD_RE.captures(value) {
                if &caps[1] != "(detached)" {
                    data.current_branch = Some(caps[1].to_string());
                }
            } else if let Some(caps) = BRANCH_UPSTREAM_RE.captures(value) {
                data.current_upstream_branch = Some(caps[1].to_string());
            } else if let Some(caps) = BRANCH_AB_RE.captures(value)
                && let (Ok(ahead), Ok(behind)) = (caps[1].parse(), caps[2].parse())
            {
                data.branch_ahead_behind = Some(AheadBehind { ahead, behind });
            }
            data
        })
}

/// Which ref conflicted files are compared against to find binary files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictContext {
    Merge,
    Rebase,
    /// Unmerged entries without a merge or rebase, e.g. after a stash pop.
    WorkingDirectory,
}

impl ConflictContext {
    pub fn detect(repo_state: &RepositoryState, conflicted_files_in_index: bool) -> Option<Self> {
        if repo_state.merge_head_found {
            Some(ConflictContext::Merge)
        } else if repo_state.rebase_internal_state.is_some() {
            Some(ConflictContext::Rebase)
        } else if conflicted_files_in_index {
            Some(ConflictContext::WorkingDirectory)
        } else {
            None
        }
    }

    pub fn binary_ref(self) -> &'static str {
        match self {
            ConflictContext::Merge => "MERGE_HEAD",
            ConflictContext::Rebase => "REBASE_HEAD",
            ConflictContext::WorkingDirectory => "HEAD",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictFilesDetails {
    pub conflict_counts_by_path: HashMap<String, usize>,
    pub binary_file_paths: HashSet<String>,
}

pub fn parse_conflict_markers(output: &str) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for caps in CONFLICT_MARKER_RE.captures_iter(output) {
        *counts.entry(caps[1].to_string()).or_insert(0) += 1;
    }
    counts
}

pub fn parse_binary_paths(numstat_output: &str) -> HashSet<String> {
    BINARY_NUMSTAT_RE
        .captures_iter(numstat_output)
        .map(|caps| caps[1].to_string())
        .collect()
}

fn conflicted_status(
    entry: UnmergedEntry,
    path: &str,
    details: &ConflictFilesDetails,
) -> AppFileStatus {
    let counts_markers = matches!(
        entry.action,
        UnmergedEntrySummary::BothAdded | UnmergedEntrySummary::BothModified
    );
    let is_binary = details.binary_file_paths.contains(path);
    let conflict_marker_count = (counts_markers && !is_binary).then(|| {
        details
            .conflict_counts_by_path
            .get(path)
            .copied()
            .unwrap_or(0)
    });
    AppFileStatus::Conflicted {
        entry,
        conflict_marker_count,
    }
}

fn convert_to_app_status(
    entry: &StatusEntry,
    file_entry: FileEntry,
    details: &ConflictFilesDetails,
) -> Result<AppFileStatus, StatusParseError> {
    let missing_old_path = || StatusParseError::MissingOriginalPath {
        path: entry.path.clone(),
    };
    Ok(match file_entry {
        FileEntry::Ordinary {
            kind,
            submodule_status,
            ..
        } => match kind {
            OrdinaryChange::Added => AppFileStatus::New { submodule_status },
            OrdinaryChange::Modified => AppFileStatus::Modified { submodule_status },
            OrdinaryChange::Deleted => AppFileStatus::Deleted { submodule_status },
        },
        FileEntry::Renamed {
            submodule_status, ..
        } => AppFileStatus::Renamed {
            old_path: entry.old_path.clone().ok_or_else(missing_old_path)?,
            submodule_status,
        },
        FileEntry::Copied {
            submodule_status, ..
        } => AppFileStatus::Copied {
            old_path: entry.old_path.clone().ok_or_else(missing_old_path)?,
            submodule_status,
        },
        FileEntry::Untracked { submodule_status } => AppFileStatus::Untracked { submodule_status },
        FileEntry::Conflicted(unmerged) => conflicted_status(unmerged, &entry.path, details),
    })
}

/// Build the working directory file list from parsed entries, in git's order.
///
/// Files added to the index and deleted from the working tree are left out.
/// An untracked entry replaces any earlier entry for the same path.
pub fn build_working_directory(
    entries: &[&StatusEntry],
    details: &ConflictFilesDetails,
) -> Result<WorkingDirectoryStatus, StatusParseError> {
    // Slots emptied by a later untracked entry for the same path are skipped
    // at the end, so each entry costs one lookup.
    let mut slots: Vec<Option<WorkingDirectoryFileChange>> = Vec::with_capacity(entries.len());
    let mut index_by_path: HashMap<String, usize> = HashMap::with_capacity(entries.len());

    for entry in entries {
        let file_entry = map_status(&entry.status_code, &entry.submodule_status_code);

        if let FileEntry::Ordinary {
            index: Some(GitStatusEntry::Added),
            working_tree: Some(GitStatusEntry::Deleted),
            ..
        } = file_entry
        {
            continue;
        }

        let is_untracked = matches!(file_entry, FileEntry::Untracked { .. });

        let status = convert_to_app_status(entry, file_entry, details)?;
        let include = !matches!(
            status,
            AppFileStatus::Modified {
                submodule_status: Some(SubmoduleStatus {
                    commit_changed: false,
                    ..
                })
            }
        );
        let change = WorkingDirectoryFileChange::new(
            entry.path.clone(),
            status,
            DiffSelection::from_initial(include),
        );

        match index_by_path.get(&change.path).copied() {
            Some(idx) if !is_untracked => slots[idx] = Some(change),
            existing => {
                if let Some(idx) = existing {
                    slots[idx] = None;
                }
                index_by_path.insert(change.path.clone(), slots.len());
                slots.push(Some(change));
            }
        }
    }

    Ok(WorkingDirectoryStatus::from_files(slots.into_iter().flatten()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
pub struct StatusResult {
    pub current_branch: Option<String>,
    pub current_upstream_branch: Option<String>,
    pub current_tip: Option<String>,
    pub branch_ahead_behind: Option<AheadBehind>,
    pub exists: bool,
    pub merge_head_found: bool,
    pub squash_msg_found: bool,
    pub rebase_internal_state: Option<RebaseInternalState>,
    pub is_cherry_picking_head_found: bool,
    pub conflict_state: Option<ConflictState>,
    pub working_directory: WorkingDirectoryStatus,
    pub do_conflicted_files_exist: bool,
}

impl GitService {
    /// Files with leftover conflict markers and how many each has.
    pub async fn get_files_with_conflict_markers(
        &self,
        repo: &Path,
    ) -> Result<HashMap<String, usize>, GitServiceError> {
        let result = self
            .git(
                repo,
                &["diff", "--check"],
                RunOptions::default().with_success_exit_codes([0, 2]),
            )
            .await?;
        Ok(parse_conflict_markers(&result.stdout))
    }

    /// Paths git considers binary when comparing the working tree with
    /// `reference`.
    pub async fn get_binary_paths(
        &self,
        repo: &Path,
        reference: &str,
    ) -> Result<HashSet<String>, GitServiceError> {
        let result = self
            .git(
                repo,
                &["diff", "--numstat", "-z", reference],
                RunOptions::default(),
            )
            .await?;
        Ok(parse_binary_paths(&result.stdout))
    }

    /// Conflict details for `context`. Failures only cost detail, never the
    /// status itself.
    pub async fn get_conflict_details(
        &self,
        repo: &Path,
        context: ConflictContext,
    ) -> ConflictFilesDetails {
        let details = async {
            let conflict_counts_by_path = self.get_files_with_conflict_markers(repo).await?;
            let binary_file_paths = match self.get_binary_paths(repo, context.binary_ref()).await {
                Ok(paths) => paths,
                // HEAD may not exist yet.
                Err(err) if context == ConflictContext::WorkingDirectory => {
                    tracing::debug!(repo = ?repo, "No binary paths against HEAD: {err}");
                    HashSet::new()
                }
                Err(err) => return Err(err),
            };
            Ok::<_, GitServiceError>(ConflictFilesDetails {
                conflict_counts_by_path,
                binary_file_paths,
            })
        };

        details.await.unwrap_or_else(|err| {
            tracing::error!(
                repo = ?repo,
                ?context,
                "Unexpected error from git operations in get_conflict_details: {err}"
            );
            ConflictFilesDetails::default()
        })
    }

    /// Current status, or `None` when `repo` has no `.git` directory or the
    /// output is too large to handle.
    pub async fn get_status(&self, repo: &Path) -> Result<Option<StatusResult>, GitServiceError> {
        let result = self
            .git(repo, &STATUS_ARGS, RunOptions::default().allow_exit_code(128))
            .await?;

        if result.exit_code == 128 {
            tracing::debug!(
                repo = ?repo,
                "'git status' returned 128 and is likely missing its .git directory"
            );
            return Ok(None);
        }

        if result.stdout.len() > self.max_status_buffer_bytes() {
            tracing::warn!(
                repo = ?repo,
                bytes = result.stdout.len(),
                limit = self.max_status_buffer_bytes(),
                "'git status' output is beyond the supported threshold"
            );
            return Ok(None);
        }

        let items = parse_porcelain_status(&result.stdout)?;
        let mut headers = Vec::new();
        let mut entries = Vec::new();
        for item in &items {
            match item {
                StatusItem::Header(header) => headers.push(header),
                StatusItem::Entry(entry) => entries.push(entry),
            }
        }

        let git_dir = self.git_dir(repo).await?;
        let repo_state = read_repository_state(&git_dir).await;

        let conflicted_files_in_index = entries
            .iter()
            .any(|e| CONFLICT_STATUS_CODES.contains(&e.status_code.as_str()));

        let details = match ConflictContext::detect(&repo_state, conflicted_files_in_index) {
            Some(context) => self.get_conflict_details(repo, context).await,
            None => ConflictFilesDetails::default(),
        };

        let working_directory = build_working_directory(&entries, &details)?;
        let headers = parse_status_headers(headers);
        let conflict_state = repo_state.conflict_state();

        Ok(Some(StatusResult {
            current_branch: headers.current_branch,
            current_upstream_branch: headers.current_upstream_branch,
            current_tip: headers.current_tip,
            branch_ahead_behind: headers.branch_ahead_behind,
            exists: true,
            merge_head_found: repo_state.merge_head_found,
            squash_msg_found: repo_state.squash_msg_found,
            rebase_internal_state: repo_state.rebase_internal_state,
            is_cherry_picking_head_found: repo_state.cherry_pick_head_found,
            conflict_state,
            working_directory,
            do_conflicted_files_exist: conflicted_files_in_index,
        }))
    }
}

#[cfg(test)]
mod tests {
    use utils::diff::DiffSelectionType;

    use super::*;

    fn header(value: &str) -> StatusHeader {
        StatusHeader {
            value: value.to_string(),
        }
    }

    fn entry(code: &str, path: &str) -> StatusEntry {
        StatusEntry {
            kind: StatusEntryKind::Ordinary,
            status_code: code.to_string(),
            submodule_status_code: "N...".to_string(),
            path: path.to_string(),
            old_path: None,
        }
    }

    #[test]
    fn headers_fold_into_branch_data() {
        let headers = [
            header("branch.oid 0123abcd"),
            header("branch.head main"),
            header("branch.upstream origin/main"),
            header("branch.ab +2 -5"),
        ];
        let data = parse_status_headers(&headers);
        assert_eq!(data.current_tip.as_deref(), Some("0123abcd"));
        assert_eq!(data.current_branch.as_deref(), Some("main"));
        assert_eq!(data.current_upstream_branch.as_deref(), Some("origin/main"));
        assert_eq!(
            data.branch_ahead_behind,
            Some(AheadBehind {
                ahead: 2,
                behind: 5
            })
        );
    }

    #[test]
    fn initial_oid_and_detached_head_are_ignored() {
        let headers = [header("branch.oid (initial)"), header("branch.head (detached)")];
        assert_eq!(parse_status_headers(&headers), StatusHeadersData::default());
    }

    #[test]
    fn header_order_does_not_matter() {
        let forward = [header("branch.head dev"), header("branch.ab +0 -1")];
        let backward = [header("branch.ab +0 -1"), header("branch.head dev")];
        assert_eq!(parse_status_headers(&forward), parse_status_headers(&backward));
    }

    #[test]
    fn conflict_marker_counts() {
        let output = "a.txt:1: leftover conflict marker\na.txt:5: leftover conflict marker\nb.txt:3: Leftover conflict marker\n";
        let counts = parse_conflict_markers(output);
        assert_eq!(counts.get("a.txt"), Some(&2));
        assert_eq!(counts.get("b.txt"), Some(&1));
    }

    #[test]
    fn binary_paths_handle_renames() {
        let output = "1\t1\ttext.txt\0-\t-\timage.png\0-\t-\t\0old.bin\0new.bin\0";
        assert_eq!(
            parse_binary_paths(output),
            HashSet::from(["image.png".to_string(), "new.bin".to_string()])
        );
    }

    #[test]
    fn added_then_deleted_files_are_skipped() {
        let ad = entry("AD", "gone.txt");
        let kept = entry(".M", "kept.txt");
        let status =
            build_working_directory(&[&ad, &kept], &ConflictFilesDetails::default()).unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status.files()[0].path, "kept.txt");
    }

    #[test]
    fn untracked_entry_replaces_staged_delete() {
        let deleted = entry("D.", "same.txt");
        let other = entry(".M", "other.txt");
        let mut untracked = entry("??", "same.txt");
        untracked.kind = StatusEntryKind::Untracked;

        let status = build_working_directory(
            &[&deleted, &other, &untracked],
            &ConflictFilesDetails::default(),
        )
        .unwrap();

        assert_eq!(status.len(), 2);
        assert_eq!(status.files()[1].path, "same.txt");
        assert!(matches!(
            status.files()[1].status,
            AppFileStatus::Untracked { .. }
        ));
    }

    #[test]
    fn large_untracked_sets_build_in_linear_time() {
        let count = 50_000;
        let output: String = (0..count)
            .map(|n| format!("? dir/file{n}.txt\0"))
            .collect();
        let items = parse_porcelain_status(&output).unwrap();
        let entries: Vec<&StatusEntry> = items
            .iter()
            .filter_map(|item| match item {
                StatusItem::Entry(entry) => Some(entry),
                StatusItem::Header(_) => None,
            })
            .collect();

        let started = std::time::Instant::now();
        let status = build_working_directory(&entries, &ConflictFilesDetails::default()).unwrap();
        let elapsed = started.elapsed();

        assert_eq!(status.len(), count);
        assert_eq!(status.files()[count - 1].path, format!("dir/file{}.txt", count - 1));
        assert!(status.find_file_by_path("dir/file123.txt").is_some());
        assert!(
            elapsed < std::time::Duration::from_secs(5),
            "building {count} untracked files took {elapsed:?}"
        );
    }

    #[test]
    fn repeated_untracked_path_keeps_the_latest_position() {
        let first = entry(".M", "a.txt");
        let mut untracked_a = entry("??", "a.txt");
        untracked_a.kind = StatusEntryKind::Untracked;
        let b = entry(".M", "b.txt");
        let mut untracked_a_again = entry("??", "a.txt");
        untracked_a_again.kind = StatusEntryKind::Untracked;

        let status = build_working_directory(
            &[&first, &untracked_a, &b, &untracked_a_again],
            &ConflictFilesDetails::default(),
        )
        .unwrap();

        let paths: Vec<&str> = status.files().iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["b.txt", "a.txt"]);
    }

    #[test]
    fn conflicted_text_files_get_marker_counts() {
        let both_modified = entry("UU", "text.txt");
        let binary = entry("AA", "image.png");
        let deleted_by_them = entry("UD", "removed.txt");
        let details = ConflictFilesDetails {
            conflict_counts_by_path: HashMap::from([("text.txt".to_string(), 3)]),
            binary_file_paths: HashSet::from(["image.png".to_string()]),
        };

        let status =
            build_working_directory(&[&both_modified, &binary, &deleted_by_them], &details)
                .unwrap();
        let marker_count = |path: &str| match &status.find_file_by_path(path).unwrap().status {
            AppFileStatus::Conflicted {
                conflict_marker_count,
                ..
            } => *conflict_marker_count,
            other => panic!("unexpected status {other:?}"),
        };

        assert_eq!(marker_count("text.txt"), Some(3));
        assert_eq!(marker_count("image.png"), None);
        assert_eq!(marker_count("removed.txt"), None);
    }

    #[test]
    fn modified_submodule_without_new_commit_starts_unselected() {
        let mut submodule = entry(".M", "vendor/lib");
        submodule.submodule_status_code = "S.M.".to_string();
        let mut moved = entry(".M", "vendor/other");
        moved.submodule_status_code = "SC..".to_string();

        let status =
            build_working_directory(&[&submodule, &moved], &ConflictFilesDetails::default())
                .unwrap();
        assert_eq!(
            status.files()[0].selection.selection_type(),
            DiffSelectionType::None
        );
        assert_eq!(
            status.files()[1].selection.selection_type(),
            DiffSelectionType::All
        );
    }

    #[test]
    fn conflict_context_priority() {
        let mut state = RepositoryState {
            merge_head_found: true,
            rebase_internal_state: Some(RebaseInternalState {
                target_branch: "f".into(),
                base_branch_tip: "a".into(),
                original_branch_tip: "b".into(),
            }),
            ..Default::default()
        };
        assert_eq!(
            ConflictContext::detect(&state, true),
            Some(ConflictContext::Merge)
        );

        state.merge_head_found = false;
        assert_eq!(
            ConflictContext::detect(&state, false),
            Some(ConflictContext::Rebase)
        );

        state.rebase_internal_state = None;
        assert_eq!(
            ConflictContext::detect(&state, true).map(ConflictContext::binary_ref),
            Some("HEAD")
        );
        assert_eq!(ConflictContext::detect(&state, false), None);
    }
}
