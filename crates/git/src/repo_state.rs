//! In-progress operation markers under the git directory.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Where an interrupted rebase came from and where it is going.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct RebaseInternalState {
    /// Branch whose commits are being replayed.
    pub target_branch: String,
    /// Commit the rebase replays onto.
    pub base_branch_tip: String,
    /// Tip of `target_branch` before the rebase started.
    pub original_branch_tip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct RepositoryState {
    pub merge_head_found: bool,
    pub squash_msg_found: bool,
    pub rebase_internal_state: Option<RebaseInternalState>,
    pub cherry_pick_head_found: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictState {
    Merge,
    Rebase { state: RebaseInternalState },
    Squash,
    CherryPick,
}

impl RepositoryState {
    /// The single operation considered in progress. When several markers
    /// exist at once the first of merge, rebase, squash, cherry-pick wins.
    pub fn conflict_state(&self) -> Option<ConflictState> {
        if self.merge_head_found {
            Some(ConflictState::Merge)
        } else if let Some(state) = &self.rebase_internal_state {
            Some(ConflictState::Rebase {
                state: state.clone(),
            })
        } else if self.squash_msg_found {
            Some(ConflictState::Squash)
        } else if self.cherry_pick_head_found {
            Some(ConflictState::CherryPick)
        } else {
            None
        }
    }
}

async fn marker_exists(git_dir: &Path, name: &str) -> bool {
    tokio::fs::try_exists(git_dir.join(name))
        .await
        .unwrap_or(false)
}

pub async fn is_merge_head_set(git_dir: &Path) -> bool {
    marker_exists(git_dir, "MERGE_HEAD").await
}

/// `SQUASH_MSG` is left behind by `merge --squash` until the next commit,
/// and is not cleared by aborting.
pub async fn is_squash_msg_set(git_dir: &Path) -> bool {
    marker_exists(git_dir, "SQUASH_MSG").await
}

pub async fn is_cherry_pick_head_found(git_dir: &Path) -> bool {
    marker_exists(git_dir, "CHERRY_PICK_HEAD").await
}

/// Details of a stopped rebase, or `None` when no rebase is in progress or
/// its state files are incomplete.
pub async fn get_rebase_internal_state(git_dir: &Path) -> Option<RebaseInternalState> {
    if !marker_exists(git_dir, "REBASE_HEAD").await {
        return None;
    }

    let rebase_merge: PathBuf = git_dir.join("rebase-merge");
    let read = |name: &'static str| {
        let path = rebase_merge.join(name);
        async move { tokio::fs::read_to_string(path).await.ok() }
    };
    let (orig_head, head_name, onto) = tokio::join!(read("orig-head"), read("head-name"), read("onto"));

    let head_name = head_name?;
    let target_branch = head_name
        .strip_prefix("refs/heads/")
        .unwrap_or(&head_name)
        .trim()
        .to_string();

    Some(RebaseInternalState {
        target_branch,
        base_branch_tip: onto?.trim().to_string(),
        original_branch_tip: orig_head?.trim().to_string(),
    })
}

pub async fn read_repository_state(git_dir: &Path) -> RepositoryState {
    let (merge_head_found, squash_msg_found, rebase_internal_state, cherry_pick_head_found) = tokio::join!(
        is_merge_head_set(git_dir),
        is_squash_msg_set(git_dir),
        get_rebase_internal_state(git_dir),
        is_cherry_pick_head_found(git_dir),
    );
    RepositoryState {
        merge_head_found,
        squash_msg_found,
        rebase_internal_state,
        cherry_pick_head_found,
    }
}
