use std::{path::Path, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{
    GitService, GitServiceError,
    cli::RunOptions,
    delimiter::{DelimitedFormat, DelimitedRecord},
    log::parse_raw_log_with_numstat,
    status::CommittedFileChange,
};

/// Prefix of stash messages written by this application.
pub const STASH_ENTRY_MARKER: &str = "!!gitfox";

static STASH_ENTRY_MESSAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!!gitfox<(.+)>$").expect("stash message regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct StashEntry {
    /// Reflog selector, e.g. `stash@{0}`.
    pub name: String,
    pub stash_sha: String,
    /// Branch the changes were stashed from.
    pub branch_name: String,
    pub tree: String,
    pub parents: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct StashResult {
    /// Entries created by this application, newest first.
    pub entries: Vec<StashEntry>,
    /// All stash entries, including ones created elsewhere.
    pub stash_entry_count: usize,
}

pub fn create_stash_message(branch_name: &str) -> String {
    format!("{STASH_ENTRY_MARKER}<{branch_name}>")
}

pub fn extract_branch_from_message(message: &str) -> Option<&str> {
    STASH_ENTRY_MESSAGE_RE
        .captures(message)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn stash_format() -> DelimitedFormat {
    DelimitedFormat::log(&[
        ("name", "%gD"),
        ("stash_sha", "%H"),
        ("message", "%gs"),
        ("tree", "%T"),
        ("parents", "%P"),
    ])
}

fn stash_entry(mut record: DelimitedRecord) -> Option<StashEntry> {
    let branch_name = extract_branch_from_message(record.get("message"))?.to_string();
    Some(StashEntry {
        name: record.take("name"),
        stash_sha: record.take("stash_sha"),
        branch_name,
        tree: record.take("tree"),
        parents: record
            .get("parents")
            .split_whitespace()
            .map(str::to_string)
            .collect(),
    })
}

impl GitService {
    /// Stash entries in reflog order. A repository without a stash (or no
    /// repository at all) has none.
    pub async fn get_stashes(&self, repo: &Path) -> Result<StashResult, GitServiceError> {
        let format = stash_format();
        let format_arg = format.format_arg();
        let result = self
            .git(
                repo,
                &["log", "-g", &format_arg, "refs/stash"],
                RunOptions::default().allow_exit_code(128),
            )
            .await?;
        if result.exit_code == 128 {
            return Ok(StashResult::default());
        }

        let records = format.parse(&result.stdout)?;
        let stash_entry_count = records.len();
        Ok(StashResult {
            entries: records.into_iter().filter_map(stash_entry).collect(),
            stash_entry_count,
        })
    }

    /// Most recent entry stashed from `branch_name`.
    pub async fn get_last_stash_entry_for_branch(
        &self,
        repo: &Path,
        branch_name: &str,
    ) -> Result<Option<StashEntry>, GitServiceError> {
        Ok(self
            .get_stashes(repo)
            .await?
            .entries
            .into_iter()
            .find(|entry| entry.branch_name == branch_name))
    }

    pub async fn get_stashed_files(
        &self,
        repo: &Path,
        stash_sha: &str,
    ) -> Result<Vec<CommittedFileChange>, GitServiceError> {
        let args = [
            "stash",
            "show",
            stash_sha,
            "--raw",
            "--numstat",
            "-z",
            "--format=format:",
            "--no-show-signature",
            "--",
        ];
        let result = self.git(repo, &args, RunOptions::default()).await?;
        Ok(parse_raw_log_with_numstat(&result.stdout, stash_sha, &format!("{stash_sha}^"))?.files)
    }
}
