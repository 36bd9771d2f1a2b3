//! Commit history and per-commit file lists.
use std::{path::Path, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use crate::{
    GitService, GitServiceError,
    cli::RunOptions,
    delimiter::DelimitedFormat,
    status::{AppFileStatus, CommittedFileChange, SubmoduleStatus},
};

const SUBMODULE_FILE_MODE: &str = "160000";

static IDENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*?) <(.*?)> (\d+) (\+|-)?(\d{2})(\d{2})").expect("identity regex")
});

static NUMSTAT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+|-)\t(\d+|-)\t").expect("numstat regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NumstatParseError {
    #[error("malformed raw record: {0:?}")]
    MalformedRawRecord(String),
    #[error("raw record {0:?} is missing its path")]
    MissingPath(String),
    #[error("malformed numstat record: {0:?}")]
    MalformedNumstat(String),
    #[error("numstat record {index} has no matching raw record")]
    MissingRawRecord { index: usize },
}

/// Name, email and raw timestamp as git prints `%an <%ae> %ad` with
/// `--date=raw`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
    /// Seconds since the epoch.
    #[ts(type = "number")]
    pub timestamp: i64,
    /// Minutes east of UTC.
    pub tz_offset: i32,
}

impl CommitIdentity {
    pub fn parse(identity: &str) -> Option<Self> {
        let caps = IDENTITY_RE.captures(identity)?;
        let timestamp = caps[3].parse().ok()?;
        let sign = if caps.get(4).is_some_and(|m| m.as_str() == "-") {
            -1
        } else {
            1
        };
        let hours: i32 = caps[5].parse().ok()?;
        let minutes: i32 = caps[6].parse().ok()?;
        Some(Self {
            name: caps[1].to_string(),
            email: caps[2].to_string(),
            timestamp,
            tz_offset: sign * (hours * 60 + minutes),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct Trailer {
    pub token: String,
    pub value: String,
}

/// Parse the output of `%(trailers:unfold,only)`.
pub fn parse_raw_unfolded_trailers(trailers: &str, separators: &str) -> Vec<Trailer> {
    trailers
        .lines()
        .filter_map(|line| {
            let idx = line.find(|c| separators.contains(c))?;
            let token = line[..idx].trim();
            if token.is_empty() {
                return None;
            }
            Some(Trailer {
                token: token.to_string(),
                value: line[idx + 1..].trim().to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct Commit {
    pub sha: String,
    pub short_sha: String,
    pub summary: String,
    pub body: String,
    pub author: CommitIdentity,
    pub committer: CommitIdentity,
    pub parent_shas: Vec<String>,
    pub trailers: Vec<Trailer>,
    pub tags: Vec<String>,
}

impl Commit {
    pub fn is_merge_commit(&self) -> bool {
        self.parent_shas.len() > 1
    }
}

/// Tag names from a `%D` decoration. Split on `", "` only, since tag names
/// may themselves contain commas.
pub fn tags_from_refs(refs: &str) -> Vec<String> {
    refs.split(", ")
        .filter_map(|r| r.strip_prefix("tag: "))
        .map(str::to_string)
        .collect()
}

fn split_parents(parents: &str) -> Vec<String> {
    parents.split_whitespace().map(str::to_string).collect()
}

fn commit_format() -> DelimitedFormat {
    DelimitedFormat::log(&[
        ("sha", "%H"),
        ("short_sha", "%h"),
        ("summary", "%s"),
        ("body", "%b"),
        ("author", "%an <%ae> %ad"),
        ("committer", "%cn <%ce> %cd"),
        ("parents", "%P"),
        ("trailers", "%(trailers:unfold,only)"),
        ("refs", "%D"),
    ])
}

/// Files touched by one commit plus line totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct ChangesetData {
    pub files: Vec<CommittedFileChange>,
    pub lines_added: usize,
    pub lines_deleted: usize,
}

fn map_raw_status(
    raw_status: &str,
    old_path: Option<String>,
    src_mode: &str,
    dst_mode: &str,
) -> AppFileStatus {
    let status = raw_status.trim();
    let submodule = |is_submodule: bool, commit_changed: bool| {
        is_submodule.then_some(SubmoduleStatus {
            commit_changed,
            modified_changes: false,
            untracked_changes: false,
        })
    };

    match (status, old_path) {
        ("M", _) => AppFileStatus::Modified {
            submodule_status: submodule(
                src_mode == SUBMODULE_FILE_MODE && dst_mode == SUBMODULE_FILE_MODE,
                true,
            ),
        },
        ("A", _) => AppFileStatus::New {
            submodule_status: submodule(dst_mode == SUBMODULE_FILE_MODE, false),
        },
        ("D", _) => AppFileStatus::Deleted {
            submodule_status: submodule(src_mode == SUBMODULE_FILE_MODE, false),
        },
        (s, Some(old_path)) if s.starts_with('R') => AppFileStatus::Renamed {
            old_path,
            submodule_status: None,
        },
        (s, Some(old_path)) if s.starts_with('C') => AppFileStatus::Copied {
            old_path,
            submodule_status: None,
        },
        _ => AppFileStatus::Modified {
            submodule_status: None,
        },
    }
}

/// Parse `--raw --numstat -z` output.
///
/// Raw records (`:srcMode dstMode srcSha dstSha status`) come first, then one
/// numstat record per file in the same order. Rename and copy numstat
/// records spread their paths over two extra tokens.
pub fn parse_raw_log_with_numstat(
    stdout: &str,
    sha: &str,
    parent_commitish: &str,
) -> Result<ChangesetData, NumstatParseError> {
    let mut data = ChangesetData::default();
    let mut numstat_count = 0;
    let mut tokens = stdout.split('\0').peekable();

    while let Some(line) = tokens.next() {
        // The final token after the last NUL carries nothing.
        if tokens.peek().is_none() {
            break;
        }

        if let Some(raw) = line.strip_prefix(':') {
            let parts: Vec<&str> = raw.split(' ').collect();
            let (Some(src_mode), Some(dst_mode), Some(status)) =
                (parts.first(), parts.get(1), parts.last())
            else {
                return Err(NumstatParseError::MalformedRawRecord(line.to_string()));
            };
            if parts.len() < 5 {
                return Err(NumstatParseError::MalformedRawRecord(line.to_string()));
            }

            let mut next_path = || {
                tokens
                    .next()
                    .map(str::to_string)
                    .ok_or_else(|| NumstatParseError::MissingPath(line.to_string()))
            };
            let old_path = if status.starts_with('R') || status.starts_with('C') {
                Some(next_path()?)
            } else {
                None
            };
            let path = next_path()?;

            data.files.push(CommittedFileChange {
                path,
                status: map_raw_status(status, old_path, src_mode, dst_mode),
                commit_sha: sha.to_string(),
                parent_commitish: parent_commitish.to_string(),
            });
        } else {
            let caps = NUMSTAT_RE
                .captures(line)
                .ok_or_else(|| NumstatParseError::MalformedNumstat(line.to_string()))?;
            data.lines_added += caps[1].parse::<usize>().unwrap_or(0);
            data.lines_deleted += caps[2].parse::<usize>().unwrap_or(0);

            let file = data
                .files
                .get(numstat_count)
                .ok_or(NumstatParseError::MissingRawRecord {
                    index: numstat_count,
                })?;
            if file.status.old_path().is_some() {
                tokens.next();
                tokens.next();
            }
            numstat_count += 1;
        }
    }

    Ok(data)
}

impl GitService {
    /// Commits reachable from `revision_range` (HEAD when `None`). An unborn
    /// branch has no history.
    pub async fn get_commits(
        &self,
        repo: &Path,
        revision_range: Option<&str>,
        limit: Option<usize>,
        skip: Option<usize>,
        additional_args: &[&str],
    ) -> Result<Vec<Commit>, GitServiceError> {
        let format = commit_format();
        let format_arg = format.format_arg();
        let max_count = limit.map(|n| format!("--max-count={n}"));
        let skip = skip.map(|n| format!("--skip={n}"));

        let mut args = vec!["log"];
        args.extend(revision_range);
        args.push("--date=raw");
        args.extend(max_count.as_deref());
        args.extend(skip.as_deref());
        args.extend([format_arg.as_str(), "--no-show-signature", "--no-color"]);
        args.extend_from_slice(additional_args);
        args.push("--");

        let result = self
            .git(repo, &args, RunOptions::default().allow_exit_code(128))
            .await?;
        if result.exit_code == 128 {
            tracing::debug!(repo = ?repo, "git log exited with 128, treating history as empty");
            return Ok(Vec::new());
        }

        format
            .parse(&result.stdout)?
            .into_iter()
            .map(|record| {
                let identity = |field: &str| {
                    CommitIdentity::parse(record.get(field)).ok_or_else(|| {
                        GitServiceError::InvalidOutput(format!(
                            "unparseable {field} identity {:?}",
                            record.get(field)
                        ))
                    })
                };
                Ok(Commit {
                    sha: record.get("sha").to_string(),
                    short_sha: record.get("short_sha").to_string(),
                    summary: record.get("summary").to_string(),
                    body: record.get("body").to_string(),
                    author: identity("author")?,
                    committer: identity("committer")?,
                    parent_shas: split_parents(record.get("parents")),
                    trailers: parse_raw_unfolded_trailers(record.get("trailers"), ":"),
                    tags: tags_from_refs(record.get("refs")),
                })
            })
            .collect()
    }

    pub async fn get_commit(
        &self,
        repo: &Path,
        commitish: &str,
    ) -> Result<Option<Commit>, GitServiceError> {
        Ok(self
            .get_commits(repo, Some(commitish), Some(1), None, &[])
            .await?
            .into_iter()
            .next())
    }

    /// Files changed by `sha` relative to its first parent.
    pub async fn get_changed_files(
        &self,
        repo: &Path,
        sha: &str,
    ) -> Result<ChangesetData, GitServiceError> {
        let args = [
            "log",
            sha,
            "-C",
            "-M",
            "-m",
            "-1",
            "--first-parent",
            "--raw",
            "--format=format:",
            "--numstat",
            "-z",
            "--",
        ];
        let result = self.git(repo, &args, RunOptions::default()).await?;
        Ok(parse_raw_log_with_numstat(
            &result.stdout,
            sha,
            &format!("{sha}^"),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_identity_with_negative_offset() {
        let identity = CommitIdentity::parse("Jane Doe <jane@example.com> 1700000000 -0130").unwrap();
        assert_eq!(identity.name, "Jane Doe");
        assert_eq!(identity.email, "jane@example.com");
        assert_eq!(identity.timestamp, 1_700_000_000);
        assert_eq!(identity.tz_offset, -90);

        assert!(CommitIdentity::parse("no email here").is_none());
    }

    #[test]
    fn tags_keep_commas() {
        assert_eq!(
            tags_from_refs("HEAD -> main, tag: v1.0, tag: odd,name, origin/main"),
            vec!["v1.0", "odd,name"]
        );
        assert!(tags_from_refs("").is_empty());
    }

    #[test]
    fn trailers_split_on_first_separator() {
        let trailers = parse_raw_unfolded_trailers(
            "Co-authored-by: A <a@example.com>\nSigned-off-by: B: extra\n",
            ":",
        );
        assert_eq!(trailers.len(), 2);
        assert_eq!(trailers[0].token, "Co-authored-by");
        assert_eq!(trailers[1].value, "B: extra");
    }

    #[test]
    fn numstat_walks_renames_in_lockstep() {
        let stdout = [
            ":100644 100644 aaaa bbbb M",
            "src/main.rs",
            ":100644 100644 cccc dddd R087",
            "old.txt",
            "new.txt",
            ":000000 160000 0000 eeee A",
            "vendor/lib",
            "3\t1\tsrc/main.rs",
            "2\t2\t",
            "old.txt",
            "new.txt",
            "1\t0\tvendor/lib",
            "",
        ]
        .join("\0");

        let data = parse_raw_log_with_numstat(&stdout, "abc", "abc^").unwrap();

        assert_eq!(data.files.len(), 3);
        assert_eq!(data.lines_added, 6);
        assert_eq!(data.lines_deleted, 3);
        assert_eq!(
            data.files[1].status,
            AppFileStatus::Renamed {
                old_path: "old.txt".into(),
                submodule_status: None
            }
        );
        assert_eq!(data.files[1].path, "new.txt");
        assert_eq!(
            data.files[2].status.submodule_status(),
            Some(SubmoduleStatus::default())
        );
        assert_eq!(data.files[0].parent_commitish, "abc^");
    }

    #[test]
    fn binary_numstat_counts_as_zero() {
        let stdout = ":100644 100644 aaaa bbbb M\0image.png\0-\t-\timage.png\0";
        let data = parse_raw_log_with_numstat(stdout, "abc", "abc^").unwrap();
        assert_eq!(data.lines_added, 0);
        assert_eq!(data.files.len(), 1);
    }

    #[test]
    fn submodule_commit_change() {
        let stdout = ":160000 160000 aaaa bbbb M\0sub\0";
        let data = parse_raw_log_with_numstat(stdout, "abc", "abc^").unwrap();
        assert_eq!(
            data.files[0].status.submodule_status(),
            Some(SubmoduleStatus {
                commit_changed: true,
                ..Default::default()
            })
        );
    }

    #[test]
    fn numstat_without_raw_record_fails() {
        let err = parse_raw_log_with_numstat("1\t1\tfile\0", "abc", "abc^").unwrap_err();
        assert_eq!(err, NumstatParseError::MissingRawRecord { index: 0 });

        let err = parse_raw_log_with_numstat("garbage\0", "abc", "abc^").unwrap_err();
        assert!(matches!(err, NumstatParseError::MalformedNumstat(_)));
    }
}
