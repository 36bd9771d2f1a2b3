//! Local and remote branches.
use std::{path::Path, sync::LazyLock};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{
    GitService, GitServiceError, cli::RunOptions, delimiter::DelimitedFormat,
    git_error::GitErrorKind, log::CommitIdentity,
};

/// Used when neither the remote nor git config names a default branch.
pub const DEFAULT_BRANCH_NAME: &str = "main";

const DEFAULT_BRANCH_SETTING_NAME: &str = "init.defaultBranch";

static BRANCH_VV_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([*+ ]) +([^ ]+) +([^ ]+) +\[(.*?)\]+ +(.+)").expect("branch -vv regex")
});

static AHEAD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ahead (\d+)").expect("ahead regex"));

static BEHIND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"behind (\d+)").expect("behind regex"));

static REFLOG_CHECKOUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(
        r".*? (renamed|checkout)(?:: moving from|\s*) (?:refs/heads/|\s*)(.*?) to (?:refs/heads/|\s*)(.*?)$",
    )
    .case_insensitive(true)
    .build()
    .expect("reflog checkout regex")
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct AheadBehind {
    pub ahead: u32,
    pub behind: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum BranchType {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct BranchTip {
    pub sha: String,
    pub author: Option<CommitIdentity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct Branch {
    /// Short name, e.g. `main` or `origin/main`.
    pub name: String,
    /// Remote-prefixed upstream, e.g. `origin/main`.
    pub upstream: Option<String>,
    pub tip: BranchTip,
    pub kind: BranchType,
    /// Canonical ref, e.g. `refs/heads/main`.
    pub ref_name: String,
    /// `None` when the upstream is gone.
    pub ahead_behind: Option<AheadBehind>,
}

fn remove_remote_prefix(name: &str) -> Option<&str> {
    name.split_once('/').map(|(_, rest)| rest)
}

impl Branch {
    pub fn upstream_remote_name(&self) -> Option<&str> {
        let (remote, _) = self.upstream.as_deref()?.split_once('/')?;
        Some(remote)
    }

    pub fn remote_name(&self) -> Option<&str> {
        if self.kind == BranchType::Local {
            return None;
        }
        let (remote, _) = self.ref_name.strip_prefix("refs/remotes/")?.split_once('/')?;
        Some(remote)
    }

    pub fn upstream_without_remote(&self) -> Option<&str> {
        remove_remote_prefix(self.upstream.as_deref()?)
    }

    pub fn name_without_remote(&self) -> &str {
        match self.kind {
            BranchType::Local => &self.name,
            BranchType::Remote => remove_remote_prefix(&self.name)
                .filter(|n| !n.is_empty())
                .unwrap_or(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TrackingState {
    name: String,
    ahead: u32,
    behind: u32,
    is_gone: bool,
}

fn parse_branch_vv(stdout: &str) -> Vec<TrackingState> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let caps = BRANCH_VV_RE.captures(line)?;
            let tracking = &caps[4];
            let count = |re: &Regex| {
                re.captures(tracking)
                    .and_then(|c| c[1].parse().ok())
                    .unwrap_or(0)
            };
            Some(TrackingState {
                name: caps[2].to_string(),
                ahead: count(&AHEAD_RE),
                behind: count(&BEHIND_RE),
                is_gone: tracking.contains("gone"),
            })
        })
        .collect()
}

fn branch_format() -> DelimitedFormat {
    DelimitedFormat::for_each_ref(&[
        ("full_name", "%(refname)"),
        ("short_name", "%(refname:short)"),
        ("upstream_short_name", "%(upstream:short)"),
        ("sha", "%(objectname)"),
        ("author", "%(author)"),
        ("sym_ref", "%(symref)"),
    ])
}

/// Names from reflog checkout/rename lines, most recent first. The
/// intermediate name of a rename is never reported.
pub fn parse_recent_branches(stdout: &str, limit: usize) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut excluded: Vec<String> = Vec::new();

    for line in stdout.lines() {
        if names.len() >= limit {
            break;
        }
        let Some(caps) = REFLOG_CHECKOUT_RE.captures(line) else {
            continue;
        };
        if caps[1].eq_ignore_ascii_case("renamed") {
            excluded.push(caps[2].to_string());
        }
        let branch = &caps[3];
        if !excluded.iter().any(|e| e == branch) && !names.iter().any(|n| n == branch) {
            names.push(branch.to_string());
        }
    }

    names
}

/// Pick the default branch among `branches`.
///
/// A local branch tracking `remote_ref` wins (preferring one also named
/// `default_name`), then a local branch named `default_name`, then the
/// remote branch `remote_ref` itself.
pub fn resolve_default_branch<'a>(
    branches: &'a [Branch],
    default_name: &str,
    remote_ref: Option<&str>,
) -> Option<&'a Branch> {
    let mut local_hit = None;
    let mut local_tracking_hit: Option<&Branch> = None;
    let mut remote_hit = None;

    for branch in branches {
        match branch.kind {
            BranchType::Local => {
                if branch.name == default_name {
                    local_hit = Some(branch);
                }
                if remote_ref.is_some()
                    && branch.upstream.as_deref() == remote_ref
                    && (local_tracking_hit.is_none() || branch.name == default_name)
                {
                    local_tracking_hit = Some(branch);
                }
            }
            BranchType::Remote => {
                if remote_ref == Some(branch.name.as_str()) {
                    remote_hit = Some(branch);
                }
            }
        }
    }

    local_tracking_hit.or(local_hit).or(remote_hit)
}

impl GitService {
    /// Branches under `prefixes` (all local and remote branches when empty).
    /// A directory that is not a repository has no branches.
    pub async fn get_branches(
        &self,
        repo: &Path,
        prefixes: &[&str],
    ) -> Result<Vec<Branch>, GitServiceError> {
        let format = branch_format();
        let format_arg = format.format_arg();
        let prefixes: &[&str] = if prefixes.is_empty() {
            &["refs/heads", "refs/remotes"]
        } else {
            prefixes
        };

        let mut args = vec!["for-each-ref", format_arg.as_str()];
        args.extend_from_slice(prefixes);

        let result = self
            .git(
                repo,
                &args,
                RunOptions::default().expect_error(GitErrorKind::NotAGitRepository),
            )
            .await?;
        if result.git_error == Some(GitErrorKind::NotAGitRepository) {
            return Ok(Vec::new());
        }

        let tracking = self
            .git(repo, &["branch", "-vv"], RunOptions::default())
            .await
            .map(|r| parse_branch_vv(&r.stdout))
            .unwrap_or_else(|err| {
                tracing::error!(repo = ?repo, "Failed to read branch tracking state: {err}");
                Vec::new()
            });

        let branches = format
            .parse(&result.stdout)?
            .into_iter()
            .filter(|record| record.get("sym_ref").is_empty())
            .map(|record| {
                let short_name = record.get("short_name").to_string();
                let full_name = record.get("full_name").to_string();
                let kind = if full_name.starts_with("refs/heads") {
                    BranchType::Local
                } else {
                    BranchType::Remote
                };
                let upstream = Some(record.get("upstream_short_name"))
                    .filter(|u| !u.is_empty())
                    .map(str::to_string);
                let state = tracking.iter().find(|s| s.name == short_name);
                let ahead_behind = match state {
                    Some(state) if state.is_gone => None,
                    Some(state) => Some(AheadBehind {
                        ahead: state.ahead,
                        behind: state.behind,
                    }),
                    None => Some(AheadBehind::default()),
                };

                Branch {
                    name: short_name,
                    upstream,
                    tip: BranchTip {
                        sha: record.get("sha").to_string(),
                        author: CommitIdentity::parse(record.get("author")),
                    },
                    kind,
                    ref_name: full_name,
                    ahead_behind,
                }
            })
            .collect();

        Ok(branches)
    }

    /// The `limit` most recently checked out branches, from the HEAD reflog.
    pub async fn get_recent_branches(
        &self,
        repo: &Path,
        limit: usize,
    ) -> Result<Vec<String>, GitServiceError> {
        let result = self
            .git(
                repo,
                &[
                    "log",
                    "-g",
                    "--no-abbrev-commit",
                    "--pretty=oneline",
                    "HEAD",
                    "-n",
                    "2500",
                    "--",
                ],
                RunOptions::default().allow_exit_code(128),
            )
            .await?;
        if result.exit_code == 128 {
            return Ok(Vec::new());
        }
        Ok(parse_recent_branches(&result.stdout, limit))
    }

    /// Branch name the remote's `HEAD` points at, e.g. `main`.
    pub async fn get_remote_head(
        &self,
        repo: &Path,
        remote: &str,
    ) -> Result<Option<String>, GitServiceError> {
        let namespace = format!("refs/remotes/{remote}/");
        let head = format!("{namespace}HEAD");
        let result = self
            .git(
                repo,
                &["symbolic-ref", "-q", &head],
                RunOptions::default().with_success_exit_codes([0, 1, 128]),
            )
            .await?;
        if result.exit_code != 0 {
            return Ok(None);
        }
        Ok(result
            .stdout
            .trim()
            .strip_prefix(&namespace)
            .filter(|name| !name.is_empty())
            .map(str::to_string))
    }

    pub async fn get_config_value(
        &self,
        repo: &Path,
        name: &str,
    ) -> Result<Option<String>, GitServiceError> {
        let result = self
            .git(
                repo,
                &["config", "-z", name],
                RunOptions::default().allow_exit_code(1),
            )
            .await?;
        if result.exit_code == 1 {
            return Ok(None);
        }
        Ok(result.stdout.split('\0').next().map(str::to_string))
    }

    /// `init.defaultBranch`, or `fallback` when unset.
    pub async fn get_default_branch_name(
        &self,
        repo: &Path,
        fallback: &str,
    ) -> Result<String, GitServiceError> {
        Ok(self
            .get_config_value(repo, DEFAULT_BRANCH_SETTING_NAME)
            .await?
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| fallback.to_string()))
    }

    /// Default branch among `branches`, preferring local branches.
    ///
    /// The name comes from the `HEAD` of `remote` (usually `origin`), then
    /// `init.defaultBranch`, then `fallback_name`.
    pub async fn find_default_branch(
        &self,
        repo: &Path,
        branches: &[Branch],
        remote: Option<&str>,
        fallback_name: &str,
    ) -> Result<Option<Branch>, GitServiceError> {
        let remote_head = match remote {
            Some(remote) => self.get_remote_head(repo, remote).await?,
            None => None,
        };

        let default_name = match &remote_head {
            Some(head) => head.clone(),
            None => self.get_default_branch_name(repo, fallback_name).await?,
        };
        let remote_ref = remote
            .zip(remote_head.as_deref())
            .map(|(remote, head)| format!("{remote}/{head}"));

        Ok(resolve_default_branch(branches, &default_name, remote_ref.as_deref()).cloned())
    }
}
