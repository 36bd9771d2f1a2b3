//! Classification of git's stderr/stdout into known failure kinds.
//!
//! Patterns mirror git's own wording (and a few hosting-provider hooks) and
//! are tried in order; the first match wins, so more specific wordings must
//! stay ahead of generic ones.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
pub enum GitErrorKind {
    BadConfigValue,
    SshKeyAuditUnverified,
    SshAuthenticationFailed,
    SshPermissionDenied,
    HttpsAuthenticationFailed,
    RemoteDisconnection,
    HostDown,
    RebaseConflicts,
    MergeConflicts,
    HttpsRepositoryNotFound,
    SshRepositoryNotFound,
    PushNotFastForward,
    BranchDeletionFailed,
    DefaultBranchDeletionFailed,
    RevertConflicts,
    EmptyRebasePatch,
    NoMatchingRemoteBranch,
    NoExistingRemoteBranch,
    NothingToCommit,
    NoSubmoduleMapping,
    SubmoduleRepositoryDoesNotExist,
    InvalidSubmoduleSha,
    LocalPermissionDenied,
    InvalidMerge,
    InvalidRebase,
    NonFastForwardMergeIntoEmptyHead,
    PatchDoesNotApply,
    BranchAlreadyExists,
    BadRevision,
    NotAGitRepository,
    CannotMergeUnrelatedHistories,
    LfsAttributeDoesNotMatch,
    BranchRenameFailed,
    PathDoesNotExist,
    InvalidObjectName,
    OutsideRepository,
    LockFileAlreadyExists,
    NoMergeToAbort,
    LocalChangesOverwritten,
    UnresolvedConflicts,
    GpgFailedToSignData,
    ConflictModifyDeletedInBranch,
    PushWithFileSizeExceedingLimit,
    HexBranchNameRejected,
    ForcePushRejected,
    InvalidRefLength,
    ProtectedBranchRequiresReview,
    ProtectedBranchForcePush,
    ProtectedBranchDeleteRejected,
    ProtectedBranchRequiredStatus,
    PushWithPrivateEmail,
    ConfigLockFileAlreadyExists,
    RemoteAlreadyExists,
    TagAlreadyExists,
    MergeWithLocalChanges,
    RebaseWithLocalChanges,
    MergeCommitNoMainlineOption,
    UnsafeDirectory,
    PathExistsButNotInRef,
}

const PATTERNS: &[(&str, GitErrorKind)] = &[
    (
        r"fatal: bad (?:numeric|boolean) config value '(.+)' for '(.+)'",
        GitErrorKind::BadConfigValue,
    ),
    (
        r"ERROR: ([\s\S]+?)\n+\[EPOLICYKEYAGE\]\n+fatal: Could not read from remote repository.",
        GitErrorKind::SshKeyAuditUnverified,
    ),
    (
        r"fatal: Authentication failed for 'https://",
        GitErrorKind::HttpsAuthenticationFailed,
    ),
    (r"fatal: Authentication failed", GitErrorKind::SshAuthenticationFailed),
    (
        r"fatal: Could not read from remote repository.",
        GitErrorKind::SshPermissionDenied,
    ),
    (
        r"The requested URL returned error: 403",
        GitErrorKind::HttpsAuthenticationFailed,
    ),
    (
        r"fatal: [Tt]he remote end hung up unexpectedly",
        GitErrorKind::RemoteDisconnection,
    ),
    (
        r"fatal: unable to access '(.+)': Failed to connect to (.+): Host is down",
        GitErrorKind::HostDown,
    ),
    (
        r"Cloning into '(.+)'...\nfatal: unable to access '(.+)': Could not resolve host: (.+)",
        GitErrorKind::HostDown,
    ),
    (
        r"Resolve all conflicts manually, mark them as resolved with",
        GitErrorKind::RebaseConflicts,
    ),
    (
        r"(Merge conflict|Automatic merge failed; fix conflicts and then commit the result)",
        GitErrorKind::MergeConflicts,
    ),
    (
        r"fatal: repository '(.+)' not found",
        GitErrorKind::HttpsRepositoryNotFound,
    ),
    (r"ERROR: Repository not found", GitErrorKind::SshRepositoryNotFound),
    (
        r"\((non-fast-forward|fetch first)\)\nerror: failed to push some refs to '.*'",
        GitErrorKind::PushNotFastForward,
    ),
    (
        r"error: unable to delete '(.+)': remote ref does not exist",
        GitErrorKind::BranchDeletionFailed,
    ),
    (
        r"\[remote rejected\] (.+) \(deletion of the current branch prohibited\)",
        GitErrorKind::DefaultBranchDeletionFailed,
    ),
    (
        r"error: could not revert .*\nhint: after resolving the conflicts, mark the corrected paths\nhint: with 'git add <paths>' or 'git rm <paths>'\nhint: and commit the result with 'git commit'",
        GitErrorKind::RevertConflicts,
    ),
    (
        r"Applying: .*\nNo changes - did you forget to use 'git add'\?\nIf there is nothing left to stage, chances are that something else\n.*",
        GitErrorKind::EmptyRebasePatch,
    ),
    (
        r"There are no candidates for (rebasing|merging) among the refs that you just fetched.\nGenerally this means that you provided a wildcard refspec which had no\nmatches on the remote end.",
        GitErrorKind::NoMatchingRemoteBranch,
    ),
    (
        r"Your configuration specifies to merge with the ref '(.+)'\nfrom the remote, but no such ref was fetched.",
        GitErrorKind::NoExistingRemoteBranch,
    ),
    (r"nothing to commit", GitErrorKind::NothingToCommit),
    (
        r"[Nn]o submodule mapping found in .gitmodules for path '(.+)'",
        GitErrorKind::NoSubmoduleMapping,
    ),
    (
        r"fatal: repository '(.+)' does not exist\nfatal: clone of '.+' into submodule path '(.+)' failed",
        GitErrorKind::SubmoduleRepositoryDoesNotExist,
    ),
    (
        r"Fetched in submodule path '(.+)', but it did not contain (.+). Direct fetching of that commit failed.",
        GitErrorKind::InvalidSubmoduleSha,
    ),
    (
        r"fatal: could not create work tree dir '(.+)'.*: Permission denied",
        GitErrorKind::LocalPermissionDenied,
    ),
    (
        r"merge: (.+) - not something we can merge",
        GitErrorKind::InvalidMerge,
    ),
    (r"invalid upstream (.+)", GitErrorKind::InvalidRebase),
    (
        r"fatal: Non-fast-forward commit does not make sense into an empty head",
        GitErrorKind::NonFastForwardMergeIntoEmptyHead,
    ),
    (
        r"error: (.+): (patch does not apply|already exists in working directory)",
        GitErrorKind::PatchDoesNotApply,
    ),
    (
        r"fatal: [Aa] branch named '(.+)' already exists.?",
        GitErrorKind::BranchAlreadyExists,
    ),
    (r"fatal: bad revision '(.*)'", GitErrorKind::BadRevision),
    (
        r"fatal: [Nn]ot a git repository \(or any of the parent directories\): (.*)",
        GitErrorKind::NotAGitRepository,
    ),
    (
        r"fatal: refusing to merge unrelated histories",
        GitErrorKind::CannotMergeUnrelatedHistories,
    ),
    (
        r"The .+ attribute should be .+ but is .+",
        GitErrorKind::LfsAttributeDoesNotMatch,
    ),
    (r"fatal: Branch rename failed", GitErrorKind::BranchRenameFailed),
    (
        r"fatal: path '(.+)' does not exist .+",
        GitErrorKind::PathDoesNotExist,
    ),
    (
        r"fatal: invalid object name '(.+)'.",
        GitErrorKind::InvalidObjectName,
    ),
    (
        r"fatal: .+: '(.+)' is outside repository",
        GitErrorKind::OutsideRepository,
    ),
    (
        r"Another git process seems to be running in this repository, e.g.",
        GitErrorKind::LockFileAlreadyExists,
    ),
    (r"fatal: There is no merge to abort", GitErrorKind::NoMergeToAbort),
    (
        r"error: (?:Your local changes to the following|The following untracked working tree) files would be overwritten by checkout:",
        GitErrorKind::LocalChangesOverwritten,
    ),
    (
        r"You must edit all merge conflicts and then\nmark them as resolved using git add|fatal: Exiting because of an unresolved conflict",
        GitErrorKind::UnresolvedConflicts,
    ),
    (
        r"error: gpg failed to sign the data",
        GitErrorKind::GpgFailedToSignData,
    ),
    (
        r"CONFLICT \(modify/delete\): (.+) deleted in (.+) and modified in (.+)",
        GitErrorKind::ConflictModifyDeletedInBranch,
    ),
    // Hosting provider hooks.
    (r"error: GH001: ", GitErrorKind::PushWithFileSizeExceedingLimit),
    (r"error: GH002: ", GitErrorKind::HexBranchNameRejected),
    (
        r"error: GH003: Sorry, force-pushing to (.+) is not allowed.",
        GitErrorKind::ForcePushRejected,
    ),
    (
        r"error: GH005: Sorry, refs longer than (.+) bytes are not allowed",
        GitErrorKind::InvalidRefLength,
    ),
    (
        r"error: GH006: Protected branch update failed for (.+)\nremote: error: At least one approved review is required",
        GitErrorKind::ProtectedBranchRequiresReview,
    ),
    (
        r"error: GH006: Protected branch update failed for (.+)\nremote: error: Cannot force-push to a protected branch",
        GitErrorKind::ProtectedBranchForcePush,
    ),
    (
        r"error: GH006: Protected branch update failed for (.+)\nremote: error: Cannot delete a protected branch",
        GitErrorKind::ProtectedBranchDeleteRejected,
    ),
    (
        r#"error: GH006: Protected branch update failed for (.+).\nremote: error: Required status check "(.+)" is expected"#,
        GitErrorKind::ProtectedBranchRequiredStatus,
    ),
    (
        r"error: GH007: Your push would publish a private email address.",
        GitErrorKind::PushWithPrivateEmail,
    ),
    (
        r"error: could not lock config file (.+): File exists",
        GitErrorKind::ConfigLockFileAlreadyExists,
    ),
    (
        r"error: remote (.+) already exists.",
        GitErrorKind::RemoteAlreadyExists,
    ),
    (
        r"fatal: tag '(.+)' already exists",
        GitErrorKind::TagAlreadyExists,
    ),
    (
        r"error: Your local changes to the following files would be overwritten by merge:\n",
        GitErrorKind::MergeWithLocalChanges,
    ),
    (
        r"error: cannot (pull with rebase|rebase): You have unstaged changes\.\n\s*error: [Pp]lease commit or stash them\.",
        GitErrorKind::RebaseWithLocalChanges,
    ),
    (
        r"error: commit (.+) is a merge but no -m option was given",
        GitErrorKind::MergeCommitNoMainlineOption,
    ),
    (
        r"fatal: detected dubious ownership in repository at (.+)",
        GitErrorKind::UnsafeDirectory,
    ),
    (
        r"fatal: path '(.+)' exists on disk, but not in '(.+)'",
        GitErrorKind::PathExistsButNotInRef,
    ),
];

static ERROR_TABLE: LazyLock<Vec<(Regex, GitErrorKind)>> = LazyLock::new(|| {
    PATTERNS
        .iter()
        .map(|(pattern, kind)| (Regex::new(pattern).expect("git error regex"), *kind))
        .collect()
});

/// Classify git output. Returns the first kind whose pattern matches.
pub fn parse_error(output: &str) -> Option<GitErrorKind> {
    ERROR_TABLE
        .iter()
        .find(|(regex, _)| regex.is_match(output))
        .map(|(_, kind)| *kind)
}

const AUTHENTICATION_FAILED: &str = "Authentication failed. Some common reasons include:

- You are not logged in to your account.
- You may need to log out and log back in to refresh your token.
- You do not have permission to access this repository.
- The repository is archived. Check the repository settings to confirm you are still permitted to push commits.
- If you use SSH authentication, check that your key is added to the ssh-agent and associated with your account.
- If you use SSH authentication, ensure the host key verification passes for your repository hosting service.
- If you used username / password authentication, you might need to use a Personal Access Token instead of your account password.";

const REPOSITORY_NOT_FOUND: &str = "The repository does not seem to exist anymore. You may not have access, or it may have been deleted or renamed.";

impl GitErrorKind {
    /// Fixed user-facing text. `None` means the raw git output should be
    /// shown instead.
    pub fn description(self) -> Option<&'static str> {
        use GitErrorKind::*;

        let text = match self {
            SshKeyAuditUnverified => "The SSH key is unverified.",
            SshAuthenticationFailed | SshPermissionDenied | HttpsAuthenticationFailed => {
                AUTHENTICATION_FAILED
            }
            RemoteDisconnection => {
                "The remote disconnected. Check your Internet connection and try again."
            }
            HostDown => "The host is down. Check your Internet connection and try again.",
            RebaseConflicts => {
                "We found some conflicts while trying to rebase. Please resolve the conflicts before continuing."
            }
            MergeConflicts => {
                "We found some conflicts while trying to merge. Please resolve the conflicts and commit the changes."
            }
            HttpsRepositoryNotFound | SshRepositoryNotFound => REPOSITORY_NOT_FOUND,
            PushNotFastForward => {
                "The repository has been updated since you last pulled. Try pulling before pushing."
            }
            BranchDeletionFailed => {
                "Could not delete the branch. It was probably already deleted."
            }
            DefaultBranchDeletionFailed => {
                "The branch is the repository's default branch and cannot be deleted."
            }
            RevertConflicts => "To finish reverting, please merge and commit the changes.",
            EmptyRebasePatch => "There aren't any changes left to apply.",
            NoMatchingRemoteBranch => {
                "There aren't any remote branches that match the current branch."
            }
            NoExistingRemoteBranch => "The remote branch does not exist.",
            NothingToCommit => "There are no changes to commit.",
            NoSubmoduleMapping => {
                "A submodule was removed from .gitmodules, but the folder still exists in the repository. Delete the folder, commit the change, then try again."
            }
            SubmoduleRepositoryDoesNotExist => {
                "A submodule points to a location which does not exist."
            }
            InvalidSubmoduleSha => "A submodule points to a commit which does not exist.",
            LocalPermissionDenied => "Permission denied.",
            InvalidMerge => "This is not something we can merge.",
            InvalidRebase => "This is not something we can rebase.",
            NonFastForwardMergeIntoEmptyHead => {
                "The merge you attempted is not a fast-forward, so it cannot be performed on an empty branch."
            }
            PatchDoesNotApply => {
                "The requested changes conflict with one or more files in the repository."
            }
            BranchAlreadyExists => "A branch with that name already exists.",
            BadRevision => "Bad revision.",
            NotAGitRepository => "This is not a git repository.",
            CannotMergeUnrelatedHistories => {
                "Unable to merge unrelated histories in this repository."
            }
            LfsAttributeDoesNotMatch => {
                "Git LFS attribute found in global Git configuration does not match expected value."
            }
            BranchRenameFailed => "The branch could not be renamed.",
            PathDoesNotExist => "The path does not exist on disk.",
            InvalidObjectName => "The object was not found in the Git repository.",
            OutsideRepository => "This path is not a valid path inside the repository.",
            LockFileAlreadyExists => {
                "A lock file already exists in the repository, which blocks this operation from completing."
            }
            NoMergeToAbort => "There is no merge in progress, so there is nothing to abort.",
            LocalChangesOverwritten => {
                "Unable to switch branches as there are working directory changes which would be overwritten. Please commit or stash your changes."
            }
            UnresolvedConflicts => "There are unresolved conflicts in the working directory.",
            PushWithFileSizeExceedingLimit => {
                "The push operation includes a file which exceeds the hosting provider's file size restriction. Please remove the file from history and try again."
            }
            HexBranchNameRejected => {
                "The branch could not be pushed because it looks like a hexadecimal string. Branches should not be named like this because it might be confused with a commit hash."
            }
            ForcePushRejected => "The force push has been rejected for the current branch.",
            InvalidRefLength => "A ref cannot be longer than 255 characters.",
            ProtectedBranchRequiresReview => {
                "This branch is protected and any changes requires an approved review. Open a pull request with changes targeting this branch instead."
            }
            ProtectedBranchForcePush => "This branch is protected from force-push operations.",
            ProtectedBranchDeleteRejected => {
                "This branch cannot be deleted from the remote repository because it is marked as protected."
            }
            ProtectedBranchRequiredStatus => {
                "The push was rejected by the remote server because a required status check has not been satisfied."
            }
            PushWithPrivateEmail => {
                "Cannot push these commits as they contain an email address marked as private."
            }
            TagAlreadyExists => "A tag with that name already exists.",
            BadConfigValue
            | GpgFailedToSignData
            | ConflictModifyDeletedInBranch
            | ConfigLockFileAlreadyExists
            | RemoteAlreadyExists
            | MergeWithLocalChanges
            | RebaseWithLocalChanges
            | MergeCommitNoMainlineOption
            | UnsafeDirectory
            | PathExistsButNotInRef => return None,
        };
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_authentication_failure_is_ssh() {
        let kind = parse_error("fatal: Authentication failed");
        assert_eq!(kind, Some(GitErrorKind::SshAuthenticationFailed));
        assert!(
            kind.and_then(GitErrorKind::description)
                .is_some_and(|d| d.contains("Authentication failed."))
        );
    }

    #[test]
    fn https_authentication_failure_wins_over_generic() {
        let stderr = "remote: Invalid username or password.\nfatal: Authentication failed for 'https://example.com/repo.git/'";
        assert_eq!(
            parse_error(stderr),
            Some(GitErrorKind::HttpsAuthenticationFailed)
        );
    }

    #[test]
    fn not_a_git_repository() {
        let stderr = "fatal: not a git repository (or any of the parent directories): .git\n";
        assert_eq!(parse_error(stderr), Some(GitErrorKind::NotAGitRepository));
    }

    #[test]
    fn multi_line_patterns_match() {
        let stderr = "To example.com:org/repo.git\n ! [rejected]        main -> main (fetch first)\nerror: failed to push some refs to 'example.com:org/repo.git'";
        assert_eq!(parse_error(stderr), Some(GitErrorKind::PushNotFastForward));
    }

    #[test]
    fn unknown_output_is_unclassified() {
        assert_eq!(parse_error("warning: something unusual happened"), None);
        assert_eq!(parse_error(""), None);
    }

    #[test]
    fn every_pattern_compiles() {
        assert_eq!(ERROR_TABLE.len(), PATTERNS.len());
    }

    #[test]
    fn kinds_without_custom_text_fall_back_to_raw_output() {
        assert_eq!(GitErrorKind::UnsafeDirectory.description(), None);
        assert!(GitErrorKind::NotAGitRepository.description().is_some());
    }
}
