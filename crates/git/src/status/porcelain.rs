//! Parser for `git status --porcelain=2 -z`.
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use super::model::{
    FileEntry, GitStatusEntry, OrdinaryChange, SubmoduleStatus, UnmergedEntry,
    UnmergedEntrySummary,
};

/// `git status` arguments whose output [`parse_porcelain_status`] understands.
pub const STATUS_ARGS: [&str; 6] = [
    "--no-optional-locks",
    "status",
    "--untracked-files=all",
    "--branch",
    "--porcelain=2",
    "-z",
];

/// Unmerged `XY` codes, all of which map to a conflicted entry.
pub const CONFLICT_STATUS_CODES: [&str; 7] = ["DD", "AU", "UD", "UA", "DU", "AA", "UU"];

const UNTRACKED_SUBMODULE_CODE: &str = "N...";

// 1 <XY> <sub> <mH> <mI> <mW> <hH> <hI> <path>
static CHANGED_ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^1 ([MADRCUTX?!.]{2}) (N\.\.\.|S[C.][M.][U.]) (\d+) (\d+) (\d+) ([a-f0-9]+) ([a-f0-9]+) ([\s\S]*?)$",
    )
    .expect("changed entry regex")
});

// 2 <XY> <sub> <mH> <mI> <mW> <hH> <hI> <X><score> <path>
static RENAMED_OR_COPIED_ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^2 ([MADRCUTX?!.]{2}) (N\.\.\.|S[C.][M.][U.]) (\d+) (\d+) (\d+) ([a-f0-9]+) ([a-f0-9]+) ([RC]\d+) ([\s\S]*?)$",
    )
    .expect("renamed entry regex")
});

// u <XY> <sub> <m1> <m2> <m3> <mW> <h1> <h2> <h3> <path>
static UNMERGED_ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^u ([DAU]{2}) (N\.\.\.|S[C.][M.][U.]) (\d+) (\d+) (\d+) (\d+) ([a-f0-9]+) ([a-f0-9]+) ([a-f0-9]+) ([\s\S]*?)$",
    )
    .expect("unmerged entry regex")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatusParseError {
    #[error("failed to parse status line for {kind} entry: {record:?}")]
    MalformedEntry { kind: &'static str, record: String },
    #[error("rename entry for {path:?} is missing its original path")]
    MissingOriginalPath { path: String },
    #[error("unknown status entry type: {record:?}")]
    UnknownEntryType { record: String },
}

/// A `# ` line with the prefix removed, e.g. `branch.head main`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct StatusHeader {
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum StatusEntryKind {
    Ordinary,
    Renamed,
    Unmerged,
    Untracked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct StatusEntry {
    pub kind: StatusEntryKind,
    /// Two-character `XY` code, `??` for untracked files.
    pub status_code: String,
    /// `N...` or `S<C|.><M|.><U|.>`.
    pub submodule_status_code: String,
    pub path: String,
    /// Set exactly for rename/copy records.
    pub old_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusItem {
    Header(StatusHeader),
    Entry(StatusEntry),
}

pub fn parse_porcelain_status(output: &str) -> Result<Vec<StatusItem>, StatusParseError> {
    let mut items = Vec::new();
    let mut tokens = output.split('\0');

    while let Some(token) = tokens.next() {
        if token.is_empty() {
            continue;
        }

        if let Some(header) = token.strip_prefix("# ") {
            if !header.is_empty() {
                items.push(StatusItem::Header(StatusHeader {
                    value: header.to_string(),
                }));
            }
            continue;
        }

        let entry = match token.as_bytes()[0] {
            b'1' => parse_changed_entry(token)?,
            b'2' => {
                let old_path = tokens
                    .next()
                    .filter(|p| !p.is_empty())
                    .map(str::to_string);
                parse_renamed_or_copied_entry(token, old_path)?
            }
            b'u' => parse_unmerged_entry(token)?,
            b'?' => parse_untracked_entry(token),
            b'!' => continue,
            _ => {
                return Err(StatusParseError::UnknownEntryType {
                    record: token.to_string(),
                });
            }
        };
        items.push(StatusItem::Entry(entry));
    }

    Ok(items)
}

fn malformed(kind: &'static str, record: &str) -> StatusParseError {
    StatusParseError::MalformedEntry {
        kind,
        record: record.to_string(),
    }
}

fn parse_changed_entry(field: &str) -> Result<StatusEntry, StatusParseError> {
    let caps = CHANGED_ENTRY_RE
        .captures(field)
        .ok_or_else(|| malformed("changed", field))?;
    Ok(StatusEntry {
        kind: StatusEntryKind::Ordinary,
        status_code: caps[1].to_string(),
        submodule_status_code: caps[2].to_string(),
        path: caps[8].to_string(),
        old_path: None,
    })
}

fn parse_renamed_or_copied_entry(
    field: &str,
    old_path: Option<String>,
) -> Result<StatusEntry, StatusParseError> {
    let caps = RENAMED_OR_COPIED_ENTRY_RE
        .captures(field)
        .ok_or_else(|| malformed("renamed or copied", field))?;
    let path = caps[9].to_string();
    let old_path = old_path.ok_or_else(|| StatusParseError::MissingOriginalPath {
        path: path.clone(),
    })?;
    Ok(StatusEntry {
        kind: StatusEntryKind::Renamed,
        status_code: caps[1].to_string(),
        submodule_status_code: caps[2].to_string(),
        path,
        old_path: Some(old_path),
    })
}

fn parse_unmerged_entry(field: &str) -> Result<StatusEntry, StatusParseError> {
    let caps = UNMERGED_ENTRY_RE
        .captures(field)
        .ok_or_else(|| malformed("unmerged", field))?;
    Ok(StatusEntry {
        kind: StatusEntryKind::Unmerged,
        status_code: caps[1].to_string(),
        submodule_status_code: caps[2].to_string(),
        path: caps[10].to_string(),
        old_path: None,
    })
}

fn parse_untracked_entry(field: &str) -> StatusEntry {
    StatusEntry {
        kind: StatusEntryKind::Untracked,
        status_code: "??".to_string(),
        submodule_status_code: UNTRACKED_SUBMODULE_CODE.to_string(),
        path: field.get(2..).unwrap_or_default().to_string(),
        old_path: None,
    }
}

pub fn map_submodule_status(code: &str) -> Option<SubmoduleStatus> {
    let flags = code.strip_prefix('S')?.as_bytes();
    Some(SubmoduleStatus {
        commit_changed: flags.first() == Some(&b'C'),
        modified_changes: flags.get(1) == Some(&b'M'),
        untracked_changes: flags.get(2) == Some(&b'U'),
    })
}

/// Look up an `XY` status code. Unknown codes read as a modified file.
pub fn map_status(status_code: &str, submodule_status_code: &str) -> FileEntry {
    use GitStatusEntry::*;

    let submodule_status = map_submodule_status(submodule_status_code);
    let ordinary = |kind, index, working_tree| FileEntry::Ordinary {
        kind,
        index: Some(index),
        working_tree: Some(working_tree),
        submodule_status,
    };
    let renamed = |index, working_tree| FileEntry::Renamed {
        index: Some(index),
        working_tree: Some(working_tree),
        submodule_status,
    };
    let copied = |index, working_tree| FileEntry::Copied {
        index: Some(index),
        working_tree: Some(working_tree),
        submodule_status,
    };
    let conflicted = |action, us, them| {
        FileEntry::Conflicted(UnmergedEntry {
            action,
            us,
            them,
            submodule_status,
        })
    };

    match status_code {
        "??" => FileEntry::Untracked { submodule_status },
        ".M" => ordinary(OrdinaryChange::Modified, Unchanged, Modified),
        "M." => ordinary(OrdinaryChange::Modified, Modified, Unchanged),
        "MM" => ordinary(OrdinaryChange::Modified, Modified, Modified),
        ".A" => ordinary(OrdinaryChange::Added, Unchanged, Added),
        "A." => ordinary(OrdinaryChange::Added, Added, Unchanged),
        "AM" => ordinary(OrdinaryChange::Added, Added, Modified),
        "AD" => ordinary(OrdinaryChange::Added, Added, Deleted),
        ".D" => ordinary(OrdinaryChange::Deleted, Unchanged, Deleted),
        "D." => ordinary(OrdinaryChange::Deleted, Deleted, Unchanged),
        ".R" => renamed(Unchanged, Renamed),
        "R." => renamed(Renamed, Unchanged),
        "RM" => renamed(Renamed, Modified),
        "RD" => renamed(Renamed, Deleted),
        ".C" => copied(Unchanged, Copied),
        "C." => copied(Copied, Unchanged),
        "DD" => conflicted(UnmergedEntrySummary::BothDeleted, Deleted, Deleted),
        "AU" => conflicted(UnmergedEntrySummary::AddedByUs, Added, UpdatedButUnmerged),
        "UD" => conflicted(
            UnmergedEntrySummary::DeletedByThem,
            UpdatedButUnmerged,
            Deleted,
        ),
        "UA" => conflicted(
            UnmergedEntrySummary::AddedByThem,
            UpdatedButUnmerged,
            Added,
        ),
        "DU" => conflicted(UnmergedEntrySummary::DeletedByUs, Deleted, UpdatedButUnmerged),
        "AA" => conflicted(UnmergedEntrySummary::BothAdded, Added, Added),
        "UU" => conflicted(
            UnmergedEntrySummary::BothModified,
            UpdatedButUnmerged,
            UpdatedButUnmerged,
        ),
        _ => FileEntry::Ordinary {
            kind: OrdinaryChange::Modified,
            index: None,
            working_tree: None,
            submodule_status,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA: &str = "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391";

    fn entries(items: &[StatusItem]) -> Vec<&StatusEntry> {
        items
            .iter()
            .filter_map(|item| match item {
                StatusItem::Entry(entry) => Some(entry),
                StatusItem::Header(_) => None,
            })
            .collect()
    }

    #[test]
    fn parses_headers_and_every_entry_type() {
        let output = [
            "# branch.oid 1234abcd".to_string(),
            "# branch.head main".to_string(),
            format!("1 .M N... 100644 100644 100644 {SHA} {SHA} src/lib.rs"),
            format!("2 R. N... 100644 100644 100644 {SHA} {SHA} R100 new name.txt"),
            "old name.txt".to_string(),
            format!("u UU N... 100644 100644 100644 100644 {SHA} {SHA} {SHA} conflict.txt"),
            "? untracked.txt".to_string(),
            "! ignored.log".to_string(),
            String::new(),
        ]
        .join("\0");

        let items = parse_porcelain_status(&output).unwrap();
        assert_eq!(
            items[0],
            StatusItem::Header(StatusHeader {
                value: "branch.oid 1234abcd".into()
            })
        );

        let entries = entries(&items);
        assert_eq!(entries.len(), 4);

        assert_eq!(entries[0].kind, StatusEntryKind::Ordinary);
        assert_eq!(entries[0].status_code, ".M");
        assert_eq!(entries[0].path, "src/lib.rs");
        assert_eq!(entries[0].old_path, None);

        assert_eq!(entries[1].kind, StatusEntryKind::Renamed);
        assert_eq!(entries[1].path, "new name.txt");
        assert_eq!(entries[1].old_path.as_deref(), Some("old name.txt"));

        assert_eq!(entries[2].kind, StatusEntryKind::Unmerged);
        assert_eq!(entries[2].status_code, "UU");
        assert_eq!(entries[2].path, "conflict.txt");

        assert_eq!(entries[3].status_code, "??");
        assert_eq!(entries[3].submodule_status_code, "N...");
        assert_eq!(entries[3].path, "untracked.txt");
    }

    #[test]
    fn parsing_twice_gives_the_same_result() {
        let output = format!("1 M. N... 100644 100644 100644 {SHA} {SHA} a.txt\0? b.txt\0");
        assert_eq!(
            parse_porcelain_status(&output).unwrap(),
            parse_porcelain_status(&output).unwrap()
        );
    }

    #[test]
    fn malformed_records_fail() {
        let err = parse_porcelain_status("1 .M N... 100644 a.txt\0").unwrap_err();
        assert!(matches!(
            err,
            StatusParseError::MalformedEntry {
                kind: "changed",
                ..
            }
        ));

        let err = parse_porcelain_status(&format!(
            "1 .Z N... 100644 100644 100644 {SHA} {SHA} a.txt\0"
        ))
        .unwrap_err();
        assert!(matches!(err, StatusParseError::MalformedEntry { .. }));

        let err = parse_porcelain_status("x what\0").unwrap_err();
        assert!(matches!(err, StatusParseError::UnknownEntryType { .. }));
    }

    #[test]
    fn rename_without_original_path_fails() {
        let output = format!("2 R. N... 100644 100644 100644 {SHA} {SHA} R100 new.txt");
        assert_eq!(
            parse_porcelain_status(&output).unwrap_err(),
            StatusParseError::MissingOriginalPath {
                path: "new.txt".into()
            }
        );
    }

    #[test]
    fn submodule_codes() {
        assert_eq!(map_submodule_status("N..."), None);
        assert_eq!(
            map_submodule_status("SC.U"),
            Some(SubmoduleStatus {
                commit_changed: true,
                modified_changes: false,
                untracked_changes: true,
            })
        );
    }

    #[test]
    fn status_code_table() {
        assert!(matches!(
            map_status("??", "N..."),
            FileEntry::Untracked {
                submodule_status: None
            }
        ));
        assert!(matches!(
            map_status("AD", "N..."),
            FileEntry::Ordinary {
                kind: OrdinaryChange::Added,
                working_tree: Some(GitStatusEntry::Deleted),
                ..
            }
        ));
        assert!(matches!(map_status("RM", "N..."), FileEntry::Renamed { .. }));
        assert!(matches!(map_status(".C", "N..."), FileEntry::Copied { .. }));

        for code in CONFLICT_STATUS_CODES {
            assert!(
                matches!(map_status(code, "N..."), FileEntry::Conflicted(_)),
                "{code} should be conflicted"
            );
        }

        assert!(matches!(
            map_status("T.", "SC.."),
            FileEntry::Ordinary {
                kind: OrdinaryChange::Modified,
                index: None,
                submodule_status: Some(SubmoduleStatus {
                    commit_changed: true,
                    ..
                }),
                ..
            }
        ));
    }
}
