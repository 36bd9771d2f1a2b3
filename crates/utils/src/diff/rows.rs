//! Turns parsed hunks into rows for a unified or side-by-side diff view.
//!
//! Consecutive added/deleted lines are buffered and flushed as one run. When
//! a run has as many additions as deletions, each i-th pair gets intra-line
//! highlight tokens. In side-by-side mode pairs collapse into
//! [`DiffRow::Modified`] rows.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use super::{DiffHunk, DiffHunkExpansionType, DiffLine, DiffLineKind, relative_changes};

/// Longest line (in characters) for which an intra-line diff is computed.
/// Lines of this length or longer get no highlight tokens.
pub const MAX_INTRA_LINE_DIFF_STRING_LENGTH: usize = 1024;

pub const DELETE_INNER_TOKEN: &str = "diff-delete-inner";
pub const ADD_INNER_TOKEN: &str = "diff-add-inner";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiffRowError {
    #[error("{kind:?} line at diff line {diff_line_number} has no {side} line number")]
    MissingLineNumber {
        kind: DiffLineKind,
        side: &'static str,
        diff_line_number: usize,
    },
}

/// A highlighted byte range within a row's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct LineToken {
    pub location: usize,
    pub length: usize,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct DiffRowData {
    pub content: String,
    /// Line number in the old file for deletions, in the new file for additions.
    pub line_number: u32,
    /// Position in the unexpanded diff; what partial commits and discards refer to.
    pub diff_line_number: Option<usize>,
    pub no_new_line_indicator: bool,
    pub tokens: Vec<LineToken>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiffRow {
    Context {
        content: String,
        before_line_number: u32,
        after_line_number: u32,
        before_tokens: Vec<LineToken>,
        after_tokens: Vec<LineToken>,
    },
    Hunk {
        content: String,
        expansion_type: DiffHunkExpansionType,
        hunk_index: usize,
    },
    Added {
        data: DiffRowData,
        hunk_start_line: usize,
    },
    Deleted {
        data: DiffRowData,
        hunk_start_line: usize,
    },
    Modified {
        before_data: DiffRowData,
        after_data: DiffRowData,
        hunk_start_line: usize,
    },
}

impl DiffRow {
    /// Whether the row shows a change, as opposed to context or a hunk header.
    pub fn is_changed(&self) -> bool {
        matches!(
            self,
            DiffRow::Added { .. } | DiffRow::Deleted { .. } | DiffRow::Modified { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffRowOptions {
    pub show_side_by_side: bool,
    pub enable_diff_expansion: bool,
}

struct ChangedLine<'a> {
    line: &'a DiffLine,
    diff_line_number: usize,
}

/// Rows for every hunk of a diff, in order.
pub fn diff_rows(
    hunks: &[DiffHunk],
    options: DiffRowOptions,
) -> Result<Vec<DiffRow>, DiffRowError> {
    let mut rows = Vec::new();
    for (index, hunk) in hunks.iter().enumerate() {
        rows.extend(diff_rows_from_hunk(index, hunk, options)?);
    }
    Ok(rows)
}

pub fn diff_rows_from_hunk(
    hunk_index: usize,
    hunk: &DiffHunk,
    options: DiffRowOptions,
) -> Result<Vec<DiffRow>, DiffRowError> {
    let mut rows = Vec::with_capacity(hunk.lines.len());
    let mut pending: Vec<ChangedLine<'_>> = Vec::new();

    for (offset, line) in hunk.lines.iter().enumerate() {
        let diff_line_number = hunk.unified_diff_start + offset;

        if let DiffLineKind::Add | DiffLineKind::Delete = line.kind {
            pending.push(ChangedLine {
                line,
                diff_line_number,
            });
            continue;
        }

        if !pending.is_empty() {
            rows.extend(modified_rows(&pending, options.show_side_by_side)?);
            pending.clear();
        }

        if line.kind == DiffLineKind::Hunk {
            rows.push(DiffRow::Hunk {
                content: line.text.clone(),
                expansion_type: if options.enable_diff_expansion {
                    hunk.expansion_type
                } else {
                    DiffHunkExpansionType::None
                },
                hunk_index,
            });
            continue;
        }

        rows.push(DiffRow::Context {
            content: line.content().to_string(),
            before_line_number: required(line, line.old_line_number, "old", diff_line_number)?,
            after_line_number: required(line, line.new_line_number, "new", diff_line_number)?,
            before_tokens: Vec::new(),
            after_tokens: Vec::new(),
        });
    }

    if !pending.is_empty() {
        rows.extend(modified_rows(&pending, options.show_side_by_side)?);
    }

    Ok(rows)
}

fn required(
    line: &DiffLine,
    number: Option<u32>,
    side: &'static str,
    diff_line_number: usize,
) -> Result<u32, DiffRowError> {
    number.ok_or(DiffRowError::MissingLineNumber {
        kind: line.kind,
        side,
        diff_line_number,
    })
}

fn fits_intra_line_diff(line: &DiffLine) -> bool {
    line.content().chars().count() < MAX_INTRA_LINE_DIFF_STRING_LENGTH
}

fn modified_rows(
    run: &[ChangedLine<'_>],
    show_side_by_side: bool,
) -> Result<Vec<DiffRow>, DiffRowError> {
    let Some(first) = run.first() else {
        return Ok(Vec::new());
    };
    let hunk_start_line = first.diff_line_number;

    let (added, deleted): (Vec<&ChangedLine<'_>>, Vec<&ChangedLine<'_>>) =
        run.iter().partition(|changed| changed.line.kind == DiffLineKind::Add);

    let mut before_tokens: Vec<Option<LineToken>> = vec![None; deleted.len()];
    let mut after_tokens: Vec<Option<LineToken>> = vec![None; added.len()];

    if added.len() == deleted.len() {
        for (i, (deleted_line, added_line)) in deleted.iter().zip(added.iter()).enumerate() {
            if !fits_intra_line_diff(deleted_line.line) || !fits_intra_line_diff(added_line.line) {
                continue;
            }
            let changes = relative_changes(deleted_line.line.content(), added_line.line.content());
            before_tokens[i] = Some(LineToken {
                location: changes.before.location,
                length: changes.before.length,
                token: DELETE_INNER_TOKEN.to_string(),
            });
            after_tokens[i] = Some(LineToken {
                location: changes.after.location,
                length: changes.after.length,
                token: ADD_INNER_TOKEN.to_string(),
            });
        }
    }

    let mut rows = Vec::with_capacity(run.len());
    let paired = if show_side_by_side {
        added.len().min(deleted.len())
    } else {
        0
    };

    for i in 0..paired {
        rows.push(DiffRow::Modified {
            before_data: row_data(deleted[i], Side::Old, before_tokens[i].take())?,
            after_data: row_data(added[i], Side::New, after_tokens[i].take())?,
            hunk_start_line,
        });
    }
    for i in paired..deleted.len() {
        rows.push(DiffRow::Deleted {
            data: row_data(deleted[i], Side::Old, before_tokens[i].take())?,
            hunk_start_line,
        });
    }
    for i in paired..added.len() {
        rows.push(DiffRow::Added {
            data: row_data(added[i], Side::New, after_tokens[i].take())?,
            hunk_start_line,
        });
    }

    Ok(rows)
}

#[derive(Clone, Copy)]
enum Side {
    Old,
    New,
}

fn row_data(
    changed: &ChangedLine<'_>,
    side: Side,
    token: Option<LineToken>,
) -> Result<DiffRowData, DiffRowError> {
    let line = changed.line;
    let line_number = match side {
        Side::Old => required(line, line.old_line_number, "old", changed.diff_line_number)?,
        Side::New => required(line, line.new_line_number, "new", changed.diff_line_number)?,
    };

    Ok(DiffRowData {
        content: line.content().to_string(),
        line_number,
        diff_line_number: line.original_line_number,
        no_new_line_indicator: line.no_trailing_newline,
        tokens: token.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{DiffHunkHeader, parse_raw_diff};

    fn hunk(lines: Vec<DiffLine>) -> DiffHunk {
        let end = lines.len() - 1;
        DiffHunk::new(
            DiffHunkHeader::new(1, 1, 1, 1),
            lines,
            0,
            end,
            DiffHunkExpansionType::Both,
        )
    }

    fn header() -> DiffLine {
        DiffLine::new("@@ -1 +1 @@", DiffLineKind::Hunk, Some(0), None, None)
    }

    fn delete(text: &str, old: u32, original: usize) -> DiffLine {
        DiffLine::new(format!("-{text}"), DiffLineKind::Delete, Some(original), Some(old), None)
    }

    fn add(text: &str, new: u32, original: usize) -> DiffLine {
        DiffLine::new(format!("+{text}"), DiffLineKind::Add, Some(original), None, Some(new))
    }

    const SIDE_BY_SIDE: DiffRowOptions = DiffRowOptions {
        show_side_by_side: true,
        enable_diff_expansion: true,
    };
    const UNIFIED: DiffRowOptions = DiffRowOptions {
        show_side_by_side: false,
        enable_diff_expansion: true,
    };

    #[test]
    fn side_by_side_pairs_delete_and_add_into_modified() {
        let hunk = hunk(vec![header(), delete("a", 1, 1), add("b", 1, 2)]);
        let rows = diff_rows_from_hunk(0, &hunk, SIDE_BY_SIDE).unwrap();

        assert_eq!(rows.len(), 2);
        let DiffRow::Modified {
            before_data,
            after_data,
            hunk_start_line,
        } = &rows[1]
        else {
            panic!("expected a modified row, got {:?}", rows[1]);
        };
        assert_eq!(before_data.content, "a");
        assert_eq!(after_data.content, "b");
        assert_eq!(*hunk_start_line, 1);
        assert_eq!(
            before_data.tokens,
            vec![LineToken {
                location: 0,
                length: 1,
                token: DELETE_INNER_TOKEN.to_string()
            }]
        );
    }

    #[test]
    fn unified_emits_deleted_then_added() {
        let hunk = hunk(vec![header(), delete("a", 1, 1), add("b", 1, 2)]);
        let rows = diff_rows_from_hunk(0, &hunk, UNIFIED).unwrap();

        assert!(matches!(rows[0], DiffRow::Hunk { hunk_index: 0, .. }));
        assert!(matches!(&rows[1], DiffRow::Deleted { data, .. } if data.content == "a"));
        assert!(matches!(&rows[2], DiffRow::Added { data, .. } if data.content == "b"));
    }

    #[test]
    fn surplus_lines_become_plain_rows_without_tokens() {
        let hunk = hunk(vec![
            header(),
            delete("one", 1, 1),
            delete("two", 2, 2),
            delete("three", 3, 3),
            add("uno", 1, 4),
        ]);
        let rows = diff_rows_from_hunk(0, &hunk, SIDE_BY_SIDE).unwrap();

        let modified = rows.iter().filter(|r| matches!(r, DiffRow::Modified { .. })).count();
        let deleted = rows.iter().filter(|r| matches!(r, DiffRow::Deleted { .. })).count();
        let added = rows.iter().filter(|r| matches!(r, DiffRow::Added { .. })).count();
        assert_eq!((modified, deleted, added), (1, 2, 0));

        // Unequal runs never get intra-line highlighting.
        let DiffRow::Modified { before_data, .. } = &rows[1] else {
            panic!("expected a modified row");
        };
        assert!(before_data.tokens.is_empty());
    }

    #[test]
    fn every_row_of_a_run_shares_the_run_start() {
        let hunk = hunk(vec![
            header(),
            DiffLine::new(" ctx", DiffLineKind::Context, Some(1), Some(1), Some(1)),
            delete("a", 2, 2),
            delete("b", 3, 3),
            add("c", 2, 4),
        ]);
        let rows = diff_rows_from_hunk(0, &hunk, UNIFIED).unwrap();

        let starts: Vec<usize> = rows
            .iter()
            .filter_map(|row| match row {
                DiffRow::Added { hunk_start_line, .. } | DiffRow::Deleted { hunk_start_line, .. } => {
                    Some(*hunk_start_line)
                }
                _ => None,
            })
            .collect();
        assert_eq!(starts, vec![2, 2, 2]);
    }

    #[test]
    fn intra_line_diff_length_boundary() {
        let short = "x".repeat(MAX_INTRA_LINE_DIFF_STRING_LENGTH - 1);
        let long = "x".repeat(MAX_INTRA_LINE_DIFF_STRING_LENGTH);

        let included = hunk(vec![header(), delete(&short, 1, 1), add(&"y".repeat(MAX_INTRA_LINE_DIFF_STRING_LENGTH - 1), 1, 2)]);
        let rows = diff_rows_from_hunk(0, &included, SIDE_BY_SIDE).unwrap();
        let DiffRow::Modified { before_data, after_data, .. } = &rows[1] else {
            panic!("expected a modified row");
        };
        assert_eq!(before_data.tokens.len(), 1);
        assert_eq!(after_data.tokens.len(), 1);

        let excluded = hunk(vec![header(), delete(&long, 1, 1), add(&short, 1, 2)]);
        let rows = diff_rows_from_hunk(0, &excluded, SIDE_BY_SIDE).unwrap();
        let DiffRow::Modified { before_data, after_data, .. } = &rows[1] else {
            panic!("expected a modified row");
        };
        assert!(before_data.tokens.is_empty());
        assert!(after_data.tokens.is_empty());
    }

    #[test]
    fn expansion_disabled_forces_none() {
        let hunk = hunk(vec![header(), add("a", 1, 1)]);
        let options = DiffRowOptions {
            show_side_by_side: false,
            enable_diff_expansion: false,
        };
        let rows = diff_rows_from_hunk(3, &hunk, options).unwrap();

        assert_eq!(
            rows[0],
            DiffRow::Hunk {
                content: "@@ -1 +1 @@".to_string(),
                expansion_type: DiffHunkExpansionType::None,
                hunk_index: 3,
            }
        );
    }

    #[test]
    fn context_row_without_old_number_is_an_error() {
        let broken = DiffLine::new(" ctx", DiffLineKind::Context, Some(1), None, Some(1));
        let hunk = hunk(vec![header(), broken]);

        assert_eq!(
            diff_rows_from_hunk(0, &hunk, UNIFIED),
            Err(DiffRowError::MissingLineNumber {
                kind: DiffLineKind::Context,
                side: "old",
                diff_line_number: 1,
            })
        );
    }

    #[test]
    fn rows_from_parsed_diff_carry_original_line_numbers() {
        let text = "+++ b/f\n@@ -1,2 +1,2 @@\n keep\n-old value\n+new value\n\\ No newline at end of file\n";
        let diff = parse_raw_diff(text).unwrap();
        let rows = diff_rows(&diff.hunks, SIDE_BY_SIDE).unwrap();

        assert_eq!(rows.len(), 3);
        assert!(matches!(
            &rows[1],
            DiffRow::Context { before_line_number: 1, after_line_number: 1, .. }
        ));
        let DiffRow::Modified { before_data, after_data, hunk_start_line } = &rows[2] else {
            panic!("expected a modified row");
        };
        assert_eq!(*hunk_start_line, 2);
        assert_eq!(before_data.diff_line_number, Some(2));
        assert_eq!(after_data.diff_line_number, Some(3));
        assert!(after_data.no_new_line_indicator);
        assert_eq!(after_data.tokens[0].location, 0);
        assert_eq!(after_data.tokens[0].length, 3);
    }
}
