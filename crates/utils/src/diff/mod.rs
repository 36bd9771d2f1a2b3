//! Unified diff model shared by the parser, the row engine and hunk expansion.
//!
//! A [`RawDiff`] is produced once per diff request and never mutated; hunk
//! expansion builds a new [`RawDiff`] with a new hunk list.

mod changed_range;
pub mod expansion;
mod parser;
pub mod rows;
pub mod selection;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

pub use changed_range::{ChangedRange, RelativeChanges, relative_changes};
pub use parser::{DiffParseError, parse_raw_diff};
pub use rows::{
    DiffRow, DiffRowData, DiffRowError, DiffRowOptions, LineToken,
    MAX_INTRA_LINE_DIFF_STRING_LENGTH, diff_rows, diff_rows_from_hunk,
};
pub use selection::{DiffSelection, DiffSelectionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum DiffLineKind {
    Context,
    Add,
    Delete,
    Hunk,
}

/// One line of a unified diff, including its one-character prefix in `text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct DiffLine {
    pub kind: DiffLineKind,
    pub text: String,
    pub old_line_number: Option<u32>,
    pub new_line_number: Option<u32>,
    /// Index of the line in the unexpanded diff stream. `None` for context
    /// lines synthesized by hunk expansion.
    pub original_line_number: Option<usize>,
    pub no_trailing_newline: bool,
}

impl DiffLine {
    pub fn new(
        text: impl Into<String>,
        kind: DiffLineKind,
        original_line_number: Option<usize>,
        old_line_number: Option<u32>,
        new_line_number: Option<u32>,
    ) -> Self {
        Self {
            kind,
            text: text.into(),
            old_line_number,
            new_line_number,
            original_line_number,
            no_trailing_newline: false,
        }
    }

    /// The line text without its diff prefix (`+`, `-`, or a space).
    pub fn content(&self) -> &str {
        let mut chars = self.text.chars();
        chars.next();
        chars.as_str()
    }

    pub fn with_no_trailing_newline(mut self, no_trailing_newline: bool) -> Self {
        self.no_trailing_newline = no_trailing_newline;
        self
    }

    /// Added and deleted lines are the only ones a partial commit can include.
    pub fn is_includeable(&self) -> bool {
        matches!(self.kind, DiffLineKind::Add | DiffLineKind::Delete)
    }
}

/// The parsed `@@ -a,b +c,d @@` header of a hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct DiffHunkHeader {
    pub old_start_line: u32,
    pub old_line_count: u32,
    pub new_start_line: u32,
    pub new_line_count: u32,
}

impl DiffHunkHeader {
    pub fn new(
        old_start_line: u32,
        old_line_count: u32,
        new_start_line: u32,
        new_line_count: u32,
    ) -> Self {
        Self {
            old_start_line,
            old_line_count,
            new_start_line,
            new_line_count,
        }
    }

    pub fn to_diff_line_representation(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start_line, self.old_line_count, self.new_start_line, self.new_line_count
        )
    }
}

/// How a hunk header can reveal more context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum DiffHunkExpansionType {
    /// Nothing left to reveal.
    None,
    /// Only the first hunk expands up exclusively.
    Up,
    /// Only the bottom placeholder hunk expands down exclusively.
    Down,
    Both,
    /// The gap to the previous hunk is small enough to reveal in one step.
    Short,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct DiffHunk {
    pub header: DiffHunkHeader,
    pub lines: Vec<DiffLine>,
    /// Position of the hunk header line in the (possibly expanded) diff stream.
    pub unified_diff_start: usize,
    /// Position of the last line of the hunk in the diff stream.
    pub unified_diff_end: usize,
    pub expansion_type: DiffHunkExpansionType,
}

impl DiffHunk {
    pub fn new(
        header: DiffHunkHeader,
        lines: Vec<DiffLine>,
        unified_diff_start: usize,
        unified_diff_end: usize,
        expansion_type: DiffHunkExpansionType,
    ) -> Self {
        Self {
            header,
            lines,
            unified_diff_start,
            unified_diff_end,
            expansion_type,
        }
    }
}

/// A parsed single-file patch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
pub struct RawDiff {
    /// Everything before the first hunk (`diff --git`, `index`, `---`, `+++`).
    pub header: String,
    /// The hunk text with `\ No newline at end of file` markers removed.
    pub contents: String,
    pub hunks: Vec<DiffHunk>,
    pub is_binary: bool,
    pub max_line_number: u32,
    pub has_hidden_bidi_chars: bool,
}

/// Largest old or new line number across all hunks, used for gutter sizing.
pub fn largest_line_number(hunks: &[DiffHunk]) -> u32 {
    hunks
        .iter()
        .flat_map(|hunk| hunk.lines.iter())
        .flat_map(|line| [line.old_line_number, line.new_line_number])
        .flatten()
        .max()
        .unwrap_or(0)
}

/// Unicode bidirectional embedding/override (U+202A..U+202E) and isolate
/// (U+2066..U+2069) controls that can make source text render differently
/// from how it is compiled.
pub fn has_hidden_bidi_chars(text: &str) -> bool {
    text.chars()
        .any(|c| matches!(c, '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_strips_prefix() {
        let line = DiffLine::new("+hello", DiffLineKind::Add, Some(1), None, Some(1));
        assert_eq!(line.content(), "hello");

        let line = DiffLine::new("-ñandú", DiffLineKind::Delete, Some(2), Some(1), None);
        assert_eq!(line.content(), "ñandú");
    }

    #[test]
    fn detects_bidi_override_and_isolates() {
        assert!(has_hidden_bidi_chars("let access = \u{202E}admin"));
        assert!(has_hidden_bidi_chars("\u{2066}isolate\u{2069}"));
        assert!(!has_hidden_bidi_chars("plain text with ünïcode"));
    }

    #[test]
    fn header_representation() {
        let header = DiffHunkHeader::new(3, 4, 5, 6);
        assert_eq!(header.to_diff_line_representation(), "@@ -3,4 +5,6 @@");
    }
}
