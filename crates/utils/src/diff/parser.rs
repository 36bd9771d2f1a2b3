//! Parser for a single file's unified diff as printed by `git diff` /
//! `git log -p`.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use super::{
    DiffHunk, DiffHunkHeader, DiffLine, DiffLineKind, RawDiff, expansion::hunk_expansion_type,
    has_hidden_bidi_chars, largest_line_number,
};

static HUNK_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("hunk header regex")
});

const NO_NEWLINE_MARKER: &str = "\n\\ No newline at end of file";

/// `\ No newline at end of file` is localized by git but never shorter
/// than this.
const MIN_NO_NEWLINE_MARKER_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiffParseError {
    #[error("expected hunk header but reached end of diff")]
    UnexpectedEnd,
    #[error("invalid hunk header: {0:?}")]
    InvalidHunkHeader(String),
    #[error("malformed diff: empty hunk at {0:?}")]
    EmptyHunk(String),
    #[error("malformed diff: no-newline marker too short: {0:?}")]
    ShortNoNewlineMarker(String),
}

/// Line reader that tracks byte offsets so the header and body can be sliced
/// out of the input without copying line by line.
struct LineCursor<'a> {
    text: &'a str,
    pos: usize,
    /// End offset (exclusive, before the `\n`) of the last line read.
    last_end: usize,
}

impl<'a> LineCursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            last_end: 0,
        }
    }

    fn peek(&self) -> Option<&'a str> {
        if self.pos >= self.text.len() {
            return None;
        }
        let rest = &self.text[self.pos..];
        Some(rest.split('\n').next().unwrap_or(rest))
    }

    fn read_line(&mut self) -> Option<&'a str> {
        let line = self.peek()?;
        self.last_end = self.pos + line.len();
        self.pos = (self.last_end + 1).min(self.text.len());
        if self.last_end == self.text.len() {
            self.pos = self.text.len();
        }
        Some(line)
    }
}

enum HeaderKind {
    Text,
    Binary,
}

fn parse_header(cursor: &mut LineCursor<'_>) -> Option<HeaderKind> {
    while let Some(line) = cursor.read_line() {
        if line.starts_with("Binary files ") && line.ends_with("differ") {
            return Some(HeaderKind::Binary);
        }
        if line.starts_with("+++") {
            return Some(HeaderKind::Text);
        }
    }
    None
}

fn parse_hunk_header(line: &str) -> Result<DiffHunkHeader, DiffParseError> {
    let invalid = || DiffParseError::InvalidHunkHeader(line.to_string());
    let caps = HUNK_HEADER_RE.captures(line).ok_or_else(invalid)?;
    let number = |index: usize, default: Option<u32>| -> Result<u32, DiffParseError> {
        match caps.get(index) {
            Some(m) => m.as_str().parse().map_err(|_| invalid()),
            None => default.ok_or_else(invalid),
        }
    };

    Ok(DiffHunkHeader::new(
        number(1, None)?,
        number(2, Some(1))?,
        number(3, None)?,
        number(4, Some(1))?,
    ))
}

fn parse_hunk(
    cursor: &mut LineCursor<'_>,
    lines_consumed: usize,
    previous: Option<&DiffHunkHeader>,
) -> Result<DiffHunk, DiffParseError> {
    let header_line = cursor.read_line().ok_or(DiffParseError::UnexpectedEnd)?;
    let header = parse_hunk_header(header_line)?;

    let mut lines = vec![DiffLine::new(
        header_line,
        DiffLineKind::Hunk,
        Some(lines_consumed),
        None,
        None,
    )];

    let mut old_line = header.old_start_line;
    let mut new_line = header.new_start_line;
    let mut diff_line_number = lines_consumed;

    while let Some(prefix) = cursor.peek().and_then(|line| line.chars().next()) {
        if !matches!(prefix, '+' | '-' | ' ' | '\\') {
            break;
        }
        let Some(line) = cursor.read_line() else {
            break;
        };

        if prefix == '\\' {
            if line.len() < MIN_NO_NEWLINE_MARKER_LEN {
                return Err(DiffParseError::ShortNoNewlineMarker(line.to_string()));
            }
            if let Some(previous_line) = lines.last_mut() {
                previous_line.no_trailing_newline = true;
            }
            continue;
        }

        diff_line_number += 1;
        let diff_line = match prefix {
            '+' => {
                let line = DiffLine::new(line, DiffLineKind::Add, Some(diff_line_number), None, Some(new_line));
                new_line += 1;
                line
            }
            '-' => {
                let line = DiffLine::new(line, DiffLineKind::Delete, Some(diff_line_number), Some(old_line), None);
                old_line += 1;
                line
            }
            _ => {
                let line = DiffLine::new(
                    line,
                    DiffLineKind::Context,
                    Some(diff_line_number),
                    Some(old_line),
                    Some(new_line),
                );
                old_line += 1;
                new_line += 1;
                line
            }
        };
        lines.push(diff_line);
    }

    if lines.len() == 1 {
        return Err(DiffParseError::EmptyHunk(header_line.to_string()));
    }

    let expansion_type = hunk_expansion_type(&header, previous);
    let end = lines_consumed + lines.len() - 1;
    Ok(DiffHunk::new(header, lines, lines_consumed, end, expansion_type))
}

/// Parse one file's patch.
///
/// Text before the `+++` line is kept verbatim as the header. A
/// `Binary files ... differ` line short-circuits to a binary diff and input
/// without any `+++` line yields an empty diff.
pub fn parse_raw_diff(text: &str) -> Result<RawDiff, DiffParseError> {
    let mut cursor = LineCursor::new(text);
    let header_kind = parse_header(&mut cursor);
    let header_end = cursor.last_end;
    let header = text[..header_end].to_string();

    match header_kind {
        None => {
            return Ok(RawDiff {
                header,
                ..RawDiff::default()
            });
        }
        Some(HeaderKind::Binary) => {
            return Ok(RawDiff {
                header,
                is_binary: true,
                ..RawDiff::default()
            });
        }
        Some(HeaderKind::Text) => {}
    }

    let body_start = cursor.pos;
    let mut hunks: Vec<DiffHunk> = Vec::new();
    let mut lines_consumed = 0;

    while cursor.peek().is_some_and(|line| !line.is_empty()) {
        let hunk = parse_hunk(&mut cursor, lines_consumed, hunks.last().map(|h| &h.header))?;
        lines_consumed += hunk.lines.len();
        hunks.push(hunk);
    }

    let body_end = cursor.last_end.max(body_start);
    let contents = text[body_start..body_end].replace(NO_NEWLINE_MARKER, "");
    let has_hidden_bidi_chars = hunks
        .iter()
        .flat_map(|hunk| hunk.lines.iter())
        .any(|line| has_hidden_bidi_chars(&line.text));

    Ok(RawDiff {
        header,
        contents,
        max_line_number: largest_line_number(&hunks),
        hunks,
        is_binary: false,
        has_hidden_bidi_chars,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffHunkExpansionType;

    const MODIFIED_FILE: &str = "diff --git a/file.txt b/file.txt
index 5716ca5..db3c77d 100644
--- a/file.txt
+++ b/file.txt
@@ -1,3 +1,3 @@
 one
-two
+deux
 three
";

    #[test]
    fn parses_header_and_single_hunk() {
        let diff = parse_raw_diff(MODIFIED_FILE).unwrap();

        assert!(diff.header.starts_with("diff --git"));
        assert!(diff.header.ends_with("+++ b/file.txt"));
        assert_eq!(diff.contents, "@@ -1,3 +1,3 @@\n one\n-two\n+deux\n three");
        assert_eq!(diff.hunks.len(), 1);
        assert!(!diff.is_binary);
        assert_eq!(diff.max_line_number, 3);

        let hunk = &diff.hunks[0];
        assert_eq!(hunk.header, DiffHunkHeader::new(1, 3, 1, 3));
        assert_eq!(hunk.unified_diff_start, 0);
        assert_eq!(hunk.unified_diff_end, 4);
        assert_eq!(hunk.expansion_type, DiffHunkExpansionType::None);

        let kinds: Vec<_> = hunk.lines.iter().map(|l| l.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DiffLineKind::Hunk,
                DiffLineKind::Context,
                DiffLineKind::Delete,
                DiffLineKind::Add,
                DiffLineKind::Context,
            ]
        );

        let deleted = &hunk.lines[2];
        assert_eq!((deleted.old_line_number, deleted.new_line_number), (Some(2), None));
        let added = &hunk.lines[3];
        assert_eq!((added.old_line_number, added.new_line_number), (None, Some(2)));
        let context = &hunk.lines[4];
        assert_eq!((context.old_line_number, context.new_line_number), (Some(3), Some(3)));
    }

    #[test]
    fn original_line_numbers_are_sequential_across_hunks() {
        let text = "--- a/f\n+++ b/f\n@@ -1,2 +1,2 @@\n-a\n+b\n c\n@@ -40,2 +40,3 @@\n x\n+y\n z\n";
        let diff = parse_raw_diff(text).unwrap();

        let numbers: Vec<_> = diff
            .hunks
            .iter()
            .flat_map(|h| h.lines.iter())
            .map(|l| l.original_line_number)
            .collect();
        assert_eq!(numbers, (0..8).map(Some).collect::<Vec<_>>());

        assert_eq!(diff.hunks[1].unified_diff_start, 4);
        assert_eq!(diff.hunks[1].unified_diff_end, 7);
        assert_eq!(diff.hunks[1].expansion_type, DiffHunkExpansionType::Both);
        assert_eq!(diff.max_line_number, 42);
    }

    #[test]
    fn close_hunks_are_short_expansions() {
        let text = "+++ b/f\n@@ -5,2 +5,2 @@\n-a\n+b\n c\n@@ -20,1 +20,2 @@\n x\n+y\n";
        let diff = parse_raw_diff(text).unwrap();

        assert_eq!(diff.hunks[0].expansion_type, DiffHunkExpansionType::Up);
        assert_eq!(diff.hunks[1].expansion_type, DiffHunkExpansionType::Short);
    }

    #[test]
    fn missing_counts_default_to_one() {
        let diff = parse_raw_diff("+++ b/f\n@@ -3 +3 @@\n-a\n+b\n").unwrap();
        assert_eq!(diff.hunks[0].header, DiffHunkHeader::new(3, 1, 3, 1));
    }

    #[test]
    fn no_newline_marker_flags_previous_line() {
        let text = "+++ b/f\n@@ -1 +1 @@\n-a\n\\ No newline at end of file\n+a\n";
        let diff = parse_raw_diff(text).unwrap();
        let lines = &diff.hunks[0].lines;

        assert_eq!(lines.len(), 3);
        assert!(lines[1].no_trailing_newline);
        assert!(!lines[2].no_trailing_newline);
        assert_eq!(lines[2].original_line_number, Some(2));
        assert_eq!(diff.contents, "@@ -1 +1 @@\n-a\n+a");
    }

    #[test]
    fn short_no_newline_marker_is_rejected() {
        let text = "+++ b/f\n@@ -1 +1 @@\n-a\n\\ nope\n";
        assert_eq!(
            parse_raw_diff(text),
            Err(DiffParseError::ShortNoNewlineMarker("\\ nope".to_string()))
        );
    }

    #[test]
    fn empty_hunk_is_malformed() {
        let text = "+++ b/f\n@@ -1 +1 @@\n@@ -3 +3 @@\n-a\n";
        assert!(matches!(parse_raw_diff(text), Err(DiffParseError::EmptyHunk(_))));
    }

    #[test]
    fn garbage_after_header_is_an_invalid_hunk_header() {
        let text = "+++ b/f\nnot a hunk\n";
        assert!(matches!(
            parse_raw_diff(text),
            Err(DiffParseError::InvalidHunkHeader(_))
        ));
    }

    #[test]
    fn binary_marker_short_circuits() {
        let text = "diff --git a/logo.png b/logo.png\nindex 1..2 100644\nBinary files a/logo.png and b/logo.png differ\n";
        let diff = parse_raw_diff(text).unwrap();

        assert!(diff.is_binary);
        assert!(diff.hunks.is_empty());
        assert!(diff.contents.is_empty());
    }

    #[test]
    fn mode_change_without_patch_is_empty() {
        let text = "diff --git a/run.sh b/run.sh\nold mode 100644\nnew mode 100755\n";
        let diff = parse_raw_diff(text).unwrap();

        assert!(!diff.is_binary);
        assert!(diff.hunks.is_empty());
        assert_eq!(diff.max_line_number, 0);
    }

    #[test]
    fn bidi_controls_are_flagged() {
        let text = "+++ b/f\n@@ -1 +1 @@\n-if admin {\n+if \u{202E}admin {\n";
        assert!(parse_raw_diff(text).unwrap().has_hidden_bidi_chars);
        assert!(!parse_raw_diff(MODIFIED_FILE).unwrap().has_hidden_bidi_chars);
    }
}
