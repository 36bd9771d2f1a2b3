//! Revealing unchanged lines around hunks.
//!
//! Expansion never mutates a [`RawDiff`]; it returns a new one whose hunks
//! may have been merged. Lines it inserts have no `original_line_number`, so
//! partial-commit bookkeeping that refers to the unexpanded diff stays valid.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::{
    DiffHunk, DiffHunkExpansionType, DiffHunkHeader, DiffLine, DiffLineKind, RawDiff,
    has_hidden_bidi_chars, largest_line_number,
};

/// Lines revealed per click, and the largest gap between two hunks that is
/// revealed in one go.
pub const DEFAULT_DIFF_EXPANSION_STEP: u32 = 20;

const DUMMY_HUNK_TEXT: &str = "@@ @@";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionDirection {
    Up,
    Down,
}

/// The placeholder appended below the last hunk so the end of the file can
/// be revealed.
pub fn is_dummy_hunk(hunk: &DiffHunk) -> bool {
    hunk.lines.len() == 1
        && hunk.lines[0].kind == DiffLineKind::Hunk
        && hunk.header.old_line_count == 0
        && hunk.header.new_line_count == 0
}

pub(crate) fn hunk_expansion_type(
    header: &DiffHunkHeader,
    previous: Option<&DiffHunkHeader>,
) -> DiffHunkExpansionType {
    match previous {
        None if header.old_start_line > 1 && header.new_start_line > 1 => DiffHunkExpansionType::Up,
        None => DiffHunkExpansionType::None,
        Some(previous) => {
            let gap = i64::from(header.old_start_line)
                - i64::from(previous.old_start_line)
                - i64::from(previous.old_line_count);
            if gap <= i64::from(DEFAULT_DIFF_EXPANSION_STEP) {
                DiffHunkExpansionType::Short
            } else {
                DiffHunkExpansionType::Both
            }
        }
    }
}

/// Half-open `[begin, end)` span a header covers on one side of the diff.
///
/// A zero count means the start names the line *before* the change, so the
/// span begins one line later.
fn span(start: u32, count: u32) -> (u32, u32) {
    let begin = if count == 0 { start + 1 } else { start };
    (begin, begin + count)
}

fn new_span(header: &DiffHunkHeader) -> (u32, u32) {
    span(header.new_start_line, header.new_line_count)
}

fn old_span(header: &DiffHunkHeader) -> (u32, u32) {
    span(header.old_start_line, header.old_line_count)
}

/// Reveal up to [`DEFAULT_DIFF_EXPANSION_STEP`] lines above or below a hunk.
///
/// `new_content_lines` are the lines of the new version of the file. When
/// the revealed lines close the gap to the neighbouring hunk the two are
/// merged. Expanding the bottom placeholder grows the last hunk downwards.
/// Returns `None` when there is nothing left to reveal.
pub fn expand_hunk<S: AsRef<str>>(
    diff: &RawDiff,
    hunk_index: usize,
    direction: ExpansionDirection,
    new_content_lines: &[S],
) -> Option<RawDiff> {
    expand_hunk_by(
        diff,
        hunk_index,
        direction,
        DEFAULT_DIFF_EXPANSION_STEP,
        new_content_lines,
    )
}

/// Expand every gap so the diff covers the whole file.
pub fn expand_whole<S: AsRef<str>>(diff: &RawDiff, new_content_lines: &[S]) -> Option<RawDiff> {
    let step = u32::try_from(new_content_lines.len()).unwrap_or(u32::MAX);
    let mut current = diff.clone();
    let mut expanded = false;

    if let Some(up) = expand_hunk_by(&current, 0, ExpansionDirection::Up, step, new_content_lines) {
        current = up;
        expanded = true;
    }

    let mut index = 0;
    loop {
        let real_hunks = current.hunks.iter().filter(|h| !is_dummy_hunk(h)).count();
        if index >= real_hunks {
            break;
        }
        match expand_hunk_by(&current, index, ExpansionDirection::Down, step, new_content_lines) {
            Some(next) => {
                current = next;
                expanded = true;
            }
            None => index += 1,
        }
    }

    expanded.then_some(current)
}

/// Append the bottom placeholder when lines remain below the last hunk.
/// Any existing placeholder is replaced.
pub fn with_bottom_dummy_hunk(diff: &RawDiff, new_line_count: usize) -> RawDiff {
    let hunks: Vec<DiffHunk> = diff.hunks.iter().filter(|h| !is_dummy_hunk(h)).cloned().collect();
    RawDiff {
        hunks: finish_hunks(hunks, true, new_line_count),
        ..diff.clone()
    }
}

fn bottom_dummy_hunk(last: &DiffHunk, new_line_count: usize) -> Option<DiffHunk> {
    let (_, old_end) = old_span(&last.header);
    let (_, new_end) = new_span(&last.header);
    if new_end as usize > new_line_count {
        return None;
    }
    let header = DiffHunkHeader::new(old_end, 0, new_end, 0);
    let line = DiffLine::new(DUMMY_HUNK_TEXT, DiffLineKind::Hunk, None, None, None);
    Some(DiffHunk::new(header, vec![line], 0, 0, DiffHunkExpansionType::Down))
}

fn expand_hunk_by<S: AsRef<str>>(
    diff: &RawDiff,
    hunk_index: usize,
    direction: ExpansionDirection,
    step: u32,
    new_content_lines: &[S],
) -> Option<RawDiff> {
    let target = diff.hunks.get(hunk_index)?;
    let mut hunks: Vec<DiffHunk> = diff.hunks.iter().filter(|h| !is_dummy_hunk(h)).cloned().collect();
    let had_dummy = hunks.len() != diff.hunks.len();

    let (index, direction) = if is_dummy_hunk(target) {
        (hunks.len().checked_sub(1)?, ExpansionDirection::Down)
    } else {
        (hunk_index, direction)
    };

    let header = hunks.get(index)?.header;
    let total = u32::try_from(new_content_lines.len()).unwrap_or(u32::MAX);
    let (new_begin, new_end) = new_span(&header);
    let (old_begin, old_end) = old_span(&header);

    // `from..to` are new-side line numbers; `offset` maps them to the old side.
    let (from, to, offset, merge_with) = match direction {
        ExpansionDirection::Up => {
            let limit = match index.checked_sub(1) {
                Some(previous) => new_span(&hunks[previous].header).1,
                None => 1,
            };
            let from = new_begin.saturating_sub(step).max(limit);
            let merge = index.checked_sub(1).filter(|_| from == limit);
            (from, new_begin, i64::from(old_begin) - i64::from(new_begin), merge)
        }
        ExpansionDirection::Down => {
            let next = index + 1;
            let limit = hunks
                .get(next)
                .map_or(total.saturating_add(1), |h| new_span(&h.header).0);
            let to = new_end.saturating_add(step).min(limit);
            let merge = (next < hunks.len() && to == limit).then_some(next);
            (new_end, to, i64::from(old_end) - i64::from(new_end), merge)
        }
    };

    let revealed: Vec<DiffLine> = (from..to)
        .map_while(|new_line| {
            let text = new_content_lines.get(new_line.checked_sub(1)? as usize)?;
            let old_line = u32::try_from(i64::from(new_line) + offset).ok()?;
            Some(DiffLine::new(
                format!(" {}", text.as_ref()),
                DiffLineKind::Context,
                None,
                Some(old_line),
                Some(new_line),
            ))
        })
        .collect();

    if revealed.is_empty() {
        return None;
    }
    let count = revealed.len() as u32;

    let expanded = {
        let hunk = &hunks[index];
        let mut lines = Vec::with_capacity(hunk.lines.len() + revealed.len());
        let header = match direction {
            ExpansionDirection::Up => {
                lines.push(hunk.lines[0].clone());
                lines.extend(revealed);
                lines.extend(hunk.lines[1..].iter().cloned());
                DiffHunkHeader::new(
                    old_begin - count,
                    header.old_line_count + count,
                    new_begin - count,
                    header.new_line_count + count,
                )
            }
            ExpansionDirection::Down => {
                lines.extend(hunk.lines.iter().cloned());
                lines.extend(revealed);
                DiffHunkHeader::new(
                    old_begin,
                    header.old_line_count + count,
                    new_begin,
                    header.new_line_count + count,
                )
            }
        };
        DiffHunk::new(header, lines, 0, 0, hunk.expansion_type)
    };

    match merge_with {
        Some(adjacent) if adjacent < index => {
            hunks[adjacent] = merge_hunks(&hunks[adjacent], &expanded);
            hunks.remove(index);
        }
        Some(adjacent) => {
            hunks[index] = merge_hunks(&expanded, &hunks[adjacent]);
            hunks.remove(adjacent);
        }
        None => hunks[index] = expanded,
    }

    let hunks = finish_hunks(hunks, had_dummy, new_content_lines.len());
    let contents = hunks
        .iter()
        .filter(|h| !is_dummy_hunk(h))
        .flat_map(|h| h.lines.iter().map(|l| l.text.as_str()))
        .collect::<Vec<_>>()
        .join("\n");

    Some(RawDiff {
        header: diff.header.clone(),
        contents,
        max_line_number: largest_line_number(&hunks),
        has_hidden_bidi_chars: hunks
            .iter()
            .flat_map(|h| h.lines.iter())
            .any(|l| has_hidden_bidi_chars(&l.text)),
        hunks,
        is_binary: diff.is_binary,
    })
}

fn merge_hunks(first: &DiffHunk, second: &DiffHunk) -> DiffHunk {
    let (old_begin, _) = old_span(&first.header);
    let (new_begin, _) = new_span(&first.header);
    let header = DiffHunkHeader::new(
        old_begin,
        first.header.old_line_count + second.header.old_line_count,
        new_begin,
        first.header.new_line_count + second.header.new_line_count,
    );

    let mut lines = first.lines.clone();
    lines.extend(second.lines.iter().skip(1).cloned());
    DiffHunk::new(header, lines, 0, 0, first.expansion_type)
}

/// Refresh header text, stream positions and expansion types after the hunk
/// list changed, optionally re-adding the bottom placeholder.
fn finish_hunks(mut hunks: Vec<DiffHunk>, add_dummy: bool, new_line_count: usize) -> Vec<DiffHunk> {
    if add_dummy && let Some(dummy) = hunks.last().and_then(|last| bottom_dummy_hunk(last, new_line_count)) {
        hunks.push(dummy);
    }

    let mut position = 0;
    let mut previous: Option<DiffHunkHeader> = None;
    for hunk in &mut hunks {
        hunk.unified_diff_start = position;
        hunk.unified_diff_end = position + hunk.lines.len() - 1;
        position += hunk.lines.len();

        if is_dummy_hunk(hunk) {
            hunk.expansion_type = DiffHunkExpansionType::Down;
            continue;
        }
        if let Some(first) = hunk.lines.first_mut() {
            first.text = hunk.header.to_diff_line_representation();
        }
        hunk.expansion_type = hunk_expansion_type(&hunk.header, previous.as_ref());
        previous = Some(hunk.header);
    }
    hunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::parse_raw_diff;

    fn new_file(lines: u32) -> Vec<String> {
        (1..=lines).map(|i| format!("line{i}")).collect()
    }

    const TWO_HUNKS: &str = "+++ b/f\n@@ -2,3 +2,3 @@\n line2\n-old3\n+line3\n line4\n@@ -10,3 +10,3 @@\n line10\n-old11\n+line11\n line12\n";

    #[test]
    fn expanding_up_reveals_one_step() {
        let diff = parse_raw_diff("+++ b/f\n@@ -25,3 +25,3 @@\n line25\n-old26\n+line26\n line27\n").unwrap();
        let expanded = expand_hunk(&diff, 0, ExpansionDirection::Up, &new_file(30)).unwrap();

        let hunk = &expanded.hunks[0];
        assert_eq!(hunk.header, DiffHunkHeader::new(5, 23, 5, 23));
        assert_eq!(hunk.lines[0].text, "@@ -5,23 +5,23 @@");
        assert_eq!(
            hunk.lines[1],
            DiffLine::new(" line5", DiffLineKind::Context, None, Some(5), Some(5))
        );
        assert_eq!(hunk.lines.len(), 25);
        assert_eq!(hunk.unified_diff_end, 24);
        assert_eq!(hunk.expansion_type, DiffHunkExpansionType::Up);

        // The input is left untouched.
        assert_eq!(diff.hunks[0].header, DiffHunkHeader::new(25, 3, 25, 3));
    }

    #[test]
    fn closing_the_gap_merges_hunks() {
        let diff = parse_raw_diff(TWO_HUNKS).unwrap();
        let expanded = expand_hunk(&diff, 1, ExpansionDirection::Up, &new_file(30)).unwrap();

        assert_eq!(expanded.hunks.len(), 1);
        let hunk = &expanded.hunks[0];
        assert_eq!(hunk.header, DiffHunkHeader::new(2, 11, 2, 11));
        assert_eq!(hunk.lines.len(), 14);
        assert_eq!(hunk.unified_diff_start, 0);
        assert_eq!(hunk.unified_diff_end, 13);

        let added = hunk
            .lines
            .iter()
            .find(|l| l.text == "+line11")
            .unwrap();
        assert_eq!(added.original_line_number, Some(8));
        assert!(expanded.contents.contains("\n line7\n"));
    }

    #[test]
    fn old_line_numbers_follow_the_hunk_offset() {
        // One line inserted at 3, so old numbers below it lag new ones by one.
        let diff = parse_raw_diff("+++ b/f\n@@ -2,2 +2,3 @@\n line2\n+line3\n line4\n").unwrap();
        let expanded = expand_hunk(&diff, 0, ExpansionDirection::Down, &new_file(10)).unwrap();

        let last = expanded.hunks[0].lines.last().unwrap();
        assert_eq!(last.text, " line10");
        assert_eq!(last.new_line_number, Some(10));
        assert_eq!(last.old_line_number, Some(9));
        assert_eq!(expanded.hunks[0].header, DiffHunkHeader::new(2, 8, 2, 9));
    }

    #[test]
    fn bottom_placeholder_grows_last_hunk_until_eof() {
        let diff = parse_raw_diff("+++ b/f\n@@ -1,3 +1,3 @@\n-old1\n+line1\n line2\n line3\n").unwrap();
        let content = new_file(30);

        let diff = with_bottom_dummy_hunk(&diff, content.len());
        assert_eq!(diff.hunks.len(), 2);
        let dummy = &diff.hunks[1];
        assert!(is_dummy_hunk(dummy));
        assert_eq!(dummy.header, DiffHunkHeader::new(4, 0, 4, 0));
        assert_eq!(dummy.expansion_type, DiffHunkExpansionType::Down);
        assert_eq!(dummy.unified_diff_start, 5);

        let once = expand_hunk(&diff, 1, ExpansionDirection::Down, &content).unwrap();
        assert_eq!(once.hunks.len(), 2);
        assert_eq!(once.hunks[0].header, DiffHunkHeader::new(1, 23, 1, 23));
        assert_eq!(once.hunks[1].header, DiffHunkHeader::new(24, 0, 24, 0));

        let twice = expand_hunk(&once, 1, ExpansionDirection::Down, &content).unwrap();
        assert_eq!(twice.hunks.len(), 1);
        assert_eq!(twice.hunks[0].header, DiffHunkHeader::new(1, 30, 1, 30));
        assert!(!twice.contents.contains("@@ @@"));

        assert!(expand_hunk(&twice, 0, ExpansionDirection::Down, &content).is_none());
    }

    #[test]
    fn nothing_to_reveal_returns_none() {
        let diff = parse_raw_diff("+++ b/f\n@@ -1,2 +1,2 @@\n-old1\n+line1\n line2\n").unwrap();

        assert!(expand_hunk(&diff, 0, ExpansionDirection::Up, &new_file(2)).is_none());
        assert!(expand_hunk(&diff, 0, ExpansionDirection::Down, &new_file(2)).is_none());
        assert!(expand_hunk(&diff, 7, ExpansionDirection::Up, &new_file(2)).is_none());
    }

    #[test]
    fn expand_whole_covers_the_file() {
        let diff = parse_raw_diff(TWO_HUNKS).unwrap();
        let whole = expand_whole(&diff, &new_file(30)).unwrap();

        assert_eq!(whole.hunks.len(), 1);
        let hunk = &whole.hunks[0];
        assert_eq!(hunk.header, DiffHunkHeader::new(1, 30, 1, 30));
        assert_eq!(hunk.lines.len(), 33);
        assert_eq!(hunk.expansion_type, DiffHunkExpansionType::None);
        assert_eq!(whole.max_line_number, 30);
    }
}
