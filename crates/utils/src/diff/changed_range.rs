use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// A byte range inside a line, always on `char` boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
pub struct ChangedRange {
    pub location: usize,
    pub length: usize,
}

impl ChangedRange {
    pub fn end(&self) -> usize {
        self.location + self.length
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelativeChanges {
    pub before: ChangedRange,
    pub after: ChangedRange,
}

/// Trim the longest common prefix and then the longest common suffix of two
/// strings and return what is left of each as byte ranges.
///
/// The suffix is only searched in what remains after the prefix, so the two
/// never overlap (`"aaa"` vs `"aa"` yields an empty `after` at offset 2).
pub fn relative_changes(before: &str, after: &str) -> RelativeChanges {
    let before_chars: Vec<(usize, char)> = before.char_indices().collect();
    let after_chars: Vec<(usize, char)> = after.char_indices().collect();

    let prefix = before_chars
        .iter()
        .zip(after_chars.iter())
        .take_while(|((_, a), (_, b))| a == b)
        .count();

    let before_rest = &before_chars[prefix..];
    let after_rest = &after_chars[prefix..];

    let suffix = before_rest
        .iter()
        .rev()
        .zip(after_rest.iter().rev())
        .take_while(|((_, a), (_, b))| a == b)
        .count();

    RelativeChanges {
        before: byte_range(before, &before_chars, prefix, before_chars.len() - suffix),
        after: byte_range(after, &after_chars, prefix, after_chars.len() - suffix),
    }
}

fn byte_range(text: &str, chars: &[(usize, char)], start: usize, end: usize) -> ChangedRange {
    let offset = |index: usize| chars.get(index).map_or(text.len(), |(byte, _)| *byte);
    let location = offset(start);
    ChangedRange {
        location,
        length: offset(end) - location,
    }
}
