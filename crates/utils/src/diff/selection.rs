use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::DiffLine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum DiffSelectionType {
    All,
    Partial,
    None,
}

impl DiffSelectionType {
    fn matches(self, selected: bool) -> bool {
        matches!(
            (self, selected),
            (DiffSelectionType::All, true) | (DiffSelectionType::None, false)
        )
    }
}

/// Which diff lines of a working-directory file are included in the next
/// commit.
///
/// Stored as a default (`All` or `None`) plus the set of lines that diverge
/// from it, so selecting or clearing a whole file is O(1). Line indices are
/// `original_line_number`s of the unexpanded diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct DiffSelection {
    default_selection_type: DiffSelectionType,
    diverging_lines: BTreeSet<usize>,
    /// `None` means every line is selectable (e.g. before the diff was loaded).
    selectable_lines: Option<BTreeSet<usize>>,
}

impl Default for DiffSelection {
    fn default() -> Self {
        Self::all()
    }
}

impl DiffSelection {
    pub fn all() -> Self {
        Self::with_default(DiffSelectionType::All)
    }

    pub fn none() -> Self {
        Self::with_default(DiffSelectionType::None)
    }

    pub fn from_initial(selected: bool) -> Self {
        if selected { Self::all() } else { Self::none() }
    }

    fn with_default(default_selection_type: DiffSelectionType) -> Self {
        Self {
            default_selection_type,
            diverging_lines: BTreeSet::new(),
            selectable_lines: None,
        }
    }

    pub fn selection_type(&self) -> DiffSelectionType {
        if self.diverging_lines.is_empty() {
            return self.default_selection_type;
        }

        if let Some(selectable) = &self.selectable_lines
            && selectable.is_subset(&self.diverging_lines)
        {
            return match self.default_selection_type {
                DiffSelectionType::All => DiffSelectionType::None,
                _ => DiffSelectionType::All,
            };
        }

        DiffSelectionType::Partial
    }

    pub fn is_selected(&self, line: usize) -> bool {
        let diverging = self.diverging_lines.contains(&line);
        match self.default_selection_type {
            DiffSelectionType::All => !diverging,
            _ => diverging,
        }
    }

    pub fn is_selectable(&self, line: usize) -> bool {
        self.selectable_lines
            .as_ref()
            .is_none_or(|selectable| selectable.contains(&line))
    }

    pub fn with_line_selection(&self, line: usize, selected: bool) -> Self {
        self.with_range_selection(line, 1, selected)
    }

    /// Select or deselect `length` lines starting at `from`. Lines that are
    /// not selectable are left alone.
    pub fn with_range_selection(&self, from: usize, length: usize, selected: bool) -> Self {
        let current = self.selection_type();
        if current.matches(selected) {
            return self.clone();
        }

        let range = from..from.saturating_add(length);

        if current == DiffSelectionType::Partial {
            let mut diverging = self.diverging_lines.clone();
            if self.default_selection_type.matches(selected) {
                for line in range {
                    diverging.remove(&line);
                }
            } else {
                diverging.extend(range.filter(|line| self.is_selectable(*line)));
            }
            return Self {
                default_selection_type: self.default_selection_type,
                diverging_lines: diverging,
                selectable_lines: self.selectable_lines.clone(),
            };
        }

        Self {
            default_selection_type: current,
            diverging_lines: range.filter(|line| self.is_selectable(*line)).collect(),
            selectable_lines: self.selectable_lines.clone(),
        }
    }

    pub fn with_toggle_line_selection(&self, line: usize) -> Self {
        self.with_line_selection(line, !self.is_selected(line))
    }

    pub fn with_select_all(&self) -> Self {
        Self {
            selectable_lines: self.selectable_lines.clone(),
            ..Self::all()
        }
    }

    pub fn with_select_none(&self) -> Self {
        Self {
            selectable_lines: self.selectable_lines.clone(),
            ..Self::none()
        }
    }

    /// Restrict selection to the given lines, dropping divergences on lines
    /// that can no longer be selected.
    pub fn with_selectable_lines(&self, selectable: BTreeSet<usize>) -> Self {
        let diverging_lines = self
            .diverging_lines
            .intersection(&selectable)
            .copied()
            .collect();
        Self {
            default_selection_type: self.default_selection_type,
            diverging_lines,
            selectable_lines: Some(selectable),
        }
    }

    /// Selectable lines as used for a diff whose includeable lines are known.
    pub fn for_diff_lines<'a>(
        &self,
        lines: impl IntoIterator<Item = &'a DiffLine>,
    ) -> Self {
        let selectable = lines
            .into_iter()
            .filter(|line| line.is_includeable())
            .filter_map(|line| line.original_line_number)
            .collect();
        self.with_selectable_lines(selectable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selectable(lines: &[usize]) -> DiffSelection {
        DiffSelection::all().with_selectable_lines(lines.iter().copied().collect())
    }

    #[test]
    fn deselecting_one_line_makes_selection_partial() {
        let selection = selectable(&[1, 2, 3]).with_line_selection(2, false);

        assert_eq!(selection.selection_type(), DiffSelectionType::Partial);
        assert!(selection.is_selected(1));
        assert!(!selection.is_selected(2));
    }

    #[test]
    fn deselecting_every_selectable_line_is_none() {
        let selection = selectable(&[1, 2, 3]).with_range_selection(0, 5, false);
        assert_eq!(selection.selection_type(), DiffSelectionType::None);

        let reselected = selection.with_line_selection(3, true);
        assert_eq!(reselected.selection_type(), DiffSelectionType::Partial);
        assert!(reselected.is_selected(3));
        assert!(!reselected.is_selected(1));
    }

    #[test]
    fn unselectable_lines_are_ignored() {
        let selection = selectable(&[4]).with_line_selection(7, false);
        assert_eq!(selection.selection_type(), DiffSelectionType::All);
        assert!(!selection.is_selectable(7));
    }

    #[test]
    fn toggle_round_trips() {
        let selection = selectable(&[1, 2]);
        let toggled = selection.with_toggle_line_selection(1);
        assert!(!toggled.is_selected(1));
        assert_eq!(toggled.with_toggle_line_selection(1).selection_type(), DiffSelectionType::All);
    }

    #[test]
    fn select_all_and_none_keep_selectable_lines() {
        let selection = selectable(&[1, 2]).with_line_selection(1, false);

        let none = selection.with_select_none();
        assert_eq!(none.selection_type(), DiffSelectionType::None);
        assert!(!none.is_selectable(9));

        assert_eq!(none.with_select_all().selection_type(), DiffSelectionType::All);
    }

    #[test]
    fn narrowing_selectable_lines_drops_stale_divergences() {
        let selection = DiffSelection::none()
            .with_line_selection(1, true)
            .with_line_selection(5, true);
        let narrowed = selection.with_selectable_lines([1, 2].into_iter().collect());

        assert!(narrowed.is_selected(1));
        assert!(!narrowed.is_selected(5));
        assert_eq!(narrowed.selection_type(), DiffSelectionType::Partial);
    }
}
