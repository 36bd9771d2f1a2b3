//! Custom `--format` strings whose output can be split back into records.
//!
//! Fields are separated by ASCII unit separator and records terminated by
//! ASCII record separator. Neither byte shows up in commit messages or ref
//! names in practice, which keeps parsing positional.
use std::sync::Arc;

use thiserror::Error;

pub const FIELD_DELIMITER: char = '\u{1f}';
pub const RECORD_DELIMITER: char = '\u{1e}';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DelimitedParseError {
    #[error("record {index} has {actual} fields, expected {expected}")]
    FieldCount {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

/// How a git command spells the delimiter bytes in its format string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `git log` / pretty formats: `%x1f`.
    Log,
    /// `git for-each-ref`: `%1f`.
    ForEachRef,
}

impl Dialect {
    fn field_placeholder(self) -> &'static str {
        match self {
            Dialect::Log => "%x1f",
            Dialect::ForEachRef => "%1f",
        }
    }

    fn record_placeholder(self) -> &'static str {
        match self {
            Dialect::Log => "%x1e",
            Dialect::ForEachRef => "%1e",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DelimitedFormat {
    names: Arc<[&'static str]>,
    placeholders: Vec<&'static str>,
    dialect: Dialect,
}

impl DelimitedFormat {
    /// `fields` is an ordered list of `(name, placeholder)` pairs.
    pub fn new(dialect: Dialect, fields: &[(&'static str, &'static str)]) -> Self {
        Self {
            names: fields.iter().map(|(name, _)| *name).collect(),
            placeholders: fields.iter().map(|(_, placeholder)| *placeholder).collect(),
            dialect,
        }
    }

    pub fn log(fields: &[(&'static str, &'static str)]) -> Self {
        Self::new(Dialect::Log, fields)
    }

    pub fn for_each_ref(fields: &[(&'static str, &'static str)]) -> Self {
        Self::new(Dialect::ForEachRef, fields)
    }

    pub fn format_arg(&self) -> String {
        format!(
            "--format={}{}",
            self.placeholders.join(self.dialect.field_placeholder()),
            self.dialect.record_placeholder()
        )
    }

    pub fn parse(&self, stdout: &str) -> Result<Vec<DelimitedRecord>, DelimitedParseError> {
        let mut records = Vec::new();
        let mut pieces = stdout.split(RECORD_DELIMITER).enumerate().peekable();

        while let Some((position, piece)) = pieces.next() {
            // Whatever follows the final delimiter is git's line terminator.
            if pieces.peek().is_none() && piece.trim().is_empty() {
                break;
            }
            // Git separates records with a newline, so only later records
            // start with one that is not part of the first field.
            let piece = match position {
                0 => piece,
                _ => piece.strip_prefix('\n').unwrap_or(piece),
            };
            let values: Vec<String> = piece.split(FIELD_DELIMITER).map(str::to_string).collect();

            if values.len() != self.names.len() {
                return Err(DelimitedParseError::FieldCount {
                    index: records.len(),
                    expected: self.names.len(),
                    actual: values.len(),
                });
            }

            records.push(DelimitedRecord {
                names: Arc::clone(&self.names),
                values,
            });
        }

        Ok(records)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelimitedRecord {
    names: Arc<[&'static str]>,
    values: Vec<String>,
}

impl DelimitedRecord {
    /// Value of a named field. Unknown names read as empty.
    pub fn get(&self, name: &str) -> &str {
        self.names
            .iter()
            .position(|n| *n == name)
            .and_then(|idx| self.values.get(idx))
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn take(&mut self, name: &str) -> String {
        self.names
            .iter()
            .position(|n| *n == name)
            .and_then(|idx| self.values.get_mut(idx))
            .map(std::mem::take)
            .unwrap_or_default()
    }
}
