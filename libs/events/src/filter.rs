//! Action ignore-set.

use std::collections::HashSet;

use crate::actions;

/// Set of actions suppressed before fan-out.
///
/// An entry is a prefix: `exec_start` drops `exec_start: sh -c true`, and
/// `exec` drops every exec lifecycle action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreSet {
    entries: HashSet<String>,
}

impl IgnoreSet {
    /// Creates an ignore-set from explicit entries. Blank entries are skipped.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = entries
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self { entries }
    }

    /// Parses a comma-separated list such as `exec_create,exec_start`.
    pub fn from_csv(csv: &str) -> Self {
        Self::new(csv.split(','))
    }

    /// The set used when nothing is configured.
    pub fn with_defaults() -> Self {
        Self::new(actions::DEFAULT_IGNORED.iter())
    }

    /// Returns true if events with this action must be dropped.
    pub fn matches(&self, action: &str) -> bool {
        self.entries.iter().any(|entry| action.starts_with(entry.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in sorted order.
    pub fn entries(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.entries.iter().map(String::as_str).collect();
        out.sort_unstable();
        out
    }
}
