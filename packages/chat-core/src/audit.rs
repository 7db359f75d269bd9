//! Append-only audit log of chat traffic, exportable as JSON.
//!
//! `LIST_USERS`/`LIST_GROUPS` are deliberately never recorded here even
//! though they do count against the rate limiter -- an intentional
//! asymmetry carried over from the source implementation (SPEC_FULL.md §9).

use serde::{Deserialize, Serialize};

/// Direction of a logged message relative to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Received,
    Sent,
}

/// One audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub client_id: String,
    pub client_name: String,
    pub direction: Direction,
    pub message: String,
}

/// The in-memory audit list. Guarded by the registry's own lock discipline;
/// this type itself is a plain `Vec` wrapper so it stays trivially testable.
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: AuditEntry) {
        self.entries.push(entry);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    /// Serializes the whole log as a pretty JSON array, per §6.
    ///
    /// # Errors
    ///
    /// Returns an error only if an entry somehow fails to serialize, which
    /// cannot happen for this plain-data struct under normal use.
    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.entries)
    }
}
