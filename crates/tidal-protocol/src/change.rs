//! Change events delivered over a push subscription.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// A row was created.
    Insert,
    /// A row was modified.
    Update,
    /// A row was removed.
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A change to one row.
///
/// Inserts and updates carry the new row; deletes carry the old row.
/// Rows are left raw so that a malformed event can still be delivered
/// and rejected by the receiver rather than by the decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Change kind.
    pub kind: ChangeKind,
    /// Row after the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
    /// Row before the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
}

impl ChangeEvent {
    /// Create an insert event.
    #[must_use]
    pub fn insert(row: Value) -> Self {
        Self {
            kind: ChangeKind::Insert,
            new: Some(row),
            old: None,
        }
    }

    /// Create an update event.
    #[must_use]
    pub fn update(row: Value) -> Self {
        Self {
            kind: ChangeKind::Update,
            new: Some(row),
            old: None,
        }
    }

    /// Create a delete event.
    #[must_use]
    pub fn delete(old: Value) -> Self {
        Self {
            kind: ChangeKind::Delete,
            new: None,
            old: Some(old),
        }
    }

    /// The row this event is about.
    ///
    /// Deletes prefer the old row and fall back to the new one.
    #[must_use]
    pub fn row(&self) -> Option<&Value> {
        match self.kind {
            ChangeKind::Delete => self.old.as_ref().or(self.new.as_ref()),
            ChangeKind::Insert | ChangeKind::Update => self.new.as_ref(),
        }
    }

    /// Consume the event, returning the row it is about.
    #[must_use]
    pub fn into_row(self) -> Option<Value> {
        match self.kind {
            ChangeKind::Delete => self.old.or(self.new),
            ChangeKind::Insert | ChangeKind::Update => self.new,
        }
    }
}
