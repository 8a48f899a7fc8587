//! Immutable document text snapshots and remote-operation application.
//!
//! Positions on the wire count UTF-16 code units, so a snapshot keeps
//! the text pre-decoded as units instead of re-encoding on every
//! operation. Application is total: a stale or malformed operation
//! degrades to the identity, never to an error, because the relay
//! gives no ordering or causality guarantee.

use crate::protocol::Operation;

/// The full document text at one instant.
///
/// Owned exclusively by the session controller and replaced wholesale
/// on every local or remote mutation, so diffs are always computed
/// against a known-consistent old value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextSnapshot {
    units: Vec<u16>,
}

impl TextSnapshot {
    /// Snapshot the given text.
    pub fn new(text: &str) -> Self {
        Self {
            units: text.encode_utf16().collect(),
        }
    }

    /// Length in UTF-16 code units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub(crate) fn units(&self) -> &[u16] {
        &self.units
    }

    /// Render back to a string. An edit boundary that split a
    /// surrogate pair decodes as U+FFFD rather than failing.
    pub fn to_text(&self) -> String {
        String::from_utf16_lossy(&self.units)
    }

    /// Splice `value` in at `position`, producing the next snapshot.
    ///
    /// A position outside `[0, len]` is a no-op: the remote buffer may
    /// reference an offset this replica has already moved past, and
    /// dropping the operation beats corrupting the text.
    pub fn with_insert(&self, position: usize, value: &str) -> TextSnapshot {
        if position > self.units.len() {
            return self.clone();
        }
        let mut units = Vec::with_capacity(self.units.len() + value.len());
        units.extend_from_slice(&self.units[..position]);
        units.extend(value.encode_utf16());
        units.extend_from_slice(&self.units[position..]);
        TextSnapshot { units }
    }

    /// Remove `len` units starting at `position`, producing the next
    /// snapshot. Positions outside `[0, len-1]` are a no-op; a span
    /// running past the end is clamped.
    pub fn with_delete(&self, position: usize, len: usize) -> TextSnapshot {
        if position >= self.units.len() {
            return self.clone();
        }
        let end = position.saturating_add(len).min(self.units.len());
        let mut units = Vec::with_capacity(self.units.len() - (end - position));
        units.extend_from_slice(&self.units[..position]);
        units.extend_from_slice(&self.units[end..]);
        TextSnapshot { units }
    }
}

impl From<&str> for TextSnapshot {
    fn from(text: &str) -> Self {
        TextSnapshot::new(text)
    }
}

impl std::fmt::Display for TextSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// Apply a remote operation to `text`, returning the next snapshot.
///
/// Cursor operations never touch the text. Deletes without a carried
/// value remove a single unit.
pub fn apply_operation(text: &TextSnapshot, op: &Operation) -> TextSnapshot {
    match op {
        Operation::Insert { position, value, .. } => text.with_insert(*position, value),
        Operation::Delete { position, value, .. } => {
            let len = value
                .as_ref()
                .map(|v| v.encode_utf16().count())
                .unwrap_or(1);
            text.with_delete(*position, len)
        }
        Operation::Cursor { .. } => text.clone(),
    }
}
