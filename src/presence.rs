//! Per-user presence tracking layered over the operation stream.
//!
//! Presence is a secondary channel on the same socket as edits: each
//! `cursor` operation upserts one entry in the table. Entries are
//! seeded from the init snapshot and never expire; the wire models no
//! leave event, so a peer that disconnects simply stops updating.

use std::collections::HashMap;

use crate::protocol::{Operation, PresenceInfo};

/// Color used when a cursor report carries none.
pub const DEFAULT_CURSOR_COLOR: &str = "#000000";

/// One user's transient display state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub user_color: String,
    /// Caret offset in UTF-16 units; the renderer clamps it to the
    /// current text length.
    pub cursor_pos: usize,
}

/// Presence for every user seen during the document session.
///
/// Insertion order is irrelevant. The local user's own reports are
/// stored like any other (the relay may echo them back) but excluded
/// from the rendering view by [`PresenceTable::remote_entries`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceTable {
    entries: HashMap<String, PresenceEntry>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the table from the init snapshot's presence map.
    pub fn from_init(presence: &HashMap<String, PresenceInfo>) -> Self {
        let entries = presence
            .iter()
            .map(|(user_id, info)| {
                (
                    user_id.clone(),
                    PresenceEntry {
                        user_color: info.user_color.clone(),
                        cursor_pos: info.cursor_pos,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Fold a remote cursor report into the table.
    ///
    /// Upserts `entries[source]` with the reported color and position,
    /// falling back to black / offset 0 when the fields are absent.
    /// Non-cursor operations are ignored.
    pub fn merge_cursor(&mut self, op: &Operation) {
        if let Operation::Cursor {
            source,
            cursor_pos,
            user_color,
            ..
        } = op
        {
            self.entries.insert(
                source.clone(),
                PresenceEntry {
                    user_color: user_color
                        .clone()
                        .unwrap_or_else(|| DEFAULT_CURSOR_COLOR.to_string()),
                    cursor_pos: cursor_pos.unwrap_or(0),
                },
            );
        }
    }

    pub fn get(&self, user_id: &str) -> Option<&PresenceEntry> {
        self.entries.get(user_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries for rendering, excluding the local user's own report.
    pub fn remote_entries<'a>(
        &'a self,
        local_user: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a PresenceEntry)> {
        self.entries
            .iter()
            .filter(move |(user_id, _)| user_id.as_str() != local_user)
            .map(|(user_id, entry)| (user_id.as_str(), entry))
    }
}

/// Stable display color derived from a user identifier.
///
/// FNV-1a over the id picks a hue; fixed saturation/lightness keep
/// cursors vivid and legible. The same id always maps to the same
/// color across sessions and machines.
pub fn color_for_user(user_id: &str) -> String {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in user_id.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    let hue = (hash % 360) as f32 / 360.0;
    let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.5);
    format!(
        "#{:02x}{:02x}{:02x}",
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8
    )
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}
