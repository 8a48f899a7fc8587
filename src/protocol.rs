//! JSON wire protocol shared with the sync relay.
//!
//! Two shapes travel over the socket: the one-time `init` document
//! snapshot sent by the relay when a client joins, and the recurring
//! operation stream (`insert` / `delete` / `cursor`).
//!
//! Wire format (JSON, field names normative):
//! ```text
//! {"type":"init",   "docId":…, "text":…, "presence":{userId:{…}}}
//! {"type":"insert", "docId":…, "position":…, "value":…, "operationId":…, "source":…, "timestamp":…}
//! {"type":"delete", "docId":…, "position":…, "value":…, "operationId":…, "source":…, "timestamp":…}
//! {"type":"cursor", "docId":…, "position":0, "operationId":…, "source":…, "timestamp":…, "cursorPos":…, "userColor":…}
//! ```
//!
//! Unknown fields are ignored on decode so the format stays
//! forward-extensible. `position` counts UTF-16 code units into the
//! pre-operation text.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// A single edit or presence event exchanged with the relay.
///
/// Closed sum type tagged by `type` on the wire. Exactly one kind of
/// payload is meaningful per variant; serde enforces the required
/// fields of each kind at the decode boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Operation {
    /// Splice `value` into the text at `position`.
    Insert {
        #[serde(rename = "docId")]
        doc_id: String,
        position: usize,
        value: String,
        #[serde(rename = "operationId")]
        operation_id: String,
        source: String,
        timestamp: u64,
    },
    /// Remove the substring at `position`.
    ///
    /// `value` carries the removed text; its UTF-16 length (not its
    /// content) drives the removal. A missing value means a span of 1.
    Delete {
        #[serde(rename = "docId")]
        doc_id: String,
        position: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        #[serde(rename = "operationId")]
        operation_id: String,
        source: String,
        timestamp: u64,
    },
    /// Presence report: where `source`'s caret is and what color to
    /// render it with. `position` is meaningless here but kept on the
    /// wire for envelope uniformity.
    Cursor {
        #[serde(rename = "docId")]
        doc_id: String,
        #[serde(default)]
        position: usize,
        #[serde(rename = "operationId")]
        operation_id: String,
        source: String,
        timestamp: u64,
        #[serde(rename = "cursorPos", default, skip_serializing_if = "Option::is_none")]
        cursor_pos: Option<usize>,
        #[serde(rename = "userColor", default, skip_serializing_if = "Option::is_none")]
        user_color: Option<String>,
    },
}

impl Operation {
    /// Create an insert operation with a fresh id and send timestamp.
    pub fn insert(doc_id: &str, position: usize, value: impl Into<String>, source: &str) -> Self {
        Operation::Insert {
            doc_id: doc_id.to_string(),
            position,
            value: value.into(),
            operation_id: Uuid::new_v4().to_string(),
            source: source.to_string(),
            timestamp: now_millis(),
        }
    }

    /// Create a delete operation carrying the removed substring.
    pub fn delete(doc_id: &str, position: usize, value: impl Into<String>, source: &str) -> Self {
        Operation::Delete {
            doc_id: doc_id.to_string(),
            position,
            value: Some(value.into()),
            operation_id: Uuid::new_v4().to_string(),
            source: source.to_string(),
            timestamp: now_millis(),
        }
    }

    /// Create a cursor presence report.
    pub fn cursor(doc_id: &str, source: &str, cursor_pos: usize, user_color: &str) -> Self {
        Operation::Cursor {
            doc_id: doc_id.to_string(),
            position: 0,
            operation_id: Uuid::new_v4().to_string(),
            source: source.to_string(),
            timestamp: now_millis(),
            cursor_pos: Some(cursor_pos),
            user_color: Some(user_color.to_string()),
        }
    }

    /// Target document identifier.
    pub fn doc_id(&self) -> &str {
        match self {
            Operation::Insert { doc_id, .. }
            | Operation::Delete { doc_id, .. }
            | Operation::Cursor { doc_id, .. } => doc_id,
        }
    }

    /// Originating user identifier.
    pub fn source(&self) -> &str {
        match self {
            Operation::Insert { source, .. }
            | Operation::Delete { source, .. }
            | Operation::Cursor { source, .. } => source,
        }
    }

    /// Globally unique operation identifier (dedup/tracing only).
    pub fn operation_id(&self) -> &str {
        match self {
            Operation::Insert { operation_id, .. }
            | Operation::Delete { operation_id, .. }
            | Operation::Cursor { operation_id, .. } => operation_id,
        }
    }

    /// Origin-side send time in milliseconds since epoch. Advisory
    /// only; never used for ordering decisions.
    pub fn timestamp(&self) -> u64 {
        match self {
            Operation::Insert { timestamp, .. }
            | Operation::Delete { timestamp, .. }
            | Operation::Cursor { timestamp, .. } => *timestamp,
        }
    }

    /// Serialize to a JSON wire frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }
}

/// One user's presence entry inside the init snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceInfo {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "userColor")]
    pub user_color: String,
    #[serde(rename = "cursorPos", default)]
    pub cursor_pos: usize,
}

/// Full document snapshot, delivered once when a client (re)joins.
///
/// Establishes the baseline the diff engine and operation applier work
/// against for the rest of the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentState {
    #[serde(rename = "docId")]
    pub doc_id: String,
    pub text: String,
    #[serde(default)]
    pub presence: HashMap<String, PresenceInfo>,
}

/// Any message the relay can deliver.
///
/// Untagged at this level: an operation frame always carries
/// `operationId`/`source` and an init frame always carries
/// `text`/`presence`, so the two never overlap.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Op(Operation),
    Init(DocumentState),
}

impl ServerMessage {
    /// Deserialize a JSON wire frame.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Protocol and session errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectionClosed,
    QueueFull,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::QueueFull => write!(f, "Pending operation queue full"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Milliseconds since the Unix epoch, saturating to 0 before it.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
