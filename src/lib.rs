//! # cowrite — real-time collaborative plain-text sync client
//!
//! Synchronizes a shared plain-text document across concurrent editors
//! over a persistent websocket connection. Local edits become compact
//! insert/delete operations; remote operations are applied to the
//! local buffer; per-user cursor position and color ride the same
//! channel as a presence layer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐      JSON over WS      ┌─────────────┐
//! │ SessionController │ ◄────────────────────► │ sync relay  │
//! │   (per client)    │   init + operations    │ (external)  │
//! └───┬──────────┬───┘                         └─────────────┘
//!     │          │
//!     ▼          ▼
//! ┌──────────┐ ┌───────────────┐
//! │ diff /   │ │ PresenceTable │
//! │ apply    │ │ (cursors)     │
//! └──────────┘ └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire protocol (init snapshot + operation stream)
//! - [`document`] — UTF-16 text snapshots and remote-operation application
//! - [`diff`] — prefix/suffix diff producing at most delete+insert
//! - [`presence`] — per-user cursor/color table
//! - [`session`] — connection lifecycle, pending queue, event stream
//!
//! ## Convergence caveat
//!
//! Operations are applied positionally in arrival order, with no
//! operational-transform rebasing and no CRDT position identifiers.
//! Concurrent edits converge only when neither shifts the other's
//! target offset; overlapping concurrent edits can silently diverge
//! across replicas. See `DESIGN.md`.

pub mod diff;
pub mod document;
pub mod presence;
pub mod protocol;
pub mod session;

pub use diff::diff;
pub use document::{apply_operation, TextSnapshot};
pub use presence::{color_for_user, PresenceEntry, PresenceTable, DEFAULT_CURSOR_COLOR};
pub use protocol::{DocumentState, Operation, PresenceInfo, ProtocolError, ServerMessage};
pub use session::{
    PendingQueue, SessionConfig, SessionController, SessionEvent, SessionState,
};
