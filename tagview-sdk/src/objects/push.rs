//! Push channel contract.
//!
//! The console server fans events out over a small set of named logical
//! channels. Delivery is at-least-once, unordered, and best-effort: a
//! dropped message is never retried, because authoritative state is always
//! reachable through the search API.
//!
//! # Channels
//!
//! - [`channel_names::PRIORITY`] – highest-priority scan events.
//! - [`channel_names::BROADCAST`] – global state-change notifications.
//! - `scanner:{id}` – per-scanner event feed (see [`scanner_channel`]).
//! - [`channel_names::REGISTRATIONS`] – new-unit registration events.
//!
//! # Message shape
//!
//! Every channel delivers JSON objects of the same loose shape:
//!
//! ```json
//! {"action":"RFID_DETECTED_URGENT","rfid":"TAG1","_sentAt":1733140200123}
//! ```
//!
//! `action` is always present. `transactionId` correlates a message with an
//! in-flight optimistic mutation. `_sentAt` is the sender's wall clock in
//! epoch milliseconds, used only for latency diagnostics. Everything else
//! is a domain field and is carried through untouched.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Well-known wire channel names.
pub mod channel_names {
    /// Highest-priority scan events (strong visual emphasis downstream).
    pub const PRIORITY: &str = "console:priority";

    /// Global broadcast of plain state-change notifications.
    pub const BROADCAST: &str = "console:broadcast";

    /// New-unit registration events.
    pub const REGISTRATIONS: &str = "console:registrations";

    /// Prefix for per-scanner channels (`scanner:{id}`).
    pub const SCANNER_PREFIX: &str = "scanner:";
}

/// Build the wire name of a per-scanner channel.
pub fn scanner_channel(scanner_id: &str) -> CompactString {
    let mut name = CompactString::new(channel_names::SCANNER_PREFIX);
    name.push_str(scanner_id);
    name
}

/// Well-known action names carried in the `action` field.
///
/// Senders are free to introduce new actions at any time; consumers must
/// degrade unrecognized actions to a generic re-query rather than fail.
pub mod actions {
    /// A tag was read at a scanner, flagged highest-priority.
    pub const RFID_DETECTED_URGENT: &str = "RFID_DETECTED_URGENT";
    /// A tag was read at a scanner.
    pub const RFID_DETECTED: &str = "RFID_DETECTED";
    /// A registration is in flight on the server (speculative).
    pub const UNIT_REGISTERING: &str = "UNIT_REGISTERING";
    /// A registration was persisted (finalized).
    pub const UNIT_REGISTERED_CONFIRMED: &str = "UNIT_REGISTERED_CONFIRMED";
    /// A registration event on the registrations channel (finalized).
    pub const UNIT_REGISTERED: &str = "UNIT_REGISTERED";
    /// A location move is in flight on the server (speculative).
    pub const LOCATION_UPDATING: &str = "LOCATION_UPDATING";
    /// A unit's location changed (plain state-change notification).
    pub const LOCATION_CHANGED: &str = "LOCATION_CHANGED";
    /// A unit was removed (plain state-change notification).
    pub const UNIT_DELETED: &str = "UNIT_DELETED";
}

/// Well-known domain field names carried in push message bodies.
pub mod fields {
    /// The RFID tag id (natural key). Primary spelling.
    pub const RFID: &str = "rfid";
    /// The RFID tag id, alternate spelling used by some senders.
    pub const TAG_ID: &str = "tagId";
    /// Scanner that produced the event.
    pub const SCANNER_ID: &str = "scannerId";
    /// Location name attached to a move or registration.
    pub const LOCATION: &str = "location";
    /// Best-guess location attached to a raw scan.
    pub const LOCATION_HINT: &str = "locationHint";
    /// Human-assigned unit code.
    pub const UNIT_CODE: &str = "unitCode";
}

/// A raw push message as delivered on any channel.
///
/// Only the correlation and timing fields are lifted out; all domain fields
/// stay in [`fields`](RawPushMessage::fields) so the message survives
/// protocol additions the client does not know about yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPushMessage {
    /// Action name, e.g. `RFID_DETECTED`.
    pub action: CompactString,

    /// Correlation key for optimistic mutations, when the server issued one.
    #[serde(rename = "transactionId", skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<CompactString>,

    /// Sender wall clock in epoch milliseconds, when embedded.
    #[serde(rename = "_sentAt", skip_serializing_if = "Option::is_none")]
    pub sent_at_millis: Option<i64>,

    /// All remaining domain fields, untouched.
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Client-to-server WebSocket frame.
///
/// Serialized as an internally-tagged JSON object:
///
/// ```json
/// {"type":"subscribe","channel":"scanner:dock-3"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsClientFrame {
    /// Start receiving messages published on `channel`.
    Subscribe {
        /// Wire channel name.
        channel: CompactString,
    },
    /// Stop receiving messages published on `channel`.
    Unsubscribe {
        /// Wire channel name.
        channel: CompactString,
    },
}

/// Server-to-client WebSocket frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsServerFrame {
    /// A message published on a subscribed channel.
    Event {
        /// Wire channel name the message arrived on.
        channel: CompactString,
        /// The raw message body.
        message: RawPushMessage,
    },

    /// A server-side error that does not close the connection by itself.
    Error {
        /// Human-readable reason.
        reason: String,
    },
}
