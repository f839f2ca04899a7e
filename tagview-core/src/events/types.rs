//! Event type definitions for the reconciliation pipeline.
//!
//! Envelopes flow one way: fan-in → classifier → streams → views. Events
//! carry the natural key (the RFID tag id) so that independent channels
//! reporting the same physical event can be collapsed downstream, and an
//! optional transaction id so optimistic mutations can be settled.

use compact_str::{CompactString, ToCompactString};
use serde_json::{Map, Value};
use tagview_sdk::objects::push::{channel_names, fields, scanner_channel};
use time::OffsetDateTime;
use uuid::Uuid;

/// The natural key of a physical unit: its RFID tag id.
///
/// Used to correlate events that lack a transaction id and to deduplicate
/// across channels that redundantly report the same physical event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagId(CompactString);

impl TagId {
    pub fn new(id: impl Into<CompactString>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TagId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TagId {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

/// Opaque correlation key for an in-flight transaction.
///
/// Either server-issued (travels with the envelope) or client-generated at
/// the moment of optimistic intent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionId(CompactString);

impl TransactionId {
    pub fn new(id: impl Into<CompactString>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh client-side transaction id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().simple().to_compact_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

/// A logical push channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelName {
    /// Highest-priority scan events.
    Priority,
    /// Global state-change broadcast.
    Broadcast,
    /// One physical scanner's feed.
    Scanner(CompactString),
    /// New-unit registration events.
    Registrations,
}

impl ChannelName {
    /// The wire name used on the push transport.
    pub fn wire(&self) -> CompactString {
        match self {
            ChannelName::Priority => channel_names::PRIORITY.into(),
            ChannelName::Broadcast => channel_names::BROADCAST.into(),
            ChannelName::Scanner(id) => scanner_channel(id),
            ChannelName::Registrations => channel_names::REGISTRATIONS.into(),
        }
    }

    /// Parse a wire channel name. Returns `None` for unknown names.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            channel_names::PRIORITY => Some(ChannelName::Priority),
            channel_names::BROADCAST => Some(ChannelName::Broadcast),
            channel_names::REGISTRATIONS => Some(ChannelName::Registrations),
            other => other
                .strip_prefix(channel_names::SCANNER_PREFIX)
                .filter(|id| !id.is_empty())
                .map(|id| ChannelName::Scanner(id.into())),
        }
    }
}

impl std::fmt::Display for ChannelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.wire())
    }
}

/// A normalized push message. Immutable once created.
///
/// `sent_at` is sender-supplied wall-clock time; `received_at` is stamped
/// locally on arrival. The difference is a diagnostic only and never an
/// ordering authority.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Channel the message arrived on.
    pub channel: ChannelName,
    /// Raw action name as sent, e.g. `RFID_DETECTED`.
    pub raw_action: CompactString,
    /// Correlation key, when the sender issued one.
    pub transaction_id: Option<TransactionId>,
    /// Domain fields, untouched.
    pub payload: Map<String, Value>,
    /// Sender wall clock, when embedded in the message.
    pub sent_at: Option<OffsetDateTime>,
    /// Local arrival time.
    pub received_at: OffsetDateTime,
}

impl Envelope {
    /// Measured one-way latency, clamped at zero for clock skew.
    ///
    /// `None` when the sender did not embed a send time.
    pub fn latency(&self) -> Option<time::Duration> {
        let sent_at = self.sent_at?;
        let delta = self.received_at - sent_at;
        Some(delta.max(time::Duration::ZERO))
    }

    /// The natural key, read from the payload's known tag-id fields.
    pub fn natural_key(&self) -> Option<TagId> {
        [fields::RFID, fields::TAG_ID]
            .iter()
            .find_map(|name| self.payload.get(*name))
            .and_then(Value::as_str)
            .map(TagId::from)
    }
}

/// Classification tier of an envelope. First match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Speculative, flagged highest-priority by the sender.
    UrgentPredictive,
    /// Speculative / in-flight.
    Predictive,
    /// Finalized by the server.
    Confirmed,
    /// Plain state-change with no predictive counterpart.
    Regular,
}

/// The domain meaning of an event, independent of its tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainAction {
    /// A tag was read at a scanner.
    ScanDetected,
    /// A unit was (or is being) registered.
    UnitRegistered,
    /// A unit's location changed (or is changing).
    LocationChanged,
    /// A unit was removed.
    UnitRemoved,
}

/// A locally-synthesized, not-yet-authoritative record.
///
/// Ownership of the *claim* on a record's natural key lives in the claim
/// table, never on copies of this struct handed to views.
#[derive(Debug, Clone)]
pub struct PredictiveRecord {
    /// Natural key of the physical unit.
    pub natural_key: TagId,
    /// Correlation key, when one exists.
    pub transaction_id: Option<TransactionId>,
    /// Domain meaning.
    pub action: DomainAction,
    /// Speculative field values.
    pub fields: Map<String, Value>,
}

/// A push-sourced speculative event, emitted on the predictive stream.
#[derive(Debug, Clone)]
pub struct PredictiveEvent {
    pub record: PredictiveRecord,
    /// Sender flagged this highest-priority.
    pub urgent: bool,
    /// Channel the triggering envelope arrived on.
    pub channel: ChannelName,
    /// When the physical event happened: the sender's clock when embedded,
    /// else local arrival time.
    pub occurred_at: OffsetDateTime,
}

/// A locally-initiated speculative event, emitted on the immediate stream.
///
/// Distinct from [`PredictiveEvent`] so UI can tell "I caused this" from
/// "someone else's scanner caused this".
#[derive(Debug, Clone)]
pub struct LocalPrediction {
    pub record: PredictiveRecord,
}

/// Where a confirmed update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmSource {
    /// A push channel delivered it.
    Push,
    /// The local REST round-trip completed.
    Rest,
    /// An authoritative re-query contained it.
    Requery,
}

/// An authoritative update. Transient, consumed once.
#[derive(Debug, Clone)]
pub struct ConfirmedUpdate {
    /// Natural key of the physical unit.
    pub natural_key: TagId,
    /// Correlation key, when the confirm carried one.
    pub transaction_id: Option<TransactionId>,
    /// Domain meaning.
    pub action: DomainAction,
    /// Authoritative field values.
    pub fields: Map<String, Value>,
    /// Whether a matching pending prediction existed and was settled.
    pub was_predicted: bool,
    /// Delivery path.
    pub source: ConfirmSource,
}

/// Why a pending prediction was rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackReason {
    /// No confirmation arrived within the TTL.
    Timeout,
    /// The server rejected the mutation.
    Rejected {
        /// Server-provided failure message, surfaced to the user unchanged.
        message: String,
    },
}

impl std::fmt::Display for RollbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollbackReason::Timeout => f.write_str("timeout"),
            RollbackReason::Rejected { message } => f.write_str(message),
        }
    }
}

/// Notification that a pending prediction was withdrawn.
#[derive(Debug, Clone)]
pub struct Rollback {
    pub natural_key: TagId,
    pub transaction_id: TransactionId,
    pub reason: RollbackReason,
}

/// Resolution of a physical event, emitted on the settlement stream.
///
/// Confirmations and rollbacks share one stream so every subscriber sees
/// resolutions in a single order per receiver.
#[derive(Debug, Clone)]
pub enum SettlementEvent {
    Confirmed(ConfirmedUpdate),
    RolledBack(Rollback),
}

impl SettlementEvent {
    /// Natural key the settlement applies to.
    pub fn natural_key(&self) -> &TagId {
        match self {
            SettlementEvent::Confirmed(update) => &update.natural_key,
            SettlementEvent::RolledBack(rollback) => &rollback.natural_key,
        }
    }
}

/// Why listing screens should re-issue their authoritative query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshReason {
    /// A mutation succeeded somewhere; pages may be stale.
    Mutation,
    /// An unrecognized action arrived; re-query instead of interpreting it.
    UnknownAction(CompactString),
}

/// Broadcast telling listing screens their data may be stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshHint {
    pub reason: RefreshReason,
}

/// The single-slot "latest scan" value.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedTag {
    /// Tag that was read.
    pub tag_id: TagId,
    /// Scanner that read it, when known.
    pub scanner_id: Option<CompactString>,
    /// Best-guess location, when the scanner reported one.
    pub location_hint: Option<String>,
    /// When the scan happened (sender clock when embedded, else arrival).
    pub occurred_at: OffsetDateTime,
}

/// Typed domain notifications produced by the mediator.
#[derive(Debug, Clone)]
pub enum DomainNotification {
    /// A tag was read at a scanner.
    ScanDetected(ScannedTag),
    /// A unit registration became authoritative.
    UnitRegistered {
        tag_id: TagId,
        unit_code: Option<CompactString>,
    },
    /// A unit's location became authoritative.
    LocationChanged { tag_id: TagId, location: Option<String> },
    /// A unit was removed.
    UnitRemoved { tag_id: TagId },
}

/// Commands into the classifier's transaction table.
///
/// Sent over a command channel so table mutation stays on the classifier
/// task and each command is atomic with respect to envelope handling.
#[derive(Debug)]
pub enum ClassifierCommand {
    /// Client-initiated optimistic entry point.
    Predict { record: PredictiveRecord },
    /// Resolve a transaction with server-returned field values.
    Confirm {
        transaction_id: TransactionId,
        action: DomainAction,
        fields: Map<String, Value>,
    },
    /// Withdraw a transaction.
    Cancel {
        transaction_id: TransactionId,
        natural_key: TagId,
        reason: RollbackReason,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope_at(sent_millis: Option<i64>, received_millis: i64) -> Envelope {
        let received_at = OffsetDateTime::from_unix_timestamp_nanos(
            i128::from(received_millis) * 1_000_000,
        )
        .expect("valid timestamp");
        let sent_at = sent_millis.map(|ms| {
            OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
                .expect("valid timestamp")
        });
        Envelope {
            channel: ChannelName::Broadcast,
            raw_action: "RFID_DETECTED".into(),
            transaction_id: None,
            payload: Map::new(),
            sent_at,
            received_at,
        }
    }

    #[test]
    fn test_latency_measured_from_send_time() {
        let env = envelope_at(Some(1_000), 1_008);
        assert_eq!(env.latency(), Some(time::Duration::milliseconds(8)));
    }

    #[test]
    fn test_latency_absent_without_send_time() {
        assert_eq!(envelope_at(None, 1_008).latency(), None);
    }

    #[test]
    fn test_latency_clamped_on_clock_skew() {
        let env = envelope_at(Some(2_000), 1_000);
        assert_eq!(env.latency(), Some(time::Duration::ZERO));
    }

    #[test]
    fn test_natural_key_spellings() {
        let mut env = envelope_at(None, 0);
        assert_eq!(env.natural_key(), None);

        env.payload
            .insert("tagId".to_owned(), Value::String("TAG7".to_owned()));
        assert_eq!(env.natural_key(), Some(TagId::from("TAG7")));

        // The primary spelling wins over the alternate.
        env.payload
            .insert("rfid".to_owned(), Value::String("TAG1".to_owned()));
        assert_eq!(env.natural_key(), Some(TagId::from("TAG1")));
    }

    #[test]
    fn test_channel_wire_round_trip() {
        for channel in [
            ChannelName::Priority,
            ChannelName::Broadcast,
            ChannelName::Scanner("dock-3".into()),
            ChannelName::Registrations,
        ] {
            assert_eq!(ChannelName::from_wire(&channel.wire()), Some(channel));
        }
        assert_eq!(ChannelName::from_wire("scanner:"), None);
        assert_eq!(ChannelName::from_wire("nonsense"), None);
    }

    #[test]
    fn test_generated_transaction_ids_are_unique() {
        let a = TransactionId::generate();
        let b = TransactionId::generate();
        assert_ne!(a, b);
    }
}
