//! Event system for the reconciliation pipeline.
//!
//! # Event Flow
//!
//! 1. `Envelope` (fan-in) -> `EventClassifier`
//! 2. `EventClassifier` emits `PredictiveEvent` / `SettlementEvent` /
//!    `LocalPrediction` on the broadcast streams
//! 3. `StateMediator` consumes the streams and emits `DomainNotification`
//! 4. `ViewSession`s consume the streams and reconcile displayed rows
//!
//! Unrecognized envelopes degrade to a `RefreshHint` rather than an error,
//! so protocol drift between sender and client costs snappiness, not
//! correctness.

pub mod channels;
pub mod types;

pub use channels::{
    CommandReceiver, CommandSender, CoreStreams, DEFAULT_CHANNEL_BUFFER, DEFAULT_STREAM_CAPACITY,
    EnvelopeReceiver, EnvelopeSender, ImmediateReceiver, ImmediateSender, NotificationReceiver,
    NotificationSender, PredictiveReceiver, PredictiveSender, RefreshReceiver, RefreshSender,
    SettlementReceiver, SettlementSender, command_channel, envelope_channel, notification_channel,
};

pub use types::{
    ChannelName, ClassifierCommand, ConfirmSource, ConfirmedUpdate, DomainAction,
    DomainNotification, Envelope, LocalPrediction, PredictiveEvent, PredictiveRecord, RefreshHint,
    RefreshReason, Rollback, RollbackReason, ScannedTag, SettlementEvent, TagId, Tier,
    TransactionId,
};
