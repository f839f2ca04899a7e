//! Event channel factories and handles.
//!
//! Point-to-point legs (fan-in → classifier, command API → classifier) use
//! bounded mpsc channels. Fan-out legs (the streams views subscribe to) use
//! broadcast channels with ordered delivery to each current subscriber.

use super::types::{
    ClassifierCommand, DomainNotification, Envelope, LocalPrediction, PredictiveEvent, RefreshHint,
    SettlementEvent,
};
use tokio::sync::{broadcast, mpsc};

/// Default buffer size for point-to-point event channels.
///
/// Enough to absorb bursts from several scanners while keeping memory
/// bounded.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Default capacity for the fan-out broadcast streams.
///
/// A subscriber that falls further behind than this observes a lag error
/// and recovers by re-querying authoritative state.
pub const DEFAULT_STREAM_CAPACITY: usize = 256;

/// Sender handle for normalized envelopes (fan-in → classifier).
pub type EnvelopeSender = mpsc::Sender<Envelope>;
/// Receiver handle for normalized envelopes.
pub type EnvelopeReceiver = mpsc::Receiver<Envelope>;

/// Sender handle for classifier commands (predict/confirm/cancel).
pub type CommandSender = mpsc::Sender<ClassifierCommand>;
/// Receiver handle for classifier commands.
pub type CommandReceiver = mpsc::Receiver<ClassifierCommand>;

/// Sender handle for push-sourced predictive events.
pub type PredictiveSender = broadcast::Sender<PredictiveEvent>;
/// Receiver handle for push-sourced predictive events.
pub type PredictiveReceiver = broadcast::Receiver<PredictiveEvent>;

/// Sender handle for settlements (confirms and rollbacks).
pub type SettlementSender = broadcast::Sender<SettlementEvent>;
/// Receiver handle for settlements.
pub type SettlementReceiver = broadcast::Receiver<SettlementEvent>;

/// Sender handle for locally-initiated predictions.
pub type ImmediateSender = broadcast::Sender<LocalPrediction>;
/// Receiver handle for locally-initiated predictions.
pub type ImmediateReceiver = broadcast::Receiver<LocalPrediction>;

/// Sender handle for stale-data refresh hints.
pub type RefreshSender = broadcast::Sender<RefreshHint>;
/// Receiver handle for stale-data refresh hints.
pub type RefreshReceiver = broadcast::Receiver<RefreshHint>;

/// Sender handle for typed domain notifications.
pub type NotificationSender = broadcast::Sender<DomainNotification>;
/// Receiver handle for typed domain notifications.
pub type NotificationReceiver = broadcast::Receiver<DomainNotification>;

/// Create a new envelope channel (fan-in → classifier).
pub fn envelope_channel() -> (EnvelopeSender, EnvelopeReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Create a new classifier command channel.
pub fn command_channel() -> (CommandSender, CommandReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Create a new domain notification channel.
pub fn notification_channel() -> NotificationSender {
    broadcast::channel(DEFAULT_STREAM_CAPACITY).0
}

/// The three outbound streams plus the refresh broadcast.
///
/// This is the only interface the rest of the application consumes. Clone
/// is cheap; all senders are handles to the same underlying channels.
#[derive(Clone)]
pub struct CoreStreams {
    /// Push-sourced speculative events.
    pub predictive: PredictiveSender,
    /// Confirms and rollbacks.
    pub settlement: SettlementSender,
    /// Locally-initiated predictions.
    pub immediate: ImmediateSender,
    /// "Data may be stale, re-query" hints.
    pub refresh: RefreshSender,
}

impl CoreStreams {
    /// Create the streams with the given broadcast capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            predictive: broadcast::channel(capacity).0,
            settlement: broadcast::channel(capacity).0,
            immediate: broadcast::channel(capacity).0,
            refresh: broadcast::channel(capacity).0,
        }
    }

    /// Create the streams with [`DEFAULT_STREAM_CAPACITY`].
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_STREAM_CAPACITY)
    }

    /// Subscribe to push-sourced predictive events.
    pub fn subscribe_predictive(&self) -> PredictiveReceiver {
        self.predictive.subscribe()
    }

    /// Subscribe to settlements.
    pub fn subscribe_settlement(&self) -> SettlementReceiver {
        self.settlement.subscribe()
    }

    /// Subscribe to locally-initiated predictions.
    pub fn subscribe_immediate(&self) -> ImmediateReceiver {
        self.immediate.subscribe()
    }

    /// Subscribe to refresh hints.
    pub fn subscribe_refresh(&self) -> RefreshReceiver {
        self.refresh.subscribe()
    }
}

impl Default for CoreStreams {
    fn default() -> Self {
        Self::new()
    }
}
