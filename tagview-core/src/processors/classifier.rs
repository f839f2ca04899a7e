//! Event classifier and router.
//!
//! The classifier is responsible for:
//! - Deciding what tier each [`Envelope`] belongs to (first match wins:
//!   urgent-predictive, predictive, confirmed, regular)
//! - Maintaining the table of in-flight transactions
//! - Fanning classified events out on the predictive / settlement /
//!   immediate broadcast streams
//! - Serving the predict / confirm / cancel command API
//! - Sweeping pending entries past their TTL into timeout rollbacks
//!
//! The classifier is a single task owning its table: one envelope or one
//! command is handled to completion before the next, so handling is atomic
//! with respect to other envelopes. No cross-channel ordering is assumed;
//! a confirm always settles its prediction regardless of arrival order,
//! and a confirm with no matching prediction is still emitted.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{Map, Value};
use tagview_sdk::objects::push::{actions, fields};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::CoreConfig;
use crate::events::{
    ClassifierCommand, CommandReceiver, CommandSender, ConfirmSource, ConfirmedUpdate, CoreStreams,
    DomainAction, Envelope, EnvelopeReceiver, LocalPrediction, PredictiveEvent, PredictiveRecord,
    RefreshHint, RefreshReason, Rollback, RollbackReason, SettlementEvent, TagId, TransactionId,
};

/// Classification outcome for one envelope. First match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classification {
    /// Speculative; `urgent` carries the sender's priority flag.
    Predictive { urgent: bool, action: DomainAction },
    /// Finalized by the server.
    Confirmed(DomainAction),
    /// Plain state-change with no predictive counterpart.
    Regular(DomainAction),
    /// Protocol drift: degrade to a re-query hint.
    Unknown,
}

/// Classify a raw action name.
fn classify(raw_action: &str) -> Classification {
    match raw_action {
        actions::RFID_DETECTED_URGENT => Classification::Predictive {
            urgent: true,
            action: DomainAction::ScanDetected,
        },
        actions::RFID_DETECTED => Classification::Predictive {
            urgent: false,
            action: DomainAction::ScanDetected,
        },
        actions::UNIT_REGISTERING => Classification::Predictive {
            urgent: false,
            action: DomainAction::UnitRegistered,
        },
        actions::LOCATION_UPDATING => Classification::Predictive {
            urgent: false,
            action: DomainAction::LocationChanged,
        },
        actions::UNIT_REGISTERED_CONFIRMED | actions::UNIT_REGISTERED => {
            Classification::Confirmed(DomainAction::UnitRegistered)
        }
        actions::LOCATION_CHANGED => Classification::Regular(DomainAction::LocationChanged),
        actions::UNIT_DELETED => Classification::Regular(DomainAction::UnitRemoved),
        _ => Classification::Unknown,
    }
}

/// One in-flight transaction.
#[derive(Debug, Clone)]
struct PendingEntry {
    record: PredictiveRecord,
    inserted_at: Instant,
}

/// Errors from the classifier command API.
#[derive(Debug, thiserror::Error)]
#[error("classifier task is gone")]
pub struct ClassifierClosed;

/// Cloneable command/stream handle to a running [`EventClassifier`].
#[derive(Clone)]
pub struct ClassifierHandle {
    cmd_tx: CommandSender,
    streams: CoreStreams,
}

impl ClassifierHandle {
    pub fn new(cmd_tx: CommandSender, streams: CoreStreams) -> Self {
        Self { cmd_tx, streams }
    }

    /// The outbound streams (predictive / settlement / immediate / refresh).
    pub fn streams(&self) -> &CoreStreams {
        &self.streams
    }

    /// Client-initiated optimistic entry point.
    ///
    /// Inserts the record into the pending table and emits it on the
    /// *immediate* stream, distinct from push-sourced predictive events.
    pub async fn predict(&self, record: PredictiveRecord) -> Result<(), ClassifierClosed> {
        self.send(ClassifierCommand::Predict { record }).await
    }

    /// Resolve a transaction with server-returned field values.
    pub async fn confirm(
        &self,
        transaction_id: TransactionId,
        action: DomainAction,
        fields: Map<String, Value>,
    ) -> Result<(), ClassifierClosed> {
        self.send(ClassifierCommand::Confirm {
            transaction_id,
            action,
            fields,
        })
        .await
    }

    /// Withdraw a transaction, carrying the failure reason to views.
    pub async fn cancel(
        &self,
        transaction_id: TransactionId,
        natural_key: TagId,
        reason: RollbackReason,
    ) -> Result<(), ClassifierClosed> {
        self.send(ClassifierCommand::Cancel {
            transaction_id,
            natural_key,
            reason,
        })
        .await
    }

    async fn send(&self, cmd: ClassifierCommand) -> Result<(), ClassifierClosed> {
        self.cmd_tx.send(cmd).await.map_err(|_| ClassifierClosed)
    }
}

/// EventClassifier routes envelopes and tracks in-flight transactions.
pub struct EventClassifier {
    pending: HashMap<TransactionId, PendingEntry>,
    streams: CoreStreams,
    pending_ttl: Duration,
    sweep_interval: Duration,
    envelope_rx: EnvelopeReceiver,
    cmd_rx: CommandReceiver,
    shutdown_rx: watch::Receiver<bool>,
}

impl EventClassifier {
    /// Create a new EventClassifier.
    ///
    /// # Arguments
    ///
    /// * `config` - TTL and sweep tuning
    /// * `streams` - outbound broadcast streams
    /// * `envelope_rx` - receiver for normalized envelopes from fan-in
    /// * `cmd_rx` - receiver for predict/confirm/cancel commands
    /// * `shutdown_rx` - receiver for shutdown signal
    pub fn new(
        config: &CoreConfig,
        streams: CoreStreams,
        envelope_rx: EnvelopeReceiver,
        cmd_rx: CommandReceiver,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pending: HashMap::new(),
            streams,
            pending_ttl: config.pending_ttl,
            sweep_interval: config.sweep_interval,
            envelope_rx,
            cmd_rx,
            shutdown_rx,
        }
    }

    /// Run the EventClassifier until shutdown is signaled.
    pub async fn run(mut self) {
        info!("EventClassifier started");

        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("EventClassifier received shutdown signal");
                        break;
                    }
                }

                Some(envelope) = self.envelope_rx.recv() => {
                    self.route(envelope);
                }

                Some(cmd) = self.cmd_rx.recv() => {
                    self.apply(cmd);
                }

                _ = sweep.tick() => {
                    self.sweep_expired();
                }
            }
        }

        info!("EventClassifier shutdown complete");
    }

    /// Number of in-flight transactions.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    // -- Envelope routing ---------------------------------------------------

    fn route(&mut self, envelope: Envelope) {
        match classify(&envelope.raw_action) {
            Classification::Predictive { urgent, action } => {
                self.route_predictive(envelope, urgent, action);
            }
            Classification::Confirmed(action) => self.route_confirmed(envelope, action),
            Classification::Regular(action) => self.route_regular(envelope, action),
            Classification::Unknown => {
                debug!(
                    action = %envelope.raw_action,
                    channel = %envelope.channel,
                    "Unrecognized action, degrading to refresh hint"
                );
                self.emit_refresh(RefreshReason::UnknownAction(envelope.raw_action));
            }
        }
    }

    fn route_predictive(&mut self, envelope: Envelope, urgent: bool, action: DomainAction) {
        let Some(natural_key) = envelope.natural_key() else {
            warn!(
                action = %envelope.raw_action,
                channel = %envelope.channel,
                "Predictive envelope without natural key, degrading to refresh hint"
            );
            self.emit_refresh(RefreshReason::UnknownAction(envelope.raw_action));
            return;
        };

        let record = PredictiveRecord {
            natural_key,
            transaction_id: envelope.transaction_id.clone(),
            action,
            fields: envelope.payload,
        };

        if let Some(transaction_id) = &envelope.transaction_id {
            debug!(
                transaction_id = %transaction_id,
                natural_key = %record.natural_key,
                "Tracking in-flight transaction"
            );
            self.pending.insert(
                transaction_id.clone(),
                PendingEntry {
                    record: record.clone(),
                    inserted_at: Instant::now(),
                },
            );
        }

        // A send error only means nobody is subscribed yet; that is fine.
        let _ = self.streams.predictive.send(PredictiveEvent {
            record,
            urgent,
            channel: envelope.channel,
            occurred_at: envelope.sent_at.unwrap_or(envelope.received_at),
        });
    }

    fn route_confirmed(&mut self, envelope: Envelope, action: DomainAction) {
        let settled = envelope
            .transaction_id
            .as_ref()
            .and_then(|txn| self.pending.remove(txn));
        let was_predicted = settled.is_some();

        // The confirm may omit the tag id when it correlates by
        // transaction id; recover the key from the settled prediction.
        let natural_key = envelope
            .natural_key()
            .or_else(|| settled.map(|entry| entry.record.natural_key));

        let Some(natural_key) = natural_key else {
            warn!(
                action = %envelope.raw_action,
                "Confirm without natural key or matching prediction, degrading to refresh hint"
            );
            self.emit_refresh(RefreshReason::UnknownAction(envelope.raw_action));
            return;
        };

        debug!(
            natural_key = %natural_key,
            was_predicted,
            action = %envelope.raw_action,
            "Confirmed update"
        );

        let _ = self
            .streams
            .settlement
            .send(SettlementEvent::Confirmed(ConfirmedUpdate {
                natural_key,
                transaction_id: envelope.transaction_id,
                action,
                fields: envelope.payload,
                was_predicted,
                source: ConfirmSource::Push,
            }));
    }

    fn route_regular(&mut self, envelope: Envelope, action: DomainAction) {
        // No predictive/confirmed distinction to make: treat as already
        // confirmed.
        let Some(natural_key) = envelope.natural_key() else {
            self.emit_refresh(RefreshReason::UnknownAction(envelope.raw_action));
            return;
        };

        let _ = self
            .streams
            .settlement
            .send(SettlementEvent::Confirmed(ConfirmedUpdate {
                natural_key,
                transaction_id: None,
                action,
                fields: envelope.payload,
                was_predicted: false,
                source: ConfirmSource::Push,
            }));
    }

    // -- Command API --------------------------------------------------------

    fn apply(&mut self, cmd: ClassifierCommand) {
        match cmd {
            ClassifierCommand::Predict { record } => {
                if let Some(transaction_id) = &record.transaction_id {
                    self.pending.insert(
                        transaction_id.clone(),
                        PendingEntry {
                            record: record.clone(),
                            inserted_at: Instant::now(),
                        },
                    );
                }
                let _ = self.streams.immediate.send(LocalPrediction { record });
            }

            ClassifierCommand::Confirm {
                transaction_id,
                action,
                fields,
            } => {
                let settled = self.pending.remove(&transaction_id);
                let was_predicted = settled.is_some();

                let natural_key = settled
                    .map(|entry| entry.record.natural_key)
                    .or_else(|| key_from_fields(&fields));

                let Some(natural_key) = natural_key else {
                    // The prediction was already swept and the server
                    // response names no tag; views self-heal on refresh.
                    warn!(
                        transaction_id = %transaction_id,
                        "Confirm without natural key or matching prediction, degrading to refresh hint"
                    );
                    self.emit_refresh(RefreshReason::Mutation);
                    return;
                };

                let _ = self
                    .streams
                    .settlement
                    .send(SettlementEvent::Confirmed(ConfirmedUpdate {
                        natural_key,
                        transaction_id: Some(transaction_id),
                        action,
                        fields,
                        was_predicted,
                        source: ConfirmSource::Rest,
                    }));
            }

            ClassifierCommand::Cancel {
                transaction_id,
                natural_key,
                reason,
            } => {
                self.pending.remove(&transaction_id);
                debug!(
                    transaction_id = %transaction_id,
                    natural_key = %natural_key,
                    reason = %reason,
                    "Rolling back prediction"
                );
                let _ = self
                    .streams
                    .settlement
                    .send(SettlementEvent::RolledBack(Rollback {
                        natural_key,
                        transaction_id,
                        reason,
                    }));
            }
        }
    }

    // -- TTL sweep ----------------------------------------------------------

    fn sweep_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<TransactionId> = self
            .pending
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.inserted_at) >= self.pending_ttl)
            .map(|(txn, _)| txn.clone())
            .collect();

        for transaction_id in expired {
            if let Some(entry) = self.pending.remove(&transaction_id) {
                warn!(
                    transaction_id = %transaction_id,
                    natural_key = %entry.record.natural_key,
                    "Pending transaction timed out, force-cancelling"
                );
                let _ = self
                    .streams
                    .settlement
                    .send(SettlementEvent::RolledBack(Rollback {
                        natural_key: entry.record.natural_key,
                        transaction_id,
                        reason: RollbackReason::Timeout,
                    }));
            }
        }
    }

    fn emit_refresh(&self, reason: RefreshReason) {
        let _ = self.streams.refresh.send(RefreshHint { reason });
    }
}

/// Read the natural key out of a loose field map.
fn key_from_fields(map: &Map<String, Value>) -> Option<TagId> {
    [fields::RFID, fields::TAG_ID]
        .iter()
        .find_map(|name| map.get(*name))
        .and_then(Value::as_str)
        .map(TagId::from)
}
