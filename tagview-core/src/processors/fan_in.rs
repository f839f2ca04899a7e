//! Channel fan-in processor.
//!
//! Presents N independently-addressable push subscriptions as one
//! normalized envelope source:
//! - Tracks which logical channels are live (idempotent subscribe,
//!   no-op unsubscribe) so the transport adapter knows what to join.
//! - Normalizes heterogeneous raw payloads into [`Envelope`]s, stamping
//!   arrival time and recovering the sender's send time for latency
//!   diagnostics.
//!
//! No filtering or business logic happens here. Message loss is tolerated:
//! the push transport is advisory, and authoritative truth stays fetchable
//! through the search API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use compact_str::CompactString;
use kanau::processor::Processor;
use tagview_sdk::objects::push::RawPushMessage;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::events::{ChannelName, Envelope, EnvelopeSender, TransactionId};
use crate::utils::send_time::{extract_send_time, from_epoch_millis};

/// A raw frame as handed over by the push transport.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    /// Wire channel name the message arrived on.
    pub channel: CompactString,
    /// The raw message body.
    pub message: RawPushMessage,
}

/// Errors that can occur while fanning in a frame.
#[derive(Debug, thiserror::Error)]
pub enum FanInError {
    /// The classifier's envelope channel is closed (shutdown in progress).
    #[error("envelope channel closed")]
    ChannelClosed,
}

/// Handle to one logical channel subscription.
///
/// Subscribing twice to the same channel returns the same handle; the
/// token ties the handle to the registration that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    channel: ChannelName,
    token: u64,
}

impl SubscriptionHandle {
    /// The logical channel this handle refers to.
    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }
}

/// Fan-in over all push channels.
pub struct ChannelFanIn {
    envelope_tx: EnvelopeSender,
    subscriptions: Mutex<HashMap<ChannelName, u64>>,
    next_token: AtomicU64,
    version_tx: watch::Sender<u64>,
}

impl ChannelFanIn {
    /// Create a new fan-in that forwards envelopes to `envelope_tx`.
    pub fn new(envelope_tx: EnvelopeSender) -> Self {
        let (version_tx, _) = watch::channel(0u64);
        Self {
            envelope_tx,
            subscriptions: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            version_tx,
        }
    }

    /// Subscribe to a logical channel.
    ///
    /// Idempotent: a second call for the same channel returns the existing
    /// handle instead of opening a duplicate subscription.
    pub fn subscribe(&self, channel: ChannelName) -> SubscriptionHandle {
        let mut subs = self.lock_subscriptions();
        if let Some(&token) = subs.get(&channel) {
            return SubscriptionHandle { channel, token };
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        subs.insert(channel.clone(), token);
        drop(subs);

        debug!(%channel, "Subscribed to push channel");
        self.version_tx.send_modify(|v| *v += 1);
        SubscriptionHandle { channel, token }
    }

    /// Release a subscription. Safe to call on an already-released handle.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut subs = self.lock_subscriptions();
        // Only the registration the handle was minted for is released; a
        // handle from a previous subscribe/unsubscribe cycle is stale.
        if subs.get(&handle.channel) == Some(&handle.token) {
            subs.remove(&handle.channel);
            drop(subs);
            debug!(channel = %handle.channel, "Unsubscribed from push channel");
            self.version_tx.send_modify(|v| *v += 1);
        }
    }

    /// The logical channels currently subscribed.
    pub fn active_channels(&self) -> Vec<ChannelName> {
        self.lock_subscriptions().keys().cloned().collect()
    }

    /// Watch for subscription-set changes (transport resubscription).
    pub fn watch_subscriptions(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    /// Normalize a raw frame into an [`Envelope`].
    ///
    /// Returns `None` for frames on unknown wire channels.
    fn normalize(&self, frame: InboundFrame) -> Option<Envelope> {
        let Some(channel) = ChannelName::from_wire(&frame.channel) else {
            warn!(channel = %frame.channel, "Dropping frame on unknown channel");
            return None;
        };

        let message = frame.message;
        let sent_at = message
            .sent_at_millis
            .and_then(from_epoch_millis)
            .or_else(|| extract_send_time(&message.fields));

        Some(Envelope {
            channel,
            raw_action: message.action,
            transaction_id: message.transaction_id.map(TransactionId::new),
            payload: message.fields,
            sent_at,
            received_at: OffsetDateTime::now_utc(),
        })
    }

    fn lock_subscriptions(&self) -> std::sync::MutexGuard<'_, HashMap<ChannelName, u64>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Processor<InboundFrame> for ChannelFanIn {
    type Output = ();
    type Error = FanInError;

    /// Normalize one frame and forward it to the classifier.
    async fn process(&self, frame: InboundFrame) -> Result<(), FanInError> {
        let Some(envelope) = self.normalize(frame) else {
            return Ok(());
        };

        if let Some(latency) = envelope.latency() {
            debug!(
                channel = %envelope.channel,
                action = %envelope.raw_action,
                latency_ms = latency.whole_milliseconds() as i64,
                "Received push message"
            );
        } else {
            debug!(
                channel = %envelope.channel,
                action = %envelope.raw_action,
                "Received push message without send time"
            );
        }

        self.envelope_tx
            .send(envelope)
            .await
            .map_err(|_| FanInError::ChannelClosed)
    }
}
