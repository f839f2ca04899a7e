//! Push transport adapter.
//!
//! Owns the WebSocket connection to the push endpoint: joins whatever
//! channels the fan-in currently has subscribed, delivers inbound frames,
//! and reconnects with capped exponential backoff when the connection
//! drops. After every reconnect the full channel set is rejoined, and
//! subscription-set changes (config reload, screens mounting) are diffed
//! against the joined set on the live connection.
//!
//! A dropped frame is never recovered here: authoritative state is always
//! fetchable through the search API.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use compact_str::CompactString;
use kanau::processor::Processor;
use tagview_core::processors::{ChannelFanIn, FanInError, InboundFrame};
use tagview_sdk::client::PushSocket;
use tagview_sdk::objects::push::WsServerFrame;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

/// Maximum reconnect backoff exponent (2^6 = 64 seconds).
const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Backoff before reconnect attempt `attempt` (1-based).
fn reconnect_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT))
}

/// Reconnecting link between the push endpoint and the fan-in.
pub struct PushLink {
    endpoint: Url,
    fan_in: Arc<ChannelFanIn>,
}

impl PushLink {
    pub fn new(endpoint: Url, fan_in: Arc<ChannelFanIn>) -> Self {
        Self { endpoint, fan_in }
    }

    /// Run the link until shutdown is signaled.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(endpoint = %self.endpoint, "PushLink started");
        let mut attempt: u32 = 0;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match PushSocket::connect(&self.endpoint).await {
                Ok(socket) => {
                    attempt = 0;
                    info!(endpoint = %self.endpoint, "Push connection established");
                    if self.drive_connection(socket, &mut shutdown_rx).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!(endpoint = %self.endpoint, error = %e, "Push connect failed");
                }
            }

            attempt += 1;
            let delay = reconnect_delay(attempt);
            debug!(attempt, delay_secs = delay.as_secs(), "Backing off before reconnect");

            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("PushLink shutdown complete");
    }

    /// Drive one live connection. Returns `true` on shutdown, `false` when
    /// the connection dropped and a reconnect is due.
    async fn drive_connection(
        &self,
        mut socket: PushSocket,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        let mut subscription_rx = self.fan_in.watch_subscriptions();
        // The set changed since any previous connection; treat the current
        // value as seen and join from scratch.
        subscription_rx.mark_unchanged();

        let mut joined: HashSet<CompactString> = HashSet::new();
        if !self.reconcile_channels(&mut socket, &mut joined).await {
            return false;
        }

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        let _ = socket.close().await;
                        return true;
                    }
                }

                changed = subscription_rx.changed() => {
                    if changed.is_err() {
                        // Fan-in dropped; nothing left to deliver to.
                        let _ = socket.close().await;
                        return true;
                    }
                    if !self.reconcile_channels(&mut socket, &mut joined).await {
                        return false;
                    }
                }

                frame = socket.next_frame() => {
                    match frame {
                        Ok(Some(WsServerFrame::Event { channel, message })) => {
                            match self.fan_in.process(InboundFrame { channel, message }).await {
                                Ok(()) => {}
                                Err(FanInError::ChannelClosed) => {
                                    // Classifier gone: shutdown in progress.
                                    let _ = socket.close().await;
                                    return true;
                                }
                            }
                        }
                        Ok(Some(WsServerFrame::Error { reason })) => {
                            warn!(%reason, "Push server reported error");
                        }
                        Ok(None) => {
                            warn!("Push connection closed by server");
                            return false;
                        }
                        Err(e) => {
                            warn!(error = %e, "Push connection failed");
                            return false;
                        }
                    }
                }
            }
        }
    }

    /// Diff the joined channel set against the fan-in's active set:
    /// join additions, leave removals.
    ///
    /// Returns `false` when the connection failed mid-reconcile.
    async fn reconcile_channels(
        &self,
        socket: &mut PushSocket,
        joined: &mut HashSet<CompactString>,
    ) -> bool {
        let wanted: HashSet<CompactString> = self
            .fan_in
            .active_channels()
            .iter()
            .map(|channel| channel.wire())
            .collect();

        for channel in wanted.difference(joined) {
            debug!(%channel, "Joining push channel");
            if let Err(e) = socket.subscribe(channel).await {
                warn!(%channel, error = %e, "Subscribe failed");
                return false;
            }
        }

        for channel in joined.difference(&wanted) {
            debug!(%channel, "Leaving push channel");
            if let Err(e) = socket.unsubscribe(channel).await {
                warn!(%channel, error = %e, "Unsubscribe failed");
                return false;
            }
        }

        *joined = wanted;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delay_doubles_and_caps() {
        assert_eq!(reconnect_delay(1), Duration::from_secs(1));
        assert_eq!(reconnect_delay(2), Duration::from_secs(2));
        assert_eq!(reconnect_delay(3), Duration::from_secs(4));
        assert_eq!(reconnect_delay(7), Duration::from_secs(64));
        // Capped from here on.
        assert_eq!(reconnect_delay(8), Duration::from_secs(64));
        assert_eq!(reconnect_delay(100), Duration::from_secs(64));
    }
}
