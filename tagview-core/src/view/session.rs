//! Per-screen driver task.
//!
//! A [`ViewSession`] subscribes to the classifier streams and the refresh
//! broadcast, feeds a [`ViewReconciler`], re-queries the paginated search
//! endpoint when authoritative state may be stale, and publishes row
//! snapshots to the owning screen over a watch channel.
//!
//! A session that must *act* on scans (not just display them) runs with
//! [`ClaimPolicy::ActOnScan`]: before acting it takes the claim on the
//! natural key, and only the claim winner empties the scan slot and
//! receives the [`SessionEvent::ClaimedScan`] event. Losing the claim is
//! expected steady-state and the loser keeps rendering.
//!
//! Teardown: the task releases every claim it holds on exit; anything
//! still in flight resolves against the dropped task and is a no-op.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::claim::{ClaimTable, ViewId};
use crate::events::{
    DomainAction, PredictiveEvent, RefreshReceiver, ScannedTag, SettlementEvent, TagId,
};
use crate::gateway::RestGateway;
use crate::processors::mediator::StateMediator;
use crate::view::reconciler::{DisplayRow, ViewEffect, ViewReconciler};
use tagview_sdk::objects::search::SearchRequest;

/// Whether this session merely displays events or also acts on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimPolicy {
    /// Render only; never claims.
    DisplayOnly,
    /// Claim incoming scans and drive the user-facing workflow for them.
    ActOnScan,
}

/// Events a session forwards to its owning screen.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// This session won the claim on a scan and emptied the scan slot.
    ClaimedScan(ScannedTag),
    /// A row-level failure to attach to the initiating row or form.
    RowError { key: TagId, message: String },
}

/// What a screen holds while its session runs.
pub struct ViewBinding {
    /// Snapshot of the displayed rows, updated on every reconciliation.
    pub rows: watch::Receiver<Vec<DisplayRow>>,
    /// Session events (claimed scans, row errors).
    pub events: mpsc::Receiver<SessionEvent>,
}

/// The driver for one mounted screen.
pub struct ViewSession {
    id: ViewId,
    reconciler: ViewReconciler,
    claims: Arc<ClaimTable>,
    gateway: Arc<dyn RestGateway>,
    mediator: StateMediator,
    query: SearchRequest,
    policy: ClaimPolicy,
    rows_tx: watch::Sender<Vec<DisplayRow>>,
    events_tx: mpsc::Sender<SessionEvent>,
}

impl ViewSession {
    /// Create a session and the binding its screen holds.
    pub fn new(
        id: ViewId,
        mediator: StateMediator,
        gateway: Arc<dyn RestGateway>,
        claims: Arc<ClaimTable>,
        query: SearchRequest,
        policy: ClaimPolicy,
    ) -> (Self, ViewBinding) {
        let (rows_tx, rows_rx) = watch::channel(Vec::new());
        let (events_tx, events_rx) = mpsc::channel(32);
        (
            Self {
                id,
                reconciler: ViewReconciler::new(),
                claims,
                gateway,
                mediator,
                query,
                policy,
                rows_tx,
                events_tx,
            },
            ViewBinding {
                rows: rows_rx,
                events: events_rx,
            },
        )
    }

    /// Run the session until shutdown or unmount (binding dropped).
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(view = %self.id, "ViewSession started");

        let streams = self.mediator.classifier().streams().clone();
        let mut predictive_rx = streams.subscribe_predictive();
        let mut immediate_rx = streams.subscribe_immediate();
        let mut settlement_rx = streams.subscribe_settlement();
        let mut refresh_rx: RefreshReceiver = streams.subscribe_refresh();

        // First authoritative page before any event lands.
        self.refetch().await;
        self.publish();

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(view = %self.id, "ViewSession received shutdown signal");
                        break;
                    }
                }

                result = predictive_rx.recv() => {
                    match result {
                        Ok(event) => {
                            self.handle_predictive(&event).await;
                            self.publish();
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(view = %self.id, skipped = n, "Predictive stream lagged, re-querying");
                            self.refetch().await;
                            self.publish();
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }

                result = immediate_rx.recv() => {
                    match result {
                        Ok(event) => {
                            self.reconciler.apply_local(&event);
                            self.publish();
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(view = %self.id, skipped = n, "Immediate stream lagged, re-querying");
                            self.refetch().await;
                            self.publish();
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }

                result = settlement_rx.recv() => {
                    match result {
                        Ok(event) => {
                            self.handle_settlement(&event).await;
                            self.publish();
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(view = %self.id, skipped = n, "Settlement stream lagged, re-querying");
                            self.refetch().await;
                            self.publish();
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }

                result = refresh_rx.recv() => {
                    match result {
                        Ok(hint) => {
                            debug!(view = %self.id, reason = ?hint.reason, "Refresh hint, re-querying");
                            self.refetch().await;
                            self.publish();
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            // Hints are idempotent; one re-query covers them all.
                            self.refetch().await;
                            self.publish();
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        self.claims.release_view(&self.id);
        info!(view = %self.id, "ViewSession shutdown complete");
    }

    // -- Event handling -----------------------------------------------------

    pub(crate) async fn handle_predictive(&mut self, event: &PredictiveEvent) {
        if self.policy == ClaimPolicy::ActOnScan
            && event.record.action == DomainAction::ScanDetected
        {
            self.try_claim_scan(&event.record.natural_key).await;
        }
        self.reconciler.apply_predictive(event);
    }

    pub(crate) async fn handle_settlement(&mut self, event: &SettlementEvent) {
        // Whatever the claim was guarding has resolved.
        self.claims.release(event.natural_key(), &self.id);

        if let Some(ViewEffect::SurfaceError { key, message }) =
            self.reconciler.apply_settlement(event)
        {
            let _ = self
                .events_tx
                .send(SessionEvent::RowError { key, message })
                .await;
        }
    }

    /// Race for the right to act on a scan.
    ///
    /// The winner empties the scan slot and forwards the hand-off to its
    /// screen; a loser renders read-only, which is not a failure.
    async fn try_claim_scan(&mut self, key: &TagId) {
        if !self.claims.claim(key, &self.id) {
            debug!(view = %self.id, natural_key = %key, "Scan already claimed, rendering only");
            return;
        }

        if let Some(tag) = self.mediator.scan_slot().take_matching(key) {
            let _ = self.events_tx.send(SessionEvent::ClaimedScan(tag)).await;
        }
    }

    // -- Authoritative re-query ---------------------------------------------

    async fn refetch(&mut self) {
        match self.gateway.search_units(&self.query).await {
            Ok(page) => {
                debug!(
                    view = %self.id,
                    rows = page.results.len(),
                    total = page.total,
                    "Applied authoritative page"
                );
                self.reconciler.apply_page(&page.results);
            }
            Err(e) => {
                // No retry loop: the next hint or manual reload re-queries.
                warn!(view = %self.id, error = %e, "Authoritative query failed");
            }
        }
    }

    fn publish(&self) {
        let _ = self.rows_tx.send(self.reconciler.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{
        ChannelName, CoreStreams, PredictiveRecord, RefreshHint, RefreshReason, command_channel,
    };
    use crate::processors::classifier::ClassifierHandle;
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use tagview_sdk::client::ClientError;
    use tagview_sdk::objects::search::SearchResults;
    use tagview_sdk::objects::unit::{
        RegisterUnitRequest, UnitRecord, UnitStatus, UpdateLocationRequest,
    };
    use time::OffsetDateTime;

    /// Gateway double answering a fixed page.
    struct PageGateway {
        page: Vec<UnitRecord>,
    }

    #[async_trait]
    impl RestGateway for PageGateway {
        async fn search_units(
            &self,
            _request: &SearchRequest,
        ) -> Result<SearchResults<UnitRecord>, ClientError> {
            Ok(SearchResults {
                results: self.page.clone(),
                total: self.page.len() as u64,
            })
        }

        async fn register_unit(
            &self,
            _request: &RegisterUnitRequest,
        ) -> Result<UnitRecord, ClientError> {
            Err(ClientError::Rejected {
                message: "unexpected call".to_owned(),
            })
        }

        async fn update_location(
            &self,
            _request: &UpdateLocationRequest,
        ) -> Result<UnitRecord, ClientError> {
            Err(ClientError::Rejected {
                message: "unexpected call".to_owned(),
            })
        }

        async fn delete_unit(&self, _tag_id: &str) -> Result<(), ClientError> {
            Ok(())
        }
    }

    fn unit(tag: &str, code: &str) -> UnitRecord {
        let registered_at =
            OffsetDateTime::from_unix_timestamp(1_733_140_200).expect("valid timestamp");
        UnitRecord {
            unit_id: uuid::Uuid::new_v4(),
            tag_id: tag.into(),
            unit_code: code.into(),
            location: "dock-3".to_owned(),
            scanner_id: None,
            status: UnitStatus::Registered,
            registered_at,
            updated_at: registered_at,
        }
    }

    fn scan_event(key: &str) -> PredictiveEvent {
        let mut fields = Map::new();
        fields.insert("rfid".to_owned(), Value::String(key.to_owned()));
        PredictiveEvent {
            record: PredictiveRecord {
                natural_key: TagId::from(key),
                transaction_id: None,
                action: DomainAction::ScanDetected,
                fields,
            },
            urgent: true,
            channel: ChannelName::Priority,
            occurred_at: OffsetDateTime::now_utc(),
        }
    }

    struct Fixture {
        mediator: StateMediator,
        streams: CoreStreams,
        claims: Arc<ClaimTable>,
        gateway: Arc<dyn RestGateway>,
        _cmd_rx: crate::events::CommandReceiver,
    }

    fn fixture(page: Vec<UnitRecord>) -> Fixture {
        let streams = CoreStreams::new();
        let (cmd_tx, cmd_rx) = command_channel();
        let gateway: Arc<dyn RestGateway> = Arc::new(PageGateway { page });
        let mediator = StateMediator::new(
            ClassifierHandle::new(cmd_tx, streams.clone()),
            Arc::clone(&gateway),
        );
        Fixture {
            mediator,
            streams,
            claims: Arc::new(ClaimTable::new()),
            gateway,
            _cmd_rx: cmd_rx,
        }
    }

    fn session(fixture: &Fixture, name: &str, policy: ClaimPolicy) -> (ViewSession, ViewBinding) {
        ViewSession::new(
            ViewId::new(name),
            fixture.mediator.clone(),
            Arc::clone(&fixture.gateway),
            Arc::clone(&fixture.claims),
            SearchRequest::first_page(50),
            policy,
        )
    }

    #[tokio::test]
    async fn test_exactly_one_session_claims_a_scan() {
        let fx = fixture(Vec::new());
        let (mut a, mut binding_a) = session(&fx, "register-a", ClaimPolicy::ActOnScan);
        let (mut b, mut binding_b) = session(&fx, "register-b", ClaimPolicy::ActOnScan);

        // The scan slot is filled by the relay before screens react.
        fx.mediator.scan_slot().set(ScannedTag {
            tag_id: TagId::from("TAG1"),
            scanner_id: Some("dock-3".into()),
            location_hint: None,
            occurred_at: OffsetDateTime::now_utc(),
        });

        let event = scan_event("TAG1");
        a.handle_predictive(&event).await;
        b.handle_predictive(&event).await;

        // Exactly one hand-off, and the slot is cleared.
        assert!(matches!(
            binding_a.events.try_recv(),
            Ok(SessionEvent::ClaimedScan(tag)) if tag.tag_id == TagId::from("TAG1")
        ));
        assert!(binding_b.events.try_recv().is_err());
        assert!(fx.mediator.scanned_data().is_none());

        // The loser still renders the row.
        assert_eq!(b.reconciler.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_display_only_sessions_never_claim() {
        let fx = fixture(Vec::new());
        let (mut a, _binding) = session(&fx, "list", ClaimPolicy::DisplayOnly);

        a.handle_predictive(&scan_event("TAG1")).await;
        assert_eq!(fx.claims.owner(&TagId::from("TAG1")), None);
    }

    #[tokio::test]
    async fn test_settlement_releases_own_claim() {
        let fx = fixture(Vec::new());
        let (mut a, _binding) = session(&fx, "register-a", ClaimPolicy::ActOnScan);

        a.handle_predictive(&scan_event("TAG1")).await;
        assert_eq!(
            fx.claims.owner(&TagId::from("TAG1")),
            Some(ViewId::new("register-a"))
        );

        let mut fields = Map::new();
        fields.insert("rfid".to_owned(), Value::String("TAG1".to_owned()));
        a.handle_settlement(&SettlementEvent::Confirmed(crate::events::ConfirmedUpdate {
            natural_key: TagId::from("TAG1"),
            transaction_id: None,
            action: DomainAction::UnitRegistered,
            fields,
            was_predicted: true,
            source: crate::events::ConfirmSource::Push,
        }))
        .await;

        assert_eq!(fx.claims.owner(&TagId::from("TAG1")), None);
    }

    #[tokio::test]
    async fn test_run_publishes_page_then_predictions_then_refresh() {
        let fx = fixture(vec![unit("TAG1", "U-100")]);
        let (session, mut binding) = session(&fx, "list", ClaimPolicy::DisplayOnly);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(session.run(shutdown_rx));

        // Initial authoritative page.
        binding.rows.changed().await.expect("session alive");
        {
            let rows = binding.rows.borrow_and_update();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].key, TagId::from("TAG1"));
        }

        // A predictive event lands on top of the page.
        fx.streams
            .predictive
            .send(scan_event("TAG2"))
            .expect("subscriber alive");
        binding.rows.changed().await.expect("session alive");
        {
            let rows = binding.rows.borrow_and_update();
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0].key, TagId::from("TAG2"));
        }

        // A refresh hint re-queries; TAG2 is not in the authoritative
        // page so its placeholder survives.
        fx.streams
            .refresh
            .send(RefreshHint {
                reason: RefreshReason::Mutation,
            })
            .expect("subscriber alive");
        binding.rows.changed().await.expect("session alive");
        assert_eq!(binding.rows.borrow_and_update().len(), 2);

        shutdown_tx.send(true).expect("receiver alive");
        task.await.expect("clean shutdown");
    }
}
