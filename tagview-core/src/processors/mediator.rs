//! Domain state mediator.
//!
//! The only component that speaks domain vocabulary (scans, registrations,
//! location moves) and talks to the REST boundary. It is responsible for:
//! - The single-slot "latest scan" value and its hand-off convention
//! - Translating classified events into typed [`DomainNotification`]s
//! - Wrapping every mutating REST call in the optimistic
//!   predict → call → confirm/cancel sequence
//! - Broadcasting the "data may be stale, refresh" signal after every
//!   successful mutation
//!
//! REST failures are never retried here; retrying is a user action.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};

use kanau::processor::Processor;
use serde_json::{Map, Value};
use tagview_sdk::client::ClientError;
use tagview_sdk::objects::push::fields;
use tagview_sdk::objects::unit::{RegisterUnitRequest, UnitRecord, UpdateLocationRequest};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::events::{
    ChannelName, DomainAction, DomainNotification, NotificationReceiver, NotificationSender,
    PredictiveEvent, PredictiveRecord, RefreshHint, RefreshReason, RefreshReceiver,
    PredictiveReceiver, ScannedTag, SettlementEvent, SettlementReceiver, TagId, TransactionId,
    notification_channel,
};
use crate::processors::classifier::ClassifierHandle;
use crate::gateway::RestGateway;

// ---------------------------------------------------------------------------
// Scan slot
// ---------------------------------------------------------------------------

/// The single-slot "latest scan" value.
///
/// This is a hand-off, not a queue: an RFID read is physically singular, so
/// the first consumer to observe-and-clear gets the event. Mutation is one
/// synchronous step under a non-async mutex, so a claim check-and-clear can
/// never be split by a suspension point. The watch channel carries only a
/// version bump; readers always go through the slot.
#[derive(Clone)]
pub struct ScanSlot {
    inner: Arc<ScanSlotInner>,
}

struct ScanSlotInner {
    slot: Mutex<Option<ScannedTag>>,
    version_tx: watch::Sender<u64>,
}

impl ScanSlot {
    pub fn new() -> Self {
        let (version_tx, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(ScanSlotInner {
                slot: Mutex::new(None),
                version_tx,
            }),
        }
    }

    /// Replace the slot value and notify watchers.
    pub fn set(&self, tag: ScannedTag) {
        *self.lock() = Some(tag);
        self.inner.version_tx.send_modify(|v| *v += 1);
    }

    /// Read without consuming.
    pub fn peek(&self) -> Option<ScannedTag> {
        self.lock().clone()
    }

    /// Observe-and-clear in one synchronous step.
    pub fn take(&self) -> Option<ScannedTag> {
        let taken = self.lock().take();
        if taken.is_some() {
            self.inner.version_tx.send_modify(|v| *v += 1);
        }
        taken
    }

    /// Observe-and-clear only if the slot holds `key`.
    ///
    /// Leaves a newer scan for some other tag untouched.
    pub fn take_matching(&self, key: &TagId) -> Option<ScannedTag> {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|tag| &tag.tag_id == key) {
            let taken = slot.take();
            drop(slot);
            self.inner.version_tx.send_modify(|v| *v += 1);
            taken
        } else {
            None
        }
    }

    /// Clear without observing.
    pub fn clear(&self) {
        if self.lock().take().is_some() {
            self.inner.version_tx.send_modify(|v| *v += 1);
        }
    }

    /// Watch for slot changes. Receivers re-read through the slot.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.inner.version_tx.subscribe()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ScannedTag>> {
        self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ScanSlot {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// StateMediator
// ---------------------------------------------------------------------------

/// Cloneable handle for domain reads and optimistic mutations.
#[derive(Clone)]
pub struct StateMediator {
    classifier: ClassifierHandle,
    gateway: Arc<dyn RestGateway>,
    scan_slot: ScanSlot,
    notifications: NotificationSender,
    failed_keys: Arc<Mutex<HashMap<TagId, String>>>,
}

impl StateMediator {
    /// Create a new StateMediator.
    pub fn new(classifier: ClassifierHandle, gateway: Arc<dyn RestGateway>) -> Self {
        Self {
            classifier,
            gateway,
            scan_slot: ScanSlot::new(),
            notifications: notification_channel(),
            failed_keys: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The single-slot latest-scan value.
    pub fn scan_slot(&self) -> &ScanSlot {
        &self.scan_slot
    }

    /// Read the latest scan without consuming it.
    pub fn scanned_data(&self) -> Option<ScannedTag> {
        self.scan_slot.peek()
    }

    /// Explicitly clear the latest scan (the consumer hand-off step).
    pub fn clear_scanned_data(&self) {
        self.scan_slot.clear();
    }

    /// Subscribe to typed domain notifications.
    pub fn subscribe_notifications(&self) -> NotificationReceiver {
        self.notifications.subscribe()
    }

    /// Subscribe to stale-data refresh hints.
    pub fn subscribe_refresh(&self) -> RefreshReceiver {
        self.classifier.streams().subscribe_refresh()
    }

    /// The classifier handle this mediator resolves transactions through.
    pub fn classifier(&self) -> &ClassifierHandle {
        &self.classifier
    }

    /// The last rejection message recorded for `key`, if any.
    ///
    /// Screens use this to show a retry affordance on the failed row.
    pub fn failure_for(&self, key: &TagId) -> Option<String> {
        self.lock_failures().get(key).cloned()
    }

    /// Build the relay task that feeds the scan slot and notifications.
    pub fn relay(&self) -> DomainRelay {
        DomainRelay {
            scan_slot: self.scan_slot.clone(),
            notifications: self.notifications.clone(),
        }
    }

    /// Register a unit from a scan.
    ///
    /// Optimistically predicts the registration, issues the REST create,
    /// then confirms or cancels. The REST result is returned unchanged;
    /// the predictive machinery is a side effect layered on top of it.
    pub async fn register_via_scan(
        &self,
        request: RegisterUnitRequest,
    ) -> Result<UnitRecord, ClientError> {
        let key = TagId::new(request.tag_id.clone());
        let mut speculative = Map::new();
        speculative.insert(
            fields::RFID.to_owned(),
            Value::String(request.tag_id.to_string()),
        );
        speculative.insert(
            fields::UNIT_CODE.to_owned(),
            Value::String(request.unit_code.to_string()),
        );
        speculative.insert(
            fields::LOCATION.to_owned(),
            Value::String(request.location.clone()),
        );
        if let Some(scanner_id) = &request.scanner_id {
            speculative.insert(
                fields::SCANNER_ID.to_owned(),
                Value::String(scanner_id.to_string()),
            );
        }

        self.optimistic(&key, DomainAction::UnitRegistered, speculative, async {
            self.gateway.register_unit(&request).await
        })
        .await
    }

    /// Move a unit to a new location.
    ///
    /// Same optimistic wrapping as registration, for the lower-stakes move
    /// action.
    pub async fn update_location(
        &self,
        request: UpdateLocationRequest,
    ) -> Result<UnitRecord, ClientError> {
        let key = TagId::new(request.tag_id.clone());
        let mut speculative = Map::new();
        speculative.insert(
            fields::RFID.to_owned(),
            Value::String(request.tag_id.to_string()),
        );
        speculative.insert(
            fields::LOCATION.to_owned(),
            Value::String(request.location.clone()),
        );

        self.optimistic(&key, DomainAction::LocationChanged, speculative, async {
            self.gateway.update_location(&request).await
        })
        .await
    }

    /// Remove a unit. No predictive leg; still broadcasts refresh on
    /// success so every listing screen reconciles.
    pub async fn delete_unit(&self, key: &TagId) -> Result<(), ClientError> {
        self.gateway.delete_unit(key.as_str()).await?;
        self.emit_refresh();
        Ok(())
    }

    // -- Private helpers ----------------------------------------------------

    /// The one optimistic-action path every mutating call goes through:
    /// predict, run the REST call, then confirm or cancel. Centralized so
    /// failure handling cannot be forgotten at a new call site.
    async fn optimistic<T, F>(
        &self,
        key: &TagId,
        action: DomainAction,
        speculative: Map<String, Value>,
        call: F,
    ) -> Result<T, ClientError>
    where
        T: serde::Serialize,
        F: Future<Output = Result<T, ClientError>>,
    {
        let transaction_id = TransactionId::generate();
        let record = PredictiveRecord {
            natural_key: key.clone(),
            transaction_id: Some(transaction_id.clone()),
            action,
            fields: speculative,
        };

        // The prediction is best-effort: if the classifier is already torn
        // down the REST call must still run.
        if self.classifier.predict(record).await.is_err() {
            warn!(natural_key = %key, "Classifier gone, proceeding without prediction");
        }

        match call.await {
            Ok(value) => {
                let confirmed = confirm_fields(&value);
                if self
                    .classifier
                    .confirm(transaction_id, action, confirmed)
                    .await
                    .is_err()
                {
                    warn!(natural_key = %key, "Classifier gone, confirm dropped");
                }
                self.clear_failure(key);
                self.emit_refresh();
                Ok(value)
            }
            Err(err) => {
                let message = match err.rejection_message() {
                    Some(m) => m.to_owned(),
                    None => err.to_string(),
                };
                debug!(natural_key = %key, error = %message, "Optimistic mutation failed");
                if self
                    .classifier
                    .cancel(
                        transaction_id,
                        key.clone(),
                        crate::events::RollbackReason::Rejected {
                            message: message.clone(),
                        },
                    )
                    .await
                    .is_err()
                {
                    warn!(natural_key = %key, "Classifier gone, cancel dropped");
                }
                self.record_failure(key, message);
                Err(err)
            }
        }
    }

    fn emit_refresh(&self) {
        let _ = self.classifier.streams().refresh.send(RefreshHint {
            reason: RefreshReason::Mutation,
        });
    }

    fn record_failure(&self, key: &TagId, message: String) {
        self.lock_failures().insert(key.clone(), message);
    }

    fn clear_failure(&self, key: &TagId) {
        self.lock_failures().remove(key);
    }

    fn lock_failures(&self) -> std::sync::MutexGuard<'_, HashMap<TagId, String>> {
        self.failed_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Serialize a server response into confirm fields.
fn confirm_fields<T: serde::Serialize>(value: &T) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

// ---------------------------------------------------------------------------
// DomainRelay
// ---------------------------------------------------------------------------

/// Relay task: classified events → scan slot + typed notifications.
pub struct DomainRelay {
    scan_slot: ScanSlot,
    notifications: NotificationSender,
}

impl DomainRelay {
    /// Run the relay until shutdown is signaled.
    ///
    /// Receivers are injected rather than owned, following the same
    /// pattern as the other processors.
    pub async fn run(
        self,
        mut shutdown_rx: watch::Receiver<bool>,
        mut predictive_rx: PredictiveReceiver,
        mut settlement_rx: SettlementReceiver,
    ) {
        info!("DomainRelay started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("DomainRelay received shutdown signal");
                        break;
                    }
                }

                result = predictive_rx.recv() => {
                    match result {
                        Ok(event) => { let _ = self.process(event).await; }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "DomainRelay lagged on predictive stream");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }

                result = settlement_rx.recv() => {
                    match result {
                        Ok(event) => { let _ = self.process(event).await; }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "DomainRelay lagged on settlement stream");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        info!("DomainRelay shutdown complete");
    }

    fn notify(&self, notification: DomainNotification) {
        // A send error only means no workflow screen is mounted.
        let _ = self.notifications.send(notification);
    }
}

impl Processor<PredictiveEvent> for DomainRelay {
    type Output = ();
    type Error = Infallible;

    /// A predictive scan feeds the scan slot and the workflow stream.
    async fn process(&self, event: PredictiveEvent) -> Result<(), Infallible> {
        if event.record.action != DomainAction::ScanDetected {
            return Ok(());
        }

        let scanner_id = string_field(&event.record.fields, fields::SCANNER_ID)
            .map(Into::into)
            .or_else(|| match &event.channel {
                ChannelName::Scanner(id) => Some(id.clone()),
                _ => None,
            });
        let location_hint = string_field(&event.record.fields, fields::LOCATION_HINT)
            .or_else(|| string_field(&event.record.fields, fields::LOCATION))
            .map(ToOwned::to_owned);

        let tag = ScannedTag {
            tag_id: event.record.natural_key.clone(),
            scanner_id,
            location_hint,
            occurred_at: event.occurred_at,
        };

        debug!(tag_id = %tag.tag_id, "Scan detected, filling scan slot");
        self.scan_slot.set(tag.clone());
        self.notify(DomainNotification::ScanDetected(tag));
        Ok(())
    }
}

impl Processor<SettlementEvent> for DomainRelay {
    type Output = ();
    type Error = Infallible;

    /// Confirmed settlements become typed notifications.
    async fn process(&self, event: SettlementEvent) -> Result<(), Infallible> {
        let SettlementEvent::Confirmed(update) = event else {
            // Rollbacks are surfaced by view sessions, which own the
            // user-facing error for the row they rendered.
            return Ok(());
        };

        match update.action {
            DomainAction::UnitRegistered => {
                self.notify(DomainNotification::UnitRegistered {
                    tag_id: update.natural_key,
                    unit_code: string_field(&update.fields, fields::UNIT_CODE).map(Into::into),
                });
            }
            DomainAction::LocationChanged => {
                self.notify(DomainNotification::LocationChanged {
                    tag_id: update.natural_key,
                    location: string_field(&update.fields, fields::LOCATION)
                        .map(ToOwned::to_owned),
                });
            }
            DomainAction::UnitRemoved => {
                self.notify(DomainNotification::UnitRemoved {
                    tag_id: update.natural_key,
                });
            }
            DomainAction::ScanDetected => {}
        }
        Ok(())
    }
}

fn string_field<'a>(map: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    map.get(name).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CoreStreams, command_channel};
    use crate::processors::classifier::ClassifierHandle;
    use async_trait::async_trait;
    use compact_str::CompactString;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tagview_sdk::objects::search::{SearchRequest, SearchResults};
    use time::OffsetDateTime;
    use uuid::Uuid;

    /// Gateway double that answers from canned responses.
    struct StubGateway {
        register_response: Option<Result<UnitRecord, String>>,
        calls: AtomicUsize,
    }

    impl StubGateway {
        fn registering(result: Result<UnitRecord, String>) -> Self {
            Self {
                register_response: Some(result),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RestGateway for StubGateway {
        async fn search_units(
            &self,
            _request: &SearchRequest,
        ) -> Result<SearchResults<UnitRecord>, ClientError> {
            Ok(SearchResults {
                results: Vec::new(),
                total: 0,
            })
        }

        async fn register_unit(
            &self,
            _request: &RegisterUnitRequest,
        ) -> Result<UnitRecord, ClientError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            match self.register_response.as_ref() {
                Some(Ok(unit)) => Ok(unit.clone()),
                Some(Err(message)) => Err(ClientError::Rejected {
                    message: message.clone(),
                }),
                None => Err(ClientError::Rejected {
                    message: "unexpected call".to_owned(),
                }),
            }
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
            unit_id: Uuid::new_v4(),
            tag_id: CompactString::from(tag),
            unit_code: CompactString::from(code),
            location: "dock-3".to_owned(),
            scanner_id: None,
            status: tagview_sdk::objects::unit::UnitStatus::Registered,
            registered_at,
            updated_at: registered_at,
        }
    }

    fn register_request(tag: &str) -> RegisterUnitRequest {
        RegisterUnitRequest {
            tag_id: CompactString::from(tag),
            unit_code: CompactString::from("U-100"),
            location: "dock-3".to_owned(),
            scanner_id: Some(CompactString::from("dock-3")),
        }
    }

    /// Mediator wired to a stub gateway plus the receiving ends of the
    /// channels the classifier task would normally own.
    fn mediator_with(
        gateway: StubGateway,
    ) -> (StateMediator, CoreStreams, crate::events::CommandReceiver) {
        let streams = CoreStreams::new();
        let (cmd_tx, cmd_rx) = command_channel();
        let classifier = ClassifierHandle::new(cmd_tx, streams.clone());
        let mediator = StateMediator::new(classifier, Arc::new(gateway));
        (mediator, streams, cmd_rx)
    }

    fn scanned(tag: &str) -> ScannedTag {
        ScannedTag {
            tag_id: TagId::from(tag),
            scanner_id: Some(CompactString::from("dock-3")),
            location_hint: None,
            occurred_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn test_scan_slot_hand_off_is_single_consumer() {
        let slot = ScanSlot::new();
        slot.set(scanned("TAG1"));

        assert_eq!(slot.peek().map(|t| t.tag_id), Some(TagId::from("TAG1")));
        assert!(slot.take().is_some());
        // The second consumer finds the slot already cleared.
        assert!(slot.take().is_none());
        assert!(slot.peek().is_none());
    }

    #[test]
    fn test_scan_slot_take_matching_leaves_other_tags() {
        let slot = ScanSlot::new();
        slot.set(scanned("TAG2"));

        assert!(slot.take_matching(&TagId::from("TAG1")).is_none());
        assert!(slot.peek().is_some());
        assert!(slot.take_matching(&TagId::from("TAG2")).is_some());
        assert!(slot.peek().is_none());
    }

    #[test]
    fn test_scan_slot_watch_sees_set_and_clear() {
        let slot = ScanSlot::new();
        let rx = slot.watch();

        slot.set(scanned("TAG1"));
        slot.clear();
        // Clearing an empty slot is not a change.
        slot.clear();
        assert_eq!(*rx.borrow(), 2);
    }

    #[tokio::test]
    async fn test_register_success_confirms_and_refreshes() {
        let (mediator, streams, mut cmd_rx) =
            mediator_with(StubGateway::registering(Ok(unit("TAG1", "U-100"))));
        let mut refresh_rx = streams.subscribe_refresh();

        let result = mediator.register_via_scan(register_request("TAG1")).await;
        assert_eq!(result.expect("registered").unit_code, "U-100");

        // Predict, then confirm, against the same transaction.
        let Some(crate::events::ClassifierCommand::Predict { record }) = cmd_rx.recv().await
        else {
            panic!("expected predict");
        };
        assert_eq!(record.natural_key, TagId::from("TAG1"));
        let txn = record.transaction_id.expect("transaction id");

        let Some(crate::events::ClassifierCommand::Confirm {
            transaction_id,
            action,
            fields,
        }) = cmd_rx.recv().await
        else {
            panic!("expected confirm");
        };
        assert_eq!(transaction_id, txn);
        assert_eq!(action, DomainAction::UnitRegistered);
        assert_eq!(
            fields.get("unitCode").and_then(Value::as_str),
            Some("U-100")
        );

        assert_eq!(
            refresh_rx.try_recv().expect("refresh hint").reason,
            RefreshReason::Mutation
        );
    }

    #[tokio::test]
    async fn test_register_failure_cancels_and_records_failure() {
        let (mediator, streams, mut cmd_rx) =
            mediator_with(StubGateway::registering(Err("duplicate".to_owned())));
        let mut refresh_rx = streams.subscribe_refresh();

        let key = TagId::from("TAG3");
        let result = mediator.register_via_scan(register_request("TAG3")).await;
        assert!(matches!(result, Err(ClientError::Rejected { .. })));

        let Some(crate::events::ClassifierCommand::Predict { .. }) = cmd_rx.recv().await else {
            panic!("expected predict");
        };
        let Some(crate::events::ClassifierCommand::Cancel {
            natural_key,
            reason,
            ..
        }) = cmd_rx.recv().await
        else {
            panic!("expected cancel");
        };
        assert_eq!(natural_key, key);
        assert_eq!(
            reason,
            crate::events::RollbackReason::Rejected {
                message: "duplicate".to_owned()
            }
        );

        // Failed mutations do not claim freshness.
        assert!(refresh_rx.try_recv().is_err());
        assert_eq!(mediator.failure_for(&key).as_deref(), Some("duplicate"));
    }

    #[tokio::test]
    async fn test_relay_fills_scan_slot_and_notifies() {
        let (mediator, _streams, _cmd_rx) =
            mediator_with(StubGateway::registering(Ok(unit("TAG1", "U-100"))));
        let relay = mediator.relay();
        let mut notifications = mediator.subscribe_notifications();

        let mut payload = Map::new();
        payload.insert(
            fields::LOCATION_HINT.to_owned(),
            Value::String("aisle-7".to_owned()),
        );
        relay
            .process(PredictiveEvent {
                record: PredictiveRecord {
                    natural_key: TagId::from("TAG4"),
                    transaction_id: None,
                    action: DomainAction::ScanDetected,
                    fields: payload,
                },
                urgent: true,
                channel: ChannelName::Scanner("dock-3".into()),
                occurred_at: OffsetDateTime::now_utc(),
            })
            .await
            .expect("relay never fails");

        let tag = mediator.scanned_data().expect("slot filled");
        assert_eq!(tag.tag_id, TagId::from("TAG4"));
        // Scanner recovered from the channel when the payload omits it.
        assert_eq!(tag.scanner_id.as_deref(), Some("dock-3"));
        assert_eq!(tag.location_hint.as_deref(), Some("aisle-7"));

        assert!(matches!(
            notifications.try_recv(),
            Ok(DomainNotification::ScanDetected(_))
        ));
    }

    #[tokio::test]
    async fn test_relay_translates_confirms_to_notifications() {
        let (mediator, _streams, _cmd_rx) =
            mediator_with(StubGateway::registering(Ok(unit("TAG1", "U-100"))));
        let relay = mediator.relay();
        let mut notifications = mediator.subscribe_notifications();

        let mut fields_map = Map::new();
        fields_map.insert(
            fields::UNIT_CODE.to_owned(),
            Value::String("U-100".to_owned()),
        );
        relay
            .process(SettlementEvent::Confirmed(crate::events::ConfirmedUpdate {
                natural_key: TagId::from("TAG1"),
                transaction_id: None,
                action: DomainAction::UnitRegistered,
                fields: fields_map,
                was_predicted: false,
                source: crate::events::ConfirmSource::Push,
            }))
            .await
            .expect("relay never fails");

        let Ok(DomainNotification::UnitRegistered { tag_id, unit_code }) =
            notifications.try_recv()
        else {
            panic!("expected registration notification");
        };
        assert_eq!(tag_id, TagId::from("TAG1"));
        assert_eq!(unit_code.as_deref(), Some("U-100"));
    }
}
