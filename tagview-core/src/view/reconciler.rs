//! Per-screen merge engine.
//!
//! Maintains a displayed list that is the union of the latest authoritative
//! page and any still-pending predictive rows not yet represented in it,
//! with no duplicates per natural key. Predictive rows order first so the
//! newest physical activity surfaces at the top.

use serde_json::{Map, Value};
use tagview_sdk::objects::unit::UnitRecord;

use crate::events::{
    ConfirmedUpdate, DomainAction, LocalPrediction, PredictiveEvent, PredictiveRecord, Rollback,
    SettlementEvent, TagId,
};

/// Lifecycle phase of a displayed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowPhase {
    /// Speculative placeholder, not yet authoritative.
    Pending,
    /// Authoritative row with an in-flight change against it.
    Updating,
    /// Authoritative.
    Settled,
}

/// One row of a screen's displayed set.
#[derive(Debug, Clone)]
pub struct DisplayRow {
    /// Natural key of the physical unit.
    pub key: TagId,
    /// Lifecycle phase.
    pub phase: RowPhase,
    /// The authoritative record, once known.
    pub unit: Option<UnitRecord>,
    /// Speculative or last-confirmed field values for rendering before an
    /// authoritative record exists.
    pub preview: Map<String, Value>,
    /// Highest-priority flag from the sender, for visual emphasis.
    pub urgent: bool,
    /// Whether this client's own action produced the row.
    pub local: bool,
}

impl DisplayRow {
    fn pending(record: &PredictiveRecord, urgent: bool, local: bool) -> Self {
        Self {
            key: record.natural_key.clone(),
            phase: RowPhase::Pending,
            unit: None,
            preview: record.fields.clone(),
            urgent,
            local,
        }
    }

    fn settled(unit: &UnitRecord) -> Self {
        Self {
            key: TagId::new(unit.tag_id.clone()),
            phase: RowPhase::Settled,
            unit: Some(unit.clone()),
            preview: Map::new(),
            urgent: false,
            local: false,
        }
    }
}

/// Effect a reconciliation step asks the owning screen to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEffect {
    /// Surface a failure attached to the row that initiated it, with the
    /// reason the row disappeared.
    SurfaceError { key: TagId, message: String },
}

/// The merge state of one screen.
///
/// Pure state machine: every input is an event or a page, every output is
/// the next displayed set plus optional effects. Driving it from streams
/// is [`ViewSession`](crate::view::ViewSession)'s job.
#[derive(Debug, Default)]
pub struct ViewReconciler {
    predictive: Vec<DisplayRow>,
    authoritative: Vec<DisplayRow>,
}

impl ViewReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The displayed set: predictive rows first, then authoritative.
    pub fn snapshot(&self) -> Vec<DisplayRow> {
        self.predictive
            .iter()
            .chain(self.authoritative.iter())
            .cloned()
            .collect()
    }

    /// Look up a displayed row by natural key.
    pub fn row(&self, key: &TagId) -> Option<&DisplayRow> {
        self.predictive
            .iter()
            .find(|row| &row.key == key)
            .or_else(|| self.authoritative.iter().find(|row| &row.key == key))
    }

    /// Apply a push-sourced predictive event.
    pub fn apply_predictive(&mut self, event: &PredictiveEvent) {
        self.insert_prediction(&event.record, event.urgent, false);
    }

    /// Apply a locally-initiated prediction.
    pub fn apply_local(&mut self, event: &LocalPrediction) {
        self.insert_prediction(&event.record, false, true);
    }

    /// Apply a settlement. Returns an effect the screen must surface.
    pub fn apply_settlement(&mut self, event: &SettlementEvent) -> Option<ViewEffect> {
        match event {
            SettlementEvent::Confirmed(update) => {
                self.apply_confirmed(update);
                None
            }
            SettlementEvent::RolledBack(rollback) => self.apply_rollback(rollback),
        }
    }

    /// Replace the authoritative set with a fresh page.
    ///
    /// Predictive rows whose key now appears in the page are superseded
    /// and dropped. Applying the same page twice is a no-op.
    pub fn apply_page(&mut self, results: &[UnitRecord]) {
        self.authoritative = results.iter().map(DisplayRow::settled).collect();
        self.predictive
            .retain(|row| !results.iter().any(|unit| unit.tag_id.as_str() == row.key.as_str()));
    }

    // -- Private helpers ----------------------------------------------------

    fn insert_prediction(&mut self, record: &PredictiveRecord, urgent: bool, local: bool) {
        if let Some(row) = self
            .authoritative
            .iter_mut()
            .find(|row| row.key == record.natural_key)
        {
            // Already settled: flag the existing row instead of
            // inserting a duplicate.
            row.phase = RowPhase::Updating;
            row.preview = record.fields.clone();
            row.urgent |= urgent;
            row.local |= local;
            return;
        }

        if let Some(row) = self
            .predictive
            .iter_mut()
            .find(|row| row.key == record.natural_key)
        {
            // A second channel reported the same physical event; keep the
            // single placeholder, merging flags and fields.
            row.preview = record.fields.clone();
            row.urgent |= urgent;
            row.local |= local;
            return;
        }

        self.predictive
            .insert(0, DisplayRow::pending(record, urgent, local));
    }

    fn apply_confirmed(&mut self, update: &ConfirmedUpdate) {
        self.predictive.retain(|row| row.key != update.natural_key);

        if update.action == DomainAction::UnitRemoved {
            self.authoritative.retain(|row| row.key != update.natural_key);
            return;
        }

        let unit = unit_from_fields(&update.fields);
        if let Some(row) = self
            .authoritative
            .iter_mut()
            .find(|row| row.key == update.natural_key)
        {
            row.phase = RowPhase::Settled;
            row.preview = update.fields.clone();
            if unit.is_some() {
                row.unit = unit;
            }
            row.urgent = false;
        } else {
            // Never displayed before (the predictive leg was missed):
            // insert it so the confirm still lands on screen.
            self.authoritative.insert(
                0,
                DisplayRow {
                    key: update.natural_key.clone(),
                    phase: RowPhase::Settled,
                    unit,
                    preview: update.fields.clone(),
                    urgent: false,
                    local: false,
                },
            );
        }
    }

    fn apply_rollback(&mut self, rollback: &Rollback) -> Option<ViewEffect> {
        let before = self.predictive.len();
        self.predictive.retain(|row| row.key != rollback.natural_key);
        let removed = self.predictive.len() != before;

        // Settle any updating flag on an authoritative row for the key.
        if let Some(row) = self
            .authoritative
            .iter_mut()
            .find(|row| row.key == rollback.natural_key && row.phase == RowPhase::Updating)
        {
            row.phase = RowPhase::Settled;
            row.preview = Map::new();
            return Some(ViewEffect::SurfaceError {
                key: rollback.natural_key.clone(),
                message: rollback.reason.to_string(),
            });
        }

        // Only screens that displayed the placeholder owe the user an
        // explanation for its disappearance.
        removed.then(|| ViewEffect::SurfaceError {
            key: rollback.natural_key.clone(),
            message: rollback.reason.to_string(),
        })
    }
}

/// Try to interpret confirmed fields as a full unit record.
fn unit_from_fields(map: &Map<String, Value>) -> Option<UnitRecord> {
    serde_json::from_value(Value::Object(map.clone())).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelName, ConfirmSource, RollbackReason, TransactionId};
    use time::OffsetDateTime;

    fn predictive(key: &str, urgent: bool) -> PredictiveEvent {
        predictive_on(key, urgent, ChannelName::Priority)
    }

    fn predictive_on(key: &str, urgent: bool, channel: ChannelName) -> PredictiveEvent {
        let mut fields = Map::new();
        fields.insert("rfid".to_owned(), Value::String(key.to_owned()));
        PredictiveEvent {
            record: PredictiveRecord {
                natural_key: TagId::from(key),
                transaction_id: None,
                action: DomainAction::ScanDetected,
                fields,
            },
            urgent,
            channel,
            occurred_at: OffsetDateTime::now_utc(),
        }
    }

    fn confirmed(key: &str, unit_code: &str) -> SettlementEvent {
        let mut fields = Map::new();
        fields.insert("rfid".to_owned(), Value::String(key.to_owned()));
        fields.insert("unitCode".to_owned(), Value::String(unit_code.to_owned()));
        SettlementEvent::Confirmed(ConfirmedUpdate {
            natural_key: TagId::from(key),
            transaction_id: None,
            action: DomainAction::UnitRegistered,
            fields,
            was_predicted: true,
            source: ConfirmSource::Push,
        })
    }

    fn rolled_back(key: &str, reason: RollbackReason) -> SettlementEvent {
        SettlementEvent::RolledBack(Rollback {
            natural_key: TagId::from(key),
            transaction_id: TransactionId::from("txn-1"),
            reason,
        })
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
            status: tagview_sdk::objects::unit::UnitStatus::Registered,
            registered_at,
            updated_at: registered_at,
        }
    }

    #[test]
    fn test_no_duplicate_placeholders_across_channels() {
        let mut view = ViewReconciler::new();

        view.apply_predictive(&predictive_on("TAG1", true, ChannelName::Priority));
        view.apply_predictive(&predictive_on(
            "TAG1",
            false,
            ChannelName::Scanner("dock-3".into()),
        ));

        let rows = view.snapshot();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].phase, RowPhase::Pending);
        // Urgency sticks once seen.
        assert!(rows[0].urgent);
    }

    #[test]
    fn test_prediction_for_settled_key_marks_updating() {
        let mut view = ViewReconciler::new();
        view.apply_page(&[unit("TAG1", "U-100")]);

        view.apply_predictive(&predictive("TAG1", false));

        let rows = view.snapshot();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].phase, RowPhase::Updating);
        assert!(rows[0].unit.is_some());
    }

    #[test]
    fn test_confirm_replaces_placeholder_with_confirmed_fields() {
        let mut view = ViewReconciler::new();

        view.apply_predictive(&predictive("TAG1", true));
        assert_eq!(view.snapshot()[0].phase, RowPhase::Pending);

        let effect = view.apply_settlement(&confirmed("TAG1", "U-100"));
        assert_eq!(effect, None);

        let rows = view.snapshot();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].phase, RowPhase::Settled);
        assert_eq!(
            rows[0].preview.get("unitCode").and_then(Value::as_str),
            Some("U-100")
        );
        assert!(!rows[0].urgent);
    }

    #[test]
    fn test_orphan_confirm_inserts_row() {
        let mut view = ViewReconciler::new();

        view.apply_settlement(&confirmed("TAG9", "U-900"));

        let rows = view.snapshot();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, TagId::from("TAG9"));
        assert_eq!(rows[0].phase, RowPhase::Settled);
    }

    #[test]
    fn test_rollback_removes_placeholder_and_explains() {
        let mut view = ViewReconciler::new();

        view.apply_predictive(&predictive("TAG3", false));
        let effect = view.apply_settlement(&rolled_back(
            "TAG3",
            RollbackReason::Rejected {
                message: "duplicate".to_owned(),
            },
        ));

        assert!(view.snapshot().is_empty());
        assert_eq!(
            effect,
            Some(ViewEffect::SurfaceError {
                key: TagId::from("TAG3"),
                message: "duplicate".to_owned(),
            })
        );
    }

    #[test]
    fn test_rollback_without_placeholder_is_silent() {
        let mut view = ViewReconciler::new();
        let effect = view.apply_settlement(&rolled_back("TAG3", RollbackReason::Timeout));
        assert_eq!(effect, None);
    }

    #[test]
    fn test_rollback_settles_updating_row() {
        let mut view = ViewReconciler::new();
        view.apply_page(&[unit("TAG1", "U-100")]);
        view.apply_predictive(&predictive("TAG1", false));
        assert_eq!(view.snapshot()[0].phase, RowPhase::Updating);

        let effect = view.apply_settlement(&rolled_back("TAG1", RollbackReason::Timeout));

        let rows = view.snapshot();
        assert_eq!(rows[0].phase, RowPhase::Settled);
        assert!(matches!(effect, Some(ViewEffect::SurfaceError { .. })));
    }

    #[test]
    fn test_removal_confirm_drops_row() {
        let mut view = ViewReconciler::new();
        view.apply_page(&[unit("TAG1", "U-100")]);

        let mut fields = Map::new();
        fields.insert("rfid".to_owned(), Value::String("TAG1".to_owned()));
        view.apply_settlement(&SettlementEvent::Confirmed(ConfirmedUpdate {
            natural_key: TagId::from("TAG1"),
            transaction_id: None,
            action: DomainAction::UnitRemoved,
            fields,
            was_predicted: false,
            source: ConfirmSource::Push,
        }));

        assert!(view.snapshot().is_empty());
    }

    #[test]
    fn test_page_application_is_idempotent() {
        let mut view = ViewReconciler::new();
        let page = vec![unit("TAG1", "U-100"), unit("TAG2", "U-200")];

        view.apply_page(&page);
        let once = view.snapshot();
        view.apply_page(&page);
        let twice = view.snapshot();

        assert_eq!(once.len(), twice.len());
        assert!(
            once.iter()
                .zip(twice.iter())
                .all(|(a, b)| a.key == b.key && a.phase == b.phase)
        );
    }

    #[test]
    fn test_page_supersedes_predicted_keys() {
        let mut view = ViewReconciler::new();

        view.apply_predictive(&predictive("TAG1", false));
        view.apply_predictive(&predictive("TAG9", false));
        view.apply_page(&[unit("TAG1", "U-100")]);

        let rows = view.snapshot();
        assert_eq!(rows.len(), 2);
        // The unconfirmed prediction survives, ordered first.
        assert_eq!(rows[0].key, TagId::from("TAG9"));
        assert_eq!(rows[0].phase, RowPhase::Pending);
        assert_eq!(rows[1].key, TagId::from("TAG1"));
        assert_eq!(rows[1].phase, RowPhase::Settled);
    }

    #[test]
    fn test_local_prediction_flagged_as_own_action() {
        let mut view = ViewReconciler::new();
        let mut fields = Map::new();
        fields.insert("rfid".to_owned(), Value::String("TAG2".to_owned()));
        view.apply_local(&LocalPrediction {
            record: PredictiveRecord {
                natural_key: TagId::from("TAG2"),
                transaction_id: Some(TransactionId::from("txn-1")),
                action: DomainAction::UnitRegistered,
                fields,
            },
        });

        let rows = view.snapshot();
        assert!(rows[0].local);
        assert!(!rows[0].urgent);
    }
}
