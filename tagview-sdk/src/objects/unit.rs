//! Unit (asset) records and mutation requests.
//!
//! A *unit* is one RFID-tagged physical asset. The tag id is the natural
//! key: it is burned into the tag and every channel that reports the same
//! physical event reports the same tag id.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Lifecycle status of a unit on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Registered,
    InTransit,
    Stored,
    Retired,
}

/// An authoritative unit record as returned by the search endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitRecord {
    /// Server-side record id.
    pub unit_id: Uuid,

    /// The RFID tag id (natural key).
    pub tag_id: CompactString,

    /// Human-assigned unit code, e.g. `U-100`.
    pub unit_code: CompactString,

    /// Current location name.
    pub location: String,

    /// Scanner that last saw this unit, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scanner_id: Option<CompactString>,

    /// Lifecycle status.
    pub status: UnitStatus,

    /// Registration time, epoch seconds on the wire.
    #[serde(with = "time::serde::timestamp")]
    pub registered_at: OffsetDateTime,

    /// Last mutation time, epoch seconds on the wire.
    #[serde(with = "time::serde::timestamp")]
    pub updated_at: OffsetDateTime,
}

/// Request body for registering a new unit from a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUnitRequest {
    /// The RFID tag id read at the scanner.
    pub tag_id: CompactString,

    /// Human-assigned unit code.
    pub unit_code: CompactString,

    /// Initial location.
    pub location: String,

    /// Scanner the registration originated from, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scanner_id: Option<CompactString>,
}

/// Request body for moving a unit to a new location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLocationRequest {
    /// The RFID tag id of the unit to move.
    pub tag_id: CompactString,

    /// New location name.
    pub location: String,

    /// Scanner that observed the move, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scanner_id: Option<CompactString>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_record_wire_shape() {
        let json = r#"{
            "unitId":"0193a2a0-0000-7000-8000-000000000001",
            "tagId":"TAG1",
            "unitCode":"U-100",
            "location":"dock-3",
            "status":"registered",
            "registeredAt":1733140200,
            "updatedAt":1733140200
        }"#;
        let unit: UnitRecord = serde_json::from_str(json).expect("valid record");
        assert_eq!(unit.tag_id, "TAG1");
        assert_eq!(unit.unit_code, "U-100");
        assert_eq!(unit.status, UnitStatus::Registered);
        assert_eq!(unit.registered_at.unix_timestamp(), 1733140200);
        assert!(unit.scanner_id.is_none());
    }
}
