//! Runtime configuration for the reconciliation core.
//!
//! These are validated runtime values shared across crates. File parsing
//! and CLI overrides are handled by the console binary.

mod config_store;

pub use config_store::{ConfigStore, ConfigWatcher};

use compact_str::CompactString;
use std::time::Duration;

/// Tuning for the reconciliation core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// How long a pending transaction may wait for its confirmation before
    /// it is force-cancelled with a timeout reason.
    pub pending_ttl: Duration,

    /// How often the classifier sweeps the pending table for expired
    /// entries.
    pub sweep_interval: Duration,

    /// Broadcast capacity of the outbound streams.
    pub stream_capacity: usize,

    /// Page size for authoritative re-queries issued by view sessions.
    pub page_size: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            pending_ttl: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(1),
            stream_capacity: crate::events::DEFAULT_STREAM_CAPACITY,
            page_size: 50,
        }
    }
}

/// The set of physical scanners whose channels should be live.
///
/// Held in a [`ConfigStore`] so a config reload can swap the set at
/// runtime; the fan-in and the transport adapter reconcile against it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannerSet {
    /// Scanner ids, one per-scanner channel each.
    pub scanner_ids: Vec<CompactString>,
}
