//! View reconciliation: the per-screen merge engine and its driver.
//!
//! [`ViewReconciler`] is the pure merge state (speculative placeholders
//! merged with authoritative pages); [`ViewSession`] drives one screen's
//! reconciler from the live streams and owns the claim protocol.

pub mod reconciler;
pub mod session;

pub use reconciler::{DisplayRow, RowPhase, ViewEffect, ViewReconciler};
pub use session::{ClaimPolicy, SessionEvent, ViewBinding, ViewSession};
