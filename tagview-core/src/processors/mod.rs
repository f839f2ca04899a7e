//! Processors of the reconciliation pipeline.
//!
//! - `ChannelFanIn`: normalizes raw push frames into `Envelope`s
//! - `EventClassifier`: tiers envelopes, tracks in-flight transactions,
//!   fans out the predictive / settlement / immediate streams
//! - `StateMediator` / `DomainRelay`: domain vocabulary, the scan slot,
//!   optimistic REST mutations, refresh broadcasts

pub mod classifier;
pub mod fan_in;
pub mod mediator;

pub use classifier::{ClassifierClosed, ClassifierHandle, EventClassifier};
pub use fan_in::{ChannelFanIn, FanInError, InboundFrame, SubscriptionHandle};
pub use mediator::{DomainRelay, ScanSlot, StateMediator};
