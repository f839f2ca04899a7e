//! SDK for Tagview, a real-time RFID inventory console.
//!
//! The [`objects`] module holds the shared wire types: the push channel
//! contract and the paginated REST contract. The [`client`] module (behind
//! the `client` cargo feature) provides typed HTTP and WebSocket clients so
//! downstream crates that only need the types do not pull in `reqwest`.

pub mod objects;

#[cfg(feature = "client")]
pub mod client;
