//! Claim table: which mounted view may *act* on a physical event.
//!
//! Display and action-ownership are independent: any screen may render a
//! predictive row, but only the claim winner navigates, mutates, or clears
//! the scan slot for it. Claims are first-come and never re-litigated;
//! losing a claim is steady-state behavior, not an error.
//!
//! The table is keyed by natural key rather than flags on shared event
//! payloads, so no consumer ever mutates another consumer's view of an
//! event.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use compact_str::{CompactString, ToCompactString};
use uuid::Uuid;

use crate::events::TagId;

/// Identity of one mounted view (screen).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewId(CompactString);

impl ViewId {
    pub fn new(id: impl Into<CompactString>) -> Self {
        Self(id.into())
    }

    /// Generate a unique id with a human-readable prefix.
    pub fn generate(prefix: &str) -> Self {
        let mut id = CompactString::new(prefix);
        id.push(':');
        id.push_str(&Uuid::new_v4().simple().to_compact_string());
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ViewId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Atomic first-come claim registry, `natural key -> claimant`.
///
/// All operations are single synchronous steps under one lock; there is no
/// suspension point between test and set, so two screens racing in the
/// same tick resolve by lock acquisition order.
#[derive(Debug, Default)]
pub struct ClaimTable {
    claims: Mutex<HashMap<TagId, ViewId>>,
}

impl ClaimTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to claim `key` for `claimant`.
    ///
    /// Returns `true` when `claimant` owns the claim afterwards — either
    /// it won the race or it already held the claim.
    pub fn claim(&self, key: &TagId, claimant: &ViewId) -> bool {
        let mut claims = self.lock();
        match claims.get(key) {
            Some(owner) => owner == claimant,
            None => {
                claims.insert(key.clone(), claimant.clone());
                true
            }
        }
    }

    /// Current owner of `key`, if any.
    pub fn owner(&self, key: &TagId) -> Option<ViewId> {
        self.lock().get(key).cloned()
    }

    /// Release `key` if `claimant` owns it. Safe to call when it does not.
    pub fn release(&self, key: &TagId, claimant: &ViewId) {
        let mut claims = self.lock();
        if claims.get(key) == Some(claimant) {
            claims.remove(key);
        }
    }

    /// Drop the claim on `key` regardless of owner.
    ///
    /// Used when the underlying event settles or rolls back and the claim
    /// has nothing left to guard.
    pub fn clear(&self, key: &TagId) {
        self.lock().remove(key);
    }

    /// Release every claim held by `claimant` (view unmount).
    pub fn release_view(&self, claimant: &ViewId) {
        self.lock().retain(|_, owner| owner != claimant);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TagId, ViewId>> {
        self.claims.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_claim_wins() {
        let table = ClaimTable::new();
        let key = TagId::from("TAG1");
        let a = ViewId::new("register-a");
        let b = ViewId::new("register-b");

        assert!(table.claim(&key, &a));
        assert!(!table.claim(&key, &b));
        assert_eq!(table.owner(&key), Some(a.clone()));

        // Claims are not re-litigated: the winner stays the winner.
        assert!(table.claim(&key, &a));
    }

    #[test]
    fn test_release_only_by_owner() {
        let table = ClaimTable::new();
        let key = TagId::from("TAG1");
        let a = ViewId::new("a");
        let b = ViewId::new("b");

        assert!(table.claim(&key, &a));
        table.release(&key, &b);
        assert_eq!(table.owner(&key), Some(a.clone()));

        table.release(&key, &a);
        assert_eq!(table.owner(&key), None);
        assert!(table.claim(&key, &b));
    }

    #[test]
    fn test_release_view_frees_all_keys() {
        let table = ClaimTable::new();
        let a = ViewId::new("a");
        let b = ViewId::new("b");
        let k1 = TagId::from("TAG1");
        let k2 = TagId::from("TAG2");
        let k3 = TagId::from("TAG3");

        assert!(table.claim(&k1, &a));
        assert!(table.claim(&k2, &a));
        assert!(table.claim(&k3, &b));

        table.release_view(&a);
        assert_eq!(table.owner(&k1), None);
        assert_eq!(table.owner(&k2), None);
        assert_eq!(table.owner(&k3), Some(b));
    }

    #[test]
    fn test_clear_ignores_ownership() {
        let table = ClaimTable::new();
        let key = TagId::from("TAG1");
        let a = ViewId::new("a");

        assert!(table.claim(&key, &a));
        table.clear(&key);
        assert_eq!(table.owner(&key), None);
    }
}
