//! Service sets — what this peer offers and what it has heard.
//!
//! Both sets are ordered so that snapshots and the shutdown sweep have a
//! defined iteration order. Each set lives behind its own leaf mutex; the
//! raw container is never exposed, only operations, which scopes the
//! locking discipline to this module.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::net::IpAddr;

use parking_lot::Mutex;

use chirp_core::wire::ServiceIdentifier;
use chirp_core::Md5Hash;

// ── Service records ───────────────────────────────────────────────────────────

/// A service this peer offers: what kind, and on which port.
///
/// The local group and name are process-wide (supplied at manager
/// construction) and deliberately not part of this record. The derived
/// ordering is identifier tag first, then port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RegisteredService {
    pub identifier: ServiceIdentifier,
    pub port: u16,
}

/// A remote peer's service as observed in an OFFER.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveredService {
    /// Source address of the announcing datagram.
    ///
    /// Not part of identity: the same peer may reach us over several
    /// source addresses, and its service is still one service. Ordering
    /// and equality use (name_hash, identifier, port) only.
    pub address: IpAddr,
    pub name_hash: Md5Hash,
    pub identifier: ServiceIdentifier,
    pub port: u16,
}

impl PartialEq for DiscoveredService {
    fn eq(&self, other: &Self) -> bool {
        self.name_hash == other.name_hash
            && self.identifier == other.identifier
            && self.port == other.port
    }
}

impl Eq for DiscoveredService {}

impl PartialOrd for DiscoveredService {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DiscoveredService {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name_hash
            .cmp(&other.name_hash)
            .then(self.identifier.cmp(&other.identifier))
            .then(self.port.cmp(&other.port))
    }
}

// ── Set ───────────────────────────────────────────────────────────────────────

/// An ordered set behind its own mutex.
///
/// The mutex is a leaf lock: no operation here calls out while holding
/// it, and callers get isolated copies rather than references into the
/// container.
pub struct ServiceSet<T> {
    inner: Mutex<BTreeSet<T>>,
}

impl<T: Ord + Clone> ServiceSet<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeSet::new()),
        }
    }

    /// Insert a value. Returns true iff it was not already present.
    pub fn insert(&self, value: T) -> bool {
        self.inner.lock().insert(value)
    }

    /// Remove a value. Returns true iff it was present.
    pub fn remove(&self, value: &T) -> bool {
        self.inner.lock().remove(value)
    }

    pub fn contains(&self, value: &T) -> bool {
        self.inner.lock().contains(value)
    }

    /// An isolated copy of the current contents.
    pub fn snapshot(&self) -> BTreeSet<T> {
        self.inner.lock().clone()
    }

    /// Empty the set, returning the former contents in iteration order.
    pub fn take_all(&self) -> Vec<T> {
        std::mem::take(&mut *self.inner.lock()).into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl<T: Ord + Clone> Default for ServiceSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
