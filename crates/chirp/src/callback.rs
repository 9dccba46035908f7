//! Discovery callback registry.
//!
//! Applications register a function pointer plus an opaque user value and
//! are notified once per state transition of a discovered service. A
//! given (function, user value) pair is registered at most once; identity
//! of the user value is the Arc allocation, not its contents.

use std::any::Any;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::registry::DiscoveredService;

/// Opaque per-registration user value, passed back on every invocation.
///
/// Dispatch clones the Arc into each detached task, so the value lives at
/// least as long as any in-flight callback.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Called once per discovery event: `departing` is false when the service
/// entered the discovered set, true when it left.
pub type DiscoverCallback = fn(service: DiscoveredService, departing: bool, user: UserData);

/// One registered (callback, user) pair.
#[derive(Clone)]
pub struct CallbackEntry {
    pub callback: DiscoverCallback,
    pub user: UserData,
}

impl CallbackEntry {
    /// Identity key: the function pointer and the user allocation.
    fn key(&self) -> (usize, usize) {
        let user_ptr = Arc::as_ptr(&self.user) as *const () as usize;
        (self.callback as usize, user_ptr)
    }
}

impl PartialEq for CallbackEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for CallbackEntry {}

impl PartialOrd for CallbackEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CallbackEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// The set of registered callbacks, behind its own leaf mutex.
pub struct CallbackRegistry {
    inner: Mutex<BTreeSet<CallbackEntry>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeSet::new()),
        }
    }

    /// Register a pair. Returns true iff it was newly inserted.
    pub fn register(&self, callback: DiscoverCallback, user: UserData) -> bool {
        self.inner.lock().insert(CallbackEntry { callback, user })
    }

    /// Unregister a pair. Returns true iff it was present.
    pub fn unregister(&self, callback: DiscoverCallback, user: &UserData) -> bool {
        self.inner.lock().remove(&CallbackEntry {
            callback,
            user: Arc::clone(user),
        })
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// An isolated copy of the current entries, for dispatch.
    pub fn snapshot(&self) -> Vec<CallbackEntry> {
        self.inner.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
