//! Subscriber Registry
//!
//! Thread-safe set of active output sinks, keyed by a registry-issued
//! identity rather than anything the subscriber supplies.
//!
//! # Design
//!
//! Every operation takes the same mutex. `snapshot` copies the entries out
//! under the lock so callers iterate a stable list and perform their I/O
//! after the lock is released. Mutations made while a broadcast is in flight
//! only become visible to the next snapshot.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

// =============================================================================
// Types
// =============================================================================

/// Identity of a registered sink.
///
/// Issued in increasing order, never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SinkId(u64);

impl SinkId {
    /// Raw numeric value, for logging.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink-{}", self.0)
    }
}

/// Registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Sinks currently registered.
    pub active: usize,
    /// Sinks registered since creation.
    pub total_registered: u64,
    /// Sinks removed since creation.
    pub total_unregistered: u64,
}

#[derive(Debug)]
struct RegistryInner<T: ?Sized> {
    sinks: BTreeMap<SinkId, Arc<T>>,
    next_id: u64,
    total_unregistered: u64,
}

// =============================================================================
// Subscriber Registry
// =============================================================================

/// Set of sinks shared between the broadcast engine and subscriber endpoints.
///
/// Generic over the sink type so the domain stays transport independent;
/// the application uses `SubscriberRegistry<dyn Sink>`.
#[derive(Debug)]
pub struct SubscriberRegistry<T: ?Sized> {
    inner: Mutex<RegistryInner<T>>,
}

impl<T: ?Sized> Default for SubscriberRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> SubscriberRegistry<T> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                sinks: BTreeMap::new(),
                next_id: 1,
                total_unregistered: 0,
            }),
        }
    }

    /// Add a sink. It is visible to every snapshot taken after this returns.
    pub fn register(&self, sink: Arc<T>) -> SinkId {
        let mut inner = self.inner.lock();
        let id = SinkId(inner.next_id);
        inner.next_id += 1;
        inner.sinks.insert(id, sink);
        id
    }

    /// Remove a sink.
    ///
    /// Returns `true` if the sink was present. Removing an absent sink is a
    /// no-op.
    pub fn unregister(&self, id: SinkId) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.sinks.remove(&id).is_some();
        if removed {
            inner.total_unregistered += 1;
        }
        removed
    }

    /// Point-in-time copy of all sinks in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(SinkId, Arc<T>)> {
        self.inner
            .lock()
            .sinks
            .iter()
            .map(|(id, sink)| (*id, Arc::clone(sink)))
            .collect()
    }

    /// Whether a sink is currently registered.
    #[must_use]
    pub fn contains(&self, id: SinkId) -> bool {
        self.inner.lock().sinks.contains_key(&id)
    }

    /// Number of registered sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().sinks.len()
    }

    /// Whether no sinks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().sinks.is_empty()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.lock();
        RegistryStats {
            active: inner.sinks.len(),
            total_registered: inner.next_id - 1,
            total_unregistered: inner.total_unregistered,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
