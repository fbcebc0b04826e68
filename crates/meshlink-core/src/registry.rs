//! Link registry
//!
//! Process-wide table of live links keyed by [`LinkKey`]. Holds at most one
//! link per key. Every mutation is a single check-then-act step under one
//! write lock. The lock is synchronous and never held across an await, so
//! entries can also be released from `Drop`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::signal::ClosedSignal;
use crate::types::LinkKey;

// ----------------------------------------------------------------------------
// Registered Link Handle
// ----------------------------------------------------------------------------

/// What the registry keeps for a live link
#[derive(Debug)]
pub struct LinkHandle {
    name: String,
    key: LinkKey,
    incoming: bool,
    closed: ClosedSignal,
    established: Instant,
}

impl LinkHandle {
    pub fn new(name: impl Into<String>, key: LinkKey, incoming: bool) -> Self {
        Self {
            name: name.into(),
            key,
            incoming,
            closed: ClosedSignal::new(),
            established: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &LinkKey {
        &self.key
    }

    pub fn is_incoming(&self) -> bool {
        self.incoming
    }

    /// Signal fired when this link leaves the registry
    pub fn closed(&self) -> &ClosedSignal {
        &self.closed
    }

    pub fn uptime(&self) -> Duration {
        self.established.elapsed()
    }

    pub fn summary(&self) -> LinkSummary {
        LinkSummary {
            name: self.name.clone(),
            key: self.key.clone(),
            incoming: self.incoming,
            uptime: self.uptime(),
        }
    }
}

/// Diagnostic snapshot of one live link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSummary {
    pub name: String,
    pub key: LinkKey,
    pub incoming: bool,
    pub uptime: Duration,
}

// ----------------------------------------------------------------------------
// Registration Outcome
// ----------------------------------------------------------------------------

/// Result of a registration attempt
#[derive(Debug, Clone)]
pub enum Registration {
    /// The link is now the registered link for its key
    Inserted,
    /// Another link already holds the key; carries that link's closure signal
    Duplicate(ClosedSignal),
}

impl Registration {
    pub fn inserted(&self) -> bool {
        matches!(self, Registration::Inserted)
    }

    /// The existing link's closure signal, for duplicates
    pub fn existing(&self) -> Option<&ClosedSignal> {
        match self {
            Registration::Inserted => None,
            Registration::Duplicate(signal) => Some(signal),
        }
    }
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

/// Concurrency-safe map of live links
#[derive(Debug, Default)]
pub struct LinkRegistry {
    links: RwLock<HashMap<LinkKey, Arc<LinkHandle>>>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave the map half-updated
    fn read(&self) -> RwLockReadGuard<'_, HashMap<LinkKey, Arc<LinkHandle>>> {
        self.links.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<LinkKey, Arc<LinkHandle>>> {
        self.links.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `handle` unless its key is already taken
    ///
    /// An existing entry is never replaced: the caller gets that entry's
    /// closure signal and must tear its own connection down.
    pub fn register(&self, handle: Arc<LinkHandle>) -> Registration {
        let mut links = self.write();
        if let Some(existing) = links.get(handle.key()) {
            debug!("found existing link for {}", handle.name());
            return Registration::Duplicate(existing.closed().clone());
        }
        debug!("registered link for {}", handle.name());
        links.insert(handle.key().clone(), handle);
        Registration::Inserted
    }

    /// Remove `handle` and fire its closure signal
    ///
    /// The entry is only removed while it is still this exact handle, so a
    /// slow teardown cannot evict a newer link that reuses the key. Returns
    /// whether an entry was removed.
    pub fn deregister(&self, handle: &Arc<LinkHandle>) -> bool {
        let removed = {
            let mut links = self.write();
            match links.get(handle.key()) {
                Some(current) if Arc::ptr_eq(current, handle) => {
                    links.remove(handle.key());
                    true
                }
                _ => false,
            }
        };
        handle.closed().fire();
        removed
    }

    pub fn lookup(&self, key: &LinkKey) -> Option<Arc<LinkHandle>> {
        self.read().get(key).cloned()
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// Summaries of every live link, ordered by name
    pub fn snapshot(&self) -> Vec<LinkSummary> {
        let mut out: Vec<LinkSummary> = self
            .read()
            .values()
            .map(|handle| handle.summary())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}
