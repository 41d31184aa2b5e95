//! Connection registry: at most one connection per hub identifier.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::error::HubError;

/// Registry slot for one hub.
enum Slot<C> {
    /// A start is in flight; the token aborts its retry loop.
    Connecting(CancellationToken),
    /// A live connection.
    Live(Arc<C>),
}

/// Maps hub identifiers to their live connection.
///
/// Cloning shares the underlying map. Only the hub manager and the close
/// callbacks it installs mutate it.
pub struct ConnectionRegistry<C> {
    known: Arc<BTreeSet<String>>,
    slots: Arc<Mutex<HashMap<String, Slot<C>>>>,
}

impl<C> Clone for ConnectionRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            known: self.known.clone(),
            slots: self.slots.clone(),
        }
    }
}

impl<C> ConnectionRegistry<C> {
    /// Creates an empty registry accepting the given hub identifiers.
    pub fn new<I, S>(hubs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: Arc::new(hubs.into_iter().map(Into::into).collect()),
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot<C>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, hub: &str) -> Result<(), HubError> {
        if self.known.contains(hub) {
            Ok(())
        } else {
            Err(HubError::Configuration { hub: hub.into() })
        }
    }

    /// Returns the live connection for `hub`, if any.
    ///
    /// A hub whose start is still in flight has no connection yet.
    pub fn get(&self, hub: &str) -> Result<Option<Arc<C>>, HubError> {
        self.check(hub)?;
        Ok(match self.slots().get(hub) {
            Some(Slot::Live(conn)) => Some(conn.clone()),
            _ => None,
        })
    }

    /// Returns `true` if a start is in flight for `hub`.
    pub fn is_connecting(&self, hub: &str) -> bool {
        matches!(self.slots().get(hub), Some(Slot::Connecting(_)))
    }

    /// Hubs with a live or in-flight entry.
    pub fn active_hubs(&self) -> Vec<String> {
        let mut hubs: Vec<String> = self.slots().keys().cloned().collect();
        hubs.sort();
        hubs
    }

    /// Marks a start as in flight.
    pub(crate) fn begin(&self, hub: &str, cancel: CancellationToken) {
        self.slots()
            .insert(hub.to_string(), Slot::Connecting(cancel));
    }

    /// Stores the live connection for `hub`.
    pub(crate) fn set(&self, hub: &str, conn: Arc<C>) {
        self.slots().insert(hub.to_string(), Slot::Live(conn));
    }

    /// Signals the in-flight start for `hub`, if any. The slot is kept until
    /// the start itself unwinds.
    pub(crate) fn cancel_pending(&self, hub: &str) -> bool {
        match self.slots().get(hub) {
            Some(Slot::Connecting(cancel)) => {
                cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Removes the entry for `hub` and returns the connection it held.
    pub(crate) fn clear(&self, hub: &str) -> Option<Arc<C>> {
        match self.slots().remove(hub) {
            Some(Slot::Live(conn)) => Some(conn),
            Some(Slot::Connecting(cancel)) => {
                cancel.cancel();
                None
            }
            None => None,
        }
    }

    /// Removes the entry for `hub` only if it still holds `conn`.
    pub(crate) fn clear_if(&self, hub: &str, conn: &Arc<C>) -> bool {
        let mut slots = self.slots();
        let matches = matches!(slots.get(hub), Some(Slot::Live(c)) if Arc::ptr_eq(c, conn));
        if matches {
            slots.remove(hub);
        }
        matches
    }
}
