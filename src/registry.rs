//! Bounded table of active provisioning connections.
//!
//! Slots are a fixed arena indexed by small stable integers. A slot is held
//! by a [`SlotGuard`] owned by the connection's session, so it is released
//! exactly when the session ends, however it ends.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::error::RegistryFull;

/// Default number of concurrent connections.
pub const DEFAULT_CAPACITY: usize = 20;

/// Stable handle of a registry slot.
pub type SlotId = usize;

/// A point-in-time view of one occupied slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    pub id: SlotId,
    pub peer: SocketAddr,
}

#[derive(Debug)]
pub struct Registry {
    slots: Mutex<Vec<Option<SocketAddr>>>,
}

impl Registry {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(vec![None; capacity]),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Option<SocketAddr>>> {
        // Slot data is plain values; a panic elsewhere cannot leave it torn.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.lock().len()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.lock().iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claims the lowest free slot for `peer`.
    ///
    /// When every slot is taken the caller must close the connection; there
    /// is no waiting list.
    pub fn register(self: &Arc<Self>, peer: SocketAddr) -> Result<SlotGuard, RegistryFull> {
        let mut slots = self.lock();
        let capacity = slots.len();
        let Some(id) = slots.iter().position(Option::is_none) else {
            return Err(RegistryFull { capacity });
        };
        slots[id] = Some(peer);
        drop(slots);

        debug!("slot {} registered for {}", id, peer);
        Ok(SlotGuard {
            registry: Arc::clone(self),
            id,
        })
    }

    /// Clears a slot. Only [`SlotGuard`] calls this, so a slot id can never
    /// be released by anyone but its current owner.
    fn unregister(&self, id: SlotId) -> Option<SocketAddr> {
        let peer = self.lock().get_mut(id).and_then(Option::take);
        if let Some(peer) = peer {
            debug!("slot {} released by {}", id, peer);
        }
        peer
    }

    /// Copies the occupied slots out under the lock.
    ///
    /// For observation and debugging only: sessions receive their
    /// connections over the acceptor's channel, never by scanning this.
    pub fn snapshot(&self) -> Vec<SlotInfo> {
        self.lock()
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.map(|peer| SlotInfo { id, peer }))
            .collect()
    }
}

/// Ownership of one registry slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct SlotGuard {
    registry: Arc<Registry>,
    id: SlotId,
}

impl SlotGuard {
    pub fn id(&self) -> SlotId {
        self.id
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}
