//! Session pool and lookup.
//!
//! All sessions are allocated up front. Acquire and release are O(1) through
//! a stack of free slot indices. Only authenticated sessions appear in the
//! name and id maps; both maps live behind one reader/writer lock so lookups
//! run in parallel while registration and broadcast are exclusive.

use crate::error::RegistryError;
use crate::session::{Session, SessionLimits};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct Lookup {
    by_name: HashMap<String, u32>,
    by_id: HashMap<u32, Arc<Session>>,
}

/// Fixed pool of sessions plus the authenticated-user directory.
pub struct SessionRegistry {
    pool: Vec<Arc<Session>>,
    free: Mutex<Vec<usize>>,
    lookup: RwLock<Lookup>,
}

impl SessionRegistry {
    /// Allocate `capacity` idle sessions.
    pub fn new(capacity: usize, limits: SessionLimits) -> Self {
        let pool = (0..capacity)
            .map(|slot| Arc::new(Session::new(slot, limits)))
            .collect();
        // Lowest slot on top of the stack
        let free = (0..capacity).rev().collect();

        Self {
            pool,
            free: Mutex::new(free),
            lookup: RwLock::new(Lookup::default()),
        }
    }

    /// Take an idle session out of the pool. `None` means the pool is exhausted.
    pub fn acquire(&self) -> Option<Arc<Session>> {
        let slot = self.free.lock().pop()?;
        let session = &self.pool[slot];
        let leased = session.try_lease();
        debug_assert!(leased, "slot {slot} was on the free stack while leased");
        Some(Arc::clone(session))
    }

    /// Unregister, reset and return a session to the pool.
    ///
    /// Releasing a session that is already back in the pool does nothing.
    pub fn release(&self, session: &Arc<Session>) {
        self.unregister_authenticated(session);
        session.reset();
        if session.end_lease() {
            self.free.lock().push(session.slot());
        }
    }

    /// Mark connection `session_id` on `session` authenticated as `username`
    /// and publish it in the maps.
    ///
    /// The name check and the state change happen under the same exclusive
    /// lock, so two sessions can never both register one name. Fails with
    /// `InvalidSession` if the connection no longer owns the slot.
    pub fn register_authenticated(
        &self,
        session: &Arc<Session>,
        session_id: u32,
        username: &str,
        token: String,
    ) -> Result<(), RegistryError> {
        let mut lookup = self.lookup.write();

        if let Some(&owner) = lookup.by_name.get(username) {
            let owner_live = lookup.by_id.get(&owner).is_some_and(|s| s.is_valid());
            if owner_live {
                return Err(RegistryError::NameTaken(username.to_string()));
            }
            // Owner is mid-teardown; its own unregister only removes entries
            // that still point at it.
            lookup.by_name.remove(username);
        }

        if !session.authenticate(session_id, username, token) {
            return Err(RegistryError::InvalidSession(session_id));
        }

        lookup.by_name.insert(username.to_string(), session_id);
        lookup.by_id.insert(session_id, Arc::clone(session));
        tracing::debug!(session_id, username, "Registered session");
        Ok(())
    }

    /// Remove a session from both maps. No-op if it never authenticated.
    pub fn unregister_authenticated(&self, session: &Session) {
        let Some((session_id, username)) = session.registration() else {
            return;
        };

        let mut lookup = self.lookup.write();
        if lookup.by_name.get(&username) == Some(&session_id) {
            lookup.by_name.remove(&username);
        }
        lookup.by_id.remove(&session_id);
    }

    /// Live authenticated session registered under `username`.
    pub fn find_by_name(&self, username: &str) -> Option<Arc<Session>> {
        let lookup = self.lookup.read();
        let session_id = lookup.by_name.get(username)?;
        lookup
            .by_id
            .get(session_id)
            .filter(|session| session.is_valid())
            .cloned()
    }

    /// Live authenticated session with id `session_id`.
    pub fn find_by_id(&self, session_id: u32) -> Option<Arc<Session>> {
        self.lookup
            .read()
            .by_id
            .get(&session_id)
            .filter(|session| session.is_valid())
            .cloned()
    }

    /// Send `data` to the live session registered under `username`.
    ///
    /// Lookup and send happen under one shared lock, so the target cannot be
    /// released and recycled in between. Returns `None` if nobody by that
    /// name is online, otherwise whether the packet was queued.
    pub fn send_to(&self, username: &str, data: Bytes) -> Option<bool> {
        let lookup = self.lookup.read();
        lookup
            .by_name
            .get(username)
            .and_then(|session_id| lookup.by_id.get(session_id))
            .filter(|session| session.is_valid())
            .map(|session| session.send(data))
    }

    /// Send `data` to every live authenticated session except `exclude`.
    ///
    /// Returns the number of sessions that accepted the packet.
    pub fn broadcast(&self, exclude: Option<&Session>, data: &Bytes) -> usize {
        let lookup = self.lookup.write();
        lookup
            .by_id
            .values()
            .filter(|session| exclude.is_none_or(|ex| ex.slot() != session.slot()))
            .filter(|session| session.is_valid())
            .filter(|session| session.send(data.clone()))
            .count()
    }

    /// Session in pool slot `slot`, whether leased or idle.
    pub fn slot(&self, slot: usize) -> Option<&Arc<Session>> {
        self.pool.get(slot)
    }

    /// Every session in the pool.
    pub fn sessions(&self) -> &[Arc<Session>] {
        &self.pool
    }

    /// Pool size.
    pub fn capacity(&self) -> usize {
        self.pool.len()
    }

    /// Idle sessions left in the pool.
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    /// Sessions currently registered as authenticated.
    pub fn authenticated_count(&self) -> usize {
        self.lookup.read().by_id.len()
    }
}
