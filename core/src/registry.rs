use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::connection::ConnectionId;
use crate::error::LiveccErr;
use crate::error::Result;
use crate::session::Session;

/// Connection id -> live session. The only structure shared by every
/// connection; the lock is never held across an await.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    next_connection_id: AtomicU64,
    sessions: StdMutex<HashMap<ConnectionId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn register(&self, id: ConnectionId, session: Arc<Session>) -> Result<()> {
        match self.lock().entry(id) {
            Entry::Occupied(_) => Err(LiveccErr::DuplicateSession { connection_id: id }),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, id: ConnectionId) -> Option<Arc<Session>> {
        self.lock().get(&id).cloned()
    }

    /// Removes and returns the entry so the caller can tear it down exactly
    /// once.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Session>> {
        self.lock().remove(&id)
    }

    /// Removes the entry only if it is still `session`, so a finished run
    /// cannot evict the run that replaced it.
    pub fn remove_if_current(&self, id: ConnectionId, session: &Arc<Session>) -> bool {
        let mut sessions = self.lock();
        match sessions.get(&id) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(&id);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
