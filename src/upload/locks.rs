//! Per-upload lock table
//!
//! Serialises mutations of a single upload while leaving different uploads
//! free to proceed in parallel. Entries are removed once no guard or waiter
//! references them, so the table only grows with in-flight requests.

use std::collections::hash_map::{Entry, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

use super::types::UploadId;

/// Mutex for one upload plus the number of holders and waiters using it
#[derive(Default)]
struct LockEntry {
    mutex: Arc<tokio::sync::Mutex<()>>,
    users: usize,
}

type LockMap = HashMap<UploadId, LockEntry>;

/// Table of async mutexes keyed by upload ID
#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<Mutex<LockMap>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`
    pub async fn lock(&self, id: UploadId) -> KeyGuard {
        let mutex = {
            let mut map = self.inner.lock();
            let entry = map.entry(id).or_default();
            entry.users += 1;
            entry.mutex.clone()
        };

        // Registered before waiting, so a cancelled wait still releases its
        // slot when this guard is dropped
        let mut key = KeyGuard {
            id,
            table: self.inner.clone(),
            guard: None,
        };
        key.guard = Some(mutex.lock_owned().await);
        key
    }

    /// Number of IDs currently held or awaited
    pub fn active_keys(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Exclusive access to one upload, released on drop
pub struct KeyGuard {
    id: UploadId,
    table: Arc<Mutex<LockMap>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyGuard {
    pub fn id(&self) -> UploadId {
        self.id
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut map = self.table.lock();
        if let Entry::Occupied(mut entry) = map.entry(self.id) {
            entry.get_mut().users -= 1;
            if entry.get().users == 0 {
                entry.remove();
            }
        }
    }
}

impl std::fmt::Debug for KeyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGuard").field("id", &self.id).finish()
    }
}
