use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-key async mutexes, e.g. one per circle.
///
/// Holding the guard serializes all work on that key within this process;
/// different keys never contend.
#[derive(Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: Uuid) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock();
            // Drop idle slots nobody is holding or waiting on
            slots.retain(|k, m| *k == key || Arc::strong_count(m) > 1);
            slots.entry(key).or_default().clone()
        };
        slot.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
