//! Per-name mutual exclusion for container mutations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serializes mutating runtime calls that target the same container name.
///
/// Different names never contend. Entries nobody holds are pruned on the
/// next acquire.
#[derive(Debug, Default)]
pub struct NameLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other holder owns `name`, then hold it until the
    /// returned guard is dropped.
    pub async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            map.retain(|key, lock| key == name || Arc::strong_count(lock) > 1);
            map.entry(name.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of names currently tracked.
    pub fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}
