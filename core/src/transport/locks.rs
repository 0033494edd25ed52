//! Mutual exclusion for connect, disconnect and write
//!
//! With [`LockScope::Manager`] every operation shares one lock. With
//! [`LockScope::PerAddress`] operations on different devices run in parallel
//! while operations on the same device still queue. A per-address lock
//! nobody holds or waits for is dropped the next time a lock is requested.

use crate::config::LockScope;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

pub struct OperationLocks {
    scope: LockScope,
    global: Arc<AsyncMutex<()>>,
    per_address: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl OperationLocks {
    pub fn new(scope: LockScope) -> Self {
        Self {
            scope,
            global: Arc::new(AsyncMutex::new(())),
            per_address: Mutex::new(HashMap::new()),
        }
    }

    pub fn scope(&self) -> LockScope {
        self.scope
    }

    fn lock_for(&self, address: &str) -> Arc<AsyncMutex<()>> {
        match self.scope {
            LockScope::Manager => self.global.clone(),
            LockScope::PerAddress => {
                let mut locks = self.per_address.lock();
                // Only the map references an idle lock.
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
                locks
                    .entry(address.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                    .clone()
            }
        }
    }

    /// Wait for exclusive access to `address`.
    ///
    /// The guard is owned so it can move into the worker task holding it.
    pub async fn acquire(&self, address: &str) -> OwnedMutexGuard<()> {
        let lock = self.lock_for(address);
        trace!("Waiting for operation lock on {}", address);
        lock.lock_owned().await
    }
}
