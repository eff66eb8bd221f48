//! Per-content-hash serialization so two concurrent `store()`/`delete()`
//! calls for the same hash never race, without taking a store-wide lock.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self { locks: DashMap::new() }
    }

    /// Acquire the lock for `key`, creating it on first use. The returned
    /// guard releases the lock on drop.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_key_serializes() {
        let locks = KeyedLocks::new();
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let locks = Arc::new(locks);
        let mut handles = Vec::new();
        for i in 0..5 {
            let locks = locks.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("same").await;
                order.lock().await.push(i);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(order.lock().await.len(), 5);
    }
}
