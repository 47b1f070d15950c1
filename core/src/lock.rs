//! Fair FIFO lock table keyed by an arbitrary hashable key.
//!
//! Re-architected per the design notes from the source's promise-chain
//! `.then()` concurrency into a lock table with acquire/release paired by
//! scoped acquisition, held across all awaited I/O. Grounded in the
//! pack-reference Raiden proxy's per-partner lock table
//! (`channel_operations_lock: Arc<RwLock<HashMap<Address, Mutex<bool>>>>`),
//! generalized to be keyed by any `Eq + Hash` type so the same structure
//! backs both the `(sender, receiver)` pair table and the `channel_id`
//! table §5 calls for.
//!
//! `tokio::sync::Mutex` queues waiters FIFO, so a per-key mutex already
//! gives the fairness guarantee; this table's job is purely to hand out one
//! such mutex per key without a race on table insertion.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// A table of per-key fair FIFO mutexes. Acquiring a key's lock returns a
/// guard that releases on drop. Callers must hold it across every
/// suspension point in the critical section it protects.
pub struct LockTable<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for LockTable<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> LockTable<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self { locks: Mutex::new(HashMap::new()) }
    }

    /// Acquire the lock for `key`, creating its mutex on first use. Returns
    /// an owned guard so it can be held across `.await` points without
    /// borrowing the table.
    pub async fn acquire(&self, key: K) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().await;
            locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        mutex.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn serializes_access_to_the_same_key() {
        let table: LockTable<&'static str> = LockTable::new();
        let counter = Arc::new(AtomicU32::new(0));
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let table = Arc::new(table);
        let mut handles = Vec::new();
        for i in 0..8u32 {
            let table = table.clone();
            let counter = counter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _guard = table.acquire("shared").await;
                let before = counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                order.lock().await.push((i, before));
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn independent_keys_do_not_block_each_other() {
        let table: LockTable<u32> = LockTable::new();
        let a = table.acquire(1).await;
        let b = table.acquire(2).await;
        drop(a);
        drop(b);
    }
}
