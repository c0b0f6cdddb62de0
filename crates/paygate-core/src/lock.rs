//! Keyed Async Mutex
//!
//! One FIFO `tokio::sync::Mutex` per key, created on first use and removed
//! from the table as soon as nobody holds or waits for it. Distinct keys
//! never contend with each other.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// A key's mutex plus the number of holders and waiters referencing it
struct Slot {
    mutex: Arc<Mutex<()>>,
    refs: usize,
}

type SlotTable = Arc<StdMutex<HashMap<String, Slot>>>;

fn table(slots: &SlotTable) -> MutexGuard<'_, HashMap<String, Slot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-key mutual exclusion with bounded bookkeeping
#[derive(Clone, Default)]
pub struct KeyedMutex {
    slots: SlotTable,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    ///
    /// Waiters are served in arrival order. The returned guard releases on
    /// drop, including when the holder unwinds or its future is cancelled.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let (mutex, slot) = {
            let mut slots = table(&self.slots);
            let entry = slots.entry(key.to_string()).or_insert_with(|| Slot {
                mutex: Arc::new(Mutex::new(())),
                refs: 0,
            });
            entry.refs += 1;
            (
                Arc::clone(&entry.mutex),
                SlotRef {
                    key: key.to_string(),
                    slots: Arc::clone(&self.slots),
                },
            )
        };

        // `slot` gives its reference back if this await is cancelled.
        let guard = mutex.lock_owned().await;

        KeyGuard { _guard: guard, slot }
    }

    /// Run `f` while holding the lock for `key`; the lock is released
    /// whether `f` returns `Ok` or `Err`.
    pub async fn run<F, Fut, T>(&self, key: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.lock(key).await;
        f().await
    }

    /// Number of keys with a holder or waiter
    pub fn len(&self) -> usize {
        table(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to one key. Field order matters: the mutex guard is
/// released before the slot reference is given back.
pub struct KeyGuard {
    _guard: OwnedMutexGuard<()>,
    slot: SlotRef,
}

impl KeyGuard {
    pub fn key(&self) -> &str {
        &self.slot.key
    }
}

impl std::fmt::Debug for KeyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGuard").field("key", &self.slot.key).finish()
    }
}

struct SlotRef {
    key: String,
    slots: SlotTable,
}

impl Drop for SlotRef {
    fn drop(&mut self) {
        let mut slots = table(&self.slots);
        let idle = match slots.get_mut(&self.key) {
            Some(slot) => {
                slot.refs = slot.refs.saturating_sub(1);
                slot.refs == 0
            }
            None => false,
        };
        if idle {
            slots.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_lock_released_after_ok_and_err() {
        let locks = KeyedMutex::new();

        let ok: Result<u32, String> = locks.run("k", || async { Ok(1) }).await;
        assert_eq!(ok, Ok(1));
        let err: Result<u32, String> = locks.run("k", || async { Err("boom".into()) }).await;
        assert!(err.is_err());

        // Would hang forever if the previous holder leaked the lock.
        let again = tokio::time::timeout(Duration::from_secs(1), locks.lock("k")).await;
        assert!(again.is_ok());
        drop(again);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_table_does_not_grow_across_keys() {
        let locks = KeyedMutex::new();
        for i in 0..1000 {
            let key = format!("key-{}", i);
            locks.run(&key, || async {}).await;
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = KeyedMutex::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock("shared").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_keys_proceed_concurrently() {
        let locks = KeyedMutex::new();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_waiters_are_served_in_order() {
        let locks = KeyedMutex::new();
        let order = Arc::new(StdMutex::new(Vec::new()));

        let first = locks.lock("fifo").await;
        let mut tasks = Vec::new();
        for i in 0..5 {
            let locks = locks.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock("fifo").await;
                order.lock().unwrap().push(i);
            }));
            // Let each waiter enqueue before spawning the next.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        drop(first);
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_waiter_cleans_up() {
        let locks = KeyedMutex::new();
        let held = locks.lock("k").await;

        let waiter = tokio::time::timeout(Duration::from_millis(10), locks.lock("k")).await;
        assert!(waiter.is_err());

        drop(held);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_holder_releases() {
        let locks = KeyedMutex::new();
        let task_locks = locks.clone();
        let result = tokio::spawn(async move {
            let _guard = task_locks.lock("p").await;
            panic!("handler blew up");
        })
        .await;
        assert!(result.is_err());

        let again = tokio::time::timeout(Duration::from_secs(1), locks.lock("p")).await;
        assert!(again.is_ok());
    }
}
