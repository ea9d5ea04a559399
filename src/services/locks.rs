use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const PRUNE_THRESHOLD: usize = 256;

/// Per-key async mutexes, created on demand and dropped once no caller holds
/// or waits on them.
#[derive(Clone, Default)]
pub(crate) struct KeyedLocks {
    slots: Arc<Mutex<HashMap<String, Weak<AsyncMutex<()>>>>>,
}

impl KeyedLocks {
    pub(crate) async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if slots.len() >= PRUNE_THRESHOLD {
                slots.retain(|_, slot| slot.strong_count() > 0);
            }

            match slots.get(key).and_then(Weak::upgrade) {
                Some(existing) => existing,
                None => {
                    let created = Arc::new(AsyncMutex::new(()));
                    slots.insert(key.to_string(), Arc::downgrade(&created));
                    created
                }
            }
        };

        lock.lock_owned().await
    }

    #[cfg(test)]
    fn live_slots(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.values().filter(|slot| slot.strong_count() > 0).count()
    }
}

pub(crate) fn attempt_key(attempt_id: &str) -> String {
    format!("attempt:{attempt_id}")
}

pub(crate) fn start_key(exam_id: &str, learner_id: &str) -> String {
    format!("start:{exam_id}:{learner_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = KeyedLocks::default();
        let guard = locks.acquire("attempt:1").await;

        let contender = locks.clone();
        let waiter = tokio::spawn(async move {
            let _guard = contender.acquire("attempt:1").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.expect("waiter");
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::default();
        let _first = locks.acquire("attempt:1").await;
        let second = tokio::time::timeout(Duration::from_millis(50), locks.acquire("attempt:2"));
        assert!(second.await.is_ok());
    }

    #[tokio::test]
    async fn released_slots_are_dropped() {
        let locks = KeyedLocks::default();
        {
            let _guard = locks.acquire(&attempt_key("a1")).await;
            assert_eq!(locks.live_slots(), 1);
        }
        assert_eq!(locks.live_slots(), 0);
    }
}
