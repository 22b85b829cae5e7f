//! Debounced persistence
//!
//! Collapses bursts of local edits into one delayed write per key. Each
//! `schedule` replaces whatever was pending for that key and restarts the
//! timer; when the timer fires the most recently scheduled persist function
//! runs exactly once. Persist functions should read the state they save at
//! call time, not capture it at schedule time.
//!
//! Timers run on the tokio runtime, so `schedule` must be called from
//! within one. Dropping the persister does not cancel armed timers; call
//! `flush_all` before shutting the runtime down.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::DEFAULT_DEBOUNCE_MS;

/// Deferred write; runs at most once
pub type PersistFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct Slot {
    generation: u64,
    persist: PersistFn,
    timer: JoinHandle<()>,
}

type Slots = Arc<Mutex<HashMap<String, Slot>>>;

/// Per-key debounce timers
pub struct DebouncedPersister {
    delay: Duration,
    slots: Slots,
    generation: AtomicU64,
}

impl Default for DebouncedPersister {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_DEBOUNCE_MS))
    }
}

impl DebouncedPersister {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            slots: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arm (or re-arm) the timer for `key`
    ///
    /// Any persist function still pending for `key` is discarded.
    pub fn schedule<F, Fut>(&self, key: impl Into<String>, persist: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let persist: PersistFn = Box::new(move || persist().boxed());

        let slots = Arc::clone(&self.slots);
        let delay = self.delay;
        let timer_key = key.clone();

        // Hold the lock while spawning so the timer cannot observe the map
        // before its own slot is inserted
        let mut guard = self.slots.lock();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let due = {
                let mut slots = slots.lock();
                match slots.get(&timer_key) {
                    Some(slot) if slot.generation == generation => slots.remove(&timer_key),
                    _ => None,
                }
            };
            if let Some(slot) = due {
                debug!("Debounce fired for {}", timer_key);
                (slot.persist)().await;
            }
        });

        if let Some(previous) = guard.insert(
            key.clone(),
            Slot {
                generation,
                persist,
                timer,
            },
        ) {
            previous.timer.abort();
            debug!("Rescheduled pending persist for {}", key);
        }
    }

    /// Run the pending persist for `key` now
    ///
    /// Returns whether anything was pending.
    pub async fn flush(&self, key: &str) -> bool {
        let slot = self.slots.lock().remove(key);
        match slot {
            Some(slot) => {
                slot.timer.abort();
                debug!("Flushing pending persist for {}", key);
                (slot.persist)().await;
                true
            }
            None => false,
        }
    }

    /// Run every pending persist now, returning how many ran
    pub async fn flush_all(&self) -> usize {
        let drained: Vec<(String, Slot)> = self.slots.lock().drain().collect();
        let count = drained.len();
        for (key, slot) in drained {
            slot.timer.abort();
            debug!("Flushing pending persist for {}", key);
            (slot.persist)().await;
        }
        count
    }

    /// Drop the pending persist for `key` without running it
    pub fn cancel(&self, key: &str) -> bool {
        match self.slots.lock().remove(key) {
            Some(slot) => {
                slot.timer.abort();
                true
            }
            None => false,
        }
    }

    pub fn has_pending(&self, key: &str) -> bool {
        self.slots.lock().contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.slots.lock().len()
    }
}
