//! Keyed, cancellable timers
//!
//! A [`TimerSet`] owns at most one tokio task per key. Scheduling a key that
//! already has a timer aborts the old task first, so a key is never served by
//! two timers. [`TimerSet::schedule_if_idle`] leaves a pending timer alone
//! instead. Entries are removed both when a timer finishes on its own and
//! when it is cancelled, so the arena never accumulates dead handles.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Identifies one scheduling of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken {
    generation: u64,
}

struct TimerEntry {
    generation: u64,
    handle: JoinHandle<()>,
}

type Entries<K> = Arc<Mutex<HashMap<K, TimerEntry>>>;

/// Arena of cancellable timer tasks keyed by `K`
pub struct TimerSet<K> {
    name: &'static str,
    entries: Entries<K>,
    next_generation: AtomicU64,
    closed: AtomicBool,
}

impl<K> TimerSet<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Run `callback` once after `delay`, replacing any timer for `key`.
    ///
    /// The entry is released before the callback runs, so the callback may
    /// schedule the same key again. Returns `None` after [`TimerSet::shutdown`].
    pub fn schedule<F>(&self, key: K, delay: Duration, callback: F) -> Option<TimerToken>
    where
        F: FnOnce() + Send + 'static,
    {
        let entries = self.entries.clone();
        let release_key = key.clone();
        self.insert(key, true, move |token| async move {
            tokio::time::sleep(delay).await;
            release(&entries, &release_key, token);
            callback();
        })
    }

    /// Run `callback` once after `delay` unless a timer for `key` is already
    /// pending, in which case nothing changes and `None` is returned.
    ///
    /// Triggers that arrive while the timer is pending are absorbed by it, so
    /// the callback runs at most `delay` after the first of them.
    pub fn schedule_if_idle<F>(&self, key: K, delay: Duration, callback: F) -> Option<TimerToken>
    where
        F: FnOnce() + Send + 'static,
    {
        let entries = self.entries.clone();
        let release_key = key.clone();
        self.insert(key, false, move |token| async move {
            tokio::time::sleep(delay).await;
            release(&entries, &release_key, token);
            callback();
        })
    }

    /// Spawn a long-running timer task built from `make`, replacing any timer
    /// for `key`.
    pub fn spawn<F, Fut>(&self, key: K, make: F) -> Option<TimerToken>
    where
        F: FnOnce(TimerToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.insert(key, true, make)
    }

    fn insert<F, Fut>(&self, key: K, replace: bool, make: F) -> Option<TimerToken>
    where
        F: FnOnce(TimerToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            debug!(timers = self.name, ?key, "timer set is shut down, not scheduling");
            return None;
        }

        // Hold the lock across spawn + insert so a task that finishes
        // immediately cannot look for its entry before it exists.
        let mut entries = self.entries.lock();
        if !replace && entries.contains_key(&key) {
            return None;
        }

        let token = TimerToken {
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
        };
        let task = make(token);
        let finished = self.entries.clone();
        let finished_key = key.clone();
        let handle = tokio::spawn(async move {
            task.await;
            release(&finished, &finished_key, token);
        });

        let entry = TimerEntry {
            generation: token.generation,
            handle,
        };
        if let Some(previous) = entries.insert(key, entry) {
            previous.handle.abort();
        }
        Some(token)
    }

    /// Cancel the timer for `key`. Returns false if none was scheduled.
    pub fn cancel(&self, key: &K) -> bool {
        match self.entries.lock().remove(key) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every timer, returning how many were pending
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<TimerEntry> = self.entries.lock().drain().map(|(_, e)| e).collect();
        for entry in &drained {
            entry.handle.abort();
        }
        drained.len()
    }

    /// Cancel everything and refuse further scheduling. Idempotent.
    pub fn shutdown(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let cancelled = self.cancel_all();
        if cancelled > 0 {
            debug!(timers = self.name, cancelled, "timer set shut down");
        }
        cancelled
    }

    /// Reopen a shut-down set
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::Release);
    }

    pub fn is_scheduled(&self, key: &K) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<K> Drop for TimerSet<K> {
    fn drop(&mut self) {
        for (_, entry) in self.entries.lock().drain() {
            entry.handle.abort();
        }
    }
}

fn release<K: Eq + Hash>(entries: &Entries<K>, key: &K, token: TimerToken) {
    let mut entries = entries.lock();
    if entries.get(key).map(|entry| entry.generation) == Some(token.generation) {
        entries.remove(key);
    }
}
