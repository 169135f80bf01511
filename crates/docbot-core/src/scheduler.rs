//! Keyed delayed tasks with cancellation.
//!
//! Each scheduled task is identified by a string key (a package name for
//! inventory retries). A task stays registered until its action has
//! finished, so an action can see that it was itself scheduled and react
//! (e.g. back off further).

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug)]
struct Entry {
    id: u64,
    delay: Duration,
    token: CancellationToken,
}

type Entries = Arc<Mutex<HashMap<String, Entry>>>;

/// Runs futures after a delay, at most one per key.
#[derive(Debug)]
pub struct RetryScheduler {
    name: &'static str,
    root: CancellationToken,
    entries: Entries,
    next_id: AtomicU64,
}

impl RetryScheduler {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            root: CancellationToken::new(),
            entries: Arc::default(),
            next_id: AtomicU64::new(0),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `action` after `delay` unless cancelled first.
    ///
    /// Returns `false` (and drops `action`) if `key` is already scheduled.
    /// Once the delay has elapsed the action runs to completion even if the
    /// key is cancelled meanwhile.
    pub fn schedule_later<F>(&self, key: &str, delay: Duration, action: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut entries = self.entries();
        if entries.contains_key(key) {
            debug!(scheduler = self.name, key, "Task already scheduled; not scheduling again");
            return false;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        entries.insert(
            key.to_string(),
            Entry {
                id,
                delay,
                token: token.clone(),
            },
        );

        let registry = Arc::clone(&self.entries);
        let owned_key = key.to_string();
        let name = self.name;
        tokio::spawn(async move {
            let key = owned_key;
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    trace!(scheduler = name, key = %key, "Scheduled task cancelled before it ran");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            trace!(scheduler = name, key = %key, "Running scheduled task");
            action.await;

            let mut entries = registry.lock().unwrap_or_else(PoisonError::into_inner);
            if entries.get(&key).is_some_and(|entry| entry.id == id) {
                entries.remove(&key);
            }
        });

        debug!(scheduler = self.name, key, delay_secs = delay.as_secs(), "Scheduled task");
        true
    }

    /// Whether a task is registered under `key`, including one whose action
    /// is currently running.
    pub fn contains(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    /// Unregister `key`. A pending task will not run; a running action is
    /// left to finish.
    pub fn cancel(&self, key: &str) -> bool {
        match self.entries().remove(key) {
            Some(entry) => {
                entry.token.cancel();
                trace!(scheduler = self.name, key, "Cancelled scheduled task");
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let drained: Vec<(String, Entry)> = self.entries().drain().collect();
        if !drained.is_empty() {
            debug!(scheduler = self.name, count = drained.len(), "Cancelling all scheduled tasks");
        }
        for (_, entry) in drained {
            entry.token.cancel();
        }
    }

    /// Registered keys and the delay each was scheduled with.
    pub fn pending(&self) -> BTreeMap<String, Duration> {
        self.entries()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.delay))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
