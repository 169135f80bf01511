//! Mutual exclusion between symbol lookups and inventory refreshes.
//!
//! Lookups are cheap and frequent, refreshes rare. A refresh first closes
//! the gate so no new lookup enters, then waits for lookups already inside
//! to finish before it touches the symbol table. Lookups arriving while the
//! gate is closed queue until the refresh guard is dropped.

use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct GateState {
    refreshing: bool,
    readers: usize,
}

/// Readers-count plus refresh flag, observable through a `watch` channel.
#[derive(Debug)]
pub struct RefreshGate {
    state: watch::Sender<GateState>,
}

impl Default for RefreshGate {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(GateState::default());
        Self { state }
    }

    /// Enter as a reader, waiting out any refresh in progress.
    ///
    /// Checking the flag and incrementing the count happen in one step, so a
    /// reader can never enter after a refresh has started draining.
    pub async fn read(&self) -> ReadGuard<'_> {
        let mut rx = self.state.subscribe();
        loop {
            let entered = self.state.send_if_modified(|state| {
                if state.refreshing {
                    return false;
                }
                state.readers += 1;
                true
            });
            if entered {
                return ReadGuard { gate: self };
            }
            debug!("Waiting for inventories to be refreshed before processing item");
            let _ = rx.wait_for(|state| !state.refreshing).await;
        }
    }

    /// Close the gate to new readers. Readers already inside keep running.
    ///
    /// Only one refresh holds the gate at a time; a second caller waits for
    /// the first guard to drop.
    pub async fn close(&self) -> RefreshGuard<'_> {
        let mut rx = self.state.subscribe();
        loop {
            let claimed = self.state.send_if_modified(|state| {
                if state.refreshing {
                    return false;
                }
                state.refreshing = true;
                true
            });
            if claimed {
                return RefreshGuard { gate: self };
            }
            let _ = rx.wait_for(|state| !state.refreshing).await;
        }
    }

    /// Close the gate and wait until no reader is inside.
    pub async fn write(&self) -> RefreshGuard<'_> {
        let guard = self.close().await;
        guard.drain().await;
        guard
    }

    pub fn is_refreshing(&self) -> bool {
        self.state.borrow().refreshing
    }

    /// Number of lookups currently inside the gate.
    pub fn readers(&self) -> usize {
        self.state.borrow().readers
    }
}

/// Held by a lookup for as long as it reads the symbol table.
#[derive(Debug)]
pub struct ReadGuard<'a> {
    gate: &'a RefreshGate,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.gate.state.send_modify(|state| {
            state.readers = state.readers.saturating_sub(1);
        });
    }
}

/// Held by a refresh; reopens the gate on drop.
#[derive(Debug)]
pub struct RefreshGuard<'a> {
    gate: &'a RefreshGate,
}

impl RefreshGuard<'_> {
    /// Wait until every reader that entered before the gate closed has left.
    pub async fn drain(&self) {
        let mut rx = self.gate.state.subscribe();
        let readers = rx.borrow().readers;
        if readers > 0 {
            debug!(readers, "Draining in-flight lookups");
        }
        let _ = rx.wait_for(|state| state.readers == 0).await;
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.gate.state.send_modify(|state| state.refreshing = false);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_readers_are_counted() {
        let gate = RefreshGate::new();
        let a = gate.read().await;
        let b = gate.read().await;
        assert_eq!(gate.readers(), 2);
        drop(a);
        assert_eq!(gate.readers(), 1);
        drop(b);
        assert_eq!(gate.readers(), 0);
    }

    #[tokio::test]
    async fn test_reader_waits_for_refresh() {
        let gate = Arc::new(RefreshGate::new());
        let guard = gate.close().await;
        assert!(gate.is_refreshing());

        let reader = tokio::spawn({
            let gate = Arc::clone(&gate);
            async move {
                let _read = gate.read().await;
            }
        });
        settle().await;
        assert!(!reader.is_finished());
        assert_eq!(gate.readers(), 0);

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert!(!gate.is_refreshing());
    }

    #[tokio::test]
    async fn test_writer_drains_existing_readers() {
        let gate = Arc::new(RefreshGate::new());
        let read = gate.read().await;

        let writer = tokio::spawn({
            let gate = Arc::clone(&gate);
            async move {
                let _write = gate.write().await;
            }
        });
        settle().await;
        assert!(!writer.is_finished());
        // the gate is already closed to newcomers while draining
        assert!(gate.is_refreshing());

        drop(read);
        tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(gate.readers(), 0);
        assert!(!gate.is_refreshing());
    }

    #[tokio::test]
    async fn test_second_refresh_waits_for_first() {
        let gate = Arc::new(RefreshGate::new());
        let first = gate.write().await;

        let second = tokio::spawn({
            let gate = Arc::clone(&gate);
            async move {
                let _write = gate.write().await;
            }
        });
        settle().await;
        assert!(!second.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), second)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_refresh_reopens_gate() {
        let gate = RefreshGate::new();
        let read = gate.read().await;
        let attempt = tokio::time::timeout(Duration::from_millis(10), gate.write()).await;
        assert!(attempt.is_err());
        assert!(!gate.is_refreshing());
        drop(read);
    }
}
