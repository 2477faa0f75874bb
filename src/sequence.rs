//! Sequence coordinator: lets the producer engine ask "is sequence S of
//! the current epoch done yet?" and announce "S is done (or failed)".
//!
//! Without this, a 409 gap retry could spin: the engine must be able to
//! wait for an earlier sequence that may already have completed before
//! the waiter registers, so `wait` has to return an already-resolved
//! future for a sequence that was signalled first.
//!
//! Entries are scoped to one epoch. On any epoch bump, the whole map is
//! replaced rather than GC'd entry-by-entry: no future reader will ever
//! consult a stale epoch's sequence state again.

use tokio::sync::oneshot;
use tokio::sync::Mutex as AsyncMutex;

use std::collections::HashMap;

/// Outcome recorded for one `(epoch, seq)`.
#[derive(Clone, Debug)]
pub struct SeqOutcome {
    pub ok: bool,
    pub error: Option<String>,
}

impl SeqOutcome {
    fn success() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failure(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}

struct SeqEntry {
    resolved: Option<SeqOutcome>,
    waiters: Vec<oneshot::Sender<SeqOutcome>>,
}

impl Default for SeqEntry {
    fn default() -> Self {
        Self {
            resolved: None,
            waiters: Vec::new(),
        }
    }
}

/// Per-epoch sequence completion tracker.
pub struct SequenceCoordinator {
    epoch: AsyncMutex<u64>,
    entries: AsyncMutex<HashMap<u64, SeqEntry>>,
    highest_seen: AsyncMutex<u64>,
    /// GC window is `3 * max_in_flight`, per the coordinator's contract.
    gc_window: u64,
}

impl SequenceCoordinator {
    pub fn new(epoch: u64, max_in_flight: usize) -> Self {
        Self {
            epoch: AsyncMutex::new(epoch),
            entries: AsyncMutex::new(HashMap::new()),
            highest_seen: AsyncMutex::new(0),
            gc_window: 3 * max_in_flight as u64,
        }
    }

    /// Drop all tracked sequence state for the previous epoch and start
    /// fresh bookkeeping for `new_epoch`. Any waiters still parked on the
    /// old epoch's entries are dropped along with it - they only existed
    /// because a gap-wait for that epoch was in flight, and an epoch bump
    /// means that batch has already been re-sent at seq 0 of the new
    /// epoch.
    pub async fn reset_epoch(&self, new_epoch: u64) {
        let mut epoch = self.epoch.lock().await;
        let mut entries = self.entries.lock().await;
        let mut highest = self.highest_seen.lock().await;
        *epoch = new_epoch;
        entries.clear();
        *highest = 0;
    }

    pub async fn current_epoch(&self) -> u64 {
        *self.epoch.lock().await
    }

    /// Mark `(seq)` of the current epoch resolved. If `epoch` does not
    /// match the coordinator's current epoch, the signal is dropped: it
    /// belongs to a superseded generation and nothing is waiting on it
    /// anymore (see `reset_epoch`).
    pub async fn signal(&self, epoch: u64, seq: u64, error: Option<String>) {
        let current = self.current_epoch().await;
        if epoch != current {
            return;
        }

        let outcome = match error {
            Some(e) => SeqOutcome::failure(e),
            None => SeqOutcome::success(),
        };

        let mut entries = self.entries.lock().await;
        let entry = entries.entry(seq).or_default();
        entry.resolved = Some(outcome.clone());
        for waiter in entry.waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }

        let mut highest = self.highest_seen.lock().await;
        if seq > *highest {
            *highest = seq;
        }
        let floor = highest.saturating_sub(self.gc_window);
        drop(highest);

        entries.retain(|&seq, _| seq >= floor);
    }

    /// Wait for `(epoch, seq)` of the current epoch to complete.
    ///
    /// Returns immediately (still async, but without suspending past the
    /// lock) if already resolved. Idempotent under concurrent callers: a
    /// second `wait` for the same `(epoch, seq)` gets its own receiver,
    /// all fed by the same resolution.
    pub async fn wait(&self, epoch: u64, seq: u64) -> SeqOutcome {
        let current = self.current_epoch().await;
        if epoch != current {
            // The epoch has already moved on; nothing to wait for.
            return SeqOutcome::success();
        }

        let rx = {
            let mut entries = self.entries.lock().await;
            let entry = entries.entry(seq).or_default();
            if let Some(outcome) = &entry.resolved {
                return outcome.clone();
            }
            let (tx, rx) = oneshot::channel();
            entry.waiters.push(tx);
            rx
        };

        rx.await.unwrap_or_else(|_| SeqOutcome::success())
    }

}
