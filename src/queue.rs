//! Batch queue: turns a stream of `append(bytes)` calls into a stream of
//! batch tasks under bounded memory and latency.
//!
//! All mutation of `{pending_messages, pending_bytes, next_seq}` goes
//! through a single `parking_lot::Mutex`, matching the teacher crate's
//! existing choice for `ProducerState`: a fast, sync-only lock that is
//! never held across an `.await`. The flush trigger (size) and an
//! explicit `flush()` call never race to seal the same buffer twice,
//! since sealing always happens with the lock held.

use crate::error::ProducerError;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// One caller append, alive from `append()` until its containing batch
/// resolves.
pub struct PendingMessage {
    pub data: Bytes,
    pub ack: oneshot::Sender<Result<(), ProducerError>>,
}

/// One sealed batch, alive from the moment the queue flushes it until
/// the engine reports its outcome.
pub struct BatchTask {
    pub messages: Vec<PendingMessage>,
    pub seq: u64,
    pub total_bytes: usize,
    /// Monotonic submission order, distinct from `seq`: `seq` resets to
    /// 0 on every epoch bump, but `flush` needs a stable ordering to
    /// report the first terminal error across epoch boundaries.
    pub order: u64,
}

struct QueueState {
    pending: Vec<PendingMessage>,
    pending_bytes: usize,
    closed: bool,
    next_seq: u64,
    next_order: u64,
}

/// Accumulates appends and seals them into `BatchTask`s on a send
/// channel the producer engine drains.
pub struct BatchQueue {
    state: Mutex<QueueState>,
    sender: mpsc::UnboundedSender<BatchTask>,
    max_batch_bytes: usize,
    /// Count of batches sealed but not yet resolved: covers the window
    /// between `seal_locked` pushing onto the channel and the engine
    /// reporting a terminal outcome, including the gap where a task sits
    /// in the channel before the engine has even picked it up (when the
    /// in-flight semaphore alone would look falsely idle). `flush` must
    /// see this at zero, not just the in-memory buffer, before it can
    /// consider the producer quiescent.
    outstanding: Arc<AtomicUsize>,
}

impl BatchQueue {
    pub fn new(max_batch_bytes: usize, start_seq: u64) -> (Self, mpsc::UnboundedReceiver<BatchTask>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                state: Mutex::new(QueueState {
                    pending: Vec::new(),
                    pending_bytes: 0,
                    closed: false,
                    next_seq: start_seq,
                    next_order: 0,
                }),
                sender,
                max_batch_bytes,
                outstanding: Arc::new(AtomicUsize::new(0)),
            },
            receiver,
        )
    }

    /// Number of sealed batches that have not yet reached a terminal
    /// outcome (sitting in the channel, in flight, or in a gap-wait
    /// retry loop).
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Mark one sealed batch as having reached a terminal outcome.
    /// Called exactly once per task handed out by this queue.
    pub fn mark_batch_done(&self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }

    /// Queue one append. Returns a receiver that resolves when the
    /// containing batch is acknowledged, or rejects with the batch's
    /// terminal error, plus whether this append started a fresh empty
    /// buffer (the caller uses that to arm a one-shot linger timer).
    /// Never blocks on the network - only on in-memory bookkeeping.
    pub fn append(
        &self,
        data: Bytes,
    ) -> Result<(oneshot::Receiver<Result<(), ProducerError>>, bool), ProducerError> {
        let (tx, rx) = oneshot::channel();
        let len = data.len();

        let mut state = self.state.lock();
        if state.closed {
            return Err(ProducerError::ProducerClosed);
        }

        let arm_linger = state.pending.is_empty();

        state.pending.push(PendingMessage { data, ack: tx });
        state.pending_bytes += len;

        if state.pending_bytes >= self.max_batch_bytes {
            self.seal_locked(&mut state);
        }

        Ok((rx, arm_linger))
    }

    /// Seal the current buffer (if non-empty) right now, bypassing the
    /// size/linger triggers. Used by the linger timer and by
    /// `flush`/`close`.
    pub fn seal_now(&self) {
        let mut state = self.state.lock();
        self.seal_locked(&mut state);
    }

    pub fn has_pending(&self) -> bool {
        !self.state.lock().pending.is_empty()
    }

    pub fn mark_closed(&self) {
        self.state.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Reject every still-buffered (not yet sealed) message with
    /// `ProducerClosed` without sealing it into a batch. Used when the
    /// engine observes `Stream-Closed: true` and must stop admitting new
    /// work without pretending the buffered data was sent.
    pub fn drain_rejecting(&self, err: ProducerError) {
        let mut state = self.state.lock();
        state.closed = true;
        for msg in state.pending.drain(..) {
            let _ = msg.ack.send(Err(err.clone()));
        }
        state.pending_bytes = 0;
    }

    fn seal_locked(&self, state: &mut QueueState) {
        if state.pending.is_empty() {
            return;
        }

        let messages: Vec<_> = state.pending.drain(..).collect();
        let total_bytes = state.pending_bytes;
        let seq = state.next_seq;
        let order = state.next_order;
        state.next_seq += 1;
        state.next_order += 1;
        state.pending_bytes = 0;
        self.outstanding.fetch_add(1, Ordering::AcqRel);

        // An unbounded channel keeps `append` non-blocking even if the
        // engine is momentarily behind (e.g. waiting on `max_in_flight`).
        let _ = self.sender.send(BatchTask {
            messages,
            seq,
            total_bytes,
            order,
        });
    }

    /// Reset the sequence counter to `seq`, used on an epoch bump. Any
    /// buffered-but-unsealed messages keep their place in line; only the
    /// seq numbering restarts. Pass `1` rather than `0` when the batch
    /// that triggered the bump is itself about to be resent at seq 0 of
    /// the new epoch, so a concurrently-sealed batch doesn't collide
    /// with it.
    pub fn reset_seq_to(&self, seq: u64) {
        self.state.lock().next_seq = seq;
    }

    /// Reset the sequence counter to 0, as required on any epoch bump
    /// (manual restart or auto-claim) per invariant I2.
    pub fn reset_seq(&self) {
        self.reset_seq_to(0);
    }

    pub fn next_seq(&self) -> u64 {
        self.state.lock().next_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_below_threshold_does_not_seal() {
        let (queue, mut rx) = BatchQueue::new(1024, 0);
        let (_ack, arm_linger) = queue.append(Bytes::from_static(b"hi")).unwrap();
        assert!(arm_linger);
        assert!(queue.has_pending());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn append_at_threshold_seals_immediately() {
        let (queue, mut rx) = BatchQueue::new(4, 0);
        let _ack = queue.append(Bytes::from_static(b"abcd")).unwrap();
        assert!(!queue.has_pending());
        let task = rx.try_recv().expect("batch should be sealed");
        assert_eq!(task.seq, 0);
        assert_eq!(task.total_bytes, 4);
    }

    #[test]
    fn append_after_close_rejects_synchronously() {
        let (queue, _rx) = BatchQueue::new(1024, 0);
        queue.mark_closed();
        let err = queue.append(Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(err, ProducerError::ProducerClosed));
    }

    #[test]
    fn seq_increments_once_per_batch_not_per_message() {
        let (queue, mut rx) = BatchQueue::new(2, 0);
        let (_a1, first_arm) = queue.append(Bytes::from_static(b"a")).unwrap();
        let (_a2, second_arm) = queue.append(Bytes::from_static(b"b")).unwrap();
        assert!(first_arm);
        assert!(!second_arm);
        let task = rx.try_recv().unwrap();
        assert_eq!(task.seq, 0);
        assert_eq!(task.order, 0);
        assert_eq!(task.messages.len(), 2);

        let _a3 = queue.append(Bytes::from_static(b"c")).unwrap();
        let _a4 = queue.append(Bytes::from_static(b"d")).unwrap();
        let task2 = rx.try_recv().unwrap();
        assert_eq!(task2.seq, 1);
        assert_eq!(task2.order, 1);
    }

    #[test]
    fn drain_rejecting_fails_buffered_messages_and_closes() {
        let (queue, _rx) = BatchQueue::new(1024, 0);
        let (ack, _arm) = queue.append(Bytes::from_static(b"x")).unwrap();
        queue.drain_rejecting(ProducerError::StreamClosed);
        assert!(queue.is_closed());
        let result = ack.try_recv().unwrap().unwrap_err();
        assert!(matches!(result, ProducerError::StreamClosed));
    }

    #[test]
    fn reset_seq_restarts_numbering() {
        let (queue, mut rx) = BatchQueue::new(1, 5);
        let _a = queue.append(Bytes::from_static(b"x")).unwrap();
        let task = rx.try_recv().unwrap();
        assert_eq!(task.seq, 5);
        queue.reset_seq();
        assert_eq!(queue.next_seq(), 0);
    }
}
