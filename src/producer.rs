//! Idempotent producer engine: wires the batch queue, sequence
//! coordinator and transport together into the send loop spec'd in
//! §4.5.
//!
//! One background task (`run_engine`) drains `BatchQueue`'s channel in
//! strict enqueue order. Each batch it pulls off either runs inline
//! (while the current epoch is unclaimed - see the claim gate below)
//! or is spawned onto its own task once `max_in_flight` admits it, so
//! batches can complete out of order while still being *submitted* to
//! the transport in the order they were sealed.

use crate::batch::{encode_batch, is_json_content_type};
use crate::config::{ProducerConfig, RawProducerConfig};
use crate::error::ProducerError;
use crate::log::{trace_debug, trace_warn};
use crate::queue::{BatchQueue, BatchTask};
use crate::sequence::SequenceCoordinator;
use crate::stream::{
    DurableStream, HEADER_CONTENT_TYPE, HEADER_PRODUCER_EPOCH, HEADER_PRODUCER_EXPECTED_SEQ,
    HEADER_PRODUCER_ID, HEADER_PRODUCER_RECEIVED_SEQ, HEADER_PRODUCER_SEQ, HEADER_STREAM_CLOSED,
};
use crate::transport::{ReqwestTransport, Transport};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, Notify, OnceCell, Semaphore};

/// Callback invoked once per terminally-failed batch.
///
/// Errors are reported here (Kafka-style) rather than through
/// `append`'s return value, so fire-and-forget usage never has to
/// inspect a result to find out a batch failed. Callers who do need
/// per-message confirmation can still `.await` the [`AppendHandle`]
/// `append` returns.
pub type OnErrorCallback = Arc<dyn Fn(ProducerError) + Send + Sync>;

/// Builder for configuring an idempotent producer.
#[must_use = "builders do nothing unless you call .build()"]
pub struct ProducerBuilder {
    stream: DurableStream,
    producer_id: String,
    epoch: u64,
    auto_claim: bool,
    max_batch_bytes: usize,
    linger: Duration,
    max_in_flight: usize,
    content_type: Option<String>,
    on_error: Option<OnErrorCallback>,
}

impl ProducerBuilder {
    pub(crate) fn new(stream: DurableStream, producer_id: String) -> Self {
        Self {
            stream,
            producer_id,
            epoch: 0,
            auto_claim: false,
            max_batch_bytes: 1024 * 1024,
            linger: Duration::from_millis(5),
            max_in_flight: 5,
            content_type: None,
            on_error: None,
        }
    }

    /// Set the starting epoch.
    pub fn epoch(mut self, epoch: u64) -> Self {
        self.epoch = epoch;
        self
    }

    /// Enable auto-claim: on a 403 stale-epoch response, bump to
    /// `server_epoch + 1` and resend at seq 0 instead of failing.
    pub fn auto_claim(mut self, enabled: bool) -> Self {
        self.auto_claim = enabled;
        self
    }

    /// Set the size threshold (in bytes) that seals the current batch.
    pub fn max_batch_bytes(mut self, bytes: usize) -> Self {
        self.max_batch_bytes = bytes;
        self
    }

    /// Set the linger duration: how long a non-empty batch waits for
    /// more appends before being sealed on a timer.
    pub fn linger(mut self, duration: Duration) -> Self {
        self.linger = duration;
        self
    }

    /// Set the maximum number of batches in flight at once.
    pub fn max_in_flight(mut self, count: usize) -> Self {
        self.max_in_flight = count;
        self
    }

    /// Override the content type used for appends, bypassing lazy
    /// `HEAD`-based discovery.
    pub fn content_type(mut self, ct: impl Into<String>) -> Self {
        self.content_type = Some(ct.into());
        self
    }

    /// Set the error callback invoked once per terminally-failed batch.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let producer = stream.producer("my-producer")
    ///     .on_error(|err| {
    ///         eprintln!("batch failed: {}", err);
    ///     })
    ///     .build()?;
    /// ```
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProducerError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Build the producer.
    ///
    /// Validates the configuration (see [`crate::error::ProducerConfigError`])
    /// before spawning the background send loop; no network I/O happens
    /// until the first batch is sealed.
    pub fn build(self) -> Result<Producer, crate::error::ProducerConfigError> {
        let client = self.stream.client.inner.clone();
        let transport = Arc::new(ReqwestTransport::new(client));
        self.build_with_transport(transport)
    }

    pub(crate) fn build_with_transport(
        self,
        transport: Arc<dyn Transport>,
    ) -> Result<Producer, crate::error::ProducerConfigError> {
        let raw = RawProducerConfig {
            producer_id: self.producer_id,
            epoch: self.epoch,
            auto_claim: self.auto_claim,
            max_batch_bytes: self.max_batch_bytes,
            linger: self.linger,
            max_in_flight: self.max_in_flight,
            content_type_override: self
                .content_type
                .or_else(|| self.stream.content_type.clone()),
            on_error: self.on_error,
        };
        let (producer_id, epoch, config) = raw.validate()?;

        let (queue, receiver) = BatchQueue::new(config.max_batch_bytes, 0);
        let coordinator = SequenceCoordinator::new(epoch, config.max_in_flight);
        let content_type_cell = OnceCell::new();
        if let Some(ct) = &config.content_type_override {
            let _ = content_type_cell.set(ct.clone());
        }

        let epoch_claimed = !config.auto_claim;
        let semaphore = Arc::new(Semaphore::new(config.max_in_flight));

        let inner = Arc::new(Inner {
            stream: self.stream,
            producer_id,
            transport,
            queue,
            coordinator,
            content_type_cell,
            epoch_state: Mutex::new(EpochState {
                epoch,
                epoch_claimed,
            }),
            closed_observed: AtomicBool::new(false),
            semaphore,
            claim_lock: AsyncMutex::new(()),
            errors: Mutex::new(BTreeMap::new()),
            idle: Notify::new(),
            config,
        });

        let engine_inner = inner.clone();
        tokio::spawn(async move { run_engine(engine_inner, receiver).await });

        Ok(Producer { inner })
    }
}

struct EpochState {
    epoch: u64,
    epoch_claimed: bool,
}

struct Inner {
    stream: DurableStream,
    producer_id: String,
    transport: Arc<dyn Transport>,
    queue: BatchQueue,
    coordinator: SequenceCoordinator,
    content_type_cell: OnceCell<String>,
    epoch_state: Mutex<EpochState>,
    closed_observed: AtomicBool,
    semaphore: Arc<Semaphore>,
    /// Held across a whole batch's send while the current epoch is
    /// unclaimed, serializing the engine to one in-flight batch at a
    /// time until the seq-0 claim succeeds.
    claim_lock: AsyncMutex<()>,
    /// First-observed terminal error per batch, keyed by a monotonic
    /// submission order (not `seq`, which resets across epoch bumps).
    /// `flush` reports and clears the lowest-keyed entry.
    errors: Mutex<BTreeMap<u64, ProducerError>>,
    /// Notified whenever the queue empties or a batch completes, so
    /// `flush` can wait for quiescence without polling.
    idle: Notify,
    config: ProducerConfig,
}

impl Inner {
    fn current_epoch(&self) -> u64 {
        self.epoch_state.lock().epoch
    }

    fn epoch_claimed(&self) -> bool {
        self.epoch_state.lock().epoch_claimed
    }

    fn mark_epoch_claimed(&self) {
        self.epoch_state.lock().epoch_claimed = true;
    }

    /// Apply an epoch bump if `new_epoch` is newer than what's already
    /// recorded. Returns `true` if this call performed the bump (and so
    /// must also reset the queue's seq counter and the coordinator).
    fn try_bump_epoch(&self, new_epoch: u64) -> bool {
        let mut state = self.epoch_state.lock();
        if new_epoch > state.epoch {
            state.epoch = new_epoch;
            state.epoch_claimed = false;
            true
        } else {
            false
        }
    }

    async fn resolve_content_type(&self) -> String {
        self.content_type_cell
            .get_or_init(|| async {
                match self.stream.head().await {
                    Ok(resp) => resp
                        .content_type
                        .unwrap_or_else(|| "application/octet-stream".to_string()),
                    Err(_) => "application/octet-stream".to_string(),
                }
            })
            .await
            .clone()
    }

    fn record_first_error(&self, order: u64, err: &ProducerError) {
        self.errors.lock().entry(order).or_insert_with(|| err.clone());
    }

    fn invoke_on_error(&self, err: &ProducerError) {
        if let Some(cb) = &self.config.on_error {
            cb(err.clone());
        }
    }
}

/// Handle returned by [`Producer::append`].
///
/// Drop it to use `append` fire-and-forget; `.await` it to learn
/// whether the containing batch was accepted. Resolves once the batch
/// that carries this message reaches a terminal outcome.
pub struct AppendHandle {
    rx: oneshot::Receiver<Result<(), ProducerError>>,
}

impl Future for AppendHandle {
    type Output = Result<(), ProducerError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ProducerError::NetworkError(
                "producer dropped before acknowledging append".to_string(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Idempotent producer: batches, pipelines and retries appends to one
/// durable stream under one `(producer_id, epoch)` identity.
#[derive(Clone)]
pub struct Producer {
    inner: Arc<Inner>,
}

impl Producer {
    /// Queue data for appending.
    ///
    /// Returns immediately; the data is batched and sent by the
    /// background engine. The returned handle resolves once the
    /// containing batch reaches a terminal outcome - drop it for pure
    /// fire-and-forget use.
    pub fn append(&self, data: impl Into<Bytes>) -> AppendHandle {
        let rx = self.inner.queue.append(data.into());
        match rx {
            Ok((rx, arm_linger)) => {
                let linger = self.inner.config.linger;
                if arm_linger && linger > Duration::ZERO {
                    let inner = self.inner.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(linger).await;
                        inner.queue.seal_now();
                    });
                }
                AppendHandle { rx }
            }
            Err(err) => {
                let (tx, rx) = oneshot::channel();
                let _ = tx.send(Err(err));
                AppendHandle { rx }
            }
        }
    }

    /// Serialize `data` to JSON and queue it for appending.
    ///
    /// Serialization happens synchronously; a serialization failure is
    /// returned immediately rather than surfaced through the batch
    /// pipeline, since it can never succeed on retry.
    #[cfg(feature = "json")]
    pub fn append_json<T: serde::Serialize>(
        &self,
        data: &T,
    ) -> Result<AppendHandle, serde_json::Error> {
        let bytes = serde_json::to_vec(data)?;
        Ok(self.append(Bytes::from(bytes)))
    }

    /// Seal any buffered data and wait for it, and everything already
    /// in flight, to reach a terminal outcome.
    ///
    /// Returns the first terminal error observed while waiting, if any
    /// (after which it is cleared - a later `flush` won't re-report
    /// it). A `flush` with nothing pending and nothing in flight is a
    /// no-op that returns immediately.
    pub async fn flush(&self) -> Result<(), ProducerError> {
        if self.inner.queue.has_pending() {
            self.inner.queue.seal_now();
        }

        loop {
            let notified = self.inner.idle.notified();

            let quiescent =
                !self.inner.queue.has_pending() && self.inner.queue.outstanding_count() == 0;
            if quiescent {
                break;
            }

            notified.await;
        }

        let mut errors = self.inner.errors.lock();
        if let Some((&order, _)) = errors.iter().next() {
            let err = errors.remove(&order).unwrap();
            return Err(err);
        }

        Ok(())
    }

    /// Close the producer: stop admitting new appends, flush whatever
    /// is already buffered or in flight, then return. Always succeeds;
    /// a terminal error during the final flush is reported through
    /// that flush, not through `close` itself.
    pub async fn close(&self) -> Result<(), ProducerError> {
        self.inner.queue.mark_closed();
        let _ = self.flush().await;
        Ok(())
    }

    /// Manually fence out any other instance writing under this
    /// `(stream, producer_id)` by bumping to a fresh epoch.
    ///
    /// Flushes everything already buffered or in flight under the
    /// current epoch first, then bumps to `epoch + 1` and resets the
    /// sequence counter to 0 - unlike the auto-claim path, no batch is
    /// being resent under the new epoch, so there is nothing reserving
    /// seq 0. Returns the first terminal error observed during that
    /// flush, if any.
    pub async fn restart(&self) -> Result<(), ProducerError> {
        self.flush().await?;

        let new_epoch = self.inner.current_epoch() + 1;
        if self.inner.try_bump_epoch(new_epoch) {
            self.inner.queue.reset_seq_to(0);
            self.inner.coordinator.reset_epoch(new_epoch).await;
        }

        Ok(())
    }

    /// The producer's current epoch.
    pub fn epoch(&self) -> u64 {
        self.inner.current_epoch()
    }

    /// The next sequence number this producer will assign.
    pub fn next_seq(&self) -> u64 {
        self.inner.queue.next_seq()
    }
}

async fn run_engine(inner: Arc<Inner>, mut receiver: mpsc::UnboundedReceiver<BatchTask>) {
    while let Some(task) = receiver.recv().await {
        if inner.closed_observed.load(Ordering::Acquire) {
            fail_task_stream_closed(&inner, task).await;
            continue;
        }

        let needs_claim_gate = inner.config.auto_claim && !inner.epoch_claimed();

        if needs_claim_gate {
            let _guard = inner.claim_lock.lock().await;
            let permit = inner.semaphore.clone().acquire_owned().await;
            if let Ok(permit) = permit {
                process_batch(inner.clone(), task, permit).await;
            }
        } else {
            let permit = inner.semaphore.clone().acquire_owned().await;
            if let Ok(permit) = permit {
                let inner2 = inner.clone();
                tokio::spawn(async move {
                    process_batch(inner2, task, permit).await;
                });
            }
        }
    }
}

async fn fail_task_stream_closed(inner: &Arc<Inner>, task: BatchTask) {
    let err = ProducerError::StreamClosed;
    inner.record_first_error(task.order, &err);
    inner.invoke_on_error(&err);
    let epoch = inner.current_epoch();
    inner
        .coordinator
        .signal(epoch, task.seq, Some(err.to_string()))
        .await;
    for msg in task.messages {
        let _ = msg.ack.send(Err(err.clone()));
    }
    inner.queue.mark_batch_done();
    inner.idle.notify_waiters();
}

async fn process_batch(
    inner: Arc<Inner>,
    task: BatchTask,
    _permit: tokio::sync::OwnedSemaphorePermit,
) {
    let epoch_at_submit = inner.current_epoch();
    let seq = task.seq;
    let messages: Vec<Bytes> = task.messages.iter().map(|m| m.data.clone()).collect();

    let (final_epoch, final_seq, outcome) =
        send_with_protocol(&inner, &messages, epoch_at_submit, seq).await;

    match &outcome {
        Ok(()) => {
            if final_seq == 0 {
                inner.mark_epoch_claimed();
            }
        }
        Err(err) => {
            inner.record_first_error(task.order, err);
            inner.invoke_on_error(err);
        }
    }

    inner
        .coordinator
        .signal(
            final_epoch,
            final_seq,
            outcome.as_ref().err().map(|e| e.to_string()),
        )
        .await;

    for msg in task.messages {
        let _ = msg.ack.send(outcome.clone());
    }

    inner.queue.mark_batch_done();
    inner.idle.notify_waiters();
}

/// Drive one batch through the send protocol to a terminal outcome:
/// content-type resolution, transport POST, and response
/// classification (§4.5), looping on retryable outcomes (epoch
/// auto-claim, sequence-gap wait) until the batch succeeds or fails
/// for good. Returns the `(epoch, seq)` the batch was *finally* sent
/// under, which can differ from the arguments if auto-claim fired.
async fn send_with_protocol(
    inner: &Arc<Inner>,
    messages: &[Bytes],
    mut epoch: u64,
    mut seq: u64,
) -> (u64, u64, Result<(), ProducerError>) {
    loop {
        if inner.closed_observed.load(Ordering::Acquire) {
            return (epoch, seq, Err(ProducerError::StreamClosed));
        }

        let content_type = inner.resolve_content_type().await;
        let is_json = is_json_content_type(&content_type);
        let body = encode_batch(is_json, messages);

        let headers = vec![
            (HEADER_CONTENT_TYPE.to_string(), content_type),
            (HEADER_PRODUCER_ID.to_string(), inner.producer_id.clone()),
            (HEADER_PRODUCER_EPOCH.to_string(), epoch.to_string()),
            (HEADER_PRODUCER_SEQ.to_string(), seq.to_string()),
        ];

        let resp = match inner.transport.post(&inner.stream.url, body, headers).await {
            Ok(resp) => resp,
            Err(transport_err) => return (epoch, seq, Err(transport_err.into())),
        };

        match resp.status {
            204 => return (epoch, seq, Ok(())),
            s if (200..300).contains(&s) => return (epoch, seq, Ok(())),
            403 => {
                let server_epoch = resp
                    .header(HEADER_PRODUCER_EPOCH)
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(epoch);

                if !inner.config.auto_claim {
                    return (epoch, seq, Err(ProducerError::StaleEpoch {
                        current_epoch: epoch,
                    }));
                }

                let new_epoch = server_epoch + 1;
                if inner.try_bump_epoch(new_epoch) {
                    trace_warn!(old_epoch = epoch, new_epoch, "auto-claiming stale epoch");
                    // This batch is about to be resent at seq 0 of the
                    // new epoch, so the queue's own numbering resumes
                    // at 1 rather than colliding with it.
                    inner.queue.reset_seq_to(1);
                    inner.coordinator.reset_epoch(new_epoch).await;
                }
                epoch = new_epoch;
                seq = 0;
                // Loop and resend at (new_epoch, 0).
            }
            409 => {
                let closed = resp
                    .header(HEADER_STREAM_CLOSED)
                    .map(|v| v.eq_ignore_ascii_case("true"))
                    .unwrap_or(false);

                if closed {
                    inner.closed_observed.store(true, Ordering::Release);
                    inner.queue.drain_rejecting(ProducerError::StreamClosed);
                    inner.idle.notify_waiters();
                    return (epoch, seq, Err(ProducerError::StreamClosed));
                }

                let is_gap = resp.header(HEADER_PRODUCER_EXPECTED_SEQ).is_some()
                    || resp.header(HEADER_PRODUCER_RECEIVED_SEQ).is_some();

                if !is_gap {
                    return (epoch, seq, Err(ProducerError::ContentTypeMismatch));
                }

                let expected = resp
                    .header(HEADER_PRODUCER_EXPECTED_SEQ)
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(0);
                let received = resp
                    .header(HEADER_PRODUCER_RECEIVED_SEQ)
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(seq);

                if expected < seq {
                    trace_debug!(epoch, seq, expected, received, "sequence gap, waiting for prior batches");
                    for prior in expected..seq {
                        let outcome = inner.coordinator.wait(epoch, prior).await;
                        if !outcome.ok {
                            return (
                                epoch,
                                seq,
                                Err(ProducerError::SequenceGap { expected, received }),
                            );
                        }
                    }
                }
                // Loop and resend the same (epoch, seq) batch now that
                // every earlier sequence in this epoch has landed.
            }
            400 => {
                return (
                    epoch,
                    seq,
                    Err(ProducerError::InvalidRequest {
                        message: "server rejected the request as malformed".to_string(),
                    }),
                )
            }
            404 => return (epoch, seq, Err(ProducerError::StreamNotFound)),
            other => return (epoch, seq, Err(ProducerError::HttpError { status: other })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::transport::fake::{FakeTransport, ScriptedResponse};
    use std::collections::HashMap;
    use std::time::Duration;

    fn test_stream(content_type: Option<&str>) -> DurableStream {
        DurableStream {
            url: "https://example.test/streams/s".to_string(),
            client: Client::new(),
            content_type: content_type.map(|s| s.to_string()),
        }
    }

    fn ok(status: u16) -> ScriptedResponse {
        ScriptedResponse::Ok(crate::transport::TransportResponse {
            status,
            headers: Default::default(),
        })
    }

    #[tokio::test]
    async fn happy_path_batches_two_appends_into_one_post() {
        let transport = Arc::new(FakeTransport::new("application/json"));
        transport.push_response(ok(200));

        let producer = test_stream(Some("application/json"))
            .producer("p1")
            .max_batch_bytes(1024 * 1024)
            .linger(Duration::from_millis(5))
            .build_with_transport(transport.clone())
            .unwrap();

        let a = producer.append(Bytes::from_static(b"\"a\""));
        let b = producer.append(Bytes::from_static(b"\"b\""));
        producer.flush().await.unwrap();

        a.await.unwrap();
        b.await.unwrap();

        let posts = transport.recorded_posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].body, Bytes::from_static(b"[\"a\",\"b\"]"));
        assert_eq!(posts[0].headers.get("producer-id").unwrap(), "p1");
        assert_eq!(posts[0].headers.get("producer-epoch").unwrap(), "0");
        assert_eq!(posts[0].headers.get("producer-seq").unwrap(), "0");

        assert_eq!(producer.epoch(), 0);
        assert_eq!(producer.next_seq(), 1);
    }

    #[tokio::test]
    async fn duplicate_204_resolves_awaiters_as_success() {
        let transport = Arc::new(FakeTransport::new("application/json"));
        transport.push_response(ok(204));

        let producer = test_stream(Some("application/json"))
            .producer("p1")
            .linger(Duration::from_millis(0))
            .build_with_transport(transport.clone())
            .unwrap();

        let handle = producer.append(Bytes::from_static(b"\"x\""));
        producer.flush().await.unwrap();
        handle.await.unwrap();

        assert_eq!(producer.next_seq(), 1);
    }

    #[tokio::test]
    async fn stale_epoch_without_auto_claim_fails_batch() {
        let transport = Arc::new(FakeTransport::new("application/json"));
        let mut headers = HashMap::new();
        headers.insert("producer-epoch".to_string(), "7".to_string());
        transport.push_response(ScriptedResponse::Ok(crate::transport::TransportResponse {
            status: 403,
            headers,
        }));

        let producer = test_stream(Some("application/json"))
            .producer("p1")
            .linger(Duration::from_millis(0))
            .build_with_transport(transport.clone())
            .unwrap();

        let handle = producer.append(Bytes::from_static(b"\"x\""));
        let _ = producer.flush().await;
        let err = handle.await.unwrap_err();
        assert!(matches!(err, ProducerError::StaleEpoch { current_epoch: 0 }));
    }

    #[tokio::test]
    async fn auto_claim_bumps_epoch_and_resends_at_seq_zero() {
        let transport = Arc::new(FakeTransport::new("application/json"));
        let mut headers = HashMap::new();
        headers.insert("producer-epoch".to_string(), "7".to_string());
        transport.push_response(ScriptedResponse::Ok(crate::transport::TransportResponse {
            status: 403,
            headers,
        }));
        transport.push_response(ok(200));

        let producer = test_stream(Some("application/json"))
            .producer("p1")
            .auto_claim(true)
            .linger(Duration::from_millis(0))
            .build_with_transport(transport.clone())
            .unwrap();

        let handle = producer.append(Bytes::from_static(b"\"x\""));
        producer.flush().await.unwrap();
        handle.await.unwrap();

        let posts = transport.recorded_posts();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[1].headers.get("producer-epoch").unwrap(), "8");
        assert_eq!(posts[1].headers.get("producer-seq").unwrap(), "0");
        assert_eq!(producer.epoch(), 8);
        assert_eq!(producer.next_seq(), 1);
    }

    #[tokio::test]
    async fn restart_bumps_epoch_and_resets_seq_to_zero() {
        let transport = Arc::new(FakeTransport::new("application/json"));
        transport.push_response(ok(200));
        transport.push_response(ok(200));

        let producer = test_stream(Some("application/json"))
            .producer("p1")
            .linger(Duration::from_millis(0))
            .build_with_transport(transport.clone())
            .unwrap();

        let first = producer.append(Bytes::from_static(b"\"a\""));
        producer.flush().await.unwrap();
        first.await.unwrap();
        assert_eq!(producer.epoch(), 0);
        assert_eq!(producer.next_seq(), 1);

        producer.restart().await.unwrap();
        assert_eq!(producer.epoch(), 1);
        assert_eq!(producer.next_seq(), 0);

        let second = producer.append(Bytes::from_static(b"\"b\""));
        producer.flush().await.unwrap();
        second.await.unwrap();

        let posts = transport.recorded_posts();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[1].headers.get("producer-epoch").unwrap(), "1");
        assert_eq!(posts[1].headers.get("producer-seq").unwrap(), "0");
    }

    #[tokio::test]
    async fn gap_retry_waits_for_prior_sequence_then_resends() {
        let transport = Arc::new(FakeTransport::new("application/json"));

        // Batch 0 succeeds only after a short delay isn't needed here -
        // the fake resolves synchronously, so script seq 0 success and
        // seq 1's first attempt as a gap, then success on resend.
        transport.push_response_for_seq(0, ok(200));

        let mut gap_headers = HashMap::new();
        gap_headers.insert("producer-expected-seq".to_string(), "0".to_string());
        gap_headers.insert("producer-received-seq".to_string(), "1".to_string());
        transport.push_response_for_seq(
            1,
            ScriptedResponse::Ok(crate::transport::TransportResponse {
                status: 409,
                headers: gap_headers,
            }),
        );
        transport.push_response_for_seq(1, ok(200));

        let producer = test_stream(Some("application/json"))
            .producer("p1")
            .max_in_flight(2)
            .linger(Duration::from_millis(0))
            .build_with_transport(transport.clone())
            .unwrap();

        let h0 = producer.append(Bytes::from_static(b"\"a\""));
        producer.flush().await.unwrap();
        let h1 = producer.append(Bytes::from_static(b"\"b\""));
        producer.flush().await.unwrap();

        h0.await.unwrap();
        h1.await.unwrap();

        let posts = transport.recorded_posts();
        assert_eq!(posts.len(), 3);
    }

    #[tokio::test]
    async fn closed_stream_fails_batch_and_rejects_subsequent_appends() {
        let transport = Arc::new(FakeTransport::new("application/json"));
        let mut headers = HashMap::new();
        headers.insert("stream-closed".to_string(), "true".to_string());
        transport.push_response(ScriptedResponse::Ok(crate::transport::TransportResponse {
            status: 409,
            headers,
        }));

        let producer = test_stream(Some("application/json"))
            .producer("p1")
            .linger(Duration::from_millis(0))
            .build_with_transport(transport.clone())
            .unwrap();

        let handle = producer.append(Bytes::from_static(b"\"x\""));
        let _ = producer.flush().await;
        let err = handle.await.unwrap_err();
        assert!(matches!(err, ProducerError::StreamClosed));

        // Give the engine a moment to observe and propagate the closed
        // state before the next append is issued.
        tokio::task::yield_now().await;

        let rejected = producer.append(Bytes::from_static(b"\"y\""));
        let err = rejected.await.unwrap_err();
        assert!(matches!(err, ProducerError::ProducerClosed));
    }

    #[tokio::test]
    async fn config_validation_rejects_empty_producer_id() {
        let transport = Arc::new(FakeTransport::new("application/json"));
        let result = test_stream(Some("application/json"))
            .producer("")
            .build_with_transport(transport);
        assert!(result.is_err());
    }
}
