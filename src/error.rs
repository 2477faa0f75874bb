//! Error types for the Durable Streams producer client.

use thiserror::Error;

/// Error for invalid HTTP header configuration.
#[derive(Debug, Clone, Error)]
pub enum InvalidHeaderError {
    #[error("invalid header name: {0}")]
    InvalidName(String),
    #[error("invalid header value: {0}")]
    InvalidValue(String),
}

/// Error raised by a plain `HEAD` against a stream.
///
/// The producer uses this only for lazy content-type discovery; any
/// failure here is swallowed and treated as `application/octet-stream`
/// (the server will reject a real mismatch with 409 on the first POST).
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream not found: {url}")]
    NotFound { url: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("timeout")]
    Timeout,
}

impl StreamError {
    /// Create error from HTTP status code.
    pub fn from_status(status: u16, url: &str) -> Self {
        match status {
            401 => StreamError::Unauthorized,
            403 => StreamError::Forbidden,
            404 => StreamError::NotFound {
                url: url.to_string(),
            },
            _ => StreamError::ServerError {
                status,
                message: format!("unexpected status {status}"),
            },
        }
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StreamError::Timeout
        } else {
            StreamError::Network(err)
        }
    }
}

/// Transport-level error: what the transport adapter itself can raise
/// once its own retry budget (network errors, 429, 5xx) is exhausted.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("retries exhausted after {attempts} attempts, last status {last_status:?}")]
    RetriesExhausted {
        attempts: u32,
        last_status: Option<u16>,
    },
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Producer-specific errors, surfaced to per-message awaiters and to the
/// `on_error` sink.
///
/// This is the complete response-classification taxonomy: every variant
/// corresponds to exactly one way a batch can terminate without being
/// retried silently underneath the caller.
#[derive(Debug, Clone, Error)]
pub enum ProducerError {
    /// The producer has observed a terminal close (either `close()` was
    /// called or a prior batch saw `Stream-Closed: true`) and rejects new
    /// appends synchronously.
    #[error("producer is closed")]
    ProducerClosed,

    /// The server reported the stream itself is closed (409 +
    /// `Stream-Closed: true`). Terminal for this batch and every
    /// subsequently queued batch.
    #[error("stream is closed")]
    StreamClosed,

    /// 403: our epoch has been fenced by a newer producer instance and
    /// `auto_claim` is disabled.
    #[error("stale epoch: server is at epoch {current_epoch}")]
    StaleEpoch { current_epoch: u64 },

    /// 409 with neither a gap nor a closed-stream signal: the batch's
    /// `Content-Type` did not match the stream's fixed content type.
    #[error("content type does not match the stream's configured content type")]
    ContentTypeMismatch,

    /// 404: the stream does not exist.
    #[error("stream not found")]
    StreamNotFound,

    /// 400: the request was malformed from the server's point of view
    /// (e.g. an epoch bump that didn't reset to seq 0).
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// Any other non-retryable 4xx, or a retryable status for which the
    /// transport's retry budget ran out.
    #[error("http error: status {status}")]
    HttpError { status: u16 },

    /// Network failure or timeout, surfaced after the transport's own
    /// retry budget is exhausted.
    #[error("network error: {0}")]
    NetworkError(String),

    /// A 409 sequence gap that never resolved. Internal to the gap-wait
    /// retry loop; only escapes to a caller if the wait itself is
    /// abandoned (the producer closed while waiting).
    #[error("sequence gap: expected {expected}, received {received}")]
    SequenceGap { expected: u64, received: u64 },
}

impl From<TransportError> for ProducerError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network(msg) => ProducerError::NetworkError(msg),
            TransportError::Timeout => ProducerError::NetworkError("timed out".to_string()),
            TransportError::RetriesExhausted { last_status, .. } => match last_status {
                Some(status) => ProducerError::HttpError { status },
                None => ProducerError::NetworkError("retries exhausted".to_string()),
            },
        }
    }
}

/// Validation failures for `ProducerBuilder::build`.
///
/// The configuration surface's validation rules must fail before any
/// I/O is attempted, so `build()` is fallible rather than silently
/// clamping or ignoring invalid values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProducerConfigError {
    #[error("producer_id must not be empty")]
    EmptyProducerId,

    #[error("max_batch_bytes must be greater than zero")]
    ZeroMaxBatchBytes,

    #[error("max_in_flight must be greater than zero")]
    ZeroMaxInFlight,
}
