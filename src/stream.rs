//! Stream handle: identifies one append-only stream and resolves its
//! producer-facing metadata (content type) via `HEAD`.
//!
//! Stream lifecycle (create/delete) and the read side (chunked
//! catch-up, long-poll, SSE) are out of scope for this crate: the
//! producer only ever issues `POST` and `HEAD` against a stream URL.

use crate::client::Client;
use crate::error::StreamError;
use crate::producer::ProducerBuilder;
use crate::types::Offset;

/// Protocol header names.
pub(crate) const HEADER_CONTENT_TYPE: &str = "content-type";
pub(crate) const HEADER_STREAM_OFFSET: &str = "stream-next-offset";

/// Producer headers.
pub(crate) const HEADER_PRODUCER_ID: &str = "producer-id";
pub(crate) const HEADER_PRODUCER_EPOCH: &str = "producer-epoch";
pub(crate) const HEADER_PRODUCER_SEQ: &str = "producer-seq";
pub(crate) const HEADER_PRODUCER_EXPECTED_SEQ: &str = "producer-expected-seq";
pub(crate) const HEADER_PRODUCER_RECEIVED_SEQ: &str = "producer-received-seq";
pub(crate) const HEADER_STREAM_CLOSED: &str = "stream-closed";

/// A handle to a durable stream.
///
/// This is a lightweight, cloneable object, not a persistent connection.
/// Operations make HTTP requests on demand.
#[derive(Clone, Debug)]
pub struct DurableStream {
    pub(crate) url: String,
    pub(crate) client: Client,
    pub(crate) content_type: Option<String>,
}

impl DurableStream {
    /// Get the stream URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get the content type set on this stream handle.
    ///
    /// This is used by the producer's JSON-mode detection if set; if
    /// absent, the producer discovers it lazily via `HEAD` on first
    /// send, falling back to `application/octet-stream`.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Set the content type for this stream handle, bypassing the
    /// producer's lazy `HEAD` discovery.
    pub fn set_content_type(&mut self, ct: impl Into<String>) {
        self.content_type = Some(ct.into());
    }

    /// Get stream metadata via `HEAD`.
    ///
    /// Used internally by the producer to discover the stream's fixed
    /// content type on first send; exposed publicly since it's a cheap,
    /// side-effect-free read.
    pub async fn head(&self) -> Result<HeadResponse, StreamError> {
        let client_headers = self.client.get_headers();
        let mut req = self.client.inner.head(&self.url);
        for (key, value) in client_headers.iter() {
            req = req.header(key.clone(), value.clone());
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();

        match status {
            200 => {
                let next_offset = resp
                    .headers()
                    .get(HEADER_STREAM_OFFSET)
                    .and_then(|v| v.to_str().ok())
                    .map(Offset::parse)
                    .unwrap_or(Offset::Beginning);

                let content_type = resp
                    .headers()
                    .get(HEADER_CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.to_string());

                Ok(HeadResponse {
                    next_offset,
                    content_type,
                })
            }
            404 => Err(StreamError::NotFound {
                url: self.url.clone(),
            }),
            _ => Err(StreamError::from_status(status, &self.url)),
        }
    }

    /// Create an idempotent producer builder for this stream.
    pub fn producer(&self, producer_id: impl Into<String>) -> ProducerBuilder {
        ProducerBuilder::new(self.clone(), producer_id.into())
    }
}

/// Response from a `HEAD` operation.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct HeadResponse {
    pub next_offset: Offset,
    pub content_type: Option<String>,
}
