//! Transport adapter: the one seam the producer engine talks HTTP
//! through.
//!
//! `Transport::post` retries transient failures (network errors, 429,
//! 500-599) with exponential backoff and jitter up to a bounded attempt
//! count; non-retryable statuses (4xx except 429, and 2xx) are returned
//! verbatim for the caller to classify. `Transport::head` never retries.
//!
//! Duplicate-safety for POST retries relies entirely on the producer
//! headers being present on every attempt, including the first - this
//! module does not know about producer identity at all.

use crate::error::TransportError;
use crate::log::{trace_debug, trace_error};
use crate::retry::{JitterMode, RetryConfig};
use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Response envelope: status code plus the response headers the engine
/// needs to classify it (lower-cased header names).
#[derive(Clone, Debug, Default)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
}

impl TransportResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Minimal transport interface the producer engine depends on.
///
/// Implemented with a plain trait object (`Arc<dyn Transport>`) rather
/// than a generic parameter threaded through the whole producer, so
/// tests can inject a `FakeTransport` without the producer becoming
/// generic over its HTTP stack.
pub trait Transport: Send + Sync {
    fn post(
        &self,
        url: &str,
        body: Bytes,
        headers: Vec<(String, String)>,
    ) -> BoxFuture<'_, Result<TransportResponse, TransportError>>;

    fn head(
        &self,
        url: &str,
        headers: Vec<(String, String)>,
    ) -> BoxFuture<'_, Result<TransportResponse, TransportError>>;
}

/// Retrying `reqwest`-backed transport.
///
/// Default retry policy: 3 retries, 100ms initial backoff, 2x
/// multiplier, 10s cap, +/-10% jitter.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            retry: RetryConfig {
                initial_backoff: Duration::from_millis(100),
                max_backoff: Duration::from_secs(10),
                multiplier: 2.0,
                max_retries: 3,
                jitter: JitterMode::Percent(0.10),
            },
        }
    }

    pub fn with_retry(client: reqwest::Client, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    fn is_transient(status: u16) -> bool {
        status == 429 || (500..=599).contains(&status)
    }

    async fn post_inner(
        &self,
        url: &str,
        body: Bytes,
        headers: Vec<(String, String)>,
    ) -> Result<TransportResponse, TransportError> {
        let mut attempt = 0u32;
        let mut delay = self.retry.initial_backoff;
        let mut last_status = None;

        loop {
            let mut req = self.client.post(url).body(body.clone());
            for (k, v) in &headers {
                req = req.header(k.as_str(), v.as_str());
            }

            let send_result = req.send().await;

            let resp = match send_result {
                Ok(r) => r,
                Err(e) => {
                    if self.retry.should_retry(attempt) {
                        trace_debug!(attempt, error = %e, "transport post network error, retrying");
                        delay = self.retry.next_backoff(attempt, delay);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(TransportError::from(e));
                }
            };

            let status = resp.status().as_u16();

            if Self::is_transient(status) {
                last_status = Some(status);
                if self.retry.should_retry(attempt) {
                    trace_debug!(attempt, status, "transport post transient status, retrying");
                    delay = self.retry.next_backoff(attempt, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                trace_error!(attempt, status, "transport post retries exhausted");
                return Err(TransportError::RetriesExhausted {
                    attempts: attempt + 1,
                    last_status,
                });
            }

            return Ok(to_transport_response(resp).await);
        }
    }

    async fn head_inner(
        &self,
        url: &str,
        headers: Vec<(String, String)>,
    ) -> Result<TransportResponse, TransportError> {
        let mut req = self.client.head(url);
        for (k, v) in &headers {
            req = req.header(k.as_str(), v.as_str());
        }
        let resp = req.send().await?;
        Ok(to_transport_response(resp).await)
    }
}

async fn to_transport_response(resp: reqwest::Response) -> TransportResponse {
    let status = resp.status().as_u16();
    let headers = resp
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_lowercase(), v.to_string())))
        .collect();
    TransportResponse { status, headers }
}

impl Transport for ReqwestTransport {
    fn post(
        &self,
        url: &str,
        body: Bytes,
        headers: Vec<(String, String)>,
    ) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
        let url = url.to_string();
        Box::pin(async move { self.post_inner(&url, body, headers).await })
    }

    fn head(
        &self,
        url: &str,
        headers: Vec<(String, String)>,
    ) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
        let url = url.to_string();
        Box::pin(async move { self.head_inner(&url, headers).await })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Scripted response the fake transport will hand back for the next
    /// matching call.
    #[derive(Clone, Debug)]
    pub enum ScriptedResponse {
        Ok(TransportResponse),
        Err(TransportError),
    }

    /// A recorded request, kept for assertions.
    #[derive(Clone, Debug)]
    pub struct RecordedRequest {
        pub url: String,
        pub body: Bytes,
        pub headers: HashMap<String, String>,
    }

    /// Transport double driven by a pre-loaded script of responses, one
    /// per call to `post` (in order). `head` always returns a fixed
    /// content type response.
    ///
    /// Responses can also be scripted per `Producer-Seq` value via
    /// [`FakeTransport::push_response_for_seq`], which takes priority
    /// over the global queue - needed for tests where multiple batches
    /// are in flight concurrently and real call order is not
    /// deterministic.
    #[derive(Clone)]
    pub struct FakeTransport {
        inner: Arc<Mutex<FakeState>>,
    }

    struct FakeState {
        post_script: VecDeque<ScriptedResponse>,
        seq_scripts: HashMap<u64, VecDeque<ScriptedResponse>>,
        head_response: TransportResponse,
        posts: Vec<RecordedRequest>,
    }

    impl FakeTransport {
        pub fn new(content_type: &str) -> Self {
            let mut head_headers = HashMap::new();
            head_headers.insert("content-type".to_string(), content_type.to_string());
            Self {
                inner: Arc::new(Mutex::new(FakeState {
                    post_script: VecDeque::new(),
                    seq_scripts: HashMap::new(),
                    head_response: TransportResponse {
                        status: 200,
                        headers: head_headers,
                    },
                    posts: Vec::new(),
                })),
            }
        }

        pub fn push_response(&self, resp: ScriptedResponse) {
            self.inner.lock().post_script.push_back(resp);
        }

        pub fn push_response_for_seq(&self, seq: u64, resp: ScriptedResponse) {
            self.inner
                .lock()
                .seq_scripts
                .entry(seq)
                .or_default()
                .push_back(resp);
        }

        pub fn recorded_posts(&self) -> Vec<RecordedRequest> {
            self.inner.lock().posts.clone()
        }
    }

    impl Transport for FakeTransport {
        fn post(
            &self,
            url: &str,
            body: Bytes,
            headers: Vec<(String, String)>,
        ) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
            let url = url.to_string();
            Box::pin(async move {
                let mut state = self.inner.lock();
                let headers: HashMap<String, String> = headers.into_iter().collect();
                let seq = headers.get("producer-seq").and_then(|v| v.parse::<u64>().ok());

                state.posts.push(RecordedRequest {
                    url,
                    body,
                    headers: headers.clone(),
                });

                let scripted = seq
                    .and_then(|s| state.seq_scripts.get_mut(&s))
                    .and_then(|q| q.pop_front())
                    .or_else(|| state.post_script.pop_front());

                match scripted {
                    Some(ScriptedResponse::Ok(r)) => Ok(r),
                    Some(ScriptedResponse::Err(e)) => Err(e),
                    None => Ok(TransportResponse {
                        status: 200,
                        headers: HashMap::new(),
                    }),
                }
            })
        }

        fn head(
            &self,
            _url: &str,
            _headers: Vec<(String, String)>,
        ) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
            Box::pin(async move { Ok(self.inner.lock().head_response.clone()) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::*;
    use super::*;

    #[tokio::test]
    async fn fake_transport_replays_scripted_responses_in_order() {
        let transport = FakeTransport::new("application/json");
        transport.push_response(ScriptedResponse::Ok(TransportResponse {
            status: 200,
            headers: HashMap::new(),
        }));
        transport.push_response(ScriptedResponse::Ok(TransportResponse {
            status: 204,
            headers: HashMap::new(),
        }));

        let r1 = transport
            .post("https://x/s", Bytes::from_static(b"a"), vec![])
            .await
            .unwrap();
        let r2 = transport
            .post("https://x/s", Bytes::from_static(b"b"), vec![])
            .await
            .unwrap();

        assert_eq!(r1.status, 200);
        assert_eq!(r2.status, 204);
        assert_eq!(transport.recorded_posts().len(), 2);
    }

    #[tokio::test]
    async fn fake_transport_head_reports_configured_content_type() {
        let transport = FakeTransport::new("text/csv");
        let r = transport.head("https://x/s", vec![]).await.unwrap();
        assert_eq!(r.header("content-type"), Some("text/csv"));
    }
}
