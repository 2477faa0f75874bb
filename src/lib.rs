//! Durable Streams idempotent producer client.
//!
//! A Rust client for the producer side of the Durable Streams protocol:
//! batches appends, pipelines them as HTTP `POST`s carrying
//! `Producer-Id`/`Producer-Epoch`/`Producer-Seq` headers, and relies on
//! the server for deduplication. Epoch fencing (with optional
//! auto-claim) and sequence-gap recovery are handled transparently by
//! the background send loop.
//!
//! The read side (chunked catch-up, long-poll, SSE) and stream
//! lifecycle (create/delete) are out of scope for this crate - it only
//! ever issues `POST` and `HEAD` against a stream URL you already have.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use durable_streams::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new();
//!     let stream = client.stream("https://api.example.com/streams/my-stream");
//!
//!     let producer = stream.producer("my-producer-1").build()?;
//!     producer.append(b"hello world".as_slice());
//!     producer.flush().await?;
//!
//!     Ok(())
//! }
//! ```

mod batch;
mod client;
mod config;
mod error;
mod log;
mod producer;
mod queue;
mod retry;
mod sequence;
mod stream;
mod transport;
mod types;

pub use client::{Client, ClientBuilder};
pub use error::{ProducerConfigError, ProducerError, StreamError, TransportError};
pub use producer::{AppendHandle, OnErrorCallback, Producer, ProducerBuilder};
pub use stream::{DurableStream, HeadResponse};
pub use types::Offset;
