//! Topic-routed publish/subscribe bus between device processes.
//!
//! This module contains:
//! - `BusMessage`: topic + opaque payload as carried on the wire
//! - `MessageHandler` trait: receives messages from a subscribe endpoint
//! - `TopicRegistry`: registered (head, method) topics and their handlers
//! - `PubEndpoint` / `SubEndpoint`: publish and subscribe socket lifecycles
//! - `ReceiveLoop`: the single-outstanding-receive delivery loop
//! - `TopicRouter`: dispatch from a received topic to its registered handler
//! - `BusProxy`: forwarder every endpoint dials (front for publishers,
//!   back for subscribers)

use std::io;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{error, warn};

use crate::transport::{connect, BusUrl, FrameReader, FrameWriter, UrlError};

pub mod dispatch;
pub mod proxy;
pub mod publisher;
pub mod receive;
pub mod state;
pub mod subscriber;
pub mod topic;

pub use dispatch::{DispatchResult, TopicRouter};
pub use proxy::BusProxy;
pub use publisher::PubEndpoint;
pub use receive::{ReceiveLoop, ReceiveOutcome, SubscriptionFilters};
pub use state::{EndpointState, ReceiveState};
pub use subscriber::SubEndpoint;
pub use topic::{compose_topic, TopicEntry, TopicRegistry};

/// Separator between the topic and the payload inside a message body.
pub const TOPIC_TERMINATOR: u8 = 0;

// ============================================================================
// Errors
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Invalid url: {0}")]
    InvalidUrl(#[from] UrlError),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Cannot {operation} while endpoint is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Transport {operation} failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Allocation failed: {0}")]
    Allocation(&'static str),

    #[error("Receive canceled")]
    Canceled,

    #[error("No handler registered for {head}/{method}")]
    NotFound { head: String, method: String },

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Connection closed by peer")]
    Closed,

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Receive task aborted: {0}")]
    ReceiveAborted(String),
}

impl BusError {
    /// Wrap an I/O error with the name of the failing transport operation.
    pub fn transport(operation: &'static str, source: io::Error) -> Self {
        Self::Transport { operation, source }
    }

    /// True for an intentionally aborted receive; not a failure.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

// ============================================================================
// Messages
// ============================================================================

/// A message as it travels on the bus: `<head>/<method>` plus payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    topic: String,
    payload: Bytes,
}

impl BusMessage {
    /// Build a message for `head`/`method`.
    pub fn new(head: &str, method: &str, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: compose_topic(head, method),
            payload: payload.into(),
        }
    }

    /// Build a message from an already composed topic.
    pub fn with_topic(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Topic text before the first `/` (the whole topic if there is none).
    pub fn head(&self) -> &str {
        self.topic
            .split_once('/')
            .map(|(head, _)| head)
            .unwrap_or(&self.topic)
    }

    /// Topic text after the first `/` (empty if there is none).
    pub fn method(&self) -> &str {
        self.topic
            .split_once('/')
            .map(|(_, method)| method)
            .unwrap_or("")
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Encode as a wire body: topic, terminator, payload.
    ///
    /// Subscription filters are prefix matches against this body, so a
    /// filter equal to the topic selects the message.
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::with_capacity(self.topic.len() + 1 + self.payload.len());
        body.put_slice(self.topic.as_bytes());
        body.put_u8(TOPIC_TERMINATOR);
        body.put_slice(&self.payload);
        body.freeze()
    }

    /// Decode a wire body. The payload shares the body's buffer.
    pub fn decode(body: Bytes) -> Result<Self> {
        let split = body
            .iter()
            .position(|b| *b == TOPIC_TERMINATOR)
            .ok_or_else(|| BusError::Malformed("missing topic terminator".to_string()))?;
        let topic = std::str::from_utf8(&body[..split])
            .map_err(|e| BusError::Malformed(format!("topic is not utf-8: {e}")))?
            .to_string();
        let payload = body.slice(split + 1..);
        Ok(Self { topic, payload })
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for messages delivered by a subscribe endpoint.
///
/// Runs on the endpoint's receive task; the next receive is not armed until
/// it returns, so it must return promptly. Hand long work to a queue.
pub trait MessageHandler: Send + Sync {
    /// Process one message.
    fn handle(&self, message: &BusMessage) -> Result<()>;
}

impl<F> MessageHandler for F
where
    F: Fn(&BusMessage) -> Result<()> + Send + Sync,
{
    fn handle(&self, message: &BusMessage) -> Result<()> {
        self(message)
    }
}

// ============================================================================
// Dialing
// ============================================================================

/// Connect once; a failure is logged and reported, never retried.
pub(crate) async fn dial_once(url: &BusUrl) -> Result<(FrameReader, FrameWriter)> {
    connect(url).await.map_err(|e| {
        error!(operation = "dial", url = %url, error = %e, "Dial failed");
        BusError::transport("dial", e)
    })
}

/// Connect, retrying with `backoff` until it gives up.
pub(crate) async fn dial_retrying(
    url: &BusUrl,
    backoff: ExponentialBuilder,
) -> Result<(FrameReader, FrameWriter)> {
    (|| async { connect(url).await })
        .retry(backoff)
        .notify(|err: &io::Error, dur: Duration| {
            warn!(url = %url, error = %err, delay = ?dur, "Dial failed, retrying");
        })
        .await
        .map_err(|e| {
            error!(operation = "dial", url = %url, error = %e, "Dial retries exhausted");
            BusError::transport("dial", e)
        })
}
