//! Single-outstanding-receive delivery loop for a subscribe endpoint.
//!
//! One task per armed endpoint. The task waits for the next frame, applies
//! the subscription filters, runs the handler to completion and only then
//! waits again, so at most one receive is outstanding and deliveries are
//! strictly ordered. Stopping is cooperative: the cancellation token is
//! checked before every wait, and a wait that is cancelled before any data
//! arrives ends the loop without calling the handler.

use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{BusError, BusMessage, MessageHandler};
use crate::transport::FrameReader;

/// Prefix filters installed on a subscribe socket.
///
/// A body is accepted when any filter is a byte prefix of it. With no
/// filters nothing is accepted. Filters may be added while the loop runs.
#[derive(Debug, Default)]
pub struct SubscriptionFilters {
    prefixes: RwLock<Vec<Bytes>>,
}

impl SubscriptionFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prefix: impl Into<Bytes>) {
        self.prefixes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prefix.into());
    }

    pub fn matches(&self, body: &[u8]) -> bool {
        self.prefixes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|prefix| body.starts_with(prefix))
    }

    pub fn len(&self) -> usize {
        self.prefixes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Why a receive loop ended.
#[derive(Debug)]
pub enum ReceiveOutcome {
    /// The token was cancelled; no message was lost or half-delivered.
    Canceled,
    /// The peer closed the connection.
    Closed,
    /// Receiving failed at the transport.
    Failed(BusError),
}

impl ReceiveOutcome {
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

/// Receive loop state moved into the spawned task.
pub struct ReceiveLoop {
    reader: FrameReader,
    filters: Arc<SubscriptionFilters>,
    handler: Arc<dyn MessageHandler>,
    token: CancellationToken,
}

impl ReceiveLoop {
    pub fn new(
        reader: FrameReader,
        filters: Arc<SubscriptionFilters>,
        handler: Arc<dyn MessageHandler>,
        token: CancellationToken,
    ) -> Self {
        Self {
            reader,
            filters,
            handler,
            token,
        }
    }

    /// Run until cancelled or the connection ends.
    ///
    /// Hands the reader back so a stopped endpoint can be armed again.
    pub async fn run(mut self) -> (FrameReader, ReceiveOutcome) {
        let outcome = self.receive_until_done().await;
        match &outcome {
            ReceiveOutcome::Canceled => debug!("Receive loop canceled"),
            ReceiveOutcome::Closed => info!("Receive loop ended, connection closed"),
            ReceiveOutcome::Failed(e) => {
                error!(operation = "recv", error = %e, "Receive loop failed")
            }
        }
        (self.reader, outcome)
    }

    async fn receive_until_done(&mut self) -> ReceiveOutcome {
        loop {
            // Cancellation wins over a frame that is already buffered.
            let frame = tokio::select! {
                biased;
                _ = self.token.cancelled() => return ReceiveOutcome::Canceled,
                frame = self.reader.next() => frame,
            };

            let body = match frame {
                Some(Ok(body)) => body.freeze(),
                Some(Err(e)) => {
                    return ReceiveOutcome::Failed(BusError::transport("recv", e));
                }
                None => return ReceiveOutcome::Closed,
            };

            self.deliver(body);
        }
    }

    fn deliver(&self, body: Bytes) {
        if !self.filters.matches(&body) {
            trace!(len = body.len(), "Frame filtered out");
            return;
        }

        let message = match BusMessage::decode(body) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame");
                return;
            }
        };

        trace!(topic = message.topic(), len = message.payload().len(), "Delivering");
        if let Err(e) = self.handler.handle(&message) {
            warn!(topic = message.topic(), error = %e, "Message handler failed");
        }
    }
}
