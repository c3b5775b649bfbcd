//! Subscribe endpoint.
//!
//! Dials the proxy's back URL, installs one prefix filter per registered
//! topic, and delivers matching messages through a [`ReceiveLoop`] task.

use std::sync::Arc;

use backon::ExponentialBuilder;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::receive::SubscriptionFilters;
use super::{
    dial_once, dial_retrying, BusError, EndpointState, MessageHandler, ReceiveLoop,
    ReceiveOutcome, ReceiveState, Result, TopicRegistry, TopicRouter,
};
use crate::transport::{BusUrl, FrameReader, FrameWriter};
use crate::utils::retry::dial_backoff;

struct ArmedReceive {
    token: CancellationToken,
    handle: JoinHandle<(FrameReader, ReceiveOutcome)>,
}

/// Subscribe side of the bus.
///
/// Socket lifecycle `Closed -> Open -> Connected -> Closed`; once connected
/// the receive lifecycle `Idle -> Armed -> Stopping -> Idle` runs on top.
pub struct SubEndpoint {
    url: BusUrl,
    state: EndpointState,
    registry: Arc<TopicRegistry>,
    filters: Arc<SubscriptionFilters>,
    reader: Option<FrameReader>,
    // Held open so the proxy sees this subscriber as attached.
    link: Option<FrameWriter>,
    receive: Option<ArmedReceive>,
    shutdown: CancellationToken,
}

impl SubEndpoint {
    /// Create a closed endpoint for `url`.
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self::from_url(url.parse()?))
    }

    pub fn from_url(url: BusUrl) -> Self {
        Self {
            url,
            state: EndpointState::Closed,
            registry: Arc::new(TopicRegistry::new()),
            filters: Arc::new(SubscriptionFilters::new()),
            reader: None,
            link: None,
            receive: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Tie the receive loop to a process-wide shutdown token.
    ///
    /// Cancelling `parent` stops the loop as `stop()` would; `stop()` is
    /// still needed to collect it.
    pub fn with_shutdown(mut self, parent: &CancellationToken) -> Self {
        self.shutdown = parent.child_token();
        self
    }

    pub fn url(&self) -> &BusUrl {
        &self.url
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    /// A loop that ended on its own (peer gone) reports `Idle`; `stop()`
    /// still has to collect it.
    pub fn receive_state(&self) -> ReceiveState {
        match &self.receive {
            None => ReceiveState::Idle,
            Some(armed) if armed.handle.is_finished() => ReceiveState::Idle,
            Some(armed) if armed.token.is_cancelled() => ReceiveState::Stopping,
            Some(_) => ReceiveState::Armed,
        }
    }

    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    fn invalid(&self, operation: &'static str) -> BusError {
        BusError::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }

    /// Allocate the socket.
    pub fn open(&mut self) -> Result<()> {
        if self.state != EndpointState::Closed {
            return Err(self.invalid("open"));
        }
        self.state = EndpointState::Open;
        debug!(url = %self.url, "Subscribe endpoint opened");
        Ok(())
    }

    /// Connect to the configured URL. One attempt.
    pub async fn dial(&mut self) -> Result<()> {
        if self.state != EndpointState::Open {
            return Err(self.invalid("dial"));
        }
        let (reader, writer) = dial_once(&self.url).await?;
        self.connected(reader, writer);
        Ok(())
    }

    /// Connect, retrying with [`dial_backoff`].
    pub async fn dial_with_retry(&mut self) -> Result<()> {
        self.dial_with_backoff(dial_backoff()).await
    }

    /// Connect, retrying with `backoff`.
    pub async fn dial_with_backoff(&mut self, backoff: ExponentialBuilder) -> Result<()> {
        if self.state != EndpointState::Open {
            return Err(self.invalid("dial"));
        }
        let (reader, writer) = dial_retrying(&self.url, backoff).await?;
        self.connected(reader, writer);
        Ok(())
    }

    fn connected(&mut self, reader: FrameReader, writer: FrameWriter) {
        self.reader = Some(reader);
        self.link = Some(writer);
        self.state = EndpointState::Connected;
        info!(url = %self.url, topics = self.registry.len(), "Subscribe endpoint connected");
    }

    /// Register `head`/`method` with `handler` and subscribe to it.
    ///
    /// Allowed in any state; a topic added while armed takes effect for
    /// the next message received.
    pub fn add_topic(
        &self,
        head: &str,
        method: &str,
        handler: impl MessageHandler + 'static,
    ) -> Result<usize> {
        let index = self.registry.add(head, method, Some(Arc::new(handler)))?;
        if let Some(entry) = self.registry.entry(index) {
            self.filters.add(entry.topic().as_bytes().to_vec());
            debug!(topic = entry.topic(), index, "Subscribed");
        }
        Ok(index)
    }

    /// Subscribe to a raw topic prefix without registering a handler.
    ///
    /// Used with `arm`, where one handler sees every accepted message.
    pub fn subscribe_prefix(&self, prefix: &str) {
        self.filters.add(prefix.as_bytes().to_vec());
        debug!(prefix, "Subscribed to prefix");
    }

    /// Start receiving; every accepted message goes to `on_message`.
    pub fn arm(&mut self, on_message: impl MessageHandler + 'static) -> Result<()> {
        self.arm_with(Arc::new(on_message))
    }

    /// Start receiving; each message goes to the handler registered for
    /// its topic, unknown topics are dropped.
    pub fn arm_routed(&mut self) -> Result<()> {
        let router = TopicRouter::new(Arc::clone(&self.registry));
        self.arm_with(Arc::new(router))
    }

    fn arm_with(&mut self, handler: Arc<dyn MessageHandler>) -> Result<()> {
        if self.state != EndpointState::Connected || self.receive.is_some() {
            return Err(BusError::InvalidState {
                operation: "arm",
                state: format!("{}/{}", self.state, self.receive_state()),
            });
        }
        let reader = self.reader.take().ok_or_else(|| self.invalid("arm"))?;

        let token = self.shutdown.child_token();
        let receive_loop =
            ReceiveLoop::new(reader, Arc::clone(&self.filters), handler, token.clone());
        let handle = tokio::spawn(receive_loop.run());
        self.receive = Some(ArmedReceive { token, handle });

        info!(url = %self.url, filters = self.filters.len(), "Receive armed");
        Ok(())
    }

    /// Stop the receive loop and wait until it has no outstanding work.
    ///
    /// Returns how the loop ended. Stopping an idle endpoint returns
    /// `Canceled`. If the connection was lost the endpoint drops back to
    /// `Open` and must be dialed again.
    pub async fn stop(&mut self) -> Result<ReceiveOutcome> {
        let Some(armed) = self.receive.take() else {
            return Ok(ReceiveOutcome::Canceled);
        };
        armed.token.cancel();

        match armed.handle.await {
            Ok((reader, outcome)) => {
                if outcome.is_canceled() {
                    self.reader = Some(reader);
                } else {
                    self.link = None;
                    self.state = EndpointState::Open;
                }
                debug!(url = %self.url, ?outcome, "Receive stopped");
                Ok(outcome)
            }
            Err(e) => {
                error!(url = %self.url, error = %e, "Receive task aborted");
                self.link = None;
                self.state = EndpointState::Open;
                Err(BusError::ReceiveAborted(e.to_string()))
            }
        }
    }

    /// Stop receiving and release the socket.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == EndpointState::Closed {
            return Err(self.invalid("close"));
        }
        self.stop().await?;
        self.reader = None;
        self.link = None;
        self.state = EndpointState::Closed;
        info!(url = %self.url, "Subscribe endpoint closed");
        Ok(())
    }
}

impl Drop for SubEndpoint {
    fn drop(&mut self) {
        if let Some(armed) = &self.receive {
            armed.token.cancel();
        }
    }
}
