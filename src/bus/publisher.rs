//! Publish endpoint.
//!
//! Dials the proxy's front URL and sends `<head>/<method>` messages.

use std::sync::Arc;

use backon::ExponentialBuilder;
use bytes::Bytes;
use futures::SinkExt;
use tracing::{debug, error, info, trace, warn};

use super::topic::validate_topic;
use super::{
    dial_once, dial_retrying, BusError, BusMessage, EndpointState, Result, TopicRegistry,
};
use crate::transport::{BusUrl, FrameWriter};
use crate::utils::retry::dial_backoff;

/// Publish side of the bus.
///
/// Lifecycle `Closed -> Open -> Connected -> Closed`. A send failure drops
/// the connection and returns the endpoint to `Open`; redial to continue.
pub struct PubEndpoint {
    url: BusUrl,
    state: EndpointState,
    registry: Arc<TopicRegistry>,
    writer: Option<FrameWriter>,
}

impl PubEndpoint {
    /// Create a closed endpoint for `url`.
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self::from_url(url.parse()?))
    }

    pub fn from_url(url: BusUrl) -> Self {
        Self {
            url,
            state: EndpointState::Closed,
            registry: Arc::new(TopicRegistry::new()),
            writer: None,
        }
    }

    pub fn url(&self) -> &BusUrl {
        &self.url
    }

    pub fn state(&self) -> EndpointState {
        self.state
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

    pub fn open(&mut self) -> Result<()> {
        if self.state != EndpointState::Closed {
            return Err(self.invalid("open"));
        }
        self.state = EndpointState::Open;
        debug!(url = %self.url, "Publish endpoint opened");
        Ok(())
    }

    /// Connect to the configured URL. One attempt.
    pub async fn dial(&mut self) -> Result<()> {
        if self.state != EndpointState::Open {
            return Err(self.invalid("dial"));
        }
        let (_reader, writer) = dial_once(&self.url).await?;
        self.connected(writer);
        Ok(())
    }

    /// Connect, retrying with [`dial_backoff`].
    pub async fn dial_with_retry(&mut self) -> Result<()> {
        self.dial_with_backoff(dial_backoff()).await
    }

    pub async fn dial_with_backoff(&mut self, backoff: ExponentialBuilder) -> Result<()> {
        if self.state != EndpointState::Open {
            return Err(self.invalid("dial"));
        }
        let (_reader, writer) = dial_retrying(&self.url, backoff).await?;
        self.connected(writer);
        Ok(())
    }

    fn connected(&mut self, writer: FrameWriter) {
        self.writer = Some(writer);
        self.state = EndpointState::Connected;
        info!(url = %self.url, "Publish endpoint connected");
    }

    /// Register a topic this endpoint publishes; returns its index for
    /// [`PubEndpoint::publish_registered`].
    pub fn add_topic(&self, head: &str, method: &str) -> Result<usize> {
        self.registry.add(head, method, None)
    }

    /// Publish `payload` on `head`/`method`.
    pub async fn publish(
        &mut self,
        head: &str,
        method: &str,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        validate_topic(head, method)?;
        self.send(BusMessage::new(head, method, payload)).await
    }

    /// Publish `payload` on the topic registered at `index`.
    pub async fn publish_registered(
        &mut self,
        index: usize,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        let entry = self.registry.entry(index).ok_or_else(|| {
            BusError::InvalidTopic(format!("no registered topic at index {index}"))
        })?;
        self.send(BusMessage::with_topic(entry.topic(), payload)).await
    }

    async fn send(&mut self, message: BusMessage) -> Result<()> {
        if self.state != EndpointState::Connected {
            return Err(self.invalid("publish"));
        }
        let writer = self.writer.as_mut().ok_or(BusError::Closed)?;

        trace!(topic = message.topic(), len = message.payload().len(), "Publishing");
        if let Err(e) = writer.send(message.encode()).await {
            error!(
                operation = "send",
                url = %self.url,
                topic = message.topic(),
                error = %e,
                "Publish failed"
            );
            self.writer = None;
            self.state = EndpointState::Open;
            return Err(BusError::transport("send", e));
        }
        Ok(())
    }

    /// Flush pending frames and release the socket.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == EndpointState::Closed {
            return Err(self.invalid("close"));
        }
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = SinkExt::<Bytes>::close(&mut writer).await {
                warn!(url = %self.url, error = %e, "Error flushing on close");
            }
        }
        self.state = EndpointState::Closed;
        info!(url = %self.url, "Publish endpoint closed");
        Ok(())
    }
}
