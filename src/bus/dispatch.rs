//! Handler dispatch for received messages.
//!
//! Resolves a received topic back to the handler registered for it. Topics
//! that resolve to nothing are dropped: unknown topics are ignored.

use std::sync::Arc;

use tracing::{debug, error, trace};

use super::{BusMessage, MessageHandler, Result, TopicRegistry};

/// Result of routing one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    /// The registered handler ran and succeeded.
    Delivered,
    /// No registered entry (or no handler) for the topic; message dropped.
    NotFound,
    /// The registered handler returned an error.
    HandlerFailed,
}

impl DispatchResult {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Routes received messages through a topic registry.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    registry: Arc<TopicRegistry>,
}

impl TopicRouter {
    pub fn new(registry: Arc<TopicRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    /// Find the handler for `message` and run it.
    ///
    /// Handler failures are logged here and reported in the result.
    pub fn dispatch(&self, message: &BusMessage) -> DispatchResult {
        let head = message.head();
        let method = message.method();

        let Some(index) = self.registry.find_topic_index(head, method) else {
            debug!(head, method, "No registered topic, dropping message");
            return DispatchResult::NotFound;
        };
        let Some(handler) = self.registry.handler(index) else {
            debug!(head, method, index, "Topic has no handler, dropping message");
            return DispatchResult::NotFound;
        };

        trace!(head, method, index, len = message.payload().len(), "Dispatching");
        match handler.handle(message) {
            Ok(()) => DispatchResult::Delivered,
            Err(e) => {
                error!(head, method, error = %e, "Handler failed");
                DispatchResult::HandlerFailed
            }
        }
    }
}

impl MessageHandler for TopicRouter {
    fn handle(&self, message: &BusMessage) -> Result<()> {
        // Failures are already logged by dispatch; the loop keeps going.
        self.dispatch(message);
        Ok(())
    }
}
