use crate::protocol::Protocol;
use crate::publishers::{MessageEnvelope, PublisherError};
use crate::transport::Transport;
use std::sync::Arc;
use task_local_extensions::Extensions;

/// Middlewares to execute logic before and after a message is published by [`Publisher`].
///
/// # Use case
///
/// The main purpose of middlewares is to extract and centralise common non-business logic that would
/// otherwise have to be copy-pasted for all publishers.
/// With middlewares we can build re-usable components to perform common tasks across multiple
/// applications - e.g. logging, injecting tracing headers or signing of messages.
///
/// # Extensions
///
/// `extensions` can be used to store values that are needed in this middleware on the way
/// back, after having called [`Next::run`], or should be shared with other middlewares downstream.
///
/// [`Publisher`]: super::Publisher
#[async_trait::async_trait]
pub trait PublisherMiddleware<P: Protocol>: Send + Sync {
    async fn handle(
        &self,
        envelope: MessageEnvelope<P>,
        extensions: &mut Extensions,
        next: Next<'_, P>,
    ) -> Result<(), PublisherError>;
}

/// The remainder of the publishing middleware chain, including the final publishing action.
#[allow(missing_debug_implementations)]
pub struct Next<'a, P: Protocol> {
    pub(super) transport: &'a dyn Transport<P>,
    /// Timeout on publishing.
    pub(super) timeout: std::time::Duration,
    /// The remainder of the middleware chain.
    pub(super) next_middleware: &'a [Arc<dyn PublisherMiddleware<P>>],
}

impl<'a, P: Protocol> Next<'a, P> {
    /// Asynchronously execute the remaining middleware chain.
    pub async fn run(
        mut self,
        envelope: MessageEnvelope<P>,
        extensions: &mut Extensions,
    ) -> Result<(), PublisherError> {
        if let Some((current, next)) = self.next_middleware.split_first() {
            self.next_middleware = next;
            current.handle(envelope, extensions, self).await
        } else {
            // Connection recovery and publishing share the same timeout.
            match tokio::time::timeout(self.timeout, self.transport.publish(envelope)).await {
                Ok(result) => result.map_err(PublisherError::from),
                Err(_) => Err(PublisherError::TimeoutError),
            }
        }
    }
}
