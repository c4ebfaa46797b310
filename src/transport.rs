//! The I/O half of a broker integration.
use crate::protocol::Protocol;
use crate::publishers::MessageEnvelope;

/// A connection to a broker, able to open subscriptions and publish messages.
///
/// Implementations own reconnection at the connection level; the dispatch loop reacts to
/// [`TransportError`]s by re-subscribing after a delay.
#[async_trait::async_trait]
pub trait Transport<P: Protocol>: Send + Sync + 'static {
    /// Establish the connection with the broker.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Start receiving messages for `binding`, declaring any broker-side topology it needs.
    async fn subscribe(
        &self,
        binding: &P::Binding,
    ) -> Result<Box<dyn Subscription<P>>, TransportError>;

    async fn publish(&self, message: MessageEnvelope<P>) -> Result<(), TransportError>;
}

/// A live stream of messages for a single binding.
#[async_trait::async_trait]
pub trait Subscription<P: Protocol>: Send {
    /// Wait for the next message.
    ///
    /// Returns `Ok(None)` if the broker closed the subscription for good.
    /// Must be cancellation safe: dropping the returned future must not lose a message.
    async fn receive(&mut self) -> Result<Option<P::Raw>, TransportError>;

    /// Stop receiving messages.
    async fn unsubscribe(self: Box<Self>) -> Result<(), TransportError>;
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("The connection with the broker is not available")]
    Connection(#[source] anyhow::Error),
    #[error("Failed to set up a subscription with the broker")]
    Subscribe(#[source] anyhow::Error),
    #[error("Failed to publish a message to the broker")]
    Publish(#[source] anyhow::Error),
}
