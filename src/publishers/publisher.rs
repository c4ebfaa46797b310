use crate::protocol::Protocol;
use crate::publishers::publisher_middleware::Next;
use crate::publishers::{MessageEnvelope, PublisherMiddleware};
use crate::transport::{Transport, TransportError};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use task_local_extensions::Extensions;
use tracing::warn;
use uuid::Uuid;

/// A high-level interface to publish messages.
///
/// It supports middlewares which can be used for a variety of purposes (e.g. injecting headers,
/// registering metrics, etc.).
///
/// `Publisher` is cheap to clone: clones share the same transport and middleware chain.
///
/// # How do I build a `Publisher`?
///
/// `Publisher` provides a fluent API to add configuration step-by-step, known as
/// "builder pattern" in Rust.
/// The starting point is [`Publisher::builder`].
/// A [`ConsumerGroup`] builds one for you, see [`ConsumerGroup::publisher`].
///
/// [`ConsumerGroup`]: crate::consumers::ConsumerGroup
/// [`ConsumerGroup::publisher`]: crate::consumers::ConsumerGroup::publisher
pub struct Publisher<P: Protocol> {
    transport: Arc<dyn Transport<P>>,
    /// Timeout on publishing.
    timeout: std::time::Duration,
    /// The middleware chain that will be executed before publishing the message.
    middleware_chain: Vec<Arc<dyn PublisherMiddleware<P>>>,
}

impl<P: Protocol> Clone for Publisher<P> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            timeout: self.timeout,
            middleware_chain: self.middleware_chain.clone(),
        }
    }
}

impl<P: Protocol> Publisher<P> {
    /// Start building a [`Publisher`] on top of a transport.
    pub fn builder(transport: Arc<dyn Transport<P>>) -> PublisherBuilder<P> {
        PublisherBuilder::new(transport)
    }

    /// Publish a message.
    ///
    /// A `message_id` is assigned if missing, and the `correlation_id` defaults to it.
    #[tracing::instrument(skip_all, level = "debug", fields(protocol = P::NAME, route = ?envelope.route))]
    pub async fn publish(&self, envelope: MessageEnvelope<P>) -> Result<(), PublisherError> {
        let mut extensions = Extensions::new();
        let envelope = inject_properties(envelope);

        let next = Next {
            transport: self.transport.as_ref(),
            timeout: self.timeout,
            next_middleware: self.middleware_chain.as_slice(),
        };

        next.run(envelope, &mut extensions).await
    }
}

/// Error returned when trying to publish a message using `Publisher`.
#[derive(thiserror::Error, Debug)]
pub enum PublisherError {
    #[error("Generic error encountered when interacting with the broker")]
    GenericError(#[source] anyhow::Error),
    #[error("A middleware failed to process the message before publishing")]
    MiddlewareError(#[source] anyhow::Error),
    #[error("The timeout threshold was reached while trying to publish the message")]
    TimeoutError,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A builder for [`Publisher`].
///
/// Use [`Publisher::builder`] as entrypoint.
pub struct PublisherBuilder<P: Protocol> {
    transport: Arc<dyn Transport<P>>,
    timeout: std::time::Duration,
    middleware_chain: Vec<Arc<dyn PublisherMiddleware<P>>>,
}

impl<P: Protocol> PublisherBuilder<P> {
    fn new(transport: Arc<dyn Transport<P>>) -> Self {
        Self {
            transport,
            timeout: std::time::Duration::from_secs(3),
            middleware_chain: vec![],
        }
    }

    /// Timeout applied when attempting to publish a message.
    /// Defaults to 3 seconds if left unspecified.
    #[must_use]
    pub fn publish_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// You can add middleware to inject logic before and after publishing a message.
    /// Middlewares are executed in the order they are registered: the first registered
    /// middleware executes first on the way in and last on the way out.
    ///
    /// Check out [`PublisherMiddleware`]'s documentation for more details.
    #[must_use]
    pub fn with_middleware<M: PublisherMiddleware<P> + 'static>(self, middleware: M) -> Self {
        self.with_dyn_middleware(Arc::new(middleware))
    }

    /// Append dynamic middleware logic, see [`PublisherBuilder::with_middleware`].
    #[must_use]
    pub fn with_dyn_middleware(mut self, middleware: Arc<dyn PublisherMiddleware<P>>) -> Self {
        self.middleware_chain.push(middleware);
        self
    }

    /// Append multiple dynamic middlewares, see [`PublisherBuilder::with_middleware`].
    #[must_use]
    pub fn with_middlewares<I>(mut self, middlewares: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn PublisherMiddleware<P>>>,
    {
        self.middleware_chain.extend(middlewares);
        self
    }

    /// Finalise the builder and get an instance of [`Publisher`].
    pub fn build(self) -> Publisher<P> {
        Publisher {
            transport: self.transport,
            timeout: self.timeout,
            middleware_chain: self.middleware_chain,
        }
    }
}

/// Fill in the identifiers and the timestamp left unset by the caller.
pub(crate) fn inject_properties<P: Protocol>(mut envelope: MessageEnvelope<P>) -> MessageEnvelope<P> {
    if envelope.timestamp.is_none() {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(now) => envelope.timestamp = Some(now.as_secs()),
            Err(_) => warn!("System time is before 1970"),
        }
    }

    let message_id = envelope
        .message_id
        .take()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if envelope
        .correlation_id
        .as_deref()
        .map_or(true, str::is_empty)
    {
        envelope.correlation_id = Some(message_id.clone());
    }
    envelope.message_id = Some(message_id);
    envelope
}
