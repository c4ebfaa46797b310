use crate::envelope::Payload;
use crate::protocol::Protocol;

/// A message to be published via [`Publisher`].
///
/// Identifiers left unset are filled in by the publisher: a fresh random `message_id` and a
/// `correlation_id` equal to it.
///
/// [`Publisher`]: crate::publishers::Publisher
#[derive(Debug, Clone)]
pub struct MessageEnvelope<P: Protocol> {
    pub payload: Payload,
    /// Where the message is published.
    pub route: P::Route,
    /// Where the consumer should send its reply.
    pub reply_to: Option<String>,
    pub correlation_id: Option<String>,
    pub message_id: Option<String>,
    /// Seconds since the Unix epoch.
    pub timestamp: Option<u64>,
}

impl<P: Protocol> MessageEnvelope<P> {
    pub fn new(route: impl Into<P::Route>, payload: impl Into<Payload>) -> Self {
        Self {
            payload: payload.into(),
            route: route.into(),
            reply_to: None,
            correlation_id: None,
            message_id: None,
            timestamp: None,
        }
    }

    #[must_use]
    pub fn with_reply_to(mut self, value: impl Into<String>) -> Self {
        self.reply_to = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, value: impl Into<String>) -> Self {
        self.correlation_id = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_message_id(mut self, value: impl Into<String>) -> Self {
        self.message_id = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, value: u64) -> Self {
        self.timestamp = Some(value);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.headers.insert(name.into(), value.into());
        self
    }

    /// The message id, or an empty string if it was not assigned yet.
    pub fn message_id(&self) -> &str {
        self.message_id.as_deref().unwrap_or_default()
    }

    /// The correlation id, falling back to the message id.
    pub fn correlation_id(&self) -> &str {
        self.correlation_id
            .as_deref()
            .unwrap_or_else(|| self.message_id())
    }
}
