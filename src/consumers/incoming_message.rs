use crate::consumers::HandlerError;
use crate::envelope::{Decoded, Envelope};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// What a [`Handler`] and the processing middlewares get to work with.
///
/// [`Handler`]: crate::consumers::Handler
pub struct Incoming<Context> {
    /// `context` is a set of resources that are required to process the message and outlive
    /// the lifecycle of the handler itself - e.g. an HTTP client for a third-party API, a db
    /// connection pool, etc.
    pub context: Arc<Context>,
    /// The message, with `decoded_body` populated by the decoder of the call being run.
    pub envelope: Arc<Envelope>,
    /// The name of the subscription the message was received on.
    pub subscription: Arc<str>,
}

impl<Context> Incoming<Context> {
    pub fn new(context: Arc<Context>, envelope: Envelope, subscription: Arc<str>) -> Self {
        Self {
            context,
            envelope: Arc::new(envelope),
            subscription,
        }
    }

    /// The decoded body. [`Decoded::Empty`] if no decoder ran.
    pub fn decoded(&self) -> &Decoded {
        self.envelope.decoded_body.as_ref().unwrap_or(&Decoded::Empty)
    }

    /// Extract a strongly-typed body.
    ///
    /// A mismatch is reported as a validation failure.
    pub fn body<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        Ok(self.decoded().deserialize()?)
    }
}

impl<Context> Clone for Incoming<Context> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            envelope: Arc::clone(&self.envelope),
            subscription: Arc::clone(&self.subscription),
        }
    }
}
