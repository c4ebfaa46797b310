//! The broker-neutral representation of an inbound message.
//!
//! Every protocol parser turns its native message into an [`Envelope`]: the dispatch machinery,
//! filters, decoders and handlers only ever look at envelopes.
mod acker;
pub mod decoding;
mod payload;

pub use acker::{AckError, Acker, Acknowledge, BrokerAction};
pub use decoding::{decode_body, Decoded, DecodeError, Decoder, DefaultDecoder};
pub use payload::{IntoReply, Payload, Reply};

use std::collections::HashMap;
use uuid::Uuid;

/// Message headers, normalised to string keys and string values.
pub type Headers = HashMap<String, String>;

/// Header names used to carry envelope metadata on brokers without native properties for them.
pub mod header_names {
    pub const CONTENT_TYPE: &str = "content-type";
    pub const CORRELATION_ID: &str = "correlation_id";
    pub const REPLY_TO: &str = "reply_to";
    pub const MESSAGE_ID: &str = "message_id";
}

/// A message received from a broker, after parsing.
///
/// `decoded_body` is populated by the dispatch machinery right before filters run: it reflects
/// the decoder of the call currently being evaluated.
///
/// The `processed` flag is private: it flips to `true` once a registered call has accepted and
/// run the message, and nothing outside the dispatch machinery can reset it.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub body: Vec<u8>,
    pub decoded_body: Option<Decoded>,
    pub content_type: Option<String>,
    /// Destination for the reply. Empty if the sender does not expect one.
    pub reply_to: String,
    pub headers: Headers,
    pub message_id: String,
    pub correlation_id: String,
    processed: bool,
    acker: Acker,
}

impl Envelope {
    /// Build an envelope around a raw body.
    ///
    /// The message id is a fresh random identifier and the correlation id mirrors it,
    /// until overridden with [`Envelope::with_message_id`]/[`Envelope::with_correlation_id`].
    pub fn new(body: impl Into<Vec<u8>>, acker: Acker) -> Self {
        let message_id = Uuid::new_v4().to_string();
        Self {
            body: body.into(),
            decoded_body: None,
            content_type: None,
            reply_to: String::new(),
            headers: Headers::new(),
            correlation_id: message_id.clone(),
            message_id,
            processed: false,
            acker,
        }
    }

    /// Set the message id. The correlation id follows along unless it was set explicitly.
    #[must_use]
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        let message_id = message_id.into();
        if self.correlation_id == self.message_id {
            self.correlation_id = message_id.clone();
        }
        self.message_id = message_id;
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = reply_to.into();
        self
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Lookup a header by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// `true` once a registered call has accepted and run this message.
    pub fn processed(&self) -> bool {
        self.processed
    }

    pub(crate) fn mark_processed(&mut self) {
        self.processed = true;
    }

    /// The acknowledgement capability bound to this message.
    pub fn acker(&self) -> &Acker {
        &self.acker
    }

    /// Acknowledge the message. A no-op if the message was already settled.
    pub async fn ack(&self) -> Result<(), AckError> {
        self.acker.ack().await
    }

    /// Negatively acknowledge the message, asking for redelivery.
    /// A no-op if the message was already settled.
    pub async fn nack(&self) -> Result<(), AckError> {
        self.acker.nack().await
    }

    /// Reject the message, without redelivery. A no-op if the message was already settled.
    pub async fn reject(&self) -> Result<(), AckError> {
        self.acker.reject().await
    }
}
