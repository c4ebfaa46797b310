//! Broker-specific glue: bindings, routes, raw messages and how they map onto [`Envelope`]s.
//!
//! Only AMQP ships a live transport, see [`amqp::LapinTransport`]. For the other brokers, bring
//! your client of choice and implement [`Transport`](crate::transport::Transport) on top of it.
pub mod amqp;
pub mod kafka;
pub mod nats;
pub mod redis;
pub mod sqs;

use crate::envelope::{header_names, Acker, Envelope, Headers};
use crate::protocol::{first_non_empty, Protocol};
use crate::publishers::MessageEnvelope;

/// Build an envelope for a broker that carries our metadata as plain headers.
///
/// `native_id` is the broker's own identifier for the delivery, used when the sender did not
/// provide a `message_id` header.
pub(crate) fn envelope_from_headers(
    body: Vec<u8>,
    headers: Headers,
    acker: Acker,
    native_id: Option<String>,
    native_reply_to: Option<String>,
) -> Envelope {
    let mut envelope = Envelope::new(body, acker)
        .with_content_type(first_non_empty([headers.get(header_names::CONTENT_TYPE).cloned()]));
    if let Some(message_id) =
        first_non_empty([headers.get(header_names::MESSAGE_ID).cloned(), native_id])
    {
        envelope = envelope.with_message_id(message_id);
    }
    if let Some(correlation_id) =
        first_non_empty([headers.get(header_names::CORRELATION_ID).cloned()])
    {
        envelope = envelope.with_correlation_id(correlation_id);
    }
    if let Some(reply_to) =
        first_non_empty([headers.get(header_names::REPLY_TO).cloned(), native_reply_to])
    {
        envelope = envelope.with_reply_to(reply_to);
    }
    envelope.with_headers(headers)
}

/// The headers of an outgoing message, including the metadata of the envelope.
pub(crate) fn outgoing_headers<P: Protocol>(message: &MessageEnvelope<P>) -> Headers {
    let mut headers = message.payload.headers.clone();
    if let Some(content_type) = &message.payload.content_type {
        headers.insert(header_names::CONTENT_TYPE.into(), content_type.clone());
    }
    if let Some(reply_to) = &message.reply_to {
        headers.insert(header_names::REPLY_TO.into(), reply_to.clone());
    }
    if let Some(message_id) = &message.message_id {
        headers.insert(header_names::MESSAGE_ID.into(), message_id.clone());
    }
    if let Some(correlation_id) = &message.correlation_id {
        headers.insert(header_names::CORRELATION_ID.into(), correlation_id.clone());
    }
    headers
}
