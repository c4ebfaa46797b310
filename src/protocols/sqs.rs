//! Amazon SQS.
//!
//! Metadata travels as string message attributes. Deleting a message acks it; a nack makes it
//! visible again, a reject leaves it to the queue's redrive policy.
use crate::envelope::{Acker, Envelope, Headers};
use crate::protocol::{BindingInfo, Protocol};
use crate::protocols::{envelope_from_headers, outgoing_headers};
use crate::publishers::MessageEnvelope;
use crate::routing::exact;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
pub struct Sqs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqsBinding {
    pub queue: String,
}

impl From<&str> for SqsBinding {
    fn from(queue: &str) -> Self {
        Self {
            queue: queue.to_owned(),
        }
    }
}

impl From<String> for SqsBinding {
    fn from(queue: String) -> Self {
        Self { queue }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqsRoute {
    pub queue: String,
    /// Required by FIFO queues.
    pub message_group_id: Option<String>,
}

impl SqsRoute {
    #[must_use]
    pub fn with_message_group_id(mut self, group: impl Into<String>) -> Self {
        self.message_group_id = Some(group.into());
        self
    }
}

impl From<&str> for SqsRoute {
    fn from(queue: &str) -> Self {
        Self {
            queue: queue.to_owned(),
            message_group_id: None,
        }
    }
}

impl From<String> for SqsRoute {
    fn from(queue: String) -> Self {
        Self {
            queue,
            message_group_id: None,
        }
    }
}

#[derive(Debug)]
pub struct SqsMessage {
    /// The id SQS assigned to the message. It is stable across redeliveries.
    pub message_id: String,
    pub receipt_handle: String,
    pub queue: String,
    pub body: Vec<u8>,
    pub attributes: Headers,
    pub acker: Acker,
}

impl Protocol for Sqs {
    const NAME: &'static str = "sqs";
    const DEFAULT_MAX_WORKERS: Option<usize> = Some(1);

    type Binding = SqsBinding;
    type Route = SqsRoute;
    type Raw = SqsMessage;

    fn parse(raw: SqsMessage) -> Envelope {
        let mut envelope = envelope_from_headers(raw.body, raw.attributes, raw.acker, None, None);
        if !raw.message_id.is_empty() {
            envelope = envelope.with_message_id(raw.message_id);
        }
        envelope
    }

    fn matches(binding: &SqsBinding, route: &SqsRoute, _headers: &Headers) -> bool {
        exact(&binding.queue, &route.queue)
    }

    fn build_message(message: MessageEnvelope<Self>, acker: Acker) -> SqsMessage {
        let attributes = outgoing_headers(&message);
        let message_id = match message.message_id {
            Some(id) if !id.is_empty() => id,
            _ => Uuid::new_v4().to_string(),
        };
        SqsMessage {
            message_id,
            receipt_handle: Uuid::new_v4().to_string(),
            queue: message.route.queue,
            body: message.payload.body,
            attributes,
            acker,
        }
    }

    fn route_to(destination: &str) -> SqsRoute {
        destination.into()
    }

    fn reply_binding(inbox: &str) -> SqsBinding {
        inbox.into()
    }

    fn subscription_name(binding: &SqsBinding) -> String {
        binding.queue.clone()
    }

    fn describe(binding: &SqsBinding) -> BindingInfo {
        BindingInfo {
            protocol: Self::NAME,
            destination: binding.queue.clone(),
            kind: None,
            attributes: vec![],
        }
    }
}
