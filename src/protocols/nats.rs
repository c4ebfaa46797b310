//! NATS core.
//!
//! Subjects are matched exactly: wildcard subscriptions are resolved by the NATS client itself.
use crate::envelope::{Acker, Envelope, Headers};
use crate::protocol::{first_non_empty, BindingInfo, Protocol};
use crate::protocols::{envelope_from_headers, outgoing_headers};
use crate::publishers::MessageEnvelope;
use crate::routing::exact;

/// The de-duplication header of NATS JetStream, used as message id when present.
pub const NATS_MSG_ID: &str = "Nats-Msg-Id";

#[derive(Debug, Clone, Copy, Default)]
pub struct Nats;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsBinding {
    pub subject: String,
    /// Subscribers sharing a queue group split the messages between them.
    pub queue_group: Option<String>,
}

impl NatsBinding {
    pub fn subject(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            queue_group: None,
        }
    }

    #[must_use]
    pub fn with_queue_group(mut self, queue_group: impl Into<String>) -> Self {
        self.queue_group = Some(queue_group.into());
        self
    }
}

impl From<&str> for NatsBinding {
    fn from(subject: &str) -> Self {
        Self::subject(subject)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsRoute {
    pub subject: String,
}

impl From<&str> for NatsRoute {
    fn from(subject: &str) -> Self {
        Self {
            subject: subject.to_owned(),
        }
    }
}

impl From<String> for NatsRoute {
    fn from(subject: String) -> Self {
        Self { subject }
    }
}

#[derive(Debug)]
pub struct NatsMessage {
    pub subject: String,
    /// The native reply subject.
    pub reply: Option<String>,
    pub headers: Headers,
    pub payload: Vec<u8>,
    pub acker: Acker,
}

impl Protocol for Nats {
    const NAME: &'static str = "nats";
    const DEFAULT_MAX_WORKERS: Option<usize> = None;

    type Binding = NatsBinding;
    type Route = NatsRoute;
    type Raw = NatsMessage;

    fn parse(raw: NatsMessage) -> Envelope {
        let native_id = first_non_empty([raw.headers.get(NATS_MSG_ID).cloned()]);
        envelope_from_headers(raw.payload, raw.headers, raw.acker, native_id, raw.reply)
    }

    fn matches(binding: &NatsBinding, route: &NatsRoute, _headers: &Headers) -> bool {
        exact(&binding.subject, &route.subject)
    }

    fn build_message(message: MessageEnvelope<Self>, acker: Acker) -> NatsMessage {
        let headers = outgoing_headers(&message);
        NatsMessage {
            subject: message.route.subject,
            reply: message.reply_to,
            headers,
            payload: message.payload.body,
            acker,
        }
    }

    fn route_to(destination: &str) -> NatsRoute {
        destination.into()
    }

    fn reply_binding(inbox: &str) -> NatsBinding {
        NatsBinding::subject(inbox)
    }

    fn subscription_name(binding: &NatsBinding) -> String {
        match &binding.queue_group {
            Some(group) => format!("{}:{}", binding.subject, group),
            None => binding.subject.clone(),
        }
    }

    fn describe(binding: &NatsBinding) -> BindingInfo {
        BindingInfo {
            protocol: Self::NAME,
            destination: binding.subject.clone(),
            kind: None,
            attributes: binding
                .queue_group
                .iter()
                .map(|group| ("queue_group".to_owned(), group.clone()))
                .collect(),
        }
    }
}
