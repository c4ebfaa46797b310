//! AMQP 0-9-1 (RabbitMQ).
//!
//! [`Amqp`] routes messages the way a RabbitMQ broker does: through the default exchange by
//! queue name, or through a direct, topic, fanout or headers exchange.
//! [`LapinTransport`] is the live transport, built on top of [`lapin`].
pub mod configuration;
pub mod convenience;
mod factory;
mod pool;
mod topology;
mod transport;

pub use factory::ConnectionFactory;
pub use lapin::{options, types, BasicProperties};
pub use pool::{ChannelManager, ChannelPool, ConnectionPool, Error as PoolError};
pub use transport::LapinTransport;

use crate::envelope::{header_names, Acker, Envelope, Headers};
use crate::protocol::{first_non_empty, BindingInfo, Protocol};
use crate::publishers::MessageEnvelope;
use crate::routing::{exact, headers_match, topic_matches};
use amq_protocol_types::{DeliveryTag, ShortString};
use convenience::{field_table_to_headers, headers_to_field_table};

/// Delivery mode of messages surviving a broker restart.
const PERSISTENT: u8 = 2;

#[derive(Debug, Clone, Copy, Default)]
pub struct Amqp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeType {
    Direct,
    Topic,
    Fanout,
    Headers,
}

impl ExchangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeType::Direct => "direct",
            ExchangeType::Topic => "topic",
            ExchangeType::Fanout => "fanout",
            ExchangeType::Headers => "headers",
        }
    }
}

impl From<ExchangeType> for lapin::ExchangeKind {
    fn from(kind: ExchangeType) -> Self {
        match kind {
            ExchangeType::Direct => lapin::ExchangeKind::Direct,
            ExchangeType::Topic => lapin::ExchangeKind::Topic,
            ExchangeType::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeType::Headers => lapin::ExchangeKind::Headers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmqpExchange {
    pub name: String,
    pub kind: ExchangeType,
    pub durable: bool,
}

impl AmqpExchange {
    pub fn new(name: impl Into<String>, kind: ExchangeType) -> Self {
        Self {
            name: name.into(),
            kind,
            durable: true,
        }
    }

    pub fn direct(name: impl Into<String>) -> Self {
        Self::new(name, ExchangeType::Direct)
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self::new(name, ExchangeType::Topic)
    }

    pub fn fanout(name: impl Into<String>) -> Self {
        Self::new(name, ExchangeType::Fanout)
    }

    pub fn headers(name: impl Into<String>) -> Self {
        Self::new(name, ExchangeType::Headers)
    }

    #[must_use]
    pub fn transient(mut self) -> Self {
        self.durable = false;
        self
    }
}

/// A queue, optionally bound to an exchange.
///
/// Without an exchange the queue receives what is published on the default exchange with its
/// name as routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmqpBinding {
    pub queue: String,
    pub exchange: Option<AmqpExchange>,
    /// Binding key for direct and topic exchanges. Defaults to the queue name.
    pub routing_key: Option<String>,
    /// Binding arguments for headers exchanges, including `x-match`.
    pub bind_arguments: Headers,
    pub durable: bool,
    pub auto_delete: bool,
    /// Route rejected messages to a `<queue>.deadletter` queue.
    pub dead_letter: bool,
}

impl AmqpBinding {
    pub fn queue(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            exchange: None,
            routing_key: None,
            bind_arguments: Headers::new(),
            durable: true,
            auto_delete: false,
            dead_letter: false,
        }
    }

    #[must_use]
    pub fn with_exchange(mut self, exchange: AmqpExchange) -> Self {
        self.exchange = Some(exchange);
        self
    }

    #[must_use]
    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    #[must_use]
    pub fn with_bind_argument(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.bind_arguments.insert(name.into(), value.into());
        self
    }

    /// A queue that does not survive a broker restart and is deleted once its last consumer
    /// is gone.
    #[must_use]
    pub fn transient(mut self) -> Self {
        self.durable = false;
        self.auto_delete = true;
        self
    }

    #[must_use]
    pub fn with_dead_letter(mut self) -> Self {
        self.dead_letter = true;
        self
    }

    /// The key the queue is bound with.
    pub(crate) fn binding_key(&self) -> &str {
        self.routing_key.as_deref().unwrap_or(&self.queue)
    }
}

impl From<&str> for AmqpBinding {
    fn from(queue: &str) -> Self {
        Self::queue(queue)
    }
}

impl From<String> for AmqpBinding {
    fn from(queue: String) -> Self {
        Self::queue(queue)
    }
}

/// Where a message is published: an exchange and a routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmqpRoute {
    pub exchange: String,
    pub routing_key: String,
}

impl AmqpRoute {
    /// Publish straight to a queue, through the default exchange.
    pub fn queue(queue: impl Into<String>) -> Self {
        Self {
            exchange: String::new(),
            routing_key: queue.into(),
        }
    }

    pub fn exchange(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }
}

impl From<&str> for AmqpRoute {
    fn from(queue: &str) -> Self {
        Self::queue(queue)
    }
}

impl From<String> for AmqpRoute {
    fn from(queue: String) -> Self {
        Self::queue(queue)
    }
}

/// A delivery, as received from the broker.
#[derive(Debug)]
pub struct AmqpMessage {
    pub delivery_tag: DeliveryTag,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub properties: BasicProperties,
    pub data: Vec<u8>,
    pub acker: Acker,
}

/// The properties of an outgoing message.
pub(crate) fn outgoing_properties(message: &MessageEnvelope<Amqp>) -> BasicProperties {
    let mut properties = BasicProperties::default()
        .with_delivery_mode(PERSISTENT)
        .with_headers(headers_to_field_table(&message.payload.headers));
    if let Some(content_type) = &message.payload.content_type {
        properties = properties.with_content_type(content_type.as_str().into());
    }
    if let Some(message_id) = &message.message_id {
        properties = properties.with_message_id(message_id.as_str().into());
    }
    if let Some(correlation_id) = &message.correlation_id {
        properties = properties.with_correlation_id(correlation_id.as_str().into());
    }
    if let Some(reply_to) = &message.reply_to {
        properties = properties.with_reply_to(reply_to.as_str().into());
    }
    if let Some(timestamp) = message.timestamp {
        properties = properties.with_timestamp(timestamp);
    }
    properties
}

fn property(value: &Option<ShortString>) -> Option<String> {
    value.as_ref().map(|value| value.as_str().to_owned())
}

impl Protocol for Amqp {
    const NAME: &'static str = "amqp";
    // The channel prefetch count bounds the deliveries in flight.
    const DEFAULT_MAX_WORKERS: Option<usize> = None;

    type Binding = AmqpBinding;
    type Route = AmqpRoute;
    type Raw = AmqpMessage;

    fn parse(raw: AmqpMessage) -> Envelope {
        let properties = raw.properties;
        let headers = properties
            .headers()
            .as_ref()
            .map(field_table_to_headers)
            .unwrap_or_default();

        let mut envelope = Envelope::new(raw.data, raw.acker).with_content_type(first_non_empty([
            property(properties.content_type()),
            headers.get(header_names::CONTENT_TYPE).cloned(),
        ]));
        if let Some(message_id) = first_non_empty([
            property(properties.message_id()),
            headers.get(header_names::MESSAGE_ID).cloned(),
        ]) {
            envelope = envelope.with_message_id(message_id);
        }
        if let Some(correlation_id) = first_non_empty([
            property(properties.correlation_id()),
            headers.get(header_names::CORRELATION_ID).cloned(),
        ]) {
            envelope = envelope.with_correlation_id(correlation_id);
        }
        if let Some(reply_to) = first_non_empty([
            property(properties.reply_to()),
            headers.get(header_names::REPLY_TO).cloned(),
        ]) {
            envelope = envelope.with_reply_to(reply_to);
        }
        envelope.with_headers(headers)
    }

    fn matches(binding: &AmqpBinding, route: &AmqpRoute, headers: &Headers) -> bool {
        let exchange = match &binding.exchange {
            Some(exchange) if !exchange.name.is_empty() => exchange,
            // The default exchange delivers to the queue named by the routing key.
            _ => return route.exchange.is_empty() && exact(&binding.queue, &route.routing_key),
        };
        if exchange.name != route.exchange {
            return false;
        }
        match exchange.kind {
            ExchangeType::Direct => exact(binding.binding_key(), &route.routing_key),
            ExchangeType::Topic => topic_matches(binding.binding_key(), &route.routing_key),
            ExchangeType::Fanout => true,
            ExchangeType::Headers => headers_match(&binding.bind_arguments, headers),
        }
    }

    fn build_message(message: MessageEnvelope<Self>, acker: Acker) -> AmqpMessage {
        let properties = outgoing_properties(&message);
        AmqpMessage {
            delivery_tag: 0,
            exchange: message.route.exchange,
            routing_key: message.route.routing_key,
            redelivered: false,
            properties,
            data: message.payload.body,
            acker,
        }
    }

    fn route_to(destination: &str) -> AmqpRoute {
        AmqpRoute::queue(destination)
    }

    fn reply_binding(inbox: &str) -> AmqpBinding {
        AmqpBinding::queue(inbox).transient()
    }

    fn subscription_name(binding: &AmqpBinding) -> String {
        binding.queue.clone()
    }

    fn describe(binding: &AmqpBinding) -> BindingInfo {
        let mut attributes = vec![];
        if let Some(exchange) = &binding.exchange {
            attributes.push(("exchange".to_owned(), exchange.name.clone()));
            match exchange.kind {
                ExchangeType::Direct | ExchangeType::Topic => {
                    attributes.push(("routing_key".to_owned(), binding.binding_key().to_owned()))
                }
                ExchangeType::Headers => {
                    let mut arguments: Vec<_> = binding.bind_arguments.iter().collect();
                    arguments.sort();
                    attributes.extend(arguments.into_iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                ExchangeType::Fanout => {}
            }
        }
        BindingInfo {
            protocol: Self::NAME,
            destination: binding.queue.clone(),
            kind: binding
                .exchange
                .as_ref()
                .map(|exchange| exchange.kind.as_str().to_owned()),
            attributes,
        }
    }
}
