//! Kafka.
//!
//! Records are processed one at a time per subscription by default, so that offsets are
//! committed in order.
use crate::envelope::{Acker, Envelope, Headers};
use crate::protocol::{BindingInfo, Protocol};
use crate::protocols::{envelope_from_headers, outgoing_headers};
use crate::publishers::MessageEnvelope;
use crate::routing::exact;

#[derive(Debug, Clone, Copy, Default)]
pub struct Kafka;

/// One or more topics, consumed as part of an optional consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaBinding {
    pub topics: Vec<String>,
    pub group_id: Option<String>,
}

impl KafkaBinding {
    pub fn topic(topic: impl Into<String>) -> Self {
        Self::topics([topic])
    }

    pub fn topics<I, T>(topics: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            topics: topics.into_iter().map(Into::into).collect(),
            group_id: None,
        }
    }

    #[must_use]
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }
}

impl From<&str> for KafkaBinding {
    fn from(topic: &str) -> Self {
        Self::topic(topic)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaRoute {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub partition: Option<i32>,
}

impl KafkaRoute {
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }
}

impl From<&str> for KafkaRoute {
    fn from(topic: &str) -> Self {
        Self {
            topic: topic.to_owned(),
            key: None,
            partition: None,
        }
    }
}

impl From<String> for KafkaRoute {
    fn from(topic: String) -> Self {
        Self {
            topic,
            key: None,
            partition: None,
        }
    }
}

/// A record fetched from a partition.
#[derive(Debug)]
pub struct KafkaRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: Option<i64>,
    pub headers: Vec<(String, Vec<u8>)>,
    pub payload: Vec<u8>,
    pub acker: Acker,
}

impl Protocol for Kafka {
    const NAME: &'static str = "kafka";
    const DEFAULT_MAX_WORKERS: Option<usize> = Some(1);

    type Binding = KafkaBinding;
    type Route = KafkaRoute;
    type Raw = KafkaRecord;

    fn parse(raw: KafkaRecord) -> Envelope {
        let headers: Headers = raw
            .headers
            .into_iter()
            .map(|(name, value)| (name, String::from_utf8_lossy(&value).into_owned()))
            .collect();
        let position = format!("{}-{}-{}", raw.topic, raw.partition, raw.offset);
        envelope_from_headers(raw.payload, headers, raw.acker, Some(position), None)
    }

    fn matches(binding: &KafkaBinding, route: &KafkaRoute, _headers: &Headers) -> bool {
        binding.topics.iter().any(|topic| exact(topic, &route.topic))
    }

    fn build_message(message: MessageEnvelope<Self>, acker: Acker) -> KafkaRecord {
        let headers = outgoing_headers(&message)
            .into_iter()
            .map(|(name, value)| (name, value.into_bytes()))
            .collect();
        KafkaRecord {
            topic: message.route.topic,
            partition: message.route.partition.unwrap_or_default(),
            offset: 0,
            key: message.route.key,
            timestamp_ms: message
                .timestamp
                .and_then(|secs| i64::try_from(secs).ok())
                .map(|secs| secs * 1000),
            headers,
            payload: message.payload.body,
            acker,
        }
    }

    fn route_to(destination: &str) -> KafkaRoute {
        destination.into()
    }

    fn reply_binding(inbox: &str) -> KafkaBinding {
        KafkaBinding::topic(inbox)
    }

    fn subscription_name(binding: &KafkaBinding) -> String {
        binding.topics.join(",")
    }

    fn describe(binding: &KafkaBinding) -> BindingInfo {
        BindingInfo {
            protocol: Self::NAME,
            destination: Self::subscription_name(binding),
            kind: binding.group_id.clone(),
            attributes: vec![],
        }
    }
}
