//! Redis pub/sub.
//!
//! Redis messages carry no metadata, so published messages are framed as JSON:
//! `{"data": "<body>", "headers": {...}}`. A message that is not such a frame is treated as a
//! bare body. Pub/sub has no acknowledgement: messages use [`Acker::noop`].
use crate::envelope::{Acker, Envelope, Headers};
use crate::protocol::{BindingInfo, Protocol};
use crate::protocols::{envelope_from_headers, outgoing_headers};
use crate::publishers::MessageEnvelope;
use crate::routing::{exact, glob_matches};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default)]
pub struct Redis;

/// A channel subscription, or a pattern subscription (`PSUBSCRIBE`) with glob semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisBinding {
    pub channel: String,
    pub pattern: bool,
}

impl RedisBinding {
    pub fn channel(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            pattern: false,
        }
    }

    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self {
            channel: pattern.into(),
            pattern: true,
        }
    }
}

impl From<&str> for RedisBinding {
    fn from(channel: &str) -> Self {
        Self::channel(channel)
    }
}

impl From<String> for RedisBinding {
    fn from(channel: String) -> Self {
        Self::channel(channel)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisRoute {
    pub channel: String,
}

impl From<&str> for RedisRoute {
    fn from(channel: &str) -> Self {
        Self {
            channel: channel.to_owned(),
        }
    }
}

impl From<String> for RedisRoute {
    fn from(channel: String) -> Self {
        Self { channel }
    }
}

/// A message received on a channel.
#[derive(Debug)]
pub struct RedisMessage {
    pub channel: String,
    /// The pattern that matched, for pattern subscriptions.
    pub pattern: Option<String>,
    pub data: Vec<u8>,
    pub acker: Acker,
}

#[derive(Serialize, Deserialize)]
struct Frame {
    data: String,
    #[serde(default)]
    headers: Headers,
}

impl Redis {
    /// Frame an outgoing message, ready to be handed to `PUBLISH`.
    ///
    /// Bodies that are not valid UTF-8 are converted lossily.
    pub fn encode(message: &MessageEnvelope<Redis>) -> Result<Vec<u8>, serde_json::Error> {
        let frame = Frame {
            data: String::from_utf8_lossy(&message.payload.body).into_owned(),
            headers: outgoing_headers(message),
        };
        serde_json::to_vec(&frame)
    }
}

impl Protocol for Redis {
    const NAME: &'static str = "redis";
    const DEFAULT_MAX_WORKERS: Option<usize> = None;

    type Binding = RedisBinding;
    type Route = RedisRoute;
    type Raw = RedisMessage;

    fn parse(raw: RedisMessage) -> Envelope {
        match serde_json::from_slice::<Frame>(&raw.data) {
            Ok(frame) => envelope_from_headers(
                frame.data.into_bytes(),
                frame.headers,
                raw.acker,
                None,
                None,
            ),
            Err(_) => Envelope::new(raw.data, raw.acker),
        }
    }

    fn matches(binding: &RedisBinding, route: &RedisRoute, _headers: &Headers) -> bool {
        if binding.pattern {
            glob_matches(&binding.channel, &route.channel)
        } else {
            exact(&binding.channel, &route.channel)
        }
    }

    fn build_message(message: MessageEnvelope<Self>, acker: Acker) -> RedisMessage {
        let data = match Redis::encode(&message) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error.message = %e, "Failed to frame a Redis message, sending the bare body");
                message.payload.body.clone()
            }
        };
        RedisMessage {
            channel: message.route.channel,
            pattern: None,
            data,
            acker,
        }
    }

    fn route_to(destination: &str) -> RedisRoute {
        destination.into()
    }

    fn reply_binding(inbox: &str) -> RedisBinding {
        RedisBinding::channel(inbox)
    }

    fn subscription_name(binding: &RedisBinding) -> String {
        binding.channel.clone()
    }

    fn describe(binding: &RedisBinding) -> BindingInfo {
        BindingInfo {
            protocol: Self::NAME,
            destination: binding.channel.clone(),
            kind: Some(if binding.pattern { "pattern" } else { "channel" }.to_owned()),
            attributes: vec![],
        }
    }
}
