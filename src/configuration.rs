//! Settings shared by every consumer group, independently of the broker.
use crate::consumers::RetryPolicy;
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
/// Tuning knobs for dispatching, replying and publishing.
///
/// Numeric values can be provided as strings, which is convenient when they come from
/// environment variables.
pub struct DispatchSettings {
    /// How long a dispatcher waits before subscribing again after losing its subscription,
    /// in milliseconds.
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub reconnect_delay_ms: u64,
    /// How long a request waits for its reply if the caller does not say otherwise,
    /// in milliseconds.
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub rpc_timeout_ms: u64,
    /// Timeout applied when publishing a message, in milliseconds.
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub publish_timeout_ms: u64,
    /// Stop evaluating the calls of a subscriber as soon as one of them processed the message.
    pub short_circuit: bool,
    /// Concurrency of each subscriber. Falls back to the protocol default if unset.
    pub max_workers: Option<usize>,
    /// The retry policy of subscribers whose handlers do not set one.
    pub default_retry: RetryPolicy,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 5_000,
            rpc_timeout_ms: 30_000,
            publish_timeout_ms: 3_000,
            short_circuit: false,
            max_workers: None,
            default_retry: RetryPolicy::Never,
        }
    }
}

impl DispatchSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::DispatchSettings;
    use crate::consumers::RetryPolicy;
    use std::time::Duration;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let settings: DispatchSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, DispatchSettings::default());
        assert_eq!(settings.reconnect_delay(), Duration::from_secs(5));
    }

    #[test]
    fn numbers_can_be_strings() {
        let settings: DispatchSettings = serde_json::from_str(
            r#"{"reconnect_delay_ms": "250", "rpc_timeout_ms": 1000, "default_retry": 3}"#,
        )
        .unwrap();
        assert_eq!(settings.reconnect_delay(), Duration::from_millis(250));
        assert_eq!(settings.rpc_timeout(), Duration::from_secs(1));
        assert_eq!(settings.default_retry, RetryPolicy::Times(3));
    }
}
