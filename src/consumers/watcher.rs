//! Bookkeeping of delivery attempts, used to decide between redelivery and rejection
//! after a failure.
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Tracks how many times each message has been attempted.
///
/// Shared by every message flowing through a subscriber: implementations must be safe to call
/// concurrently for different message ids.
pub trait Watcher: Send + Sync + 'static {
    /// A processing attempt for `message_id` is starting.
    fn add(&self, message_id: &str);
    /// Has `message_id` exhausted its attempts?
    fn is_max(&self, message_id: &str) -> bool;
    /// Forget everything about `message_id`.
    fn remove(&self, message_id: &str);
    /// Attempts currently recorded for `message_id`.
    fn attempts(&self, _message_id: &str) -> u32 {
        0
    }
}

/// A single attempt: every failure rejects the message.
#[derive(Debug, Clone, Copy, Default)]
pub struct OneTryWatcher;

impl Watcher for OneTryWatcher {
    fn add(&self, _message_id: &str) {}

    fn is_max(&self, _message_id: &str) -> bool {
        true
    }

    fn remove(&self, _message_id: &str) {}
}

/// Unlimited attempts: every failure asks for redelivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndlessWatcher;

impl Watcher for EndlessWatcher {
    fn add(&self, _message_id: &str) {}

    fn is_max(&self, _message_id: &str) -> bool {
        false
    }

    fn remove(&self, _message_id: &str) {}
}

/// Redelivers a failing message until it has been attempted more than `max_tries` times.
#[derive(Debug)]
pub struct PushBackWatcher {
    max_tries: u32,
    attempts: Mutex<HashMap<String, u32>>,
}

impl PushBackWatcher {
    pub fn new(max_tries: u32) -> Self {
        Self {
            max_tries,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    /// Number of messages with attempts on record.
    pub fn tracked(&self) -> usize {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Watcher for PushBackWatcher {
    fn add(&self, message_id: &str) {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        *attempts.entry(message_id.to_owned()).or_default() += 1;
    }

    fn is_max(&self, message_id: &str) -> bool {
        let attempts = self.attempts(message_id);
        let exhausted = attempts > self.max_tries;
        if exhausted {
            tracing::error!(
                message_id,
                attempts,
                max_tries = self.max_tries,
                "Message exhausted its delivery attempts and will be rejected"
            );
        } else {
            tracing::warn!(
                message_id,
                attempts,
                max_tries = self.max_tries,
                "Message processing failed, it will be redelivered"
            );
        }
        exhausted
    }

    fn remove(&self, message_id: &str) {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(message_id);
    }

    fn attempts(&self, message_id: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(message_id)
            .copied()
            .unwrap_or(0)
    }
}

/// How a subscriber reacts to transient failures.
///
/// It deserializes from the same shapes users write in configuration files:
/// `false` (never retry), `true` (retry forever) or a number of retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Reject on the first failure.
    #[default]
    Never,
    /// Redeliver on every failure.
    Always,
    /// Redeliver until the message has been attempted more than `n` times.
    Times(u32),
}

impl RetryPolicy {
    /// Build the [`Watcher`] implementing this policy.
    pub fn watcher(&self) -> Arc<dyn Watcher> {
        match self {
            Self::Never => Arc::new(OneTryWatcher),
            Self::Always => Arc::new(EndlessWatcher),
            Self::Times(max_tries) => Arc::new(PushBackWatcher::new(*max_tries)),
        }
    }
}

impl From<bool> for RetryPolicy {
    fn from(retry: bool) -> Self {
        if retry {
            Self::Always
        } else {
            Self::Never
        }
    }
}

impl From<u32> for RetryPolicy {
    fn from(max_tries: u32) -> Self {
        Self::Times(max_tries)
    }
}

impl<'de> Deserialize<'de> for RetryPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Flag(bool),
            Times(u32),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Flag(flag) => flag.into(),
            Repr::Times(max_tries) => max_tries.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{PushBackWatcher, RetryPolicy, Watcher};

    #[test]
    fn push_back_bounds_attempts() {
        let watcher = PushBackWatcher::new(3);
        for _ in 0..3 {
            watcher.add("1");
            assert!(!watcher.is_max("1"));
        }
        watcher.add("1");
        assert!(watcher.is_max("1"));

        watcher.remove("1");
        assert_eq!(watcher.attempts("1"), 0);
        assert_eq!(watcher.tracked(), 0);
    }

    #[test]
    fn attempts_are_tracked_per_message() {
        let watcher = PushBackWatcher::new(1);
        watcher.add("a");
        watcher.add("a");
        watcher.add("b");
        assert!(watcher.is_max("a"));
        assert!(!watcher.is_max("b"));
    }

    #[test]
    fn policies_map_to_watchers() {
        assert!(RetryPolicy::Never.watcher().is_max("x"));
        assert!(!RetryPolicy::Always.watcher().is_max("x"));
        let bounded = RetryPolicy::Times(1).watcher();
        bounded.add("x");
        assert!(!bounded.is_max("x"));
    }

    #[test]
    fn policies_deserialize_from_configuration_shapes() {
        let parse = |raw: &str| serde_json::from_str::<RetryPolicy>(raw).unwrap();
        assert_eq!(parse("false"), RetryPolicy::Never);
        assert_eq!(parse("true"), RetryPolicy::Always);
        assert_eq!(parse("5"), RetryPolicy::Times(5));
    }
}
