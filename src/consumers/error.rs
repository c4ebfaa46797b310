use crate::consumers::watcher::RetryPolicy;
use crate::envelope::{AckError, DecodeError};
use std::fmt;

/// The error type returned by message handlers and processing middlewares.
///
/// It covers two different situations:
///
/// - [`HandlerError::Interrupt`]: the handler deliberately takes control of the message
///   lifecycle (acknowledge it now, skip it, stop the subscriber, ...). This is control flow,
///   not a failure;
/// - [`HandlerError::Failure`]: processing went wrong. `error_type` tells the framework how
///   to settle the message with the broker.
#[derive(thiserror::Error, Debug)]
pub enum HandlerError {
    #[error("Message processing was interrupted with a `{0}` signal")]
    Interrupt(Interrupt),
    #[error("Handling of a message failed due to a {error_type} issue")]
    Failure {
        #[source]
        inner_error: anyhow::Error,
        error_type: ErrorType,
    },
}

impl HandlerError {
    /// Processing might succeed if retried: the retry policy of the subscriber decides.
    pub fn transient(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure {
            inner_error: error.into(),
            error_type: ErrorType::Transient,
        }
    }

    /// The message could not be decoded or did not match the expected shape.
    pub fn validation(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure {
            inner_error: error.into(),
            error_type: ErrorType::Validation,
        }
    }

    /// Processing will never succeed: the message is rejected straight away.
    pub fn fatal(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure {
            inner_error: error.into(),
            error_type: ErrorType::Fatal,
        }
    }

    pub fn error_type(&self) -> Option<ErrorType> {
        match self {
            Self::Interrupt(_) => None,
            Self::Failure { error_type, .. } => Some(*error_type),
        }
    }

    pub fn interrupt(&self) -> Option<Interrupt> {
        match self {
            Self::Interrupt(signal) => Some(*signal),
            Self::Failure { .. } => None,
        }
    }
}

impl From<Interrupt> for HandlerError {
    fn from(signal: Interrupt) -> Self {
        Self::Interrupt(signal)
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(error: anyhow::Error) -> Self {
        Self::transient(error)
    }
}

impl From<DecodeError> for HandlerError {
    fn from(error: DecodeError) -> Self {
        Self::validation(error)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        Self::validation(error)
    }
}

impl From<AckError> for HandlerError {
    fn from(error: AckError) -> Self {
        Self::transient(error)
    }
}

/// Signals a handler can raise to take control of the message lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Acknowledge the message, skipping the rest of the processing chain.
    Ack,
    /// Ask the broker to redeliver the message.
    Nack,
    /// Drop the message (or dead-letter it).
    Reject,
    /// Leave the message unsettled; the retry bookkeeping for it is cleared.
    Skip,
    /// Close the subscriber this message was delivered to. The message itself is acknowledged.
    StopConsuming,
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ack => write!(f, "ack"),
            Self::Nack => write!(f, "nack"),
            Self::Reject => write!(f, "reject"),
            Self::Skip => write!(f, "skip"),
            Self::StopConsuming => write!(f, "stop consuming"),
        }
    }
}

/// Types of failure when handling a message.
/// Used by the framework to pick between redelivery and rejection.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorType {
    /// Message processing might succeed if retried after a short delay.
    ///
    /// E.g. the message handler encountered a time out when trying to call an API to fulfill
    /// the message processing requirements.
    ///
    /// The retry policy of the subscriber decides between a nack and a reject.
    Transient,
    /// The message body could not be decoded into what the handler expects.
    ///
    /// Treated like a transient failure: the retry policy decides.
    Validation,
    /// Message processing will never succeed, no matter how many times you retry or how long
    /// you wait.
    ///
    /// The message will be rejected.
    Fatal,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Validation => write!(f, "validation"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// More than one registered call accepted the same message.
///
/// The first call has already run by the time this is detected.
#[derive(thiserror::Error, Debug)]
#[error("More than one registered call accepted message `{message_id}` on `{subscription}`")]
pub struct AmbiguousRouting {
    pub subscription: String,
    pub message_id: String,
}

/// Failures when registering a [`MessageHandler`] on a [`ConsumerGroup`].
///
/// [`MessageHandler`]: crate::consumers::MessageHandler
/// [`ConsumerGroup`]: crate::consumers::ConsumerGroup
#[derive(thiserror::Error, Debug)]
pub enum RegistrationError {
    #[error(
        "`{subscription}` already consumes with retry policy {existing:?}, \
        a new call cannot ask for {requested:?}"
    )]
    ConflictingRetryPolicy {
        subscription: String,
        existing: RetryPolicy,
        requested: RetryPolicy,
    },
}
