use crate::consumers::error::{ErrorType, HandlerError, Interrupt};

/// How a message ended its journey through a subscriber, before settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ack,
    Nack,
    Reject,
    Skip,
    StopConsuming,
    /// Processing failed with a non-fatal error: the retry policy picks the settlement.
    Failure(ErrorType),
}

impl Outcome {
    /// Classify the result of [`Subscriber::consume`].
    ///
    /// Fatal failures map straight to [`Outcome::Reject`].
    ///
    /// [`Subscriber::consume`]: crate::consumers::Subscriber::consume
    pub fn from_result<T>(result: &Result<T, HandlerError>) -> Self {
        match result {
            Ok(_) => Self::Ack,
            Err(HandlerError::Interrupt(signal)) => match signal {
                Interrupt::Ack => Self::Ack,
                Interrupt::Nack => Self::Nack,
                Interrupt::Reject => Self::Reject,
                Interrupt::Skip => Self::Skip,
                Interrupt::StopConsuming => Self::StopConsuming,
            },
            Err(HandlerError::Failure { error_type, .. }) => match error_type {
                ErrorType::Fatal => Self::Reject,
                error_type => Self::Failure(*error_type),
            },
        }
    }
}
