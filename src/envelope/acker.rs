use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// The broker-side operations needed to settle a message.
///
/// Implemented by each transport: `lapin`'s acker for RabbitMq, an in-memory requeue for
/// the test transport, etc.
#[async_trait::async_trait]
pub trait Acknowledge: Send + Sync + 'static {
    async fn ack(&self) -> Result<(), anyhow::Error>;
    /// Negative acknowledgement, the broker should redeliver the message.
    async fn nack(&self) -> Result<(), anyhow::Error>;
    /// The broker should drop the message (or dead-letter it, if configured).
    async fn reject(&self) -> Result<(), anyhow::Error>;

    /// Does a `nack` bring the message back? Transports without redelivery return `false`.
    fn redelivers(&self) -> bool {
        true
    }
}

/// The action we asked the broker to take when finalising the processing of
/// the current message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerAction {
    /// Positive acknowledgement - the message can be removed from the queue.
    Ack,
    /// Negative acknowledgement - the message was not processed successfully and should be
    /// redelivered.
    Nack,
    /// Rejection. The message was not processed successfully and should NOT be redelivered.
    /// The message will be sent to the dead letter exchange if configured.
    Reject,
}

impl BrokerAction {
    fn code(self) -> u8 {
        match self {
            Self::Ack => ACKED,
            Self::Nack => NACKED,
            Self::Reject => REJECTED,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            ACKED => Some(Self::Ack),
            NACKED => Some(Self::Nack),
            REJECTED => Some(Self::Reject),
            _ => None,
        }
    }
}

impl fmt::Display for BrokerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ack => write!(f, "ack"),
            Self::Nack => write!(f, "nack"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

const PENDING: u8 = 0;
const ACKED: u8 = 1;
const NACKED: u8 = 2;
const REJECTED: u8 = 3;

/// The broker refused (or failed to receive) a settlement instruction.
#[derive(thiserror::Error, Debug)]
#[error("Failed to {action} the message with the broker")]
pub struct AckError {
    pub action: BrokerAction,
    #[source]
    pub source: anyhow::Error,
}

/// The acknowledgement capability attached to an [`Envelope`].
///
/// Settlement is idempotent: the first successful `ack`/`nack`/`reject` wins and every later
/// call is a no-op returning `Ok(())`. If the backend fails, the message goes back to the
/// pending state so that the settlement can be attempted again.
///
/// Cloning an `Acker` shares the underlying state.
///
/// [`Envelope`]: crate::envelope::Envelope
#[derive(Clone)]
pub struct Acker {
    inner: Arc<AckerInner>,
}

struct AckerInner {
    state: AtomicU8,
    backend: Option<Box<dyn Acknowledge>>,
}

impl Acker {
    pub fn new<A: Acknowledge>(backend: A) -> Self {
        Self {
            inner: Arc::new(AckerInner {
                state: AtomicU8::new(PENDING),
                backend: Some(Box::new(backend)),
            }),
        }
    }

    /// An acker that records settlement without talking to any broker.
    pub fn noop() -> Self {
        Self {
            inner: Arc::new(AckerInner {
                state: AtomicU8::new(PENDING),
                backend: None,
            }),
        }
    }

    /// The action the message was settled with, if any.
    pub fn settlement(&self) -> Option<BrokerAction> {
        BrokerAction::from_code(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_settled(&self) -> bool {
        self.settlement().is_some()
    }

    /// Will the message be delivered again after a `nack`?
    ///
    /// Always `false` for [`Acker::noop`].
    pub fn redelivers(&self) -> bool {
        self.inner
            .backend
            .as_ref()
            .is_some_and(|backend| backend.redelivers())
    }

    pub async fn ack(&self) -> Result<(), AckError> {
        self.settle(BrokerAction::Ack).await
    }

    pub async fn nack(&self) -> Result<(), AckError> {
        self.settle(BrokerAction::Nack).await
    }

    pub async fn reject(&self) -> Result<(), AckError> {
        self.settle(BrokerAction::Reject).await
    }

    pub async fn settle(&self, action: BrokerAction) -> Result<(), AckError> {
        if self
            .inner
            .state
            .compare_exchange(PENDING, action.code(), Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        let Some(backend) = &self.inner.backend else {
            return Ok(());
        };
        let outcome = match action {
            BrokerAction::Ack => backend.ack().await,
            BrokerAction::Nack => backend.nack().await,
            BrokerAction::Reject => backend.reject().await,
        };
        outcome.map_err(|source| {
            self.inner.state.store(PENDING, Ordering::Release);
            AckError { action, source }
        })
    }
}

impl Default for Acker {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for Acker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acker")
            .field("settlement", &self.settlement())
            .finish()
    }
}
