//! Middleware types are heavily inspired by `tide`'s approach to middleware.
use crate::consumers::HandlerError;
use crate::envelope::{AckError, BrokerAction, Envelope, Headers};
use futures_util::future::BoxFuture;
use std::sync::Arc;

/// Middlewares to collect and emit telemetry data based on the outcome of message processing.
///
/// # Use case
///
/// `TelemetryMiddleware`s get **read-only** access to the inputs and outputs of message
/// processing.
///
/// `TelemetryMiddleware`s wrap **all** the message processing, including settlement with the
/// broker and reply delivery. They are therefore the best place to emit logs, collect
/// metrics, etc.. - telemetry!
///
/// Before processing starts, telemetry middlewares can:
///
/// - Extract information from the message metadata and [record it in the message extensions];
///
/// After processing completes, middlewares can:
///
/// - [Extract information recorded in the message extensions] to perform a task;
/// - Perform actions based on the outcome (e.g. log errors).
///
/// # What middleware should I use?
///
/// Does the processing outcome (success/failure) change based on the logic executed in the middleware?
///
/// If yes, use a [`ProcessingMiddleware`].
/// If no, use a `TelemetryMiddleware`.
///
/// [record it in the message extensions]: crate::consumers::set_message_local_item
/// [Extract information recorded in the message extensions]: crate::consumers::get_message_local_item
/// [`ProcessingMiddleware`]: crate::consumers::ProcessingMiddleware
#[async_trait::async_trait]
pub trait TelemetryMiddleware: 'static + Send + Sync {
    async fn handle<'a>(
        &'a self,
        metadata: &'a MessageMetadata,
        next: MessageProcessing<'a>,
    ) -> ProcessingOutcome;
}

/// The metadata of the message being processed, as seen by [`TelemetryMiddleware`]s.
#[derive(Debug, Clone)]
pub struct MessageMetadata {
    pub subscription: Arc<str>,
    pub message_id: String,
    pub correlation_id: String,
    pub reply_to: String,
    pub content_type: Option<String>,
    pub headers: Headers,
}

impl MessageMetadata {
    pub(crate) fn new(subscription: Arc<str>, envelope: &Envelope) -> Self {
        Self {
            subscription,
            message_id: envelope.message_id.clone(),
            correlation_id: envelope.correlation_id.clone(),
            reply_to: envelope.reply_to.clone(),
            content_type: envelope.content_type.clone(),
            headers: envelope.headers.clone(),
        }
    }
}

/// The remainder of the telemetry middleware chain, followed by the actual processing.
#[allow(missing_debug_implementations)]
pub struct MessageProcessing<'a> {
    pub(crate) next_telemetry_middleware: &'a [Arc<dyn TelemetryMiddleware>],
    pub(crate) processing: BoxFuture<'a, ProcessingOutcome>,
}

impl<'a> MessageProcessing<'a> {
    /// Asynchronously execute the remaining middleware chain and the processing of the message.
    pub async fn run(mut self, metadata: &MessageMetadata) -> ProcessingOutcome {
        if let Some((current, next)) = self.next_telemetry_middleware.split_first() {
            self.next_telemetry_middleware = next;
            current.handle(metadata, self).await
        } else {
            self.processing.await
        }
    }
}

/// The outcome of message processing:
/// - filters, decoders, processing middlewares and handlers;
/// - settlement with the broker.
///
/// [`ProcessingOutcome`] is what [`TelemetryMiddleware`]s work with on the way out in
/// the middleware execution pipeline.
///
/// # Why a struct?
///
/// [`TelemetryMiddleware`] should pass the message processing outcome unaltered along
/// the telemetry middleware chain.
/// [`ProcessingOutcome`] does not expose any public constructor: the telemetry middleware is
/// forced to propagate the outcome returned by [`MessageProcessing`].
#[derive(Debug)]
pub struct ProcessingOutcome {
    outcome: Result<(), ProcessingError>,
    broker_action: Option<BrokerAction>,
}

impl ProcessingOutcome {
    pub(crate) fn new(
        outcome: Result<(), ProcessingError>,
        broker_action: Option<BrokerAction>,
    ) -> Self {
        Self {
            outcome,
            broker_action,
        }
    }

    pub fn result(&self) -> &Result<(), ProcessingError> {
        &self.outcome
    }

    /// The instruction sent to the broker. `None` if the message was skipped.
    ///
    /// It is reported even if dispatching the instruction to the broker failed.
    pub fn broker_action(&self) -> Option<BrokerAction> {
        self.broker_action
    }

    /// Returns `true` if we asked the broker to redeliver the message.
    pub fn was_requeued(&self) -> bool {
        self.broker_action == Some(BrokerAction::Nack)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ProcessingError {
    #[error("An error was encountered while processing the message")]
    HandlerError(#[source] HandlerError),
    #[error(transparent)]
    AckError(#[from] AckError),
}
