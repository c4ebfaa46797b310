#![allow(clippy::too_many_arguments)]
use crate::consumers::call::{CallInfo, PublishTarget, SubscriberCall};
use crate::consumers::error::AmbiguousRouting;
use crate::consumers::processing_middleware::Next;
use crate::consumers::watcher::{RetryPolicy, Watcher};
use crate::consumers::{HandlerError, Incoming, Interrupt, TelemetryMiddleware};
use crate::envelope::{Decoded, DecodeError, Decoder, DefaultDecoder, Envelope, Reply};
use crate::protocol::{BindingInfo, Parser, Protocol};
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

/// All the calls registered on a single binding, sharing one retry policy and one parser.
///
/// [`ConsumerGroup`] instantiates a `Subscriber` for each distinct binding: registering a second
/// [`MessageHandler`] with an equal binding appends a call to the existing subscriber.
///
/// # Dispatch
///
/// [`Subscriber::consume`] evaluates the calls in registration order. For each call, the body
/// is decoded with the call's decoder and its filter decides whether the call accepts the
/// message. The first accepting call runs and marks the message as processed, which is enough
/// to make every later call with the default filter pass on it. With `short_circuit` on, the
/// remaining calls are not even evaluated.
///
/// [`ConsumerGroup`]: crate::consumers::ConsumerGroup
/// [`MessageHandler`]: crate::consumers::MessageHandler
pub struct Subscriber<P: Protocol, C> {
    binding: P::Binding,
    name: Arc<str>,
    description: Option<String>,
    context: Arc<C>,
    parser: Arc<dyn Parser<P>>,
    retry: RetryPolicy,
    watcher: Arc<dyn Watcher>,
    calls: RwLock<Vec<Arc<SubscriberCall<P, C>>>>,
    telemetry_middleware_chain: Vec<Arc<dyn TelemetryMiddleware>>,
    short_circuit: bool,
    /// `Some(1)` processes messages sequentially, in delivery order. `None` is unbounded.
    max_workers: Option<usize>,
    closed: CancellationToken,
}

/// What the call that accepted a message produced.
#[derive(Debug)]
pub struct Consumed<P: Protocol> {
    pub reply: Reply,
    /// The chained publishers of the call the reply is forwarded to.
    pub publishers: Vec<PublishTarget<P>>,
}

/// Documentation for a subscriber and its calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberInfo {
    pub name: String,
    pub description: Option<String>,
    pub binding: BindingInfo,
    pub calls: Vec<CallInfo>,
}

impl<P: Protocol, C: Send + Sync + 'static> Subscriber<P, C> {
    pub(crate) fn new(
        binding: P::Binding,
        description: Option<String>,
        context: Arc<C>,
        parser: Arc<dyn Parser<P>>,
        retry: RetryPolicy,
        telemetry_middleware_chain: Vec<Arc<dyn TelemetryMiddleware>>,
        short_circuit: bool,
        max_workers: Option<usize>,
    ) -> Self {
        Self {
            name: P::subscription_name(&binding).into(),
            binding,
            description,
            context,
            parser,
            watcher: retry.watcher(),
            retry,
            calls: RwLock::new(Vec::new()),
            telemetry_middleware_chain,
            short_circuit,
            max_workers,
            closed: CancellationToken::new(),
        }
    }

    pub fn binding(&self) -> &P::Binding {
        &self.binding
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn max_workers(&self) -> Option<usize> {
        self.max_workers
    }

    pub fn watcher(&self) -> &dyn Watcher {
        self.watcher.as_ref()
    }

    /// Stop dispatching messages to this subscriber. It cannot be restarted.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn info(&self) -> SubscriberInfo {
        SubscriberInfo {
            name: self.name.to_string(),
            description: self.description.clone(),
            binding: P::describe(&self.binding),
            calls: self.calls().iter().map(|call| call.info.clone()).collect(),
        }
    }

    /// Turn a native message into an envelope, using the subscriber's parser.
    pub async fn parse(&self, raw: P::Raw) -> Envelope {
        self.parser.parse(raw).await
    }

    /// Dispatch a message to the registered calls.
    ///
    /// Returns:
    /// - `Ok(Some(_))` with the reply of the call that accepted the message;
    /// - `Ok(None)` if no call accepted it, or if the accepting call asked to stop consuming
    ///   (the subscriber is closed before returning);
    /// - `Err(_)` with the failure of the accepting call. A second call accepting the same
    ///   message is a fatal [`AmbiguousRouting`] failure. A body that a call's decoder rejects
    ///   fails the whole message, before that call's filter is consulted.
    ///
    /// Settlement is not performed here: see [`WatcherContext`].
    ///
    /// [`WatcherContext`]: crate::consumers::WatcherContext
    pub async fn consume(
        &self,
        envelope: &mut Envelope,
    ) -> Result<Option<Consumed<P>>, HandlerError> {
        let mut consumed = None;
        for call in self.calls() {
            envelope.decoded_body = Some(decode(call.decoder.as_deref(), envelope).await?);
            if !call.filter.accept(envelope).await {
                continue;
            }
            if consumed.is_some() {
                return Err(HandlerError::fatal(AmbiguousRouting {
                    subscription: self.name.to_string(),
                    message_id: envelope.message_id.clone(),
                }));
            }

            call.mock
                .record(envelope.decoded_body.as_ref().unwrap_or(&Decoded::Empty));
            tracing::debug!(call = %call.info.name, "Dispatching message");

            let incoming = Incoming::new(
                Arc::clone(&self.context),
                envelope.clone(),
                Arc::clone(&self.name),
            );
            let next = Next {
                handler: call.handler.as_ref(),
                next_middleware: &call.middlewares,
            };
            match next.run(incoming).await {
                Ok(reply) => {
                    envelope.mark_processed();
                    consumed = Some(Consumed {
                        reply,
                        publishers: call.publishers.clone(),
                    });
                }
                Err(HandlerError::Interrupt(Interrupt::StopConsuming)) => {
                    tracing::info!(
                        subscription = %self.name,
                        "A handler asked to stop consuming, closing the subscriber"
                    );
                    self.close();
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }

            if self.short_circuit {
                break;
            }
        }
        Ok(consumed)
    }

    pub(crate) fn telemetry_middleware_chain(&self) -> &[Arc<dyn TelemetryMiddleware>] {
        &self.telemetry_middleware_chain
    }

    pub(crate) fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    pub(crate) fn add_call(&self, call: Arc<SubscriberCall<P, C>>) {
        self.calls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    /// Start recording invocations on every call mock and chained publisher mock.
    pub(crate) fn enable_mocks(&self) {
        for call in self.calls() {
            call.mock.enable();
            for publisher in &call.publishers {
                publisher.mock.enable();
            }
        }
    }

    fn calls(&self) -> Vec<Arc<SubscriberCall<P, C>>> {
        self.calls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

async fn decode(decoder: Option<&dyn Decoder>, envelope: &Envelope) -> Result<Decoded, DecodeError> {
    match decoder {
        Some(decoder) => decoder.decode(envelope).await,
        None => DefaultDecoder.decode(envelope).await,
    }
}
