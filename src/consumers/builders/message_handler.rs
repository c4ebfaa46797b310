use crate::consumers::filter::FilterFn;
use crate::consumers::handler::{ClosureHandler, TypedHandler};
use crate::consumers::{
    Filter, Handler, HandlerError, Incoming, NotProcessed, ProcessingMiddleware,
    RetryPolicy, TelemetryMiddleware,
};
use crate::envelope::decoding::DecoderFn;
use crate::envelope::{DecodeError, Decoded, Decoder, Envelope, IntoReply};
use crate::protocol::{Parser, Protocol};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;

/// A call processing the messages received on a binding.
///
/// Use [`MessageHandler::builder`] to start composing a `MessageHandler` using a fluent builder
/// API, then hand it over to [`ConsumerGroup::register`] (or to the group builder).
///
/// # `MessageHandler` vs `ConsumerGroup`
///
/// A `MessageHandler` is always part of a [`ConsumerGroup`] - it relies on its context and
/// inherits its group-level configuration.
///
/// It is possible to:
///
/// - override some group-level configuration for a specific message handler (see
///   [`MessageHandlerBuilder::retry`] and [`MessageHandlerBuilder::with_max_workers`]);
/// - add on top of what the group-level configuration provides (e.g.
///   [`MessageHandlerBuilder::with_processing_middleware`]).
///
/// # Several handlers on the same binding
///
/// Handlers registered with equal bindings share a single subscriber: each message is
/// dispatched to at most one of them, see [`Subscriber`]. Retry policy, parser, concurrency
/// and telemetry middlewares are subscriber-level settings: they are taken from the first
/// handler registered for the binding.
///
/// [`ConsumerGroup`]: super::ConsumerGroup
/// [`ConsumerGroup::register`]: super::ConsumerGroup::register
/// [`Subscriber`]: crate::consumers::Subscriber
pub struct MessageHandler<P: Protocol, Context: Send + Sync + 'static> {
    pub(super) binding: P::Binding,
    pub(super) retry: Option<RetryPolicy>,
    pub(super) parser: Option<Arc<dyn Parser<P>>>,
    pub(super) decoder: Option<Arc<dyn Decoder>>,
    pub(super) filter: Arc<dyn Filter>,
    pub(super) max_workers: Option<usize>,
    pub(super) name: Option<String>,
    pub(super) description: Option<String>,
    pub(super) payload: Option<&'static str>,
    pub(super) publishes_to: Vec<P::Route>,
    pub(super) processing_middleware_chain: Vec<Arc<dyn ProcessingMiddleware<Context>>>,
    pub(super) telemetry_middleware_chain: Vec<Arc<dyn TelemetryMiddleware>>,
    pub(super) handler: Arc<dyn Handler<Context>>,
    pub(super) handler_name: &'static str,
}

impl<P: Protocol, Context: Send + Sync + 'static> MessageHandler<P, Context> {
    /// Start building a [`MessageHandler`].
    ///
    /// You need to provide the binding you want to receive messages on.
    pub fn builder(binding: impl Into<P::Binding>) -> MessageHandlerBuilder<P, Context> {
        MessageHandlerBuilder::new(binding.into())
    }
}

/// A builder to compose a [`MessageHandler`] with a fluent API.
///
/// Use [`MessageHandler::builder`] as entrypoint.
pub struct MessageHandlerBuilder<P: Protocol, Context: Send + Sync + 'static> {
    binding: P::Binding,
    retry: Option<RetryPolicy>,
    parser: Option<Arc<dyn Parser<P>>>,
    decoder: Option<Arc<dyn Decoder>>,
    filter: Arc<dyn Filter>,
    max_workers: Option<usize>,
    name: Option<String>,
    description: Option<String>,
    publishes_to: Vec<P::Route>,
    processing_middleware_chain: Vec<Arc<dyn ProcessingMiddleware<Context>>>,
    telemetry_middleware_chain: Vec<Arc<dyn TelemetryMiddleware>>,
}

impl<P: Protocol, Context: Send + Sync + 'static> MessageHandlerBuilder<P, Context> {
    pub(super) fn new(binding: P::Binding) -> Self {
        Self {
            binding,
            retry: None,
            parser: None,
            decoder: None,
            filter: Arc::new(NotProcessed),
            max_workers: None,
            name: None,
            description: None,
            publishes_to: vec![],
            processing_middleware_chain: vec![],
            telemetry_middleware_chain: vec![],
        }
    }

    /// How failures are retried: `false` rejects on the first failure, `true` redelivers
    /// forever, a number `n` redelivers until the message has been attempted more than `n` times.
    ///
    /// If not configured, the handler inherits the group's default retry policy.
    #[must_use]
    pub fn retry(mut self, policy: impl Into<RetryPolicy>) -> Self {
        self.retry = Some(policy.into());
        self
    }

    /// Replace the protocol's default parsing of native messages into envelopes.
    #[must_use]
    pub fn with_parser<T: Parser<P>>(mut self, parser: T) -> Self {
        self.parser = Some(Arc::new(parser));
        self
    }

    /// Replace the content-type driven decoding of the body, for this call only.
    #[must_use]
    pub fn with_decoder<D: Decoder>(mut self, decoder: D) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    /// Synchronous version of [`MessageHandlerBuilder::with_decoder`].
    #[must_use]
    pub fn decoder<F>(self, decoder: F) -> Self
    where
        F: Fn(&Envelope) -> Result<Decoded, DecodeError> + Send + Sync + 'static,
    {
        self.with_decoder(DecoderFn(decoder))
    }

    /// Only accept the messages for which `filter` returns `true`.
    ///
    /// Replaces the default filter, which accepts any message no other call has processed.
    #[must_use]
    pub fn with_filter<F: Filter>(mut self, filter: F) -> Self {
        self.filter = Arc::new(filter);
        self
    }

    /// Synchronous version of [`MessageHandlerBuilder::with_filter`].
    ///
    /// ```rust
    /// use switchyard::consumers::MessageHandler;
    /// use switchyard::protocols::redis::Redis;
    ///
    /// let builder = MessageHandler::<Redis, ()>::builder("orders")
    ///     .filter(|envelope| envelope.header("kind") == Some("refund"));
    /// ```
    #[must_use]
    pub fn filter<F>(self, filter: F) -> Self
    where
        F: Fn(&Envelope) -> bool + Send + Sync + 'static,
    {
        self.with_filter(FilterFn(filter))
    }

    /// Forward every reply of this handler to `route`, in addition to the `reply_to` of the
    /// incoming message.
    #[must_use]
    pub fn publishes_to(mut self, route: impl Into<P::Route>) -> Self {
        self.publishes_to.push(route.into());
        self
    }

    /// How many messages the subscriber processes concurrently. `1` means sequentially, in
    /// delivery order.
    ///
    /// If not configured, the group settings apply, then the protocol default.
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    /// The name of the call in logs and generated documentation.
    /// Defaults to the type name of the handler.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// You can add processing middleware to inject logic before and after the handler logic.
    ///
    /// Middlewares are executed in the order they are registered: the first registered
    /// middleware executes first on the way in and last on the way out.
    ///
    /// Processing middlewares registered at the [`MessageHandler`] level are executed AFTER
    /// processing middlewares registered at the [`ConsumerGroup`] level.
    ///
    /// Check out [`ProcessingMiddleware`]'s documentation for more details.
    ///
    /// [`ConsumerGroup`]: super::ConsumerGroup
    #[must_use]
    pub fn with_processing_middleware<M: ProcessingMiddleware<Context>>(
        self,
        middleware: M,
    ) -> Self {
        self.with_dyn_processing_middleware(Arc::new(middleware))
    }

    /// Append dynamic processing middleware logic, see [`MessageHandlerBuilder::with_processing_middleware`].
    #[must_use]
    pub fn with_dyn_processing_middleware(
        mut self,
        middleware: Arc<dyn ProcessingMiddleware<Context>>,
    ) -> Self {
        self.processing_middleware_chain.push(middleware);
        self
    }

    /// Append multiple dynamic processing middlewares, see [`MessageHandlerBuilder::with_processing_middleware`].
    #[must_use]
    pub fn with_processing_middlewares<I>(mut self, middlewares: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn ProcessingMiddleware<Context>>>,
    {
        self.processing_middleware_chain.extend(middlewares);
        self
    }

    /// You can add telemetry middleware to inject logic before and after the message processing
    /// has taken place.
    ///
    /// Telemetry middlewares registered at the [`MessageHandler`] level are executed AFTER
    /// telemetry middlewares registered at the [`ConsumerGroup`] level.
    ///
    /// Check out [`TelemetryMiddleware`]'s documentation for more details.
    ///
    /// [`ConsumerGroup`]: super::ConsumerGroup
    #[must_use]
    pub fn with_telemetry_middleware<M: TelemetryMiddleware>(self, middleware: M) -> Self {
        self.with_dyn_telemetry_middleware(Arc::new(middleware))
    }

    /// Append dynamic telemetry middleware logic, see [`MessageHandlerBuilder::with_telemetry_middleware`].
    #[must_use]
    pub fn with_dyn_telemetry_middleware(mut self, middleware: Arc<dyn TelemetryMiddleware>) -> Self {
        self.telemetry_middleware_chain.push(middleware);
        self
    }

    /// Finalise the builder with an async function taking the whole [`Incoming`] message.
    ///
    /// The function can return anything convertible into a reply: `()` for no reply,
    /// a string, a [`Payload`], a JSON value, ...
    ///
    /// [`Payload`]: crate::envelope::Payload
    pub fn handler<F, Fut, R, E>(self, handler: F) -> MessageHandler<P, Context>
    where
        F: Fn(Incoming<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: IntoReply + Send + 'static,
        E: Into<HandlerError> + Send + 'static,
    {
        let handler_name = std::any::type_name::<F>();
        self.finish(Arc::new(ClosureHandler(handler)), handler_name, None)
    }

    /// Finalise the builder with an async function taking a strongly-typed body, extracted
    /// from the decoded message.
    ///
    /// A body that does not match `T` fails processing with a validation error.
    pub fn typed_handler<T, F, Fut, R, E>(self, handler: F) -> MessageHandler<P, Context>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T, Incoming<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: IntoReply + Send + 'static,
        E: Into<HandlerError> + Send + 'static,
    {
        let handler_name = std::any::type_name::<F>();
        let payload = Some(std::any::type_name::<T>());
        self.finish(Arc::new(TypedHandler::new(handler)), handler_name, payload)
    }

    /// Finalise the builder with a type implementing [`Handler`].
    pub fn raw_handler<H: Handler<Context>>(self, handler: H) -> MessageHandler<P, Context> {
        let handler_name = std::any::type_name::<H>();
        self.finish(Arc::new(handler), handler_name, None)
    }

    /// Finalise the builder with a shared [`Handler`].
    pub fn raw_arc_handler(self, handler: Arc<dyn Handler<Context>>) -> MessageHandler<P, Context> {
        self.finish(handler, "dyn Handler", None)
    }

    fn finish(
        self,
        handler: Arc<dyn Handler<Context>>,
        handler_name: &'static str,
        payload: Option<&'static str>,
    ) -> MessageHandler<P, Context> {
        MessageHandler {
            binding: self.binding,
            retry: self.retry,
            parser: self.parser,
            decoder: self.decoder,
            filter: self.filter,
            max_workers: self.max_workers,
            name: self.name,
            description: self.description,
            payload,
            publishes_to: self.publishes_to,
            processing_middleware_chain: self.processing_middleware_chain,
            telemetry_middleware_chain: self.telemetry_middleware_chain,
            handler,
            handler_name,
        }
    }
}
