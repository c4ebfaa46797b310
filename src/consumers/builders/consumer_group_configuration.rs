use crate::configuration::DispatchSettings;
use crate::consumers::builders::consumer_group::{ConsumerGroup, ConsumerGroupBuilder};
use crate::consumers::builders::message_handler::MessageHandler;
use crate::consumers::{ProcessingMiddleware, RetryPolicy, TelemetryMiddleware};
use crate::protocol::Protocol;
use crate::publishers::PublisherMiddleware;
use crate::transport::Transport;
use std::sync::Arc;

/// Group-level configuration values for a [`ConsumerGroup`](super::ConsumerGroup).
///
/// Use [`ConsumerGroupConfigurationBuilder`] to build an instance of `ConsumerGroupConfiguration`.
pub(super) struct ConsumerGroupConfiguration<P: Protocol, Context: Send + Sync + 'static> {
    pub(super) transport: Arc<dyn Transport<P>>,
    pub(super) context: Arc<Context>,
    pub(super) settings: DispatchSettings,
    pub(super) reply_inbox: Option<String>,
    pub(super) processing_middleware_chain: Vec<Arc<dyn ProcessingMiddleware<Context>>>,
    pub(super) telemetry_middleware_chain: Vec<Arc<dyn TelemetryMiddleware>>,
    pub(super) publisher_middleware_chain: Vec<Arc<dyn PublisherMiddleware<P>>>,
}

/// A builder for group-level configuration of a [`ConsumerGroup`](super::ConsumerGroup).
///
/// Use [`ConsumerGroup::builder`](super::ConsumerGroup::builder) as entrypoint.
pub struct ConsumerGroupConfigurationBuilder<P: Protocol, Context: Send + Sync + 'static>(
    ConsumerGroupConfiguration<P, Context>,
);

impl<P: Protocol, Context: Send + Sync + 'static> ConsumerGroupConfigurationBuilder<P, Context> {
    pub(super) fn new(transport: Arc<dyn Transport<P>>, context: Arc<Context>) -> Self {
        Self(ConsumerGroupConfiguration {
            transport,
            context,
            settings: DispatchSettings::default(),
            reply_inbox: None,
            processing_middleware_chain: vec![],
            telemetry_middleware_chain: vec![],
            publisher_middleware_chain: vec![],
        })
    }

    /// Replace the default [`DispatchSettings`].
    #[must_use]
    pub fn with_settings(mut self, settings: DispatchSettings) -> Self {
        self.0.settings = settings;
        self
    }

    /// The retry policy of message handlers that do not set their own.
    /// If not configured, failed messages are never redelivered.
    #[must_use]
    pub fn default_retry(mut self, policy: impl Into<RetryPolicy>) -> Self {
        self.0.settings.default_retry = policy.into();
        self
    }

    /// Stop offering a message to the other calls of a subscriber once one of them processed it.
    #[must_use]
    pub fn short_circuit(mut self, short_circuit: bool) -> Self {
        self.0.settings.short_circuit = short_circuit;
        self
    }

    /// The destination replies to this group's requests are sent to.
    ///
    /// If not configured, a unique inbox is generated the first time a request is made.
    #[must_use]
    pub fn reply_inbox(mut self, inbox: impl Into<String>) -> Self {
        self.0.reply_inbox = Some(inbox.into());
        self
    }

    /// You can add a processing middleware to inject logic before and after the handler logic.
    ///
    /// Processing middlewares execute after all [`TelemetryMiddleware`]s have run.
    /// Processing middlewares are executed in the order they are registered: the first registered
    /// middleware executes first on the way in and last on the way out.
    ///
    /// Check out [`ProcessingMiddleware`]'s documentation for more details.
    #[must_use]
    pub fn with_processing_middleware<M: ProcessingMiddleware<Context>>(
        self,
        middleware: M,
    ) -> Self {
        self.with_dyn_processing_middleware(Arc::new(middleware))
    }

    /// Append dynamic processing middleware logic, see [`ConsumerGroupConfigurationBuilder::with_processing_middleware`].
    #[must_use]
    pub fn with_dyn_processing_middleware(
        mut self,
        middleware: Arc<dyn ProcessingMiddleware<Context>>,
    ) -> Self {
        self.0.processing_middleware_chain.push(middleware);
        self
    }

    /// Append multiple dynamic processing middlewares, see [`ConsumerGroupConfigurationBuilder::with_processing_middleware`].
    #[must_use]
    pub fn with_processing_middlewares<I>(mut self, middlewares: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn ProcessingMiddleware<Context>>>,
    {
        self.0.processing_middleware_chain.extend(middlewares);
        self
    }

    /// You can add a telemetry middleware to collect data on the outcome and performance of
    /// message processing.
    ///
    /// [`TelemetryMiddleware`]s execute before and after all processing has taken place (including
    /// acking/nacking the message with the broker).
    /// Telemetry middlewares are executed in the order they are registered: the first registered
    /// middleware executes first on the way in and last on the way out.
    ///
    /// Check out [`TelemetryMiddleware`]'s documentation for more details.
    #[must_use]
    pub fn with_telemetry_middleware<M: TelemetryMiddleware>(self, middleware: M) -> Self {
        self.with_dyn_telemetry_middleware(Arc::new(middleware))
    }

    /// Append dynamic telemetry middleware logic, see [`ConsumerGroupConfigurationBuilder::with_telemetry_middleware`].
    #[must_use]
    pub fn with_dyn_telemetry_middleware(mut self, middleware: Arc<dyn TelemetryMiddleware>) -> Self {
        self.0.telemetry_middleware_chain.push(middleware);
        self
    }

    /// Append multiple dynamic telemetry middlewares, see [`ConsumerGroupConfigurationBuilder::with_telemetry_middleware`].
    #[must_use]
    pub fn with_telemetry_middlewares<I>(mut self, middlewares: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn TelemetryMiddleware>>,
    {
        self.0.telemetry_middleware_chain.extend(middlewares);
        self
    }

    /// Middlewares of the group's [`Publisher`], used for replies, chained publishers and
    /// requests.
    ///
    /// [`Publisher`]: crate::publishers::Publisher
    #[must_use]
    pub fn with_publisher_middleware<M: PublisherMiddleware<P> + 'static>(mut self, middleware: M) -> Self {
        self.0.publisher_middleware_chain.push(Arc::new(middleware));
        self
    }

    /// Add a message handler to the consumer group.
    ///
    /// Check out [`MessageHandler::builder`] to see how to build a [`MessageHandler`].
    pub fn message_handler(
        self,
        handler: MessageHandler<P, Context>,
    ) -> ConsumerGroupBuilder<P, Context> {
        ConsumerGroupBuilder::new(self.0).message_handler(handler)
    }

    /// Finalise the builder into a group without message handlers.
    ///
    /// Handlers can still be registered later, see [`ConsumerGroup::register`].
    pub fn build(self) -> ConsumerGroup<P, Context> {
        ConsumerGroup::new(self.0)
    }
}
