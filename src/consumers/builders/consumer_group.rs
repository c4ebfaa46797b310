use crate::consumers::builders::consumer_group_configuration::ConsumerGroupConfiguration;
use crate::consumers::builders::message_handler::MessageHandler;
use crate::consumers::call::{CallInfo, CallMock, PublishTarget, PublisherMock, SubscriberCall};
use crate::consumers::dispatch::Dispatcher;
use crate::consumers::{
    CallHandle, ConsumerGroupConfigurationBuilder, NotProcessed, RegistrationError, RetryPolicy,
    Subscriber, SubscriberInfo,
};
use crate::envelope::Decoded;
use crate::protocol::{DefaultParser, Protocol};
use crate::publishers::{inject_properties, MessageEnvelope, Publisher, PublisherError};
use crate::rpc::{ReplyResolver, ReplyTable, RpcOptions};
use crate::transport::{Transport, TransportError};
use anyhow::Context as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A collection of subscribers sharing the same context, transport and settings.
///
/// `ConsumerGroup` is the main entrypoint if you want to receive and process messages.
/// Every handler is registered against a binding: handlers with equal bindings share a
/// [`Subscriber`], which hands each message to at most one of them.
///
/// # How do I build a `ConsumerGroup`?
///
/// `ConsumerGroup` provides a fluent API to add configuration step-by-step, known as
/// "builder pattern" in Rust.
/// The starting point is [`ConsumerGroup::builder`].
///
/// Once you are done with group-level configuration, you can start adding message handlers using
/// [`ConsumerGroupBuilder::message_handler`], or later on via [`ConsumerGroup::register`].
///
/// # Layered configuration
///
/// Certain types of configuration values can only be added at the group level (e.g. transport,
/// context, publisher middlewares) while others can be set both at the group and message
/// handler level (e.g. retry policy, processing middlewares).
///
/// # Lifecycle
///
/// [`ConsumerGroup::start`] connects to the broker and spawns a dispatcher for each subscriber.
/// [`ConsumerGroup::close`] stops them, waiting for the messages in flight.
/// A closed group can be started again.
pub struct ConsumerGroup<P: Protocol, Context: Send + Sync + 'static> {
    configuration: ConsumerGroupConfiguration<P, Context>,
    subscribers: Mutex<Vec<Arc<Subscriber<P, Context>>>>,
    publisher: Publisher<P>,
    replies: Arc<ReplyTable>,
    mocks_enabled: AtomicBool,
    state: tokio::sync::Mutex<GroupState<P, Context>>,
}

struct GroupState<P: Protocol, Context: Send + Sync + 'static> {
    connected: bool,
    shutdown: CancellationToken,
    running: Vec<(Arc<Subscriber<P, Context>>, JoinHandle<()>)>,
    reply_inbox: Option<(String, Arc<Subscriber<P, Context>>)>,
}

impl<P: Protocol, Context: Send + Sync + 'static> ConsumerGroup<P, Context> {
    /// Start building a [`ConsumerGroup`].
    ///
    /// You will need a transport and a context.
    ///
    /// # Context
    ///
    /// In message handlers you will often need to use resources with a significant initialisation
    /// cost - e.g. a HTTP client, a database connection, etc.
    /// Instead of creating a new instance of these expensive resources every single time you handle
    /// a message, you can put those resources in the _context_.
    ///
    /// The context is created once, before the consumer group is built, and each message handler
    /// gets a shared reference to the context together with the incoming message.
    ///
    /// ## Implementation Notes
    ///
    /// The context is wrapped in an `Arc` by `ConsumerGroup` - if your context is already behind
    /// an `Arc` pointer, it won't be "double-wrapped".
    pub fn builder<T: Transport<P>>(
        transport: T,
        context: impl Into<Arc<Context>>,
    ) -> ConsumerGroupConfigurationBuilder<P, Context> {
        Self::builder_with_dyn_transport(Arc::new(transport), context)
    }

    /// Same as [`ConsumerGroup::builder`], for a transport that is already shared.
    pub fn builder_with_dyn_transport(
        transport: Arc<dyn Transport<P>>,
        context: impl Into<Arc<Context>>,
    ) -> ConsumerGroupConfigurationBuilder<P, Context> {
        ConsumerGroupConfigurationBuilder::new(transport, context.into())
    }

    pub(super) fn new(configuration: ConsumerGroupConfiguration<P, Context>) -> Self {
        let publisher = Publisher::builder(Arc::clone(&configuration.transport))
            .publish_timeout(configuration.settings.publish_timeout())
            .with_middlewares(configuration.publisher_middleware_chain.iter().cloned())
            .build();
        Self {
            configuration,
            subscribers: Mutex::new(Vec::new()),
            publisher,
            replies: Arc::new(ReplyTable::default()),
            mocks_enabled: AtomicBool::new(false),
            state: tokio::sync::Mutex::new(GroupState {
                connected: false,
                shutdown: CancellationToken::new(),
                running: Vec::new(),
                reply_inbox: None,
            }),
        }
    }

    /// Register a message handler.
    ///
    /// The handler joins the subscriber of its binding, which is created if this is the first
    /// handler registered for it. Handlers joining an existing subscriber cannot ask for a
    /// different retry policy.
    ///
    /// Subscribers registered while the group is running are dispatched on the next
    /// [`ConsumerGroup::start`].
    pub fn register(
        &self,
        handler: MessageHandler<P, Context>,
    ) -> Result<CallHandle<P>, RegistrationError> {
        let MessageHandler {
            binding,
            retry,
            parser,
            decoder,
            filter,
            max_workers,
            name,
            description,
            payload,
            publishes_to,
            processing_middleware_chain,
            telemetry_middleware_chain,
            handler,
            handler_name,
        } = handler;
        let settings = &self.configuration.settings;

        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let subscriber = match subscribers.iter().find(|s| s.binding() == &binding) {
            Some(existing) => {
                if let Some(requested) = retry {
                    if requested != existing.retry_policy() {
                        return Err(RegistrationError::ConflictingRetryPolicy {
                            subscription: existing.name().to_owned(),
                            existing: existing.retry_policy(),
                            requested,
                        });
                    }
                }
                if !telemetry_middleware_chain.is_empty() || parser.is_some() {
                    tracing::warn!(
                        subscription = %existing.name(),
                        "The subscription already exists: the telemetry middlewares and the parser of the new handler are ignored"
                    );
                }
                Arc::clone(existing)
            }
            None => {
                let telemetry_middleware_chain = self
                    .configuration
                    .telemetry_middleware_chain
                    .iter()
                    .cloned()
                    .chain(telemetry_middleware_chain)
                    .collect();
                let subscriber = Arc::new(Subscriber::new(
                    binding,
                    description.clone(),
                    Arc::clone(&self.configuration.context),
                    parser.unwrap_or_else(|| Arc::new(DefaultParser)),
                    retry.unwrap_or(settings.default_retry),
                    telemetry_middleware_chain,
                    settings.short_circuit,
                    max_workers
                        .or(settings.max_workers)
                        .or(P::DEFAULT_MAX_WORKERS),
                ));
                subscribers.push(Arc::clone(&subscriber));
                subscriber
            }
        };

        let middlewares = self
            .configuration
            .processing_middleware_chain
            .iter()
            .cloned()
            .chain(processing_middleware_chain)
            .collect();
        let publishers: Vec<_> = publishes_to
            .into_iter()
            .map(|route| PublishTarget {
                route,
                mock: PublisherMock::default(),
            })
            .collect();
        let call = SubscriberCall {
            handler,
            filter,
            decoder,
            middlewares,
            publishers,
            mock: CallMock::default(),
            info: CallInfo {
                name: name.unwrap_or_else(|| handler_name.to_owned()),
                description,
                payload,
            },
        };
        if self.mocks_enabled.load(Ordering::SeqCst) {
            call.mock.enable();
            for publisher in &call.publishers {
                publisher.mock.enable();
            }
        }

        let handle = CallHandle {
            subscription: subscriber.name().to_owned(),
            binding: subscriber.binding().clone(),
            mock: call.mock.clone(),
            publishers: call.publishers.clone(),
            info: call.info.clone(),
        };
        subscriber.add_call(Arc::new(call));
        Ok(handle)
    }

    /// The subscribers of the group, in registration order.
    pub fn subscribers(&self) -> Vec<Arc<Subscriber<P, Context>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// A description of every subscriber and call of the group, e.g. to generate documentation.
    pub fn info(&self) -> Vec<SubscriberInfo> {
        self.subscribers().iter().map(|s| s.info()).collect()
    }

    /// The publisher used for replies, chained publishers and requests.
    pub fn publisher(&self) -> &Publisher<P> {
        &self.publisher
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.configuration.context
    }

    pub(crate) fn settings(&self) -> &crate::configuration::DispatchSettings {
        &self.configuration.settings
    }

    /// Connect to the broker and start dispatching every subscriber.
    ///
    /// Calling `start` on a running group only dispatches the subscribers registered since.
    /// Returns once every new dispatcher has attempted its first subscription.
    #[tracing::instrument(skip_all, name = "consumer_group_start", fields(protocol = P::NAME))]
    pub async fn start(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        self.ensure_connected(&mut state).await?;

        let mut ready = Vec::new();
        for subscriber in self.subscribers() {
            if let Some(signal) = self.spawn_dispatcher(&mut state, subscriber) {
                ready.push(signal);
            }
        }
        for signal in ready {
            // A dispatcher exiting before its first attempt drops the sender.
            let _ = signal.await;
        }
        Ok(())
    }

    /// Stop every dispatcher and wait for the messages in flight.
    #[tracing::instrument(skip_all, name = "consumer_group_close", fields(protocol = P::NAME))]
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.shutdown.cancel();
        for (subscriber, handle) in std::mem::take(&mut state.running) {
            if let Err(e) = handle.await {
                tracing::error!(
                    subscription = %subscriber.name(),
                    error.message = %e,
                    "Dispatcher task failed"
                );
            }
        }
        state.shutdown = CancellationToken::new();
    }

    /// Publish a message through the group's [`Publisher`].
    pub async fn publish(&self, message: MessageEnvelope<P>) -> Result<(), PublisherError> {
        self.publisher.publish(message).await
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.replies.pending()
    }

    /// Publish a message and wait for its reply.
    ///
    /// The reply is matched on correlation id and delivered to the group's reply inbox, which is
    /// subscribed to on the first request.
    /// Returns `None` if no reply arrives in time, unless [`RpcOptions::raise_timeout`] is set.
    #[tracing::instrument(skip_all, name = "request", fields(protocol = P::NAME, route = ?message.route))]
    pub async fn request(
        &self,
        message: MessageEnvelope<P>,
        options: RpcOptions,
    ) -> Result<Option<Decoded>, PublisherError> {
        let inbox = self.reply_inbox().await?;
        let mut message = inject_properties(message);
        message.reply_to = Some(inbox);
        let correlation_id = message.correlation_id().to_owned();

        let reply = self
            .replies
            .register(&correlation_id)
            .map_err(|e| PublisherError::GenericError(e.into()))?;
        // Dropping `reply`, on any path, unregisters the request.
        self.publisher.publish(message).await?;

        let timeout = options
            .timeout
            .unwrap_or_else(|| self.configuration.settings.rpc_timeout());
        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(reply)) => Ok(Some(reply)),
            Ok(Err(_)) => Err(PublisherError::GenericError(anyhow::anyhow!(
                "The reply inbox stopped before a reply was received"
            ))),
            Err(_) => {
                tracing::debug!(correlation_id = %correlation_id, "No reply received in time");
                if options.raise_timeout {
                    Err(PublisherError::TimeoutError)
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// You can call `run_until_shutdown` to start consuming messages from the bindings you
    /// registered.
    /// As the name implies, `run_until_shutdown` returns control to the caller once `shutdown`
    /// is cancelled and every message in flight has been processed.
    #[tracing::instrument(skip_all, name = "consumer_group_run")]
    pub async fn run_until_shutdown(&self, shutdown: CancellationToken) -> Result<(), anyhow::Error> {
        self.start()
            .await
            .context("Failed to start the consumer group")?;
        shutdown.cancelled().await;
        self.close().await;
        Ok(())
    }

    /// Same as [`ConsumerGroup::run_until_shutdown`], stopping on Ctrl+C.
    pub async fn run_until_ctrl_c(&self) -> Result<(), anyhow::Error> {
        self.start()
            .await
            .context("Failed to start the consumer group")?;
        let signal = tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C");
        self.close().await;
        signal
    }

    /// Start recording invocations on every call mock, including calls registered later.
    pub(crate) fn enable_mocks(&self) {
        self.mocks_enabled.store(true, Ordering::SeqCst);
        for subscriber in self.subscribers() {
            subscriber.enable_mocks();
        }
    }

    async fn ensure_connected(&self, state: &mut GroupState<P, Context>) -> Result<(), TransportError> {
        if !state.connected {
            self.configuration.transport.connect().await?;
            state.connected = true;
        }
        Ok(())
    }

    /// Spawn the dispatcher of `subscriber`, unless it is already running or was closed.
    fn spawn_dispatcher(
        &self,
        state: &mut GroupState<P, Context>,
        subscriber: Arc<Subscriber<P, Context>>,
    ) -> Option<oneshot::Receiver<()>> {
        state.running.retain(|(_, handle)| !handle.is_finished());
        let running = state
            .running
            .iter()
            .any(|(s, _)| Arc::ptr_eq(s, &subscriber));
        if running || subscriber.is_closed() {
            return None;
        }

        let (ready, signal) = oneshot::channel();
        let dispatcher = Dispatcher::new(
            Arc::clone(&subscriber),
            Arc::clone(&self.configuration.transport),
            self.publisher.clone(),
            self.configuration.settings.reconnect_delay(),
        );
        let handle = tokio::spawn(dispatcher.run(state.shutdown.child_token(), ready));
        state.running.push((subscriber, handle));
        Some(signal)
    }

    /// The inbox replies to this group's requests are delivered to, subscribing to it if needed.
    async fn reply_inbox(&self) -> Result<String, PublisherError> {
        let mut state = self.state.lock().await;
        self.ensure_connected(&mut state).await?;

        let (inbox, subscriber) = match &state.reply_inbox {
            Some((inbox, subscriber)) => (inbox.clone(), Arc::clone(subscriber)),
            None => {
                let inbox = self
                    .configuration
                    .reply_inbox
                    .clone()
                    .unwrap_or_else(|| format!("switchyard.reply.{}", Uuid::new_v4()));
                let subscriber = Arc::new(Subscriber::new(
                    P::reply_binding(&inbox),
                    Some("Replies to the requests of this group".to_owned()),
                    Arc::clone(&self.configuration.context),
                    Arc::new(DefaultParser),
                    RetryPolicy::Never,
                    self.configuration.telemetry_middleware_chain.clone(),
                    false,
                    None,
                ));
                subscriber.add_call(Arc::new(SubscriberCall {
                    handler: Arc::new(ReplyResolver::new(Arc::clone(&self.replies))),
                    filter: Arc::new(NotProcessed),
                    decoder: None,
                    middlewares: vec![],
                    publishers: vec![],
                    mock: CallMock::default(),
                    info: CallInfo {
                        name: "reply_inbox".to_owned(),
                        description: None,
                        payload: None,
                    },
                }));
                state.reply_inbox = Some((inbox.clone(), Arc::clone(&subscriber)));
                (inbox, subscriber)
            }
        };

        if let Some(signal) = self.spawn_dispatcher(&mut state, subscriber) {
            let _ = signal.await;
        }
        Ok(inbox)
    }
}

/// A [`ConsumerGroup`] being assembled, with at least one message handler.
///
/// Use [`ConsumerGroupConfigurationBuilder::message_handler`] as entrypoint.
pub struct ConsumerGroupBuilder<P: Protocol, Context: Send + Sync + 'static> {
    configuration: ConsumerGroupConfiguration<P, Context>,
    message_handlers: Vec<MessageHandler<P, Context>>,
}

impl<P: Protocol, Context: Send + Sync + 'static> ConsumerGroupBuilder<P, Context> {
    pub(super) fn new(configuration: ConsumerGroupConfiguration<P, Context>) -> Self {
        Self {
            configuration,
            message_handlers: vec![],
        }
    }

    /// Add a message handler to the consumer group.
    ///
    /// Check out [`MessageHandler::builder`] to see how to build a [`MessageHandler`].
    pub fn message_handler(mut self, handler: MessageHandler<P, Context>) -> Self {
        self.message_handlers.push(handler);
        self
    }

    /// Finalise the builder and register every message handler.
    pub fn build(self) -> Result<ConsumerGroup<P, Context>, RegistrationError> {
        let group = ConsumerGroup::new(self.configuration);
        for handler in self.message_handlers {
            group.register(handler)?;
        }
        Ok(group)
    }
}
