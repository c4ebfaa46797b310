use crate::consumers::extensions::with_extensions;
use crate::consumers::telemetry_middleware::{
    MessageMetadata, MessageProcessing, ProcessingError, ProcessingOutcome,
};
use crate::consumers::{Consumed, HandlerError, Outcome, Subscriber, WatcherContext};
use crate::envelope::{BrokerAction, Envelope};
use crate::protocol::Protocol;
use crate::publishers::{MessageEnvelope, Publisher};
use crate::transport::{Subscription, Transport, TransportError};
use futures_util::{stream::FuturesUnordered, FutureExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use task_local_extensions::Extensions;
use tokio::sync::{oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// The receive loop of a single subscriber.
///
/// [`ConsumerGroup`] spawns a `Dispatcher` for each subscriber when it starts.
/// Users of the crate are never exposed to `Dispatcher` directly.
///
/// # Fault tolerance
///
/// If the subscription cannot be established, or breaks while receiving, the dispatcher waits
/// `reconnect_delay` and subscribes again. The loss is logged once, at `WARN`. The recovery is
/// logged once, at `INFO`, when the first message is received afterwards.
///
/// # Concurrency
///
/// Messages are processed in tasks, up to the subscriber's `max_workers`. With a single worker
/// messages are processed inline, one at a time, in delivery order.
///
/// [`ConsumerGroup`]: crate::consumers::ConsumerGroup
pub(crate) struct Dispatcher<P: Protocol, C: Send + Sync + 'static> {
    subscriber: Arc<Subscriber<P, C>>,
    transport: Arc<dyn Transport<P>>,
    publisher: Publisher<P>,
    reconnect_delay: Duration,
}

impl<P: Protocol, C: Send + Sync + 'static> Dispatcher<P, C> {
    pub(crate) fn new(
        subscriber: Arc<Subscriber<P, C>>,
        transport: Arc<dyn Transport<P>>,
        publisher: Publisher<P>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            subscriber,
            transport,
            publisher,
            reconnect_delay,
        }
    }

    /// Receive and process messages until `shutdown` fires, the subscriber is closed or the
    /// broker ends the subscription.
    ///
    /// `ready` is notified after the first subscription attempt, successful or not.
    /// Messages in flight are completed before returning.
    pub(crate) async fn run(self, shutdown: CancellationToken, ready: oneshot::Sender<()>) {
        let span = tracing::info_span!(
            "dispatch",
            subscription = %self.subscriber.name(),
            protocol = P::NAME
        );
        self.event_loop(shutdown, ready).instrument(span).await
    }

    async fn event_loop(self, shutdown: CancellationToken, ready: oneshot::Sender<()>) {
        let mut ready = Some(ready);
        let mut connection_lost = false;
        let mut task_handles = FuturesUnordered::new();
        let workers = self
            .subscriber
            .max_workers()
            .filter(|n| *n > 1)
            .map(|n| Arc::new(Semaphore::new(n)));
        let sequential = self.subscriber.max_workers() == Some(1)
            || self.subscriber.max_workers() == Some(0);
        let closed = self.subscriber.closed().clone();

        'subscribe: loop {
            let subscribed = tokio::select! {
                biased;

                _ = shutdown.cancelled() => break 'subscribe,
                _ = closed.cancelled() => break 'subscribe,
                subscribed = self.transport.subscribe(self.subscriber.binding()) => subscribed,
            };
            if let Some(ready) = ready.take() {
                let _ = ready.send(());
            }
            let mut subscription = match subscribed {
                Ok(subscription) => subscription,
                Err(e) => {
                    self.on_connection_lost(&mut connection_lost, &e);
                    if !self.wait_before_reconnecting(&shutdown, &closed).await {
                        break 'subscribe;
                    }
                    continue 'subscribe;
                }
            };

            loop {
                tokio::select! {
                    // Prefer handling a shutdown over processing more messages.
                    biased;

                    _ = shutdown.cancelled() => {
                        tracing::info!("Dispatcher received shutdown event");
                        unsubscribe(subscription).await;
                        break 'subscribe;
                    }
                    _ = closed.cancelled() => {
                        unsubscribe(subscription).await;
                        break 'subscribe;
                    }

                    _ = task_handles.next(), if !task_handles.is_empty() => {}

                    received = subscription.receive() => match received {
                        Ok(Some(raw)) => {
                            // Pull-style transports only hit the network on receive.
                            if connection_lost {
                                tracing::info!("Subscription restored");
                                connection_lost = false;
                            }
                            let processing = process_message(
                                Arc::clone(&self.subscriber),
                                self.publisher.clone(),
                                raw,
                            );
                            if sequential {
                                processing.await;
                            } else if let Some(workers) = &workers {
                                let Ok(permit) = Arc::clone(workers).acquire_owned().await else {
                                    break 'subscribe;
                                };
                                task_handles.push(tokio::spawn(processing.map(move |_| drop(permit))));
                            } else {
                                task_handles.push(tokio::spawn(processing.map(|_| ())));
                            }
                        }
                        Ok(None) => {
                            tracing::info!("The broker closed the subscription");
                            break 'subscribe;
                        }
                        Err(e) => {
                            self.on_connection_lost(&mut connection_lost, &e);
                            drop(subscription);
                            if !self.wait_before_reconnecting(&shutdown, &closed).await {
                                break 'subscribe;
                            }
                            continue 'subscribe;
                        }
                    }
                }
            }
        }

        // Make sure all tasks in flight complete before returning.
        while task_handles.next().await.is_some() {}
    }

    fn on_connection_lost(&self, connection_lost: &mut bool, error: &TransportError) {
        if !*connection_lost {
            tracing::warn!(
                error.message = %error,
                error.details = ?error,
                retry_in_ms = self.reconnect_delay.as_millis() as u64,
                "Lost the subscription with the broker, retrying until it is restored"
            );
            *connection_lost = true;
        }
    }

    /// Returns `false` if the dispatcher should stop instead of reconnecting.
    async fn wait_before_reconnecting(
        &self,
        shutdown: &CancellationToken,
        closed: &CancellationToken,
    ) -> bool {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => false,
            _ = closed.cancelled() => false,
            _ = tokio::time::sleep(self.reconnect_delay) => true,
        }
    }
}

async fn unsubscribe<P: Protocol>(subscription: Box<dyn Subscription<P>>) {
    if let Err(e) = subscription.unsubscribe().await {
        tracing::warn!(error.message = %e, "Failed to unsubscribe cleanly");
    }
}

/// Process a message end-to-end: parsing, dispatch to the calls, settlement with the broker
/// and reply delivery, wrapped in the telemetry middlewares and message-local storage.
pub(crate) async fn process_message<P: Protocol, C: Send + Sync + 'static>(
    subscriber: Arc<Subscriber<P, C>>,
    publisher: Publisher<P>,
    raw: P::Raw,
) -> ProcessingOutcome {
    let envelope = subscriber.parse(raw).await;
    let span = tracing::info_span!(
        "process_message",
        subscription = %subscriber.name(),
        message_id = %envelope.message_id,
        correlation_id = %envelope.correlation_id,
    );
    let processing = async {
        let mut envelope = envelope;
        let metadata = MessageMetadata::new(subscriber.name().into(), &envelope);
        let processing = MessageProcessing {
            next_telemetry_middleware: subscriber.telemetry_middleware_chain(),
            processing: Box::pin(execute(&subscriber, &publisher, &mut envelope)),
        };
        processing.run(&metadata).await
    };
    let (_, outcome) = with_extensions(Extensions::new(), processing.instrument(span)).await;
    outcome
}

async fn execute<P: Protocol, C: Send + Sync + 'static>(
    subscriber: &Subscriber<P, C>,
    publisher: &Publisher<P>,
    envelope: &mut Envelope,
) -> ProcessingOutcome {
    let watcher_context = WatcherContext::enter(subscriber.watcher(), envelope);
    let result = subscriber.consume(envelope).await;
    let outcome = Outcome::from_result(&result);

    let broker_action = match watcher_context.exit(&outcome).await {
        Ok(action) => action,
        Err(e) => {
            tracing::error!(
                error.message = %e,
                error.details = ?e,
                "Failed to settle the message with the broker"
            );
            let action = e.action;
            return ProcessingOutcome::new(Err(ProcessingError::AckError(e)), Some(action));
        }
    };

    match result {
        Ok(consumed) => {
            if let (Some(BrokerAction::Ack), Some(consumed)) = (broker_action, consumed) {
                propagate(publisher, envelope, consumed).await;
            }
            ProcessingOutcome::new(Ok(()), broker_action)
        }
        Err(HandlerError::Interrupt(signal)) => {
            tracing::debug!(%signal, "Message processing was interrupted");
            ProcessingOutcome::new(Ok(()), broker_action)
        }
        Err(e) => {
            tracing::error!(
                error.message = %e,
                error.details = ?e,
                error.error_type = ?e.error_type(),
                broker_action = ?broker_action,
                "Failed to process the message"
            );
            ProcessingOutcome::new(Err(ProcessingError::HandlerError(e)), broker_action)
        }
    }
}

/// Deliver the reply of a successfully processed message: to `reply_to`, if set, and to every
/// chained publisher of the call. Failures are logged: the message has already been acked.
async fn propagate<P: Protocol>(
    publisher: &Publisher<P>,
    envelope: &Envelope,
    consumed: Consumed<P>,
) {
    let Some(payload) = consumed.reply else {
        return;
    };

    if !envelope.reply_to.is_empty() {
        let reply = MessageEnvelope::<P>::new(P::route_to(&envelope.reply_to), payload.clone())
            .with_correlation_id(envelope.correlation_id.clone());
        if let Err(e) = publisher.publish(reply).await {
            tracing::error!(
                error.message = %e,
                error.details = ?e,
                reply_to = %envelope.reply_to,
                "Failed to publish the reply"
            );
        }
    }

    for target in consumed.publishers {
        target.mock.record(&payload);
        let message = MessageEnvelope::<P>::new(target.route.clone(), payload.clone())
            .with_correlation_id(envelope.correlation_id.clone());
        if let Err(e) = publisher.publish(message).await {
            tracing::error!(
                error.message = %e,
                error.details = ?e,
                route = ?target.route,
                "Failed to forward the reply to a chained publisher"
            );
        }
    }
}
