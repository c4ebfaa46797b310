use crate::consumers::extensions::with_extensions;
use crate::consumers::{
    CallHandle, ConsumerGroup, HandlerError, MessageHandler, RegistrationError,
};
use crate::envelope::{Acker, DecodeError, Decoded, Reply};
use crate::protocol::Protocol;
use crate::publishers::{inject_properties, MessageEnvelope};
use crate::rpc::RpcOptions;
use futures_util::future::{BoxFuture, FutureExt};
use std::time::Duration;
use task_local_extensions::Extensions;

/// Runs the subscribers of a [`ConsumerGroup`] in-process, without a broker.
///
/// Publishing through a `TestBroker` hands the message straight to every subscriber whose
/// binding matches its route, using the same matching, parsing and dispatch logic as the live
/// dispatch loop. Replies are delivered in-process as well: to `reply_to`, to the chained
/// publishers of the call and, for [`TestBroker::request`], back to the caller.
///
/// Unlike the live dispatch loop, handler failures are not turned into a settlement: they are
/// returned to the caller of [`TestBroker::publish`].
///
/// Wrapping a group switches on the call and publisher mocks of all its handlers, including
/// those registered later.
///
/// ```rust
/// use switchyard::consumers::{ConsumerGroup, Incoming, MessageHandler};
/// use switchyard::protocols::redis::Redis;
/// use switchyard::publishers::MessageEnvelope;
/// use switchyard::testing::{InMemoryTransport, TestBroker};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let group = ConsumerGroup::<Redis, ()>::builder(InMemoryTransport::new(), ())
///     .message_handler(
///         MessageHandler::builder("greetings")
///             .handler(|_: Incoming<()>| async { Ok::<_, anyhow::Error>("hello back") }),
///     )
///     .build()
///     .unwrap();
/// let broker = TestBroker::new(group);
///
/// broker
///     .publish(MessageEnvelope::new("greetings", "hello"))
///     .await
///     .unwrap();
/// # }
/// ```
pub struct TestBroker<P: Protocol, Context: Send + Sync + 'static> {
    group: ConsumerGroup<P, Context>,
}

/// Failures surfaced by [`TestBroker`].
#[derive(thiserror::Error, Debug)]
pub enum TestPublishError {
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error("No reply was received within {0:?}")]
    Timeout(Duration),
    #[error("The reply could not be decoded")]
    Decode(#[from] DecodeError),
}

impl<P: Protocol, Context: Send + Sync + 'static> TestBroker<P, Context> {
    pub fn new(group: ConsumerGroup<P, Context>) -> Self {
        group.enable_mocks();
        Self { group }
    }

    pub fn group(&self) -> &ConsumerGroup<P, Context> {
        &self.group
    }

    /// Register another handler on the wrapped group. Its mocks record from the start.
    pub fn register(
        &self,
        handler: MessageHandler<P, Context>,
    ) -> Result<CallHandle<P>, RegistrationError> {
        self.group.register(handler)
    }

    /// Deliver `message` to every matching subscriber, along with the replies and chained
    /// messages it causes, and return once they have all been processed.
    pub async fn publish(&self, message: MessageEnvelope<P>) -> Result<(), TestPublishError> {
        self.deliver(inject_properties(message), false).await.map(drop)
    }

    /// Deliver `message` and return the reply of the call that processed it.
    ///
    /// Replies are not sent to `reply_to`: they are returned directly.
    /// If no reply is produced in time the outcome is `None`, or [`TestPublishError::Timeout`]
    /// when [`RpcOptions::raise_timeout`] is set. A call that does not reply counts as a
    /// reply that never arrives.
    pub async fn request(
        &self,
        message: MessageEnvelope<P>,
        options: RpcOptions,
    ) -> Result<Option<Decoded>, TestPublishError> {
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.group.settings().rpc_timeout());
        let delivery = self.deliver(inject_properties(message), true);
        let reply = match tokio::time::timeout(timeout, delivery).await {
            Ok(reply) => reply?,
            Err(_) => None,
        };
        match reply {
            Some(payload) => Ok(Some(payload.decode()?)),
            None if options.raise_timeout => Err(TestPublishError::Timeout(timeout)),
            None => Ok(None),
        }
    }

    fn deliver(
        &self,
        message: MessageEnvelope<P>,
        rpc: bool,
    ) -> BoxFuture<'_, Result<Reply, TestPublishError>> {
        async move {
            let mut rpc_reply = None;
            let mut matched = false;
            for subscriber in self.group.subscribers() {
                if subscriber.is_closed()
                    || !P::matches(subscriber.binding(), &message.route, &message.payload.headers)
                {
                    continue;
                }
                matched = true;

                let raw = P::build_message(message.clone(), Acker::noop());
                let mut envelope = subscriber.parse(raw).await;
                let (_, consumed) =
                    with_extensions(Extensions::new(), subscriber.consume(&mut envelope)).await;
                let consumed = match consumed {
                    Ok(Some(consumed)) => consumed,
                    Ok(None) => continue,
                    Err(HandlerError::Interrupt(signal)) => {
                        tracing::debug!(
                            %signal,
                            subscription = %subscriber.name(),
                            "Message processing was interrupted"
                        );
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                let Some(payload) = consumed.reply else {
                    continue;
                };

                for target in &consumed.publishers {
                    target.mock.record(&payload);
                    let chained = MessageEnvelope::<P>::new(target.route.clone(), payload.clone())
                        .with_correlation_id(envelope.correlation_id.clone());
                    self.deliver(inject_properties(chained), false).await?;
                }

                if rpc {
                    rpc_reply.get_or_insert(payload);
                } else if !envelope.reply_to.is_empty() {
                    let reply = MessageEnvelope::<P>::new(P::route_to(&envelope.reply_to), payload)
                        .with_correlation_id(envelope.correlation_id.clone());
                    self.deliver(inject_properties(reply), false).await?;
                }
            }
            if !matched {
                tracing::debug!(route = ?message.route, "No subscriber matches the message");
            }
            Ok(rpc_reply)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::{TestBroker, TestPublishError};
    use crate::consumers::{ConsumerGroup, HandlerError, Incoming, MessageHandler};
    use crate::envelope::Decoded;
    use crate::protocols::redis::Redis;
    use crate::publishers::MessageEnvelope;
    use crate::rpc::RpcOptions;
    use crate::testing::InMemoryTransport;
    use std::time::Duration;

    fn broker() -> TestBroker<Redis, ()> {
        let group = ConsumerGroup::<Redis, ()>::builder(InMemoryTransport::new(), ()).build();
        TestBroker::new(group)
    }

    #[tokio::test]
    async fn handler_failures_reach_the_publisher() {
        let broker = broker();
        broker
            .register(MessageHandler::builder("orders").handler(|_: Incoming<()>| async {
                Err::<(), _>(HandlerError::fatal(anyhow::anyhow!("boom")))
            }))
            .unwrap();

        let outcome = broker.publish(MessageEnvelope::new("orders", "hello")).await;
        assert!(matches!(outcome, Err(TestPublishError::Handler(_))));
    }

    #[tokio::test]
    async fn requests_without_a_reply_time_out() {
        let broker = broker();
        broker
            .register(
                MessageHandler::builder("silent")
                    .handler(|_: Incoming<()>| async { Ok::<_, HandlerError>(()) }),
            )
            .unwrap();
        let options = RpcOptions::with_timeout(Duration::from_millis(10));

        let reply = broker
            .request(MessageEnvelope::new("silent", "ping"), options)
            .await
            .unwrap();
        assert_eq!(reply, None);

        let outcome = broker
            .request(MessageEnvelope::new("silent", "ping"), options.raise_timeout())
            .await;
        assert!(matches!(outcome, Err(TestPublishError::Timeout(_))));
    }

    #[tokio::test]
    async fn replies_are_returned_to_the_requester() {
        let broker = broker();
        let handle = broker
            .register(
                MessageHandler::builder("ping")
                    .handler(|_: Incoming<()>| async { Ok::<_, HandlerError>("pong") }),
            )
            .unwrap();

        let reply = broker
            .request(MessageEnvelope::new("ping", "ping"), RpcOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, Some(Decoded::Text("pong".into())));
        assert_eq!(handle.mock().last_call(), Some(Decoded::Text("ping".into())));
    }
}
