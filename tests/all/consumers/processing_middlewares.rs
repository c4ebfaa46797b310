use crate::helpers::{get_consumer_group, random_channel, Journal, WAIT};
use switchyard::consumers::{
    ConsumerGroup, HandlerError, Incoming, MessageHandler, Next, ProcessingMiddleware, RetryPolicy,
};
use switchyard::envelope::{BrokerAction, Reply};
use switchyard::protocols::redis::Redis;
use switchyard::publishers::MessageEnvelope;
use switchyard::testing::{InMemoryTransport, TestBroker};

/// Records when the chain enters and leaves it.
struct Recorder(&'static str);

#[async_trait::async_trait]
impl ProcessingMiddleware<Journal> for Recorder {
    async fn handle<'a>(
        &'a self,
        incoming: Incoming<Journal>,
        next: Next<'a, Journal>,
    ) -> Result<Reply, HandlerError> {
        incoming.context.record(format!("{} before", self.0));
        let outcome = next.run(incoming.clone()).await;
        incoming.context.record(format!("{} after", self.0));
        outcome
    }
}

async fn journaling_handler(incoming: Incoming<Journal>) -> Result<(), HandlerError> {
    incoming.context.record("handler");
    Ok(())
}

#[tokio::test]
async fn group_middlewares_wrap_handler_middlewares() {
    // Arrange
    let consumer_group =
        ConsumerGroup::<Redis, Journal>::builder(InMemoryTransport::new(), Journal::default())
            .with_processing_middleware(Recorder("group"))
            .message_handler(
                MessageHandler::builder("orders")
                    .with_processing_middleware(Recorder("first"))
                    .with_processing_middleware(Recorder("second"))
                    .handler(journaling_handler),
            )
            .build()
            .unwrap();
    let broker = TestBroker::new(consumer_group);

    // Act
    broker
        .publish(MessageEnvelope::new("orders", "hello"))
        .await
        .unwrap();

    // Assert
    assert_eq!(
        broker.group().context().entries(),
        vec![
            "group before",
            "first before",
            "second before",
            "handler",
            "second after",
            "first after",
            "group after",
        ]
    );
}

#[tokio::test]
async fn a_middleware_can_abort_early_and_prevent_handler_execution() {
    struct AbortingMiddleware;

    #[async_trait::async_trait]
    impl<C: Send + Sync + 'static> ProcessingMiddleware<C> for AbortingMiddleware {
        async fn handle<'a>(
            &'a self,
            _incoming: Incoming<C>,
            _next: Next<'a, C>,
        ) -> Result<Reply, HandlerError> {
            // Never call the handler
            Ok(None)
        }
    }

    // Arrange
    let consumer_group =
        ConsumerGroup::<Redis, Journal>::builder(InMemoryTransport::new(), Journal::default())
            .with_processing_middleware(AbortingMiddleware)
            .message_handler(MessageHandler::builder("orders").handler(journaling_handler))
            .build()
            .unwrap();
    let broker = TestBroker::new(consumer_group);

    // Act
    broker
        .publish(MessageEnvelope::new("orders", "hello"))
        .await
        .unwrap();

    // Assert
    assert!(broker.group().context().entries().is_empty());
}

#[tokio::test]
async fn a_middleware_can_change_the_outcome_of_processing() {
    struct SwallowErrors;

    #[async_trait::async_trait]
    impl<C: Send + Sync + 'static> ProcessingMiddleware<C> for SwallowErrors {
        async fn handle<'a>(
            &'a self,
            incoming: Incoming<C>,
            next: Next<'a, C>,
        ) -> Result<Reply, HandlerError> {
            next.run(incoming).await.or(Ok(None))
        }
    }

    // Arrange
    let transport = InMemoryTransport::<Redis>::new();
    let channel = random_channel();
    let consumer_group = get_consumer_group(&transport, ())
        .message_handler(
            MessageHandler::builder(channel.as_str())
                .retry(RetryPolicy::Always)
                .with_processing_middleware(SwallowErrors)
                .handler(|_: Incoming<()>| async {
                    Err::<(), _>(HandlerError::transient(anyhow::anyhow!("Flaky dependency")))
                }),
        )
        .build()
        .unwrap();
    consumer_group.start().await.unwrap();

    // Act
    consumer_group
        .publish(MessageEnvelope::new(channel.as_str(), "hello"))
        .await
        .unwrap();

    // Assert
    let settlements = transport.wait_for_settlements(1, WAIT).await;
    assert_eq!(settlements[0].action, BrokerAction::Ack);

    consumer_group.close().await;
}
