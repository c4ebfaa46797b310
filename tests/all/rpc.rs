use crate::helpers::{get_consumer_group, random_channel};
use std::time::{Duration, Instant};
use switchyard::consumers::{HandlerError, Incoming, MessageHandler};
use switchyard::envelope::Decoded;
use switchyard::protocols::redis::Redis;
use switchyard::publishers::{MessageEnvelope, PublisherError};
use switchyard::rpc::RpcOptions;
use switchyard::testing::InMemoryTransport;

#[tokio::test]
async fn requests_receive_the_reply_of_the_handler() {
    // Arrange
    let transport = InMemoryTransport::<Redis>::new();
    let channel = random_channel();
    let consumer_group = get_consumer_group(&transport, ())
        .message_handler(MessageHandler::builder(channel.as_str()).handler(
            |incoming: Incoming<()>| async move {
                match incoming.decoded().as_text() {
                    Some("ping") => Ok("pong"),
                    _ => Err(HandlerError::fatal(anyhow::anyhow!("Unexpected request"))),
                }
            },
        ))
        .build()
        .unwrap();
    consumer_group.start().await.unwrap();

    // Act
    let reply = consumer_group
        .request(
            MessageEnvelope::new(channel.as_str(), "ping"),
            RpcOptions::with_timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap();

    // Assert
    assert_eq!(reply, Some(Decoded::Text("pong".into())));
    let request = &transport.published()[0];
    assert!(request
        .reply_to
        .as_deref()
        .unwrap()
        .starts_with("switchyard.reply."));

    consumer_group.close().await;
}

#[tokio::test]
async fn requests_without_a_reply_time_out() {
    // Arrange
    let transport = InMemoryTransport::<Redis>::new();
    let channel = random_channel();
    let consumer_group = get_consumer_group(&transport, ())
        .reply_inbox("replies")
        .message_handler(
            MessageHandler::builder(channel.as_str())
                .handler(|_: Incoming<()>| async { Ok::<_, HandlerError>(()) }),
        )
        .build()
        .unwrap();
    consumer_group.start().await.unwrap();
    let options = RpcOptions::with_timeout(Duration::from_millis(50));

    // Act
    let reply = consumer_group
        .request(MessageEnvelope::new(channel.as_str(), "ping"), options)
        .await
        .unwrap();
    let error = consumer_group
        .request(
            MessageEnvelope::new(channel.as_str(), "ping"),
            options.raise_timeout(),
        )
        .await
        .unwrap_err();

    // Assert
    assert_eq!(reply, None);
    assert!(matches!(error, PublisherError::TimeoutError));
    assert_eq!(transport.published()[0].reply_to.as_deref(), Some("replies"));

    consumer_group.close().await;
}

#[tokio::test]
async fn requests_to_slow_handlers_give_up_after_the_timeout() {
    // Arrange
    let transport = InMemoryTransport::<Redis>::new();
    let channel = random_channel();
    let consumer_group = get_consumer_group(&transport, ())
        .message_handler(MessageHandler::builder(channel.as_str()).handler(
            |_: Incoming<()>| async {
                tokio::time::sleep(Duration::from_millis(1_500)).await;
                Ok::<_, HandlerError>("pong")
            },
        ))
        .build()
        .unwrap();
    consumer_group.start().await.unwrap();
    let options = RpcOptions::with_timeout(Duration::from_millis(50));

    // Act
    let started = Instant::now();
    let reply = consumer_group
        .request(MessageEnvelope::new(channel.as_str(), "ping"), options)
        .await
        .unwrap();
    let error = consumer_group
        .request(
            MessageEnvelope::new(channel.as_str(), "ping"),
            options.raise_timeout(),
        )
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    // Assert
    assert_eq!(reply, None);
    assert!(matches!(error, PublisherError::TimeoutError));
    assert!(elapsed < Duration::from_secs(1));

    consumer_group.close().await;
}

#[tokio::test]
async fn abandoned_requests_stop_waiting_for_their_reply() {
    // Arrange
    let transport = InMemoryTransport::<Redis>::new();
    let consumer_group = get_consumer_group(&transport, ()).build();
    consumer_group.start().await.unwrap();
    let request = consumer_group.request(
        MessageEnvelope::new(random_channel().as_str(), "ping"),
        RpcOptions::with_timeout(Duration::from_secs(30)),
    );

    // Act
    let outcome = tokio::time::timeout(Duration::from_millis(50), request).await;

    // Assert
    assert!(outcome.is_err());
    assert_eq!(transport.published().len(), 1);
    assert_eq!(consumer_group.pending_requests(), 0);

    consumer_group.close().await;
}
