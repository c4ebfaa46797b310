use crate::helpers::{get_consumer_group, random_channel, WAIT};
use std::sync::{Arc, Mutex};
use switchyard::consumers::{
    get_message_local_item, set_message_local_item, HandlerError, Incoming, MessageHandler,
    MessageMetadata, MessageProcessing, ProcessingOutcome, TelemetryMiddleware,
};
use switchyard::envelope::BrokerAction;
use switchyard::protocols::redis::Redis;
use switchyard::publishers::MessageEnvelope;
use switchyard::testing::InMemoryTransport;

#[derive(Clone, Debug, PartialEq)]
struct Tenant(String);

#[derive(Debug, PartialEq)]
struct Observation {
    message_id: String,
    broker_action: Option<BrokerAction>,
    failed: bool,
    tenant: Option<Tenant>,
}

#[derive(Clone, Default)]
struct Observer(Arc<Mutex<Vec<Observation>>>);

#[async_trait::async_trait]
impl TelemetryMiddleware for Observer {
    async fn handle<'a>(
        &'a self,
        metadata: &'a MessageMetadata,
        next: MessageProcessing<'a>,
    ) -> ProcessingOutcome {
        let outcome = next.run(metadata).await;
        self.0.lock().unwrap().push(Observation {
            message_id: metadata.message_id.clone(),
            broker_action: outcome.broker_action(),
            failed: outcome.result().is_err(),
            tenant: get_message_local_item::<Tenant>(),
        });
        outcome
    }
}

#[tokio::test]
async fn telemetry_middlewares_observe_settlement_and_message_local_items() {
    // Arrange
    let observer = Observer::default();
    let transport = InMemoryTransport::<Redis>::new();
    let channel = random_channel();
    let consumer_group = get_consumer_group(&transport, ())
        .with_telemetry_middleware(observer.clone())
        .message_handler(MessageHandler::builder(channel.as_str()).handler(
            |incoming: Incoming<()>| async move {
                set_message_local_item(Tenant("acme".into()));
                if incoming.decoded().as_text() == Some("fail") {
                    return Err(HandlerError::fatal(anyhow::anyhow!("Unknown tenant")));
                }
                Ok(())
            },
        ))
        .build()
        .unwrap();
    consumer_group.start().await.unwrap();

    // Act
    consumer_group
        .publish(MessageEnvelope::new(channel.as_str(), "ok").with_message_id("m-1"))
        .await
        .unwrap();
    transport.wait_for_settlements(1, WAIT).await;
    consumer_group
        .publish(MessageEnvelope::new(channel.as_str(), "fail").with_message_id("m-2"))
        .await
        .unwrap();
    transport.wait_for_settlements(2, WAIT).await;
    consumer_group.close().await;

    // Assert
    let observations = observer.0.lock().unwrap();
    assert_eq!(
        *observations,
        vec![
            Observation {
                message_id: "m-1".into(),
                broker_action: Some(BrokerAction::Ack),
                failed: false,
                tenant: Some(Tenant("acme".into())),
            },
            Observation {
                message_id: "m-2".into(),
                broker_action: Some(BrokerAction::Reject),
                failed: true,
                tenant: Some(Tenant("acme".into())),
            },
        ]
    );
}
