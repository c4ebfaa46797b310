use crate::envelope::{Acker, Acknowledge};
use crate::protocols::amqp::configuration::RabbitMqSettings;
use crate::protocols::amqp::pool::{open_channel, ChannelManager, ChannelPool, ConnectionPool};
use crate::protocols::amqp::{outgoing_properties, topology, Amqp, AmqpBinding, AmqpMessage};
use crate::protocols::amqp::ConnectionFactory;
use crate::publishers::MessageEnvelope;
use crate::transport::{Subscription, Transport, TransportError};
use anyhow::Context;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, BasicRejectOptions,
};
use lapin::publisher_confirm::Confirmation;
use amq_protocol_types::FieldTable;
use lapin::{message::Delivery, Channel, Consumer};

/// A [`Transport`] for RabbitMQ, built on top of [`lapin`].
///
/// Connections are pooled. Every subscription gets its own channel with the configured
/// prefetch count; publishing goes through a pool of channels with publisher confirms enabled.
pub struct LapinTransport {
    connections: ConnectionPool,
    channels: ChannelPool,
    prefetch_count: u16,
}

impl LapinTransport {
    /// Build a transport. No connection is opened until it is needed.
    pub fn new(settings: &RabbitMqSettings) -> Result<Self, anyhow::Error> {
        let factory = ConnectionFactory::new_from_config(settings)?;
        Self::with_factory(factory, settings)
    }

    /// Build a transport on top of a custom [`ConnectionFactory`], e.g. with a custom TLS
    /// connector.
    pub fn with_factory(
        factory: ConnectionFactory,
        settings: &RabbitMqSettings,
    ) -> Result<Self, anyhow::Error> {
        let connections = ConnectionPool::builder(factory)
            .max_size(settings.max_connections)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build the RabbitMQ connection pool: {e}"))?;
        let channels = ChannelPool::builder(ChannelManager::new(connections.clone()))
            .max_size(settings.max_channels)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build the RabbitMQ channel pool: {e}"))?;
        Ok(Self {
            connections,
            channels,
            prefetch_count: settings.prefetch_count,
        })
    }

    async fn subscribe_to(&self, binding: &AmqpBinding) -> Result<LapinSubscription, anyhow::Error> {
        let channel = open_channel(&self.connections).await?;
        topology::declare(&channel, binding)
            .await
            .context("Failed to declare the topology of the binding")?;
        channel
            .basic_qos(self.prefetch_count, BasicQosOptions::default())
            .await?;
        let consumer = channel
            .basic_consume(
                &binding.queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(LapinSubscription { channel, consumer })
    }

    async fn publish_confirmed(&self, message: MessageEnvelope<Amqp>) -> Result<(), anyhow::Error> {
        let channel = self.channels.get().await.map_err(super::PoolError::from)?;
        let properties = outgoing_properties(&message);
        let confirmation = channel
            .basic_publish(
                &message.route.exchange,
                &message.route.routing_key,
                BasicPublishOptions::default(),
                &message.payload.body,
                properties,
            )
            .await?
            .await?;
        if let Confirmation::Nack(_) = confirmation {
            anyhow::bail!("The broker did not confirm the message");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport<Amqp> for LapinTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connections
            .get()
            .await
            .map(drop)
            .map_err(|e| TransportError::Connection(super::PoolError::from(e).into()))
    }

    async fn subscribe(
        &self,
        binding: &AmqpBinding,
    ) -> Result<Box<dyn Subscription<Amqp>>, TransportError> {
        match self.subscribe_to(binding).await {
            Ok(subscription) => Ok(Box::new(subscription)),
            Err(e) => Err(TransportError::Subscribe(e)),
        }
    }

    async fn publish(&self, message: MessageEnvelope<Amqp>) -> Result<(), TransportError> {
        self.publish_confirmed(message)
            .await
            .map_err(TransportError::Publish)
    }
}

struct LapinSubscription {
    channel: Channel,
    consumer: Consumer,
}

#[async_trait::async_trait]
impl Subscription<Amqp> for LapinSubscription {
    async fn receive(&mut self) -> Result<Option<AmqpMessage>, TransportError> {
        match self.consumer.next().await {
            Some(Ok(delivery)) => Ok(Some(into_message(delivery))),
            Some(Err(e)) => Err(TransportError::Connection(e.into())),
            None => Ok(None),
        }
    }

    async fn unsubscribe(self: Box<Self>) -> Result<(), TransportError> {
        let tag = self.consumer.tag();
        self.channel
            .basic_cancel(tag.as_str(), BasicCancelOptions::default())
            .await
            .map_err(|e| TransportError::Subscribe(e.into()))?;
        self.channel
            .close(200, "Subscription closed")
            .await
            .map_err(|e| TransportError::Subscribe(e.into()))
    }
}

fn into_message(delivery: Delivery) -> AmqpMessage {
    AmqpMessage {
        delivery_tag: delivery.delivery_tag,
        exchange: delivery.exchange.as_str().to_owned(),
        routing_key: delivery.routing_key.as_str().to_owned(),
        redelivered: delivery.redelivered,
        properties: delivery.properties,
        data: delivery.data,
        acker: Acker::new(LapinAcker(delivery.acker)),
    }
}

/// Settles a delivery on the channel it was received on.
struct LapinAcker(lapin::acker::Acker);

#[async_trait::async_trait]
impl Acknowledge for LapinAcker {
    async fn ack(&self) -> Result<(), anyhow::Error> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .context("Failed to ack the delivery")?;
        Ok(())
    }

    async fn nack(&self) -> Result<(), anyhow::Error> {
        self.0
            .nack(BasicNackOptions {
                requeue: true,
                ..BasicNackOptions::default()
            })
            .await
            .context("Failed to nack the delivery")?;
        Ok(())
    }

    async fn reject(&self) -> Result<(), anyhow::Error> {
        self.0
            .reject(BasicRejectOptions { requeue: false })
            .await
            .context("Failed to reject the delivery")?;
        Ok(())
    }
}
