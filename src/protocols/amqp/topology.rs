//! Declaring the queues and exchanges a binding needs before consuming from it.
use crate::protocols::amqp::convenience::headers_to_field_table;
use crate::protocols::amqp::{AmqpBinding, ExchangeType};
use amq_protocol_types::{AMQPValue, FieldTable};
use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::{Channel, ExchangeKind};

/// The dead letter exchange and queue of `queue`.
fn dead_letter_name(queue: &str) -> String {
    format!("{queue}.deadletter")
}

/// Declare the queue of `binding`, its dead letter queue and its exchange, then bind them.
/// Declarations are idempotent: existing entities with the same settings are left untouched.
#[tracing::instrument(skip_all, fields(queue = %binding.queue))]
pub(crate) async fn declare(channel: &Channel, binding: &AmqpBinding) -> Result<(), lapin::Error> {
    let mut queue_arguments = FieldTable::default();
    if binding.dead_letter {
        let dead_letter = dead_letter_name(&binding.queue);
        declare_dead_letter(channel, &dead_letter).await?;
        queue_arguments.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(dead_letter.as_str().into()),
        );
    }
    channel
        .queue_declare(
            &binding.queue,
            QueueDeclareOptions {
                durable: binding.durable,
                auto_delete: binding.auto_delete,
                ..QueueDeclareOptions::default()
            },
            queue_arguments,
        )
        .await?;

    let exchange = match &binding.exchange {
        Some(exchange) if !exchange.name.is_empty() => exchange,
        _ => return Ok(()),
    };
    channel
        .exchange_declare(
            &exchange.name,
            exchange.kind.into(),
            ExchangeDeclareOptions {
                durable: exchange.durable,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    let (routing_key, arguments) = match exchange.kind {
        ExchangeType::Direct | ExchangeType::Topic => (binding.binding_key(), FieldTable::default()),
        ExchangeType::Fanout => ("", FieldTable::default()),
        ExchangeType::Headers => ("", headers_to_field_table(&binding.bind_arguments)),
    };
    channel
        .queue_bind(
            &binding.queue,
            &exchange.name,
            routing_key,
            QueueBindOptions::default(),
            arguments,
        )
        .await
}

async fn declare_dead_letter(channel: &Channel, name: &str) -> Result<(), lapin::Error> {
    channel
        .exchange_declare(
            name,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                durable: true,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    channel
        .queue_declare(
            name,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    channel
        .queue_bind(name, name, "", QueueBindOptions::default(), FieldTable::default())
        .await
}
