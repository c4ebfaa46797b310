//! `switchyard` routes messages received from a broker to the handlers registered for them,
//! and settles every delivery (ack, nack or reject) according to the outcome of processing.
//!
//! It speaks AMQP (RabbitMQ), Redis pub/sub, Kafka, NATS and SQS through the same machinery:
//! a [`Protocol`](crate::protocol::Protocol) describes the broker, a
//! [`Transport`](crate::transport::Transport) talks to it.
//!
//! [`ConsumerGroup`](crate::consumers::ConsumerGroup) is the best starting point to learn more
//! about what `switchyard` provides and how to leverage it.
//! [`TestBroker`](crate::testing::TestBroker) runs the same dispatch logic in-process, for tests.

pub mod configuration;
pub mod consumers;
pub mod envelope;
pub mod protocol;
pub mod protocols;
pub mod publishers;
pub mod routing;
pub mod rpc;
pub mod testing;
pub mod transport;

pub use configuration::DispatchSettings;
