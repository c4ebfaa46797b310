//! Facilities to publish messages to a broker. Check out [`Publisher`] as a starting point.
mod message_envelope;
mod publisher;
mod publisher_middleware;

pub use message_envelope::MessageEnvelope;
pub(crate) use publisher::inject_properties;
pub use publisher::{Publisher, PublisherBuilder, PublisherError};
pub use publisher_middleware::{Next, PublisherMiddleware};
