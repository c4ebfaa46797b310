//! Test doubles: run the dispatch machinery without a broker.
//!
//! - [`TestBroker`] publishes in-process, straight into the registered subscribers, and
//!   surfaces handler failures to the caller.
//! - [`InMemoryTransport`] is a [`Transport`](crate::transport::Transport) backed by in-memory
//!   queues, to exercise the production dispatch loop end to end.
//! - [`RecordingAcker`] counts how a message was settled.
mod acker;
mod broker;
mod in_memory;

pub use acker::RecordingAcker;
pub use broker::{TestBroker, TestPublishError};
pub use in_memory::{InMemoryTransport, Settlement};

use crate::envelope::{Acker, Payload};
use crate::protocol::Protocol;
use crate::publishers::{inject_properties, MessageEnvelope};

/// Build the native message a broker would deliver for `payload` published on `route`.
///
/// Identifiers are assigned the way the publisher assigns them. The message settles into
/// `acker`, use [`Acker::noop`] if settlement does not matter.
pub fn build_message<P: Protocol>(
    route: impl Into<P::Route>,
    payload: impl Into<Payload>,
    acker: Acker,
) -> P::Raw {
    P::build_message(inject_properties(MessageEnvelope::new(route, payload)), acker)
}
