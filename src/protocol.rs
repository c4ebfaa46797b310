//! The seam between the broker-neutral dispatch machinery and each broker.
use crate::envelope::{Acker, Envelope, Headers};
use crate::publishers::MessageEnvelope;
use std::fmt::Debug;

/// Everything the dispatch machinery needs to know about a broker.
///
/// A protocol is a marker type: it names the binding, route and raw message types of the
/// broker and provides the pure functions that connect them. Network I/O lives in
/// [`Transport`] implementations.
///
/// [`Transport`]: crate::transport::Transport
pub trait Protocol: Debug + Clone + Copy + Default + Send + Sync + 'static {
    /// Human-readable protocol name, used in logs and documentation.
    const NAME: &'static str;

    /// How many messages a single subscription processes concurrently if the user does not say
    /// otherwise. `Some(1)` gives strictly sequential, in-order processing; `None` is unbounded.
    const DEFAULT_MAX_WORKERS: Option<usize>;

    /// Where a subscriber listens.
    type Binding: Clone + Debug + PartialEq + Send + Sync + 'static;
    /// Where a message is published.
    type Route: Clone + Debug + Send + Sync + 'static;
    /// The message as delivered by the broker client.
    type Raw: Send + 'static;

    /// Turn a native message into an [`Envelope`].
    fn parse(raw: Self::Raw) -> Envelope;

    /// Would a message published on `route`, carrying `headers`, reach a subscriber on `binding`?
    fn matches(binding: &Self::Binding, route: &Self::Route, headers: &Headers) -> bool;

    /// Build the native message a broker would deliver for an outgoing message.
    fn build_message(message: MessageEnvelope<Self>, acker: Acker) -> Self::Raw;

    /// The route to use when replying to a message whose `reply_to` is `destination`.
    fn route_to(destination: &str) -> Self::Route;

    /// The binding a request/reply inbox named `inbox` listens on.
    fn reply_binding(inbox: &str) -> Self::Binding;

    /// A stable, human-readable name for a binding.
    fn subscription_name(binding: &Self::Binding) -> String;

    fn describe(binding: &Self::Binding) -> BindingInfo;
}

/// A protocol-neutral description of a binding, for documentation generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingInfo {
    pub protocol: &'static str,
    pub destination: String,
    /// Exchange type, pattern flag, consumer group, etc.
    pub kind: Option<String>,
    pub attributes: Vec<(String, String)>,
}

/// Custom parsing of native messages into envelopes.
///
/// The default, [`DefaultParser`], delegates to [`Protocol::parse`].
#[async_trait::async_trait]
pub trait Parser<P: Protocol>: Send + Sync + 'static {
    async fn parse(&self, raw: P::Raw) -> Envelope;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultParser;

#[async_trait::async_trait]
impl<P: Protocol> Parser<P> for DefaultParser {
    async fn parse(&self, raw: P::Raw) -> Envelope {
        P::parse(raw)
    }
}

/// Pick the first non-empty value among the candidates.
pub(crate) fn first_non_empty<I>(candidates: I) -> Option<String>
where
    I: IntoIterator<Item = Option<String>>,
{
    candidates
        .into_iter()
        .flatten()
        .find(|value| !value.is_empty())
}
