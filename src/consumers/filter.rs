use crate::envelope::Envelope;

/// Decides whether a registered call accepts a message.
///
/// Filters see the envelope with `decoded_body` already populated by the call's decoder.
#[async_trait::async_trait]
pub trait Filter: Send + Sync + 'static {
    async fn accept(&self, envelope: &Envelope) -> bool;
}

/// The default filter: accept any message that no other call has processed yet.
///
/// This is what makes a subscriber with several calls dispatch each message to the first
/// call registered for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotProcessed;

#[async_trait::async_trait]
impl Filter for NotProcessed {
    async fn accept(&self, envelope: &Envelope) -> bool {
        !envelope.processed()
    }
}

/// Wraps a synchronous predicate. See [`MessageHandlerBuilder::filter`].
///
/// [`MessageHandlerBuilder::filter`]: crate::consumers::MessageHandlerBuilder::filter
pub struct FilterFn<F>(pub F);

#[async_trait::async_trait]
impl<F> Filter for FilterFn<F>
where
    F: Fn(&Envelope) -> bool + Send + Sync + 'static,
{
    async fn accept(&self, envelope: &Envelope) -> bool {
        (self.0)(envelope)
    }
}
