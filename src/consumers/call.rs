use crate::consumers::{Filter, Handler, ProcessingMiddleware};
use crate::envelope::{Decoded, Decoder, Payload};
use crate::protocol::Protocol;
use std::sync::{Arc, Mutex, PoisonError};

/// A single registered call on a subscriber: filter, decoder, middlewares, handler and the
/// destinations its replies are chained to.
pub(crate) struct SubscriberCall<P: Protocol, C> {
    pub(crate) handler: Arc<dyn Handler<C>>,
    pub(crate) filter: Arc<dyn Filter>,
    /// `None` means the default decoding, driven by the content type.
    pub(crate) decoder: Option<Arc<dyn Decoder>>,
    /// Group middlewares first, then the ones registered on the call itself.
    pub(crate) middlewares: Vec<Arc<dyn ProcessingMiddleware<C>>>,
    pub(crate) publishers: Vec<PublishTarget<P>>,
    pub(crate) mock: CallMock,
    pub(crate) info: CallInfo,
}

/// A destination a call's reply is forwarded to.
#[derive(Debug, Clone)]
pub struct PublishTarget<P: Protocol> {
    pub route: P::Route,
    pub(crate) mock: PublisherMock,
}

impl<P: Protocol> PublishTarget<P> {
    pub fn mock(&self) -> &PublisherMock {
        &self.mock
    }
}

/// Documentation for a registered call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    pub name: String,
    pub description: Option<String>,
    /// The type the body is extracted into, for typed handlers.
    pub payload: Option<&'static str>,
}

/// Records the decoded bodies a call was invoked with.
///
/// Recording is off in production; [`TestBroker`] switches it on.
///
/// [`TestBroker`]: crate::testing::TestBroker
#[derive(Debug, Clone, Default)]
pub struct CallMock {
    calls: Arc<Mutex<Option<Vec<Decoded>>>>,
}

impl CallMock {
    pub(crate) fn enable(&self) {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        if calls.is_none() {
            *calls = Some(Vec::new());
        }
    }

    pub(crate) fn record(&self, decoded: &Decoded) {
        if let Some(calls) = self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            calls.push(decoded.clone());
        }
    }

    /// Every recorded invocation, oldest first.
    pub fn calls(&self) -> Vec<Decoded> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    pub fn last_call(&self) -> Option<Decoded> {
        self.calls().pop()
    }

    /// Forget the recorded invocations, keeping recording on if it was.
    pub fn reset(&self) {
        if let Some(calls) = self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            calls.clear();
        }
    }
}

/// Records the payloads forwarded to a chained publisher.
///
/// Recording is off in production; [`TestBroker`] switches it on.
///
/// [`TestBroker`]: crate::testing::TestBroker
#[derive(Debug, Clone, Default)]
pub struct PublisherMock {
    published: Arc<Mutex<Option<Vec<Payload>>>>,
}

impl PublisherMock {
    pub(crate) fn enable(&self) {
        let mut published = self.published.lock().unwrap_or_else(PoisonError::into_inner);
        if published.is_none() {
            *published = Some(Vec::new());
        }
    }

    pub(crate) fn record(&self, payload: &Payload) {
        if let Some(published) = self
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            published.push(payload.clone());
        }
    }

    pub fn published(&self) -> Vec<Payload> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_default()
    }
}

/// Returned by [`ConsumerGroup::register`]: a handle on the registered call, mostly useful in
/// tests to inspect its mocks.
///
/// [`ConsumerGroup::register`]: crate::consumers::ConsumerGroup::register
#[derive(Debug, Clone)]
pub struct CallHandle<P: Protocol> {
    pub(crate) subscription: String,
    pub(crate) binding: P::Binding,
    pub(crate) mock: CallMock,
    pub(crate) publishers: Vec<PublishTarget<P>>,
    pub(crate) info: CallInfo,
}

impl<P: Protocol> CallHandle<P> {
    /// The name of the subscription the call was registered on.
    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    pub fn binding(&self) -> &P::Binding {
        &self.binding
    }

    pub fn mock(&self) -> &CallMock {
        &self.mock
    }

    /// The chained publishers of the call, in registration order.
    pub fn publishers(&self) -> &[PublishTarget<P>] {
        &self.publishers
    }

    pub fn info(&self) -> &CallInfo {
        &self.info
    }
}
