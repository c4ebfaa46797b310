//! The `Handler` trait is heavily inspired by `tide`'s approach to endpoint handlers.
use crate::consumers::{HandlerError, Incoming};
use crate::envelope::{IntoReply, Reply};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::marker::PhantomData;

/// Implementers of the `Handler` trait can be registered on a [`ConsumerGroup`], via a
/// [`MessageHandler`], to process the messages received by a subscriber.
///
/// # Scope
///
/// `handle` does not get access to the underlying broker connection.
/// The framework takes care of settling the message with the broker according to the outcome
/// of processing (check out [`HandlerError`] for more details) and of delivering the
/// returned [`Reply`] to the `reply_to` destination and to any chained publisher.
///
/// # Implementers
///
/// While you can implement `Handler` for a struct or enum, most of the time you will be
/// relying on [`ClosureHandler`] and [`TypedHandler`], which wrap async functions with
/// a matching signature.
///
/// [`ConsumerGroup`]: crate::consumers::ConsumerGroup
/// [`MessageHandler`]: crate::consumers::MessageHandler
#[async_trait::async_trait]
pub trait Handler<Context>: Send + Sync + 'static {
    async fn handle(&self, incoming: Incoming<Context>) -> Result<Reply, HandlerError>;
}

/// Adapts an async function taking the whole [`Incoming`] message.
pub struct ClosureHandler<F>(pub F);

#[async_trait::async_trait]
impl<Context, F, Fut, R, E> Handler<Context> for ClosureHandler<F>
where
    Context: Send + Sync + 'static,
    F: Fn(Incoming<Context>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: IntoReply + Send + 'static,
    E: Into<HandlerError> + Send + 'static,
{
    async fn handle(&self, incoming: Incoming<Context>) -> Result<Reply, HandlerError> {
        (self.0)(incoming)
            .await
            .map(IntoReply::into_reply)
            .map_err(Into::into)
    }
}

/// Adapts an async function taking a strongly-typed body, extracted from the decoded message,
/// alongside the [`Incoming`] message.
///
/// A body that cannot be extracted fails processing with a validation error before the
/// function is invoked.
pub struct TypedHandler<F, T> {
    f: F,
    _body: PhantomData<fn() -> T>,
}

impl<F, T> TypedHandler<F, T> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _body: PhantomData,
        }
    }
}

#[async_trait::async_trait]
impl<Context, F, T, Fut, R, E> Handler<Context> for TypedHandler<F, T>
where
    Context: Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    F: Fn(T, Incoming<Context>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: IntoReply + Send + 'static,
    E: Into<HandlerError> + Send + 'static,
{
    async fn handle(&self, incoming: Incoming<Context>) -> Result<Reply, HandlerError> {
        let body: T = incoming.body()?;
        (self.f)(body, incoming)
            .await
            .map(IntoReply::into_reply)
            .map_err(Into::into)
    }
}
