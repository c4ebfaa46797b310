//! Middleware types are heavily inspired by `tide`'s approach to middleware.
use crate::consumers::{Handler, HandlerError, Incoming};
use crate::envelope::Reply;
use std::sync::Arc;

/// Middlewares to execute logic before and after the message handler function.
///
/// # Usecase
///
/// The main purpose of processing middlewares is to extract and centralise common non-business
/// logic that might impact the outcome of the processing.
///
/// Before the handler is executed, processing middlewares can:
///
/// - Extract information from the incoming message and [record it in the message extensions];
/// - Skip the execution of the handler entirely (e.g. an authorization middleware if auth fails);
///
/// After the handler has been executed, middlewares can:
///
/// - [Extract information recorded in the message extensions] to perform a task;
/// - Perform actions based on the handler's outcome (e.g. log errors);
/// - Modify the handler's outcome (e.g. change error severity, rewrite the reply).
///
/// Middlewares registered on the [`ConsumerGroup`] run before the ones registered on the
/// individual [`MessageHandler`].
///
/// # What middleware should I use?
///
/// Does the processing outcome (success/failure) change based on the logic executed in the middleware?
///
/// If yes, use a `ProcessingMiddleware`.
/// If no, use a [`TelemetryMiddleware`].
///
/// [record it in the message extensions]: crate::consumers::set_message_local_item
/// [Extract information recorded in the message extensions]: crate::consumers::get_message_local_item
/// [`TelemetryMiddleware`]: crate::consumers::TelemetryMiddleware
/// [`ConsumerGroup`]: crate::consumers::ConsumerGroup
/// [`MessageHandler`]: crate::consumers::MessageHandler
#[async_trait::async_trait]
pub trait ProcessingMiddleware<Context>: 'static + Send + Sync {
    /// Asynchronously handle the message, and return the handler's outcome.
    async fn handle<'a>(
        &'a self,
        incoming: Incoming<Context>,
        next: Next<'a, Context>,
    ) -> Result<Reply, HandlerError>;
}

/// The remainder of the processing middleware chain, including the final message handler.
#[allow(missing_debug_implementations)]
pub struct Next<'a, Context> {
    pub(super) handler: &'a dyn Handler<Context>,
    /// The remainder of the processing middleware chain.
    pub(super) next_middleware: &'a [Arc<dyn ProcessingMiddleware<Context>>],
}

impl<'a, Context: Send + Sync + 'static> Next<'a, Context> {
    /// Asynchronously execute the remaining processing middleware chain.
    pub async fn run(mut self, incoming: Incoming<Context>) -> Result<Reply, HandlerError> {
        if let Some((current, next)) = self.next_middleware.split_first() {
            self.next_middleware = next;
            current.handle(incoming, self).await
        } else {
            self.handler.handle(incoming).await
        }
    }
}
