//! Message-local storage, shared by the middlewares and the handler processing a message.
//!
//! Data recorded on the way in (`Broker` -> `Telemetry middlewares` -> `Processing middlewares`
//! -> `Handler`) is available on the way out, after the message has been settled.
//!
//! The storage lives in task-local state scoped to the processing of a single message,
//! so it does not have to be threaded through every signature.
//!
//! # Common use cases
//!
//! ## Measuring elapsed time
//!
//! Start a timer when message handling begins in a middleware, store the clock in the extensions,
//! retrieve the clock when message processing completes, compute the elapsed time.
//!
//! ## Enriching log context
//!
//! Capture additional information about a message that is not inferrable from its body on its
//! own and use it to enrich the closing log record of the processing span.
#![allow(clippy::declare_interior_mutable_const)] // silence tokio::task_local warning

use std::cell::RefCell;
use std::future::Future;
use task_local_extensions::Extensions;

tokio::task_local! {
    static EXTENSIONS: RefCell<Extensions>;
}

/// Run `fut` with `extensions` as message-local storage, returning what was stored in it
/// alongside the output of `fut`.
pub(crate) async fn with_extensions<T>(
    extensions: Extensions,
    fut: impl Future<Output = T>,
) -> (Extensions, T) {
    EXTENSIONS
        .scope(RefCell::new(extensions), async move {
            let response = fut.await;
            let extensions = RefCell::new(Extensions::new());

            EXTENSIONS.with(|ext| ext.swap(&extensions));

            (extensions.into_inner(), response)
        })
        .await
}

/// Retrieve an item from message-local storage based on its type.
///
/// It returns `None` if the message-local storage does not contain an item of that type or if
/// it is called outside of message processing.
pub fn get_message_local_item<T: Send + Sync + Clone + 'static>() -> Option<T> {
    EXTENSIONS
        .try_with(|e| e.borrow().get::<T>().cloned())
        .ok()
        .flatten()
}

/// Insert an item in message-local storage.
/// If another item with the same type was already stored it gets replaced.
pub fn set_message_local_item<T: Send + Sync + 'static>(item: T) {
    if EXTENSIONS
        .try_with(|e| e.borrow_mut().insert(item))
        .is_err()
    {
        tracing::warn!("Message-local storage is only available while processing a message");
    }
}
