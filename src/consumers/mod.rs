//! Facilities to receive, route and acknowledge messages.
//!
//! Check out [`ConsumerGroup`] as a starting point.
mod builders;
pub(crate) mod call;
pub(crate) mod dispatch;
mod error;
pub(crate) mod extensions;
mod filter;
mod handler;
mod incoming_message;
mod outcome;
mod processing_middleware;
mod subscriber;
mod telemetry_middleware;
mod watcher;
mod watcher_context;

pub use builders::{
    ConsumerGroup, ConsumerGroupBuilder, ConsumerGroupConfigurationBuilder, MessageHandler,
    MessageHandlerBuilder,
};
pub use call::{CallHandle, CallInfo, CallMock, PublishTarget, PublisherMock};
pub use error::{AmbiguousRouting, ErrorType, HandlerError, Interrupt, RegistrationError};
pub use extensions::{get_message_local_item, set_message_local_item};
pub use filter::{Filter, FilterFn, NotProcessed};
pub use handler::{ClosureHandler, Handler, TypedHandler};
pub use incoming_message::Incoming;
pub use outcome::Outcome;
pub use processing_middleware::{Next, ProcessingMiddleware};
pub use subscriber::{Consumed, Subscriber, SubscriberInfo};
pub use telemetry_middleware::{
    MessageMetadata, MessageProcessing, ProcessingError, ProcessingOutcome, TelemetryMiddleware,
};
pub use watcher::{EndlessWatcher, OneTryWatcher, PushBackWatcher, RetryPolicy, Watcher};
pub use watcher_context::WatcherContext;
