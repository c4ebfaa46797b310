//! Request/reply on top of plain publish/subscribe.
//!
//! A request is published with a `reply_to` pointing at the group's reply inbox and a fresh
//! correlation id. The reply inbox subscriber hands every reply over to the waiting requester
//! through the [`ReplyTable`], keyed by correlation id.
use crate::consumers::{Handler, HandlerError, Incoming};
use crate::envelope::{Decoded, Reply};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{self, Poll};
use std::time::Duration;
use tokio::sync::oneshot;

/// Options for a request expecting a reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RpcOptions {
    /// How long to wait for the reply. Defaults to the group's `rpc_timeout_ms`.
    pub timeout: Option<Duration>,
    /// Fail with a timeout error instead of returning `None` when no reply arrives in time.
    pub raise_timeout: bool,
}

impl RpcOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            raise_timeout: false,
        }
    }

    #[must_use]
    pub fn raise_timeout(mut self) -> Self {
        self.raise_timeout = true;
        self
    }
}

/// Pending requests, keyed by correlation id.
///
/// Registration and resolution are atomic per key: a reply resolves at most one requester, and
/// a requester that gave up never receives a late reply.
#[derive(Debug, Default)]
pub struct ReplyTable {
    pending: Mutex<HashMap<String, oneshot::Sender<Decoded>>>,
}

#[derive(thiserror::Error, Debug)]
#[error("A request with correlation id `{0}` is already waiting for a reply")]
pub struct DuplicateCorrelationId(pub String);

impl ReplyTable {
    /// Start waiting for the reply to `correlation_id`.
    ///
    /// Dropping the returned [`PendingReply`] stops waiting.
    pub fn register(
        &self,
        correlation_id: &str,
    ) -> Result<PendingReply<'_>, DuplicateCorrelationId> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.contains_key(correlation_id) {
            return Err(DuplicateCorrelationId(correlation_id.to_owned()));
        }
        let (sender, receiver) = oneshot::channel();
        pending.insert(correlation_id.to_owned(), sender);
        Ok(PendingReply {
            table: self,
            correlation_id: correlation_id.to_owned(),
            receiver,
        })
    }

    /// Hand `reply` over to the requester waiting on `correlation_id`.
    ///
    /// Returns `false` if nobody was waiting for it.
    pub fn resolve(&self, correlation_id: &str, reply: Decoded) -> bool {
        let sender = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(correlation_id);
        match sender {
            Some(sender) => sender.send(reply).is_ok(),
            None => false,
        }
    }

    /// Stop waiting for the reply to `correlation_id`.
    pub fn cancel(&self, correlation_id: &str) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(correlation_id);
    }

    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A request waiting for its reply, resolved by [`ReplyTable::resolve`].
///
/// Fails if the table is dropped before the reply arrives.
pub struct PendingReply<'a> {
    table: &'a ReplyTable,
    correlation_id: String,
    receiver: oneshot::Receiver<Decoded>,
}

impl Future for PendingReply<'_> {
    type Output = Result<Decoded, oneshot::error::RecvError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx)
    }
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        self.table.cancel(&self.correlation_id);
    }
}

/// The handler of the reply inbox subscriber.
pub(crate) struct ReplyResolver {
    replies: Arc<ReplyTable>,
}

impl ReplyResolver {
    pub(crate) fn new(replies: Arc<ReplyTable>) -> Self {
        Self { replies }
    }
}

#[async_trait::async_trait]
impl<Context: Send + Sync + 'static> Handler<Context> for ReplyResolver {
    async fn handle(&self, incoming: Incoming<Context>) -> Result<Reply, HandlerError> {
        let correlation_id = &incoming.envelope.correlation_id;
        if !self
            .replies
            .resolve(correlation_id, incoming.decoded().clone())
        {
            tracing::debug!(
                correlation_id = %correlation_id,
                "Received a reply nobody is waiting for"
            );
        }
        Ok(None)
    }
}
