use crate::envelope::{Acker, Acknowledge, BrokerAction};
use crate::protocol::Protocol;
use crate::publishers::MessageEnvelope;
use crate::transport::{Subscription, Transport, TransportError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// A [`Transport`] keeping messages in memory.
///
/// Each subscribed binding gets a queue that outlives its subscriptions, like a durable queue:
/// messages published while a dispatcher is reconnecting are delivered once it is back.
/// Messages are routed with [`Protocol::matches`]; a nacked message goes back to its queue.
///
/// Clones share the same queues, so a test can keep a handle on the transport it hands over to
/// a [`ConsumerGroup`](crate::consumers::ConsumerGroup).
pub struct InMemoryTransport<P: Protocol> {
    inner: Arc<Inner<P>>,
}

struct Inner<P: Protocol> {
    queues: Mutex<Vec<Queue<P>>>,
    published: Mutex<Vec<MessageEnvelope<P>>>,
    settlements: Mutex<Vec<Settlement>>,
    subscribe_failures: AtomicUsize,
    receive_failures: AtomicUsize,
    subscriptions: AtomicUsize,
    changed: Notify,
}

struct Queue<P: Protocol> {
    binding: P::Binding,
    sender: mpsc::UnboundedSender<MessageEnvelope<P>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MessageEnvelope<P>>>>,
}

/// How a delivery was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub message_id: String,
    pub action: BrokerAction,
}

impl<P: Protocol> Clone for InMemoryTransport<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Protocol> Default for InMemoryTransport<P> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(Vec::new()),
                published: Mutex::new(Vec::new()),
                settlements: Mutex::new(Vec::new()),
                subscribe_failures: AtomicUsize::new(0),
                receive_failures: AtomicUsize::new(0),
                subscriptions: AtomicUsize::new(0),
                changed: Notify::new(),
            }),
        }
    }
}

impl<P: Protocol> InMemoryTransport<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message published so far, in order, including replies.
    pub fn published(&self) -> Vec<MessageEnvelope<P>> {
        lock(&self.inner.published).clone()
    }

    /// Every settlement so far, in order.
    pub fn settlements(&self) -> Vec<Settlement> {
        lock(&self.inner.settlements).clone()
    }

    /// How many subscriptions were opened successfully.
    pub fn subscriptions(&self) -> usize {
        self.inner.subscriptions.load(Ordering::SeqCst)
    }

    /// Make the next `count` subscription attempts fail.
    pub fn fail_subscriptions(&self, count: usize) {
        self.inner.subscribe_failures.fetch_add(count, Ordering::SeqCst);
    }

    /// Make the next `count` receive calls fail, as if the connection dropped.
    pub fn fail_receives(&self, count: usize) {
        self.inner.receive_failures.fetch_add(count, Ordering::SeqCst);
        // Wake up the receivers waiting for a message.
        for queue in lock(&self.inner.queues).iter() {
            let _ = queue.sender.send(Wakeup::message());
        }
    }

    /// Wait until at least `count` settlements happened, or `timeout` elapses.
    pub async fn wait_for_settlements(&self, count: usize, timeout: Duration) -> Vec<Settlement> {
        self.wait_for(timeout, || {
            let settlements = self.settlements();
            (settlements.len() >= count).then_some(settlements)
        })
        .await
        .unwrap_or_else(|| self.settlements())
    }

    /// Wait until at least `count` messages were published, or `timeout` elapses.
    pub async fn wait_for_published(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Vec<MessageEnvelope<P>> {
        self.wait_for(timeout, || {
            let published = self.published();
            (published.len() >= count).then_some(published)
        })
        .await
        .unwrap_or_else(|| self.published())
    }

    /// Wait until at least `count` subscriptions were opened, or `timeout` elapses.
    pub async fn wait_for_subscriptions(&self, count: usize, timeout: Duration) -> usize {
        self.wait_for(timeout, || {
            let subscriptions = self.subscriptions();
            (subscriptions >= count).then_some(subscriptions)
        })
        .await
        .unwrap_or_else(|| self.subscriptions())
    }

    async fn wait_for<T>(&self, timeout: Duration, mut check: impl FnMut() -> Option<T>) -> Option<T> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let changed = self.inner.changed.notified();
            if let Some(value) = check() {
                return Some(value);
            }
            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return check();
            }
        }
    }

    fn queue_receiver(
        &self,
        binding: &P::Binding,
    ) -> (
        mpsc::UnboundedSender<MessageEnvelope<P>>,
        Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MessageEnvelope<P>>>>,
    ) {
        let mut queues = lock(&self.inner.queues);
        if let Some(queue) = queues.iter().find(|q| &q.binding == binding) {
            return (queue.sender.clone(), Arc::clone(&queue.receiver));
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        queues.push(Queue {
            binding: binding.clone(),
            sender: sender.clone(),
            receiver: Arc::clone(&receiver),
        });
        (sender, receiver)
    }
}

/// Placeholder sent through a queue to interrupt a pending receive.
struct Wakeup;

impl Wakeup {
    fn message<P: Protocol>() -> MessageEnvelope<P> {
        MessageEnvelope {
            payload: Default::default(),
            route: P::route_to(WAKEUP_ROUTE),
            reply_to: None,
            correlation_id: None,
            message_id: Some(WAKEUP_ROUTE.to_owned()),
            timestamp: None,
        }
    }

    fn is_wakeup<P: Protocol>(message: &MessageEnvelope<P>) -> bool {
        message.message_id.as_deref() == Some(WAKEUP_ROUTE)
    }
}

const WAKEUP_ROUTE: &str = "switchyard.in-memory.wakeup";

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait::async_trait]
impl<P: Protocol> Transport<P> for InMemoryTransport<P> {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn subscribe(
        &self,
        binding: &P::Binding,
    ) -> Result<Box<dyn Subscription<P>>, TransportError> {
        if take_one(&self.inner.subscribe_failures) {
            return Err(TransportError::Subscribe(anyhow::anyhow!(
                "Injected subscription failure"
            )));
        }
        let (sender, receiver) = self.queue_receiver(binding);
        self.inner.subscriptions.fetch_add(1, Ordering::SeqCst);
        self.inner.changed.notify_waiters();
        Ok(Box::new(InMemorySubscription {
            transport: self.clone(),
            sender,
            receiver,
        }))
    }

    async fn publish(&self, message: MessageEnvelope<P>) -> Result<(), TransportError> {
        lock(&self.inner.published).push(message.clone());
        for queue in lock(&self.inner.queues).iter() {
            if P::matches(&queue.binding, &message.route, &message.payload.headers) {
                let _ = queue.sender.send(message.clone());
            }
        }
        self.inner.changed.notify_waiters();
        Ok(())
    }
}

struct InMemorySubscription<P: Protocol> {
    transport: InMemoryTransport<P>,
    sender: mpsc::UnboundedSender<MessageEnvelope<P>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MessageEnvelope<P>>>>,
}

#[async_trait::async_trait]
impl<P: Protocol> Subscription<P> for InMemorySubscription<P> {
    async fn receive(&mut self) -> Result<Option<P::Raw>, TransportError> {
        loop {
            if take_one(&self.transport.inner.receive_failures) {
                return Err(TransportError::Connection(anyhow::anyhow!(
                    "Injected connection failure"
                )));
            }
            let message = match self.receiver.lock().await.recv().await {
                Some(message) => message,
                None => return Ok(None),
            };
            if Wakeup::is_wakeup(&message) {
                continue;
            }
            let acker = Acker::new(InMemoryAcker {
                transport: self.transport.clone(),
                requeue: self.sender.clone(),
                message: message.clone(),
            });
            return Ok(Some(P::build_message(message, acker)));
        }
    }

    async fn unsubscribe(self: Box<Self>) -> Result<(), TransportError> {
        Ok(())
    }
}

struct InMemoryAcker<P: Protocol> {
    transport: InMemoryTransport<P>,
    requeue: mpsc::UnboundedSender<MessageEnvelope<P>>,
    message: MessageEnvelope<P>,
}

impl<P: Protocol> InMemoryAcker<P> {
    fn record(&self, action: BrokerAction) {
        lock(&self.transport.inner.settlements).push(Settlement {
            message_id: self.message.message_id().to_owned(),
            action,
        });
        self.transport.inner.changed.notify_waiters();
    }
}

#[async_trait::async_trait]
impl<P: Protocol> Acknowledge for InMemoryAcker<P> {
    async fn ack(&self) -> Result<(), anyhow::Error> {
        self.record(BrokerAction::Ack);
        Ok(())
    }

    async fn nack(&self) -> Result<(), anyhow::Error> {
        self.record(BrokerAction::Nack);
        self.requeue
            .send(self.message.clone())
            .map_err(|_| anyhow::anyhow!("The queue is gone"))
    }

    async fn reject(&self) -> Result<(), anyhow::Error> {
        self.record(BrokerAction::Reject);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::InMemoryTransport;
    use crate::protocols::redis::{Redis, RedisBinding};
    use crate::publishers::MessageEnvelope;
    use crate::transport::Transport;
    use std::time::Duration;

    #[tokio::test]
    async fn published_messages_reach_matching_queues_only() {
        let transport = InMemoryTransport::<Redis>::new();
        let mut news = transport.subscribe(&RedisBinding::pattern("news.*")).await.unwrap();
        let mut weather = transport.subscribe(&RedisBinding::channel("weather")).await.unwrap();

        transport
            .publish(MessageEnvelope::new("news.sport", "goal").with_message_id("m-1"))
            .await
            .unwrap();

        let received = news.receive().await.unwrap().unwrap();
        assert_eq!(received.channel, "news.sport");
        let nothing = tokio::time::timeout(Duration::from_millis(50), weather.receive()).await;
        assert!(nothing.is_err());
        assert_eq!(transport.published().len(), 1);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_once() {
        let transport = InMemoryTransport::<Redis>::new();
        transport.fail_subscriptions(1);
        assert!(transport.subscribe(&"orders".into()).await.is_err());
        let mut subscription = transport.subscribe(&"orders".into()).await.unwrap();

        transport.fail_receives(1);
        assert!(subscription.receive().await.is_err());

        transport
            .publish(MessageEnvelope::new("orders", "hello"))
            .await
            .unwrap();
        assert!(subscription.receive().await.unwrap().is_some());
    }
}
