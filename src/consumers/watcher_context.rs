use crate::consumers::outcome::Outcome;
use crate::consumers::watcher::Watcher;
use crate::envelope::{AckError, Acker, BrokerAction, Envelope};

/// Scopes a single processing attempt of a message.
///
/// [`WatcherContext::enter`] records the attempt with the subscriber's [`Watcher`];
/// [`WatcherContext::exit`] settles the message with the broker according to the [`Outcome`]
/// and keeps the attempt bookkeeping consistent:
///
/// | outcome                  | settlement                        | attempts      |
/// |--------------------------|-----------------------------------|---------------|
/// | `Ack`, `StopConsuming`   | ack                               | cleared       |
/// | `Nack`                   | nack                              | kept          |
/// | `Reject`                 | reject                            | cleared       |
/// | `Skip`                   | none                              | cleared       |
/// | `Failure`, exhausted     | reject                            | cleared       |
/// | `Failure`, not exhausted | nack                              | kept          |
///
/// Attempts are only kept for messages the broker redelivers after a nack (see
/// [`Acker::redelivers`]). Otherwise a nack is terminal and clears them as well.
///
/// Settlement goes through the message [`Acker`]: if the handler already settled the message
/// manually, the instruction is a no-op.
pub struct WatcherContext<'a> {
    watcher: &'a dyn Watcher,
    message_id: String,
    acker: Acker,
}

impl<'a> WatcherContext<'a> {
    pub fn enter(watcher: &'a dyn Watcher, envelope: &Envelope) -> Self {
        watcher.add(&envelope.message_id);
        Self {
            watcher,
            message_id: envelope.message_id.clone(),
            acker: envelope.acker().clone(),
        }
    }

    /// Settle the message. Returns the instruction sent to the broker, if any.
    ///
    /// The attempt bookkeeping is only updated once the broker accepted the instruction.
    pub async fn exit(self, outcome: &Outcome) -> Result<Option<BrokerAction>, AckError> {
        let action = match outcome {
            Outcome::Ack | Outcome::StopConsuming => Some(BrokerAction::Ack),
            Outcome::Nack => return self.nack().await,
            Outcome::Reject => Some(BrokerAction::Reject),
            Outcome::Skip => None,
            Outcome::Failure(_) => {
                if self.watcher.is_max(&self.message_id) {
                    Some(BrokerAction::Reject)
                } else {
                    return self.nack().await;
                }
            }
        };
        if let Some(action) = action {
            self.acker.settle(action).await?;
        }
        self.watcher.remove(&self.message_id);
        Ok(action)
    }

    async fn nack(self) -> Result<Option<BrokerAction>, AckError> {
        self.acker.nack().await?;
        if !self.acker.redelivers() {
            self.watcher.remove(&self.message_id);
        }
        Ok(Some(BrokerAction::Nack))
    }
}

#[cfg(test)]
mod tests {
    use super::WatcherContext;
    use crate::consumers::watcher::{PushBackWatcher, Watcher};
    use crate::consumers::{ErrorType, Outcome};
    use crate::envelope::{Acker, BrokerAction, Envelope};
    use crate::testing::RecordingAcker;

    fn envelope(id: &str) -> Envelope {
        Envelope::new("body", Acker::noop()).with_message_id(id)
    }

    #[tokio::test]
    async fn failures_are_redelivered_until_exhausted() {
        let watcher = PushBackWatcher::new(2);
        let broker = RecordingAcker::default();
        let failure = Outcome::Failure(ErrorType::Transient);
        let delivery = || Envelope::new("body", broker.acker()).with_message_id("m");

        for attempt in 1..=2 {
            let context = WatcherContext::enter(&watcher, &delivery());
            assert_eq!(context.exit(&failure).await.unwrap(), Some(BrokerAction::Nack));
            assert_eq!(watcher.attempts("m"), attempt);
        }
        let context = WatcherContext::enter(&watcher, &delivery());
        assert_eq!(context.exit(&failure).await.unwrap(), Some(BrokerAction::Reject));
        assert_eq!(watcher.attempts("m"), 0);
        assert_eq!((broker.nacks(), broker.rejects()), (2, 1));
    }

    #[tokio::test]
    async fn attempts_are_forgotten_when_nothing_is_redelivered() {
        let watcher = PushBackWatcher::new(3);
        let failure = Outcome::Failure(ErrorType::Transient);

        for i in 0..1000 {
            let message = envelope(&format!("m-{i}"));
            let context = WatcherContext::enter(&watcher, &message);
            assert_eq!(context.exit(&failure).await.unwrap(), Some(BrokerAction::Nack));
        }
        let context = WatcherContext::enter(&watcher, &envelope("explicit"));
        context.exit(&Outcome::Nack).await.unwrap();

        assert_eq!(watcher.tracked(), 0);
    }

    #[tokio::test]
    async fn skip_clears_attempts_without_settling() {
        let watcher = PushBackWatcher::new(5);
        let message = envelope("s");
        let context = WatcherContext::enter(&watcher, &message);
        assert_eq!(watcher.attempts("s"), 1);

        assert_eq!(context.exit(&Outcome::Skip).await.unwrap(), None);
        assert_eq!(watcher.attempts("s"), 0);
        assert!(!message.acker().is_settled());
    }

    #[tokio::test]
    async fn manual_settlement_takes_precedence() {
        let watcher = PushBackWatcher::new(5);
        let message = envelope("manual");
        message.reject().await.unwrap();

        let context = WatcherContext::enter(&watcher, &message);
        context.exit(&Outcome::Ack).await.unwrap();
        assert_eq!(message.acker().settlement(), Some(BrokerAction::Reject));
    }
}
