use crate::envelope::{Acker, Acknowledge};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// An acknowledgement backend that counts the calls it receives.
///
/// Clones share their counters: keep one around and hand [`RecordingAcker::acker`] to the
/// message under test.
#[derive(Debug, Clone, Default)]
pub struct RecordingAcker {
    counters: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    acks: AtomicUsize,
    nacks: AtomicUsize,
    rejects: AtomicUsize,
}

impl RecordingAcker {
    pub fn acker(&self) -> Acker {
        Acker::new(self.clone())
    }

    pub fn acks(&self) -> usize {
        self.counters.acks.load(Ordering::SeqCst)
    }

    pub fn nacks(&self) -> usize {
        self.counters.nacks.load(Ordering::SeqCst)
    }

    pub fn rejects(&self) -> usize {
        self.counters.rejects.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Acknowledge for RecordingAcker {
    async fn ack(&self) -> Result<(), anyhow::Error> {
        self.counters.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn nack(&self) -> Result<(), anyhow::Error> {
        self.counters.nacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reject(&self) -> Result<(), anyhow::Error> {
        self.counters.rejects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
