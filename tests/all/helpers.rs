use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchyard::consumers::{ConsumerGroup, ConsumerGroupConfigurationBuilder};
use switchyard::protocols::redis::Redis;
use switchyard::testing::InMemoryTransport;
use switchyard::DispatchSettings;
use uuid::Uuid;

/// Upper bound on how long a test waits for the dispatch loop to catch up.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn get_dispatch_settings() -> DispatchSettings {
    DispatchSettings {
        reconnect_delay_ms: 10,
        rpc_timeout_ms: 1_000,
        ..DispatchSettings::default()
    }
}

pub fn get_consumer_group<C: Send + Sync + 'static>(
    transport: &InMemoryTransport<Redis>,
    context: impl Into<Arc<C>>,
) -> ConsumerGroupConfigurationBuilder<Redis, C> {
    ConsumerGroup::builder(transport.clone(), context).with_settings(get_dispatch_settings())
}

pub fn random_channel() -> String {
    Uuid::new_v4().to_string()
}

/// Counts handler invocations.
#[derive(Default, Clone)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn increment(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// An ordered log of what happened during processing.
#[derive(Default)]
pub struct Journal(Mutex<Vec<String>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Collects the log lines emitted on the current thread while the installed guard is alive.
#[derive(Default, Clone)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    /// Number of occurrences of `text` in the captured output.
    pub fn count(&self, text: &str) -> usize {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .matches(text)
            .count()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
