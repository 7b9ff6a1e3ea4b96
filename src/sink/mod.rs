//! MQTT sink for tracing events
//!
//! [`MqttSink`] is a tracing [`Layer`]. Its `on_event` only turns the event
//! into a [`LogRecord`] and queues it; publishing happens on a dedicated
//! worker thread that owns a single-threaded tokio runtime and runs one
//! [`SinkPublisher::emit`] cycle per record.
//!
//! - [`format`] - Line layout shared with the console and file sinks
//! - [`publisher`] - The connect, publish, retry and report cycle
//!
//! The worker's own diagnostics go to a stderr-only subscriber, so a broker
//! outage produces warnings on stderr instead of more records for the sink.

pub mod format;
pub mod publisher;

pub use format::{record_from_event, RecordFormat, TIMESTAMP_FORMAT};
pub use publisher::SinkPublisher;

use crate::config::{Backpressure, SinkSection};
use crate::observability::{metrics, worker_subscriber};
use crate::protocol::LogRecord;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn, Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Name of the publish worker thread
pub const WORKER_THREAD_NAME: &str = "mqtt-log-sink";

/// Queue settings for the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkSettings {
    pub queue_capacity: usize,
    pub backpressure: Backpressure,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            backpressure: Backpressure::Drop,
        }
    }
}

impl From<&SinkSection> for SinkSettings {
    fn from(section: &SinkSection) -> Self {
        Self {
            queue_capacity: section.queue_capacity.max(1),
            backpressure: section.backpressure,
        }
    }
}

enum Command {
    Record(LogRecord),
    Flush(mpsc::Sender<()>),
    Shutdown,
}

/// Tracing layer forwarding every event to the publish worker
pub struct MqttSink {
    sender: SyncSender<Command>,
    backpressure: Backpressure,
}

impl MqttSink {
    /// Start the worker thread and return the layer with its guard
    pub fn spawn(
        publisher: SinkPublisher,
        settings: SinkSettings,
    ) -> std::io::Result<(Self, SinkGuard)> {
        // Callers may sit on a runtime thread, where tokio's blocking_send panics
        let (sender, receiver) = mpsc::sync_channel(settings.queue_capacity.max(1));

        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(receiver, publisher))?;

        let sink = Self {
            sender: sender.clone(),
            backpressure: settings.backpressure,
        };
        let guard = SinkGuard {
            sender,
            handle: Some(handle),
        };
        Ok((sink, guard))
    }

    fn enqueue(&self, record: LogRecord) {
        match self.backpressure {
            Backpressure::Drop => match self.sender.try_send(Command::Record(record)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => metrics().queue_overflow(),
                // Worker gone: the guard was dropped, nothing left to do
                Err(TrySendError::Disconnected(_)) => {}
            },
            Backpressure::Block => {
                let _ = self.sender.send(Command::Record(record));
            }
        }
    }
}

impl<S: Subscriber> Layer<S> for MqttSink {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        // Events raised on the worker itself never come back through here
        if thread::current().name() == Some(WORKER_THREAD_NAME) {
            return;
        }
        self.enqueue(record_from_event(event));
    }
}

/// Keeps the publish worker alive
///
/// Dropping the guard processes everything still queued, then stops and
/// joins the worker thread.
pub struct SinkGuard {
    sender: SyncSender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl SinkGuard {
    /// Block until every record queued before this call has been published
    /// or given up on
    pub fn flush(&self) {
        let (ack, done) = mpsc::channel();
        if self.sender.send(Command::Flush(ack)).is_ok() {
            let _ = done.recv();
        }
    }
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                eprintln!("{WORKER_THREAD_NAME} worker panicked");
            }
        }
    }
}

fn run_worker(receiver: Receiver<Command>, publisher: SinkPublisher) {
    let _subscriber = tracing::subscriber::set_default(worker_subscriber());

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!(error = %e, "Could not start MQTT sink runtime, records will be dropped");
            drain(receiver);
            return;
        }
    };

    debug!(topic = publisher.topic(), "MQTT sink worker started");

    while let Ok(command) = receiver.recv() {
        match command {
            Command::Record(record) => {
                let outcome = runtime.block_on(publisher.emit(&record));
                debug!(%outcome, "Record processed");
            }
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
            Command::Shutdown => break,
        }
    }

    debug!(topic = publisher.topic(), "MQTT sink worker stopped");
}

/// Answer flushes and count records until the channel closes
fn drain(receiver: Receiver<Command>) {
    while let Ok(command) = receiver.recv() {
        match command {
            Command::Record(_) => metrics().publish_cycle_finished(
                crate::protocol::PublishOutcome::Dropped,
                std::time::Duration::ZERO,
            ),
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
            Command::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnector;
    use crate::transport::{BrokerConnector, BrokerEndpoint, BrokerSession, MqttError};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tracing::Level;
    use tracing_subscriber::prelude::*;

    /// Connector whose connects wait until the test releases the gate
    struct GatedConnector {
        inner: MockConnector,
        gate: Arc<Mutex<()>>,
    }

    #[async_trait]
    impl BrokerConnector for GatedConnector {
        async fn connect(
            &self,
            endpoint: &BrokerEndpoint,
        ) -> Result<Box<dyn BrokerSession>, MqttError> {
            {
                let _open = self.gate.lock();
            }
            self.inner.connect(endpoint).await
        }
    }

    fn spawn_with(
        connector: Arc<dyn BrokerConnector>,
        settings: SinkSettings,
    ) -> (MqttSink, SinkGuard) {
        let publisher = SinkPublisher::new(
            connector,
            BrokerEndpoint::new("localhost", 1883),
            "DVT",
            "bench.rig",
            RecordFormat::for_level(Level::INFO),
        );
        MqttSink::spawn(publisher, settings).unwrap()
    }

    fn spawn_sink(mock: &MockConnector, settings: SinkSettings) -> (MqttSink, SinkGuard) {
        spawn_with(Arc::new(mock.clone()), settings)
    }

    #[test]
    fn test_events_reach_broker_after_flush() {
        let mock = MockConnector::new();
        let (sink, guard) = spawn_sink(&mock, SinkSettings::default());
        let subscriber = tracing_subscriber::registry().with(sink);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("first");
            tracing::warn!("second");
        });
        guard.flush();

        let published = mock.published_on("DVT/bench/rig/log");
        assert_eq!(published.len(), 2);
        assert!(published[0].payload.ends_with(" - first"));
        assert!(published[1].payload.ends_with(" - second"));
    }

    #[test]
    fn test_drop_guard_processes_queue() {
        let mock = MockConnector::new();
        {
            let (sink, _guard) = spawn_sink(&mock, SinkSettings::default());
            let subscriber = tracing_subscriber::registry().with(sink);
            tracing::subscriber::with_default(subscriber, || {
                for i in 0..5 {
                    tracing::info!(i, "tick");
                }
            });
        }

        assert_eq!(mock.published().len(), 5);
        assert_eq!(mock.opened(), 5);
        assert_eq!(mock.closed(), 5);
    }

    #[test]
    fn test_block_backpressure_keeps_every_record() {
        let mock = MockConnector::new();
        let settings = SinkSettings {
            queue_capacity: 1,
            backpressure: Backpressure::Block,
        };
        let (sink, guard) = spawn_sink(&mock, settings);
        let subscriber = tracing_subscriber::registry().with(sink);

        tracing::subscriber::with_default(subscriber, || {
            for _ in 0..20 {
                tracing::info!("burst");
            }
        });
        guard.flush();

        assert_eq!(mock.published().len(), 20);
    }

    #[test]
    fn test_drop_backpressure_discards_overflow() {
        let mock = MockConnector::new();
        let gate = Arc::new(Mutex::new(()));
        let held = gate.lock().unwrap();

        let connector = GatedConnector {
            inner: mock.clone(),
            gate: Arc::clone(&gate),
        };
        let settings = SinkSettings {
            queue_capacity: 1,
            backpressure: Backpressure::Drop,
        };
        let (sink, guard) = spawn_with(Arc::new(connector), settings);
        let subscriber = tracing_subscriber::registry().with(sink);

        let before = metrics().snapshot().emission.queue_overflows;
        tracing::subscriber::with_default(subscriber, || {
            for i in 0..20 {
                tracing::info!(i, "burst");
            }
        });
        let after = metrics().snapshot().emission.queue_overflows;

        // One record can sit in the worker and one in the queue
        assert!(after - before >= 18, "only {} overflows", after - before);

        drop(held);
        guard.flush();

        let published = mock.published().len();
        assert!((1..=2).contains(&published), "published {published}");
    }

    #[test]
    fn test_emitting_into_failing_broker_does_not_panic() {
        let mock = MockConnector::with_connect_failure();
        let (sink, guard) = spawn_sink(&mock, SinkSettings::default());
        let subscriber = tracing_subscriber::registry().with(sink);

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("nobody listening");
        });
        guard.flush();

        assert!(mock.published().is_empty());
    }

    #[test]
    fn test_settings_from_section() {
        let section = SinkSection {
            queue_capacity: 0,
            backpressure: Backpressure::Block,
            ..SinkSection::default()
        };
        let settings = SinkSettings::from(&section);
        assert_eq!(settings.queue_capacity, 1);
        assert_eq!(settings.backpressure, Backpressure::Block);
    }
}
