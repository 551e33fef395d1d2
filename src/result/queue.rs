use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::Measurement;
use crate::export::health::HealthMetrics;
use crate::sink::Sink;

/// Producer side of the bounded result channel.
///
/// Cloning is cheap; every executor task holds its own clone. Writes never
/// block: when the channel is full the new measurement is rejected and the
/// ones already waiting are kept.
#[derive(Clone)]
pub struct ResultQueue {
    tx: mpsc::Sender<Measurement>,
    health: Option<Arc<HealthMetrics>>,
}

impl ResultQueue {
    /// Creates the queue and returns the receiver for its single consumer.
    pub fn new(
        capacity: usize,
        health: Option<Arc<HealthMetrics>>,
    ) -> Result<(Self, mpsc::Receiver<Measurement>)> {
        if capacity == 0 {
            bail!("result queue capacity must be positive");
        }

        let (tx, rx) = mpsc::channel(capacity);

        Ok((Self { tx, health }, rx))
    }

    /// Offers a measurement to the queue without waiting.
    ///
    /// Returns false when the measurement was dropped.
    pub fn enqueue(&self, m: Measurement) -> bool {
        match self.tx.try_send(m) {
            Ok(()) => {
                if let Some(h) = &self.health {
                    h.results_enqueued.inc();
                    h.queue_length.set(self.len() as f64);
                }
                true
            }
            Err(TrySendError::Full(m)) => {
                warn!(
                    name = %m.name,
                    capacity = self.capacity(),
                    "result queue full, dropping result",
                );
                if let Some(h) = &self.health {
                    h.results_dropped.inc();
                }
                false
            }
            Err(TrySendError::Closed(m)) => {
                warn!(name = %m.name, "result queue closed, dropping result");
                if let Some(h) = &self.health {
                    h.results_dropped.inc();
                }
                false
            }
        }
    }

    /// Measurements waiting to be consumed.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Append-only record of every dequeued measurement.
///
/// Lines are buffered; the consumer flushes whenever it catches up with the
/// queue and when it stops.
pub struct AuditLog {
    writer: BufWriter<Box<dyn Write + Send>>,
}

impl AuditLog {
    /// Opens (or creates) the file at `path` in append mode.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening audit log {}", path.display()))?;

        Ok(Self::from_writer(file))
    }

    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: BufWriter::new(Box::new(writer)),
        }
    }

    fn record(&mut self, m: &Measurement) {
        if let Err(e) = writeln!(self.writer, "{m}") {
            error!(error = %e, name = %m.name, "writing audit log");
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            error!(error = %e, "flushing audit log");
        }
    }
}

/// The single task draining the result queue into a sink.
pub struct Consumer<S> {
    rx: mpsc::Receiver<Measurement>,
    sink: S,
    audit: AuditLog,
    health: Option<Arc<HealthMetrics>>,
}

impl<S: Sink> Consumer<S> {
    pub fn new(
        rx: mpsc::Receiver<Measurement>,
        sink: S,
        audit: AuditLog,
        health: Option<Arc<HealthMetrics>>,
    ) -> Self {
        Self {
            rx,
            sink,
            audit,
            health,
        }
    }

    /// Consumes measurements in arrival order until cancelled or until
    /// every producer is gone.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(sink = self.sink.name(), "result consumer started");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(pending = self.rx.len(), "result consumer cancelled");
                    break;
                }
                next = self.rx.recv() => {
                    let Some(m) = next else {
                        debug!("result queue closed");
                        break;
                    };
                    if let Some(h) = &self.health {
                        h.queue_length.set(self.rx.len() as f64);
                    }
                    self.handle(m).await;
                    if self.rx.is_empty() {
                        self.audit.flush();
                    }
                }
            }
        }

        self.audit.flush();

        info!(sink = self.sink.name(), "result consumer stopped");
    }

    async fn handle(&mut self, mut m: Measurement) {
        self.audit.record(&m);

        m.datatype = Some(m.datatype_or_default());

        if m.is_no_data() {
            warn!(name = %m.name, value = %m.value, "no data, result not forwarded");
            if let Some(h) = &self.health {
                h.results_skipped.inc();
            }
            return;
        }

        trace!(name = %m.name, value = %m.value, "forwarding result");

        match self.sink.push(&m).await {
            Ok(()) => {
                if let Some(h) = &self.health {
                    h.results_forwarded.inc();
                }
            }
            Err(e) => {
                error!(
                    sink = self.sink.name(),
                    name = %m.name,
                    error = %e,
                    "pushing result to sink",
                );
                if let Some(h) = &self.health {
                    h.sink_errors.inc();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    #[derive(Clone, Default)]
    struct RecordingSink {
        pushed: Arc<Mutex<Vec<Measurement>>>,
    }

    impl Sink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn push(&self, m: &Measurement) -> Result<()> {
            self.pushed.lock().unwrap().push(m.clone());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>, Arc<AtomicUsize>);

    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.1.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(ResultQueue::new(0, None).is_err());
    }

    #[test]
    fn test_full_queue_rejects_new_entries() {
        let health = Arc::new(HealthMetrics::new(":0").unwrap());
        let (queue, mut rx) = ResultQueue::new(10_000, Some(Arc::clone(&health))).unwrap();

        for i in 0..10_000 {
            assert!(queue.enqueue(Measurement::at(i, format!("m.{i}"), "1")));
        }
        assert_eq!(queue.len(), 10_000);

        assert!(!queue.enqueue(Measurement::at(10_000, "m.overflow", "1")));
        assert_eq!(queue.len(), 10_000);
        assert_eq!(health.results_dropped.get() as u64, 1);

        // The oldest entries survive; the rejected one never shows up.
        let first = rx.try_recv().unwrap();
        assert_eq!(first.name, "m.0");
        let mut last = first;
        while let Ok(m) = rx.try_recv() {
            last = m;
        }
        assert_eq!(last.name, "m.9999");
    }

    #[test]
    fn test_closed_queue_drops() {
        let (queue, rx) = ResultQueue::new(4, None).unwrap();
        drop(rx);
        assert!(!queue.enqueue(Measurement::at(1, "a", "1")));
    }

    #[tokio::test]
    async fn test_consumer_skips_no_data_and_forwards_rest() {
        let (queue, rx) = ResultQueue::new(16, None).unwrap();
        let sink = RecordingSink::default();
        let buf = SharedBuf::default();
        let consumer = Consumer::new(rx, sink.clone(), AuditLog::from_writer(buf.clone()), None);

        let mut typed = Measurement::at(3, "sbx.c", "7");
        typed.datatype = Some('L');

        queue.enqueue(Measurement::at(1, "sbx.a", "nan"));
        queue.enqueue(Measurement::at(2, "sbx.b", "12.50"));
        queue.enqueue(Measurement::at(2, "sbx.null", "null"));
        queue.enqueue(Measurement::at(2, "sbx.empty", ""));
        queue.enqueue(typed);
        drop(queue);

        consumer.run(CancellationToken::new()).await;

        let pushed = sink.pushed.lock().unwrap().clone();
        assert_eq!(pushed.len(), 2);
        assert_eq!(pushed[0].name, "sbx.b");
        assert_eq!(pushed[0].datatype, Some('n'));
        assert_eq!(pushed[1].name, "sbx.c");
        assert_eq!(pushed[1].datatype, Some('L'));

        // Every dequeued measurement is audited, forwarded or not.
        let audit = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = audit.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "[1] sbx.a=nan");
        assert_eq!(lines[1], "[2] sbx.b=12.50");
    }

    #[tokio::test]
    async fn test_consumer_stops_on_cancel() {
        let (_queue, rx) = ResultQueue::new(4, None).unwrap();
        let consumer = Consumer::new(
            rx,
            RecordingSink::default(),
            AuditLog::from_writer(io::sink()),
            None,
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(cancel.clone()));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("consumer did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_audit_flushed_once_backlog_drained() {
        let (queue, rx) = ResultQueue::new(64, None).unwrap();
        let buf = SharedBuf::default();
        let consumer = Consumer::new(
            rx,
            RecordingSink::default(),
            AuditLog::from_writer(buf.clone()),
            None,
        );

        for i in 0..50 {
            queue.enqueue(Measurement::at(i, format!("sbx.m{i}"), "1"));
        }
        drop(queue);

        consumer.run(CancellationToken::new()).await;

        let audit = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(audit.lines().count(), 50);
        // Once when the backlog empties, once on exit.
        assert_eq!(buf.1.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_audit_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.log");

        let mut log = AuditLog::open(&path).unwrap();
        log.record(&Measurement::at(1, "a", "1"));
        log.flush();
        drop(log);

        let mut log = AuditLog::open(&path).unwrap();
        log.record(&Measurement::at(2, "b", "nan"));
        log.flush();
        drop(log);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "[1] a=1\n[2] b=nan\n");
    }
}
