use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use orgledger_capture::{ChangeCaptureConsumer, Disposition};

use crate::capture_source::CaptureSource;

pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Capture pipeline worker loop.
///
/// - Polls the source for leased change messages
/// - Feeds each through the consumer
/// - Acknowledges only settled messages; retries stay leased
/// - Supports graceful shutdown
pub struct CaptureWorker;

impl CaptureWorker {
    /// Spawn a worker thread that drains the capture source.
    pub fn spawn<S>(
        name: &'static str,
        source: S,
        consumer: ChangeCaptureConsumer,
    ) -> WorkerHandle
    where
        S: CaptureSource + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, source, consumer, shutdown_rx))
            .expect("failed to spawn capture worker thread");

        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

fn worker_loop<S: CaptureSource>(
    name: &'static str,
    source: S,
    consumer: ChangeCaptureConsumer,
    shutdown_rx: mpsc::Receiver<()>,
) {
    let tick = Duration::from_millis(250);

    loop {
        // Shutdown check (non-blocking)
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let batch = match source.poll(DEFAULT_BATCH_SIZE, tick) {
            Ok(batch) => batch,
            Err(err) => {
                warn!(worker = name, error = %err, "capture poll failed");
                thread::sleep(tick);
                continue;
            }
        };
        if batch.is_empty() {
            // Non-blocking sources answer immediately; don't spin hot.
            thread::sleep(Duration::from_millis(25));
            continue;
        }

        let mut settled = Vec::new();
        for change in &batch {
            match consumer.process(&change.body) {
                Disposition::Ack => settled.push(change.id.clone()),
                Disposition::Retry => {
                    debug!(
                        worker = name,
                        message_id = %change.id,
                        deliveries = change.delivery_count,
                        "change left leased for redelivery"
                    );
                }
            }
        }
        if let Err(err) = source.ack(&settled) {
            warn!(
                worker = name,
                error = %err,
                "ack failed; settled changes will be redelivered"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    use serde_json::json;

    use orgledger_capture::{Applier, ApplyError, ChangeEvent};

    use crate::capture_source::InMemoryCaptureSource;

    struct CountingApplier {
        applied: std::sync::Mutex<Vec<ChangeEvent>>,
    }

    impl CountingApplier {
        fn new() -> Self {
            Self {
                applied: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn count(&self) -> usize {
            self.applied.lock().unwrap().len()
        }
    }

    impl Applier for CountingApplier {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn apply(&self, change: &ChangeEvent) -> Result<(), ApplyError> {
            self.applied.lock().unwrap().push(change.clone());
            Ok(())
        }
    }

    fn create_body(code: &str) -> Vec<u8> {
        json!({
            "payload": {
                "before": null,
                "after": {
                    "tenant_id": "0190b5a4-0000-7000-8000-000000000000",
                    "code": code,
                    "name": "Head Office",
                    "unit_type": "COMPANY",
                    "status": "ACTIVE",
                    "level": 1,
                    "path": format!("/{code}"),
                    "effective_date": 18262,
                    "version": 1,
                    "is_current": true
                },
                "source": {
                    "connector": "postgresql",
                    "db": "organization_db",
                    "schema": "public",
                    "table": "organization_units"
                },
                "op": "c",
                "ts_ms": 1719400000000u64
            }
        })
        .to_string()
        .into_bytes()
    }

    fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn worker_processes_and_settles_changes() {
        let source = Arc::new(InMemoryCaptureSource::new());
        source.push(create_body("1000001")).unwrap();
        source.push(create_body("1000002")).unwrap();

        let applier = Arc::new(CountingApplier::new());
        let consumer =
            ChangeCaptureConsumer::new(vec![Arc::clone(&applier) as Arc<dyn Applier>]);

        let handle = CaptureWorker::spawn("capture-test", Arc::clone(&source), consumer);
        let drained = wait_until(Duration::from_secs(2), || {
            applier.count() == 2 && source.outstanding() == 0
        });
        handle.shutdown();

        assert!(drained, "worker did not settle both changes in time");
        assert_eq!(source.depth(), 0);
    }

    #[test]
    fn undecodable_bodies_are_settled_not_retried() {
        let source = Arc::new(InMemoryCaptureSource::new());
        source.push(b"not json".to_vec()).unwrap();

        let applier = Arc::new(CountingApplier::new());
        let consumer =
            ChangeCaptureConsumer::new(vec![Arc::clone(&applier) as Arc<dyn Applier>]);

        let handle = CaptureWorker::spawn("capture-garbage", Arc::clone(&source), consumer);
        let drained = wait_until(Duration::from_secs(2), || {
            source.outstanding() == 0 && source.depth() == 0
        });
        handle.shutdown();

        assert!(drained, "garbage message was not settled");
        assert_eq!(applier.count(), 0);
    }

    #[test]
    fn shutdown_stops_the_loop() {
        let source = Arc::new(InMemoryCaptureSource::new());
        let consumer = ChangeCaptureConsumer::new(vec![]);

        let handle = CaptureWorker::spawn("capture-idle", Arc::clone(&source), consumer);
        thread::sleep(Duration::from_millis(50));
        handle.shutdown();

        source.push(create_body("1000003")).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(source.depth(), 1, "stopped worker kept polling");
    }
}
