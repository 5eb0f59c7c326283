//! Redis Streams event bus.
//!
//! Publishes domain events with `XADD` onto partitioned streams. A
//! single sender thread owns the Redis client and drains a bounded job
//! queue; `publish` blocks until the append is confirmed or fails.

use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use redis::Client;
use tracing::{debug, instrument, warn};

use orgledger_events::{CancellationToken, DomainEvent, EventBus, PublishError};

use super::{partition_for, partition_stream};
use crate::config::{DEFAULT_PARTITIONS, DEFAULT_REDIS_URL, DEFAULT_STREAM_BASE};

pub const DEFAULT_QUEUE_DEPTH: usize = 1024;
pub const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 10_000;

const TICK: Duration = Duration::from_millis(25);

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("redis connection error: {0}")]
    Connection(String),
    #[error("redis command error: {0}")]
    Command(String),
    #[error("event serialization error: {0}")]
    Serialization(String),
}

/// Settings for the streams transport.
#[derive(Debug, Clone)]
pub struct RedisStreamsConfig {
    pub url: String,
    pub stream_base: String,
    pub partitions: u32,
    pub queue_depth: usize,
    pub publish_timeout: Duration,
}

impl Default for RedisStreamsConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
            stream_base: DEFAULT_STREAM_BASE.to_string(),
            partitions: DEFAULT_PARTITIONS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            publish_timeout: Duration::from_millis(DEFAULT_PUBLISH_TIMEOUT_MS),
        }
    }
}

struct PublishJob {
    event: DomainEvent,
    done: mpsc::Sender<Result<(), PublishError>>,
}

/// Event bus backed by partitioned Redis Streams.
pub struct RedisStreamsEventBus {
    sender: Mutex<Option<mpsc::SyncSender<PublishJob>>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    publish_timeout: Duration,
}

impl RedisStreamsEventBus {
    /// Opens the client and starts the sender thread.
    pub fn connect(config: RedisStreamsConfig) -> Result<Self, RedisStreamsError> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;
        let (tx, rx) = mpsc::sync_channel::<PublishJob>(config.queue_depth.max(1));
        let stream_base = config.stream_base.clone();
        let partitions = config.partitions.max(1);
        let worker = thread::Builder::new()
            .name("event-bus-sender".to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    let outcome = deliver(&client, &stream_base, partitions, &job.event);
                    if let Err(err) = &outcome {
                        warn!(
                            event_id = %job.event.event_id(),
                            error = %err,
                            "event delivery failed"
                        );
                    }
                    // Publisher may have timed out and gone away.
                    let _ = job
                        .done
                        .send(outcome.map_err(|e| PublishError::Delivery(e.to_string())));
                }
            })
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;
        Ok(Self {
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            publish_timeout: config.publish_timeout,
        })
    }

    fn sender(&self) -> Result<mpsc::SyncSender<PublishJob>, PublishError> {
        let guard = self
            .sender
            .lock()
            .map_err(|_| PublishError::Delivery("event bus lock poisoned".to_string()))?;
        guard
            .clone()
            .ok_or_else(|| PublishError::Delivery("event bus is closed".to_string()))
    }
}

impl EventBus for RedisStreamsEventBus {
    fn publish(&self, event: DomainEvent, cancel: &CancellationToken) -> Result<(), PublishError> {
        let sender = self.sender()?;
        let started = Instant::now();
        let deadline = started + self.publish_timeout;
        let (done_tx, done_rx) = mpsc::channel();
        let mut job = PublishJob {
            event,
            done: done_tx,
        };
        loop {
            if cancel.is_cancelled() {
                return Err(PublishError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Err(PublishError::Timeout {
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            match sender.try_send(job) {
                Ok(()) => break,
                Err(mpsc::TrySendError::Full(back)) => {
                    job = back;
                    thread::sleep(TICK);
                }
                Err(mpsc::TrySendError::Disconnected(_)) => {
                    return Err(PublishError::Delivery(
                        "event bus sender thread stopped".to_string(),
                    ));
                }
            }
        }
        // Once enqueued the append may still land after a timeout or
        // cancel; delivery is at-least-once, only the report is lost.
        loop {
            if cancel.is_cancelled() {
                return Err(PublishError::Cancelled);
            }
            match done_rx.recv_timeout(TICK) {
                Ok(outcome) => return outcome,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if Instant::now() >= deadline {
                        return Err(PublishError::Timeout {
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(PublishError::Delivery(
                        "delivery report channel dropped".to_string(),
                    ));
                }
            }
        }
    }

    /// Stops accepting publishes, drains queued jobs and joins the
    /// sender thread.
    fn close(&self) -> Result<(), PublishError> {
        let sender = self
            .sender
            .lock()
            .map_err(|_| PublishError::Delivery("event bus lock poisoned".to_string()))?
            .take();
        drop(sender);
        let worker = self
            .worker
            .lock()
            .map_err(|_| PublishError::Delivery("event bus lock poisoned".to_string()))?
            .take();
        if let Some(handle) = worker {
            handle
                .join()
                .map_err(|_| PublishError::Delivery("event bus sender thread panicked".to_string()))?;
        }
        Ok(())
    }
}

#[instrument(
    skip(client, event),
    fields(event_id = %event.event_id(), aggregate_id = %event.aggregate_id()),
    err
)]
fn deliver(
    client: &Client,
    stream_base: &str,
    partitions: u32,
    event: &DomainEvent,
) -> Result<(), RedisStreamsError> {
    let payload = serde_json::to_string(event)
        .map_err(|e| RedisStreamsError::Serialization(e.to_string()))?;
    let partition = partition_for(event.aggregate_id(), partitions);
    let stream_key = partition_stream(stream_base, partition);
    let mut conn = client
        .get_connection()
        .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;
    let mut cmd = redis::cmd("XADD");
    cmd.arg(&stream_key).arg("*");
    for (name, value) in event.headers() {
        cmd.arg(name).arg(value);
    }
    cmd.arg("payload").arg(&payload);
    let entry_id: String = cmd
        .query(&mut conn)
        .map_err(|e| RedisStreamsError::Command(e.to_string()))?;
    debug!(stream = %stream_key, entry_id = %entry_id, "event appended");
    Ok(())
}
