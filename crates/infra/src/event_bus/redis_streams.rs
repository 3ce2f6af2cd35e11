//! Redis Streams-backed message bus (durable, at-least-once delivery).
//!
//! This implementation maps topic exchanges onto Redis Streams:
//! - **Stream per exchange**: `voxnlu:<exchange>`, entries carry `routing_key` and `body`
//! - **Consumer group per queue**: every queue sees every entry and keeps the
//!   ones its binding pattern matches (others are acknowledged right away)
//! - **Ack**: `XACK`
//! - **Nack without requeue**: entry copied to `<stream>:dlq`, then `XACK`
//! - **Nack with requeue**: no `XACK`; the entry stays pending and is re-read
//!   from the consumer's pending list
//!
//! Pending entries are also re-read when a consumer starts, so deliveries
//! unsettled at a crash are redelivered.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::Duration;

use redis::Value;
use tracing::{debug, error, instrument, warn};

use voxnlu_bus::{AckOutcome, Acker, BusError, Delivery, MessageBus, Subscription, topic_matches};

/// Default prefix for stream keys.
const DEFAULT_KEY_PREFIX: &str = "voxnlu";

/// Default consumer name inside each group.
const DEFAULT_CONSUMER_NAME: &str = "voxnlu-nlu";

/// Entries fetched per read.
const READ_COUNT: usize = 10;

/// Blocking read timeout; bounds how long a dropped subscription lingers.
const BLOCK_MS: u64 = 1000;

/// Back-off after a connection or command failure.
const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RedisStreamsBus {
    client: Arc<redis::Client>,
    key_prefix: String,
    consumer_name: String,
}

impl RedisStreamsBus {
    /// Create a new Redis Streams bus.
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, BusError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| BusError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            consumer_name: DEFAULT_CONSUMER_NAME.to_string(),
        })
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Consumer name within each group; replicas of the service need distinct names.
    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = name.into();
        self
    }

    /// Stream key backing `exchange`.
    pub fn stream_key(&self, exchange: &str) -> String {
        format!("{}:{}", self.key_prefix, exchange)
    }

    /// Verify the server is reachable.
    pub fn ping(&self) -> Result<(), BusError> {
        let mut conn = self.connection()?;
        let _: String = redis::cmd("PING")
            .query(&mut conn)
            .map_err(|e| BusError::Connection(e.to_string()))?;
        Ok(())
    }

    fn connection(&self) -> Result<redis::Connection, BusError> {
        self.client
            .get_connection()
            .map_err(|e| BusError::Connection(e.to_string()))
    }

    /// Ensure a consumer group exists (idempotent).
    ///
    /// New groups start at the end of the stream: a queue declared now only
    /// receives entries published from now on.
    pub fn ensure_consumer_group(&self, stream: &str, group: &str) -> Result<(), BusError> {
        let mut conn = self.connection()?;

        let created: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query(&mut conn);

        match created {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(BusError::Command(format!("XGROUP CREATE failed: {e}"))),
        }
    }

    fn acknowledge(&self, stream: &str, group: &str, id: &str) -> Result<(), BusError> {
        let mut conn = self.connection()?;
        let _: u64 = redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(id)
            .query(&mut conn)
            .map_err(|e| BusError::Command(format!("XACK failed: {e}")))?;
        Ok(())
    }

    /// Copy a rejected entry to the dead-letter stream.
    fn dead_letter(&self, stream: &str, queue: &str, id: &str, routing_key: &str, body: &[u8]) -> Result<(), BusError> {
        let mut conn = self.connection()?;
        let _: String = redis::cmd("XADD")
            .arg(format!("{stream}:dlq"))
            .arg("*")
            .arg("original_message_id")
            .arg(id)
            .arg("queue")
            .arg(queue)
            .arg("routing_key")
            .arg(routing_key)
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339())
            .arg("body")
            .arg(body)
            .query(&mut conn)
            .map_err(|e| BusError::Command(format!("DLQ XADD failed: {e}")))?;

        warn!(message_id = %id, queue, routing_key, "message sent to dead-letter stream");
        Ok(())
    }

    fn read_group(
        &self,
        conn: &mut redis::Connection,
        stream: &str,
        group: &str,
        start: &str,
    ) -> Result<Vec<StreamEntry>, BusError> {
        let reply: Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(&self.consumer_name)
            .arg("COUNT")
            .arg(READ_COUNT)
            .arg("BLOCK")
            .arg(BLOCK_MS)
            .arg("STREAMS")
            .arg(stream)
            .arg(start)
            .query(conn)
            .map_err(|e| BusError::Command(format!("XREADGROUP failed: {e}")))?;

        Ok(parse_read_reply(reply))
    }
}

impl MessageBus for RedisStreamsBus {
    #[instrument(skip(self, body), fields(body_len = body.len()), err)]
    fn publish(&self, exchange: &str, routing_key: &str, body: Vec<u8>) -> Result<(), BusError> {
        let mut conn = self.connection()?;

        let _: String = redis::cmd("XADD")
            .arg(self.stream_key(exchange))
            .arg("*") // Auto-generate message ID
            .arg("routing_key")
            .arg(routing_key)
            .arg("body")
            .arg(body.as_slice())
            .query(&mut conn)
            .map_err(|e| BusError::Command(format!("XADD failed: {e}")))?;

        Ok(())
    }

    fn consume(&self, exchange: &str, queue: &str, pattern: &str) -> Result<Subscription<Delivery>, BusError> {
        let stream = self.stream_key(exchange);
        self.ensure_consumer_group(&stream, queue)?;

        let (tx, rx) = mpsc::channel();
        let poller = Poller {
            bus: self.clone(),
            stream,
            queue: queue.to_string(),
            pattern: pattern.to_string(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            // Pick up entries left pending by a previous run first.
            reread_pending: Arc::new(AtomicBool::new(true)),
        };

        thread::Builder::new()
            .name(format!("redis-{queue}"))
            .spawn(move || poller.run(tx))
            .map_err(|e| BusError::Connection(format!("failed to spawn stream reader: {e}")))?;

        Ok(Subscription::new(rx))
    }
}

/// Entry read from a stream.
#[derive(Debug, Clone, PartialEq)]
struct StreamEntry {
    id: String,
    fields: HashMap<String, Vec<u8>>,
}

/// Background reader feeding one queue's subscription.
struct Poller {
    bus: RedisStreamsBus,
    stream: String,
    queue: String,
    pattern: String,
    /// Delivered but not yet settled; never handed out twice.
    in_flight: Arc<Mutex<HashSet<String>>>,
    reread_pending: Arc<AtomicBool>,
}

impl Poller {
    fn run(self, tx: mpsc::Sender<Delivery>) {
        let mut conn = None;

        loop {
            if conn.is_none() {
                match self.bus.connection() {
                    Ok(c) => conn = Some(c),
                    Err(e) => {
                        error!(queue = %self.queue, error = %e, "stream reader cannot connect");
                        thread::sleep(RETRY_DELAY);
                        continue;
                    }
                }
            }
            let Some(c) = conn.as_mut() else {
                continue;
            };

            let pending = self.reread_pending.swap(false, Ordering::SeqCst);
            let start = if pending { "0" } else { ">" };

            let entries = match self.bus.read_group(c, &self.stream, &self.queue, start) {
                Ok(entries) => entries,
                Err(e) => {
                    error!(queue = %self.queue, error = %e, "failed to read from stream");
                    if pending {
                        self.reread_pending.store(true, Ordering::SeqCst);
                    }
                    conn = None;
                    thread::sleep(RETRY_DELAY);
                    continue;
                }
            };
            if pending && entries.len() == READ_COUNT {
                self.reread_pending.store(true, Ordering::SeqCst);
            }

            for entry in entries {
                if let Some(delivery) = self.accept(entry, pending) {
                    if tx.send(delivery).is_err() {
                        debug!(queue = %self.queue, "subscription dropped, stream reader stopping");
                        return;
                    }
                }
            }
        }
    }

    /// Turn an entry into a delivery, or acknowledge it if this queue does not want it.
    fn accept(&self, entry: StreamEntry, redelivered: bool) -> Option<Delivery> {
        let StreamEntry { id, mut fields } = entry;

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.contains(&id) {
            return None;
        }

        let routing_key = fields
            .remove("routing_key")
            .map(|k| String::from_utf8_lossy(&k).into_owned());
        let keep = match (&routing_key, fields.contains_key("body")) {
            (Some(key), true) => topic_matches(&self.pattern, key),
            _ => {
                warn!(queue = %self.queue, message_id = %id, "skipping malformed stream entry");
                false
            }
        };
        if !keep {
            if let Err(e) = self.bus.acknowledge(&self.stream, &self.queue, &id) {
                error!(queue = %self.queue, message_id = %id, error = %e, "failed to skip entry");
            }
            return None;
        }

        in_flight.insert(id.clone());
        let routing_key = routing_key.unwrap_or_default();
        let body = fields.remove("body").unwrap_or_default();

        let acker = RedisAcker {
            bus: self.bus.clone(),
            stream: self.stream.clone(),
            queue: self.queue.clone(),
            id,
            routing_key: routing_key.clone(),
            body: body.clone(),
            in_flight: Arc::clone(&self.in_flight),
            reread_pending: Arc::clone(&self.reread_pending),
        };
        Some(Delivery::new(self.queue.clone(), routing_key, body, redelivered, Box::new(acker)))
    }
}

struct RedisAcker {
    bus: RedisStreamsBus,
    stream: String,
    queue: String,
    id: String,
    routing_key: String,
    body: Vec<u8>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    reread_pending: Arc<AtomicBool>,
}

impl Acker for RedisAcker {
    fn settle(self: Box<Self>, outcome: AckOutcome) -> Result<(), BusError> {
        let result = match outcome {
            AckOutcome::Ack => self.bus.acknowledge(&self.stream, &self.queue, &self.id),
            AckOutcome::Nack { requeue: false } => self
                .bus
                .dead_letter(&self.stream, &self.queue, &self.id, &self.routing_key, &self.body)
                .and_then(|()| self.bus.acknowledge(&self.stream, &self.queue, &self.id)),
            AckOutcome::Nack { requeue: true } => {
                self.reread_pending.store(true, Ordering::SeqCst);
                Ok(())
            }
        };

        self.in_flight
            .lock()
            .map_err(|_| BusError::Poisoned)?
            .remove(&self.id);
        result
    }
}

/// Flatten an `XREADGROUP` reply into entries.
///
/// Reply format: `[[stream, [[id, [field, value, ...]], ...]], ...]`, or nil
/// when the blocking read timed out. Entries deleted from the stream come back
/// with nil fields and are dropped.
fn parse_read_reply(reply: Value) -> Vec<StreamEntry> {
    let Value::Bulk(streams) = reply else {
        return Vec::new();
    };

    streams
        .into_iter()
        .filter_map(|stream| match stream {
            Value::Bulk(mut pair) if pair.len() == 2 => pair.pop(),
            _ => None,
        })
        .flat_map(|entries| match entries {
            Value::Bulk(entries) => entries,
            _ => Vec::new(),
        })
        .filter_map(parse_entry)
        .collect()
}

fn parse_entry(entry: Value) -> Option<StreamEntry> {
    let Value::Bulk(mut parts) = entry else {
        return None;
    };
    if parts.len() != 2 {
        return None;
    }
    let (Some(Value::Bulk(raw_fields)), Some(Value::Data(id))) = (parts.pop(), parts.pop()) else {
        return None;
    };

    let mut fields = HashMap::new();
    let mut raw = raw_fields.into_iter();
    while let (Some(Value::Data(key)), Some(Value::Data(value))) = (raw.next(), raw.next()) {
        fields.insert(String::from_utf8_lossy(&key).into_owned(), value);
    }

    Some(StreamEntry {
        id: String::from_utf8_lossy(&id).into_owned(),
        fields,
    })
}
