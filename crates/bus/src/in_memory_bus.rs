//! In-memory topic bus for tests/dev.

use std::sync::{Arc, Mutex, mpsc};

use tracing::debug;

use crate::bus::{MessageBus, Subscription};
use crate::delivery::{AckOutcome, Acker, Delivery};
use crate::error::BusError;
use crate::topic::topic_matches;

/// A message accepted by [`InMemoryBus::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
}

impl Published {
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Settlement of one delivery, as observed by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRecord {
    pub queue: String,
    pub routing_key: String,
    pub outcome: AckOutcome,
}

#[derive(Debug)]
struct Queue {
    name: String,
    exchange: String,
    pattern: String,
    sender: mpsc::Sender<Delivery>,
}

#[derive(Debug, Default)]
struct State {
    queues: Vec<Queue>,
    published: Vec<Published>,
}

/// In-memory topic bus.
///
/// - No IO / no async
/// - One consumer per queue, fan-out across queues
/// - Requeued deliveries go back to their queue flagged as redelivered
/// - Every publish and settlement is recorded for inspection
#[derive(Debug, Default, Clone)]
pub struct InMemoryBus {
    state: Arc<Mutex<State>>,
    acks: Arc<Mutex<Vec<AckRecord>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message published so far, in order.
    pub fn published(&self) -> Vec<Published> {
        self.state
            .lock()
            .map(|s| s.published.clone())
            .unwrap_or_default()
    }

    /// Every settlement so far, in order.
    pub fn acks(&self) -> Vec<AckRecord> {
        self.acks.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

struct InMemoryAcker {
    queue: String,
    routing_key: String,
    body: Vec<u8>,
    requeue_to: mpsc::Sender<Delivery>,
    acks: Arc<Mutex<Vec<AckRecord>>>,
}

impl Acker for InMemoryAcker {
    fn settle(self: Box<Self>, outcome: AckOutcome) -> Result<(), BusError> {
        self.acks.lock().map_err(|_| BusError::Poisoned)?.push(AckRecord {
            queue: self.queue.clone(),
            routing_key: self.routing_key.clone(),
            outcome,
        });

        if outcome == (AckOutcome::Nack { requeue: true }) {
            let this = *self;
            let sender = this.requeue_to.clone();
            let delivery = make_delivery(
                this.queue,
                this.routing_key,
                this.body,
                true,
                sender.clone(),
                this.acks,
            );
            sender.send(delivery).map_err(|_| BusError::Closed)?;
        }

        Ok(())
    }
}

fn make_delivery(
    queue: String,
    routing_key: String,
    body: Vec<u8>,
    redelivered: bool,
    sender: mpsc::Sender<Delivery>,
    acks: Arc<Mutex<Vec<AckRecord>>>,
) -> Delivery {
    let acker = InMemoryAcker {
        queue: queue.clone(),
        routing_key: routing_key.clone(),
        body: body.clone(),
        requeue_to: sender,
        acks,
    };
    Delivery::new(queue, routing_key, body, redelivered, Box::new(acker))
}

impl MessageBus for InMemoryBus {
    fn publish(&self, exchange: &str, routing_key: &str, body: Vec<u8>) -> Result<(), BusError> {
        let mut state = self.state.lock().map_err(|_| BusError::Poisoned)?;

        state.published.push(Published {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.clone(),
        });

        // Drop queues whose consumer went away while publishing.
        let acks = &self.acks;
        state.queues.retain(|q| {
            if q.exchange != exchange || !topic_matches(&q.pattern, routing_key) {
                return true;
            }
            let delivery = make_delivery(
                q.name.clone(),
                routing_key.to_string(),
                body.clone(),
                false,
                q.sender.clone(),
                acks.clone(),
            );
            q.sender.send(delivery).is_ok()
        });

        debug!(exchange, routing_key, "message published");
        Ok(())
    }

    fn consume(&self, exchange: &str, queue: &str, pattern: &str) -> Result<Subscription<Delivery>, BusError> {
        let mut state = self.state.lock().map_err(|_| BusError::Poisoned)?;
        if state.queues.iter().any(|q| q.name == queue) {
            return Err(BusError::QueueInUse(queue.to_string()));
        }

        let (tx, rx) = mpsc::channel();
        state.queues.push(Queue {
            name: queue.to_string(),
            exchange: exchange.to_string(),
            pattern: pattern.to_string(),
            sender: tx,
        });

        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const WAIT: Duration = Duration::from_millis(200);

    #[test]
    fn routes_by_topic_pattern() {
        let bus = InMemoryBus::new();
        let requests = bus.consume("intents", "intents.request.q", "intents.request.*").unwrap();
        let config = bus.consume("intents", "intents.config.q", "intents.config").unwrap();

        bus.publish("intents", "intents.request.web", b"{}".to_vec()).unwrap();
        bus.publish("other", "intents.request.web", b"{}".to_vec()).unwrap();

        let d = requests.recv_timeout(WAIT).unwrap();
        assert_eq!(d.routing_key(), "intents.request.web");
        assert_eq!(d.queue(), "intents.request.q");
        assert!(!d.redelivered());
        assert!(requests.try_recv().is_err());
        assert!(config.try_recv().is_err());
        assert_eq!(bus.published().len(), 2);
    }

    #[test]
    fn records_ack_and_nack() {
        let bus = InMemoryBus::new();
        let sub = bus.consume("intents", "q", "#").unwrap();
        bus.publish("intents", "a", b"1".to_vec()).unwrap();
        bus.publish("intents", "b", b"2".to_vec()).unwrap();

        sub.recv_timeout(WAIT).unwrap().ack().unwrap();
        sub.recv_timeout(WAIT).unwrap().nack(false).unwrap();

        let outcomes: Vec<_> = bus.acks().into_iter().map(|r| (r.routing_key, r.outcome)).collect();
        assert_eq!(
            outcomes,
            [
                ("a".to_string(), AckOutcome::Ack),
                ("b".to_string(), AckOutcome::Nack { requeue: false }),
            ]
        );
        assert!(sub.try_recv().is_err());
    }

    #[test]
    fn nack_with_requeue_redelivers() {
        let bus = InMemoryBus::new();
        let sub = bus.consume("intents", "q", "#").unwrap();
        bus.publish("intents", "a", b"payload".to_vec()).unwrap();

        sub.recv_timeout(WAIT).unwrap().nack(true).unwrap();
        let again = sub.recv_timeout(WAIT).unwrap();
        assert!(again.redelivered());
        assert_eq!(again.body(), b"payload");
    }

    #[test]
    fn queue_has_single_consumer() {
        let bus = InMemoryBus::new();
        let _sub = bus.consume("intents", "q", "#").unwrap();
        assert!(matches!(bus.consume("intents", "q", "#"), Err(BusError::QueueInUse(_))));
    }

    #[test]
    fn publish_json_serializes_value() {
        let bus = InMemoryBus::new();
        bus.publish_json("intents", "intents.response.web", &serde_json::json!({"ok": true}))
            .unwrap();
        assert_eq!(bus.published()[0].json().unwrap()["ok"], true);
    }
}
