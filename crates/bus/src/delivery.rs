//! Inbound deliveries and their acknowledgement handle.

use uuid::Uuid;

use crate::error::BusError;

/// Final settlement of a delivery.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// Processed; remove from the queue.
    Ack,
    /// Rejected; `requeue = false` drops/dead-letters per broker policy.
    Nack { requeue: bool },
}

/// Transport-specific settlement hook.
///
/// Consumed by value so a delivery can be settled exactly once.
pub trait Acker: Send {
    fn settle(self: Box<Self>, outcome: AckOutcome) -> Result<(), BusError>;
}

/// A message pulled from a queue, awaiting settlement.
///
/// Dropping a delivery without settling it leaves it to the transport: the
/// in-memory bus forgets it, brokers redeliver it after their own timeout.
pub struct Delivery {
    id: Uuid,
    queue: String,
    routing_key: String,
    body: Vec<u8>,
    redelivered: bool,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(
        queue: impl Into<String>,
        routing_key: impl Into<String>,
        body: Vec<u8>,
        redelivered: bool,
        acker: Box<dyn Acker>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            queue: queue.into(),
            routing_key: routing_key.into(),
            body,
            redelivered,
            acker,
        }
    }

    /// Locally assigned identifier (log correlation only).
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn ack(self) -> Result<(), BusError> {
        self.acker.settle(AckOutcome::Ack)
    }

    pub fn nack(self, requeue: bool) -> Result<(), BusError> {
        self.acker.settle(AckOutcome::Nack { requeue })
    }
}

impl core::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Delivery")
            .field("id", &self.id)
            .field("queue", &self.queue)
            .field("routing_key", &self.routing_key)
            .field("body_len", &self.body.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}
