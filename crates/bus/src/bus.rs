//! Topic bus publishing/consuming abstraction (mechanics only).
//!
//! The bus follows broker topic semantics:
//!
//! - **Exchanges** receive published messages tagged with a routing key
//! - **Queues** are bound to an exchange with a topic pattern (`*`, `#`)
//! - **Consumers** pull deliveries from one queue and settle each exactly once
//!
//! ## Delivery guarantees
//!
//! At-least-once: an unsettled or requeued delivery may arrive again, so
//! handlers must be idempotent-safe. A delivery that is nacked without requeue
//! is dropped (or dead-lettered, depending on the transport).

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use serde::Serialize;

use crate::delivery::Delivery;
use crate::error::BusError;

/// A consumer's view of one queue.
///
/// Subscriptions are designed for single-threaded consumption: each one
/// should be drained by a single worker.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Transport-agnostic topic bus.
///
/// The trait requires `Send + Sync`: publishers on several worker threads
/// share one bus.
pub trait MessageBus: Send + Sync {
    /// Publish a raw payload to `exchange` under `routing_key`.
    fn publish(&self, exchange: &str, routing_key: &str, body: Vec<u8>) -> Result<(), BusError>;

    /// Declare `queue`, bind it to `exchange` with `pattern`, and start consuming it.
    fn consume(&self, exchange: &str, queue: &str, pattern: &str) -> Result<Subscription<Delivery>, BusError>;

    /// Publish a value as a JSON document.
    fn publish_json<T>(&self, exchange: &str, routing_key: &str, value: &T) -> Result<(), BusError>
    where
        T: Serialize + ?Sized,
        Self: Sized,
    {
        let body = serde_json::to_vec(value).map_err(|e| BusError::Serialization(e.to_string()))?;
        self.publish(exchange, routing_key, body)
    }
}

impl<B> MessageBus for Arc<B>
where
    B: MessageBus + ?Sized,
{
    fn publish(&self, exchange: &str, routing_key: &str, body: Vec<u8>) -> Result<(), BusError> {
        (**self).publish(exchange, routing_key, body)
    }

    fn consume(&self, exchange: &str, queue: &str, pattern: &str) -> Result<Subscription<Delivery>, BusError> {
        (**self).consume(exchange, queue, pattern)
    }
}
