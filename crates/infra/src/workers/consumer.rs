use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use voxnlu_bus::{BusError, Delivery, MessageBus, Subscription};
use voxnlu_engine::NluEngine;

use crate::error::HandlerError;
use crate::handlers::IntentHandlers;
use crate::topology::{EXCHANGE, INTENT_BINDINGS};

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// A delivery already being handled is finished and settled first.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Queue consumer loop.
///
/// - Pulls deliveries from one subscription
/// - Acks on success, nacks without requeue on failure (dead-letter)
/// - Supports graceful shutdown
#[derive(Debug)]
pub struct ConsumerWorker;

impl ConsumerWorker {
    /// Spawn a worker thread that settles every delivery exactly once.
    pub fn spawn<H>(name: &'static str, sub: Subscription<Delivery>, mut handler: H) -> WorkerHandle
    where
        H: FnMut(&Delivery) -> Result<(), HandlerError> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, &mut handler))
            .expect("failed to spawn consumer worker thread");

        WorkerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

fn worker_loop<H>(
    name: &'static str,
    sub: Subscription<Delivery>,
    shutdown_rx: mpsc::Receiver<()>,
    handler: &mut H,
) where
    H: FnMut(&Delivery) -> Result<(), HandlerError>,
{
    let tick = Duration::from_millis(250);

    loop {
        // Shutdown check (non-blocking)
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(delivery) => {
                let outcome = handler(&delivery);
                settle(name, delivery, outcome);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                warn!(worker = name, "subscription closed, consumer stopping");
                break;
            }
        }
    }
}

fn settle(name: &'static str, delivery: Delivery, outcome: Result<(), HandlerError>) {
    let id = delivery.id();
    let routing_key = delivery.routing_key().to_string();

    let settled = match outcome {
        Ok(()) => {
            info!(worker = name, %id, %routing_key, "delivery handled");
            delivery.ack()
        }
        Err(err) => {
            warn!(worker = name, %id, %routing_key, error = %err, "delivery rejected");
            delivery.nack(false)
        }
    };

    if let Err(err) = settled {
        error!(worker = name, %id, %routing_key, error = %err, "failed to settle delivery");
    }
}

/// Bind the intent queues on the handlers' bus and start one consumer per queue.
pub fn spawn_intent_consumers<E, B>(handlers: Arc<IntentHandlers<E, B>>) -> Result<Vec<WorkerHandle>, BusError>
where
    E: NluEngine + 'static,
    B: MessageBus + 'static,
{
    let mut workers = Vec::with_capacity(INTENT_BINDINGS.len());
    for binding in INTENT_BINDINGS {
        let sub = match handlers.bus().consume(EXCHANGE, binding.queue, binding.pattern) {
            Ok(sub) => sub,
            Err(err) => {
                workers.into_iter().for_each(WorkerHandle::shutdown);
                return Err(err);
            }
        };
        let handlers = Arc::clone(&handlers);
        workers.push(ConsumerWorker::spawn(binding.worker, sub, move |d| {
            handlers.handle(d.routing_key(), d.body())
        }));
        info!(queue = binding.queue, pattern = binding.pattern, "consumer started");
    }
    Ok(workers)
}
