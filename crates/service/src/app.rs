//! Application lifecycle: engine boot, consumers, orderly shutdown.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use voxnlu_bus::MessageBus;
use voxnlu_core::IntentRegistry;
use voxnlu_engine::{Manager, NluEngine};
use voxnlu_infra::{IntentHandlers, WorkerHandle, spawn_intent_consumers};

use crate::config::ServiceConfig;

/// A running service instance.
pub struct App {
    manager: Arc<Manager>,
    registry: Arc<IntentRegistry>,
    workers: Vec<WorkerHandle>,
}

impl App {
    /// Boot against the configured broker.
    #[cfg(feature = "redis")]
    pub fn start(config: &ServiceConfig) -> anyhow::Result<Self> {
        let bus = voxnlu_infra::event_bus::RedisStreamsBus::new(&config.bus_url)
            .context("invalid bus URL")?;
        bus.ping()
            .with_context(|| format!("bus unreachable at {}", config.bus_url))?;
        Self::start_with_bus(config, bus)
    }

    /// Boot against a process-local bus (nothing outside the process can reach it).
    #[cfg(not(feature = "redis"))]
    pub fn start(config: &ServiceConfig) -> anyhow::Result<Self> {
        warn!("built without a broker transport, using the in-memory bus");
        Self::start_with_bus(config, voxnlu_bus::InMemoryBus::new())
    }

    /// Start the engine (if a model exists) and the intent consumers on `bus`.
    ///
    /// A missing model is not an error: the engine stays stopped until the
    /// first training. Failing to spawn an existing model's engine is.
    pub fn start_with_bus<B>(config: &ServiceConfig, bus: B) -> anyhow::Result<Self>
    where
        B: MessageBus + 'static,
    {
        let manager = Arc::new(Manager::new(config.engine_config()));
        let running = manager
            .ensure_started()
            .context("failed to start the NLU engine")?;
        if !running {
            warn!(workdir = %config.rasa_path.display(), "engine not started, waiting for training");
        }

        let registry = Arc::new(IntentRegistry::new());
        let handlers = Arc::new(IntentHandlers::new(
            Arc::clone(&registry),
            Arc::clone(&manager),
            bus,
        ));
        let workers = match spawn_intent_consumers(handlers) {
            Ok(workers) => workers,
            Err(err) => {
                let _ = manager.stop();
                return Err(err).context("failed to bind intent queues");
            }
        };

        info!(consumers = workers.len(), "NLU adapter started");
        Ok(Self {
            manager,
            registry,
            workers,
        })
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub fn registry(&self) -> &IntentRegistry {
        &self.registry
    }

    /// Stop consuming, then stop the engine.
    pub fn shutdown(self) {
        for worker in self.workers {
            let name = worker.name();
            worker.shutdown();
            info!(worker = name, "consumer stopped");
        }
        if let Err(err) = self.manager.stop() {
            warn!(error = %err, "engine did not stop cleanly");
        }
        info!("NLU adapter stopped");
    }
}
