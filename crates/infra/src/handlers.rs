//! Maps decoded bus commands onto the intent registry and the engine.

use std::sync::Arc;

use tracing::{info, warn};

use voxnlu_bus::{MessageBus, response_routing_key};
use voxnlu_core::{IntentRegistry, NluCommand, ParseResult};
use voxnlu_engine::{EngineError, NluEngine};

use crate::error::HandlerError;
use crate::topology::EXCHANGE;

/// Command handlers shared by every consumer worker.
pub struct IntentHandlers<E, B> {
    registry: Arc<IntentRegistry>,
    engine: Arc<E>,
    bus: B,
}

impl<E, B> IntentHandlers<E, B>
where
    E: NluEngine,
    B: MessageBus,
{
    pub fn new(registry: Arc<IntentRegistry>, engine: Arc<E>, bus: B) -> Self {
        Self {
            registry,
            engine,
            bus,
        }
    }

    pub fn registry(&self) -> &IntentRegistry {
        &self.registry
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Decode one raw delivery and run it.
    pub fn handle(&self, routing_key: &str, body: &[u8]) -> Result<(), HandlerError> {
        let command = NluCommand::decode(routing_key, body)?;
        info!(routing_key, kind = command.kind(), "handling command");
        self.dispatch(routing_key, command)
    }

    pub fn dispatch(&self, routing_key: &str, command: NluCommand) -> Result<(), HandlerError> {
        match command {
            NluCommand::UpsertIntent(intent) => {
                let name = intent.name.clone();
                let replaced = self.registry.upsert(intent).is_some();
                info!(intent = %name, replaced, "intent upserted");
                Ok(())
            }
            NluCommand::TrainIntents(intents) => {
                self.registry.replace_all(intents);
                self.retrain()
            }
            NluCommand::TrainAll => self.retrain(),
            NluCommand::ParseText(query) => {
                let result = self.parse(&query.text)?;
                let reply_key = response_routing_key(routing_key);
                self.bus.publish_json(EXCHANGE, &reply_key, &result)?;
                info!(
                    routing_key = %reply_key,
                    intent = %result.top_intent.name,
                    confidence = result.top_intent.confidence,
                    "parse result published"
                );
                Ok(())
            }
        }
    }

    fn retrain(&self) -> Result<(), HandlerError> {
        let intents = self.registry.all();
        let outcome = self.engine.retrain(&intents)?;
        info!(intents = intents.len(), ?outcome, "retrain finished");
        Ok(())
    }

    fn parse(&self, text: &str) -> Result<ParseResult, EngineError> {
        self.engine.parse(text).inspect_err(|err| {
            if err.is_terminal() {
                // The failed message is not retried; the next one gets a fresh engine.
                match self.engine.ensure_started() {
                    Ok(running) => warn!(running, error = %err, "engine restarted after protocol failure"),
                    Err(restart) => warn!(error = %restart, "engine restart after protocol failure failed"),
                }
            }
        })
    }
}
