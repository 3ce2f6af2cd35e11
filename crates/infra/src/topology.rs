//! Exchange, queue and binding names the service consumes.

use voxnlu_core::message::{CONFIG_ROUTING_KEY, UPSERT_ROUTING_KEY};

/// Topic exchange carrying commands, requests and parse responses.
pub const EXCHANGE: &str = "intents";

/// One durable queue bound to [`EXCHANGE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    /// Worker thread name.
    pub worker: &'static str,
    pub queue: &'static str,
    pub pattern: &'static str,
}

pub const CONFIG: Binding = Binding {
    worker: "intents-config",
    queue: "intents.config.q",
    pattern: CONFIG_ROUTING_KEY,
};

pub const UPSERT: Binding = Binding {
    worker: "intents-upsert",
    queue: "intents.upsert.q",
    pattern: UPSERT_ROUTING_KEY,
};

pub const REQUEST: Binding = Binding {
    worker: "intents-request",
    queue: "intents.request.q",
    pattern: "intents.request.*",
};

pub const INTENT_BINDINGS: [Binding; 3] = [CONFIG, UPSERT, REQUEST];

#[cfg(test)]
mod tests {
    use super::*;
    use voxnlu_bus::topic_matches;

    #[test]
    fn every_routing_key_lands_in_exactly_one_queue() {
        for key in ["intents.config", "intents.upsert", "intents.request.web"] {
            let hits = INTENT_BINDINGS
                .iter()
                .filter(|b| topic_matches(b.pattern, key))
                .count();
            assert_eq!(hits, 1, "{key}");
        }
    }

    #[test]
    fn responses_are_not_consumed() {
        assert!(
            INTENT_BINDINGS
                .iter()
                .all(|b| !topic_matches(b.pattern, "intents.response.web"))
        );
    }
}
