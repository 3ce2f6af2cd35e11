//! Typed command messages accepted at the message-bus boundary.
//!
//! Payloads are decoded and validated here, before anything reaches the
//! engine. The routing key selects the message kind:
//!
//! | Routing key          | Body                                        | Command          |
//! |----------------------|---------------------------------------------|------------------|
//! | `intents.upsert`     | `{"intent": "...", "examples": [...]}`      | `UpsertIntent`   |
//! | `intents.config`     | `[{"name": "...", "examples": [...]}, ...]` | `TrainIntents`   |
//! | `intents.config`     | `{}` or empty                               | `TrainAll`       |
//! | `intents.request.*`  | `{"text": "..."}`                           | `ParseText`      |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{DomainError, DomainResult};
use crate::intent::{Intent, has_line_break};

/// Routing key for training/config messages.
pub const CONFIG_ROUTING_KEY: &str = "intents.config";
/// Routing key for single-intent upserts.
pub const UPSERT_ROUTING_KEY: &str = "intents.upsert";
/// Routing key prefix for parse requests (`intents.request.<origin>`).
pub const REQUEST_ROUTING_PREFIX: &str = "intents.request";

/// "Upsert intent" payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertIntent {
    pub intent: String,
    #[serde(default)]
    pub examples: Vec<String>,
}

impl UpsertIntent {
    pub fn into_intent(self) -> DomainResult<Intent> {
        Intent::new(self.intent, self.examples)
    }
}

/// "Parse text" payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseText {
    pub text: String,
}

impl ParseText {
    pub fn validate(&self) -> DomainResult<()> {
        if self.text.trim().is_empty() {
            return Err(DomainError::validation("parse text must not be empty"));
        }
        if has_line_break(&self.text) {
            return Err(DomainError::validation("parse text must be a single line"));
        }
        Ok(())
    }
}

/// A decoded, validated inbound command.
#[derive(Debug, Clone, PartialEq)]
pub enum NluCommand {
    /// Insert or replace one intent in the registry.
    UpsertIntent(Intent),
    /// Replace the registry with these intents and retrain.
    TrainIntents(Vec<Intent>),
    /// Retrain from the current registry content.
    TrainAll,
    /// Classify one utterance.
    ParseText(ParseText),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ConfigBody {
    Intents(Vec<Intent>),
    All(Map<String, JsonValue>),
}

impl NluCommand {
    /// Decode a raw bus payload using its routing key.
    pub fn decode(routing_key: &str, body: &[u8]) -> DomainResult<Self> {
        if routing_key == UPSERT_ROUTING_KEY {
            let msg: UpsertIntent = from_json(body)?;
            return Ok(Self::UpsertIntent(msg.into_intent()?));
        }

        if routing_key == CONFIG_ROUTING_KEY {
            if body.iter().all(u8::is_ascii_whitespace) {
                return Ok(Self::TrainAll);
            }
            return match from_json::<ConfigBody>(body)? {
                ConfigBody::Intents(intents) => {
                    for intent in &intents {
                        intent.validate()?;
                    }
                    Ok(Self::TrainIntents(intents))
                }
                ConfigBody::All(_) => Ok(Self::TrainAll),
            };
        }

        if is_request_key(routing_key) {
            let msg: ParseText = from_json(body)?;
            msg.validate()?;
            return Ok(Self::ParseText(msg));
        }

        Err(DomainError::unroutable(routing_key))
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpsertIntent(_) => "upsert_intent",
            Self::TrainIntents(_) => "train_intents",
            Self::TrainAll => "train_all",
            Self::ParseText(_) => "parse_text",
        }
    }
}

fn is_request_key(routing_key: &str) -> bool {
    routing_key
        .strip_prefix(REQUEST_ROUTING_PREFIX)
        .and_then(|rest| rest.strip_prefix('.'))
        .is_some_and(|origin| !origin.is_empty() && !origin.contains('.'))
}

fn from_json<T: for<'de> Deserialize<'de>>(body: &[u8]) -> DomainResult<T> {
    serde_json::from_slice(body).map_err(|e| DomainError::malformed(e.to_string()))
}
