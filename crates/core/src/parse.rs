//! Parse results produced by the inference engine for a single query.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Highest-ranked intent for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopIntent {
    pub name: String,
    pub confidence: f64,
}

/// An entity recognised in the query text.
///
/// `value` is whatever the engine extracted (usually a string, but synonym
/// mappers and numeric extractors can emit other JSON values).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMatch {
    pub entity: String,
    pub value: JsonValue,
    pub start: usize,
    pub end: usize,
}

/// Structured result for one query.
///
/// This is not persisted; it is published back to the requester as-is.
/// Extra engine fields (intent ranking, extractor names, …) are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub text: String,
    #[serde(rename = "intent")]
    pub top_intent: TopIntent,
    #[serde(default)]
    pub entities: Vec<EntityMatch>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_engine_output_and_ignores_extra_fields() {
        let raw = r#"{
            "text": "fly to paris",
            "intent": {"name": "book", "confidence": 0.87},
            "entities": [
                {"entity": "city", "value": "paris", "start": 7, "end": 12,
                 "extractor": "DIETClassifier", "confidence_entity": 0.99}
            ],
            "intent_ranking": [{"name": "book", "confidence": 0.87}]
        }"#;

        let res: ParseResult = serde_json::from_str(raw).unwrap();
        assert_eq!(res.top_intent.name, "book");
        assert_eq!(res.entities.len(), 1);
        assert_eq!(res.entities[0].value, JsonValue::from("paris"));
        assert_eq!((res.entities[0].start, res.entities[0].end), (7, 12));
    }

    #[test]
    fn serializes_top_intent_as_intent() {
        let res = ParseResult {
            text: "hi".to_string(),
            top_intent: TopIntent {
                name: "greet".to_string(),
                confidence: 0.5,
            },
            entities: vec![],
        };
        let json = serde_json::to_value(&res).unwrap();
        assert_eq!(json["intent"]["name"], "greet");
        assert!(json.get("top_intent").is_none());
    }

    #[test]
    fn missing_entities_default_to_empty() {
        let res: ParseResult =
            serde_json::from_str(r#"{"text":"x","intent":{"name":"a","confidence":1.0}}"#).unwrap();
        assert!(res.entities.is_empty());
    }
}
