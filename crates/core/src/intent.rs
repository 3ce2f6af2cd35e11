//! Intent definitions: a named category of utterances with example phrasings.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// A named intent with its example utterances.
///
/// Examples may carry entity annotations in the `[span](label)` form; the
/// annotations are kept verbatim and only interpreted when training artifacts
/// are generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub name: String,
    #[serde(default)]
    pub examples: Vec<String>,
}

impl Intent {
    /// Build a validated intent.
    pub fn new(
        name: impl Into<String>,
        examples: impl IntoIterator<Item = impl Into<String>>,
    ) -> DomainResult<Self> {
        let intent = Self {
            name: name.into(),
            examples: examples.into_iter().map(Into::into).collect(),
        };
        intent.validate()?;
        Ok(intent)
    }

    /// Check the invariants the training documents rely on.
    ///
    /// Names and examples are emitted one per line, so neither may contain a
    /// line break; blank values would produce entries the trainer rejects.
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("intent name must not be empty"));
        }
        if self.name.trim() != self.name {
            return Err(DomainError::validation(format!(
                "intent name {:?} has surrounding whitespace",
                self.name
            )));
        }
        if has_line_break(&self.name) {
            return Err(DomainError::validation(format!(
                "intent name {:?} contains a line break",
                self.name
            )));
        }

        for (idx, example) in self.examples.iter().enumerate() {
            if example.trim().is_empty() {
                return Err(DomainError::validation(format!(
                    "intent {}: example #{idx} is empty",
                    self.name
                )));
            }
            if has_line_break(example) {
                return Err(DomainError::validation(format!(
                    "intent {}: example #{idx} contains a line break",
                    self.name
                )));
            }
        }

        Ok(())
    }
}

pub(crate) fn has_line_break(s: &str) -> bool {
    s.contains(['\n', '\r'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accepts_annotated_examples() {
        let intent = Intent::new("book", ["book a [flight](transport_type) to [Paris](city)"]).unwrap();
        assert_eq!(intent.name, "book");
        assert_eq!(intent.examples.len(), 1);
    }

    #[test]
    fn rejects_blank_name() {
        let err = Intent::new("  ", ["hello"]).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn rejects_padded_name() {
        assert!(Intent::new(" greet", ["hello"]).is_err());
    }

    #[test]
    fn rejects_multiline_example() {
        let err = Intent::new("greet", ["hello\nthere"]).unwrap_err();
        assert!(err.to_string().contains("line break"));
    }

    #[test]
    fn rejects_empty_example() {
        assert!(Intent::new("greet", ["hello", ""]).is_err());
    }

    #[test]
    fn examples_default_to_empty_when_absent() {
        let intent: Intent = serde_json::from_str(r#"{"name":"greet"}"#).unwrap();
        assert!(intent.examples.is_empty());
    }

    proptest! {
        #[test]
        fn single_line_examples_are_accepted(
            name in "[a-z_]{1,16}",
            examples in proptest::collection::vec("[a-zA-Z ]{0,20}[a-z]", 0..5),
        ) {
            prop_assert!(Intent::new(name, examples).is_ok());
        }

        #[test]
        fn any_line_break_is_rejected(
            head in "[a-z]{1,10}",
            tail in "[a-z]{0,10}",
            newline in prop_oneof![Just("\n"), Just("\r"), Just("\r\n")],
        ) {
            let example = format!("{head}{newline}{tail}");
            prop_assert!(Intent::new("greet", [example.clone()]).is_err());
            prop_assert!(Intent::new(example, ["hello"]).is_err());
        }
    }
}
