//! Training artifact generation.
//!
//! Turns an intent snapshot into the two documents the trainer consumes:
//!
//! - `nlu.yml`: per-intent example lists (training data)
//! - `domain.yml`: intent names, entity names, empty responses/slots/actions
//!
//! Both are rendered into scratch files next to their final paths and only
//! published (renamed into place) when the training data actually changed.
//! A reader never observes a partially written document, and a failed call
//! leaves no scratch files behind.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use voxnlu_core::Intent;

const NLU_FILE: &str = "nlu.yml";
const DOMAIN_FILE: &str = "domain.yml";
const SCRATCH_SUFFIX: &str = ".yml.tmp";
const FORMAT_VERSION: &str = "3.1";

/// `[span](label)` entity annotation inside an example.
static ENTITY_ANNOTATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]+\]\(([^)]+)\)").expect("entity annotation pattern is valid"));

/// Engine pipeline configuration written when `config.yml` is absent.
const DEFAULT_PIPELINE_CONFIG: &str = r#"language: ru

pipeline:
  - name: WhitespaceTokenizer

  - name: CountVectorsFeaturizer

  - name: DIETClassifier
    epochs: 100
    constrain_similarities: True
    intent_classification: True
    entity_recognition: True

  - name: EntitySynonymMapper

policies: []
"#;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to {op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ArtifactError {
    fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Rendered training documents for one intent snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingArtifacts {
    pub nlu: String,
    pub domain: String,
    /// Distinct entity labels found in the examples.
    pub entities: BTreeSet<String>,
}

impl TrainingArtifacts {
    /// Render both documents. Output is byte-identical for identical input order.
    pub fn render(intents: &[Intent]) -> Self {
        let entities = extract_entities(
            intents
                .iter()
                .flat_map(|i| i.examples.iter().map(String::as_str)),
        );

        let mut nlu = format!("version: \"{FORMAT_VERSION}\"\nnlu:\n");
        for intent in intents {
            nlu.push_str(&format!("- intent: {}\n  examples: |\n", quoted(&intent.name)));
            for example in &intent.examples {
                nlu.push_str(&format!("    - {example}\n"));
            }
        }

        let mut domain = format!("version: \"{FORMAT_VERSION}\"\nintents:\n");
        for intent in intents {
            domain.push_str(&format!("  - {}\n", quoted(&intent.name)));
        }
        if entities.is_empty() {
            domain.push_str("\nentities: []\n");
        } else {
            domain.push_str("\nentities:\n");
            for entity in &entities {
                domain.push_str(&format!("  - {}\n", quoted(entity)));
            }
        }
        domain.push_str("\nresponses: {}\n\nslots: {}\n\nactions: []\n");

        Self {
            nlu,
            domain,
            entities,
        }
    }
}

/// Double-quoted YAML scalar; a JSON string literal is one.
fn quoted(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

/// Collect the distinct entity labels annotated in `examples`.
pub fn extract_entities<'a>(examples: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    examples
        .into_iter()
        .flat_map(|ex| ENTITY_ANNOTATION.captures_iter(ex))
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Writes training artifacts into a directory with idempotent-publish semantics.
#[derive(Debug, Clone)]
pub struct ArtifactGenerator {
    dir: PathBuf,
}

impl ArtifactGenerator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn nlu_path(&self) -> PathBuf {
        self.dir.join(NLU_FILE)
    }

    pub fn domain_path(&self) -> PathBuf {
        self.dir.join(DOMAIN_FILE)
    }

    /// Render and publish artifacts for `intents`.
    ///
    /// Returns `true` when the documents were (re)published and `false` when
    /// the training data on disk already matches.
    pub fn generate(&self, intents: &[Intent]) -> Result<bool, ArtifactError> {
        let artifacts = TrainingArtifacts::render(intents);
        let changed = self.publish(&artifacts)?;
        info!(
            intents = intents.len(),
            entities = artifacts.entities.len(),
            changed,
            "training artifacts generated"
        );
        Ok(changed)
    }

    /// Publish already rendered artifacts (see [`ArtifactGenerator::generate`]).
    pub fn publish(&self, artifacts: &TrainingArtifacts) -> Result<bool, ArtifactError> {
        fs::create_dir_all(&self.dir).map_err(|e| ArtifactError::io("create directory", &self.dir, e))?;

        // Scratch files are deleted on drop unless persisted, so every early
        // return below cleans up after itself.
        let nlu_tmp = self.scratch("nlu-", artifacts.nlu.as_bytes())?;
        let domain_tmp = self.scratch("domain-", artifacts.domain.as_bytes())?;

        let nlu_path = self.nlu_path();
        let domain_path = self.domain_path();

        let current = read_optional(&nlu_path)?.unwrap_or_default();
        if current == artifacts.nlu.as_bytes() {
            debug!(path = %nlu_path.display(), "training data unchanged");
            return Ok(false);
        }

        // nlu.yml is the change marker, so it is published last: an
        // interrupted publication is detected as "changed" on the next call.
        let previous_domain = read_optional(&domain_path)?;
        persist(domain_tmp, &domain_path)?;
        if let Err(err) = persist(nlu_tmp, &nlu_path) {
            self.restore(&domain_path, previous_domain);
            return Err(err);
        }

        Ok(true)
    }

    fn scratch(&self, prefix: &str, content: &[u8]) -> Result<NamedTempFile, ArtifactError> {
        let mut file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(SCRATCH_SUFFIX)
            .tempfile_in(&self.dir)
            .map_err(|e| ArtifactError::io("create scratch file in", &self.dir, e))?;

        file.write_all(content)
            .and_then(|()| file.flush())
            .and_then(|()| file.as_file().sync_all())
            .map_err(|e| ArtifactError::io("write", file.path(), e))?;

        Ok(file)
    }

    fn restore(&self, path: &Path, previous: Option<Vec<u8>>) {
        let restored = match previous {
            Some(bytes) => self
                .scratch("restore-", &bytes)
                .and_then(|tmp| persist(tmp, path)),
            None => fs::remove_file(path).map_err(|e| ArtifactError::io("remove", path, e)),
        };
        if let Err(err) = restored {
            warn!(path = %path.display(), error = %err, "failed to roll back partially published artifact");
        }
    }
}

/// Write the default engine pipeline configuration unless `path` already exists.
///
/// Returns `true` when the file was created. An existing file is never
/// overwritten, even if another writer creates it concurrently.
pub fn ensure_default_config(path: &Path) -> Result<bool, ArtifactError> {
    match fs::metadata(path) {
        Ok(_) => return Ok(false),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(ArtifactError::io("inspect", path, e)),
    }

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| ArtifactError::io("create directory", &dir, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix("config-")
        .suffix(SCRATCH_SUFFIX)
        .tempfile_in(&dir)
        .map_err(|e| ArtifactError::io("create scratch file in", &dir, e))?;
    tmp.write_all(DEFAULT_PIPELINE_CONFIG.as_bytes())
        .and_then(|()| tmp.flush())
        .map_err(|e| ArtifactError::io("write", tmp.path(), e))?;

    match tmp.persist_noclobber(path) {
        Ok(_) => {
            info!(path = %path.display(), "default engine configuration written");
            Ok(true)
        }
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(ArtifactError::io("publish", path, e.error)),
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, ArtifactError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ArtifactError::io("read", path, e)),
    }
}

fn persist(tmp: NamedTempFile, path: &Path) -> Result<(), ArtifactError> {
    tmp.persist(path)
        .map(drop)
        .map_err(|e| ArtifactError::io("publish", path, e.error))
}
