//! Engine configuration: external programs, filesystem layout and timeouts.

use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_WORKDIR: &str = "/rasa";
const DEFAULT_PROGRAM: &str = "rasa";
const DEFAULT_MODEL_NAME: &str = "model-nlu-only";
const MODEL_BUNDLE_EXT: &str = "tar.gz";
const GENERATED_DIR: &str = "generated";
const CONFIG_FILE: &str = "config.yml";

/// Default upper bound for one framed result document (1 MiB).
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 1024 * 1024;

/// An external program plus its leading arguments.
///
/// Role-specific flags (model path, artifact paths, …) are appended by the
/// component that runs the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of the engine's filesystem layout.
    pub workdir: PathBuf,
    /// Inference engine command (`rasa shell nlu`).
    pub engine: CommandSpec,
    /// Trainer command (`rasa train nlu`).
    pub trainer: CommandSpec,
    /// Fixed model name handed to the trainer; the bundle is `<name>.tar.gz`.
    pub model_name: String,
    /// How long `stop` waits for a graceful exit before killing the engine.
    pub stop_timeout: Duration,
    /// Upper bound for one trainer run (`None` = wait indefinitely).
    pub train_timeout: Option<Duration>,
    /// Upper bound for one framed result document.
    pub max_document_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from(DEFAULT_WORKDIR),
            engine: CommandSpec::new(DEFAULT_PROGRAM).args(["shell", "nlu"]),
            trainer: CommandSpec::new(DEFAULT_PROGRAM).args(["train", "nlu"]),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            stop_timeout: Duration::from_secs(10),
            train_timeout: None,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        }
    }
}

impl EngineConfig {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            ..Self::default()
        }
    }

    /// Use `program` (e.g. a virtualenv's `rasa`) for both engine and trainer.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        let program = program.into();
        self.engine.program = program.clone();
        self.trainer.program = program;
        self
    }

    pub fn with_engine(mut self, engine: CommandSpec) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_trainer(mut self, trainer: CommandSpec) -> Self {
        self.trainer = trainer;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_train_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.train_timeout = timeout;
        self
    }

    pub fn with_max_document_bytes(mut self, max: usize) -> Self {
        self.max_document_bytes = max;
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Engine pipeline configuration (`<workdir>/config.yml`).
    pub fn config_path(&self) -> PathBuf {
        self.workdir.join(CONFIG_FILE)
    }

    /// Directory holding generated artifacts and the trained model.
    pub fn generated_dir(&self) -> PathBuf {
        self.workdir.join(GENERATED_DIR)
    }

    /// Trained model bundle (trainer output, engine input).
    pub fn model_path(&self) -> PathBuf {
        self.generated_dir()
            .join(format!("{}.{MODEL_BUNDLE_EXT}", self.model_name))
    }

    /// A model exists when the bundle path is present and not a directory.
    pub fn model_exists(&self) -> bool {
        std::fs::metadata(self.model_path()).is_ok_and(|m| !m.is_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_follows_workdir() {
        let cfg = EngineConfig::new("/srv/nlu");
        assert_eq!(cfg.config_path(), PathBuf::from("/srv/nlu/config.yml"));
        assert_eq!(cfg.generated_dir(), PathBuf::from("/srv/nlu/generated"));
        assert_eq!(
            cfg.model_path(),
            PathBuf::from("/srv/nlu/generated/model-nlu-only.tar.gz")
        );
    }

    #[test]
    fn with_program_rewires_both_commands() {
        let cfg = EngineConfig::default().with_program("/opt/venv/bin/rasa");
        assert_eq!(cfg.engine.program, "/opt/venv/bin/rasa");
        assert_eq!(cfg.engine.args, ["shell", "nlu"]);
        assert_eq!(cfg.trainer.program, "/opt/venv/bin/rasa");
        assert_eq!(cfg.trainer.args, ["train", "nlu"]);
    }

    #[test]
    fn directory_at_model_path_is_not_a_model() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path());
        assert!(!cfg.model_exists());

        std::fs::create_dir_all(cfg.model_path()).unwrap();
        assert!(!cfg.model_exists());

        std::fs::remove_dir(cfg.model_path()).unwrap();
        std::fs::write(cfg.model_path(), b"bundle").unwrap();
        assert!(cfg.model_exists());
    }
}
