//! Query façade and training orchestrator over the supervised engine.

use std::fs;
use std::io;
use std::sync::{Mutex, MutexGuard};

use tracing::{info, warn};

use voxnlu_core::{Intent, ParseResult};

use crate::artifacts::{ArtifactGenerator, ensure_default_config};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::supervisor::{EngineState, Supervisor};
use crate::trainer::{ProcessTrainer, Trainer, TrainingJob};

/// What a `retrain` call ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrainOutcome {
    /// Training data unchanged and a model exists; nothing was touched.
    Skipped,
    /// A new model was trained and the engine restarted onto it.
    Retrained,
}

/// Operations message handlers need from the engine.
pub trait NluEngine: Send + Sync {
    fn parse(&self, text: &str) -> Result<ParseResult, EngineError>;

    fn retrain(&self, intents: &[Intent]) -> Result<RetrainOutcome, EngineError>;

    /// Start the engine if a model exists. Returns whether it is running.
    fn ensure_started(&self) -> Result<bool, EngineError>;
}

/// Owns the engine subprocess and serialises every operation on it.
///
/// One lock covers parse round trips, start/stop, and the whole retrain
/// sequence (including the trainer run), so a query never observes a
/// half-restarted engine and replies are never interleaved.
pub struct Manager {
    config: EngineConfig,
    generator: ArtifactGenerator,
    trainer: Box<dyn Trainer>,
    supervisor: Mutex<Supervisor>,
}

impl Manager {
    /// Manager running the configured trainer command.
    pub fn new(config: EngineConfig) -> Self {
        let trainer =
            ProcessTrainer::new(config.trainer.clone()).with_timeout(config.train_timeout);
        Self::with_trainer(config, trainer)
    }

    pub fn with_trainer(config: EngineConfig, trainer: impl Trainer + 'static) -> Self {
        Self {
            generator: ArtifactGenerator::new(config.generated_dir()),
            trainer: Box::new(trainer),
            supervisor: Mutex::new(Supervisor::new(config.clone())),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> Result<EngineState, EngineError> {
        Ok(self.lock()?.state())
    }

    pub fn start(&self) -> Result<(), EngineError> {
        let mut sup = self.lock()?;
        ensure_default_config(&self.config.config_path())?;
        sup.start()
    }

    pub fn stop(&self) -> Result<(), EngineError> {
        self.lock()?.stop()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Supervisor>, EngineError> {
        self.supervisor.lock().map_err(|_| EngineError::Poisoned)
    }

    fn training_job(&self) -> TrainingJob {
        TrainingJob {
            workdir: self.config.workdir.clone(),
            config: self.config.config_path(),
            domain: self.generator.domain_path(),
            nlu: self.generator.nlu_path(),
            out_dir: self.config.generated_dir(),
            model_name: self.config.model_name.clone(),
        }
    }

    /// Forget the published training data so the next retrain runs the trainer again.
    fn invalidate_training_data(&self) {
        let path = self.generator.nlu_path();
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to invalidate training data"),
        }
    }
}

impl NluEngine for Manager {
    fn parse(&self, text: &str) -> Result<ParseResult, EngineError> {
        self.lock()?.round_trip(text)
    }

    fn retrain(&self, intents: &[Intent]) -> Result<RetrainOutcome, EngineError> {
        let mut sup = self.lock()?;

        fs::create_dir_all(self.config.generated_dir())?;
        ensure_default_config(&self.config.config_path())?;
        let changed = self.generator.generate(intents)?;

        if !changed && self.config.model_exists() {
            info!(intents = intents.len(), "training data unchanged, model kept");
            return Ok(RetrainOutcome::Skipped);
        }

        if let Err(err) = self.trainer.train(&self.training_job()) {
            // The running engine keeps serving the previous model.
            self.invalidate_training_data();
            return Err(err.into());
        }

        // Restart even when the old process would not stop cleanly; it has
        // been reaped or killed either way.
        if let Err(err) = sup.stop() {
            warn!(error = %err, "engine did not stop cleanly before restart");
        }
        sup.start()?;
        info!(intents = intents.len(), model = %self.config.model_path().display(), "engine retrained");
        Ok(RetrainOutcome::Retrained)
    }

    fn ensure_started(&self) -> Result<bool, EngineError> {
        let mut sup = self.lock()?;
        if sup.state() == EngineState::Running {
            return Ok(true);
        }

        ensure_default_config(&self.config.config_path())?;
        if !self.config.model_exists() {
            warn!(model = %self.config.model_path().display(), "no trained model yet, engine stays stopped");
            return Ok(false);
        }
        sup.start()?;
        Ok(true)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::CommandSpec;
    use crate::trainer::TrainingError;
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    const ECHO_ENGINE: &str = r#"while read line; do
  echo "loading..."
  printf '{"text":"%s","intent":{"name":"greet","confidence":0.9},"entities":[]}\n' "$line"
done
"#;

    #[derive(Clone, Default)]
    struct FakeTrainer {
        calls: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
        lose_model: Arc<AtomicBool>,
    }

    impl Trainer for FakeTrainer {
        fn train(&self, job: &TrainingJob) -> Result<(), TrainingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(TrainingError::Io(io::Error::other("trainer crashed")));
            }
            assert!(job.nlu.exists() && job.domain.exists() && job.config.exists());
            let bundle = job.out_dir.join(format!("{}.tar.gz", job.model_name));
            if self.lose_model.load(Ordering::SeqCst) {
                fs::remove_file(bundle)?;
                return Ok(());
            }
            fs::write(bundle, b"model")?;
            Ok(())
        }
    }

    fn manager(dir: &Path) -> (Manager, FakeTrainer) {
        let script = dir.join("engine.sh");
        fs::write(&script, ECHO_ENGINE).unwrap();
        let cfg = EngineConfig::new(dir)
            .with_engine(CommandSpec::new("sh").arg(script.to_string_lossy()))
            .with_stop_timeout(Duration::from_secs(2));
        let trainer = FakeTrainer::default();
        (Manager::with_trainer(cfg, trainer.clone()), trainer)
    }

    fn greet() -> Vec<Intent> {
        vec![Intent::new("greet", ["hello", "hi"]).unwrap()]
    }

    #[test]
    fn first_retrain_trains_and_starts_engine() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, trainer) = manager(dir.path());

        assert_eq!(mgr.retrain(&greet()).unwrap(), RetrainOutcome::Retrained);
        assert_eq!(trainer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.state().unwrap(), EngineState::Running);
        assert!(mgr.config().config_path().exists());

        let res = mgr.parse("hello").unwrap();
        assert_eq!(res.text, "hello");
        assert_eq!(res.top_intent.name, "greet");
    }

    #[test]
    fn unchanged_intents_skip_training() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, trainer) = manager(dir.path());

        mgr.retrain(&greet()).unwrap();
        assert_eq!(mgr.retrain(&greet()).unwrap(), RetrainOutcome::Skipped);
        assert_eq!(trainer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unchanged_intents_without_model_still_train() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, trainer) = manager(dir.path());

        mgr.retrain(&greet()).unwrap();
        mgr.stop().unwrap();
        fs::remove_file(mgr.config().model_path()).unwrap();

        assert_eq!(mgr.retrain(&greet()).unwrap(), RetrainOutcome::Retrained);
        assert_eq!(trainer.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_training_keeps_old_engine_serving() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, trainer) = manager(dir.path());
        mgr.retrain(&greet()).unwrap();

        trainer.fail.store(true, Ordering::SeqCst);
        let more = vec![Intent::new("greet", ["hello", "hi", "hey"]).unwrap()];
        assert!(matches!(mgr.retrain(&more), Err(EngineError::Training(_))));
        assert_eq!(mgr.state().unwrap(), EngineState::Running);
        assert_eq!(mgr.parse("hey").unwrap().text, "hey");

        // The failed attempt must not be mistaken for an up-to-date model.
        trainer.fail.store(false, Ordering::SeqCst);
        assert_eq!(mgr.retrain(&more).unwrap(), RetrainOutcome::Retrained);
        assert_eq!(trainer.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn ensure_started_without_model_stays_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, _) = manager(dir.path());

        assert!(!mgr.ensure_started().unwrap());
        assert_eq!(mgr.state().unwrap(), EngineState::Stopped);
        assert!(matches!(mgr.parse("hi"), Err(EngineError::Unavailable)));
    }

    #[test]
    fn ensure_started_recovers_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, _) = manager(dir.path());
        mgr.retrain(&greet()).unwrap();
        mgr.stop().unwrap();

        assert!(mgr.ensure_started().unwrap());
        assert_eq!(mgr.parse("hi").unwrap().text, "hi");
    }

    #[test]
    fn failed_restart_after_training_is_reported_and_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, trainer) = manager(dir.path());
        mgr.retrain(&greet()).unwrap();

        trainer.lose_model.store(true, Ordering::SeqCst);
        let more = vec![Intent::new("greet", ["hello", "hi", "hey"]).unwrap()];
        assert!(matches!(mgr.retrain(&more), Err(EngineError::ModelMissing(_))));
        assert_eq!(mgr.state().unwrap(), EngineState::Stopped);
        assert!(matches!(mgr.parse("hey"), Err(EngineError::Unavailable)));

        trainer.lose_model.store(false, Ordering::SeqCst);
        let again = vec![Intent::new("greet", ["hello", "hey"]).unwrap()];
        assert_eq!(mgr.retrain(&again).unwrap(), RetrainOutcome::Retrained);
        assert_eq!(mgr.parse("hey").unwrap().text, "hey");
    }
}
