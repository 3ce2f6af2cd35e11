//! External trainer invocation.

use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{Level, info, warn};

use crate::config::CommandSpec;
use crate::output::{FORWARDER_GRACE, forward_lines, join_forwarder};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("failed to spawn trainer `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("trainer exited with {status}")]
    Failed { status: ExitStatus },

    #[error("trainer did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("trainer I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Inputs and outputs of one training run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingJob {
    pub workdir: PathBuf,
    pub config: PathBuf,
    pub domain: PathBuf,
    pub nlu: PathBuf,
    pub out_dir: PathBuf,
    pub model_name: String,
}

/// Produces a model bundle at `<out_dir>/<model_name>.tar.gz` from a job's artifacts.
pub trait Trainer: Send + Sync {
    fn train(&self, job: &TrainingJob) -> Result<(), TrainingError>;
}

/// Runs the trainer as a child process and waits for it.
#[derive(Debug, Clone)]
pub struct ProcessTrainer {
    command: CommandSpec,
    timeout: Option<Duration>,
}

impl ProcessTrainer {
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, job: &TrainingJob) -> Command {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .arg("-c")
            .arg(&job.config)
            .arg("-d")
            .arg(&job.domain)
            .arg("-u")
            .arg(&job.nlu)
            .arg("--out")
            .arg(&job.out_dir)
            .arg("--fixed-model-name")
            .arg(&job.model_name)
            .current_dir(&job.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus, TrainingError> {
        let Some(timeout) = self.timeout else {
            return Ok(child.wait()?);
        };

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                warn!(timeout = ?timeout, "trainer timed out, killing it");
                if let Err(err) = child.kill() {
                    warn!(error = %err, "failed to kill trainer");
                }
                let _ = child.wait();
                return Err(TrainingError::TimedOut(timeout));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Trainer for ProcessTrainer {
    fn train(&self, job: &TrainingJob) -> Result<(), TrainingError> {
        info!(
            program = %self.command.program,
            out_dir = %job.out_dir.display(),
            model = %job.model_name,
            "training started"
        );
        let started = Instant::now();

        let mut child = self
            .command(job)
            .spawn()
            .map_err(|source| TrainingError::Spawn {
                program: self.command.program.clone(),
                source,
            })?;

        let mut forwarders = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            forwarders.push(forward_lines("trainer-stdout".into(), "trainer", Level::INFO, stdout)?);
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.push(forward_lines("trainer-stderr".into(), "trainer", Level::INFO, stderr)?);
        }

        let status = self.wait(&mut child);
        for forwarder in forwarders {
            join_forwarder(forwarder, FORWARDER_GRACE);
        }
        let status = status?;

        if !status.success() {
            return Err(TrainingError::Failed { status });
        }
        info!(elapsed = ?started.elapsed(), "training finished");
        Ok(())
    }
}
