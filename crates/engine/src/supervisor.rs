//! Lifecycle of the single inference engine subprocess.
//!
//! ```text
//! Stopped ──start──► Starting ──spawned──► Running ──stop──► Stopping ──► Stopped
//!    ▲                   │                    │
//!    └──── spawn error ──┘                    └── protocol / I/O error (torn down)
//! ```

use std::fmt;
use std::io::{self, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use tracing::{Level, debug, info, warn};

use crate::codec::ResultReader;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::output::{FORWARDER_GRACE, forward_lines, join_forwarder};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Engine process state as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

struct EngineProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: ResultReader<BufReader<ChildStdout>>,
    stderr: Option<thread::JoinHandle<()>>,
}

/// Owns at most one engine subprocess and speaks its query protocol.
///
/// Not synchronised on its own; [`crate::Manager`] puts it behind a lock.
pub struct Supervisor {
    config: EngineConfig,
    state: EngineState,
    process: Option<EngineProcess>,
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &self.state)
            .field("pid", &self.pid())
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: EngineState::Stopped,
            process: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// OS process id of the running engine, if any.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|p| p.child.id())
    }

    /// Spawn the engine onto the current model. No-op when already running.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.state == EngineState::Running {
            return Ok(());
        }

        let model = self.config.model_path();
        if !self.config.model_exists() {
            return Err(EngineError::ModelMissing(model));
        }

        self.state = EngineState::Starting;
        match self.spawn() {
            Ok(process) => {
                info!(pid = process.child.id(), model = %model.display(), "engine started");
                self.process = Some(process);
                self.state = EngineState::Running;
                Ok(())
            }
            Err(err) => {
                self.state = EngineState::Stopped;
                Err(err)
            }
        }
    }

    fn spawn(&self) -> Result<EngineProcess, EngineError> {
        let engine = &self.config.engine;
        let mut child = Command::new(&engine.program)
            .args(&engine.args)
            .arg("--model")
            .arg(self.config.model_path())
            .arg("--quiet")
            .arg("--json")
            .env(
                "PYTHONWARNINGS",
                "ignore::DeprecationWarning,ignore::FutureWarning",
            )
            .env("SQLALCHEMY_SILENCE_UBER_WARNING", "1")
            .current_dir(&self.config.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: engine.program.clone(),
                source,
            })?;

        let pipes = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let (Some(stdin), Some(stdout), Some(stderr)) = pipes else {
            kill_and_reap(&mut child);
            return Err(EngineError::Io(io::Error::other("engine pipes were not captured")));
        };

        let stderr = match forward_lines(
            format!("engine-stderr-{}", child.id()),
            "engine",
            Level::DEBUG,
            stderr,
        ) {
            Ok(handle) => handle,
            Err(err) => {
                kill_and_reap(&mut child);
                return Err(EngineError::Io(err));
            }
        };

        Ok(EngineProcess {
            child,
            stdin: Some(stdin),
            stdout: ResultReader::new(BufReader::new(stdout))
                .with_max_document_bytes(self.config.max_document_bytes),
            stderr: Some(stderr),
        })
    }

    /// Stop the engine: close stdin, interrupt, wait up to the stop timeout, then kill.
    pub fn stop(&mut self) -> Result<(), EngineError> {
        let Some(mut process) = self.process.take() else {
            self.state = EngineState::Stopped;
            return Ok(());
        };

        self.state = EngineState::Stopping;
        let pid = process.child.id();

        drop(process.stdin.take());
        interrupt(&process.child);

        let result = wait_with_timeout(&mut process.child, self.config.stop_timeout);
        let status = match result {
            Ok(Some(status)) => Ok(status),
            Ok(None) => {
                warn!(pid, timeout = ?self.config.stop_timeout, "engine ignored interrupt, killing it");
                process.child.kill().and_then(|()| process.child.wait())
            }
            Err(err) => {
                kill_and_reap(&mut process.child);
                Err(err)
            }
        };

        if let Some(stderr) = process.stderr.take() {
            join_forwarder(stderr, FORWARDER_GRACE);
        }
        self.state = EngineState::Stopped;

        let status = status?;
        info!(pid, %status, "engine stopped");
        Ok(())
    }

    /// Send one query line and read its result document.
    ///
    /// The stream is torn down (state `Stopped`) on any protocol or I/O
    /// error, since the engine can no longer be trusted to answer in order.
    pub fn round_trip<T: DeserializeOwned>(&mut self, text: &str) -> Result<T, EngineError> {
        if text.contains(['\n', '\r']) {
            return Err(EngineError::InvalidQuery(
                "query must be a single line".to_string(),
            ));
        }
        if self.state != EngineState::Running {
            return Err(EngineError::Unavailable);
        }
        let Some(process) = self.process.as_mut() else {
            return Err(EngineError::Unavailable);
        };

        let written = match process.stdin.as_mut() {
            Some(stdin) => stdin
                .write_all(text.as_bytes())
                .and_then(|()| stdin.write_all(b"\n"))
                .and_then(|()| stdin.flush()),
            None => Err(io::Error::from(io::ErrorKind::BrokenPipe)),
        };
        if let Err(err) = written {
            warn!(error = %err, "engine stdin closed, tearing down");
            self.tear_down();
            return Err(EngineError::Io(err));
        }
        debug!(query = text, "query sent to engine");

        match process.stdout.next_result() {
            Ok(result) => Ok(result),
            Err(err) => {
                warn!(error = %err, "engine output out of sync, tearing down");
                self.tear_down();
                Err(err.into())
            }
        }
    }

    fn tear_down(&mut self) {
        if let Err(err) = self.stop() {
            warn!(error = %err, "engine teardown failed");
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if self.process.is_some() {
            self.tear_down();
        }
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn kill_and_reap(child: &mut Child) {
    if let Err(err) = child.kill() {
        debug!(error = %err, "engine already gone");
    }
    let _ = child.wait();
}

#[cfg(unix)]
fn interrupt(child: &Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(child.id()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGINT) {
        debug!(error = %err, "failed to interrupt engine");
    }
}

#[cfg(not(unix))]
fn interrupt(_child: &Child) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::codec::ProtocolError;
    use crate::config::CommandSpec;
    use serde_json::Value;
    use std::fs;
    use std::path::Path;

    const ECHO_ENGINE: &str = r#"while read line; do
  echo "noise before result"
  printf '{"text":"%s","intent":{"name":"greet","confidence":0.9},"entities":[]}\n' "$line"
done
"#;

    const PRETTY_ENGINE: &str = r#"while read line; do
  echo "loading pipeline..."
  printf '{\n  "text": "%s",\n  "intent": {\n    "name": "greet",\n    "confidence": 0.9\n  },\n  "entities": []\n}\n' "$line"
done
"#;

    fn config(dir: &Path, script: &str) -> EngineConfig {
        let path = dir.join("engine.sh");
        fs::write(&path, script).unwrap();
        let cfg = EngineConfig::new(dir)
            .with_engine(CommandSpec::new("sh").arg(path.to_string_lossy()))
            .with_stop_timeout(Duration::from_secs(2));
        fs::create_dir_all(cfg.generated_dir()).unwrap();
        fs::write(cfg.model_path(), b"model").unwrap();
        cfg
    }

    #[test]
    fn start_requires_a_model() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), ECHO_ENGINE);
        fs::remove_file(cfg.model_path()).unwrap();

        let mut sup = Supervisor::new(cfg);
        assert!(matches!(sup.start(), Err(EngineError::ModelMissing(_))));
        assert_eq!(sup.state(), EngineState::Stopped);
    }

    #[test]
    fn round_trip_skips_noise_and_returns_result() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = Supervisor::new(config(dir.path(), ECHO_ENGINE));
        sup.start().unwrap();
        assert_eq!(sup.state(), EngineState::Running);

        let first: Value = sup.round_trip("hello").unwrap();
        let second: Value = sup.round_trip("good morning").unwrap();
        assert_eq!(first["text"], "hello");
        assert_eq!(second["text"], "good morning");

        sup.stop().unwrap();
        assert_eq!(sup.state(), EngineState::Stopped);
        assert!(sup.pid().is_none());
    }

    #[test]
    fn start_is_idempotent_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = Supervisor::new(config(dir.path(), ECHO_ENGINE));
        sup.start().unwrap();
        let pid = sup.pid();
        sup.start().unwrap();
        assert_eq!(sup.pid(), pid);
    }

    #[test]
    fn stopped_engine_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = Supervisor::new(config(dir.path(), ECHO_ENGINE));
        assert!(matches!(
            sup.round_trip::<Value>("hi"),
            Err(EngineError::Unavailable)
        ));
        sup.stop().unwrap();
    }

    #[test]
    fn multi_line_query_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = Supervisor::new(config(dir.path(), ECHO_ENGINE));
        sup.start().unwrap();
        assert!(matches!(
            sup.round_trip::<Value>("one\ntwo"),
            Err(EngineError::InvalidQuery(_))
        ));
        assert_eq!(sup.state(), EngineState::Running);
    }

    #[test]
    fn engine_exit_tears_the_handle_down() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = Supervisor::new(config(dir.path(), "read line\necho bye\n"));
        sup.start().unwrap();

        let err = sup.round_trip::<Value>("hello").unwrap_err();
        assert!(err.is_terminal());
        assert_eq!(sup.state(), EngineState::Stopped);
        assert!(sup.pid().is_none());
    }

    #[test]
    fn engine_ignoring_interrupt_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let script = "trap '' INT\nwhile true; do sleep 1; done\n";
        let cfg = config(dir.path(), script).with_stop_timeout(Duration::from_millis(300));
        let mut sup = Supervisor::new(cfg);
        sup.start().unwrap();

        let started = Instant::now();
        sup.stop().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(sup.state(), EngineState::Stopped);
    }

    #[test]
    fn spawn_failure_returns_to_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), ECHO_ENGINE)
            .with_engine(CommandSpec::new("/definitely/not/an/engine"));
        let mut sup = Supervisor::new(cfg);
        assert!(matches!(sup.start(), Err(EngineError::Spawn { .. })));
        assert_eq!(sup.state(), EngineState::Stopped);
    }

    #[test]
    fn braces_in_query_text_do_not_stall_the_reply() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = Supervisor::new(config(dir.path(), ECHO_ENGINE));
        sup.start().unwrap();

        let open: Value = sup.round_trip("price {").unwrap();
        assert_eq!(open["text"], "price {");
        let next: Value = sup.round_trip("hello").unwrap();
        assert_eq!(next["text"], "hello");
    }

    #[test]
    fn pretty_printed_replies_stay_paired_with_their_queries() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = Supervisor::new(config(dir.path(), PRETTY_ENGINE));
        sup.start().unwrap();

        for query in ["50% off }", "a", "{b}", "c"] {
            let reply: Value = sup.round_trip(query).unwrap();
            assert_eq!(reply["text"], query);
            assert_eq!(reply["intent"]["name"], "greet");
        }
    }

    #[test]
    fn oversized_reply_tears_the_engine_down() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), PRETTY_ENGINE).with_max_document_bytes(120);
        let mut sup = Supervisor::new(cfg);
        sup.start().unwrap();

        let err = sup.round_trip::<Value>(&"x".repeat(110)).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Protocol(ProtocolError::Oversized { limit: 120 })
        ));
        assert!(err.is_terminal());
        assert_eq!(sup.state(), EngineState::Stopped);

        sup.start().unwrap();
        let reply: Value = sup.round_trip("a").unwrap();
        assert_eq!(reply["text"], "a");
    }

    #[test]
    fn undecodable_reply_tears_the_engine_down() {
        let dir = tempfile::tempdir().unwrap();
        let script = "while read line; do\n  echo '{not json}'\ndone\n";
        let mut sup = Supervisor::new(config(dir.path(), script));
        sup.start().unwrap();

        let err = sup.round_trip::<Value>("hi").unwrap_err();
        assert!(matches!(err, EngineError::Protocol(ProtocolError::Malformed(_))));
        assert_eq!(sup.state(), EngineState::Stopped);
    }

    #[test]
    fn stop_is_bounded_when_a_grandchild_holds_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let script = "sleep 5 &\nwhile read line; do echo '{}'; done\n";
        let cfg = config(dir.path(), script).with_stop_timeout(Duration::from_millis(500));
        let mut sup = Supervisor::new(cfg);
        sup.start().unwrap();

        let started = Instant::now();
        sup.stop().unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(sup.state(), EngineState::Stopped);
    }
}
