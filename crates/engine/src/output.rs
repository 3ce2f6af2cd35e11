//! Line forwarding from child process pipes into `tracing`.

use std::io::{self, BufRead, BufReader, Read};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{Level, debug, info, warn};

/// How long to wait for a forwarder to drain once its child has been reaped.
pub(crate) const FORWARDER_GRACE: Duration = Duration::from_millis(500);

const JOIN_POLL: Duration = Duration::from_millis(20);

/// Spawn a named thread that logs every line read from `pipe` until EOF.
///
/// Lines are never interpreted; they only end up in the log.
pub(crate) fn forward_lines<R>(
    thread_name: String,
    source: &'static str,
    level: Level,
    pipe: R,
) -> io::Result<thread::JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new().name(thread_name).spawn(move || {
        for line in BufReader::new(pipe).lines() {
            match line {
                Ok(line) if line.trim().is_empty() => {}
                Ok(line) if level == Level::DEBUG => {
                    debug!(target: "voxnlu_engine::output", source, "{line}")
                }
                Ok(line) => info!(target: "voxnlu_engine::output", source, "{line}"),
                Err(err) => {
                    warn!(target: "voxnlu_engine::output", source, error = %err, "stopped forwarding output");
                    break;
                }
            }
        }
    })
}

/// Join a forwarder, giving up after `grace`.
///
/// A grandchild that inherited the pipe keeps it open after the child exits;
/// such a forwarder is detached and finishes on its own when the pipe closes.
pub(crate) fn join_forwarder(handle: thread::JoinHandle<()>, grace: Duration) {
    let deadline = Instant::now() + grace;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            let name = handle.thread().name().unwrap_or("forwarder").to_string();
            warn!(thread = %name, "output pipe still held open, detaching forwarder");
            return;
        }
        thread::sleep(JOIN_POLL);
    }
    if handle.join().is_err() {
        warn!("output forwarder panicked");
    }
}
