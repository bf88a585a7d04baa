//! [`SyncInvoker`] that runs the configured `hooks:` commands.
//!
//! Each invocation spawns the direction's argv with the request described in
//! `SITESYNC_*` environment variables (and the whole request as JSON in
//! `SITESYNC_REQUEST`). Exit status 0 is success. If the last non-empty line
//! of stdout is an RFC 3339 timestamp it becomes the completion time,
//! otherwise the current minute is used.
//!
//! `hooks.timeout_secs` bounds the whole call: waiting for the hook and for
//! its output. The hook runs in its own process group, which is killed when
//! the deadline passes so backgrounded children cannot hold the pipes open.

use std::io::Read;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use sitesync_core::{clock, Direction, HookSettings, SyncInvocationError, SyncInvoker, SyncRequest};

use crate::process::kill_process_group;

const WAIT_POLL: Duration = Duration::from_millis(50);
/// Bytes of hook stderr carried into the error message.
const STDERR_TAIL: usize = 2048;

#[derive(Debug, Clone)]
pub struct CommandInvoker {
    hooks: HookSettings,
}

impl CommandInvoker {
    pub fn new(hooks: HookSettings) -> Self {
        Self { hooks }
    }

    fn run(&self, request: &SyncRequest) -> Result<DateTime<Utc>, SyncInvocationError> {
        let direction = request.key.direction;
        let argv = self
            .hooks
            .command(direction)
            .filter(|argv| !argv.is_empty())
            .ok_or(SyncInvocationError::NotConfigured { direction })?;
        let command = argv.join(" ");
        let payload = serde_json::to_string(request)
            .map_err(|e| SyncInvocationError::Failed(format!("encode sync request: {e}")))?;

        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .env("SITESYNC_DIRECTION", direction.label())
            .env("SITESYNC_FROM", request.key.from.to_string())
            .env("SITESYNC_TO", request.key.to.to_string())
            .env("SITESYNC_PAIR", request.key.pair_label())
            .env("SITESYNC_LAST_RUN", request.last_run.to_rfc3339())
            .env("SITESYNC_DAEMON", if request.daemon_mode { "1" } else { "0" })
            .env("SITESYNC_CONFIG", &request.config_path)
            .env("SITESYNC_REQUEST", payload)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|source| SyncInvocationError::Spawn {
                command: command.clone(),
                source,
            })?;

        tracing::debug!(pid = child.id(), command = %command, pair = %request.key, "sync hook spawned");
        let stdout = capture(child.stdout.take());
        let stderr = capture(child.stderr.take());

        let deadline = self.hooks.timeout().map(|limit| Instant::now() + limit);
        let status = match deadline {
            Some(deadline) => wait_until(&mut child, deadline),
            None => child.wait().map(Some),
        }
        .map_err(|e| SyncInvocationError::Failed(format!("wait for `{command}`: {e}")))?;

        let output = status.and_then(|status| {
            let stdout = collect(stdout, deadline)?;
            let stderr = collect(stderr, deadline)?;
            Some((status, stdout, stderr))
        });
        // Readers still blocked on a killed group finish on their own.
        let Some((status, stdout, stderr)) = output else {
            kill_process_group(child.id() as i32);
            return Err(SyncInvocationError::TimedOut {
                command,
                secs: self.hooks.timeout_secs.unwrap_or_default(),
            });
        };

        if !status.success() {
            return Err(SyncInvocationError::HookFailed {
                command,
                status: describe(status),
                stderr: tail(stderr.trim(), STDERR_TAIL).to_string(),
            });
        }
        Ok(completion_time(&stdout))
    }
}

impl SyncInvoker for CommandInvoker {
    fn sync_forward(&self, request: &SyncRequest) -> Result<DateTime<Utc>, SyncInvocationError> {
        debug_assert_eq!(request.key.direction, Direction::SourceToDestination);
        self.run(request)
    }

    fn sync_reverse(&self, request: &SyncRequest) -> Result<DateTime<Utc>, SyncInvocationError> {
        debug_assert_eq!(request.key.direction, Direction::DestinationToSource);
        self.run(request)
    }
}

fn capture<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Receiver<String>> {
    pipe.map(|mut pipe| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
        });
        rx
    })
}

/// Output read until the pipe closed, or `None` if it was still open at
/// `deadline`.
fn collect(reader: Option<Receiver<String>>, deadline: Option<Instant>) -> Option<String> {
    let Some(reader) = reader else {
        return Some(String::new());
    };
    let received = match deadline {
        Some(deadline) => reader.recv_timeout(deadline.saturating_duration_since(Instant::now())),
        None => reader.recv().map_err(|_| RecvTimeoutError::Disconnected),
    };
    match received {
        Ok(output) => Some(output),
        Err(RecvTimeoutError::Timeout) => None,
        Err(RecvTimeoutError::Disconnected) => Some(String::new()),
    }
}

/// `Ok(None)` if the child was still running at `deadline`; its process
/// group is killed and the child reaped.
fn wait_until(child: &mut Child, deadline: Instant) -> std::io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            kill_process_group(child.id() as i32);
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(WAIT_POLL);
    }
}

fn describe(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal {signal}");
        }
    }
    status.to_string()
}

fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

fn completion_time(stdout: &str) -> DateTime<Utc> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| DateTime::parse_from_rfc3339(line).ok())
        .map(|at| clock::truncate_to_minute(at.with_timezone(&Utc)))
        .unwrap_or_else(clock::now_minute)
}
