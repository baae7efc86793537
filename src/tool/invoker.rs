//! Running external tools with timeouts, cancellation and captured output

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::signal::CancelToken;
use crate::timeout::{TimeoutConfig, TimeoutEnforcer};
use crate::tool::command::ToolCommand;
use crate::tool::provision::{ProvisionError, ToolProvisioner};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exit code recorded when a tool could not be located
pub const EXIT_CODE_NOT_FOUND: i32 = 127;

/// Errors from running a tool
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("tool '{tool}' not found: {reason}")]
    ToolNotFound { tool: String, reason: String },

    #[error("'{command}' timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    #[error("'{command}' cancelled")]
    Cancelled { command: String },

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<ProvisionError> for InvokeError {
    fn from(err: ProvisionError) -> Self {
        InvokeError::ToolNotFound {
            tool: err.tool().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Result of one finished invocation
///
/// Not `Clone`: each outcome has exactly one owner, first the invoker's
/// caller and then the report record it is moved into.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitOutcome {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub elapsed_ms: u64,
    /// Terminating signal when the process did not exit normally
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
}

impl ExitOutcome {
    /// Outcome for work done in-process rather than by a tool
    pub fn synthetic(code: i32, stdout: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            code,
            stdout: stdout.into(),
            stderr: String::new(),
            elapsed_ms: elapsed.as_millis() as u64,
            signal: None,
        }
    }

    /// Outcome standing in for an invocation that never produced one
    pub fn failed(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: message.into(),
            elapsed_ms: 0,
            signal: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    /// First non-empty line of stderr, falling back to stdout
    pub fn first_line(&self) -> Option<&str> {
        self.stderr
            .lines()
            .chain(self.stdout.lines())
            .map(str::trim)
            .find(|l| !l.is_empty())
    }

    /// Merge several outcomes into one: first non-zero code wins, output is
    /// concatenated in order, elapsed times add up
    pub fn combine(outcomes: impl IntoIterator<Item = ExitOutcome>) -> ExitOutcome {
        let mut merged = ExitOutcome::synthetic(0, String::new(), Duration::ZERO);
        for outcome in outcomes {
            if merged.code == 0 && outcome.code != 0 {
                merged.code = outcome.code;
                merged.signal = outcome.signal;
            }
            merged.stdout.push_str(&outcome.stdout);
            merged.stderr.push_str(&outcome.stderr);
            merged.elapsed_ms += outcome.elapsed_ms;
        }
        merged
    }
}

/// Runs external tools on behalf of the stages
///
/// Shared by reference across worker threads during [`ToolInvoker::run_all`].
#[derive(Debug)]
pub struct ToolInvoker {
    working_dir: PathBuf,
    provisioner: ToolProvisioner,
    timeout: TimeoutConfig,
    env: BTreeMap<String, String>,
    cancel: CancelToken,
}

impl ToolInvoker {
    pub fn new(working_dir: impl Into<PathBuf>, timeout: TimeoutConfig) -> Self {
        Self {
            working_dir: working_dir.into(),
            provisioner: ToolProvisioner::default(),
            timeout,
            env: BTreeMap::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_provisioner(mut self, provisioner: ToolProvisioner) -> Self {
        self.provisioner = provisioner;
        self
    }

    /// Environment variable passed to every invocation
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn timeout(&self) -> TimeoutConfig {
        self.timeout
    }

    /// Make sure `tool` can be run, returning its resolved path
    pub fn ensure_available(&self, tool: &str) -> Result<PathBuf, InvokeError> {
        Ok(self.provisioner.ensure_available(tool)?)
    }

    /// Run one command to completion
    pub fn run(&self, command: &ToolCommand) -> Result<ExitOutcome, InvokeError> {
        let shown = command.display();
        if self.cancel.is_cancelled() {
            return Err(InvokeError::Cancelled { command: shown });
        }

        let program = self.ensure_available(&command.program)?;
        let cwd = command.current_dir.as_deref().unwrap_or(self.working_dir.as_path());

        let mut cmd = Command::new(&program);
        cmd.args(&command.args)
            .current_dir(cwd)
            .envs(&self.env)
            .envs(&command.env)
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group, so termination reaches everything the tool starts
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        tracing::debug!(command = %shown, cwd = %cwd.display(), "spawning tool");
        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| InvokeError::Spawn {
            command: shown.clone(),
            source,
        })?;

        // Feed stdin from its own thread so a child that fills its stdout
        // pipe before draining stdin cannot deadlock us
        let stdin_handle = match (child.stdin.take(), command.stdin.clone()) {
            (Some(mut pipe), Some(input)) => Some(thread::spawn(move || {
                let _ = pipe.write_all(&input);
            })),
            _ => None,
        };
        let stdout_handle = capture(child.stdout.take());
        let stderr_handle = capture(child.stderr.take());

        let enforcer = TimeoutEnforcer::new(self.timeout);
        let waited = loop {
            if self.cancel.is_cancelled() {
                self.terminate_child(&mut child)?;
                break Err(InvokeError::Cancelled {
                    command: shown.clone(),
                });
            }

            if let Some(status) = child.try_wait()? {
                break Ok(status);
            }

            if enforcer.check().is_timeout() {
                tracing::warn!(command = %shown, seconds = self.timeout.tool_seconds, "tool timed out");
                self.terminate_child(&mut child)?;
                break Err(InvokeError::Timeout {
                    command: shown.clone(),
                    seconds: self.timeout.tool_seconds,
                });
            }

            thread::sleep(POLL_INTERVAL);
        };

        // Descendants can outlive the tool and keep its pipes open
        let drain = self.timeout.grace_period();
        if !captures_done(&[&stdout_handle, &stderr_handle], drain) {
            tracing::debug!(command = %shown, "output still open after exit, killing process group");
            kill_group(&mut child);
            captures_done(&[&stdout_handle, &stderr_handle], drain);
        }
        if let Some(handle) = stdin_handle.filter(|h| h.is_finished()) {
            let _ = handle.join();
        }
        let stdout = join_capture(stdout_handle);
        let stderr = join_capture(stderr_handle);
        let status = waited?;

        let outcome = ExitOutcome {
            code: exit_code(&status),
            stdout,
            stderr,
            elapsed_ms: start.elapsed().as_millis() as u64,
            signal: term_signal(&status),
        };
        tracing::debug!(
            command = %shown,
            code = outcome.code,
            elapsed_ms = outcome.elapsed_ms,
            "tool finished"
        );
        Ok(outcome)
    }

    /// Run independent commands with up to `jobs` in flight
    ///
    /// Results come back in input order regardless of completion order.
    pub fn run_all(&self, commands: &[ToolCommand], jobs: usize) -> Vec<Result<ExitOutcome, InvokeError>> {
        if commands.is_empty() {
            return Vec::new();
        }
        let workers = jobs.clamp(1, commands.len());
        let next = AtomicUsize::new(0);
        let slots: Vec<Mutex<Option<Result<ExitOutcome, InvokeError>>>> =
            commands.iter().map(|_| Mutex::new(None)).collect();

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(command) = commands.get(index) else {
                        break;
                    };
                    let result = self.run(command);
                    if let Ok(mut slot) = slots[index].lock() {
                        *slot = Some(result);
                    }
                });
            }
        });

        slots
            .into_iter()
            .zip(commands)
            .map(|(slot, command)| {
                slot.into_inner().ok().flatten().unwrap_or_else(|| {
                    Err(InvokeError::Cancelled {
                        command: command.display(),
                    })
                })
            })
            .collect()
    }

    /// Run `producer`, then feed its stdout to `consumer`
    ///
    /// A failing producer short-circuits: its outcome is returned and the
    /// consumer never starts. Otherwise the consumer's outcome is returned
    /// with the producer's stderr prepended and both elapsed times summed.
    pub fn pipe(&self, producer: &ToolCommand, consumer: &ToolCommand) -> Result<ExitOutcome, InvokeError> {
        let produced = self.run(producer)?;
        if !produced.success() {
            tracing::debug!(producer = %producer.display(), code = produced.code, "producer failed, skipping consumer");
            return Ok(produced);
        }

        let ExitOutcome {
            stdout: rendered,
            stderr: producer_stderr,
            elapsed_ms: producer_ms,
            ..
        } = produced;

        let consumer = consumer.clone().stdin(rendered.into_bytes());
        let mut consumed = self.run(&consumer)?;
        consumed.stderr = producer_stderr + &consumed.stderr;
        consumed.elapsed_ms += producer_ms;
        Ok(consumed)
    }

    /// SIGTERM the tool's process group, then SIGKILL whatever is left once
    /// the grace period runs out
    fn terminate_child(&self, child: &mut Child) -> Result<(), InvokeError> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};

            let group = process_group(child);
            let _ = killpg(group, Signal::SIGTERM);

            let start = Instant::now();
            while start.elapsed() < self.timeout.grace_period() {
                // Reap the leader so an empty group reports ESRCH
                child.try_wait()?;
                if killpg(group, None).is_err() {
                    return Ok(());
                }
                thread::sleep(POLL_INTERVAL);
            }
            tracing::debug!(pid = child.id(), "grace period over, killing process group");
        }

        kill_group(child);
        let _ = child.wait();
        Ok(())
    }
}

#[cfg(unix)]
fn process_group(child: &Child) -> nix::unistd::Pid {
    nix::unistd::Pid::from_raw(child.id() as i32)
}

/// SIGKILL every process in the tool's group
fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        let _ = killpg(process_group(child), Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    {
        let _ = child.kill();
    }
}

/// Wait up to `limit` for the output readers to hit end of file
fn captures_done(handles: &[&Option<thread::JoinHandle<String>>], limit: Duration) -> bool {
    let finished = || handles.iter().all(|h| h.as_ref().map_or(true, |h| h.is_finished()));
    let start = Instant::now();
    while !finished() {
        if start.elapsed() >= limit {
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }
    true
}

fn capture<R: Read + Send + 'static>(pipe: Option<R>) -> Option<thread::JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

/// Collect a reader's output; a reader still blocked on a pipe held open by
/// an escaped process is abandoned
fn join_capture(handle: Option<thread::JoinHandle<String>>) -> String {
    match handle {
        Some(h) if h.is_finished() => h.join().unwrap_or_default(),
        _ => String::new(),
    }
}

fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return 128 + sig;
        }
    }
    1
}

fn term_signal(status: &ExitStatus) -> Option<String> {
    if status.code().is_some() {
        return None;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal().map(|s| format!("SIG{}", s))
    }
    #[cfg(not(unix))]
    {
        None
    }
}
