//! Engine child process: spawning, liveness, termination and stderr capture.

use crate::error::{Result, SenseVoiceError};
use crate::stt::protocol::EngineCommand;
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, BufRead, BufReader};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Lifecycle of the engine process.
///
/// Transitions are monotonic: once a terminal state is recorded it never
/// changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    ExitedCleanly,
    /// Non-zero exit. `None` when the process was ended by a signal.
    ExitedWithError(Option<i32>),
    /// Terminated by us after failing to exit on its own.
    Killed,
}

impl ProcessState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessState::ExitedCleanly | ProcessState::ExitedWithError(_) | ProcessState::Killed
        )
    }

    pub fn is_running(self) -> bool {
        self == ProcessState::Running
    }

    fn from_status(status: ExitStatus) -> Self {
        if status.success() {
            ProcessState::ExitedCleanly
        } else {
            ProcessState::ExitedWithError(status.code())
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::NotStarted => f.write_str("not started"),
            ProcessState::Running => f.write_str("running"),
            ProcessState::ExitedCleanly => f.write_str("exited cleanly"),
            ProcessState::ExitedWithError(Some(code)) => write!(f, "exited with code {code}"),
            ProcessState::ExitedWithError(None) => f.write_str("exited by signal"),
            ProcessState::Killed => f.write_str("killed"),
        }
    }
}

/// Shared handle to the engine process, used for liveness checks and
/// forced termination. The stdio pipes are not part of the handle; they
/// belong exclusively to the worker.
#[derive(Clone)]
pub struct ProcessHandle {
    child: Arc<Mutex<Child>>,
    state: Arc<Mutex<ProcessState>>,
    kill_requested: Arc<AtomicBool>,
    pid: u32,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish()
    }
}

impl ProcessHandle {
    fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child: Arc::new(Mutex::new(child)),
            state: Arc::new(Mutex::new(ProcessState::Running)),
            kill_requested: Arc::new(AtomicBool::new(false)),
            pid,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Last recorded state. Does not poll the OS; see [`Self::try_status`].
    pub fn state(&self) -> ProcessState {
        *lock(&self.state)
    }

    fn record(&self, next: ProcessState) -> ProcessState {
        let mut state = lock(&self.state);
        if !state.is_terminal() {
            *state = next;
        }
        *state
    }

    fn settle(&self, status: ExitStatus) -> ProcessState {
        let next = if self.kill_requested.load(Ordering::SeqCst) && !status.success() {
            ProcessState::Killed
        } else {
            ProcessState::from_status(status)
        };
        self.record(next)
    }

    /// Non-blocking exit check. Returns the terminal state if the process
    /// has exited, `None` while it is still running.
    pub fn try_status(&self) -> io::Result<Option<ProcessState>> {
        if self.state().is_terminal() {
            return Ok(Some(self.state()));
        }
        let status = lock(&self.child).try_wait()?;
        Ok(status.map(|status| self.settle(status)))
    }

    /// Wait up to `timeout` for the process to exit.
    pub fn wait_timeout(&self, timeout: Duration) -> io::Result<Option<ProcessState>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(state) = self.try_status()? {
                return Ok(Some(state));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    /// Ask the process to stop: SIGTERM on Unix, a hard kill elsewhere.
    ///
    /// No-op if it has already been reaped.
    pub fn terminate(&self) -> io::Result<()> {
        let mut child = lock(&self.child);
        // Holding the lock across the check and the signal keeps the pid
        // from being reaped (and reused) in between.
        if let Some(status) = child.try_wait()? {
            drop(child);
            self.settle(status);
            return Ok(());
        }
        self.kill_requested.store(true, Ordering::SeqCst);
        send_terminate(&mut child)
    }

    /// Hard kill. No-op if it has already been reaped.
    pub fn kill(&self) -> io::Result<()> {
        let mut child = lock(&self.child);
        if let Some(status) = child.try_wait()? {
            drop(child);
            self.settle(status);
            return Ok(());
        }
        self.kill_requested.store(true, Ordering::SeqCst);
        child.kill()
    }

    /// Wait for a graceful exit, then escalate: terminate, wait again, kill.
    ///
    /// Always leaves the process reaped and returns its final state.
    pub fn reap(&self, grace: Duration) -> io::Result<ProcessState> {
        if let Some(state) = self.wait_timeout(grace)? {
            return Ok(state);
        }

        tracing::warn!(pid = self.pid, ?grace, "engine did not exit in time, terminating");
        self.terminate()?;
        if let Some(state) = self.wait_timeout(grace)? {
            return Ok(state);
        }

        tracing::warn!(pid = self.pid, "engine ignored terminate, killing");
        self.kill()?;
        let status = lock(&self.child).wait()?;
        Ok(self.settle(status))
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    let pid = libc::pid_t::try_from(child.id())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: kill(2) has no memory-safety preconditions; the pid belongs to
    // our unreaped child, so it cannot name an unrelated process.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    child.kill()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bounded tail of the engine's stderr.
///
/// A background thread drains the pipe continuously so the engine never
/// blocks on a full stderr buffer; only the last `capacity` lines are kept.
pub struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    reader: Option<JoinHandle<()>>,
}

impl StderrTail {
    pub fn collect(stderr: ChildStderr, capacity: usize) -> Result<Self> {
        let lines = Arc::new(Mutex::new(VecDeque::with_capacity(capacity)));
        let sink = lines.clone();
        let reader = thread::Builder::new()
            .name("sensevoice-stderr".to_string())
            .spawn(move || {
                let mut reader = BufReader::new(stderr);
                let mut buf = Vec::new();
                loop {
                    buf.clear();
                    match reader.read_until(b'\n', &mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            let line = String::from_utf8_lossy(&buf);
                            let line = line.trim_end_matches(['\n', '\r']).to_string();
                            let mut tail = lock(&sink);
                            if tail.len() == capacity {
                                tail.pop_front();
                            }
                            if capacity > 0 {
                                tail.push_back(line);
                            }
                        }
                    }
                }
            })?;

        Ok(Self {
            lines,
            reader: Some(reader),
        })
    }

    /// Lines captured so far.
    pub fn snapshot(&self) -> Vec<String> {
        lock(&self.lines).iter().cloned().collect()
    }

    /// Wait up to `timeout` for the pipe to close, then return the tail.
    ///
    /// If something else still holds the pipe open the reader is detached
    /// and whatever was captured so far is returned.
    pub fn finish(&mut self, timeout: Duration) -> Vec<String> {
        let deadline = Instant::now() + timeout;
        if let Some(reader) = self.reader.take() {
            while !reader.is_finished() && Instant::now() < deadline {
                thread::sleep(EXIT_POLL_INTERVAL);
            }
            if reader.is_finished() {
                if reader.join().is_err() {
                    tracing::warn!("stderr reader thread panicked");
                }
            } else {
                tracing::debug!("stderr still open after engine exit, detaching reader");
            }
        }
        self.snapshot()
    }
}

/// A freshly spawned engine with its pipes split out.
pub struct EngineProcess {
    pub handle: ProcessHandle,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: StderrTail,
}

/// Launch the engine with all three stdio streams piped.
pub fn spawn(command: &EngineCommand, stderr_tail_lines: usize) -> Result<EngineProcess> {
    let spawn_error = |source: io::Error| SenseVoiceError::Spawn {
        executable: command.executable.display().to_string(),
        source,
    };

    let mut child = Command::new(&command.executable)
        .args(command.args())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_error)?;

    let (Some(stdin), Some(stdout), Some(stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        if let Err(e) = child.kill() {
            tracing::debug!(error = %e, "failed to kill engine with missing pipes");
        }
        return Err(spawn_error(io::Error::other("engine stdio pipes unavailable")));
    };

    tracing::info!(
        pid = child.id(),
        executable = %command.executable.display(),
        model = %command.model_path.display(),
        language = %command.language,
        itn = command.itn,
        "spawned engine"
    );

    let handle = ProcessHandle::new(child);
    let stderr = match StderrTail::collect(stderr, stderr_tail_lines) {
        Ok(tail) => tail,
        Err(e) => {
            if let Err(kill_err) = handle.kill() {
                tracing::debug!(error = %kill_err, "failed to kill engine after setup error");
            }
            return Err(e);
        }
    };

    Ok(EngineProcess {
        handle,
        stdin,
        stdout,
        stderr,
    })
}
