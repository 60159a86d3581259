//! Caller-facing session over one engine process.
//!
//! A session spawns the engine and its communication worker, blocks until the
//! engine reports ready, and then turns `transcribe` calls into requests on
//! the worker's queue. Only one transcription is consumed at a time: the
//! [`Transcription`] iterator holds the response lock until it is dropped.

use crate::defaults;
use crate::error::{Result, SenseVoiceError};
use crate::stt::post_process::remove_metadata;
use crate::stt::process::{self, ProcessHandle, ProcessState};
use crate::stt::protocol::{EngineCommand, Language, Request, ResponseUnit, validate_record_path};
use crate::stt::transcriber::Transcriber;
use crate::stt::worker::{self, StateCell, WorkerState, WorkerTimings};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Configuration for starting a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub command: EngineCommand,
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
    pub exit_grace: Duration,
    pub shutdown_timeout: Duration,
    pub stderr_tail_lines: usize,
    /// Yield engine lines without stripping time ranges and tags.
    pub raw_output: bool,
}

impl SessionConfig {
    pub fn new(executable: impl Into<PathBuf>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            command: EngineCommand::new(executable, model_path),
            startup_timeout: defaults::STARTUP_TIMEOUT,
            poll_interval: defaults::POLL_INTERVAL,
            exit_grace: defaults::EXIT_GRACE,
            shutdown_timeout: defaults::SHUTDOWN_TIMEOUT,
            stderr_tail_lines: defaults::STDERR_TAIL_LINES,
            raw_output: false,
        }
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.command.language = language;
        self
    }

    pub fn with_itn(mut self, itn: bool) -> Self {
        self.command.itn = itn;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace = grace;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_raw_output(mut self, raw: bool) -> Self {
        self.raw_output = raw;
        self
    }
}

/// A running engine plus the worker that serializes access to it.
///
/// Dropping a session shuts it down the same way [`Self::shutdown`] does,
/// but discards the outcome.
pub struct SenseVoiceSession {
    requests: Sender<Request>,
    responses: Mutex<Receiver<ResponseUnit>>,
    state: StateCell,
    process: ProcessHandle,
    worker: Option<JoinHandle<()>>,
    command: EngineCommand,
    model_name: String,
    raw_output: bool,
    exit_grace: Duration,
    shutdown_timeout: Duration,
}

impl SenseVoiceSession {
    /// Start an engine with default timings.
    pub fn create(
        executable: impl Into<PathBuf>,
        model_path: impl Into<PathBuf>,
        language: Language,
    ) -> Result<Self> {
        Self::start(SessionConfig::new(executable, model_path).with_language(language))
    }

    /// Spawn the engine and block until it is ready.
    ///
    /// # Errors
    ///
    /// - [`SenseVoiceError::Spawn`] if the executable cannot be launched
    /// - [`SenseVoiceError::StartupFailed`] if the engine exits before the ready line
    /// - [`SenseVoiceError::StartupTimeout`] if the ready line does not arrive in
    ///   time; the engine is killed
    pub fn start(config: SessionConfig) -> Result<Self> {
        let started = Instant::now();
        let engine = process::spawn(&config.command, config.stderr_tail_lines)?;
        let process = engine.handle.clone();
        let timings = WorkerTimings {
            poll_interval: config.poll_interval,
            exit_grace: config.exit_grace,
        };

        let (worker, ready) = match worker::spawn(engine, timings) {
            Ok(spawned) => spawned,
            Err(e) => {
                if let Err(kill_err) = process.kill() {
                    tracing::warn!(error = %kill_err, "failed to kill engine after worker spawn error");
                }
                return Err(e);
            }
        };

        let model_name = config
            .command
            .model_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| config.command.model_path.display().to_string());

        let session = Self {
            requests: worker.requests,
            responses: Mutex::new(worker.responses),
            state: worker.state,
            process: worker.process,
            worker: Some(worker.thread),
            command: config.command,
            model_name,
            raw_output: config.raw_output,
            exit_grace: config.exit_grace,
            shutdown_timeout: config.shutdown_timeout,
        };

        match ready.recv_timeout(config.startup_timeout) {
            Ok(Ok(())) => {
                tracing::info!(
                    pid = session.pid(),
                    elapsed = ?started.elapsed(),
                    "session ready"
                );
                Ok(session)
            }
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => {
                tracing::error!(
                    timeout = ?config.startup_timeout,
                    "engine did not become ready, killing it"
                );
                if let Err(e) = session.process.kill() {
                    tracing::warn!(error = %e, "failed to kill unresponsive engine");
                }
                Err(SenseVoiceError::StartupTimeout {
                    timeout: config.startup_timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(SenseVoiceError::StartupFailed {
                code: None,
                stderr: "engine worker stopped during startup".to_string(),
            }),
        }
    }

    /// Submit a record and stream back its transcribed lines.
    ///
    /// Blocks while another thread is still consuming a transcription from
    /// this session. Each line is cleaned with
    /// [`remove_metadata`](crate::stt::post_process::remove_metadata) unless
    /// the session was configured for raw output.
    ///
    /// # Errors
    ///
    /// - [`SenseVoiceError::InvalidRecordPath`] for paths that cannot be framed
    ///   as one request line
    /// - [`SenseVoiceError::SessionClosed`] once the worker has terminated or
    ///   crashed
    pub fn transcribe(&self, record_path: impl AsRef<Path>) -> Result<Transcription<'_>> {
        let record_path = record_path.as_ref();
        let path = record_path
            .to_str()
            .ok_or_else(|| SenseVoiceError::InvalidRecordPath {
                path: record_path.display().to_string(),
                message: "path is not valid UTF-8".to_string(),
            })?;
        validate_record_path(path)?;

        let responses = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let state = self.state.get();
        if state.is_closed() {
            return Err(SenseVoiceError::SessionClosed { state });
        }
        self.requests
            .send(Request::Transcribe(path.to_string()))
            .map_err(|_| SenseVoiceError::SessionClosed {
                state: self.state.get(),
            })?;

        Ok(Transcription {
            responses,
            state: &self.state,
            raw_output: self.raw_output,
            finished: false,
        })
    }

    /// Transcribe a record and collect every line.
    pub fn transcribe_all(&self, record_path: impl AsRef<Path>) -> Result<Vec<String>> {
        self.transcribe(record_path)?.collect()
    }

    /// Ask the engine to exit and wait for the worker to finish.
    ///
    /// If the worker does not stop within the shutdown timeout (typically
    /// because the engine stopped responding mid-request), the engine is
    /// killed to unblock it.
    pub fn shutdown(mut self) -> Result<ProcessState> {
        self.close()
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    pub fn process_state(&self) -> ProcessState {
        self.process.state()
    }

    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    pub fn language(&self) -> Language {
        self.command.language
    }

    pub fn model_path(&self) -> &Path {
        &self.command.model_path
    }

    pub fn executable(&self) -> &Path {
        &self.command.executable
    }

    fn close(&mut self) -> Result<ProcessState> {
        let Some(thread) = self.worker.take() else {
            return Ok(self.process.state());
        };

        if self.requests.send(Request::Exit).is_err() {
            tracing::debug!("worker already stopped, skipping exit request");
        }

        let joined = match join_within(thread, self.shutdown_timeout) {
            Ok(joined) => joined,
            Err(thread) => {
                tracing::warn!(
                    timeout = ?self.shutdown_timeout,
                    "worker did not stop in time, killing engine"
                );
                if let Err(e) = self.process.kill() {
                    tracing::warn!(error = %e, "failed to kill engine");
                }
                match join_within(thread, self.exit_grace * 3) {
                    Ok(joined) => joined,
                    Err(_detached) => {
                        tracing::warn!("worker still running after kill, detaching");
                        return Ok(self.process.state());
                    }
                }
            }
        };

        if joined.is_err() {
            return Err(SenseVoiceError::Other(
                "engine worker thread panicked".to_string(),
            ));
        }

        let state = self.process.state();
        tracing::info!(%state, "session shut down");
        Ok(state)
    }
}

impl Drop for SenseVoiceSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "error while closing session");
        }
    }
}

impl Transcriber for SenseVoiceSession {
    fn transcribe_file(&self, record: &Path) -> Result<Vec<String>> {
        self.transcribe_all(record)
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        matches!(self.state.get(), WorkerState::Ready | WorkerState::Relaying)
    }
}

/// Join `thread` if it finishes within `timeout`, else hand it back.
fn join_within(
    thread: JoinHandle<()>,
    timeout: Duration,
) -> std::result::Result<thread::Result<()>, JoinHandle<()>> {
    let deadline = Instant::now() + timeout;
    let poll_interval = Duration::from_millis(10);
    while !thread.is_finished() {
        if Instant::now() >= deadline {
            return Err(thread);
        }
        thread::sleep(poll_interval);
    }
    Ok(thread.join())
}

/// Lines of one transcription, in the order the engine produced them.
///
/// Holds the session's response lock: other `transcribe` calls wait until
/// this value is dropped. Dropping it before the end drains the remaining
/// output of this request so the next caller starts on a clean boundary.
pub struct Transcription<'a> {
    responses: MutexGuard<'a, Receiver<ResponseUnit>>,
    state: &'a StateCell,
    raw_output: bool,
    finished: bool,
}

impl Iterator for Transcription<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.responses.recv() {
            Ok(ResponseUnit::Line(line)) => Some(Ok(if self.raw_output {
                line
            } else {
                remove_metadata(&line)
            })),
            Ok(ResponseUnit::End) => {
                self.finished = true;
                None
            }
            Err(_) => {
                self.finished = true;
                Some(Err(SenseVoiceError::WorkerCrashed {
                    message: format!("worker {}", self.state.get()),
                }))
            }
        }
    }
}

impl FusedIterator for Transcription<'_> {}

impl Drop for Transcription<'_> {
    fn drop(&mut self) {
        while !self.finished {
            match self.responses.recv() {
                Ok(ResponseUnit::Line(_)) => {}
                Ok(ResponseUnit::End) | Err(_) => self.finished = true,
            }
        }
    }
}
