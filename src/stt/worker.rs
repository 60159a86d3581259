//! Communication worker: the single thread that talks to the engine.
//!
//! The worker owns the engine's stdin and stdout. It performs the startup
//! handshake, then serves requests strictly one at a time:
//!
//! ```text
//! Starting -> Ready -> Relaying -> Ready -> ... -> DrainingExit -> Terminated
//!               |          |
//!               +----------+--> Crashed        (I/O failure, early EOF)
//!               +-------------> Terminated     (engine died while idle)
//! ```
//!
//! Requests are polled with a short timeout so an idle worker still notices
//! when the engine dies. Reads from the engine are blocking; an engine that
//! stops writing mid-response stalls the worker until the session kills it.

use crate::error::{Result, SenseVoiceError};
use crate::stt::process::{EngineProcess, ProcessHandle, ProcessState, StderrTail};
use crate::stt::protocol::{EngineLine, Request, ResponseUnit};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::process::{ChildStdin, ChildStdout};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Observable state of the communication worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Ready,
    Relaying,
    DrainingExit,
    Terminated,
    Crashed,
}

impl WorkerState {
    /// The worker has stopped serving requests.
    pub fn is_closed(self) -> bool {
        matches!(self, WorkerState::Terminated | WorkerState::Crashed)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Starting => "starting",
            WorkerState::Ready => "ready",
            WorkerState::Relaying => "relaying",
            WorkerState::DrainingExit => "draining exit",
            WorkerState::Terminated => "terminated",
            WorkerState::Crashed => "crashed",
        };
        f.write_str(name)
    }
}

/// Shared, cheaply clonable view of the worker state.
#[derive(Debug, Clone)]
pub struct StateCell(Arc<Mutex<WorkerState>>);

impl StateCell {
    fn new(state: WorkerState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    pub fn get(&self) -> WorkerState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, next: WorkerState) {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        // Closed states are final.
        if !state.is_closed() {
            *state = next;
        }
    }
}

/// Timing knobs for the worker loop.
#[derive(Debug, Clone, Copy)]
pub struct WorkerTimings {
    /// Request queue poll interval; also the liveness check period.
    pub poll_interval: Duration,
    /// Grace period for the engine to exit before it is terminated.
    pub exit_grace: Duration,
}

/// Why relaying a response failed.
#[derive(Debug)]
enum RelayError {
    Io(io::Error),
    /// stdout closed before the sentinel line.
    PipeClosed,
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Io(e) => write!(f, "I/O error: {e}"),
            RelayError::PipeClosed => f.write_str("engine stdout closed unexpectedly"),
        }
    }
}

impl From<io::Error> for RelayError {
    fn from(err: io::Error) -> Self {
        RelayError::Io(err)
    }
}

/// Handle the session keeps to the running worker.
pub struct WorkerHandle {
    pub requests: Sender<Request>,
    pub responses: Receiver<ResponseUnit>,
    pub state: StateCell,
    pub process: ProcessHandle,
    pub thread: JoinHandle<()>,
}

/// Start the worker thread for a freshly spawned engine.
///
/// Returns immediately; the handshake outcome is delivered on the returned
/// receiver: `Ok(())` once the ready line has been seen, or the startup
/// failure if stdout closes first.
pub fn spawn(
    engine: EngineProcess,
    timings: WorkerTimings,
) -> Result<(WorkerHandle, Receiver<Result<()>>)> {
    let (request_tx, request_rx) = crossbeam_channel::unbounded();
    let (response_tx, response_rx) = crossbeam_channel::unbounded();
    let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
    let state = StateCell::new(WorkerState::Starting);
    let process = engine.handle.clone();

    let worker = Worker {
        stdin: BufWriter::new(engine.stdin),
        stdout: BufReader::new(engine.stdout),
        stderr: engine.stderr,
        process: engine.handle,
        requests: request_rx,
        responses: Some(response_tx),
        state: state.clone(),
        timings,
        line: Vec::new(),
    };

    let thread = thread::Builder::new()
        .name("sensevoice-worker".to_string())
        .spawn(move || worker.run(ready_tx))?;

    Ok((
        WorkerHandle {
            requests: request_tx,
            responses: response_rx,
            state,
            process,
            thread,
        },
        ready_rx,
    ))
}

struct Worker {
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    stderr: StderrTail,
    process: ProcessHandle,
    requests: Receiver<Request>,
    responses: Option<Sender<ResponseUnit>>,
    state: StateCell,
    timings: WorkerTimings,
    line: Vec<u8>,
}

impl Worker {
    fn run(mut self, ready_tx: Sender<Result<()>>) {
        match self.handshake() {
            Ok(true) => {
                self.state.set(WorkerState::Ready);
                tracing::info!(pid = self.process.pid(), "engine ready");
                if ready_tx.send(Ok(())).is_err() {
                    // The session gave up waiting; nobody will send requests.
                    tracing::debug!("session dropped before handshake completed");
                }
                drop(ready_tx);
                self.serve();
            }
            Ok(false) => {
                self.state.set(WorkerState::Terminated);
                let final_state = self.reap();
                let stderr = self.stderr.finish(self.timings.exit_grace).join("\n");
                tracing::error!(state = %final_state, %stderr, "engine exited before becoming ready");
                let code = match final_state {
                    ProcessState::ExitedWithError(code) => code,
                    ProcessState::ExitedCleanly => Some(0),
                    _ => None,
                };
                if ready_tx
                    .send(Err(SenseVoiceError::StartupFailed { code, stderr }))
                    .is_err()
                {
                    tracing::debug!("session dropped before startup failure was reported");
                }
                return;
            }
            Err(e) => {
                self.state.set(WorkerState::Crashed);
                tracing::error!(error = %e, "failed reading engine output during startup");
                if ready_tx
                    .send(Err(SenseVoiceError::StartupFailed {
                        code: None,
                        stderr: e.to_string(),
                    }))
                    .is_err()
                {
                    tracing::debug!("session dropped before startup failure was reported");
                }
            }
        }
        self.shut_down();
    }

    /// Discard output until the ready line. `Ok(false)` on EOF.
    fn handshake(&mut self) -> io::Result<bool> {
        loop {
            self.line.clear();
            if self.stdout.read_until(b'\n', &mut self.line)? == 0 {
                return Ok(false);
            }
            let line = String::from_utf8_lossy(&self.line);
            match EngineLine::classify(&line) {
                EngineLine::Ready => return Ok(true),
                other => tracing::trace!(?other, "discarding startup output"),
            }
        }
    }

    fn serve(&mut self) {
        loop {
            match self.process.try_status() {
                Ok(Some(state)) => {
                    tracing::error!(%state, "engine process terminated unexpectedly");
                    self.state.set(WorkerState::Terminated);
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "failed to poll engine process");
                    self.state.set(WorkerState::Crashed);
                    return;
                }
            }

            let request = match self.requests.recv_timeout(self.timings.poll_interval) {
                Ok(request) => request,
                Err(RecvTimeoutError::Timeout) => continue,
                // Session dropped without shutting down.
                Err(RecvTimeoutError::Disconnected) => Request::Exit,
            };

            match request {
                Request::Exit => {
                    self.state.set(WorkerState::DrainingExit);
                    if let Err(e) = self.write_request(&request) {
                        tracing::warn!(error = %e, "failed to send exit request to engine");
                    }
                    return;
                }
                Request::Transcribe(ref path) => {
                    self.state.set(WorkerState::Relaying);
                    tracing::debug!(record = %path, "relaying request");
                    match self.relay(&request) {
                        Ok(lines) => {
                            tracing::debug!(record = %path, lines, "request complete");
                            self.state.set(WorkerState::Ready);
                        }
                        Err(e) => {
                            tracing::error!(record = %path, error = %e, "error communicating with engine");
                            self.state.set(WorkerState::Crashed);
                            return;
                        }
                    }
                }
            }
        }
    }

    fn write_request(&mut self, request: &Request) -> io::Result<()> {
        self.stdin.write_all(request.encode().as_bytes())?;
        self.stdin.flush()
    }

    /// Send one request and forward its output up to the sentinel.
    fn relay(&mut self, request: &Request) -> std::result::Result<usize, RelayError> {
        self.write_request(request)?;

        let mut relayed = 0;
        loop {
            self.line.clear();
            if self.stdout.read_until(b'\n', &mut self.line)? == 0 {
                return Err(RelayError::PipeClosed);
            }
            let line = String::from_utf8_lossy(&self.line);
            match EngineLine::classify(&line) {
                EngineLine::Done => break,
                EngineLine::Ready => {
                    tracing::warn!("unexpected ready line while relaying, ignoring");
                }
                EngineLine::Text(text) => {
                    relayed += 1;
                    self.forward(ResponseUnit::Line(text.to_string()));
                }
            }
        }
        self.forward(ResponseUnit::End);
        Ok(relayed)
    }

    fn forward(&self, unit: ResponseUnit) {
        // The session owns the receiver for as long as it can send requests,
        // so a send error only happens during teardown.
        if let Some(responses) = &self.responses
            && responses.send(unit).is_err()
        {
            tracing::debug!("response receiver gone, dropping engine output");
        }
    }

    /// Wait for the engine to exit, escalating to termination.
    fn reap(&self) -> ProcessState {
        match self.process.reap(self.timings.exit_grace) {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(error = %e, "failed to reap engine process");
                self.process.state()
            }
        }
    }

    fn shut_down(mut self) {
        // Close both channels before reaping so consumers blocked on a
        // response, and callers about to enqueue, see the worker is gone.
        self.responses = None;
        self.requests = crossbeam_channel::never();

        let final_state = self.reap();
        if self.state.get() == WorkerState::DrainingExit {
            self.state.set(WorkerState::Terminated);
        }

        match final_state {
            ProcessState::ExitedCleanly => {
                tracing::info!(pid = self.process.pid(), "engine exited cleanly");
            }
            other => {
                let stderr = self.stderr.finish(self.timings.exit_grace);
                tracing::warn!(pid = self.process.pid(), state = %other, "engine process exited abnormally");
                tracing::warn!(?stderr, "engine stderr");
            }
        }
    }
}
