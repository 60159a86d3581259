//! End-to-end session tests against fake engines written as shell scripts.
//!
//! Each script speaks the engine's line protocol on stdin/stdout and ignores
//! the `-m <model> -l <lang> -itn` arguments unless a test inspects them.

#![cfg(unix)]

use sensevoice::{
    Language, ProcessState, SenseVoiceError, SenseVoiceSession, SessionConfig, Transcriber,
    WorkerState,
};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Serializes writing scripts with spawning them. A script whose write
/// descriptor leaks into a concurrently forked child fails to exec with
/// ETXTBSY.
static EXEC_LOCK: Mutex<()> = Mutex::new(());

struct FakeEngine {
    _dir: TempDir,
    executable: PathBuf,
    model: PathBuf,
}

fn fake_engine(body: &str) -> FakeEngine {
    let _guard = EXEC_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let dir = tempfile::tempdir().unwrap();
    let executable = dir.path().join("sense-voice-main");
    fs::write(&executable, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&executable, fs::Permissions::from_mode(0o755)).unwrap();
    let model = dir.path().join("model.gguf");
    fs::write(&model, b"GGUF").unwrap();
    FakeEngine {
        _dir: dir,
        executable,
        model,
    }
}

fn config(engine: &FakeEngine) -> SessionConfig {
    SessionConfig::new(&engine.executable, &engine.model)
        .with_startup_timeout(Duration::from_secs(10))
        .with_poll_interval(Duration::from_millis(20))
        .with_exit_grace(Duration::from_millis(300))
        .with_shutdown_timeout(Duration::from_secs(5))
}

fn start(config: SessionConfig) -> sensevoice::Result<SenseVoiceSession> {
    let _guard = EXEC_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    SenseVoiceSession::start(config)
}

fn wait_for_state(session: &SenseVoiceSession, wanted: impl Fn(WorkerState) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if wanted(session.state()) {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Answers every request with `lines` (a shell snippet that may use `$line`).
fn serving_engine(lines: &str) -> FakeEngine {
    fake_engine(&format!(
        r#"echo "[__INIT__]"
while IFS= read -r line; do
  if [ "$line" = "exit" ]; then exit 0; fi
  {lines}
  echo "[__DONE__]"
done"#
    ))
}

#[test]
fn test_happy_path_single_line() {
    let engine = serving_engine(r#"echo "hello""#);
    let session = start(config(&engine).with_language(Language::Auto)).unwrap();

    assert_eq!(session.state(), WorkerState::Ready);
    assert_eq!(session.transcribe_all("a.wav").unwrap(), vec!["hello"]);

    let state = session.shutdown().unwrap();
    assert_eq!(state, ProcessState::ExitedCleanly);
}

#[test]
fn test_output_is_cleaned_unless_raw() {
    let engine = serving_engine(r#"echo "[0.00-1.20] <|zh|><|NEUTRAL|>hello world""#);

    let session = start(config(&engine)).unwrap();
    assert_eq!(session.transcribe_all("a.wav").unwrap(), vec!["hello world"]);
    session.shutdown().unwrap();

    let raw = start(config(&engine).with_raw_output(true)).unwrap();
    assert_eq!(
        raw.transcribe_all("a.wav").unwrap(),
        vec!["[0.00-1.20] <|zh|><|NEUTRAL|>hello world"]
    );
    raw.shutdown().unwrap();
}

#[test]
fn test_empty_response() {
    let engine = serving_engine(":");
    let session = start(config(&engine)).unwrap();
    assert!(session.transcribe_all("silence.wav").unwrap().is_empty());
    session.shutdown().unwrap();
}

#[test]
fn test_engine_receives_language_and_itn_flags() {
    let engine = fake_engine(
        r#"args="$*"
echo "[__INIT__]"
while IFS= read -r line; do
  if [ "$line" = "exit" ]; then exit 0; fi
  echo "$args"
  echo "[__DONE__]"
done"#,
    );
    let session = start(config(&engine).with_language(Language::Yue)).unwrap();

    let lines = session.transcribe_all("a.wav").unwrap();
    assert_eq!(
        lines,
        vec![format!("-m {} -l yue -itn", engine.model.display())]
    );
    assert_eq!(session.language(), Language::Yue);
    session.shutdown().unwrap();
}

#[test]
fn test_each_request_gets_only_its_own_lines() {
    let engine = serving_engine(
        r#"echo "first for $line"
  echo "second for $line""#,
    );
    let session = start(config(&engine)).unwrap();

    for i in 0..10 {
        let record = format!("record-{i}.wav");
        let lines = session.transcribe_all(&record).unwrap();
        assert_eq!(
            lines,
            vec![format!("first for {record}"), format!("second for {record}")]
        );
    }
    session.shutdown().unwrap();
}

#[test]
fn test_concurrent_callers_are_serialized() {
    let engine = serving_engine(
        r#"echo "a $line"
  sleep 0.01
  echo "b $line""#,
    );
    let session = Arc::new(start(config(&engine)).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                for i in 0..5 {
                    let record = format!("t{t}-r{i}.wav");
                    let lines = session.transcribe_all(&record).unwrap();
                    assert_eq!(lines, vec![format!("a {record}"), format!("b {record}")]);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let session = Arc::into_inner(session).unwrap();
    assert_eq!(session.shutdown().unwrap(), ProcessState::ExitedCleanly);
}

#[test]
fn test_dropping_transcription_early_drains_the_rest() {
    let engine = serving_engine(
        r#"echo "one $line"
  echo "two $line"
  echo "three $line""#,
    );
    let session = start(config(&engine)).unwrap();

    {
        let mut transcription = session.transcribe("first.wav").unwrap();
        assert_eq!(transcription.next().unwrap().unwrap(), "one first.wav");
    }

    let lines = session.transcribe_all("second.wav").unwrap();
    assert_eq!(
        lines,
        vec!["one second.wav", "two second.wav", "three second.wav"]
    );
    session.shutdown().unwrap();
}

#[test]
fn test_startup_output_before_ready_is_discarded() {
    let engine = fake_engine(
        r#"echo "loading model..."
echo "model loaded"
echo "[__INIT__]"
while IFS= read -r line; do
  if [ "$line" = "exit" ]; then exit 0; fi
  echo "text"
  echo "[__DONE__]"
done"#,
    );
    let session = start(config(&engine)).unwrap();
    assert_eq!(session.transcribe_all("a.wav").unwrap(), vec!["text"]);
    session.shutdown().unwrap();
}

#[test]
fn test_heavy_stderr_does_not_block_engine() {
    let engine = fake_engine(
        r#"i=0
while [ $i -lt 2000 ]; do
  echo "diagnostic line $i padded out to make the pipe fill up quickly" >&2
  i=$((i+1))
done
echo "[__INIT__]"
while IFS= read -r line; do
  if [ "$line" = "exit" ]; then exit 0; fi
  echo "ok"
  echo "[__DONE__]"
done"#,
    );
    let session = start(config(&engine)).unwrap();
    assert_eq!(session.transcribe_all("a.wav").unwrap(), vec!["ok"]);
    session.shutdown().unwrap();
}

#[test]
fn test_startup_timeout_kills_engine() {
    let engine = fake_engine("exec sleep 30");
    let started = Instant::now();

    let result = start(config(&engine).with_startup_timeout(Duration::from_millis(300)));

    match result {
        Err(SenseVoiceError::StartupTimeout { timeout }) => {
            assert_eq!(timeout, Duration::from_millis(300));
        }
        Err(other) => panic!("expected StartupTimeout, got {other}"),
        Ok(_) => panic!("expected StartupTimeout"),
    }
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_exit_before_ready_reports_code_and_stderr() {
    let engine = fake_engine(
        r#"echo "error: failed to open model file" >&2
exit 3"#,
    );

    match start(config(&engine)) {
        Err(SenseVoiceError::StartupFailed { code, stderr }) => {
            assert_eq!(code, Some(3));
            assert!(stderr.contains("failed to open model file"), "{stderr}");
        }
        Err(other) => panic!("expected StartupFailed, got {other}"),
        Ok(_) => panic!("expected StartupFailed"),
    }
}

#[test]
fn test_missing_executable_is_spawn_error() {
    let config = SessionConfig::new("/nonexistent/sense-voice-main", "model.gguf");
    assert!(matches!(
        start(config),
        Err(SenseVoiceError::Spawn { .. })
    ));
}

#[test]
fn test_crash_mid_response() {
    let engine = fake_engine(
        r#"echo "[__INIT__]"
IFS= read -r line
echo "partial"
exit 1"#,
    );
    let session = start(config(&engine)).unwrap();

    let mut transcription = session.transcribe("a.wav").unwrap();
    assert_eq!(transcription.next().unwrap().unwrap(), "partial");
    assert!(matches!(
        transcription.next(),
        Some(Err(SenseVoiceError::WorkerCrashed { .. }))
    ));
    assert!(transcription.next().is_none());
    drop(transcription);

    assert_eq!(session.state(), WorkerState::Crashed);
    assert!(matches!(
        session.transcribe("b.wav"),
        Err(SenseVoiceError::SessionClosed {
            state: WorkerState::Crashed
        })
    ));
    assert!(!session.is_ready());

    let deadline = Instant::now() + Duration::from_secs(5);
    while !session.process_state().is_terminal() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(
        session.process_state(),
        ProcessState::ExitedWithError(Some(1))
    );
}

#[test]
fn test_death_between_requests_closes_session() {
    let engine = fake_engine(
        r#"echo "[__INIT__]"
IFS= read -r line
echo "only once"
echo "[__DONE__]"
exit 0"#,
    );
    let session = start(config(&engine)).unwrap();

    assert_eq!(session.transcribe_all("a.wav").unwrap(), vec!["only once"]);
    assert!(
        wait_for_state(&session, WorkerState::is_closed),
        "worker never noticed the engine exit"
    );
    assert_eq!(session.state(), WorkerState::Terminated);

    let started = Instant::now();
    assert!(matches!(
        session.transcribe("b.wav"),
        Err(SenseVoiceError::SessionClosed { .. })
    ));
    assert!(started.elapsed() < Duration::from_secs(1));
    session.shutdown().unwrap();
}

#[test]
fn test_shutdown_reaps_process() {
    let engine = serving_engine(r#"echo "x""#);
    let session = start(config(&engine)).unwrap();
    let pid = session.pid();

    let state = session.shutdown().unwrap();
    assert_eq!(state, ProcessState::ExitedCleanly);
    assert!(!process_exists(pid));
}

#[test]
fn test_engine_ignoring_exit_is_killed() {
    let engine = fake_engine(
        r#"trap '' TERM
echo "[__INIT__]"
while IFS= read -r line; do
  if [ "$line" = "exit" ]; then continue; fi
  echo "x"
  echo "[__DONE__]"
done
sleep 30"#,
    );
    let session = start(config(&engine)).unwrap();
    let pid = session.pid();
    let started = Instant::now();

    let state = session.shutdown().unwrap();

    assert_eq!(state, ProcessState::Killed);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!process_exists(pid));
}

#[test]
fn test_drop_without_shutdown_stops_engine() {
    let engine = serving_engine(r#"echo "x""#);
    let session = start(config(&engine)).unwrap();
    let pid = session.pid();

    drop(session);
    assert!(!process_exists(pid));
}

#[test]
fn test_invalid_record_paths_are_rejected_without_closing() {
    let engine = serving_engine(r#"echo "fine""#);
    let session = start(config(&engine)).unwrap();

    for path in ["exit", "", "two\nlines.wav"] {
        assert!(matches!(
            session.transcribe(path),
            Err(SenseVoiceError::InvalidRecordPath { .. })
        ));
    }
    assert_eq!(session.transcribe_all("ok.wav").unwrap(), vec!["fine"]);
    session.shutdown().unwrap();
}

#[test]
fn test_session_as_transcriber() {
    let engine = serving_engine(r#"echo "via trait""#);
    let session = start(config(&engine)).unwrap();

    let transcriber: &dyn Transcriber = &session;
    assert!(transcriber.is_ready());
    assert_eq!(transcriber.model_name(), "model.gguf");
    assert_eq!(
        transcriber.transcribe_file(&PathBuf::from("a.wav")).unwrap(),
        vec!["via trait"]
    );
    session.shutdown().unwrap();
}

fn process_exists(pid: u32) -> bool {
    let pid = libc::pid_t::try_from(pid).unwrap();
    // SAFETY: signal 0 performs only the existence and permission check.
    unsafe { libc::kill(pid, 0) == 0 }
}
