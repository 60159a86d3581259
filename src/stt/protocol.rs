//! Line protocol spoken with the SenseVoice engine over its stdio pipes.
//!
//! ```text
//! engine  -> [__INIT__]            once, after the model is loaded
//! worker  -> /path/to/record.wav
//! engine  -> zero or more text lines
//! engine  -> [__DONE__]
//! worker  -> exit                  engine exits without further output
//! ```

use crate::error::{Result, SenseVoiceError};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Line the engine prints once it is ready to accept requests.
pub const READY_LINE: &str = "[__INIT__]";

/// Line terminating the output of a single request.
pub const DONE_LINE: &str = "[__DONE__]";

/// Reserved request asking the engine to exit.
pub const EXIT_REQUEST: &str = "exit";

/// Languages understood by the engine's `-l` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Auto,
    Zh,
    En,
    Yue,
    Ja,
    Ko,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::Auto,
        Language::Zh,
        Language::En,
        Language::Yue,
        Language::Ja,
        Language::Ko,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Language::Auto => "auto",
            Language::Zh => "zh",
            Language::En => "en",
            Language::Yue => "yue",
            Language::Ja => "ja",
            Language::Ko => "ko",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = SenseVoiceError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Language::ALL
            .into_iter()
            .find(|lang| lang.code() == wanted)
            .ok_or_else(|| SenseVoiceError::ConfigInvalidValue {
                key: "language".to_string(),
                message: format!(
                    "unsupported language '{s}' (expected one of: auto, zh, en, yue, ja, ko)"
                ),
            })
    }
}

/// A unit of work for the communication worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Transcribe the record at this path.
    Transcribe(String),
    /// Ask the engine to exit. Has no response.
    Exit,
}

impl Request {
    /// Wire form of the request, including the trailing newline.
    pub fn encode(&self) -> String {
        match self {
            Request::Transcribe(path) => format!("{path}\n"),
            Request::Exit => format!("{EXIT_REQUEST}\n"),
        }
    }
}

/// What the worker hands back to the consumer of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseUnit {
    /// One raw output line from the engine, line ending removed.
    Line(String),
    /// All output for the current request has been delivered.
    End,
}

/// Classification of a line read from the engine's stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineLine<'a> {
    Ready,
    Done,
    Text(&'a str),
}

impl<'a> EngineLine<'a> {
    /// Classify a raw line. The line ending is stripped before comparing
    /// against the reserved markers.
    pub fn classify(raw: &'a str) -> Self {
        match strip_line_ending(raw) {
            READY_LINE => EngineLine::Ready,
            DONE_LINE => EngineLine::Done,
            text => EngineLine::Text(text),
        }
    }
}

/// Remove one trailing `\n` or `\r\n`.
pub fn strip_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Check that a record path can be framed as a single request line.
///
/// A path containing a line break would be read by the engine as several
/// requests, and the literal `exit` would shut it down.
pub fn validate_record_path(path: &str) -> Result<()> {
    let invalid = |message: &str| SenseVoiceError::InvalidRecordPath {
        path: path.to_string(),
        message: message.to_string(),
    };

    if path.trim().is_empty() {
        return Err(invalid("path is empty"));
    }
    if path.contains(['\n', '\r']) {
        return Err(invalid("path contains a line break"));
    }
    if path == EXIT_REQUEST {
        return Err(invalid("path collides with the reserved exit request"));
    }
    Ok(())
}

/// How to launch the engine process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    pub executable: PathBuf,
    pub model_path: PathBuf,
    pub language: Language,
    /// Pass `-itn` (inverse text normalization).
    pub itn: bool,
}

impl EngineCommand {
    pub fn new(executable: impl Into<PathBuf>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            model_path: model_path.into(),
            language: Language::default(),
            itn: crate::defaults::DEFAULT_ITN,
        }
    }

    /// Arguments after the executable: `-m <model> -l <language> [-itn]`.
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-m".into(),
            self.model_path.clone().into_os_string(),
            "-l".into(),
            self.language.code().into(),
        ];
        if self.itn {
            args.push("-itn".into());
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_ready_and_done_lines() {
        assert_eq!(EngineLine::classify("[__INIT__]\n"), EngineLine::Ready);
        assert_eq!(EngineLine::classify("[__DONE__]\n"), EngineLine::Done);
        assert_eq!(EngineLine::classify("[__DONE__]\r\n"), EngineLine::Done);
        assert_eq!(EngineLine::classify("[__DONE__]"), EngineLine::Done);
    }

    #[test]
    fn test_classify_text_strips_only_line_ending() {
        assert_eq!(
            EngineLine::classify("  hello world \n"),
            EngineLine::Text("  hello world ")
        );
        assert_eq!(
            EngineLine::classify("[__DONE__] trailing\n"),
            EngineLine::Text("[__DONE__] trailing")
        );
    }

    #[test]
    fn test_strip_line_ending_removes_one_terminator() {
        assert_eq!(strip_line_ending("a\n\n"), "a\n");
        assert_eq!(strip_line_ending("a\r\n"), "a");
        assert_eq!(strip_line_ending("a"), "a");
    }

    #[test]
    fn test_request_encoding() {
        assert_eq!(
            Request::Transcribe("a.wav".to_string()).encode(),
            "a.wav\n"
        );
        assert_eq!(Request::Exit.encode(), "exit\n");
    }

    #[test]
    fn test_validate_record_path_rejects_framing_hazards() {
        assert!(validate_record_path("/tmp/a.wav").is_ok());
        assert!(validate_record_path("a b.wav").is_ok());
        assert!(validate_record_path("").is_err());
        assert!(validate_record_path("a\nb.wav").is_err());
        assert!(validate_record_path("a.wav\r").is_err());
        assert!(matches!(
            validate_record_path("exit"),
            Err(SenseVoiceError::InvalidRecordPath { .. })
        ));
    }

    #[test]
    fn test_language_parse_and_display() {
        for lang in Language::ALL {
            assert_eq!(lang.code().parse::<Language>().unwrap(), lang);
            assert_eq!(lang.to_string(), lang.code());
        }
        assert_eq!("ZH".parse::<Language>().unwrap(), Language::Zh);
        assert!("de".parse::<Language>().is_err());
    }

    #[test]
    fn test_language_serde_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            language: Language,
        }
        let parsed: Wrapper = toml::from_str("language = \"yue\"").unwrap();
        assert_eq!(parsed.language, Language::Yue);
    }

    #[test]
    fn test_engine_command_args() {
        let mut command = EngineCommand::new("/bin/engine", "/models/sv.gguf");
        command.language = Language::Ja;
        let args: Vec<String> = command
            .args()
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, ["-m", "/models/sv.gguf", "-l", "ja", "-itn"]);
    }

    #[test]
    fn test_engine_command_without_itn() {
        let mut command = EngineCommand::new("engine", "m.gguf");
        command.itn = false;
        assert_eq!(command.args().len(), 4);
        assert_eq!(command.language, Language::Auto);
    }
}
