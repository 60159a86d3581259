use crate::error::{Result, SenseVoiceError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Trait for file-based speech-to-text transcription.
///
/// This trait allows swapping implementations (a live engine session vs mock).
pub trait Transcriber: Send + Sync {
    /// Transcribe one audio record.
    ///
    /// # Returns
    /// The record's output lines in engine order, or error
    fn transcribe_file(&self, record: &Path) -> Result<Vec<String>>;

    /// Get the name of the loaded model
    fn model_name(&self) -> &str;

    /// Check if the transcriber is ready
    fn is_ready(&self) -> bool;
}

/// Implement Transcriber for Arc<T> to allow sharing across threads.
impl<T: Transcriber> Transcriber for Arc<T> {
    fn transcribe_file(&self, record: &Path) -> Result<Vec<String>> {
        (**self).transcribe_file(record)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

/// Mock transcriber for testing
#[derive(Debug, Clone)]
pub struct MockTranscriber {
    model_name: String,
    response: Vec<String>,
    per_record: HashMap<String, Vec<String>>,
    should_fail: bool,
}

impl MockTranscriber {
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            response: vec!["mock transcription".to_string()],
            per_record: HashMap::new(),
            should_fail: false,
        }
    }

    /// Lines returned for records without a specific response
    pub fn with_response(mut self, lines: &[&str]) -> Self {
        self.response = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Lines returned for one specific record path
    pub fn with_record(mut self, record: &str, lines: &[&str]) -> Self {
        self.per_record.insert(
            record.to_string(),
            lines.iter().map(|l| l.to_string()).collect(),
        );
        self
    }

    /// Configure the mock to fail on transcribe
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe_file(&self, record: &Path) -> Result<Vec<String>> {
        if self.should_fail {
            return Err(SenseVoiceError::WorkerCrashed {
                message: "mock transcription failure".to_string(),
            });
        }
        let key = record.to_string_lossy();
        Ok(self
            .per_record
            .get(key.as_ref())
            .unwrap_or(&self.response)
            .clone())
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        !self.should_fail
    }
}
