//! Language-model backends.

pub mod gemini;

use crate::conversation::Turn;
use crate::error::{Result, VoxError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Produces the next assistant message for a conversation.
///
/// Calls block the calling thread; backends that are async internally
/// drive their futures on a runtime handle.
pub trait LanguageModel: Send + Sync {
    fn complete(&self, turns: &[Turn]) -> Result<String>;

    fn model_name(&self) -> &str;
}

impl<T: LanguageModel + ?Sized> LanguageModel for Arc<T> {
    fn complete(&self, turns: &[Turn]) -> Result<String> {
        (**self).complete(turns)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// Mock language model for testing.
///
/// Replays scripted responses in order, then repeats the default response.
/// Every request is recorded.
#[derive(Debug, Clone, Default)]
pub struct MockLanguageModel {
    script: Arc<Mutex<VecDeque<std::result::Result<String, String>>>>,
    default_response: Option<String>,
    requests: Arc<Mutex<Vec<Vec<Turn>>>>,
}

impl MockLanguageModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Response used once the script is exhausted.
    pub fn with_response(mut self, response: &str) -> Self {
        self.default_response = Some(response.to_string());
        self
    }

    /// Queues one response.
    pub fn then_respond(self, response: &str) -> Self {
        self.push(Ok(response.to_string()));
        self
    }

    /// Queues one failure.
    pub fn then_fail(self, message: &str) -> Self {
        self.push(Err(message.to_string()));
        self
    }

    fn push(&self, entry: std::result::Result<String, String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(entry);
        }
    }

    /// Conversations sent so far, one entry per call.
    pub fn requests(&self) -> Vec<Vec<Turn>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl LanguageModel for MockLanguageModel {
    fn complete(&self, turns: &[Turn]) -> Result<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(turns.to_vec());
        }
        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match scripted {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(VoxError::LanguageModel { message }),
            None => self
                .default_response
                .clone()
                .ok_or_else(|| VoxError::LanguageModel {
                    message: "mock has no response".to_string(),
                }),
        }
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
