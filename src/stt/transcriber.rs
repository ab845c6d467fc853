use crate::defaults;
use crate::error::{Result, VoxError};
use crate::pipeline::types::Utterance;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Trait for speech-to-text engines.
///
/// This trait allows swapping implementations (HTTP service, local Whisper, mock).
pub trait SpeechToText: Send + Sync {
    /// Transcribe a 16kHz mono WAV file.
    fn transcribe(&self, audio: &Path, language: &str) -> Result<String>;

    /// Get the name of the model in use
    fn model_name(&self) -> &str;
}

impl<T: SpeechToText + ?Sized> SpeechToText for Arc<T> {
    fn transcribe(&self, audio: &Path, language: &str) -> Result<String> {
        (**self).transcribe(audio, language)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// Boilerplate that speech models emit for silence or noise.
///
/// Compared after [`normalize_for_filter`].
pub const BUILTIN_HALLUCINATIONS: &[&str] = &[
    "ご視聴ありがとうございました",
    "ご視聴ありがとうございます",
    "最後までご視聴いただきありがとうございました",
    "チャンネル登録よろしくお願いします",
    "チャンネル登録お願いします",
    "お疲れ様でした",
    "字幕は視聴者によって作成されました",
    "thank you for watching",
    "thanks for watching",
    "please subscribe",
    "subtitles by the amara.org community",
];

/// A successful transcription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transcription {
    Text(String),
    /// Too short, silent, or only non-speech annotations.
    Empty,
}

#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("hallucinated transcription: {0:?}")]
    Hallucination(String),
    #[error("speech-to-text engine failed: {0}")]
    EngineFailure(#[source] VoxError),
}

/// Strips non-speech annotations such as `[BLANK_AUDIO]`, `(music)` or
/// `*laughs*`. Unmatched opening delimiters are kept as-is.
pub fn clean_transcription(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(ch) = chars.next() {
        let close = match ch {
            '[' => ']',
            '(' => ')',
            '（' => '）',
            '*' => '*',
            _ => {
                result.push(ch);
                continue;
            }
        };
        let rest = chars.as_str();
        match rest.find(close) {
            Some(end) => {
                chars = rest[end + close.len_utf8()..].chars();
            }
            None => result.push(ch),
        }
    }

    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercases and drops whitespace and sentence punctuation so that
/// "Thank you for watching!" and "ご視聴ありがとうございました。" match
/// their denylist entries.
pub fn normalize_for_filter(text: &str) -> String {
    text.chars()
        .filter(|c| {
            !c.is_whitespace()
                && !matches!(
                    c,
                    '。' | '、' | '．' | '，' | '！' | '？' | '.' | ',' | '!' | '?' | '…' | '~' | '〜'
                )
        })
        .flat_map(char::to_lowercase)
        .collect()
}

/// Turns utterances into user text.
pub struct Transcriber {
    engine: Arc<dyn SpeechToText>,
    language: String,
    min_duration: Duration,
    hallucinations: Vec<String>,
}

impl Transcriber {
    pub fn new(engine: Arc<dyn SpeechToText>) -> Self {
        Self {
            engine,
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            min_duration: Duration::from_millis(defaults::MIN_UTTERANCE_MS),
            hallucinations: BUILTIN_HALLUCINATIONS
                .iter()
                .map(|p| normalize_for_filter(p))
                .collect(),
        }
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    pub fn with_min_duration(mut self, min_duration: Duration) -> Self {
        self.min_duration = min_duration;
        self
    }

    /// Adds phrases to the built-in hallucination denylist.
    pub fn with_extra_hallucinations<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.hallucinations.extend(
            phrases
                .into_iter()
                .map(|p| normalize_for_filter(p.as_ref()))
                .filter(|p| !p.is_empty()),
        );
        self
    }

    pub fn model_name(&self) -> &str {
        self.engine.model_name()
    }

    fn is_hallucination(&self, text: &str) -> bool {
        let normalized = normalize_for_filter(text);
        !normalized.is_empty() && self.hallucinations.iter().any(|h| *h == normalized)
    }

    /// Transcribes one utterance. Its audio file is deleted on every path.
    pub fn transcribe(
        &self,
        utterance: Utterance,
    ) -> std::result::Result<Transcription, TranscribeError> {
        let outcome = self.transcribe_inner(&utterance);
        if let Err(e) = utterance.audio.remove() {
            tracing::warn!(sequence = utterance.sequence, "failed to remove utterance file: {e}");
        }
        outcome
    }

    fn transcribe_inner(
        &self,
        utterance: &Utterance,
    ) -> std::result::Result<Transcription, TranscribeError> {
        if utterance.duration < self.min_duration {
            tracing::debug!(
                sequence = utterance.sequence,
                duration_ms = utterance.duration.as_millis() as u64,
                "utterance too short, skipping"
            );
            return Ok(Transcription::Empty);
        }

        let raw = self
            .engine
            .transcribe(utterance.path(), &self.language)
            .map_err(TranscribeError::EngineFailure)?;

        let cleaned = clean_transcription(&raw);
        if cleaned.is_empty() {
            return Ok(Transcription::Empty);
        }
        if self.is_hallucination(&cleaned) {
            return Err(TranscribeError::Hallucination(cleaned));
        }
        Ok(Transcription::Text(cleaned))
    }
}

/// Mock speech-to-text engine for testing
#[derive(Debug, Clone)]
pub struct MockSpeechToText {
    model_name: String,
    response: String,
    should_fail: bool,
    calls: Arc<AtomicUsize>,
}

impl MockSpeechToText {
    /// Create a new mock with default settings
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            response: "mock transcription".to_string(),
            should_fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configure the mock to return a specific response
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Configure the mock to fail on transcribe
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Number of transcribe calls, shared between clones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SpeechToText for MockSpeechToText {
    fn transcribe(&self, _audio: &Path, _language: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            Err(VoxError::Transcription {
                message: "mock transcription failure".to_string(),
            })
        } else {
            Ok(self.response.clone())
        }
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
