//! Text-to-speech backends.

pub mod style_bert_vits2;
pub mod voicevox;

pub use style_bert_vits2::StyleBertVits2;
pub use voicevox::Voicevox;

use crate::audio::wav;
use crate::error::{Result, VoxError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Turns one sentence into audio file bytes.
///
/// Calls block the calling thread.
pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize(&self, sentence: &str) -> Result<Vec<u8>>;

    /// Cheap check: is the backend up and accepting requests?
    fn is_ready(&self) -> bool;

    /// File extension for the produced audio, without the dot.
    fn extension(&self) -> &str {
        "wav"
    }

    fn name(&self) -> &str;
}

impl<T: SpeechSynthesizer + ?Sized> SpeechSynthesizer for Arc<T> {
    fn synthesize(&self, sentence: &str) -> Result<Vec<u8>> {
        (**self).synthesize(sentence)
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn extension(&self) -> &str {
        (**self).extension()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Polls `synth` every `interval` until it reports ready.
///
/// Fails with [`VoxError::BackendNotReady`] once `timeout` has passed.
pub fn wait_until_ready(
    synth: &dyn SpeechSynthesizer,
    interval: Duration,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        if synth.is_ready() {
            tracing::info!(backend = synth.name(), attempts, "synthesis backend ready");
            return Ok(());
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(VoxError::BackendNotReady {
                backend: synth.name().to_string(),
                waited_secs: elapsed.as_secs(),
            });
        }
        tracing::info!(
            backend = synth.name(),
            attempts,
            "waiting for synthesis backend to start"
        );
        std::thread::sleep(interval.min(timeout - elapsed));
    }
}

/// Mock synthesizer for testing.
///
/// Returns a short silent WAV for every sentence, except sentences that
/// contain one of the configured failure markers.
#[derive(Debug, Clone)]
pub struct MockSynthesizer {
    fail_markers: Vec<String>,
    latency: Duration,
    ready_after: usize,
    checks: Arc<AtomicUsize>,
    sentences: Arc<Mutex<Vec<String>>>,
}

impl Default for MockSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self {
            fail_markers: Vec::new(),
            latency: Duration::ZERO,
            ready_after: 0,
            checks: Arc::new(AtomicUsize::new(0)),
            sentences: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail any sentence containing `marker`.
    pub fn with_failure_on(mut self, marker: &str) -> Self {
        self.fail_markers.push(marker.to_string());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Report not ready for the first `checks` readiness checks.
    pub fn with_ready_after(mut self, checks: usize) -> Self {
        self.ready_after = checks;
        self
    }

    /// Sentences requested so far, failures included.
    pub fn sentences(&self) -> Vec<String> {
        self.sentences.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn check_count(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

impl SpeechSynthesizer for MockSynthesizer {
    fn synthesize(&self, sentence: &str) -> Result<Vec<u8>> {
        if let Ok(mut sentences) = self.sentences.lock() {
            sentences.push(sentence.to_string());
        }
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        if self.fail_markers.iter().any(|m| sentence.contains(m.as_str())) {
            return Err(VoxError::Synthesis {
                message: format!("mock synthesis failure for {sentence:?}"),
            });
        }
        wav::encode_mono(&[0; 160], 16000)
    }

    fn is_ready(&self) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst) >= self.ready_after
    }

    fn name(&self) -> &str {
        "mock"
    }
}
