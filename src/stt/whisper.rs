//! Local speech-to-text with whisper.cpp through `whisper-rs`.
//!
//! Requires the `whisper` feature (and cmake to build).

use crate::audio::wav;
use crate::error::{Result, VoxError};
use crate::stt::transcriber::SpeechToText;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Whisper transcriber. The context is behind a mutex; one inference runs
/// at a time.
pub struct WhisperSpeechToText {
    context: Mutex<WhisperContext>,
    model_path: PathBuf,
    model_name: String,
    threads: Option<usize>,
}

impl std::fmt::Debug for WhisperSpeechToText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperSpeechToText")
            .field("model_path", &self.model_path)
            .field("threads", &self.threads)
            .finish_non_exhaustive()
    }
}

impl WhisperSpeechToText {
    pub fn new(model_path: impl Into<PathBuf>) -> Result<Self> {
        let model_path = model_path.into();
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        if !model_path.exists() {
            return Err(VoxError::TranscriptionModelNotFound {
                path: model_path.to_string_lossy().to_string(),
            });
        }

        let model_name = model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("whisper")
            .to_string();

        let path_str = model_path.to_str().ok_or_else(|| VoxError::Transcription {
            message: "Invalid UTF-8 in model path".to_string(),
        })?;
        let mut context_params = WhisperContextParameters::default();
        context_params.flash_attn(true);
        let context = WhisperContext::new_with_params(path_str, context_params).map_err(|e| {
            VoxError::Transcription {
                message: format!("Failed to load Whisper model: {}", e),
            }
        })?;

        tracing::info!(model = %model_name, "loaded whisper model");
        Ok(Self {
            context: Mutex::new(context),
            model_path,
            model_name,
            threads: None,
        })
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    fn infer(&self, samples: &[f32], language: &str) -> Result<String> {
        let context = self.context.lock().map_err(|e| VoxError::Transcription {
            message: format!("Failed to acquire context lock: {}", e),
        })?;
        let mut state = context.create_state().map_err(|e| VoxError::Transcription {
            message: format!("Failed to create Whisper state: {}", e),
        })?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(language));
        if let Some(threads) = self.threads {
            params.set_n_threads(threads as i32);
        }
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state.full(params, samples).map_err(|e| VoxError::Transcription {
            message: format!("Whisper inference failed: {}", e),
        })?;

        let text: String = state.as_iter().map(|segment| segment.to_string()).collect();
        Ok(text.trim().to_string())
    }
}

impl SpeechToText for WhisperSpeechToText {
    fn transcribe(&self, audio: &Path, language: &str) -> Result<String> {
        let data = wav::read_file(audio)?;
        let samples = wav::to_f32(&data.to_speech_format());
        self.infer(&samples, language)
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
