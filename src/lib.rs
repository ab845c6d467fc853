//! voxloop - hands-free spoken conversation with a language model
//!
//! Listens, transcribes, asks the model, speaks the answer sentence by
//! sentence, and stops talking as soon as the user talks over it.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod app;
pub mod audio;
pub mod bridge;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod conversation;
pub mod defaults;
pub mod diagnostics;
pub mod error;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod stt;
pub mod tts;

// Backend seams
pub use audio::playback::AudioOutput;
pub use audio::recorder::AudioSource;
pub use audio::utterance::UtteranceSource;
pub use llm::LanguageModel;
pub use stt::transcriber::{SpeechToText, Transcriber};
pub use tts::SpeechSynthesizer;

// Pipeline
pub use pipeline::orchestrator::{Control, Pipeline, PipelineConfig, PipelineHandle, Services};
pub use pipeline::interrupt::InterruptSignal;

// Conversation
pub use conversation::{Conversation, ConversationEngine, ReplyPolicy};

// Error handling
pub use error::{Result, VoxError};

// Config
pub use config::Config;

// Station framework
pub use pipeline::error::{ErrorReporter, StationError};
pub use pipeline::station::Station;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{version}+{hash}"),
        _ => version.to_string(),
    }
}
