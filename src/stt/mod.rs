//! Speech-to-text: engine adapters and the utterance transcriber.

pub mod http;
pub mod transcriber;
#[cfg(feature = "whisper")]
pub mod whisper;

pub use http::HttpSpeechToText;
pub use transcriber::{
    MockSpeechToText, SpeechToText, TranscribeError, Transcriber, Transcription,
};
#[cfg(feature = "whisper")]
pub use whisper::WhisperSpeechToText;
