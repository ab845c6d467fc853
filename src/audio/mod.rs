//! Audio in and out: microphone capture, utterance segmentation, WAV
//! handling and playback.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod playback;
pub mod recorder;
pub mod utterance;
pub mod vad;
pub mod wav;

pub use playback::{AudioOutput, MockOutput, RenderOutcome, StopFlag};
pub use recorder::{AudioSource, MockAudioSource};
pub use utterance::{
    Capture, CaptureConfig, InboxUtteranceSource, SpeechStartHook, UtteranceSource,
    VadUtteranceSource,
};
