//! Conversation pipeline.
//!
//! Each stage runs in its own thread, connected to the next by a bounded
//! crossbeam channel. See [`orchestrator`] for the wiring.

pub mod conversation_station;
pub mod error;
pub mod interrupt;
pub mod orchestrator;
pub mod player;
pub mod segments;
pub mod station;
pub mod synthesizer_station;
pub mod transcriber_station;
pub mod types;

pub use conversation_station::ConversationStation;
pub use error::{ErrorReporter, LogReporter, StationError};
pub use interrupt::InterruptSignal;
pub use orchestrator::{Control, Pipeline, PipelineConfig, PipelineHandle, Services};
pub use player::Player;
pub use segments::{SegmentStore, prepare_work_dir, split_sentences};
pub use station::{Outlet, Station, StationRunner};
pub use synthesizer_station::SynthesizerStation;
pub use transcriber_station::TranscriberStation;
pub use types::{AudioSegment, ConversationInput, Reply, TempAudio, UserText, Utterance};
