//! Transcriber station: utterance files in, user text out.

use crate::bridge::{BridgeEvent, Notifier};
use crate::pipeline::error::StationError;
use crate::pipeline::interrupt::InterruptSignal;
use crate::pipeline::station::{Outlet, Station};
use crate::pipeline::types::{ConversationInput, UserText, Utterance};
use crate::stt::{TranscribeError, Transcriber, Transcription};
use std::time::{Duration, Instant};

pub struct TranscriberStation {
    transcriber: Transcriber,
    interrupt: InterruptSignal,
    notifier: Notifier,
    warned_backpressure: bool,
}

impl TranscriberStation {
    pub fn new(transcriber: Transcriber, interrupt: InterruptSignal, notifier: Notifier) -> Self {
        Self {
            transcriber,
            interrupt,
            notifier,
            warned_backpressure: false,
        }
    }

    /// Warns once when the engine cannot keep up with speech.
    fn check_backpressure(&mut self, audio: Duration, started: Instant) {
        if self.warned_backpressure {
            return;
        }
        let elapsed = started.elapsed();
        if elapsed > audio {
            self.warned_backpressure = true;
            tracing::warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                audio_ms = audio.as_millis() as u64,
                model = self.transcriber.model_name(),
                "transcription is slower than real time"
            );
        }
    }
}

impl Station for TranscriberStation {
    type Input = Utterance;
    type Output = ConversationInput;

    fn name(&self) -> &'static str {
        "transcriber"
    }

    fn process(
        &mut self,
        utterance: Utterance,
        out: &mut Outlet<ConversationInput>,
    ) -> Result<(), StationError> {
        let sequence = utterance.sequence;
        let duration = utterance.duration;
        let started = Instant::now();

        let result = self.transcriber.transcribe(utterance);
        if result.as_ref().is_ok_and(|t| *t != Transcription::Empty) {
            self.check_backpressure(duration, started);
        }

        match result {
            Ok(Transcription::Text(text)) => {
                let generation = self.interrupt.set();
                tracing::info!(sequence, generation, text = %text, "heard");
                out.emit(ConversationInput::User(UserText { text, generation }));
                Ok(())
            }
            Ok(Transcription::Empty) => {
                tracing::debug!(sequence, "nothing recognised");
                Ok(())
            }
            Err(TranscribeError::Hallucination(text)) => {
                tracing::debug!(sequence, text = %text, "dropped hallucinated transcription");
                Ok(())
            }
            Err(TranscribeError::EngineFailure(e)) => {
                self.notifier.notify(BridgeEvent::Restart);
                Err(StationError::Recoverable(format!(
                    "transcription of utterance {sequence} failed: {e}"
                )))
            }
        }
    }
}
