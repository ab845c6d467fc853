//! Synthesizer station: replies in, one audio segment per sentence out.

use crate::pipeline::error::StationError;
use crate::pipeline::interrupt::InterruptSignal;
use crate::pipeline::segments::{SegmentStore, split_sentences};
use crate::pipeline::station::{Outlet, Station};
use crate::pipeline::types::{AudioSegment, Reply};
use crate::tts::SpeechSynthesizer;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct SynthesizerStation {
    synth: Arc<dyn SpeechSynthesizer>,
    store: SegmentStore,
    interrupt: InterruptSignal,
    running: Arc<AtomicBool>,
    keep_terminators: bool,
}

impl SynthesizerStation {
    pub fn new(
        synth: Arc<dyn SpeechSynthesizer>,
        store: SegmentStore,
        interrupt: InterruptSignal,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            synth,
            store,
            interrupt,
            running,
            keep_terminators: false,
        }
    }

    pub fn with_keep_terminators(mut self, keep: bool) -> Self {
        self.keep_terminators = keep;
        self
    }

    /// True when the rest of `reply` should not be spoken.
    fn abandoned(&self, reply: &Reply) -> bool {
        !self.running.load(Ordering::Acquire) || self.interrupt.is_stale(reply.generation)
    }
}

impl Station for SynthesizerStation {
    type Input = Reply;
    type Output = AudioSegment;

    fn name(&self) -> &'static str {
        "synthesizer"
    }

    fn process(&mut self, reply: Reply, out: &mut Outlet<AudioSegment>) -> Result<(), StationError> {
        let sentences = split_sentences(&reply.text, self.keep_terminators);
        tracing::debug!(
            generation = reply.generation,
            sentences = sentences.len(),
            "synthesizing reply"
        );

        for sentence in sentences {
            if self.abandoned(&reply) {
                tracing::debug!(generation = reply.generation, "reply superseded, skipping the rest");
                return Ok(());
            }

            let audio = match self.synth.synthesize(&sentence) {
                Ok(audio) => audio,
                Err(e) => {
                    tracing::warn!(sentence = %sentence, "synthesis failed, skipping sentence: {e}");
                    continue;
                }
            };

            if self.abandoned(&reply) {
                tracing::debug!(generation = reply.generation, "reply superseded, skipping the rest");
                return Ok(());
            }

            let segment = match self.store.store(
                &sentence,
                reply.generation,
                &audio,
                self.synth.extension(),
            ) {
                Ok(segment) => segment,
                Err(e) => {
                    tracing::warn!(sentence = %sentence, "failed to write segment audio: {e}");
                    continue;
                }
            };

            tracing::debug!(segment = segment.id, text = %segment.text, "segment ready");
            if !out.emit(segment) {
                return Ok(());
            }
        }
        Ok(())
    }
}
