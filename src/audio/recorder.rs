use crate::error::{Result, VoxError};
use std::collections::VecDeque;

/// Trait for audio input devices.
///
/// This trait allows swapping implementations (real microphone vs mock).
/// Samples are 16kHz mono 16-bit PCM.
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio from the source.
    fn stop(&mut self) -> Result<()>;

    /// Take the samples captured since the previous call.
    ///
    /// An empty vector means nothing new arrived yet.
    fn read_samples(&mut self) -> Result<Vec<i16>>;

    /// True for sources that run dry (files, scripted mocks). Once a finite
    /// source returns an empty read it has nothing more to give.
    fn is_finite(&self) -> bool {
        false
    }
}

/// Mock audio source for testing.
///
/// Replays scripted chunks, one per read, then returns empty reads.
#[derive(Debug, Clone, Default)]
pub struct MockAudioSource {
    is_started: bool,
    chunks: VecDeque<Vec<i16>>,
    should_fail_start: bool,
    should_fail_read: bool,
}

impl MockAudioSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one chunk of samples.
    pub fn with_chunk(mut self, samples: Vec<i16>) -> Self {
        self.chunks.push_back(samples);
        self
    }

    /// Queue `count` chunks of `len` samples at constant `amplitude`.
    pub fn with_repeated(mut self, count: usize, len: usize, amplitude: i16) -> Self {
        for _ in 0..count {
            self.chunks.push_back(vec![amplitude; len]);
        }
        self
    }

    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    pub fn is_started(&self) -> bool {
        self.is_started
    }

    pub fn remaining(&self) -> usize {
        self.chunks.len()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            return Err(VoxError::AudioCapture {
                message: "mock audio start failure".to_string(),
            });
        }
        self.is_started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.is_started = false;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.should_fail_read {
            return Err(VoxError::AudioCapture {
                message: "mock audio read failure".to_string(),
            });
        }
        Ok(self.chunks.pop_front().unwrap_or_default())
    }

    fn is_finite(&self) -> bool {
        true
    }
}
