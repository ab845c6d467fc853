//! Voice activity detection.
//!
//! RMS thresholding with a small state machine that tolerates short pauses
//! inside a phrase. Timing is derived from the number of samples processed,
//! so results are independent of how fast chunks arrive.
//!
//! The detector first listens for `calibration_ms` to learn the ambient
//! noise floor, then keeps tracking it between phrases. A frame only counts
//! as speech when it is `ambient_ratio` times louder than that floor and
//! above the static threshold.

use crate::defaults;

/// Upper bound for the noise-derived threshold.
const MAX_AMBIENT_THRESHOLD: f32 = 0.2;

/// Weight of each new quiet frame in the running noise floor.
const AMBIENT_ALPHA: f32 = 0.05;

#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// RMS threshold for speech (0.0 to 1.0).
    pub speech_threshold: f32,
    /// Silence needed before a phrase is considered finished.
    pub silence_duration_ms: u32,
    pub sample_rate: u32,
    /// Initial listening window used only to measure background noise.
    pub calibration_ms: u32,
    /// How far above the noise floor speech must be. Zero disables noise
    /// tracking.
    pub ambient_ratio: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speech_threshold: defaults::VAD_THRESHOLD,
            silence_duration_ms: defaults::SILENCE_DURATION_MS,
            sample_rate: defaults::SAMPLE_RATE,
            calibration_ms: defaults::AMBIENT_CALIBRATION_MS,
            ambient_ratio: defaults::AMBIENT_RATIO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    Idle,
    Speaking,
    /// Quiet inside a phrase, not yet long enough to end it.
    MaybeSilence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    SpeechStart,
    Speech,
    Silence,
    SpeechEnd,
}

pub struct Vad {
    config: VadConfig,
    state: VadState,
    silence_samples: u64,
    /// Frame levels heard so far while calibrating; `None` once done.
    calibration: Option<Vec<f32>>,
    calibration_samples: u64,
    noise_floor: Option<f32>,
}

impl Vad {
    pub fn new(config: VadConfig) -> Self {
        let calibrate = config.calibration_ms > 0 && config.ambient_ratio > 0.0;
        Self {
            config,
            state: VadState::Idle,
            silence_samples: 0,
            calibration: calibrate.then(Vec::new),
            calibration_samples: 0,
            noise_floor: None,
        }
    }

    pub fn process(&mut self, samples: &[i16]) -> VadEvent {
        let level = calculate_rms(samples);

        if let Some(levels) = self.calibration.as_mut() {
            levels.push(level);
            self.calibration_samples += samples.len() as u64;
            if self.samples_to_ms(self.calibration_samples) >= u64::from(self.config.calibration_ms) {
                self.noise_floor = median(levels);
                self.calibration = None;
                tracing::debug!(
                    noise_floor = self.noise_floor.unwrap_or_default(),
                    threshold = self.threshold(),
                    "calibrated to ambient noise"
                );
            }
            return VadEvent::Silence;
        }

        let is_speech = level > self.threshold();

        match (self.state, is_speech) {
            (VadState::Idle, true) => {
                self.state = VadState::Speaking;
                VadEvent::SpeechStart
            }
            (VadState::Idle, false) => {
                self.track_noise(level);
                VadEvent::Silence
            }
            (VadState::Speaking | VadState::MaybeSilence, true) => {
                self.state = VadState::Speaking;
                self.silence_samples = 0;
                VadEvent::Speech
            }
            (VadState::Speaking | VadState::MaybeSilence, false) => {
                self.state = VadState::MaybeSilence;
                self.silence_samples += samples.len() as u64;
                if self.samples_to_ms(self.silence_samples) >= u64::from(self.config.silence_duration_ms) {
                    self.reset();
                    VadEvent::SpeechEnd
                } else {
                    VadEvent::Silence
                }
            }
        }
    }

    /// Level a frame must exceed to count as speech.
    pub fn threshold(&self) -> f32 {
        match self.noise_floor {
            Some(floor) if self.config.ambient_ratio > 0.0 => (floor * self.config.ambient_ratio)
                .min(MAX_AMBIENT_THRESHOLD)
                .max(self.config.speech_threshold),
            _ => self.config.speech_threshold,
        }
    }

    fn track_noise(&mut self, level: f32) {
        if self.config.ambient_ratio <= 0.0 {
            return;
        }
        self.noise_floor = Some(match self.noise_floor {
            Some(floor) => floor * (1.0 - AMBIENT_ALPHA) + level * AMBIENT_ALPHA,
            None => level,
        });
    }

    fn samples_to_ms(&self, samples: u64) -> u64 {
        samples * 1000 / u64::from(self.config.sample_rate.max(1))
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    /// Ends the current phrase. The learned noise floor is kept.
    pub fn reset(&mut self) {
        self.state = VadState::Idle;
        self.silence_samples = 0;
    }
}

fn median(levels: &[f32]) -> Option<f32> {
    let mut sorted = levels.to_vec();
    sorted.sort_by(f32::total_cmp);
    sorted.get(sorted.len() / 2).copied()
}

/// Root mean square of 16-bit PCM, normalised to 0.0..=1.0.
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}
