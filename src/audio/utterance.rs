//! Turning input into discrete utterance files.
//!
//! Two sources: [`VadUtteranceSource`] segments a live sample stream with the
//! VAD, [`InboxUtteranceSource`] picks up WAV files that another program
//! drops into a directory. Both hand out [`Utterance`]s backed by
//! `utt-<seq>.wav` in the work directory.

use crate::audio::recorder::AudioSource;
use crate::audio::vad::{Vad, VadConfig, VadEvent};
use crate::audio::wav;
use crate::defaults;
use crate::error::Result;
use crate::pipeline::types::Utterance;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Callback fired the moment the user starts talking.
pub type SpeechStartHook = Box<dyn Fn() + Send>;

/// Result of one [`UtteranceSource::poll`].
#[derive(Debug)]
pub enum Capture {
    Utterance(Utterance),
    /// Nothing heard within the listen timeout; poll again.
    Timeout,
    /// The source is exhausted and will produce nothing more.
    Finished,
}

pub trait UtteranceSource: Send {
    /// Blocks for at most about one listen timeout, unless a phrase is in
    /// progress, in which case it returns when the phrase ends or hits the
    /// phrase limit.
    fn poll(&mut self) -> Result<Capture>;

    /// Installs a barge-in hook. Sources that cannot tell when speech
    /// starts ignore it.
    fn set_speech_start_hook(&mut self, _hook: SpeechStartHook) {}

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Timing parameters for [`VadUtteranceSource`].
#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub vad_threshold: f32,
    pub silence_duration_ms: u32,
    pub listen_timeout: Duration,
    pub phrase_limit: Duration,
    pub pre_speech: Duration,
    pub ambient_calibration: Duration,
    pub ambient_ratio: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            vad_threshold: defaults::VAD_THRESHOLD,
            silence_duration_ms: defaults::SILENCE_DURATION_MS,
            listen_timeout: Duration::from_millis(defaults::LISTEN_TIMEOUT_MS),
            phrase_limit: Duration::from_millis(defaults::PHRASE_LIMIT_MS),
            pre_speech: Duration::from_millis(u64::from(defaults::PRE_SPEECH_MS)),
            ambient_calibration: Duration::from_millis(u64::from(defaults::AMBIENT_CALIBRATION_MS)),
            ambient_ratio: defaults::AMBIENT_RATIO,
        }
    }
}

impl CaptureConfig {
    fn samples(&self, duration: Duration) -> usize {
        (duration.as_millis() as u64 * u64::from(self.sample_rate) / 1000) as usize
    }
}

/// Names and writes utterance files.
#[derive(Debug)]
pub struct UtteranceWriter {
    dir: PathBuf,
    sample_rate: u32,
    next_sequence: u64,
}

impl UtteranceWriter {
    pub fn new(dir: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            dir: dir.into(),
            sample_rate,
            next_sequence: 0,
        }
    }

    fn next_path(&mut self) -> (PathBuf, u64) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        (self.dir.join(format!("utt-{sequence}.wav")), sequence)
    }

    pub fn write(&mut self, samples: &[i16]) -> Result<Utterance> {
        let (path, sequence) = self.next_path();
        wav::write_mono(&path, samples, self.sample_rate)?;
        let duration =
            Duration::from_millis(samples.len() as u64 * 1000 / u64::from(self.sample_rate.max(1)));
        Ok(Utterance::new(path, duration, sequence))
    }

    /// Moves an existing WAV file into the work directory.
    pub fn adopt(&mut self, source: &Path, duration: Duration) -> Result<Utterance> {
        let (path, sequence) = self.next_path();
        if std::fs::rename(source, &path).is_err() {
            // Different filesystem.
            std::fs::copy(source, &path)?;
            std::fs::remove_file(source)?;
        }
        Ok(Utterance::new(path, duration, sequence))
    }
}

/// VAD samples per analysis frame (30ms at 16kHz).
const FRAME_SAMPLES: usize = 480;

/// Pause between empty reads of a live source.
const READ_INTERVAL: Duration = Duration::from_millis(10);

/// Segments a sample stream into utterances.
pub struct VadUtteranceSource<A: AudioSource> {
    source: A,
    config: CaptureConfig,
    vad: Vad,
    writer: UtteranceWriter,
    backlog: VecDeque<i16>,
    pre_roll: VecDeque<i16>,
    phrase: Option<Vec<i16>>,
    idle_samples: usize,
    started: bool,
    exhausted: bool,
    hook: Option<SpeechStartHook>,
}

impl<A: AudioSource> VadUtteranceSource<A> {
    pub fn new(source: A, config: CaptureConfig, work_dir: impl Into<PathBuf>) -> Self {
        let vad = Vad::new(VadConfig {
            speech_threshold: config.vad_threshold,
            silence_duration_ms: config.silence_duration_ms,
            sample_rate: config.sample_rate,
            calibration_ms: u32::try_from(config.ambient_calibration.as_millis()).unwrap_or(u32::MAX),
            ambient_ratio: config.ambient_ratio,
        });
        Self {
            source,
            vad,
            writer: UtteranceWriter::new(work_dir, config.sample_rate),
            config,
            backlog: VecDeque::new(),
            pre_roll: VecDeque::new(),
            phrase: None,
            idle_samples: 0,
            started: false,
            exhausted: false,
            hook: None,
        }
    }

    fn feed(&mut self, frame: &[i16]) -> Result<Option<Utterance>> {
        let event = self.vad.process(frame);

        if self.phrase.is_none() {
            if event == VadEvent::SpeechStart {
                self.start_phrase(frame);
            } else {
                self.pre_roll.extend(frame.iter().copied());
                let keep = self.config.samples(self.config.pre_speech);
                let excess = self.pre_roll.len().saturating_sub(keep);
                self.pre_roll.drain(..excess);
            }
            return Ok(None);
        }

        let limit = self.config.samples(self.config.phrase_limit);
        let reached_limit = match self.phrase.as_mut() {
            Some(phrase) => {
                phrase.extend_from_slice(frame);
                phrase.len() >= limit
            }
            None => false,
        };
        if event == VadEvent::SpeechEnd {
            return self.finish_phrase();
        }
        if reached_limit {
            tracing::debug!("phrase limit reached");
            self.vad.reset();
            return self.finish_phrase();
        }
        Ok(None)
    }

    fn start_phrase(&mut self, frame: &[i16]) {
        let mut phrase: Vec<i16> = self.pre_roll.drain(..).collect();
        phrase.extend_from_slice(frame);
        self.phrase = Some(phrase);
        self.idle_samples = 0;
        tracing::debug!("speech started");
        if let Some(hook) = &self.hook {
            hook();
        }
    }

    fn finish_phrase(&mut self) -> Result<Option<Utterance>> {
        let Some(samples) = self.phrase.take() else {
            return Ok(None);
        };
        let utterance = self.writer.write(&samples)?;
        tracing::debug!(
            sequence = utterance.sequence,
            duration_ms = utterance.duration.as_millis() as u64,
            "captured utterance"
        );
        Ok(Some(utterance))
    }
}

impl<A: AudioSource> UtteranceSource for VadUtteranceSource<A> {
    fn poll(&mut self) -> Result<Capture> {
        if !self.started {
            self.source.start()?;
            self.started = true;
        }

        let deadline = Instant::now() + self.config.listen_timeout;
        let timeout_samples = self.config.samples(self.config.listen_timeout).max(1);

        loop {
            if self.backlog.len() < FRAME_SAMPLES && !self.exhausted {
                let samples = self.source.read_samples()?;
                if !samples.is_empty() {
                    self.backlog.extend(samples);
                } else if self.source.is_finite() {
                    self.exhausted = true;
                } else {
                    if self.phrase.is_none() && Instant::now() >= deadline {
                        return Ok(Capture::Timeout);
                    }
                    thread::sleep(READ_INTERVAL);
                }
                continue;
            }

            if self.backlog.is_empty() {
                return Ok(match self.finish_phrase()? {
                    Some(utterance) => Capture::Utterance(utterance),
                    None => Capture::Finished,
                });
            }

            let n = self.backlog.len().min(FRAME_SAMPLES);
            let frame: Vec<i16> = self.backlog.drain(..n).collect();
            if let Some(utterance) = self.feed(&frame)? {
                return Ok(Capture::Utterance(utterance));
            }

            if self.phrase.is_none() {
                self.idle_samples += n;
                if self.idle_samples >= timeout_samples {
                    self.idle_samples = 0;
                    return Ok(Capture::Timeout);
                }
            }
        }
    }

    fn set_speech_start_hook(&mut self, hook: SpeechStartHook) {
        self.hook = Some(hook);
    }

    fn close(&mut self) -> Result<()> {
        if self.started {
            self.started = false;
            self.source.stop()?;
        }
        Ok(())
    }
}

/// Interval between directory scans.
const INBOX_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Picks up `*.wav` files written into a directory.
///
/// Writers must create the file under another name and rename it into
/// place, so a half-written file is never picked up. Files are taken in
/// name order and moved into the work directory.
pub struct InboxUtteranceSource {
    inbox: PathBuf,
    writer: UtteranceWriter,
    listen_timeout: Duration,
}

impl InboxUtteranceSource {
    pub fn new(inbox: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            inbox: inbox.into(),
            writer: UtteranceWriter::new(work_dir, defaults::SAMPLE_RATE),
            listen_timeout: Duration::from_millis(defaults::LISTEN_TIMEOUT_MS),
        }
    }

    pub fn with_listen_timeout(mut self, timeout: Duration) -> Self {
        self.listen_timeout = timeout;
        self
    }

    fn next_file(&self) -> Result<Option<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.inbox)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "wav"))
            .collect();
        files.sort();
        Ok(files.into_iter().next())
    }

    fn take(&mut self, path: &Path) -> Result<Option<Utterance>> {
        match wav::read_file(path) {
            Ok(data) => self.writer.adopt(path, data.duration()).map(Some),
            Err(e) => {
                tracing::warn!(path = %path.display(), "discarding unreadable inbox file: {e}");
                std::fs::remove_file(path)?;
                Ok(None)
            }
        }
    }
}

impl UtteranceSource for InboxUtteranceSource {
    fn poll(&mut self) -> Result<Capture> {
        let deadline = Instant::now() + self.listen_timeout;
        loop {
            if let Some(path) = self.next_file()?
                && let Some(utterance) = self.take(&path)?
            {
                return Ok(Capture::Utterance(utterance));
            }
            if Instant::now() >= deadline {
                return Ok(Capture::Timeout);
            }
            thread::sleep(INBOX_POLL_INTERVAL);
        }
    }
}
