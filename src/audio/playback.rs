//! Rendering synthesized audio files to a sound device.

use crate::error::{Result, VoxError};
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Shared flag asking an in-progress render to stop.
pub type StopFlag = Arc<AtomicBool>;

/// How a render ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Completed,
    Stopped,
}

/// Trait for audio output devices.
///
/// `render` blocks until the file has been played or `stop` is raised. It is
/// called from a dedicated render thread.
pub trait AudioOutput: Send + Sync {
    fn render(&self, path: &Path, stop: &AtomicBool) -> Result<RenderOutcome>;
}

impl<T: AudioOutput + ?Sized> AudioOutput for Arc<T> {
    fn render(&self, path: &Path, stop: &AtomicBool) -> Result<RenderOutcome> {
        (**self).render(path, stop)
    }
}

/// Sleeps for `total` in small slices, returning early when `stop` is raised.
pub(crate) fn wait_or_stop(total: Duration, stop: &AtomicBool) -> RenderOutcome {
    let deadline = Instant::now() + total;
    loop {
        if stop.load(Ordering::Acquire) {
            return RenderOutcome::Stopped;
        }
        let now = Instant::now();
        if now >= deadline {
            return RenderOutcome::Completed;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(5)));
    }
}

#[derive(Debug, Default)]
struct MockRecord {
    rendered: Vec<PathBuf>,
    stopped: Vec<PathBuf>,
    missing: Vec<PathBuf>,
}

/// Mock output for testing.
///
/// Pretends every file takes `render_time` to play. Records which files were
/// played to the end, which were stopped, and which did not exist.
#[derive(Debug, Clone)]
pub struct MockOutput {
    render_time: Duration,
    fail: bool,
    record: Arc<Mutex<MockRecord>>,
    started_tx: Sender<PathBuf>,
    started_rx: Receiver<PathBuf>,
}

impl Default for MockOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOutput {
    pub fn new() -> Self {
        let (started_tx, started_rx) = unbounded();
        Self {
            render_time: Duration::from_millis(10),
            fail: false,
            record: Arc::new(Mutex::new(MockRecord::default())),
            started_tx,
            started_rx,
        }
    }

    pub fn with_render_time(mut self, render_time: Duration) -> Self {
        self.render_time = render_time;
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Waits for the next render to begin and returns its file.
    pub fn wait_started(&self, timeout: Duration) -> Option<PathBuf> {
        self.started_rx.recv_timeout(timeout).ok()
    }

    /// Files played to completion, in order.
    pub fn rendered(&self) -> Vec<PathBuf> {
        self.record.lock().map(|r| r.rendered.clone()).unwrap_or_default()
    }

    /// Files whose render was cut short.
    pub fn stopped(&self) -> Vec<PathBuf> {
        self.record.lock().map(|r| r.stopped.clone()).unwrap_or_default()
    }

    /// Files that were asked for but did not exist.
    pub fn missing(&self) -> Vec<PathBuf> {
        self.record.lock().map(|r| r.missing.clone()).unwrap_or_default()
    }

    /// File stems of every render that started, completed or not.
    pub fn started_names(&self) -> Vec<String> {
        let Ok(record) = self.record.lock() else {
            return Vec::new();
        };
        let mut all: Vec<&PathBuf> = record.rendered.iter().chain(&record.stopped).collect();
        all.sort_by_key(|p| stem_id(p));
        all.into_iter()
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect()
    }
}

fn stem_id(path: &Path) -> u64 {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(u64::MAX)
}

impl AudioOutput for MockOutput {
    fn render(&self, path: &Path, stop: &AtomicBool) -> Result<RenderOutcome> {
        if !path.exists() {
            if let Ok(mut record) = self.record.lock() {
                record.missing.push(path.to_path_buf());
            }
            return Err(VoxError::AudioPlayback {
                message: format!("no such file: {}", path.display()),
            });
        }
        if self.fail {
            return Err(VoxError::AudioPlayback {
                message: "mock playback failure".to_string(),
            });
        }
        self.started_tx.send(path.to_path_buf()).ok();

        let outcome = wait_or_stop(self.render_time, stop);
        if let Ok(mut record) = self.record.lock() {
            match outcome {
                RenderOutcome::Completed => record.rendered.push(path.to_path_buf()),
                RenderOutcome::Stopped => record.stopped.push(path.to_path_buf()),
            }
        }
        Ok(outcome)
    }
}

#[cfg(feature = "cpal-audio")]
pub use cpal_output::CpalOutput;

#[cfg(feature = "cpal-audio")]
mod cpal_output {
    use super::{AudioOutput, RenderOutcome, wait_or_stop};
    use crate::audio::capture::{Direction, find_device};
    use crate::audio::wav;
    use crate::error::{Result, VoxError};
    use cpal::traits::{DeviceTrait, StreamTrait};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// Plays WAV files on a CPAL output device.
    pub struct CpalOutput {
        device_name: Option<String>,
    }

    impl CpalOutput {
        /// Checks that the device exists; it is reopened for every render.
        pub fn new(device_name: Option<&str>) -> Result<Self> {
            let device = find_device(Direction::Output, device_name)?;
            if let Ok(name) = device.name() {
                tracing::info!(device = %name, "using output device");
            }
            Ok(Self {
                device_name: device_name.map(str::to_string),
            })
        }

        fn stream_config(
            device: &cpal::Device,
            sample_rate: u32,
        ) -> Result<(cpal::StreamConfig, u32)> {
            let rate = cpal::SampleRate(sample_rate);
            let exact = device
                .supported_output_configs()
                .map_err(|e| VoxError::AudioPlayback {
                    message: e.to_string(),
                })?
                .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
                .find(|c| {
                    c.channels() <= 2 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
                });

            if let Some(config) = exact {
                return Ok((config.with_sample_rate(rate).config(), sample_rate));
            }

            let fallback = device
                .default_output_config()
                .map_err(|e| VoxError::AudioPlayback {
                    message: e.to_string(),
                })?;
            let fallback_rate = fallback.sample_rate().0;
            Ok((fallback.config(), fallback_rate))
        }
    }

    impl AudioOutput for CpalOutput {
        fn render(&self, path: &Path, stop: &AtomicBool) -> Result<RenderOutcome> {
            let data = wav::read_file(path)?;
            let device = find_device(Direction::Output, self.device_name.as_deref())?;
            let (config, rate) = Self::stream_config(&device, data.sample_rate)?;

            let mono = wav::resample(&data.to_mono(), data.sample_rate, rate);
            let samples = Arc::new(wav::to_f32(&mono));
            if samples.is_empty() {
                return Ok(RenderOutcome::Completed);
            }

            let channels = usize::from(config.channels.max(1));
            let position = Arc::new(AtomicUsize::new(0));
            let finished = Arc::new(AtomicBool::new(false));

            let stream = {
                let samples = Arc::clone(&samples);
                let position = Arc::clone(&position);
                let finished = Arc::clone(&finished);
                device
                    .build_output_stream(
                        &config,
                        move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            let mut pos = position.load(Ordering::Relaxed);
                            for frame in out.chunks_mut(channels) {
                                let sample = samples.get(pos).copied().unwrap_or(0.0);
                                frame.fill(sample);
                                if pos < samples.len() {
                                    pos += 1;
                                }
                            }
                            position.store(pos, Ordering::Relaxed);
                            if pos >= samples.len() {
                                finished.store(true, Ordering::Release);
                            }
                        },
                        |err| tracing::error!(error = %err, "audio playback error"),
                        None,
                    )
                    .map_err(|e| VoxError::AudioPlayback {
                        message: e.to_string(),
                    })?
            };
            stream.play().map_err(|e| VoxError::AudioPlayback {
                message: e.to_string(),
            })?;

            let expected =
                Duration::from_millis(samples.len() as u64 * 1000 / u64::from(rate.max(1)));
            let deadline = Instant::now() + expected + Duration::from_millis(500);
            let outcome = loop {
                if stop.load(Ordering::Acquire) {
                    break RenderOutcome::Stopped;
                }
                if finished.load(Ordering::Acquire) || Instant::now() >= deadline {
                    // Let the device drain its last buffer.
                    break wait_or_stop(Duration::from_millis(50), stop);
                }
                std::thread::sleep(Duration::from_millis(10));
            };

            drop(stream);
            tracing::debug!(path = %path.display(), ?outcome, "render finished");
            Ok(outcome)
        }
    }
}
