//! Microphone capture and device discovery through CPAL.

use crate::audio::recorder::AudioSource;
use crate::audio::wav::resample;
use crate::defaults;
use crate::error::{Result, VoxError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};

/// Runs `f` with stderr pointed at /dev/null.
///
/// CPAL queries ALSA, JACK and PipeWire on enumeration and each of them
/// prints diagnostics nobody asked for.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` on fd 2. Safe as long as no other thread
/// is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Devices that follow the desktop's own routing.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse"];

/// Channel-split and digital outputs that are never what a user means.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "hdmi",
    "s/pdif",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES.iter().any(|pref| lower.contains(pref))
}

/// Which side of the sound card to enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Lists usable device names; preferred ones are marked `[recommended]`.
pub fn list_devices(direction: Direction) -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        match direction {
            Direction::Input => host.input_devices().map(|d| d.collect::<Vec<_>>()),
            Direction::Output => host.output_devices().map(|d| d.collect::<Vec<_>>()),
        }
    })
    .map_err(|e| VoxError::AudioCapture {
        message: format!("Failed to enumerate devices: {}", e),
    })?;

    Ok(devices
        .iter()
        .filter_map(|device| device.name().ok())
        .filter(|name| !should_filter_device(name))
        .map(|name| {
            if is_preferred_device(&name) {
                format!("{} [recommended]", name)
            } else {
                name
            }
        })
        .collect())
}

/// Finds a device by exact name, or the best default for `direction`.
pub(crate) fn find_device(direction: Direction, name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices: Vec<cpal::Device> = match direction {
            Direction::Input => host.input_devices().map(|d| d.collect()),
            Direction::Output => host.output_devices().map(|d| d.collect()),
        }
        .map_err(|e| VoxError::AudioCapture {
            message: format!("Failed to enumerate devices: {}", e),
        })?;

        if let Some(wanted) = name {
            return devices
                .into_iter()
                .find(|d| d.name().is_ok_and(|n| n == wanted))
                .ok_or_else(|| VoxError::AudioDeviceNotFound {
                    device: wanted.to_string(),
                });
        }

        if let Some(device) = devices
            .into_iter()
            .find(|d| d.name().is_ok_and(|n| is_preferred_device(&n)))
        {
            return Ok(device);
        }

        let fallback = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        };
        fallback.ok_or_else(|| VoxError::AudioDeviceNotFound {
            device: "default".to_string(),
        })
    })
}

/// Wrapper that lets a `cpal::Stream` live behind a `Mutex` in a `Send` type.
///
/// SAFETY: the stream is only touched through the owning mutex, from one
/// thread at a time.
pub(crate) struct SendableStream(pub(crate) cpal::Stream);

unsafe impl Send for SendableStream {}

/// Microphone source delivering 16kHz mono i16.
///
/// Asks the device for that format directly and falls back to its native
/// configuration with software down-mixing and resampling.
pub struct CpalAudioSource {
    device: cpal::Device,
    stream: Arc<Mutex<Option<SendableStream>>>,
    buffer: Arc<Mutex<Vec<i16>>>,
    sample_rate: u32,
}

impl CpalAudioSource {
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let device = find_device(Direction::Input, device_name)?;
        if let Ok(name) = device.name() {
            tracing::info!(device = %name, "using input device");
        }
        Ok(Self {
            device,
            stream: Arc::new(Mutex::new(None)),
            buffer: Arc::new(Mutex::new(Vec::new())),
            sample_rate: defaults::SAMPLE_RATE,
        })
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        let preferred = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let buffer = Arc::clone(&self.buffer);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            |err| tracing::warn!("audio input stream error: {err}"),
            None,
        ) {
            return Ok(stream);
        }

        self.build_stream_native()
    }

    fn build_stream_native(&self) -> Result<cpal::Stream> {
        let native = self
            .device
            .default_input_config()
            .map_err(|e| VoxError::AudioCapture {
                message: format!("Failed to query default input config: {}", e),
            })?;

        let native_rate = native.sample_rate().0;
        let channels = native.channels() as usize;
        let target_rate = self.sample_rate;
        let config: cpal::StreamConfig = native.clone().into();

        tracing::info!(
            channels,
            rate = native_rate,
            format = ?native.sample_format(),
            "using native input format, converting in software"
        );

        let buffer = Arc::clone(&self.buffer);
        let push = move |mono: Vec<i16>| {
            let converted = resample(&mono, native_rate, target_rate);
            if let Ok(mut buf) = buffer.lock() {
                buf.extend_from_slice(&converted);
            }
        };

        let stream = match native.sample_format() {
            cpal::SampleFormat::I16 => self.device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    push(downmix(data.iter().copied(), channels));
                },
                |err| tracing::warn!("audio input stream error: {err}"),
                None,
            ),
            cpal::SampleFormat::F32 => self.device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let samples = data
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
                    push(downmix(samples, channels));
                },
                |err| tracing::warn!("audio input stream error: {err}"),
                None,
            ),
            other => {
                return Err(VoxError::AudioCapture {
                    message: format!("Unsupported native sample format: {:?}", other),
                });
            }
        };

        stream.map_err(|e| VoxError::AudioCapture {
            message: format!("Failed to build input stream: {}", e),
        })
    }
}

fn downmix(samples: impl Iterator<Item = i16>, channels: usize) -> Vec<i16> {
    let interleaved: Vec<i16> = samples.collect();
    if channels <= 1 {
        return interleaved;
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        let mut guard = self.stream.lock().map_err(|e| VoxError::AudioCapture {
            message: format!("Failed to lock stream: {}", e),
        })?;
        if guard.is_some() {
            return Ok(());
        }

        let stream = self.build_stream()?;
        stream.play().map_err(|e| VoxError::AudioCapture {
            message: format!("Failed to start audio stream: {}", e),
        })?;
        *guard = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut guard = self.stream.lock().map_err(|e| VoxError::AudioCapture {
            message: format!("Failed to lock stream: {}", e),
        })?;
        if let Some(stream) = guard.take() {
            stream.0.pause().map_err(|e| VoxError::AudioCapture {
                message: format!("Failed to stop audio stream: {}", e),
            })?;
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        let mut buffer = self.buffer.lock().map_err(|e| VoxError::AudioCapture {
            message: format!("Failed to lock audio buffer: {}", e),
        })?;
        Ok(std::mem::take(&mut *buffer))
    }
}
