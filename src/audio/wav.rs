//! WAV helpers built on `hound`: utterance files on the way in, synthesized
//! segments on the way out.

use crate::defaults::SAMPLE_RATE;
use crate::error::{Result, VoxError};
use std::io::{Cursor, Read};
use std::path::Path;
use std::time::Duration;

/// Decoded PCM with its original format.
#[derive(Debug, Clone, PartialEq)]
pub struct WavData {
    /// Interleaved 16-bit samples.
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl WavData {
    pub fn duration(&self) -> Duration {
        let frames = self.samples.len() as u64 / u64::from(self.channels.max(1));
        Duration::from_millis(frames * 1000 / u64::from(self.sample_rate.max(1)))
    }

    /// Averages channels into one.
    pub fn to_mono(&self) -> Vec<i16> {
        let channels = usize::from(self.channels.max(1));
        if channels == 1 {
            return self.samples.clone();
        }
        self.samples
            .chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    }

    /// Mono at 16kHz, the format speech-to-text expects.
    pub fn to_speech_format(&self) -> Vec<i16> {
        resample(&self.to_mono(), self.sample_rate, SAMPLE_RATE)
    }
}

/// Decodes WAV data from any reader. Float WAVs are converted to 16-bit.
pub fn decode<R: Read>(reader: R) -> Result<WavData> {
    let mut wav_reader = hound::WavReader::new(reader).map_err(|e| VoxError::AudioCapture {
        message: format!("Failed to parse WAV data: {}", e),
    })?;
    let spec = wav_reader.spec();

    let samples = match spec.sample_format {
        hound::SampleFormat::Int if spec.bits_per_sample <= 16 => wav_reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let shift = spec.bits_per_sample.saturating_sub(16);
            wav_reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v >> shift) as i16))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
        hound::SampleFormat::Float => wav_reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * 32767.0) as i16))
            .collect::<std::result::Result<Vec<_>, _>>()?,
    };

    Ok(WavData {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

pub fn decode_bytes(bytes: &[u8]) -> Result<WavData> {
    decode(Cursor::new(bytes))
}

pub fn read_file(path: &Path) -> Result<WavData> {
    let file = std::fs::File::open(path)?;
    decode(std::io::BufReader::new(file))
}

/// Writes 16-bit mono PCM.
pub fn write_mono(path: &Path, samples: &[i16], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Encodes 16-bit mono PCM into an in-memory WAV file.
pub fn encode_mono(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &s in samples {
            writer.write_sample(s)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            match samples.get(source_idx + 1) {
                Some(&next) => {
                    let left = samples[source_idx] as f64;
                    (left + (next as f64 - left) * fraction) as i16
                }
                None => samples[source_idx],
            }
        })
        .collect()
}

/// Converts 16-bit PCM to f32 in [-1.0, 1.0).
pub fn to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_wav(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn test_decode_mono_16k() {
        let data = decode_bytes(&make_wav(16000, 1, &[100, 200, 300])).unwrap();
        assert_eq!(data.samples, vec![100, 200, 300]);
        assert_eq!(data.to_speech_format(), vec![100, 200, 300]);
    }

    #[test]
    fn test_stereo_downmix() {
        let data = decode_bytes(&make_wav(16000, 2, &[100, 300, -100, -300])).unwrap();
        assert_eq!(data.to_mono(), vec![200, -200]);
    }

    #[test]
    fn test_duration() {
        let data = decode_bytes(&make_wav(16000, 1, &vec![0; 8000])).unwrap();
        assert_eq!(data.duration(), Duration::from_millis(500));

        let stereo = decode_bytes(&make_wav(48000, 2, &vec![0; 96000])).unwrap();
        assert_eq!(stereo.duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_resample_48k_to_16k() {
        let samples = vec![1000i16; 4800];
        let out = resample(&samples, 48000, 16000);
        assert_eq!(out.len(), 1600);
        assert!(out.iter().all(|&s| s == 1000));
    }

    #[test]
    fn test_resample_edge_cases() {
        assert!(resample(&[], 48000, 16000).is_empty());
        assert_eq!(resample(&[7], 8000, 16000), vec![7, 7]);
    }

    #[test]
    fn test_write_then_read_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.wav");
        write_mono(&path, &[1, -1, 2, -2], 24000).unwrap();
        let data = read_file(&path).unwrap();
        assert_eq!(data.sample_rate, 24000);
        assert_eq!(data.channels, 1);
        assert_eq!(data.samples, vec![1, -1, 2, -2]);
    }

    #[test]
    fn test_encode_mono_is_decodable() {
        let bytes = encode_mono(&[5; 160], 16000).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(decode_bytes(&bytes).unwrap().samples.len(), 160);
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(decode_bytes(b"definitely not a wav file").is_err());
        assert!(decode_bytes(&[]).is_err());
    }

    #[test]
    fn test_to_f32_range() {
        let out = to_f32(&[i16::MIN, 0, i16::MAX]);
        assert_eq!(out[0], -1.0);
        assert_eq!(out[1], 0.0);
        assert!(out[2] < 1.0);
    }
}
