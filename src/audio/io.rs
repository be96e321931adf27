//! WAV file access through `hound`.

use crate::audio::resample::AudioResampler;
use crate::audio::Waveform;
use crate::error::{Result, TtsError};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;

fn audio_err(path: &Path, err: impl std::fmt::Display) -> TtsError {
    TtsError::Audio(format!("{}: {err}", path.display()))
}

#[derive(Debug, Default)]
pub struct WavIo;

impl WavIo {
    /// Read every channel of a WAV file as floats in `[-1, 1]`.
    pub fn read_wav(path: impl AsRef<Path>) -> Result<(Vec<Vec<f32>>, u32)> {
        let path = path.as_ref();
        let mut reader = WavReader::open(path).map_err(|e| audio_err(path, e))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;
        let mut samples = vec![Vec::new(); channels];

        match spec.sample_format {
            SampleFormat::Float => {
                for (idx, sample) in reader.samples::<f32>().enumerate() {
                    samples[idx % channels].push(sample.map_err(|e| audio_err(path, e))?);
                }
            }
            SampleFormat::Int => {
                let max = (1_i64 << (spec.bits_per_sample - 1)) as f32;
                for (idx, sample) in reader.samples::<i32>().enumerate() {
                    let value = sample.map_err(|e| audio_err(path, e))? as f32 / max;
                    samples[idx % channels].push(value);
                }
            }
        }
        Ok((samples, spec.sample_rate))
    }

    /// Read a file as a mono waveform at `sample_rate`, downmixing and resampling as needed.
    pub fn read_mono(path: impl AsRef<Path>, sample_rate: u32) -> Result<Waveform> {
        let (channels, source_rate) = Self::read_wav(path)?;
        let mut mono = AudioResampler::convert_audio(channels, source_rate, sample_rate, 1)?;
        Ok(Waveform::new(mono.pop().unwrap_or_default(), sample_rate))
    }

    /// Write a mono waveform as 16-bit PCM.
    pub fn write_wav(path: impl AsRef<Path>, waveform: &Waveform) -> Result<()> {
        let path = path.as_ref();
        let spec = WavSpec {
            channels: 1,
            sample_rate: waveform.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).map_err(|e| audio_err(path, e))?;
        for &value in &waveform.samples {
            let scaled = (value.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
            writer
                .write_sample(scaled)
                .map_err(|e| audio_err(path, e))?;
        }
        writer.finalize().map_err(|e| audio_err(path, e))
    }
}
