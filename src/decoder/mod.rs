// src/decoder/mod.rs

pub mod dsp;
pub mod resample;

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, warn};

use crate::error::DecodeError;

/// Decoded PCM, interleaved at the engine rate and channel count.
/// Immutable once built; slots share it through `Arc`.
#[derive(Debug, Clone)]
pub struct AudioAsset {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: usize,
    duration: f64,
}

impl AudioAsset {
    pub fn from_interleaved(samples: Vec<f32>, sample_rate: u32, channels: usize) -> Self {
        let frames = samples.len() / channels.max(1);
        Self {
            duration: frames as f64 / sample_rate.max(1) as f64,
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1)
    }

    /// Duration in seconds as reported by the decoder for the source stream.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Prepends `seconds` of silence, shifting the content later in time.
    pub fn with_leading_silence(self, seconds: f64) -> Self {
        let pad_frames = (seconds.max(0.0) * self.sample_rate as f64).round() as usize;
        if pad_frames == 0 {
            return self;
        }
        let mut samples = vec![0.0f32; pad_frames * self.channels];
        samples.extend_from_slice(&self.samples);
        Self {
            duration: self.duration + pad_frames as f64 / self.sample_rate as f64,
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }
}

/// Decodes a complete encoded file held in memory and converts it to
/// `target_rate` / `target_channels`.
pub fn decode_bytes(
    bytes: Vec<u8>,
    target_rate: u32,
    target_channels: usize,
) -> Result<AudioAsset, DecodeError> {
    let target_channels = target_channels.max(1);
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let probed = get_probe().format(
        &Default::default(),
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format.default_track().ok_or(DecodeError::NoTrack)?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = get_codecs().make(&codec_params, &DecoderOptions::default())?;
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut out = Vec::<f32>::new();
    let mut source_rate = codec_params.sample_rate.unwrap_or(0);

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) if out.is_empty() => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, "Truncated audio stream, keeping decoded frames.");
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                debug!(error = e, "Skipping undecodable packet.");
                continue;
            }
            Err(SymphoniaError::IoError(_)) => continue,
            Err(e) => return Err(e.into()),
        };
        if decoded.frames() == 0 {
            continue;
        }

        let spec = *decoded.spec();
        if source_rate == 0 {
            source_rate = spec.rate;
        }

        let needs_alloc = sample_buf
            .as_ref()
            .is_none_or(|b| b.capacity() < decoded.capacity());
        if needs_alloc {
            sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);

        let mixed = dsp::updown_mix_interleaved(buf.samples(), spec.channels.count(), target_channels);
        out.extend_from_slice(&mixed);
    }

    if out.is_empty() || source_rate == 0 {
        return Err(DecodeError::Empty);
    }

    let source_frames = out.len() / target_channels;
    let duration = source_frames as f64 / source_rate as f64;

    let samples = resample::resample_interleaved(&out, target_channels, source_rate, target_rate)
        .map_err(|e| DecodeError::Resample(format!("{e:#}")))?;

    debug!(
        source_rate,
        target_rate,
        frames = source_frames,
        duration,
        "Decoded audio asset."
    );

    let mut asset = AudioAsset::from_interleaved(samples, target_rate, target_channels);
    asset.duration = duration;
    Ok(asset)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 16-bit PCM WAV bytes holding `seconds` of a quiet sine.
    pub(crate) fn wav_bytes(seconds: f64, sample_rate: u32, channels: u16) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            let frames = (seconds * sample_rate as f64).round() as usize;
            for f in 0..frames {
                let s = ((f as f32 * 0.03).sin() * 8_000.0) as i16;
                for _ in 0..channels {
                    writer.write_sample(s).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn decodes_wav_duration_and_layout() {
        let asset = decode_bytes(wav_bytes(1.5, 8_000, 1), 8_000, 2).unwrap();
        assert_eq!(asset.channels(), 2);
        assert_eq!(asset.sample_rate(), 8_000);
        assert_eq!(asset.frames(), 12_000);
        assert!((asset.duration() - 1.5).abs() < 1e-9);
        // Mono source duplicated into both channels.
        let s = asset.samples();
        assert_eq!(s[40], s[41]);
    }

    #[test]
    fn zero_target_channels_decodes_as_mono() {
        let asset = decode_bytes(wav_bytes(0.25, 8_000, 2), 8_000, 0).unwrap();
        assert_eq!(asset.channels(), 1);
        assert_eq!(asset.frames(), 2_000);
    }

    #[test]
    fn resampled_asset_reports_source_duration() {
        let asset = decode_bytes(wav_bytes(0.5, 8_000, 2), 16_000, 2).unwrap();
        assert!((asset.duration() - 0.5).abs() < 1e-9);
        assert_eq!(asset.frames(), 8_000);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = decode_bytes(b"definitely not audio".to_vec(), 48_000, 2).unwrap_err();
        assert!(matches!(err, DecodeError::Format(_) | DecodeError::NoTrack));
    }

    #[test]
    fn leading_silence_extends_duration() {
        let asset = AudioAsset::from_interleaved(vec![1.0; 200], 100, 2);
        let padded = asset.with_leading_silence(0.5);
        assert_eq!(padded.frames(), 150);
        assert!((padded.duration() - 1.5).abs() < 1e-9);
        assert_eq!(padded.samples()[0], 0.0);
        assert_eq!(padded.samples()[100], 1.0);
    }
}
