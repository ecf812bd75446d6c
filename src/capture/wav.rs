// src/capture/wav.rs

use std::io::Cursor;

use anyhow::Result;
use hound::{SampleFormat, WavSpec, WavWriter};

/// Accumulates captured f32 samples and encodes them as a 16-bit PCM WAV
/// blob in memory.
pub struct WavBlobWriter {
    spec: WavSpec,
    samples: Vec<i16>,
}

impl WavBlobWriter {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            spec: WavSpec {
                channels: channels.max(1) as u16,
                sample_rate,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            },
            samples: Vec::new(),
        }
    }

    pub fn write(&mut self, interleaved: &[f32]) {
        self.samples.extend(interleaved.iter().map(|&s| {
            if s.is_finite() {
                (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
            } else {
                0
            }
        }));
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.spec.channels as usize
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity(44 + self.samples.len() * 2));
        {
            let mut writer = WavWriter::new(&mut cursor, self.spec)?;
            for &s in &self.samples {
                writer.write_sample(s)?;
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_reads_back_with_hound() {
        let mut w = WavBlobWriter::new(16_000, 1);
        w.write(&[0.0, 0.5, -0.5, 2.0, f32::NAN]);
        assert_eq!(w.frames(), 5);
        let bytes = w.finish().unwrap();

        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        let samples: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, 16_383, -16_383, i16::MAX, 0]);
    }

    #[test]
    fn empty_capture_is_still_a_valid_file() {
        let bytes = WavBlobWriter::new(48_000, 2).finish().unwrap();
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.len(), 0);
    }
}
