use anyhow::ensure;
use std::f64::consts::TAU;
use strata_audio::{AudioFormat, Encoding, Endianness};

/// Renders a sine tone as raw PCM frames in a given format.
pub struct ToneGenerator {
    format: AudioFormat,
    step: f64,
    phase: f64,
    amplitude: f64,
    bias: i64,
    samples_per_frame: usize,
}

impl ToneGenerator {
    pub fn new(format: AudioFormat, tone_hz: f64) -> anyhow::Result<Self> {
        ensure!(
            format.encoding == Encoding::Lpcm,
            "tone source only renders LPCM, got {}",
            format.encoding
        );
        ensure!(
            format.sample_size_bits <= 64,
            "sample size {} bits is wider than 64",
            format.sample_size_bits
        );

        let half_range = 1i64 << (format.sample_size_bits - 1).min(62);
        Ok(Self {
            step: TAU * tone_hz / f64::from(format.sample_rate_hz),
            phase: 0.0,
            // -6 dBFS
            amplitude: (half_range - 1) as f64 * 0.5,
            bias: if format.data_signed { 0 } else { half_range },
            samples_per_frame: format.frame_size_bytes() / format.bytes_per_sample(),
            format,
        })
    }

    pub fn frame_size(&self) -> usize {
        self.format.frame_size_bytes()
    }

    /// Replaces `out` with the next `frames` frames of the tone.
    pub fn fill(&mut self, frames: usize, out: &mut Vec<u8>) {
        out.clear();
        out.reserve(frames * self.frame_size());
        let width = self.format.bytes_per_sample();

        for _ in 0..frames {
            let value = (self.phase.sin() * self.amplitude).round() as i64 + self.bias;
            let raw = value as u64;
            for _ in 0..self.samples_per_frame {
                match self.format.endianness {
                    Endianness::Little => out.extend_from_slice(&raw.to_le_bytes()[..width]),
                    Endianness::Big => out.extend_from_slice(&raw.to_be_bytes()[8 - width..]),
                }
            }
            self.phase = (self.phase + self.step) % TAU;
        }
    }
}
