use crate::error::AudioError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Encoding {
    Lpcm,
    Opus,
}

/// Arrangement of channels in a multi-channel stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Layout {
    /// One stream per channel.
    NonInterleaved,
    /// Samples of all channels alternate within one stream.
    Interleaved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Endianness {
    Little,
    Big,
}

/// Describes the audio carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub encoding: Encoding,
    pub endianness: Endianness,
    pub sample_rate_hz: u32,
    pub sample_size_bits: u32,
    pub num_channels: u32,
    pub data_signed: bool,
    pub layout: Layout,
}

impl Default for AudioFormat {
    /// 16 kHz, 16-bit signed little-endian mono LPCM.
    fn default() -> Self {
        Self {
            encoding: Encoding::Lpcm,
            endianness: Endianness::Little,
            sample_rate_hz: 16_000,
            sample_size_bits: 16,
            num_channels: 1,
            data_signed: true,
            layout: Layout::Interleaved,
        }
    }
}

impl AudioFormat {
    pub fn bytes_per_sample(&self) -> usize {
        self.sample_size_bits.div_ceil(8) as usize
    }

    /// Bytes in one frame of a single stream: every channel's sample when
    /// interleaved, one sample otherwise.
    pub fn frame_size_bytes(&self) -> usize {
        match self.layout {
            Layout::Interleaved => self.bytes_per_sample() * self.num_channels as usize,
            Layout::NonInterleaved => self.bytes_per_sample(),
        }
    }

    pub fn bytes_per_second(&self) -> usize {
        self.frame_size_bytes() * self.sample_rate_hz as usize
    }

    pub fn validate(&self) -> Result<(), AudioError> {
        if self.sample_rate_hz == 0 {
            return Err(AudioError::InvalidFormat("sample rate must be non-zero"));
        }
        if self.sample_size_bits == 0 || self.sample_size_bits % 8 != 0 {
            return Err(AudioError::InvalidFormat(
                "sample size must be a non-zero multiple of 8 bits",
            ));
        }
        if self.num_channels == 0 {
            return Err(AudioError::InvalidFormat("channel count must be non-zero"));
        }
        Ok(())
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Encoding::Lpcm => "LPCM",
            Encoding::Opus => "OPUS",
        })
    }
}

impl fmt::Display for Endianness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Endianness::Little => "LITTLE",
            Endianness::Big => "BIG",
        })
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Layout::NonInterleaved => "NON_INTERLEAVED",
            Layout::Interleaved => "INTERLEAVED",
        })
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}Hz {}bit x{} {} {} {}",
            self.encoding,
            self.sample_rate_hz,
            self.sample_size_bits,
            self.num_channels,
            if self.data_signed { "signed" } else { "unsigned" },
            self.endianness,
            self.layout,
        )
    }
}
