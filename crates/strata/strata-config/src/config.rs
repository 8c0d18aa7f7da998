use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use strata_audio::AudioFormat;

/// Shape and location of the shared stream file.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct StreamConfig {
    #[serde(default = "defaults::shm_file_path")]
    pub shm_file_path: String,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    #[serde(default = "defaults::word_size")]
    pub word_size: usize,
    #[serde(default = "defaults::capacity_words")]
    pub capacity_words: usize,
    #[serde(default = "defaults::max_readers")]
    pub max_readers: usize,
}

/// Settings of the process that formats the stream and writes a tone into it.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SourceConfig {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub format: AudioFormat,
    #[serde(default = "defaults::tone_hz")]
    pub tone_hz: f64,
    #[serde(default = "defaults::chunk_frames")]
    pub chunk_frames: usize,
    #[serde(default = "defaults::write_timeout_ms")]
    pub write_timeout_ms: u64,
}

/// Settings of a process that attaches to the stream and consumes it.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SinkConfig {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default = "defaults::read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "defaults::report_interval_ms")]
    pub report_interval_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

mod defaults {
    pub fn shm_file_path() -> String {
        "/tmp/strata_sds".into()
    }

    pub fn log_level() -> String {
        "info".into()
    }

    /// One frame of 16-bit mono PCM.
    pub fn word_size() -> usize {
        2
    }

    pub fn capacity_words() -> usize {
        1 << 15 // ~2 s of 16 kHz audio
    }

    pub fn max_readers() -> usize {
        4
    }

    pub fn tone_hz() -> f64 {
        440.0
    }

    /// 10 ms at 16 kHz.
    pub fn chunk_frames() -> usize {
        160
    }

    pub fn write_timeout_ms() -> u64 {
        100
    }

    pub fn read_timeout_ms() -> u64 {
        100
    }

    pub fn report_interval_ms() -> u64 {
        1_000
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            shm_file_path: defaults::shm_file_path(),
            log_level: defaults::log_level(),
            word_size: defaults::word_size(),
            capacity_words: defaults::capacity_words(),
            max_readers: defaults::max_readers(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            format: AudioFormat::default(),
            tone_hz: defaults::tone_hz(),
            chunk_frames: defaults::chunk_frames(),
            write_timeout_ms: defaults::write_timeout_ms(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            read_timeout_ms: defaults::read_timeout_ms(),
            report_interval_ms: defaults::report_interval_ms(),
        }
    }
}

fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let toml_to_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(toml::from_str(&toml_to_str)?)
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shm_file_path.is_empty() {
            return Err(ConfigError::Invalid("shm_file_path must not be empty"));
        }
        if self.word_size == 0 || self.word_size > usize::from(u16::MAX) {
            return Err(ConfigError::Invalid("word_size must be in 1..=65535"));
        }
        if self.capacity_words == 0 {
            return Err(ConfigError::Invalid("capacity_words must be non-zero"));
        }
        if self.max_readers == 0 || self.max_readers > usize::from(u8::MAX) {
            return Err(ConfigError::Invalid("max_readers must be in 1..=255"));
        }
        Ok(())
    }

    /// Size of the stream file these settings describe.
    #[cfg(target_os = "linux")]
    pub fn buffer_size(&self) -> strata_sds::Result<usize> {
        strata_sds::ShmSds::calculate_buffer_size(
            self.capacity_words,
            self.word_size,
            self.max_readers,
        )
    }
}

impl SourceConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: SourceConfig = load_toml(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stream.validate()?;
        self.format
            .validate()
            .map_err(|_| ConfigError::Invalid("format is not a valid audio format"))?;
        if self.format.frame_size_bytes() != self.stream.word_size {
            return Err(ConfigError::Invalid(
                "stream.word_size must equal the audio frame size",
            ));
        }
        if !(self.tone_hz > 0.0) {
            return Err(ConfigError::Invalid("tone_hz must be positive"));
        }
        if self.chunk_frames == 0 || self.chunk_frames > self.stream.capacity_words {
            return Err(ConfigError::Invalid(
                "chunk_frames must be in 1..=stream.capacity_words",
            ));
        }
        Ok(())
    }
}

impl SinkConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: SinkConfig = load_toml(path.as_ref())?;
        config.stream.validate()?;
        Ok(config)
    }
}
