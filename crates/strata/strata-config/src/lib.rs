mod config;
mod logging;

pub use config::{ConfigError, SinkConfig, SourceConfig, StreamConfig};
pub use logging::setup_logging;
