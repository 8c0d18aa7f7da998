use strata_sds::SdsError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("invalid audio format: {0}")]
    InvalidFormat(&'static str),

    #[error("stream error: {0}")]
    Stream(#[from] SdsError),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_formatting() {
        assert_eq!(
            AudioError::InvalidFormat("channel count must be non-zero").to_string(),
            "invalid audio format: channel count must be non-zero"
        );
        assert_eq!(
            AudioError::from(SdsError::Closed).to_string(),
            "stream error: stream is closed"
        );
    }
}
