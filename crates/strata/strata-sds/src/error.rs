use std::io;
use thiserror::Error;

/// Everything a stream operation can report.
///
/// None of these are fatal. A full ring or a slow reader is a normal operating
/// condition, and retrying is left to the caller.
#[derive(Error, Debug)]
pub enum SdsError {
    #[error("operation would block")]
    WouldBlock,

    #[error("timed out waiting for the stream")]
    TimedOut,

    #[error("data was overwritten before it could be read")]
    Overrun,

    #[error("stream is closed")]
    Closed,

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("{field} = {value} exceeds the header limit of {max}")]
    Overflow {
        field: &'static str,
        value: usize,
        max: usize,
    },

    #[error("buffer format mismatch: {0}")]
    MismatchedFormat(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, SdsError>;

impl From<SdsError> for io::Error {
    fn from(err: SdsError) -> Self {
        let kind = match &err {
            SdsError::WouldBlock => io::ErrorKind::WouldBlock,
            SdsError::TimedOut => io::ErrorKind::TimedOut,
            SdsError::Overrun => io::ErrorKind::InvalidData,
            SdsError::Closed => io::ErrorKind::BrokenPipe,
            SdsError::InvalidState(_) | SdsError::Overflow { .. } => io::ErrorKind::InvalidInput,
            SdsError::MismatchedFormat(_) => io::ErrorKind::InvalidData,
            SdsError::Io(e) => e.kind(),
        };
        match err {
            SdsError::Io(e) => e,
            other => io::Error::new(kind, other),
        }
    }
}
