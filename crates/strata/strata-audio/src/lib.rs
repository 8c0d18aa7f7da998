//! Audio on top of shared data streams: formats, listener adapters, and a
//! pump that drains a stream on a worker thread.

mod adapter;
mod error;
mod format;
mod pump;
mod shutdown;

pub use adapter::{FormattedAudioStreamAdapter, FormattedAudioStreamListener, SdsAudioSink};
pub use error::AudioError;
pub use format::{AudioFormat, Encoding, Endianness, Layout};
pub use pump::{StreamPump, TaskThread};
pub use shutdown::{ShutdownHandle, ShutdownMonitor};

use strata_sds::InProcessSds;
use tracing::debug;

/// An in-process stream of audio frames.
pub type AudioInputStream = InProcessSds;

/// Creates an in-process stream holding `frames` frames of `format`, one
/// frame per word.
pub fn create_audio_stream(
    format: &AudioFormat,
    frames: usize,
    max_readers: usize,
) -> Result<AudioInputStream, AudioError> {
    format.validate()?;
    let stream = InProcessSds::with_capacity(format.frame_size_bytes(), frames, max_readers)?;
    debug!(%format, frames, max_readers, "created audio stream");
    Ok(stream)
}
