use crate::format::AudioFormat;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use strata_sds::{SdsError, StreamTraits, Writer};
use tracing::{error, warn};

/// Receives formatted audio pushed through a [`FormattedAudioStreamAdapter`].
pub trait FormattedAudioStreamListener: Send + Sync {
    fn on_formatted_audio_data(&self, format: &AudioFormat, data: &[u8]);
}

/// Forwards raw audio bytes, tagged with their format, to a listener.
///
/// The listener is held weakly: the adapter never keeps it alive, and data
/// sent after the listener is gone is dropped.
pub struct FormattedAudioStreamAdapter {
    format: AudioFormat,
    listener: Mutex<Option<Weak<dyn FormattedAudioStreamListener>>>,
}

impl FormattedAudioStreamAdapter {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            listener: Mutex::new(None),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn set_listener(&self, listener: &Arc<dyn FormattedAudioStreamListener>) {
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::downgrade(listener));
    }

    pub fn clear_listener(&self) {
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Hands `data` to the listener and returns the number of bytes
    /// delivered: all of them, or 0 when `data` is empty or there is no live
    /// listener.
    pub fn send(&self, data: &[u8]) -> usize {
        if data.is_empty() {
            error!("send failed: empty buffer");
            return 0;
        }
        // Upgrade under the lock, call outside it.
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade);
        match listener {
            Some(listener) => {
                listener.on_formatted_audio_data(&self.format, data);
                data.len()
            }
            None => 0,
        }
    }
}

/// A listener that publishes received audio into a shared data stream.
pub struct SdsAudioSink<T: StreamTraits> {
    writer: Mutex<Writer<T>>,
    bytes_written: AtomicU64,
    bytes_dropped: AtomicU64,
}

impl<T: StreamTraits> SdsAudioSink<T> {
    pub fn new(writer: Writer<T>) -> Self {
        Self {
            writer: Mutex::new(writer),
            bytes_written: AtomicU64::new(0),
            bytes_dropped: AtomicU64::new(0),
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Bytes the stream refused: partial frames, a full ring or a closed
    /// writer.
    pub fn bytes_dropped(&self) -> u64 {
        self.bytes_dropped.load(Ordering::Relaxed)
    }

    /// Closes the underlying writer so readers see end of stream.
    pub fn close(&self) {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close();
    }
}

impl<T: StreamTraits> FormattedAudioStreamListener for SdsAudioSink<T> {
    fn on_formatted_audio_data(&self, format: &AudioFormat, data: &[u8]) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if format.frame_size_bytes() != writer.word_size() {
            warn!(
                %format,
                word_size = writer.word_size(),
                "audio frame size does not match stream word size"
            );
        }

        let mut offset = 0;
        while offset < data.len() {
            match writer.write_bytes(&data[offset..]) {
                Ok(n) => offset += n,
                // Ring full, or a trailing partial frame.
                Err(SdsError::WouldBlock) => break,
                Err(SdsError::InvalidState(_)) if data.len() - offset < writer.word_size() => {
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "audio sink write failed");
                    break;
                }
            }
        }

        self.bytes_written
            .fetch_add(offset as u64, Ordering::Relaxed);
        self.bytes_dropped
            .fetch_add((data.len() - offset) as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use strata_sds::{InProcessSds, InProcessTraits, ReaderPolicy, WriterPolicy};

    #[derive(Default)]
    struct Collect(Mutex<Vec<u8>>);

    impl FormattedAudioStreamListener for Collect {
        fn on_formatted_audio_data(&self, _format: &AudioFormat, data: &[u8]) {
            self.0.lock().unwrap().extend_from_slice(data);
        }
    }

    #[test]
    fn send_without_listener_delivers_nothing() {
        let adapter = FormattedAudioStreamAdapter::new(AudioFormat::default());
        assert_eq!(adapter.send(&[1, 2]), 0);
    }

    #[test]
    fn send_reaches_live_listener_only() {
        let adapter = FormattedAudioStreamAdapter::new(AudioFormat::default());
        let collect = Arc::new(Collect::default());
        let listener: Arc<dyn FormattedAudioStreamListener> = collect.clone();
        adapter.set_listener(&listener);

        assert_eq!(adapter.send(&[]), 0);
        assert_eq!(adapter.send(&[1, 2, 3, 4]), 4);
        assert_eq!(*collect.0.lock().unwrap(), vec![1, 2, 3, 4]);

        drop(listener);
        drop(collect);
        assert_eq!(adapter.send(&[5, 6]), 0);
    }

    #[test]
    fn sds_sink_publishes_whole_frames() {
        let sds = InProcessSds::with_capacity(2, 8, 1).unwrap();
        let mut reader = sds.create_reader(ReaderPolicy::Nonblocking).unwrap();
        let writer = sds.create_writer(WriterPolicy::AllOrNothing).unwrap();
        let sink: Arc<SdsAudioSink<InProcessTraits>> = Arc::new(SdsAudioSink::new(writer));

        sink.on_formatted_audio_data(&AudioFormat::default(), &[1, 2, 3, 4, 5]);
        assert_eq!(sink.bytes_written(), 4);
        assert_eq!(sink.bytes_dropped(), 1);

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf, Duration::ZERO).unwrap(), 2);
        assert_eq!(&buf[..4], &[1, 2, 3, 4]);

        sink.close();
        assert!(matches!(
            reader.read(&mut buf, Duration::ZERO),
            Err(SdsError::Closed)
        ));
    }
}
