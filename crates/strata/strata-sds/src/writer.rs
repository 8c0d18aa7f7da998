//! The single producer of a stream.
//!
//! A writer publishes in two steps. It first claims the words it is about to
//! fill by advancing `write_end_cursor`, copies them into the ring, then
//! releases them to readers by storing `write_start_cursor`:
//!
//! ```text
//!            oldest_unconsumed      write_start   write_end
//!                   │                    │            │
//!   ... overwritable│ readable by readers│ being copied│ free ...
//! ```
//!
//! Readers load `write_start_cursor` with `Acquire`, so every byte below it is
//! visible to them. A reader that finds `write_end_cursor` more than one ring
//! ahead of its cursor knows its data is gone.

use crate::error::{Result, SdsError};
use crate::layout::BufferLayout;
use crate::policy::WriterPolicy;
use crate::ring::{Index, distance};
use crate::traits::{SharedCondvar, SharedMutex, StreamTraits};
use crate::wait::Deadline;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{Ordering, fence};
use std::time::Duration;
use tracing::debug;

/// The writer side of a shared data stream.
///
/// At most one writer is enabled per buffer, across every process attached to
/// it. Once a writer closes, the stream never accepts another one.
pub struct Writer<T: StreamTraits> {
    layout: Arc<BufferLayout<T>>,
    policy: WriterPolicy,
    closed: bool,
}

impl<T: StreamTraits> Writer<T> {
    pub(crate) fn create(layout: Arc<BufferLayout<T>>, policy: WriterPolicy) -> Result<Self> {
        {
            let header = layout.header();
            let _guard = header.writer_enable_mutex.lock();
            if header.writer_closed.load(Ordering::Acquire) {
                return Err(SdsError::InvalidState("stream writer has already closed"));
            }
            if header.writer_enabled.load(Ordering::Acquire) {
                return Err(SdsError::InvalidState("a writer is already enabled"));
            }
            header.writer_enabled.store(true, Ordering::Release);
        }
        debug!(%policy, "writer enabled");
        Ok(Self {
            layout,
            policy,
            closed: false,
        })
    }

    pub fn policy(&self) -> WriterPolicy {
        self.policy
    }

    pub fn word_size(&self) -> usize {
        self.layout.word_size()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Absolute index of the next word this writer will publish.
    pub fn tell(&self) -> Index {
        self.layout
            .header()
            .write_start_cursor
            .load(Ordering::Acquire)
    }

    /// Words that can be written without overwriting unconsumed data.
    fn available(&self) -> Index {
        let header = self.layout.header();
        let start = header.write_start_cursor.load(Ordering::Acquire);
        let oldest = header.oldest_unconsumed_cursor.load(Ordering::Acquire);
        self.layout
            .data_size()
            .saturating_sub(distance(oldest, start))
    }

    /// Writes whole words from `data` and returns how many were written.
    ///
    /// `timeout` only applies to [`WriterPolicy::Blocking`]; zero waits
    /// forever. A blocking write may be partial.
    pub fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize> {
        if self.closed {
            return Err(SdsError::InvalidState("writer is closed"));
        }
        let layout = &*self.layout;
        let word_size = layout.word_size();
        if data.is_empty() || data.len() % word_size != 0 {
            return Err(SdsError::InvalidState(
                "write must be a non-zero whole number of words",
            ));
        }

        let words = (data.len() / word_size) as Index;
        let data_size = layout.data_size();
        let header = layout.header();
        let start = header.write_start_cursor.load(Ordering::Acquire);

        let written = match self.policy {
            WriterPolicy::Nonblockable => {
                if words > data_size {
                    return Err(SdsError::InvalidState("write is larger than the ring"));
                }
                let end = start + words;
                header.write_end_cursor.store(end, Ordering::Release);
                // Anything older than one ring behind `end` is about to go.
                if end > data_size {
                    header
                        .oldest_unconsumed_cursor
                        .fetch_max(end - data_size, Ordering::AcqRel);
                }
                words
            }
            WriterPolicy::AllOrNothing => {
                if words > data_size {
                    return Err(SdsError::InvalidState("write is larger than the ring"));
                }
                let _guard = header.backward_seek_mutex.lock();
                if self.available() < words {
                    return Err(SdsError::WouldBlock);
                }
                header.write_end_cursor.store(start + words, Ordering::Release);
                words
            }
            WriterPolicy::Blocking => {
                let deadline = Deadline::after(timeout);
                let mut guard = header.backward_seek_mutex.lock();
                loop {
                    let available = self.available();
                    if available > 0 {
                        let n = words.min(available);
                        header.write_end_cursor.store(start + n, Ordering::Release);
                        break n;
                    }
                    guard = deadline.wait(&header.space_available_cv, guard)?;
                }
            }
        };

        // Readers re-check write_end after copying; it must be visible before
        // the first byte of the ring changes.
        fence(Ordering::SeqCst);
        layout.copy_into_ring(start, &data[..written as usize * word_size]);
        header
            .write_start_cursor
            .store(start + written, Ordering::Release);

        {
            let _guard = header.data_available_mutex.lock();
            header.data_available_cv.notify_all();
        }
        Ok(written as usize)
    }

    /// Byte-oriented write. Trailing bytes that do not fill a word are left
    /// unwritten; blocking writers wait without a deadline.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<usize> {
        let word_size = self.layout.word_size();
        let max_words = self.layout.data_size() as usize;
        let words = (bytes.len() / word_size).min(max_words);
        if words == 0 {
            return Err(SdsError::InvalidState("fewer bytes than one word"));
        }
        let written = self.write(&bytes[..words * word_size], Duration::ZERO)?;
        Ok(written * word_size)
    }

    /// Closes the writer. Readers drain what was published and then see
    /// `Closed`. Called on drop.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let layout = &*self.layout;
        let header = layout.header();
        {
            let _guard = header.writer_enable_mutex.lock();
            header.writer_enabled.store(false, Ordering::Release);
            header.writer_closed.store(true, Ordering::Release);
        }

        let write_end = header.write_end_cursor.load(Ordering::Acquire);
        {
            let _guard = header.reader_enable_mutex.lock();
            for close_index in layout.enabled_close_indices() {
                close_index.fetch_min(write_end, Ordering::AcqRel);
            }
        }

        {
            let _guard = header.data_available_mutex.lock();
            header.data_available_cv.notify_all();
        }
        debug!(write_end, "writer closed");
    }
}

impl<T: StreamTraits> Drop for Writer<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: StreamTraits> io::Write for Writer<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_bytes(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{InProcessSds, ReaderPolicy, SdsError, WriterPolicy};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[test]
    fn rejects_partial_words() {
        let sds = InProcessSds::with_capacity(4, 8, 1).unwrap();
        let mut writer = sds.create_writer(WriterPolicy::AllOrNothing).unwrap();
        assert!(matches!(
            writer.write(&[1, 2, 3], Duration::ZERO),
            Err(SdsError::InvalidState(_))
        ));
        assert!(matches!(
            writer.write(&[], Duration::ZERO),
            Err(SdsError::InvalidState(_))
        ));
        assert_eq!(writer.write(&[0; 8], Duration::ZERO).unwrap(), 2);
        assert_eq!(writer.tell(), 2);
    }

    #[test]
    fn only_one_writer_at_a_time() {
        let sds = InProcessSds::with_capacity(1, 8, 1).unwrap();
        let writer = sds.create_writer(WriterPolicy::Blocking).unwrap();
        assert!(matches!(
            sds.create_writer(WriterPolicy::Blocking),
            Err(SdsError::InvalidState(_))
        ));

        // A closed stream never gets a second writer.
        drop(writer);
        assert!(matches!(
            sds.create_writer(WriterPolicy::Blocking),
            Err(SdsError::InvalidState(_))
        ));
    }

    #[test]
    fn all_or_nothing_refuses_to_overwrite_unread_data() {
        let sds = InProcessSds::with_capacity(1, 8, 1).unwrap();
        let _reader = sds.create_reader(ReaderPolicy::Nonblocking).unwrap();
        let mut writer = sds.create_writer(WriterPolicy::AllOrNothing).unwrap();

        assert_eq!(writer.write(b"abcdef", Duration::ZERO).unwrap(), 6);
        assert!(matches!(
            writer.write(b"ghi", Duration::ZERO),
            Err(SdsError::WouldBlock)
        ));
        assert_eq!(writer.write(b"gh", Duration::ZERO).unwrap(), 2);
        assert!(matches!(
            writer.write(b"123456789", Duration::ZERO),
            Err(SdsError::InvalidState(_))
        ));
    }

    #[test]
    fn nonblockable_writer_laps_slow_readers() {
        let sds = InProcessSds::with_capacity(1, 4, 1).unwrap();
        let mut reader = sds.create_reader(ReaderPolicy::Nonblocking).unwrap();
        let mut writer = sds.create_writer(WriterPolicy::Nonblockable).unwrap();

        writer.write(b"abcd", Duration::ZERO).unwrap();
        writer.write(b"ef", Duration::ZERO).unwrap();

        let mut buf = [0u8; 4];
        assert!(matches!(
            reader.read(&mut buf, Duration::ZERO),
            Err(SdsError::Overrun)
        ));
    }

    #[test]
    fn nonblockable_writer_drags_barrier_one_ring_behind() {
        let sds = InProcessSds::with_capacity(1, 4, 1).unwrap();
        let _reader = sds.create_reader(ReaderPolicy::Nonblocking).unwrap();
        let mut writer = sds.create_writer(WriterPolicy::Nonblockable).unwrap();
        let barrier = || {
            sds.layout()
                .header()
                .oldest_unconsumed_cursor
                .load(Ordering::Acquire)
        };

        writer.write(b"abcd", Duration::ZERO).unwrap();
        assert_eq!(barrier(), 0);
        writer.write(b"ef", Duration::ZERO).unwrap();
        assert_eq!(barrier(), 2);
        writer.write(b"ghi", Duration::ZERO).unwrap();
        assert_eq!(barrier(), 5);
        assert_eq!(writer.tell(), 9);
    }

    #[test]
    fn blocking_write_times_out_when_full() {
        let sds = InProcessSds::with_capacity(1, 4, 1).unwrap();
        let _reader = sds.create_reader(ReaderPolicy::Nonblocking).unwrap();
        let mut writer = sds.create_writer(WriterPolicy::Blocking).unwrap();

        // Partial write fills the ring.
        assert_eq!(writer.write(b"abcdef", Duration::ZERO).unwrap(), 4);
        assert!(matches!(
            writer.write(b"g", Duration::from_millis(10)),
            Err(SdsError::TimedOut)
        ));
    }

    #[test]
    fn io_write_reports_bytes() {
        use std::io::Write;

        let sds = InProcessSds::with_capacity(2, 8, 1).unwrap();
        let mut writer = sds.create_writer(WriterPolicy::Nonblockable).unwrap();
        assert_eq!(Write::write(&mut writer, b"abcde").unwrap(), 4);
        Write::flush(&mut writer).unwrap();
    }
}
