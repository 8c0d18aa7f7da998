//! Independent consumers of a stream.
//!
//! Each reader owns one slot of the per-reader arrays: an enabled flag, a
//! cursor and a close index. The cursor only moves forward except through an
//! explicit backward [`Reader::seek`], which is checked against the barrier
//! under `backward_seek_mutex`.

use crate::error::{Result, SdsError};
use crate::layout::BufferLayout;
use crate::policy::{ReaderPolicy, Reference};
use crate::ring::{Index, distance};
use crate::traits::{SharedMutex, StreamTraits};
use crate::wait::Deadline;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering, fence};
use std::time::Duration;
use tracing::debug;

/// The reader side of a shared data stream.
pub struct Reader<T: StreamTraits> {
    layout: Arc<BufferLayout<T>>,
    id: usize,
    policy: ReaderPolicy,
    // One word held back for `io::Read` callers asking for less than a word.
    staged: Vec<u8>,
    staged_at: usize,
}

impl<T: StreamTraits> Reader<T> {
    /// Enables reader slot `id`, or the first free slot when `id` is `None`.
    ///
    /// The new reader joins live: its cursor starts at the writer's published
    /// position and it does not see earlier data unless it seeks back.
    pub(crate) fn create(
        layout: Arc<BufferLayout<T>>,
        id: Option<usize>,
        policy: ReaderPolicy,
    ) -> Result<Self> {
        let id = {
            let header = layout.header();
            let _enable = header.reader_enable_mutex.lock();

            let id = match id {
                Some(id) if id >= layout.max_readers() => {
                    return Err(SdsError::InvalidState("reader id out of range"));
                }
                Some(id) if layout.is_reader_enabled(id) => {
                    return Err(SdsError::InvalidState("reader id already in use"));
                }
                Some(id) => id,
                None => (0..layout.max_readers())
                    .find(|&id| !layout.is_reader_enabled(id))
                    .ok_or(SdsError::InvalidState("no free reader slot"))?,
            };

            let _seek = header.backward_seek_mutex.lock();
            let cursor = header.write_start_cursor.load(Ordering::Acquire);
            layout.reader_cursor(id).store(cursor, Ordering::Release);
            let close_index = if header.writer_closed.load(Ordering::Acquire) {
                header.write_end_cursor.load(Ordering::Acquire)
            } else {
                Index::MAX
            };
            layout
                .reader_close_index(id)
                .store(close_index, Ordering::Release);
            layout.enable_reader_locked(id);

            // A barrier left ahead of the writer by a reader that sought into
            // the future must come back down to cover this one.
            if header.oldest_unconsumed_cursor.load(Ordering::Acquire) > cursor {
                header
                    .oldest_unconsumed_cursor
                    .store(cursor, Ordering::Release);
            }
            id
        };
        debug!(id, %policy, "reader enabled");
        Ok(Self {
            layout,
            id,
            policy,
            staged: Vec::new(),
            staged_at: 0,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn policy(&self) -> ReaderPolicy {
        self.policy
    }

    pub fn word_size(&self) -> usize {
        self.layout.word_size()
    }

    fn cursor(&self) -> &AtomicU64 {
        self.layout.reader_cursor(self.id)
    }

    fn close_index(&self) -> &AtomicU64 {
        self.layout.reader_close_index(self.id)
    }

    /// Words readable at `cursor` right now, or the condition that ends the
    /// read.
    fn readable(&self, cursor: Index) -> Result<Index> {
        let header = self.layout.header();
        let write_end = header.write_end_cursor.load(Ordering::Acquire);
        if distance(cursor, write_end) > self.layout.data_size() {
            return Err(SdsError::Overrun);
        }
        let close_index = self.close_index().load(Ordering::Acquire);
        if cursor >= close_index {
            return Err(SdsError::Closed);
        }
        let write_start = header.write_start_cursor.load(Ordering::Acquire);
        let available = distance(cursor, write_start.min(close_index));
        if available == 0 && header.writer_closed.load(Ordering::Acquire) {
            return Err(SdsError::Closed);
        }
        Ok(available)
    }

    /// Reads whole words into `buf` and returns how many were read.
    ///
    /// Bytes of `buf` beyond the last whole word are left untouched.
    /// `timeout` only applies to [`ReaderPolicy::Blocking`]; zero waits
    /// forever.
    pub fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let layout = &*self.layout;
        let word_size = layout.word_size();
        let wanted = (buf.len() / word_size) as Index;
        if wanted == 0 {
            return Err(SdsError::InvalidState("read buffer smaller than one word"));
        }

        let header = layout.header();
        let cursor = self.cursor().load(Ordering::Acquire);

        let available = self.readable(cursor)?;
        if available == 0 {
            // Caught up: nothing before the cursor is needed any more, so a
            // writer waiting for space must not keep waiting on us.
            layout.update_oldest_unconsumed_cursor();
        }

        let available = match (available, self.policy) {
            (0, ReaderPolicy::Nonblocking) => return Err(SdsError::WouldBlock),
            (0, ReaderPolicy::Blocking) => {
                let deadline = Deadline::after(timeout);
                let mut guard = header.data_available_mutex.lock();
                loop {
                    let available = self.readable(cursor)?;
                    if available > 0 {
                        break available;
                    }
                    guard = deadline.wait(&header.data_available_cv, guard)?;
                }
            }
            (available, _) => available,
        };

        let words = available.min(wanted);
        layout.copy_from_ring(cursor, &mut buf[..words as usize * word_size]);
        self.finish_read(cursor, words)
    }

    /// Commits a copy of `words` words taken at `cursor`.
    ///
    /// The cursor advances even when a lossy writer lapped the copied range
    /// meanwhile; that read then reports `Overrun` instead of the count.
    fn finish_read(&mut self, cursor: Index, words: Index) -> Result<usize> {
        let layout = &*self.layout;
        fence(Ordering::SeqCst);
        let write_end = layout.header().write_end_cursor.load(Ordering::Acquire);
        let overwritten = write_end.saturating_sub(layout.data_size()) > cursor;

        self.cursor().store(cursor + words, Ordering::Release);
        layout.update_oldest_unconsumed_cursor();

        if overwritten {
            return Err(SdsError::Overrun);
        }
        Ok(words as usize)
    }

    /// Byte-oriented read. Waits without a deadline for blocking readers.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        let words = self.read(buf, Duration::ZERO)?;
        Ok(words * self.layout.word_size())
    }

    fn resolve(&self, offset: Index, reference: Reference) -> Result<Index> {
        let cursor = self.cursor().load(Ordering::Acquire);
        let write_start = self
            .layout
            .header()
            .write_start_cursor
            .load(Ordering::Acquire);
        match reference {
            Reference::AfterReader => cursor.checked_add(offset),
            Reference::BeforeReader => cursor.checked_sub(offset),
            Reference::BeforeWriter => write_start.checked_sub(offset),
            Reference::Absolute => Some(offset),
        }
        .ok_or(SdsError::InvalidState("offset out of range"))
    }

    /// Moves the cursor.
    ///
    /// Forward seeks always succeed, even past the writer. Backward seeks fail
    /// with `Overrun` when the target is behind the barrier or has already
    /// been overwritten.
    pub fn seek(&mut self, offset: Index, reference: Reference) -> Result<()> {
        let target = self.resolve(offset, reference)?;
        self.staged.clear();
        self.staged_at = 0;
        if target > self.close_index().load(Ordering::Acquire) {
            return Err(SdsError::InvalidState("seek past the reader's close index"));
        }

        let cursor = self.cursor().load(Ordering::Acquire);
        if target >= cursor {
            self.cursor().store(target, Ordering::Release);
            self.layout.update_oldest_unconsumed_cursor();
            return Ok(());
        }

        let header = self.layout.header();
        let _guard = header.backward_seek_mutex.lock();
        let oldest = header.oldest_unconsumed_cursor.load(Ordering::Acquire);
        let write_end = header.write_end_cursor.load(Ordering::Acquire);
        if target < oldest || distance(target, write_end) > self.layout.data_size() {
            return Err(SdsError::Overrun);
        }
        self.cursor().store(target, Ordering::Release);
        Ok(())
    }

    /// Reports the cursor relative to `reference`.
    ///
    /// Offsets relative to the reader itself are always 0.
    pub fn tell(&self, reference: Reference) -> Index {
        let cursor = self.cursor().load(Ordering::Acquire);
        match reference {
            Reference::Absolute => cursor,
            Reference::BeforeWriter => distance(
                cursor,
                self.layout
                    .header()
                    .write_start_cursor
                    .load(Ordering::Acquire),
            ),
            Reference::AfterReader | Reference::BeforeReader => 0,
        }
    }

    /// Ends this reader's view of the stream at the given position: once the
    /// cursor reaches it, reads return `Closed`.
    pub fn close_at(&mut self, offset: Index, reference: Reference) -> Result<()> {
        let target = self.resolve(offset, reference)?;
        self.close_index().store(target, Ordering::Release);
        Ok(())
    }
}

impl<T: StreamTraits> Drop for Reader<T> {
    fn drop(&mut self) {
        let layout = &*self.layout;
        {
            let _guard = layout.header().reader_enable_mutex.lock();
            layout.disable_reader_locked(self.id);
        }
        layout.update_oldest_unconsumed_cursor();
        debug!(id = self.id, "reader disabled");
    }
}

/// Byte reads of any length. A buffer shorter than one word is served from a
/// staged copy of the next word, handed out across calls.
impl<T: StreamTraits> io::Read for Reader<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let word_size = self.layout.word_size();
        if self.staged_at == self.staged.len() && buf.len() < word_size {
            let mut word = std::mem::take(&mut self.staged);
            word.resize(word_size, 0);
            let result = self.read_bytes(&mut word);
            self.staged = word;
            match result {
                Ok(_) => self.staged_at = 0,
                Err(e) => {
                    self.staged_at = self.staged.len();
                    return match e {
                        SdsError::Closed => Ok(0),
                        e => Err(e.into()),
                    };
                }
            }
        }

        if self.staged_at < self.staged.len() {
            let n = buf.len().min(self.staged.len() - self.staged_at);
            buf[..n].copy_from_slice(&self.staged[self.staged_at..self.staged_at + n]);
            self.staged_at += n;
            return Ok(n);
        }

        match self.read_bytes(buf) {
            Ok(n) => Ok(n),
            Err(SdsError::Closed) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{InProcessSds, ReaderPolicy, Reference, SdsError, WriterPolicy};
    use std::sync::atomic::Ordering;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn slots_are_exclusive_and_reusable() {
        let sds = InProcessSds::with_capacity(1, 8, 2).unwrap();
        let a = sds.create_reader(ReaderPolicy::Nonblocking).unwrap();
        let b = sds.create_reader(ReaderPolicy::Nonblocking).unwrap();
        assert_eq!((a.id(), b.id()), (0, 1));
        assert!(matches!(
            sds.create_reader(ReaderPolicy::Nonblocking),
            Err(SdsError::InvalidState(_))
        ));
        assert!(matches!(
            sds.create_reader_with_id(1, ReaderPolicy::Nonblocking),
            Err(SdsError::InvalidState(_))
        ));
        assert!(matches!(
            sds.create_reader_with_id(2, ReaderPolicy::Nonblocking),
            Err(SdsError::InvalidState(_))
        ));

        drop(a);
        let again = sds.create_reader_with_id(0, ReaderPolicy::Blocking).unwrap();
        assert_eq!(again.id(), 0);
    }

    #[test]
    fn read_needs_room_for_a_word() {
        let sds = InProcessSds::with_capacity(4, 8, 1).unwrap();
        let mut reader = sds.create_reader(ReaderPolicy::Nonblocking).unwrap();
        let mut small = [0u8; 3];
        assert!(matches!(
            reader.read(&mut small, Duration::ZERO),
            Err(SdsError::InvalidState(_))
        ));
    }

    #[test]
    fn drains_then_reports_closed() {
        let sds = InProcessSds::with_capacity(1, 8, 1).unwrap();
        let mut reader = sds.create_reader(ReaderPolicy::Blocking).unwrap();
        let mut writer = sds.create_writer(WriterPolicy::AllOrNothing).unwrap();
        writer.write(b"abc", Duration::ZERO).unwrap();
        writer.close();

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf, Duration::ZERO).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
        assert!(matches!(
            reader.read(&mut buf, Duration::ZERO),
            Err(SdsError::Closed)
        ));
    }

    #[test]
    fn reader_created_after_close_is_closed() {
        let sds = InProcessSds::with_capacity(1, 8, 1).unwrap();
        let mut writer = sds.create_writer(WriterPolicy::Nonblockable).unwrap();
        writer.write(b"xy", Duration::ZERO).unwrap();
        drop(writer);

        let mut reader = sds.create_reader(ReaderPolicy::Nonblocking).unwrap();
        let mut buf = [0u8; 2];
        assert!(matches!(
            reader.read(&mut buf, Duration::ZERO),
            Err(SdsError::Closed)
        ));
    }

    #[test]
    fn seeks_forward_freely_and_backward_within_window() {
        let sds = InProcessSds::with_capacity(1, 16, 2).unwrap();
        let _slow = sds.create_reader(ReaderPolicy::Nonblocking).unwrap();
        let mut reader = sds.create_reader(ReaderPolicy::Nonblocking).unwrap();
        let mut writer = sds.create_writer(WriterPolicy::AllOrNothing).unwrap();
        writer.write(b"0123456789", Duration::ZERO).unwrap();

        let mut buf = [0u8; 4];
        reader.seek(6, Reference::AfterReader).unwrap();
        assert_eq!(reader.tell(Reference::Absolute), 6);
        assert_eq!(reader.tell(Reference::BeforeWriter), 4);
        assert_eq!(reader.read(&mut buf, Duration::ZERO).unwrap(), 4);
        assert_eq!(&buf, b"6789");

        // The slow reader still pins index 0, so going back is allowed.
        reader.seek(8, Reference::BeforeReader).unwrap();
        assert_eq!(reader.read(&mut buf, Duration::ZERO).unwrap(), 4);
        assert_eq!(&buf, b"2345");

        reader.seek(2, Reference::BeforeWriter).unwrap();
        assert_eq!(reader.read(&mut buf, Duration::ZERO).unwrap(), 2);
        assert_eq!(&buf[..2], b"89");

        // Into the future.
        reader.seek(20, Reference::Absolute).unwrap();
        assert!(matches!(
            reader.read(&mut buf, Duration::ZERO),
            Err(SdsError::WouldBlock)
        ));
    }

    #[test]
    fn backward_seek_behind_barrier_is_overrun() {
        let sds = InProcessSds::with_capacity(1, 16, 1).unwrap();
        let mut reader = sds.create_reader(ReaderPolicy::Nonblocking).unwrap();
        let mut writer = sds.create_writer(WriterPolicy::AllOrNothing).unwrap();
        writer.write(b"abcdef", Duration::ZERO).unwrap();

        let mut buf = [0u8; 4];
        reader.read(&mut buf, Duration::ZERO).unwrap();
        assert!(matches!(
            reader.seek(0, Reference::Absolute),
            Err(SdsError::Overrun)
        ));
        assert_eq!(reader.tell(Reference::Absolute), 4);
    }

    #[test]
    fn close_at_ends_the_reader_early() {
        let sds = InProcessSds::with_capacity(1, 16, 1).unwrap();
        let mut reader = sds.create_reader(ReaderPolicy::Nonblocking).unwrap();
        let mut writer = sds.create_writer(WriterPolicy::AllOrNothing).unwrap();
        writer.write(b"abcdef", Duration::ZERO).unwrap();

        reader.close_at(3, Reference::AfterReader).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf, Duration::ZERO).unwrap(), 3);
        assert!(matches!(
            reader.read(&mut buf, Duration::ZERO),
            Err(SdsError::Closed)
        ));
        assert!(matches!(
            reader.seek(5, Reference::Absolute),
            Err(SdsError::InvalidState(_))
        ));
    }

    #[test]
    fn io_read_maps_closed_to_eof() {
        use std::io::Read;

        let sds = InProcessSds::with_capacity(1, 8, 1).unwrap();
        let mut reader = sds.create_reader(ReaderPolicy::Blocking).unwrap();
        let mut writer = sds.create_writer(WriterPolicy::Blocking).unwrap();
        writer.write(b"hi", Duration::ZERO).unwrap();
        drop(writer);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hi");
    }

    #[test]
    fn io_read_hands_out_wide_words_in_pieces() {
        use std::io::Read;

        let sds = InProcessSds::with_capacity(64, 4, 1).unwrap();
        let mut reader = sds.create_reader(ReaderPolicy::Blocking).unwrap();
        let mut writer = sds.create_writer(WriterPolicy::Blocking).unwrap();
        let words: Vec<u8> = (0..128u8).collect();
        writer.write(&words, Duration::ZERO).unwrap();
        drop(writer);

        let mut head = [0u8; 100];
        reader.read_exact(&mut head).unwrap();
        assert_eq!(&head[..], &words[..100]);

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, &words[100..]);
    }

    #[test]
    fn read_to_end_on_words_wider_than_std_first_read() {
        use std::io::Read;

        let sds = InProcessSds::with_capacity(64, 4, 1).unwrap();
        let mut reader = sds.create_reader(ReaderPolicy::Blocking).unwrap();
        let mut writer = sds.create_writer(WriterPolicy::Blocking).unwrap();
        writer.write(&[7u8; 64], Duration::ZERO).unwrap();
        drop(writer);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, vec![7u8; 64]);
    }

    #[test]
    fn caught_up_reader_releases_a_full_blocking_writer() {
        let sds = InProcessSds::with_capacity(1, 16, 1).unwrap();
        let mut writer = sds.create_writer(WriterPolicy::Blocking).unwrap();
        assert_eq!(writer.write(&[1u8; 16], Duration::ZERO).unwrap(), 16);

        // Joins live at 16 while the barrier still sits at 0.
        let mut reader = sds.create_reader(ReaderPolicy::Blocking).unwrap();
        let mut buf = [0u8; 4];
        assert!(matches!(
            reader.read(&mut buf, Duration::from_millis(10)),
            Err(SdsError::TimedOut)
        ));

        assert_eq!(
            writer.write(b"more", Duration::from_millis(200)).unwrap(),
            4
        );
        assert_eq!(reader.read(&mut buf, Duration::from_millis(200)).unwrap(), 4);
        assert_eq!(&buf, b"more");
    }

    #[test]
    fn nonblocking_reader_that_is_caught_up_releases_writer() {
        let sds = InProcessSds::with_capacity(1, 8, 1).unwrap();
        let mut writer = sds.create_writer(WriterPolicy::AllOrNothing).unwrap();
        writer.write(&[0u8; 8], Duration::ZERO).unwrap();

        let mut reader = sds.create_reader(ReaderPolicy::Nonblocking).unwrap();
        assert!(matches!(
            writer.write(b"x", Duration::ZERO),
            Err(SdsError::WouldBlock)
        ));
        let mut buf = [0u8; 1];
        assert!(matches!(
            reader.read(&mut buf, Duration::ZERO),
            Err(SdsError::WouldBlock)
        ));
        assert_eq!(writer.write(b"x", Duration::ZERO).unwrap(), 1);
    }

    #[test]
    fn backward_seek_into_lapped_data_is_overrun() {
        let sds = InProcessSds::with_capacity(1, 8, 2).unwrap();
        let mut lagging = sds.create_reader(ReaderPolicy::Nonblocking).unwrap();
        let mut reader = sds.create_reader(ReaderPolicy::Nonblocking).unwrap();
        let mut writer = sds.create_writer(WriterPolicy::Nonblockable).unwrap();

        writer.write(b"01234567", Duration::ZERO).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf, Duration::ZERO).unwrap(), 8);

        // Laps index 0..4 even though `lagging` never read them.
        writer.write(b"89ab", Duration::ZERO).unwrap();
        assert!(matches!(
            reader.seek(2, Reference::Absolute),
            Err(SdsError::Overrun)
        ));
        assert_eq!(reader.tell(Reference::Absolute), 8);

        reader.seek(5, Reference::Absolute).unwrap();
        let mut buf = [0u8; 7];
        assert_eq!(reader.read(&mut buf, Duration::ZERO).unwrap(), 7);
        assert_eq!(&buf, b"56789ab");

        assert!(matches!(
            lagging.read(&mut buf, Duration::ZERO),
            Err(SdsError::Overrun)
        ));
    }

    #[test]
    fn lapped_copy_advances_cursor_and_reports_overrun() {
        let sds = InProcessSds::with_capacity(1, 8, 1).unwrap();
        let mut reader = sds.create_reader(ReaderPolicy::Nonblocking).unwrap();
        let mut writer = sds.create_writer(WriterPolicy::Nonblockable).unwrap();
        writer.write(b"abcd", Duration::ZERO).unwrap();

        // A lossy writer claimed a full ring past the copy before it was
        // committed.
        let header = sds.layout().header();
        header.write_end_cursor.store(4 + 8, Ordering::Release);
        assert!(matches!(reader.finish_read(0, 4), Err(SdsError::Overrun)));
        assert_eq!(reader.tell(Reference::Absolute), 4);

        header.write_end_cursor.store(4, Ordering::Release);
        writer.write(b"ef", Duration::ZERO).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(reader.read(&mut buf, Duration::ZERO).unwrap(), 2);
        assert_eq!(&buf, b"ef");
    }

    #[test]
    fn dropping_a_reader_releases_a_blocked_writer() {
        let sds = InProcessSds::with_capacity(1, 4, 1).unwrap();
        let reader = sds.create_reader(ReaderPolicy::Blocking).unwrap();
        let mut writer = sds.create_writer(WriterPolicy::Blocking).unwrap();
        writer.write(b"full", Duration::ZERO).unwrap();

        let blocked = thread::spawn(move || writer.write(b"!", Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        drop(reader);

        assert_eq!(blocked.join().unwrap().unwrap(), 1);
    }
}
