use crate::error::Result;
use crate::in_process::{HeapBuffer, InProcessTraits};
use crate::layout::BufferLayout;
use crate::policy::{ReaderPolicy, WriterPolicy};
use crate::reader::Reader;
use crate::ring::Index;
use crate::traits::StreamTraits;
use crate::writer::Writer;
use std::sync::Arc;

/// A handle on a formatted stream buffer that mints readers and writers.
///
/// Handles are cheap to clone. Every clone, reader and writer keeps the same
/// attached view alive; the view detaches when the last of them is dropped.
/// Other processes get their own view through [`open`](Self::open).
pub struct SharedDataStream<T: StreamTraits> {
    layout: Arc<BufferLayout<T>>,
}

impl<T: StreamTraits> Clone for SharedDataStream<T> {
    fn clone(&self) -> Self {
        Self {
            layout: Arc::clone(&self.layout),
        }
    }
}

impl<T: StreamTraits> SharedDataStream<T> {
    /// Bytes a buffer needs for `data_words` words of `word_size` bytes.
    pub fn calculate_buffer_size(
        data_words: usize,
        word_size: usize,
        max_readers: usize,
    ) -> Result<usize> {
        BufferLayout::<T>::calculate_buffer_size(data_words, word_size, max_readers)
    }

    /// Formats `buffer` as a new stream.
    ///
    /// The ring takes whatever the buffer has left after the header and the
    /// reader arrays.
    pub fn create(buffer: Arc<T::Buffer>, word_size: usize, max_readers: usize) -> Result<Self> {
        Ok(Self {
            layout: Arc::new(BufferLayout::init(buffer, word_size, max_readers)?),
        })
    }

    /// Attaches to a buffer another handle (or process) already formatted.
    pub fn open(buffer: Arc<T::Buffer>) -> Result<Self> {
        Ok(Self {
            layout: Arc::new(BufferLayout::attach(buffer)?),
        })
    }

    pub fn create_writer(&self, policy: WriterPolicy) -> Result<Writer<T>> {
        Writer::create(Arc::clone(&self.layout), policy)
    }

    /// Creates a reader in the first free slot.
    pub fn create_reader(&self, policy: ReaderPolicy) -> Result<Reader<T>> {
        Reader::create(Arc::clone(&self.layout), None, policy)
    }

    pub fn create_reader_with_id(&self, id: usize, policy: ReaderPolicy) -> Result<Reader<T>> {
        Reader::create(Arc::clone(&self.layout), Some(id), policy)
    }

    pub fn word_size(&self) -> usize {
        self.layout.word_size()
    }

    pub fn max_readers(&self) -> usize {
        self.layout.max_readers()
    }

    /// Ring capacity in words.
    pub fn data_size(&self) -> Index {
        self.layout.data_size()
    }

    /// Number of attached views across every handle and process.
    pub fn reference_count(&self) -> u32 {
        self.layout.reference_count()
    }

    pub fn layout(&self) -> &BufferLayout<T> {
        &self.layout
    }
}

/// A stream shared between threads of one process.
pub type InProcessSds = SharedDataStream<InProcessTraits>;

impl InProcessSds {
    /// Allocates a heap buffer with room for exactly `data_words` words and
    /// formats it.
    pub fn with_capacity(word_size: usize, data_words: usize, max_readers: usize) -> Result<Self> {
        let size = Self::calculate_buffer_size(data_words, word_size, max_readers)?;
        Self::create(Arc::new(HeapBuffer::new(size)?), word_size, max_readers)
    }
}

#[cfg(target_os = "linux")]
mod shm {
    use super::SharedDataStream;
    use crate::error::Result;
    use crate::shared_memory::{MmapBuffer, SharedMemoryTraits};
    use std::path::Path;
    use std::sync::Arc;

    /// A stream shared between processes through a mapped file.
    pub type ShmSds = SharedDataStream<SharedMemoryTraits>;

    impl ShmSds {
        /// Creates (or truncates) the file at `path` and formats a stream of
        /// `data_words` words in it.
        pub fn create_file<P: AsRef<Path>>(
            path: P,
            word_size: usize,
            data_words: usize,
            max_readers: usize,
        ) -> Result<Self> {
            let size = Self::calculate_buffer_size(data_words, word_size, max_readers)?;
            let buffer = MmapBuffer::create(path, size)?;
            Self::create(Arc::new(buffer), word_size, max_readers)
        }

        /// Maps the file at `path` and attaches to the stream in it.
        pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
            Self::open(Arc::new(MmapBuffer::open(path)?))
        }
    }
}

#[cfg(target_os = "linux")]
pub use shm::ShmSds;
