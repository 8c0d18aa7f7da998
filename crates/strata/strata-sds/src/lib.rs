//! Shared data stream: a ring of fixed-size words with exactly one writer and
//! up to `max_readers` independent readers.
//!
//! The header, per-reader bookkeeping and data ring all live inside a single
//! buffer, so the same stream can be shared by threads
//! ([`InProcessSds`]) or by processes mapping the same file (`ShmSds`, linux).
//! The data path is lock-free; small mutexes in the header guard structural
//! changes such as enabling a reader or seeking backwards.
//!
//! ```
//! use std::time::Duration;
//! use strata_sds::{InProcessSds, ReaderPolicy, WriterPolicy};
//!
//! let sds = InProcessSds::with_capacity(1, 16, 2).unwrap();
//! let mut reader = sds.create_reader(ReaderPolicy::Nonblocking).unwrap();
//! let mut writer = sds.create_writer(WriterPolicy::AllOrNothing).unwrap();
//!
//! writer.write(b"HELLO", Duration::ZERO).unwrap();
//! let mut buf = [0u8; 5];
//! assert_eq!(reader.read(&mut buf, Duration::ZERO).unwrap(), 5);
//! assert_eq!(&buf, b"HELLO");
//! ```

mod error;
mod in_process;
pub mod layout;
mod policy;
mod reader;
pub mod ring;
#[cfg(target_os = "linux")]
mod shared_memory;
mod stream;
pub mod traits;
mod wait;
mod writer;

pub use error::{Result, SdsError};
pub use in_process::{HeapBuffer, InProcessTraits};
pub use policy::{ReaderPolicy, Reference, WriterPolicy};
pub use reader::Reader;
pub use ring::Index;
#[cfg(target_os = "linux")]
pub use shared_memory::{MmapBuffer, PthreadCondvar, PthreadMutex, SharedMemoryTraits};
#[cfg(target_os = "linux")]
pub use stream::ShmSds;
pub use stream::{InProcessSds, SharedDataStream};
pub use traits::StreamTraits;
pub use writer::Writer;
