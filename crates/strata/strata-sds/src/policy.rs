use std::fmt;

/// How a [`Reader`](crate::Reader) behaves when no data is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReaderPolicy {
    /// Return `WouldBlock` immediately.
    Nonblocking,
    /// Wait for the writer to publish data, close, or for the timeout.
    Blocking,
}

/// How a [`Writer`](crate::Writer) behaves when readers have not consumed
/// enough of the ring to make room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriterPolicy {
    /// Never wait. Unread data is overwritten and slow readers see `Overrun`.
    Nonblockable,
    /// Write everything or nothing; `WouldBlock` when the ring lacks room.
    AllOrNothing,
    /// Wait for room, then write as much as fits.
    Blocking,
}

/// The origin a reader offset is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reference {
    /// `cursor + offset`.
    AfterReader,
    /// `cursor - offset`.
    BeforeReader,
    /// `write_start - offset`.
    BeforeWriter,
    /// `offset` itself.
    Absolute,
}

impl fmt::Display for ReaderPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReaderPolicy::Nonblocking => "NONBLOCKING",
            ReaderPolicy::Blocking => "BLOCKING",
        })
    }
}

impl fmt::Display for WriterPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WriterPolicy::Nonblockable => "NONBLOCKABLE",
            WriterPolicy::AllOrNothing => "ALL_OR_NOTHING",
            WriterPolicy::Blocking => "BLOCKING",
        })
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Reference::AfterReader => "AFTER_READER",
            Reference::BeforeReader => "BEFORE_READER",
            Reference::BeforeWriter => "BEFORE_WRITER",
            Reference::Absolute => "ABSOLUTE",
        })
    }
}
