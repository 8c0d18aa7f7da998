use memmap2::MmapMut;
use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

/// A read-write, file-backed shared mapping.
///
/// Every process that maps the same file sees the same bytes, which is what
/// lets a stream header and its ring live in memory owned by nobody in
/// particular. The file itself is never removed here; callers own its lifetime.
pub struct MmapRegion {
    _file: File,
    mmap: MmapMut,
    base: *mut u8,
    path: PathBuf,
}

// SAFETY: `base` points into `mmap`, which lives as long as the region. The
// bytes are shared memory; synchronization is the caller's protocol.
unsafe impl Send for MmapRegion {}
unsafe impl Sync for MmapRegion {}

impl MmapRegion {
    /// Create (or truncate) a file of `size_bytes` and map it read-write.
    ///
    /// The new region is zero-filled, so a freshly created file never carries a
    /// valid stream header until someone formats it.
    pub fn create<P: AsRef<Path>>(path: P, size_bytes: usize) -> io::Result<Self> {
        if size_bytes == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot map an empty region",
            ));
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(size_bytes as u64)?;

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let base = mmap.as_mut_ptr();
        tracing::debug!(path = %path.as_ref().display(), size_bytes, "created shared mapping");

        Ok(Self {
            _file: file,
            mmap,
            base,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Open an existing file and map all of it read-write.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        if file.metadata()?.len() == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "shared mapping file is empty",
            ));
        }

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let base = mmap.as_mut_ptr();
        tracing::debug!(path = %path.as_ref().display(), size_bytes = mmap.len(), "opened shared mapping");

        Ok(Self {
            _file: file,
            mmap,
            base,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Raw pointer to the first byte of the mapping.
    ///
    /// The pointer stays valid for as long as `self` is alive. Mutation through
    /// it is shared with every other mapping of the same file.
    #[inline]
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.base
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush dirty pages back to the file.
    pub fn flush(&self) -> io::Result<()> {
        self.mmap.flush()
    }
}
