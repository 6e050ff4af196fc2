//! Byte sources: the cached "file-like" handles every layer reads from.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use parking_lot::RwLock;

use layerfs_types::PathSpec;

use super::cache::CacheHandle;
use super::ops::Resource;
use super::{VfsError, VfsResult};

/// Positional, read-only byte access.
pub trait ByteSource: Resource {
    fn size(&self) -> VfsResult<u64>;

    /// Read up to `buf.len()` bytes at `offset`. Returns 0 at or past the end.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> VfsResult<usize>;

    /// Fill `buf` completely or fail.
    fn read_exact_at(&self, mut offset: u64, mut buf: &mut [u8]) -> VfsResult<()> {
        while !buf.is_empty() {
            let n = self.read_at(offset, buf)?;
            if n == 0 {
                return Err(VfsError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("short read at offset {offset}"),
                )));
            }
            offset += n as u64;
            buf = &mut buf[n..];
        }
        Ok(())
    }
}

/// Scoped reference to a cached byte source.
pub type SourceHandle = CacheHandle<dyn ByteSource>;

/// A data stream opened straight from a file system. Closed on drop.
struct Stream {
    path_spec: PathSpec,
    source: Arc<dyn ByteSource>,
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.source.close();
    }
}

enum Backing {
    Cached(SourceHandle),
    Stream(Stream),
}

/// `Read + Seek` cursor over a byte source.
///
/// Holds its source open for as long as it lives: a cache reference for
/// sources opened through the resolver, or sole ownership of a stream
/// opened from a file entry.
pub struct FileObject {
    backing: Backing,
    position: u64,
}

impl FileObject {
    pub fn new(source: SourceHandle) -> Self {
        Self {
            backing: Backing::Cached(source),
            position: 0,
        }
    }

    /// Wrap a stream that no cache tracks.
    pub fn from_stream(path_spec: PathSpec, source: Arc<dyn ByteSource>) -> Self {
        Self {
            backing: Backing::Stream(Stream { path_spec, source }),
            position: 0,
        }
    }

    fn source(&self) -> &dyn ByteSource {
        match &self.backing {
            Backing::Cached(handle) => &**handle,
            Backing::Stream(stream) => &*stream.source,
        }
    }

    pub fn path_spec(&self) -> &PathSpec {
        match &self.backing {
            Backing::Cached(handle) => handle.key(),
            Backing::Stream(stream) => &stream.path_spec,
        }
    }

    pub fn size(&self) -> VfsResult<u64> {
        self.source().size()
    }

    /// Read the whole source from the start.
    pub fn read_to_vec(&self) -> VfsResult<Vec<u8>> {
        let size = usize::try_from(self.source().size()?)
            .map_err(|_| VfsError::unsupported("source larger than address space"))?;
        let mut buf = vec![0u8; size];
        self.source().read_exact_at(0, &mut buf)?;
        Ok(buf)
    }
}

impl fmt::Debug for FileObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileObject")
            .field("path_spec", self.path_spec())
            .field("position", &self.position)
            .finish()
    }
}

impl Read for FileObject {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.source().read_at(self.position, buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for FileObject {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => self.source().size()?.checked_add_signed(delta),
        };
        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of source",
            )),
        }
    }
}

/// A layer's reference to the source beneath it.
///
/// Closing the layer releases the parent; reads after that fail instead of
/// touching a resource that may already be gone.
pub struct ParentSource {
    handle: RwLock<Option<SourceHandle>>,
}

impl ParentSource {
    pub fn new(handle: SourceHandle) -> Self {
        Self {
            handle: RwLock::new(Some(handle)),
        }
    }

    /// Another reference to the parent, for sources handed out by the layer.
    pub fn handle(&self) -> VfsResult<SourceHandle> {
        self.handle.read().clone().ok_or_else(closed)
    }

    pub fn size(&self) -> VfsResult<u64> {
        self.handle.read().as_ref().ok_or_else(closed)?.size()
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> VfsResult<usize> {
        self.handle.read().as_ref().ok_or_else(closed)?.read_at(offset, buf)
    }

    pub fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> VfsResult<()> {
        self.handle
            .read()
            .as_ref()
            .ok_or_else(closed)?
            .read_exact_at(offset, buf)
    }

    /// Release the parent. Idempotent.
    pub fn close(&self) {
        let parent = self.handle.write().take();
        drop(parent);
    }
}

fn closed() -> VfsError {
    VfsError::Io(io::Error::other("parent layer is closed"))
}

/// A window `[offset, offset + size)` of a parent source.
///
/// Used by drivers whose members are stored contiguously (archive members,
/// partitions, explicit byte ranges).
pub struct RangeSource {
    parent: ParentSource,
    offset: u64,
    size: u64,
}

impl RangeSource {
    pub fn new(parent: SourceHandle, offset: u64, size: u64) -> Self {
        Self {
            parent: ParentSource::new(parent),
            offset,
            size,
        }
    }
}

impl Resource for RangeSource {
    fn close(&self) {
        self.parent.close();
    }
}

impl ByteSource for RangeSource {
    fn size(&self) -> VfsResult<u64> {
        Ok(self.size)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> VfsResult<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        let available = (self.size - offset).min(buf.len() as u64) as usize;
        self.parent.read_at(self.offset + offset, &mut buf[..available])
    }
}

/// Fixed in-memory bytes.
pub struct BytesSource {
    data: std::sync::Arc<[u8]>,
}

impl BytesSource {
    pub fn new(data: impl Into<std::sync::Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }
}

impl Resource for BytesSource {}

impl ByteSource for BytesSource {
    fn size(&self) -> VfsResult<u64> {
        Ok(self.data.len() as u64)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> VfsResult<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }
}
