//! Named views into the mapping of a device.
use std::sync::Arc;

use bytemuck::Pod;

use crate::error::{ChunkError, FlushError};
use crate::view::View;
use crate::Device;

/// A named range `[offset, offset + size)` of a [`Device`].
///
/// The chunk never stores an address. Each access resolves it through the device, so that a
/// chunk outliving the close of its device fails with [`ChunkError::DeviceClosed`] instead of
/// touching unmapped memory.
///
/// Chunks may overlap, or alias the same range entirely. Writes through one are immediately
/// visible through all others, there is no synchronization beyond that of the CPU.
pub struct Chunk {
    name: String,
    device: Arc<Device>,
    offset: usize,
    len: usize,
}

impl Chunk {
    /// Create a chunk over `device`.
    ///
    /// A `size` of `0` selects everything from `offset` to the end of the device.
    pub fn new(
        name: impl Into<String>,
        device: Option<Arc<Device>>,
        offset: usize,
        size: usize,
    ) -> Result<Self, ChunkError> {
        let name = name.into();
        let Some(device) = device else {
            return Err(ChunkError::NullDevice { name });
        };

        if !device.is_open() {
            return Err(ChunkError::DeviceClosed { name });
        }

        let dev_size = device.size();
        let len = if size == 0 {
            dev_size.saturating_sub(offset)
        } else {
            size
        };

        if len == 0 || !offset.checked_add(len).is_some_and(|end| end <= dev_size) {
            return Err(ChunkError::OutOfBounds {
                name,
                offset,
                len,
                size: dev_size,
            });
        }

        Ok(Chunk {
            name,
            device,
            offset,
            len,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The offset of this chunk in its device.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.len
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn is_pmem(&self) -> bool {
        self.device.is_pmem(false)
    }

    /// The first byte of the chunk, null if the device was closed.
    ///
    /// Valid for `size()` bytes for as long as the device stays open.
    pub fn as_ptr(&self) -> *mut u8 {
        self.device
            .access(|base, _| unsafe { base.as_ptr().add(self.offset) })
            .unwrap_or(core::ptr::null_mut())
    }

    /// The raw bytes of this chunk.
    ///
    /// # Safety
    ///
    /// The caller must keep the device open while the slice is in use, and must not create
    /// overlapping references through this or any aliasing chunk while it is alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn bytes_mut(&self) -> Result<&mut [u8], ChunkError> {
        let ptr = self.as_ptr();
        if ptr.is_null() {
            return Err(self.closed());
        }

        Ok(core::slice::from_raw_parts_mut(ptr, self.len))
    }

    /// Copy bytes out of the chunk, starting at `offset`.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<(), ChunkError> {
        let start = self.span(offset, buf.len())?;
        self.device
            .access(|base, _| unsafe {
                core::ptr::copy(base.as_ptr().add(start), buf.as_mut_ptr(), buf.len())
            })
            .ok_or_else(|| self.closed())
    }

    /// Copy bytes into the chunk, starting at `offset`.
    ///
    /// This does not persist them, see [`Chunk::flush`].
    pub fn write_at(&self, offset: usize, data: &[u8]) -> Result<(), ChunkError> {
        let start = self.span(offset, data.len())?;
        self.device
            .access(|base, _| unsafe {
                core::ptr::copy(data.as_ptr(), base.as_ptr().add(start), data.len())
            })
            .ok_or_else(|| self.closed())
    }

    /// Persist the whole chunk.
    pub fn flush(&self) -> Result<(), FlushError> {
        self.device.flush_range(self.offset, self.len)
    }

    /// Persist `len` bytes from `offset` within the chunk, or up to its end if `len` is `0`.
    pub fn flush_range(&self, offset: usize, len: usize) -> Result<(), FlushError> {
        let len = if len == 0 {
            self.len.saturating_sub(offset)
        } else {
            len
        };

        match self.span(offset, len) {
            Ok(start) if len > 0 => self.device.flush_range(start, len),
            _ => Err(FlushError::OutOfBounds {
                name: self.name.clone(),
                offset,
                len,
                size: self.len,
            }),
        }
    }

    /// Overlay the chunk with a sequence of records.
    pub fn view<T: Pod>(&self) -> View<'_, T> {
        View::new(self)
    }

    /// Check a range relative to the chunk, returning its start relative to the device.
    fn span(&self, offset: usize, len: usize) -> Result<usize, ChunkError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(self.offset + offset),
            _ => Err(ChunkError::OutOfBounds {
                name: self.name.clone(),
                offset,
                len,
                size: self.len,
            }),
        }
    }

    fn closed(&self) -> ChunkError {
        ChunkError::DeviceClosed {
            name: self.name.clone(),
        }
    }
}

impl core::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Chunk")
            .field("name", &self.name)
            .field("device", &self.device.name())
            .field("offset", &self.offset)
            .field("size", &self.len)
            .finish()
    }
}
