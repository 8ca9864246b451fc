use core::marker::PhantomData;
use core::mem::size_of;

use bytemuck::Pod;

use crate::error::{ChunkError, FlushError};
use crate::Chunk;

/// A chunk, seen as a sequence of `T` records.
///
/// The number of records is rounded down, trailing bytes that do not fit a whole record are not
/// part of the view. Records need not be aligned: `get` and `set` copy them unaligned.
pub struct View<'lt, T> {
    chunk: &'lt Chunk,
    len: usize,
    _record: PhantomData<T>,
}

impl<'lt, T: Pod> View<'lt, T> {
    pub(crate) fn new(chunk: &'lt Chunk) -> Self {
        let len = chunk.size().checked_div(size_of::<T>()).unwrap_or(0);
        View {
            chunk,
            len,
            _record: PhantomData,
        }
    }

    pub fn chunk(&self) -> &'lt Chunk {
        self.chunk
    }

    /// The number of whole records.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> Result<T, ChunkError> {
        let offset = self.offset_of(index)?;
        let mut record = T::zeroed();
        self.chunk.read_at(offset, bytemuck::bytes_of_mut(&mut record))?;
        Ok(record)
    }

    pub fn set(&self, index: usize, record: T) -> Result<(), ChunkError> {
        let offset = self.offset_of(index)?;
        self.chunk.write_at(offset, bytemuck::bytes_of(&record))
    }

    /// The first record, null if the device was closed.
    pub fn as_ptr(&self) -> *mut T {
        self.chunk.as_ptr().cast()
    }

    /// Reference the record at `index` in place.
    ///
    /// # Safety
    ///
    /// There is no bounds check. The caller must ensure `index < len()`, that the record is
    /// suitably aligned for `T`, that the device stays open for the lifetime of the reference, and
    /// that no other reference to the same bytes exists meanwhile, through this or any aliasing
    /// chunk.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn index_unchecked(&self, index: usize) -> &'lt mut T {
        &mut *self.as_ptr().add(index)
    }

    /// Persist exactly the record at `index`.
    pub fn flush_index(&self, index: usize) -> Result<(), FlushError> {
        match self.offset_of(index) {
            Ok(offset) => self.chunk.flush_range(offset, size_of::<T>()),
            Err(_) => Err(self.out_of_bounds(index)),
        }
    }

    /// Persist exactly the given record, which must lie within this view.
    pub fn flush_record(&self, record: &T) -> Result<(), FlushError> {
        let base = self.chunk.as_ptr() as usize;
        let addr = record as *const T as usize;

        let index = addr
            .checked_sub(base)
            .filter(|offset| offset % size_of::<T>().max(1) == 0)
            .map(|offset| offset / size_of::<T>().max(1));

        match index {
            Some(index) if !self.chunk.as_ptr().is_null() && index < self.len => {
                self.flush_index(index)
            }
            _ => Err(FlushError::OutOfBounds {
                name: self.chunk.name().to_owned(),
                offset: addr.wrapping_sub(base),
                len: size_of::<T>(),
                size: self.chunk.size(),
            }),
        }
    }

    fn offset_of(&self, index: usize) -> Result<usize, ChunkError> {
        if index < self.len {
            Ok(index * size_of::<T>())
        } else {
            Err(ChunkError::OutOfBounds {
                name: self.chunk.name().to_owned(),
                offset: index.saturating_mul(size_of::<T>()),
                len: size_of::<T>(),
                size: self.chunk.size(),
            })
        }
    }

    fn out_of_bounds(&self, index: usize) -> FlushError {
        FlushError::OutOfBounds {
            name: self.chunk.name().to_owned(),
            offset: index.saturating_mul(size_of::<T>()),
            len: size_of::<T>(),
            size: self.chunk.size(),
        }
    }
}

impl<T> Clone for View<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for View<'_, T> {}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nv_map::Backend;

    use crate::{Chunk, Device, FlushError};

    fn memory_chunk(offset: usize, size: usize) -> Chunk {
        let device = Device::open(&Backend::default(), "", 0x1000).unwrap();
        Chunk::new("view", Some(Arc::new(device)), offset, size).unwrap()
    }

    #[test]
    fn record_count_rounds_down() {
        let chunk = memory_chunk(0, 10);
        assert_eq!(chunk.view::<u32>().len(), 2);
        assert_eq!(chunk.view::<u8>().len(), 10);
        assert!(chunk.view::<[u8; 11]>().is_empty());
    }

    #[test]
    fn unaligned_records() {
        let chunk = memory_chunk(1, 0);
        let view = chunk.view::<u64>();
        view.set(3, 0x0102_0304_0506_0708).unwrap();
        assert_eq!(view.get(3).unwrap(), 0x0102_0304_0506_0708);

        let mut raw = [0; 8];
        chunk.read_at(24, &mut raw).unwrap();
        assert_eq!(u64::from_ne_bytes(raw), 0x0102_0304_0506_0708);
    }

    #[test]
    fn out_of_range_index() {
        let chunk = memory_chunk(0, 16);
        let view = chunk.view::<u32>();
        assert!(view.get(4).is_err());
        assert!(view.set(4, 1).is_err());
        assert!(matches!(view.flush_index(4), Err(FlushError::OutOfBounds { .. })));
    }

    #[test]
    fn flush_foreign_record() {
        let chunk = memory_chunk(0, 16);
        let view = chunk.view::<u32>();
        let elsewhere = 0u32;
        assert!(matches!(
            view.flush_record(&elsewhere),
            Err(FlushError::OutOfBounds { .. })
        ));

        let record = unsafe { view.index_unchecked(1) };
        // In range, but anonymous memory can not be persisted.
        assert!(matches!(view.flush_record(record), Err(FlushError::Volatile { .. })));
    }
}
