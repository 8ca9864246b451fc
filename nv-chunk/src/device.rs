//! Owns one mapping, of a file or of anonymous memory.
use core::ptr::NonNull;
use std::path::{Path, PathBuf};

use nv_map::{Backend, MapError, Mapped};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{DeviceError, FlushError, UnmapError};

/// A mapped backing resource and the classification of its medium.
///
/// The mapping is valid for exactly `[0, size)` until the device is closed, it is never moved or
/// resized. Closing invalidates it for every [`Chunk`](crate::Chunk) still referring to the
/// device; they observe a closed device instead of a dangling address.
pub struct Device {
    name: String,
    backing: Backing,
    is_pmem: bool,
    region: RwLock<Region>,
    backend: Backend,
}

/// What the mapping of a [`Device`] is backed by.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Backing {
    /// A regular file, possibly on a DAX file system. Character devices report no size and are
    /// rejected as [`DeviceError::ZeroSizeOnCreate`].
    File { path: PathBuf },
    /// Private anonymous memory, simulating a device. Never persistent.
    Memory,
}

#[derive(Clone, Copy)]
struct Region {
    base: Option<NonNull<u8>>,
    len: usize,
}

// Safety: only address bookkeeping. Any access to the memory it describes is done while holding
// the lock of the owning `Device`, or is `unsafe` and left to the caller.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Device {
    /// Open a file backed device at `path`, or a memory backed one if `path` is empty.
    ///
    /// A missing file is created with `size` bytes. An existing file is mapped whole, at its own
    /// size, and the `size` argument is ignored.
    pub fn open(backend: &Backend, path: &str, size: usize) -> Result<Self, DeviceError> {
        if path.is_empty() {
            Self::open_memory(backend, size)
        } else {
            Self::open_file(backend, Path::new(path), size)
        }
    }

    pub fn open_file(backend: &Backend, path: &Path, size: usize) -> Result<Self, DeviceError> {
        let name = path.to_string_lossy().into_owned();

        let mapped = match backend.map_file(path, size, true) {
            Ok(mapped) => mapped,
            Err(MapError::ZeroSize) => return Err(DeviceError::ZeroSizeOnCreate { name }),
            Err(source) => return Err(DeviceError::MappingFailure { name, source }),
        };

        // An existing resource determines its own size.
        let expected = if mapped.created { size } else { mapped.len };

        let backing = Backing::File {
            path: path.to_owned(),
        };

        // Dropping the device on the error path releases the mapping again.
        let device = Device::from_mapped(name, backing, backend, mapped);
        if device.size() != expected {
            return Err(DeviceError::PartialMapping {
                name: device.name.clone(),
                expected,
                mapped: device.size(),
            });
        }

        Ok(device)
    }

    /// Map `size` bytes of anonymous memory under a fresh, unique name.
    pub fn open_memory(backend: &Backend, size: usize) -> Result<Self, DeviceError> {
        let name = Uuid::new_v4().hyphenated().to_string();

        if size == 0 {
            return Err(DeviceError::ZeroSizeOnCreate { name });
        }

        let mapped = backend
            .map_anonymous(size)
            .map_err(|source| DeviceError::MappingFailure {
                name: name.clone(),
                source,
            })?;

        let device = Device::from_mapped(name, Backing::Memory, backend, mapped);
        if device.size() != size {
            return Err(DeviceError::PartialMapping {
                name: device.name.clone(),
                expected: size,
                mapped: device.size(),
            });
        }

        Ok(device)
    }

    fn from_mapped(name: String, backing: Backing, backend: &Backend, mapped: Mapped) -> Self {
        let is_pmem = mapped.is_pmem && matches!(backing, Backing::File { .. });

        tracing::debug!(%name, len = mapped.len, is_pmem, "opened device");
        Device {
            name,
            backing,
            is_pmem,
            region: RwLock::new(Region {
                base: Some(mapped.ptr),
                len: mapped.len,
            }),
            backend: backend.clone(),
        }
    }

    /// The path of a file backed device, or the generated unique id of a memory backed one.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    /// The mapped size, `0` once closed.
    pub fn size(&self) -> usize {
        self.region.read().len
    }

    /// The first mapped byte, null once closed.
    pub fn as_ptr(&self) -> *mut u8 {
        self.region
            .read()
            .base
            .map_or(core::ptr::null_mut(), NonNull::as_ptr)
    }

    pub fn is_open(&self) -> bool {
        self.region.read().base.is_some()
    }

    /// Whether the medium is byte-addressable persistent memory.
    ///
    /// This is determined when mapping. With `retest`, ask the backend anew instead.
    pub fn is_pmem(&self, retest: bool) -> bool {
        if !retest {
            return self.is_pmem;
        }

        if let Backing::Memory = self.backing {
            return false;
        }

        self.access(|base, len| self.backend.probe_is_persistent(base.as_ptr(), len))
            .unwrap_or(false)
    }

    /// Persist the whole device.
    pub fn flush(&self) -> Result<(), FlushError> {
        self.flush_range(0, 0)
    }

    /// Persist `len` bytes from `offset`, or up to the end if `len` is `0`.
    ///
    /// A memory backed device always fails with [`FlushError::Volatile`]: what was written to it
    /// does not survive the process, and a caller relying on it should know.
    pub fn flush_range(&self, offset: usize, len: usize) -> Result<(), FlushError> {
        if let Backing::Memory = self.backing {
            return Err(FlushError::Volatile {
                name: self.name.clone(),
            });
        }

        let region = self.region.read();
        let Some(base) = region.base else {
            return Err(FlushError::DeviceClosed {
                name: self.name.clone(),
            });
        };

        let len = if len == 0 {
            region.len.saturating_sub(offset)
        } else {
            len
        };

        if !offset.checked_add(len).is_some_and(|end| end <= region.len) {
            return Err(FlushError::OutOfBounds {
                name: self.name.clone(),
                offset,
                len,
                size: region.len,
            });
        }

        // Safety: in-bounds of the live mapping, checked above.
        let ptr = unsafe { base.as_ptr().add(offset) };
        self.backend
            .flush_range(ptr, len, self.is_pmem)
            .map_err(|err| FlushError::Sync {
                name: self.name.clone(),
                source: err.into(),
            })
    }

    /// Unmap the device.
    ///
    /// Closing a closed device does nothing. When the unmap call fails the device is nonetheless
    /// marked closed, so that a retry never unmaps twice, but the memory may remain mapped.
    pub fn close(&self) -> Result<(), UnmapError> {
        let mut region = self.region.write();
        let Some(base) = region.base.take() else {
            return Ok(());
        };

        let len = core::mem::take(&mut region.len);
        self.backend
            .unmap(base, len)
            .map_err(|source| UnmapError {
                name: self.name.clone(),
                source,
            })?;

        tracing::debug!(name = %self.name, "closed device");
        Ok(())
    }

    /// Run `f` on the live mapping, keeping it mapped meanwhile. `None` if closed.
    pub(crate) fn access<R>(&self, f: impl FnOnce(NonNull<u8>, usize) -> R) -> Option<R> {
        let region = self.region.read();
        region.base.map(|base| f(base, region.len))
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "mapping of dropped device may be leaked");
        }
    }
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("backing", &self.backing)
            .field("size", &self.size())
            .field("is_pmem", &self.is_pmem)
            .finish()
    }
}
