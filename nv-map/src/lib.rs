//! Map named storage into the address space, and make writes to it durable.
//!
//! A [`Backend`] maps either a file, created on demand, or an anonymous private region. File
//! mappings are classified once, when they are established: if the kernel grants a mapping with
//! synchronous page faults the file lives on a DAX medium and ordinary stores followed by a cache
//! line write-back are durable. Every other mapping must be written back with `msync`.
//!
//! ## nv-map is not a database
//!
//! There is no ordering between the write-back of separate ranges, no atomicity beyond what the
//! CPU provides for a single store, and nothing to recover from a torn write. The file _is_ the
//! address space, byte for byte, and a flush only guarantees that the range reached the medium
//! when it returns.
mod error;
mod options;
mod vtable;

#[cfg(test)]
mod tests;

pub use error::{MapError, OsError};
pub use options::Options;
pub use vtable::VTable;

use core::ffi::c_void;
use core::ptr::NonNull;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

/// Handle to the mapping primitives, cheap to clone.
#[derive(Clone)]
pub struct Backend {
    inner: Arc<Inner>,
}

struct Inner {
    vtable: VTable,
    options: Options,
    /// The `(start, len)` of every live mapping the kernel granted with synchronous faults.
    persistent: Mutex<Vec<(usize, usize)>>,
}

/// A live mapping returned by the [`Backend`].
///
/// This does not unmap on drop, the owner must pass it back to [`Backend::unmap`].
#[derive(Debug)]
pub struct Mapped {
    pub ptr: NonNull<u8>,
    pub len: usize,
    /// Whether the medium is byte-addressable persistent memory.
    pub is_pmem: bool,
    /// Whether this call created the backing resource, rather than finding it.
    pub created: bool,
}

impl Backend {
    /// Create a `Backend` from a customized vtable.
    ///
    /// # Safety
    ///
    /// The VTable must contain a correct set of functions that implement the `mmap` interface.
    pub unsafe fn new_unchecked(vtable: VTable, options: Options) -> Self {
        Backend {
            inner: Arc::new(Inner {
                vtable,
                options,
                persistent: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A backend on `libc`, configured from the environment.
    #[cfg(feature = "libc")]
    pub fn new() -> Self {
        Self::with_options(Options::from_env())
    }

    #[cfg(feature = "libc")]
    pub fn with_options(options: Options) -> Self {
        unsafe { Self::new_unchecked(VTable::new_libc(), options) }
    }

    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    /// Map `path`, or an anonymous region if it is empty.
    ///
    /// A missing file is created with `size_hint` bytes if `create` is set. An existing file is
    /// mapped at its actual size and `size_hint` is ignored.
    pub fn map(&self, path: &str, size_hint: usize, create: bool) -> Result<Mapped, MapError> {
        if path.is_empty() {
            self.map_anonymous(size_hint)
        } else {
            self.map_file(Path::new(path), size_hint, create)
        }
    }

    pub fn map_file(&self, path: &Path, size_hint: usize, create: bool) -> Result<Mapped, MapError> {
        let mut options = OpenOptions::new();
        options.read(true).write(true).mode(0o666);

        let (file, created) = match options.open(path) {
            Ok(file) => (file, false),
            Err(err) if create && err.kind() == std::io::ErrorKind::NotFound => {
                if size_hint == 0 {
                    return Err(MapError::ZeroSize);
                }

                match options.clone().create_new(true).open(path) {
                    Ok(file) => {
                        if let Err(err) = file.set_len(size_hint as u64) {
                            let _ = std::fs::remove_file(path);
                            return Err(MapError::Io(err));
                        }
                        (file, true)
                    }
                    // Lost a race against another creator, theirs determines the size.
                    Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                        (options.open(path).map_err(MapError::Io)?, false)
                    }
                    Err(err) => return Err(MapError::Io(err)),
                }
            }
            Err(err) => return Err(MapError::Io(err)),
        };

        // Measure the file we actually hold, not the path we were given.
        let len = file
            .metadata()
            .map_err(MapError::Io)
            .and_then(|meta| {
                usize::try_from(meta.len()).map_err(|_| {
                    MapError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "file exceeds the address space",
                    ))
                })
            });

        let mapped = len.and_then(|len| self.mmap_shared(file.as_raw_fd(), len));
        if mapped.is_err() && created {
            let _ = std::fs::remove_file(path);
        }

        let mapped = Mapped { created, ..mapped? };
        tracing::debug!(
            path = %path.display(),
            len = mapped.len,
            is_pmem = mapped.is_pmem,
            created,
            "mapped file",
        );

        Ok(mapped)
    }

    /// Map a private, anonymous and thus volatile region.
    pub fn map_anonymous(&self, len: usize) -> Result<Mapped, MapError> {
        if len == 0 {
            return Err(MapError::ZeroSize);
        }

        let vt = &self.inner.vtable;
        let prot = vt.prot_read | vt.prot_write;
        let ptr = (vt.mmap)(len, prot, vt.map_private | vt.map_anonymous, -1);
        let ptr = self.check_mapped(ptr)?;

        tracing::debug!(len, "mapped anonymous memory");
        Ok(Mapped {
            ptr,
            len,
            is_pmem: false,
            created: true,
        })
    }

    fn mmap_shared(&self, fd: i32, len: usize) -> Result<Mapped, MapError> {
        if len == 0 {
            return Err(MapError::ZeroSize);
        }

        let vt = &self.inner.vtable;
        let prot = vt.prot_read | vt.prot_write;

        if self.inner.options.map_sync && vt.map_sync != 0 {
            let ptr = (vt.mmap)(len, prot, vt.map_sync, fd);
            // Refused on anything but a DAX medium, that is not an error.
            if let Ok(ptr) = self.check_mapped(ptr) {
                self.inner.persistent.lock().push((ptr.as_ptr() as usize, len));
                return Ok(Mapped {
                    ptr,
                    len,
                    is_pmem: self.inner.options.force_pmem.unwrap_or(true),
                    created: false,
                });
            }
        }

        let ptr = (vt.mmap)(len, prot, vt.map_shared, fd);
        let ptr = self.check_mapped(ptr)?;

        Ok(Mapped {
            ptr,
            len,
            is_pmem: self.inner.options.force_pmem.unwrap_or(false),
            created: false,
        })
    }

    fn check_mapped(&self, ptr: *mut c_void) -> Result<NonNull<u8>, MapError> {
        let vt = &self.inner.vtable;
        if ptr as usize == vt.map_failed {
            return Err(MapError::Mmap(OsError((vt.errno)())));
        }

        NonNull::new(ptr as *mut u8).ok_or_else(|| MapError::Mmap(OsError((vt.errno)())))
    }

    /// Release a mapping.
    ///
    /// On error the mapping may still be in place; the caller must not assume it was released.
    pub fn unmap(&self, ptr: NonNull<u8>, len: usize) -> Result<(), OsError> {
        let start = ptr.as_ptr() as usize;
        self.inner.persistent.lock().retain(|&(base, _)| base != start);

        let vt = &self.inner.vtable;
        if (vt.munmap)(ptr.as_ptr() as *mut c_void, len) != 0 {
            let err = OsError((vt.errno)());
            tracing::debug!(start, len, %err, "failed to unmap");
            return Err(err);
        }

        tracing::debug!(start, len, "unmapped");
        Ok(())
    }

    /// Make the range durable, according to the classification of its medium.
    ///
    /// On persistent memory this is a cache write-back and store fence which can not fail.
    pub fn flush_range(&self, ptr: *const u8, len: usize, is_pmem: bool) -> Result<(), OsError> {
        if is_pmem {
            self.persist(ptr, len);
            Ok(())
        } else {
            self.sync_range(ptr, len)
        }
    }

    /// Write back the cache lines of a range on persistent memory.
    pub fn persist(&self, ptr: *const u8, len: usize) {
        match self.inner.vtable.persist {
            Some(persist) => persist(ptr, len),
            None => {
                // No status to report on this path, a failure surfaces on the next sync.
                let _ = self.sync_range(ptr, len);
            }
        }
    }

    /// Synchronously write back a range of a shared file mapping.
    ///
    /// The range need not be page aligned, its start is rounded down to the page boundary.
    pub fn sync_range(&self, ptr: *const u8, len: usize) -> Result<(), OsError> {
        if len == 0 {
            return Ok(());
        }

        let vt = &self.inner.vtable;
        let page_mask = vt.page_size.max(1) - 1;
        let end = (ptr as usize).saturating_add(len);
        let start = ptr as usize & !page_mask;

        if (vt.msync)(start as *mut c_void, end - start, vt.ms_sync) != 0 {
            return Err(OsError((vt.errno)()));
        }

        Ok(())
    }

    /// Classify a range anew, independent of what was determined when it was mapped.
    pub fn probe_is_persistent(&self, ptr: *const u8, len: usize) -> bool {
        if let Some(force) = self.inner.options.force_pmem {
            return force;
        }

        let start = ptr as usize;
        let Some(end) = start.checked_add(len) else {
            return false;
        };

        self.inner
            .persistent
            .lock()
            .iter()
            .any(|&(base, size)| base <= start && end <= base + size)
    }
}

#[cfg(feature = "libc")]
impl Default for Backend {
    fn default() -> Self {
        Backend::new()
    }
}

impl core::ops::Deref for Backend {
    type Target = VTable;

    fn deref(&self) -> &Self::Target {
        &self.inner.vtable
    }
}

impl core::fmt::Debug for Backend {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Backend")
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}
