//! The catalog deduplicating devices and chunks by name.
use std::sync::Arc;

use nv_map::Backend;
use parking_lot::Mutex;

use crate::error::{ChunkError, DeviceError, Error, UnmapError};
use crate::{Chunk, Device};

/// Open devices and chunks, by name.
///
/// Opening a name that is already open is a lookup, never a second construction. A single lock
/// guards both catalogs so that the search-then-insert of every open is atomic.
pub struct Registry {
    backend: Backend,
    catalog: Mutex<Catalog>,
}

#[derive(Default)]
struct Catalog {
    devices: Vec<Arc<Device>>,
    chunks: Vec<Arc<Chunk>>,
}

impl Registry {
    pub fn new(backend: Backend) -> Self {
        Registry {
            backend,
            catalog: Mutex::new(Catalog::default()),
        }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Get the open device for `path`, or open it.
    ///
    /// On a hit the `size` is ignored, even if it differs from that of the open device. An empty
    /// `path` always opens a new memory backed device.
    pub fn open_device(&self, path: &str, size: usize) -> Result<Arc<Device>, DeviceError> {
        let mut catalog = self.catalog.lock();
        self.open_device_in(&mut catalog, path, size)
    }

    fn open_device_in(
        &self,
        catalog: &mut Catalog,
        path: &str,
        size: usize,
    ) -> Result<Arc<Device>, DeviceError> {
        if !path.is_empty() {
            if let Some(device) = catalog.device(path) {
                return Ok(device);
            }
        }

        match Device::open(&self.backend, path, size) {
            Ok(device) => {
                let device = Arc::new(device);
                catalog.devices.push(device.clone());
                Ok(device)
            }
            Err(err) => {
                tracing::error!(path, size, error = %err, "failed to open device");
                Err(err)
            }
        }
    }

    /// Close a device and remove it from the catalog.
    ///
    /// The entry is removed even if unmapping fails, which is then reported. Chunks over the
    /// device stay in the catalog but observe a closed device. Unknown names are ignored.
    pub fn close_device(&self, name: &str) -> Result<(), UnmapError> {
        let mut catalog = self.catalog.lock();
        let Some(position) = catalog.devices.iter().position(|d| d.name() == name) else {
            return Ok(());
        };

        let device = catalog.devices.remove(position);
        let attached = catalog
            .chunks
            .iter()
            .filter(|c| Arc::ptr_eq(c.device(), &device))
            .count();

        if attached > 0 {
            tracing::warn!(name, attached, "closing device with chunks still mapped");
        }

        device.close()
    }

    /// Create a chunk over `device` and add it to the catalog.
    ///
    /// This does not check for an existing chunk of the same name, see [`Registry::open_chunk`].
    pub fn map_chunk(
        &self,
        name: &str,
        device: Option<Arc<Device>>,
        offset: usize,
        size: usize,
    ) -> Result<Arc<Chunk>, ChunkError> {
        let mut catalog = self.catalog.lock();
        Self::map_chunk_in(&mut catalog, name, device, offset, size)
    }

    fn map_chunk_in(
        catalog: &mut Catalog,
        name: &str,
        device: Option<Arc<Device>>,
        offset: usize,
        size: usize,
    ) -> Result<Arc<Chunk>, ChunkError> {
        match Chunk::new(name, device, offset, size) {
            Ok(chunk) => {
                let chunk = Arc::new(chunk);
                catalog.chunks.push(chunk.clone());
                tracing::debug!(name, offset, size = chunk.size(), "mapped chunk");
                Ok(chunk)
            }
            Err(err) => {
                tracing::error!(name, offset, size, error = %err, "failed to map chunk");
                Err(err)
            }
        }
    }

    /// Get the chunk called `name`, or create it over the device at `path`.
    ///
    /// An existing chunk is returned unchanged, the other arguments are then ignored. A chunk
    /// whose device was closed is dropped from the catalog and mapped anew. Otherwise the device
    /// is opened, or created with `offset + size` bytes, and a chunk of `size` bytes at
    /// `offset` is mapped over it. A device that already exists keeps its own size whatever is
    /// requested here, and the chunk is checked against that.
    pub fn open_chunk(
        &self,
        name: &str,
        path: &str,
        offset: usize,
        size: usize,
    ) -> Result<Arc<Chunk>, Error> {
        let mut catalog = self.catalog.lock();
        if let Some(chunk) = catalog.chunk(name) {
            if chunk.device().is_open() {
                return Ok(chunk);
            }

            catalog.remove_chunk(|c| core::ptr::eq(c, &*chunk));
        }

        let Some(dev_size) = offset.checked_add(size) else {
            let err = ChunkError::OutOfBounds {
                name: name.to_owned(),
                offset,
                len: size,
                size: usize::MAX,
            };
            tracing::error!(name, path, error = %err, "failed to open chunk");
            return Err(err.into());
        };

        let device = self.open_device_in(&mut catalog, path, dev_size)?;
        let chunk = Self::map_chunk_in(&mut catalog, name, Some(device), offset, size)?;
        Ok(chunk)
    }

    pub fn chunk(&self, name: &str) -> Option<Arc<Chunk>> {
        self.catalog.lock().chunk(name)
    }

    pub fn device(&self, name: &str) -> Option<Arc<Device>> {
        self.catalog.lock().device(name)
    }

    /// Remove the first chunk called `name`. Returns whether there was one.
    pub fn unmap_chunk(&self, name: &str) -> bool {
        self.catalog.lock().remove_chunk(|c| c.name() == name)
    }

    /// Remove the first chunk starting at `addr`. Returns whether there was one.
    pub fn unmap_chunk_at(&self, addr: *const u8) -> bool {
        if addr.is_null() {
            return false;
        }

        self.catalog
            .lock()
            .remove_chunk(|c| c.as_ptr() as *const u8 == addr)
    }

    /// Drop every chunk, then close every device.
    pub fn clear(&self) {
        let mut catalog = self.catalog.lock();
        catalog.chunks.clear();

        for device in catalog.devices.drain(..) {
            if let Err(err) = device.close() {
                tracing::warn!(error = %err, "failed to close device during clear");
            }
        }
    }

    pub fn nchunks(&self) -> usize {
        self.catalog.lock().chunks.len()
    }

    pub fn ndevs(&self) -> usize {
        self.catalog.lock().devices.len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new(Backend::default())
    }
}

impl Catalog {
    fn device(&self, name: &str) -> Option<Arc<Device>> {
        self.devices.iter().find(|d| d.name() == name).cloned()
    }

    fn chunk(&self, name: &str) -> Option<Arc<Chunk>> {
        self.chunks.iter().find(|c| c.name() == name).cloned()
    }

    fn remove_chunk(&mut self, mut matches: impl FnMut(&Chunk) -> bool) -> bool {
        match self.chunks.iter().position(|c| matches(c)) {
            Some(position) => {
                let chunk = self.chunks.remove(position);
                tracing::debug!(name = chunk.name(), "unmapped chunk");
                true
            }
            None => false,
        }
    }
}

impl core::fmt::Debug for Registry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let catalog = self.catalog.lock();
        f.debug_struct("Registry")
            .field("devices", &catalog.devices)
            .field("chunks", &catalog.chunks)
            .finish()
    }
}
