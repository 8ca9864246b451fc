//! Named chunks of persistent or volatile memory.
//!
//! A [`Device`] maps a backing resource: a file, possibly on a DAX file system,
//! or anonymous memory as a stand-in while no persistent medium is around. A [`Chunk`] names a
//! range of a device and a [`View`] overlays it with records. The [`Registry`] deduplicates both
//! by name, so that opening the same chunk or device twice shares one mapping.
//!
//! ```no_run
//! use nv_chunk::Registry;
//!
//! let registry = Registry::default();
//! let chunk = registry.open_chunk("greeting", "/pmem/dev0", 0, 1 << 20)?;
//! chunk.write_at(0, b"Hello NVM")?;
//! chunk.flush()?;
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```
//!
//! Durability is explicit. On persistent memory a flush writes back the CPU caches, on any other
//! file it synchronously writes back the dirty pages. Memory backed chunks refuse to flush.
mod chunk;
mod device;
mod error;
mod registry;
mod view;

pub use chunk::Chunk;
pub use device::{Backing, Device};
pub use error::{ChunkError, DeviceError, Error, FlushError, UnmapError};
pub use registry::Registry;
pub use view::View;

pub use nv_map::{Backend, Options};

/// Open a device outside of any registry, an empty `path` selects anonymous memory.
///
/// The failure is logged here as well.
pub fn open(backend: &Backend, path: &str, size: usize) -> Result<Device, DeviceError> {
    Device::open(backend, path, size).map_err(|err| {
        tracing::error!(path, size, error = %err, "failed to open device");
        err
    })
}
