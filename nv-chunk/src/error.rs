use nv_map::{MapError, OsError};
use thiserror::Error;

/// Constructing a [`Device`](crate::Device) failed, nothing was left mapped.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("new resource `{name}` with zero size")]
    ZeroSizeOnCreate { name: String },
    #[error("failed to map device `{name}`")]
    MappingFailure {
        name: String,
        #[source]
        source: MapError,
    },
    #[error("partially mapped device `{name}`: expected {expected} bytes, mapped {mapped}")]
    PartialMapping {
        name: String,
        expected: usize,
        mapped: usize,
    },
}

/// Constructing or accessing a [`Chunk`](crate::Chunk) failed.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("chunk `{name}` has no device")]
    NullDevice { name: String },
    #[error("range {offset}+{len} of chunk `{name}` exceeds its {size} bytes")]
    OutOfBounds {
        name: String,
        offset: usize,
        len: usize,
        size: usize,
    },
    #[error("the device of chunk `{name}` is closed")]
    DeviceClosed { name: String },
}

#[derive(Debug, Error)]
pub enum FlushError {
    /// The device is anonymous memory, nothing written to it survives the process.
    #[error("device `{name}` is volatile memory and can not be persisted")]
    Volatile { name: String },
    #[error("device `{name}` is closed")]
    DeviceClosed { name: String },
    #[error("range {offset}+{len} exceeds `{name}` of {size} bytes")]
    OutOfBounds {
        name: String,
        offset: usize,
        len: usize,
        size: usize,
    },
    #[error("failed to write back `{name}`")]
    Sync {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// The device was unmapped from the catalog, but the mapping may still be in place.
#[derive(Debug, Error)]
#[error("failed to unmap device `{name}`")]
pub struct UnmapError {
    pub name: String,
    #[source]
    pub source: OsError,
}

/// Any failure of [`Registry::open_chunk`](crate::Registry::open_chunk).
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

impl DeviceError {
    /// The platform error code which caused this, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            DeviceError::MappingFailure { source, .. } => source.raw_os_error(),
            DeviceError::ZeroSizeOnCreate { .. } | DeviceError::PartialMapping { .. } => None,
        }
    }
}

impl FlushError {
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            FlushError::Sync { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}
