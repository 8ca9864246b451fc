use core::ffi::c_int;

/// An error establishing a mapping.
#[derive(Debug)]
pub enum MapError {
    /// A new resource was requested, or an existing one found, without any size to map.
    ZeroSize,
    /// Opening, creating or sizing the backing file failed.
    Io(std::io::Error),
    /// The `mmap` call itself failed.
    Mmap(OsError),
}

/// A failed OS call, with the `errno` it left behind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OsError(pub(crate) c_int);

impl MapError {
    /// The platform error code which caused this, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            MapError::ZeroSize => None,
            MapError::Io(err) => err.raw_os_error(),
            MapError::Mmap(err) => Some(err.0),
        }
    }
}

impl OsError {
    pub fn code(&self) -> c_int {
        self.0
    }
}

impl core::fmt::Display for MapError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MapError::ZeroSize => write!(f, "new resource with zero size"),
            MapError::Io(err) => write!(f, "failed to open backing resource: {err}"),
            MapError::Mmap(err) => write!(f, "failed to map resource: {err}"),
        }
    }
}

impl std::error::Error for MapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MapError::ZeroSize => None,
            MapError::Io(err) => Some(err),
            MapError::Mmap(err) => Some(err),
        }
    }
}

impl core::fmt::Display for OsError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let err = std::io::Error::from_raw_os_error(self.0);
        write!(f, "{err}")
    }
}

impl std::error::Error for OsError {}

impl From<OsError> for std::io::Error {
    fn from(err: OsError) -> Self {
        std::io::Error::from_raw_os_error(err.0)
    }
}

impl From<MapError> for std::io::Error {
    fn from(err: MapError) -> Self {
        match err {
            MapError::ZeroSize => std::io::Error::new(std::io::ErrorKind::InvalidInput, err),
            MapError::Io(err) => err,
            MapError::Mmap(err) => err.into(),
        }
    }
}
