use crate::{Backend, MapError, Options, VTable};
use core::ffi::{c_int, c_void};
use core::sync::atomic::{AtomicUsize, Ordering};

fn backend() -> Backend {
    Backend::with_options(Options {
        force_pmem: None,
        map_sync: true,
    })
}

#[test]
fn anonymous_zero_size() {
    let err = backend().map("", 0, true).unwrap_err();
    assert!(matches!(err, MapError::ZeroSize), "{err:?}");
}

#[test]
fn anonymous_is_writable_and_volatile() {
    let backend = backend();
    let mapped = backend.map("", 0x10_000, true).unwrap();
    assert_eq!(mapped.len, 0x10_000);
    assert!(!mapped.is_pmem);

    unsafe {
        mapped.ptr.as_ptr().write(0xa5);
        mapped.ptr.as_ptr().add(0xffff).write(0x5a);
        assert_eq!(*mapped.ptr.as_ptr(), 0xa5);
    }

    assert!(!backend.probe_is_persistent(mapped.ptr.as_ptr(), mapped.len));
    backend.unmap(mapped.ptr, mapped.len).unwrap();
}

#[test]
fn create_file_with_hint() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dev");
    let backend = backend();

    let mapped = backend.map_file(&path, 0x3000, true).unwrap();
    assert_eq!(mapped.len, 0x3000);
    assert!(mapped.created);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 0x3000);

    unsafe { mapped.ptr.as_ptr().add(17).write(b'x') };
    backend.flush_range(mapped.ptr.as_ptr(), mapped.len, mapped.is_pmem).unwrap();
    backend.unmap(mapped.ptr, mapped.len).unwrap();

    let contents = std::fs::read(&path).unwrap();
    assert_eq!(contents[17], b'x');
}

#[test]
fn existing_file_ignores_hint() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dev");
    std::fs::write(&path, [7u8; 100]).unwrap();

    let backend = backend();
    let mapped = backend.map_file(&path, 0x10_000, true).unwrap();
    assert_eq!(mapped.len, 100);
    assert!(!mapped.created);
    assert_eq!(unsafe { *mapped.ptr.as_ptr().add(99) }, 7);
    backend.unmap(mapped.ptr, mapped.len).unwrap();
}

#[test]
fn new_file_zero_size() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dev");

    let err = backend().map_file(&path, 0, true).unwrap_err();
    assert!(matches!(err, MapError::ZeroSize), "{err:?}");
    assert!(!path.exists());
}

#[test]
fn existing_empty_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dev");
    std::fs::write(&path, []).unwrap();

    let err = backend().map_file(&path, 0x1000, true).unwrap_err();
    assert!(matches!(err, MapError::ZeroSize), "{err:?}");
}

#[test]
fn character_device_has_no_size() {
    let err = backend()
        .map_file(std::path::Path::new("/dev/null"), 0x1000, true)
        .unwrap_err();
    assert!(matches!(err, MapError::ZeroSize), "{err:?}");
}

#[test]
fn missing_without_create() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dev");

    let err = backend().map_file(&path, 0x1000, false).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
}

#[test]
fn forced_classification() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dev");

    let backend = Backend::with_options(Options {
        force_pmem: Some(true),
        map_sync: false,
    });

    let mapped = backend.map_file(&path, 0x1000, true).unwrap();
    assert!(mapped.is_pmem);
    assert!(backend.probe_is_persistent(mapped.ptr.as_ptr(), mapped.len));
    // The persist path never reports a status.
    backend.flush_range(mapped.ptr.as_ptr(), mapped.len, true).unwrap();
    backend.unmap(mapped.ptr, mapped.len).unwrap();
}

#[test]
fn options_from_vars() {
    let options = Options::from_vars(|name| match name {
        Options::FORCE_PMEM_VAR => Some("1".into()),
        Options::NO_MAP_SYNC_VAR => Some("1".into()),
        _ => None,
    });

    assert_eq!(options.force_pmem, Some(true));
    assert!(!options.map_sync);

    let options = Options::from_vars(|name| match name {
        Options::FORCE_PMEM_VAR => Some("maybe".into()),
        _ => None,
    });

    assert_eq!(options, Options::default());
}

#[test]
fn sync_range_aligns_to_page() {
    static SYNCED: AtomicUsize = AtomicUsize::new(0);
    static SYNCED_LEN: AtomicUsize = AtomicUsize::new(0);

    fn _msync(addr: *mut c_void, len: usize, _: c_int) -> c_int {
        SYNCED.store(addr as usize, Ordering::Relaxed);
        SYNCED_LEN.store(len, Ordering::Relaxed);
        0
    }

    let backend = unsafe {
        Backend::new_unchecked(
            VTable {
                msync: _msync,
                page_size: 0x1000,
                ..VTable::new_libc()
            },
            Options::default(),
        )
    };

    backend.sync_range(0x1_2345 as *const u8, 0x10).unwrap();
    assert_eq!(SYNCED.load(Ordering::Relaxed), 0x1_2000);
    assert_eq!(SYNCED_LEN.load(Ordering::Relaxed), 0x355);
}

#[test]
fn failing_calls_report_errno() {
    let backend = unsafe {
        Backend::new_unchecked(
            VTable {
                mmap: |_, _, _, _| libc::MAP_FAILED,
                munmap: |_, _| -1,
                msync: |_, _, _| -1,
                errno: || libc::EIO,
                ..VTable::new_libc()
            },
            Options::default(),
        )
    };

    let err = backend.map_anonymous(0x1000).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EIO));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dev");
    let err = backend.map_file(&path, 0x1000, true).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EIO));
    // Nothing left behind by a failed creation.
    assert!(!path.exists());

    let real = self::backend();
    let mapped = real.map_anonymous(0x1000).unwrap();
    let err = backend.unmap(mapped.ptr, mapped.len).unwrap_err();
    assert_eq!(err.code(), libc::EIO);
    let err = backend.flush_range(mapped.ptr.as_ptr(), mapped.len, false).unwrap_err();
    assert_eq!(err.code(), libc::EIO);
    real.unmap(mapped.ptr, mapped.len).unwrap();
}
