use core::ffi::{c_int, c_void};

/// A table of OS functions.
///
/// This enumerates the primitives the [`Backend`](crate::Backend) requires to map, unmap and
/// persist regions. Every function must behave according to the POSIX/libc specification of the
/// correspondingly named function, see the Safety precondition of
/// [`Backend::new_unchecked`](crate::Backend::new_unchecked). A default table can be initialized
/// when linking against `libc`.
///
/// You're encouraged to provide your own table here instead of hooking the functions themselves
/// with override/linker tricks, for instance to inject failures.
pub struct VTable {
    /// Simplified `mmap`, always at a kernel chosen address and file offset zero.
    pub mmap: fn(len: usize, prot: c_int, flags: c_int, fd: c_int) -> *mut c_void,
    pub munmap: fn(*mut c_void, usize) -> c_int,
    pub msync: fn(*mut c_void, usize, c_int) -> c_int,
    /// Write back all cache lines covering a range and fence the stores.
    ///
    /// `None` if the platform provides no such instruction, in which case persisting falls back
    /// to `msync`.
    pub persist: Option<fn(*const u8, usize)>,
    pub errno: fn() -> c_int,

    pub page_size: usize,
    pub prot_read: c_int,
    pub prot_write: c_int,
    pub map_shared: c_int,
    pub map_private: c_int,
    pub map_anonymous: c_int,
    /// The flags requesting a mapping with synchronous page faults, or `0` if unsupported.
    ///
    /// The kernel only grants such a mapping for files on a DAX capable medium.
    pub map_sync: c_int,
    pub ms_sync: c_int,
    /// The `MAP_FAILED` sentinel, as an address.
    pub map_failed: usize,
}

#[cfg(feature = "libc")]
impl VTable {
    pub fn new_libc() -> Self {
        fn _mmap_inner(len: usize, prot: c_int, flags: c_int, fd: c_int) -> *mut c_void {
            unsafe { libc::mmap(core::ptr::null_mut(), len, prot, flags, fd, 0) }
        }

        fn _munmap(addr: *mut c_void, len: usize) -> c_int {
            unsafe { libc::munmap(addr, len) }
        }

        fn _msync(addr: *mut c_void, len: usize, flags: c_int) -> c_int {
            unsafe { libc::msync(addr, len, flags) }
        }

        fn _errno() -> c_int {
            std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
        }

        let page_size = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
            n if n > 0 => n as usize,
            _ => 4096,
        };

        VTable {
            mmap: _mmap_inner,
            munmap: _munmap,
            msync: _msync,
            persist: persist_fn(),
            errno: _errno,
            page_size,
            prot_read: libc::PROT_READ,
            prot_write: libc::PROT_WRITE,
            map_shared: libc::MAP_SHARED,
            map_private: libc::MAP_PRIVATE,
            map_anonymous: libc::MAP_ANONYMOUS,
            map_sync: map_sync_flags(),
            ms_sync: libc::MS_SYNC,
            map_failed: libc::MAP_FAILED as usize,
        }
    }
}

// The uapi values, not exported uniformly across the libc targets.
#[cfg(all(
    feature = "libc",
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "riscv64")
))]
fn map_sync_flags() -> c_int {
    const MAP_SHARED_VALIDATE: c_int = 0x03;
    const MAP_SYNC: c_int = 0x80000;
    MAP_SHARED_VALIDATE | MAP_SYNC
}

#[cfg(all(
    feature = "libc",
    not(all(
        target_os = "linux",
        any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "riscv64")
    ))
))]
fn map_sync_flags() -> c_int {
    0
}

#[cfg(all(feature = "libc", target_arch = "x86_64"))]
fn persist_fn() -> Option<fn(*const u8, usize)> {
    fn _persist(addr: *const u8, len: usize) {
        use core::arch::x86_64::{_mm_clflush, _mm_sfence};
        const CACHE_LINE: usize = 64;

        let end = (addr as usize).saturating_add(len);
        let mut line = addr as usize & !(CACHE_LINE - 1);
        while line < end {
            // Safety: `sse2` is part of the x86_64 baseline. The caller passes a mapped range and
            // flushing a line has no effect on its contents.
            unsafe { _mm_clflush(line as *const u8) };
            line += CACHE_LINE;
        }

        unsafe { _mm_sfence() };
    }

    Some(_persist)
}

#[cfg(all(feature = "libc", not(target_arch = "x86_64")))]
fn persist_fn() -> Option<fn(*const u8, usize)> {
    None
}
