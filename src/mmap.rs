//! Peripheral register windows.

use std::io;
use std::ptr;

use crate::error::Error;
use crate::ral;

/// A peripheral register range mapped into the process address space.
///
/// One window exists per peripheral and is owned by the component that
/// drives it; windows are never shared through globals. The `/dev/mem`
/// descriptor is closed as soon as the mapping is established; the
/// mapping stays valid until the window is dropped.
pub struct RegisterWindow {
    base: *mut u8,
    len: usize,
}

impl RegisterWindow {
    /// Map `len` bytes of registers at `offset` from the platform
    /// peripheral base.
    ///
    /// Fails with [`Error::RegisterMap`] if `/dev/mem` cannot be opened
    /// or the mapping cannot be established. Callers treat this as
    /// fatal: nothing in the driver can proceed without register
    /// access.
    pub fn map(offset: u32, len: usize) -> Result<Self, Error> {
        let phys = ral::PERI_PHYS_BASE + offset;
        let base = map_phys(u64::from(phys), len)
            .map_err(|source| Error::RegisterMap { phys, source })?;
        Ok(RegisterWindow { base, len })
    }

    /// An anonymous, zero-filled window of `len` bytes.
    ///
    /// Behaves exactly like a mapped peripheral window but is plain
    /// process memory, so a simulated backend can watch it from the
    /// other side. See [`crate::sim`].
    pub fn anonymous(len: usize) -> Result<Self, Error> {
        // Safety: anonymous mapping, no fd involved.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(Error::RegisterMap {
                phys: 0,
                source: io::Error::last_os_error(),
            });
        }
        Ok(RegisterWindow {
            base: base.cast(),
            len,
        })
    }

    /// Base address of the window.
    pub fn as_ptr(&self) -> *mut u8 {
        self.base
    }

    /// Length of the window in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Typed view of the registers at `offset` within the window.
    ///
    /// # Panics
    ///
    /// Panics if `offset + size_of::<T>()` runs past the window.
    pub(crate) fn instance<T>(&self, offset: usize) -> &T {
        assert!(
            offset + std::mem::size_of::<T>() <= self.len,
            "register block at {offset:#x} exceeds the mapped window"
        );
        // Safety: the window covers the requested range and stays
        // mapped for as long as the returned borrow lives.
        unsafe { &*(self.base.add(offset) as *const T) }
    }
}

impl Drop for RegisterWindow {
    fn drop(&mut self) {
        unmap(self.base, self.len);
    }
}

// A window can move to another execution context. It cannot be cloned,
// so the mapping is never mutably shared.
unsafe impl Send for RegisterWindow {}

/// Map `len` bytes of physical memory at `phys` through `/dev/mem`.
///
/// The descriptor is closed before returning; the mapping survives it.
pub(crate) fn map_phys(phys: u64, len: usize) -> io::Result<*mut u8> {
    // Safety: C string literal is NUL-terminated.
    let fd = unsafe {
        libc::open(
            b"/dev/mem\0".as_ptr().cast(),
            libc::O_RDWR | libc::O_SYNC,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // Safety: fd is a valid descriptor; the kernel validates the range.
    let addr = unsafe {
        libc::mmap64(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            phys as libc::off64_t,
        )
    };
    // Safety: closing our own descriptor; the mapping is independent.
    unsafe { libc::close(fd) };
    if addr == libc::MAP_FAILED {
        Err(io::Error::last_os_error())
    } else {
        Ok(addr.cast())
    }
}

/// Undo a [`map_phys`] or anonymous mapping.
pub(crate) fn unmap(base: *mut u8, len: usize) {
    // Safety: base/len came from a successful mmap.
    unsafe { libc::munmap(base.cast(), len) };
}

#[cfg(test)]
mod tests {
    use super::RegisterWindow;

    #[test]
    fn anonymous_windows_start_zeroed_and_accept_writes() {
        let window = RegisterWindow::anonymous(4096).unwrap();
        let words = window.as_ptr() as *mut u32;
        for i in 0..1024 {
            assert_eq!(unsafe { words.add(i).read_volatile() }, 0);
        }
        unsafe { words.write_volatile(0xDEAD_BEEF) };
        assert_eq!(unsafe { words.read_volatile() }, 0xDEAD_BEEF);
        assert_eq!(window.len(), 4096);
    }
}
