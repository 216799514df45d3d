//! Firmware mailbox memory.
//!
//! Sample and descriptor memory must be physically contiguous and
//! visible to the DMA engine without cache maintenance. The VideoCore
//! firmware hands out such memory through its mailbox property
//! interface; this module wraps the allocate/lock/map lifecycle and
//! carries the two addresses every region has (the bus address the
//! engine uses and the virtual address this process uses) in a single
//! owned value, so neither can outlive the other.

use std::io;
use std::ptr;

use crate::error::Error;
use crate::mmap;
use crate::ral;

/// Memory-attribute flags: direct, L1-nonallocating access. The engine
/// and the CPU see the same bytes without explicit cache maintenance.
const MEM_FLAG_L1_NONALLOCATING: u32 = (1 << 2) | (2 << 2);

/// Firmware property tags for the memory lifecycle.
const TAG_MEM_ALLOC: u32 = 0x3000c;
const TAG_MEM_LOCK: u32 = 0x3000d;
const TAG_MEM_UNLOCK: u32 = 0x3000e;
const TAG_MEM_FREE: u32 = 0x3000f;

/// `_IOWR(100, 0, char *)`, the mailbox property exchange.
const IOCTL_MBOX_PROPERTY: libc::c_ulong =
    (3 << 30) | ((std::mem::size_of::<*mut libc::c_char>() as libc::c_ulong) << 16) | (100 << 8);

/// The firmware side of the allocator: the mailbox request/response
/// exchange plus the bus-to-virtual mapping of granted pages.
///
/// [`VcioMailbox`] talks to the real firmware;
/// [`SimMailbox`](crate::sim::SimMailbox) substitutes heap memory so
/// the same allocator logic runs on a development machine.
pub trait MailboxInterface {
    /// Allocate `size` bytes with the given alignment and attribute
    /// flags, returning a firmware handle.
    fn mem_alloc(&mut self, size: u32, align: u32, flags: u32) -> Result<u32, Error>;
    /// Lock an allocation in place, returning its bus address.
    fn mem_lock(&mut self, handle: u32) -> Result<u32, Error>;
    /// Unlock a previously locked allocation.
    fn mem_unlock(&mut self, handle: u32) -> Result<(), Error>;
    /// Free an allocation.
    fn mem_free(&mut self, handle: u32) -> Result<(), Error>;
    /// Map `size` bytes at bus address `bus` into this process.
    fn map(&mut self, bus: u32, size: usize) -> Result<*mut u8, Error>;
    /// Undo a [`map`](Self::map).
    fn unmap(&mut self, virt: *mut u8, size: usize);
}

/// Mailbox property channel to the VideoCore firmware (`/dev/vcio`).
///
/// The character device is opened lazily on the first request and the
/// descriptor is reused for the life of the value.
pub struct VcioMailbox {
    fd: Option<libc::c_int>,
}

impl VcioMailbox {
    /// A closed mailbox channel; the device is opened on first use.
    pub fn new() -> Self {
        VcioMailbox { fd: None }
    }

    fn fd(&mut self) -> Result<libc::c_int, Error> {
        if let Some(fd) = self.fd {
            return Ok(fd);
        }
        // Safety: C string literal is NUL-terminated.
        let fd = unsafe { libc::open(b"/dev/vcio\0".as_ptr().cast(), 0) };
        if fd < 0 {
            return Err(Error::MailboxUnavailable(io::Error::last_os_error()));
        }
        self.fd = Some(fd);
        Ok(fd)
    }

    /// One property exchange: a single tag with `values` request words.
    /// Returns the first response word.
    fn property(&mut self, tag: u32, values: &[u32]) -> Result<u32, Error> {
        let vwords = values.len();
        let mut msg = [0u32; 32];
        msg[0] = ((vwords + 6) * 4) as u32; // total message size
        msg[1] = 0; // process request
        msg[2] = tag;
        msg[3] = (vwords * 4) as u32; // value buffer size
        msg[4] = (vwords * 4) as u32; // request size
        msg[5..5 + vwords].copy_from_slice(values);
        msg[5 + vwords] = 0; // end tag

        let fd = self.fd()?;
        // Safety: msg outlives the call and is sized for the exchange.
        let ret = unsafe { libc::ioctl(fd, IOCTL_MBOX_PROPERTY, msg.as_mut_ptr()) };
        if ret < 0 {
            return Err(Error::MailboxUnavailable(io::Error::last_os_error()));
        }
        log::trace!("mailbox tag {tag:#07x} -> {:#010x}", msg[5]);
        Ok(msg[5])
    }
}

impl Default for VcioMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for VcioMailbox {
    fn drop(&mut self) {
        if let Some(fd) = self.fd.take() {
            // Safety: closing our own descriptor.
            unsafe { libc::close(fd) };
        }
    }
}

impl MailboxInterface for VcioMailbox {
    fn mem_alloc(&mut self, size: u32, align: u32, flags: u32) -> Result<u32, Error> {
        self.property(TAG_MEM_ALLOC, &[size, align, flags])
    }

    fn mem_lock(&mut self, handle: u32) -> Result<u32, Error> {
        self.property(TAG_MEM_LOCK, &[handle])
    }

    fn mem_unlock(&mut self, handle: u32) -> Result<(), Error> {
        self.property(TAG_MEM_UNLOCK, &[handle]).map(|_| ())
    }

    fn mem_free(&mut self, handle: u32) -> Result<(), Error> {
        self.property(TAG_MEM_FREE, &[handle]).map(|_| ())
    }

    fn map(&mut self, bus: u32, size: usize) -> Result<*mut u8, Error> {
        mmap::map_phys(u64::from(ral::bus_to_phys(bus)), size)
            .map_err(|_| Error::Allocation { size })
    }

    fn unmap(&mut self, virt: *mut u8, size: usize) {
        mmap::unmap(virt, size);
    }
}

/// A firmware-granted, page-aligned, non-cached memory region.
///
/// The engine's view (bus address) and the process view (virtual
/// address) travel together, so a virtual pointer can never be used
/// after the bus mapping behind it is gone. Released exactly once
/// through [`MailboxAllocator::release`]; the virtual address is null
/// exactly when the buffer has been released.
#[derive(Debug)]
pub struct PhysicalBuffer {
    virt: *mut u8,
    bus_addr: u32,
    size: usize,
    handle: u32,
}

impl PhysicalBuffer {
    /// Bus address of the region, as the engine addresses it.
    pub fn bus_addr(&self) -> u32 {
        self.bus_addr
    }

    /// Size of the region in bytes; always a page multiple.
    pub fn len(&self) -> usize {
        self.size
    }

    /// `true` once the region has been handed back to the firmware.
    pub fn is_released(&self) -> bool {
        self.virt.is_null()
    }

    /// Bus address of the `index`-th `width`-byte slot.
    pub(crate) fn bus_addr_at(&self, index: usize, width: usize) -> u32 {
        self.bus_addr + (index * width) as u32
    }

    pub(crate) fn as_mut_ptr(&self) -> *mut u8 {
        self.virt
    }

    /// Copy the first `count` 32-bit words out of the region.
    pub(crate) fn read_words(&self, count: usize) -> Vec<u32> {
        assert!(!self.virt.is_null(), "buffer already released");
        assert!(count * 4 <= self.size);
        let base = self.virt as *const u32;
        // Safety: count words are in bounds and the region is live.
        (0..count)
            .map(|i| unsafe { ptr::read_volatile(base.add(i)) })
            .collect()
    }
}

impl Drop for PhysicalBuffer {
    fn drop(&mut self) {
        if !self.virt.is_null() {
            log::warn!(
                "leaking {} bytes of firmware memory (bus {:#010x})",
                self.size,
                self.bus_addr
            );
        }
    }
}

// A buffer can move to another execution context; it is the sole owner
// of its mapping.
unsafe impl Send for PhysicalBuffer {}

/// Allocator for engine-visible memory, backed by a [`MailboxInterface`].
pub struct MailboxAllocator<M = VcioMailbox> {
    mailbox: M,
}

impl MailboxAllocator<VcioMailbox> {
    /// An allocator over the real firmware mailbox.
    pub fn new() -> Self {
        MailboxAllocator {
            mailbox: VcioMailbox::new(),
        }
    }
}

impl Default for MailboxAllocator<VcioMailbox> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: MailboxInterface> MailboxAllocator<M> {
    /// An allocator over an explicitly provided mailbox backend.
    pub fn with_interface(mailbox: M) -> Self {
        MailboxAllocator { mailbox }
    }

    /// Allocate at least `size` bytes of engine-visible memory.
    ///
    /// The request is rounded up to the page size, allocated and locked
    /// with direct (non-cache-coherent) attributes, and mapped into the
    /// process. A zero bus address or a failed mapping hands the pages
    /// back to the firmware and fails with [`Error::Allocation`].
    pub fn allocate(&mut self, size: usize) -> Result<PhysicalBuffer, Error> {
        let size = round_up_to_page(size);
        let handle = self
            .mailbox
            .mem_alloc(size as u32, ral::PAGE_SIZE as u32, MEM_FLAG_L1_NONALLOCATING)?;
        let bus_addr = self.mailbox.mem_lock(handle)?;
        if bus_addr == 0 {
            let _ = self.mailbox.mem_free(handle);
            return Err(Error::Allocation { size });
        }
        let virt = match self.mailbox.map(bus_addr, size) {
            Ok(virt) => virt,
            Err(_) => {
                let _ = self.mailbox.mem_unlock(handle);
                let _ = self.mailbox.mem_free(handle);
                return Err(Error::Allocation { size });
            }
        };
        log::trace!("mailbox alloc: {size} bytes, bus {bus_addr:#010x}, virt {virt:p}");
        Ok(PhysicalBuffer {
            virt,
            bus_addr,
            size,
            handle,
        })
    }

    /// Hand `buffer` back to the firmware: unmap, unlock, free.
    ///
    /// A buffer that has already been released is left alone: a second
    /// release is a no-op, not a double free. Never call this while a
    /// chain referencing the buffer is armed or active.
    pub fn release(&mut self, buffer: &mut PhysicalBuffer) -> Result<(), Error> {
        if buffer.virt.is_null() {
            return Ok(());
        }
        self.mailbox.unmap(buffer.virt, buffer.size);
        self.mailbox.mem_unlock(buffer.handle)?;
        self.mailbox.mem_free(buffer.handle)?;
        buffer.virt = ptr::null_mut();
        buffer.bus_addr = 0;
        Ok(())
    }
}

/// Round `size` up to the next multiple of the page size.
fn round_up_to_page(size: usize) -> usize {
    (size + ral::PAGE_SIZE - 1) / ral::PAGE_SIZE * ral::PAGE_SIZE
}

#[cfg(test)]
mod tests {
    use super::{round_up_to_page, MailboxAllocator};
    use crate::ral::PAGE_SIZE;
    use crate::sim::SimMailbox;

    #[test]
    fn sizes_round_to_page_multiples() {
        assert_eq!(round_up_to_page(1), PAGE_SIZE);
        assert_eq!(round_up_to_page(PAGE_SIZE), PAGE_SIZE);
        assert_eq!(round_up_to_page(PAGE_SIZE + 1), 2 * PAGE_SIZE);
    }

    #[test]
    fn allocations_are_live_page_multiples() {
        let mailbox = SimMailbox::new();
        let mut allocator = MailboxAllocator::with_interface(mailbox);
        for request in [1usize, 17, 4096, 4097, 100_000, 4 * 1024 * 1024] {
            let mut buffer = allocator.allocate(request).unwrap();
            assert_ne!(buffer.bus_addr(), 0);
            assert!(!buffer.is_released());
            assert_eq!(buffer.len() % PAGE_SIZE, 0);
            assert!(buffer.len() >= request);
            allocator.release(&mut buffer).unwrap();
            assert!(buffer.is_released());
            // releasing again must be a no-op
            allocator.release(&mut buffer).unwrap();
            assert!(buffer.is_released());
        }
    }

    #[test]
    fn released_buffers_free_their_firmware_handles() {
        let mailbox = SimMailbox::new();
        let mut allocator = MailboxAllocator::with_interface(mailbox.clone());
        let mut buffer = allocator.allocate(PAGE_SIZE).unwrap();
        assert_eq!(mailbox.live_regions(), 1);
        allocator.release(&mut buffer).unwrap();
        assert_eq!(mailbox.live_regions(), 0);
    }
}
