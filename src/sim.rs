//! Simulated firmware and engine backends.
//!
//! Host-side stand-ins for everything the driver normally gets from the
//! board: [`SimMailbox`] grants heap pages with synthetic bus
//! addresses, and [`DmaEngineSim`] plays the autonomous engine, walking
//! a control-block chain exactly as the hardware would. Together with
//! [`RegisterWindow::anonymous`](crate::RegisterWindow::anonymous),
//! they let every register sequence in this crate run unmodified on a
//! development machine.
//!
//! The model is deliberately narrow: transfers are single 32-bit words,
//! which is all a capture chain ever issues, and the walker is expected
//! to drain the chain well inside the capture window, the same
//! assumption the driver makes of the hardware.

use std::collections::HashMap;
use std::io;
use std::ptr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::mailbox::MailboxInterface;
use crate::mmap::RegisterWindow;
use crate::ral::{self, dma};
use crate::ring::ControlBlock;

/// Where synthetic bus addresses start.
const SIM_BUS_BASE: u32 = 0xC000_0000;

/// One firmware-style page, aligned like the real thing so control
/// blocks keep their required 32-byte alignment.
#[derive(Clone, Copy)]
#[repr(align(4096))]
struct Page([u8; 4096]);

struct Region {
    pages: Box<[Page]>,
    bus: u32,
    size: usize,
    locked: bool,
}

impl Region {
    fn base(&self) -> *mut u8 {
        self.pages.as_ptr() as *mut u8
    }
}

struct SimState {
    regions: HashMap<u32, Region>,
    next_handle: u32,
    next_bus: u32,
}

fn unknown_handle() -> Error {
    Error::MailboxUnavailable(io::Error::new(
        io::ErrorKind::InvalidInput,
        "unknown mailbox handle",
    ))
}

/// An in-process stand-in for the firmware mailbox.
///
/// Implements the same allocate/lock/unlock/free exchange over heap
/// memory, handing out page-aligned regions at synthetic bus addresses.
/// Clones share one region table, so a cloned handle can translate bus
/// addresses for the [`DmaEngineSim`] while the allocator owns another.
#[derive(Clone)]
pub struct SimMailbox {
    state: Arc<Mutex<SimState>>,
}

impl SimMailbox {
    /// An empty simulated firmware.
    pub fn new() -> Self {
        SimMailbox {
            state: Arc::new(Mutex::new(SimState {
                regions: HashMap::new(),
                next_handle: 1,
                next_bus: SIM_BUS_BASE,
            })),
        }
    }

    /// Number of allocations the firmware currently holds.
    pub fn live_regions(&self) -> usize {
        self.state.lock().unwrap().regions.len()
    }

    /// Translate a bus address inside any live, locked region to a
    /// host pointer, or `None` for peripheral and unknown addresses.
    /// Only locked regions have a stable bus address, as on the real
    /// firmware.
    fn translate(&self, bus: u32) -> Option<*mut u8> {
        let state = self.state.lock().unwrap();
        state.regions.values().find_map(|region| {
            let offset = bus.checked_sub(region.bus)?;
            if region.locked && (offset as usize) < region.size {
                // Safety: offset is within the region's pages.
                Some(unsafe { region.base().add(offset as usize) })
            } else {
                None
            }
        })
    }
}

impl Default for SimMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl MailboxInterface for SimMailbox {
    fn mem_alloc(&mut self, size: u32, _align: u32, _flags: u32) -> Result<u32, Error> {
        let mut state = self.state.lock().unwrap();
        let page_count = (size as usize + ral::PAGE_SIZE - 1) / ral::PAGE_SIZE;
        let size = page_count * ral::PAGE_SIZE;
        let pages = vec![Page([0; 4096]); page_count].into_boxed_slice();
        let handle = state.next_handle;
        state.next_handle += 1;
        let bus = state.next_bus;
        state.next_bus += size as u32;
        state.regions.insert(
            handle,
            Region {
                pages,
                bus,
                size,
                locked: false,
            },
        );
        Ok(handle)
    }

    fn mem_lock(&mut self, handle: u32) -> Result<u32, Error> {
        let mut state = self.state.lock().unwrap();
        let region = state.regions.get_mut(&handle).ok_or_else(unknown_handle)?;
        region.locked = true;
        Ok(region.bus)
    }

    fn mem_unlock(&mut self, handle: u32) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let region = state.regions.get_mut(&handle).ok_or_else(unknown_handle)?;
        region.locked = false;
        Ok(())
    }

    fn mem_free(&mut self, handle: u32) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state
            .regions
            .remove(&handle)
            .map(|_| ())
            .ok_or_else(unknown_handle)
    }

    fn map(&mut self, bus: u32, size: usize) -> Result<*mut u8, Error> {
        self.translate(bus).ok_or(Error::Allocation { size })
    }

    fn unmap(&mut self, _virt: *mut u8, _size: usize) {
        // the region's heap memory is freed by mem_free
    }
}

struct SendPtr(*mut u8);

// The pointer targets an anonymous register window that outlives the
// simulation thread; the wrapper exists only to cross the spawn.
unsafe impl Send for SendPtr {}

/// What the simulated engine did while walking a chain.
#[derive(Debug, Default)]
pub struct SimStats {
    /// Destination bus addresses of completed capture transfers, in
    /// execution order.
    pub capture_writes: Vec<u32>,
    /// Number of pacing words pushed into the PWM FIFO.
    pub paced_writes: usize,
}

/// The autonomous engine, played by a thread.
///
/// [`run`](Self::run) waits for the channel's run bit, walks the chain
/// from `CONBLK_AD`, performs every transfer, and on a zero next-block
/// address halts by clearing ACTIVE and raising END, the termination
/// the driver relies on. Each read of the GPIO level register
/// synthesizes the next value of a counter, so tests can verify
/// ordering from the captured data alone.
pub struct DmaEngineSim {
    mailbox: SimMailbox,
    dma_base: SendPtr,
    channel: usize,
}

impl DmaEngineSim {
    /// Attach the simulated engine to a channel of `dma_window`.
    ///
    /// `dma_window` is the same (anonymous) window the [`DmaChannel`]
    /// under test owns; the simulation watches it from the other side.
    ///
    /// [`DmaChannel`]: crate::DmaChannel
    pub fn new(mailbox: SimMailbox, dma_window: &RegisterWindow, channel: usize) -> Self {
        assert!(channel < dma::CHANNEL_COUNT);
        DmaEngineSim {
            mailbox,
            dma_base: SendPtr(dma_window.as_ptr()),
            channel,
        }
    }

    /// Run the engine on its own thread, the hardware side of the only
    /// true concurrency in this system.
    pub fn spawn(self) -> thread::JoinHandle<SimStats> {
        thread::spawn(move || self.run())
    }

    /// Wait for the run bit, walk the chain, halt. Returns what was
    /// transferred. Gives up after a few seconds if the channel never
    /// starts.
    pub fn run(self) -> SimStats {
        let mut stats = SimStats::default();
        // Safety: the window covers every channel in the block.
        let regs = unsafe {
            &*(self
                .dma_base
                .0
                .add(self.channel * dma::CHANNEL_STRIDE) as *const dma::RegisterBlock)
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while regs.CS.read() & dma::CS_ACTIVE == 0 {
            if Instant::now() >= deadline {
                return stats;
            }
            thread::sleep(Duration::from_micros(10));
        }

        let mut gpio_levels: u32 = 0;
        let mut cb_bus = regs.CONBLK_AD.read();
        while cb_bus != 0 {
            if regs.CS.read() & dma::CS_ACTIVE == 0 {
                // aborted underneath us; the channel owns CS now
                return stats;
            }
            let Some(cb_ptr) = self.mailbox.translate(cb_bus) else {
                return stats;
            };
            // Safety: control blocks are 32-byte aligned within their
            // region and the region is live while the chain runs.
            let cb = unsafe { ptr::read_volatile(cb_ptr as *const ControlBlock) };

            let value = if cb.src == ral::GPLEV0_BUS {
                let level = gpio_levels;
                gpio_levels += 1;
                level
            } else if let Some(src) = self.mailbox.translate(cb.src) {
                // Safety: translated pointer is word-aligned and live.
                unsafe { ptr::read_volatile(src as *const u32) }
            } else {
                0
            };

            if cb.dest == ral::PWM_FIFO_BUS {
                stats.paced_writes += 1;
            } else if let Some(dest) = self.mailbox.translate(cb.dest) {
                // Safety: translated pointer is word-aligned and live.
                unsafe { ptr::write_volatile(dest as *mut u32, value) };
                stats.capture_writes.push(cb.dest);
            }

            cb_bus = cb.next_cb;
        }

        // a zero next-block address halts the engine
        regs.CS
            .write((regs.CS.read() & !dma::CS_ACTIVE) | dma::CS_END);
        stats
    }
}
