//! Register-level definitions for the capture peripherals.
//!
//! One module per peripheral block, following the BCM2835 ARM
//! Peripherals datasheet and the BCM2711 addendum. Register blocks are
//! `#[repr(C)]` structs of [`ral_registers::RWRegister`] fields; they
//! are never constructed, only obtained by casting the base of a mapped
//! [`RegisterWindow`](crate::RegisterWindow).

pub mod clock;
pub mod dma;
pub mod pwm;

/// Size of one firmware-granted memory page.
pub const PAGE_SIZE: usize = 4096;

/// Peripheral base as the DMA engine sees it (bus address space).
pub const PERI_BUS_BASE: u32 = 0x7E00_0000;

#[cfg(feature = "rpi3")]
mod map {
    /// Peripheral base in the ARM physical address space (BCM2835/BCM2837).
    pub const PERI_PHYS_BASE: u32 = 0x3F00_0000;
    /// PLLD core frequency the pacing clock divides down from.
    pub const CLK_PLLD_FREQ: u32 = 500_000_000;

    /// Translate a firmware bus address into an ARM physical address.
    pub const fn bus_to_phys(bus: u32) -> u32 {
        bus & !0xC000_0000
    }
}

#[cfg(not(feature = "rpi3"))]
mod map {
    /// Peripheral base in the ARM physical address space (BCM2711).
    pub const PERI_PHYS_BASE: u32 = 0xFE00_0000;
    /// PLLD core frequency the pacing clock divides down from.
    pub const CLK_PLLD_FREQ: u32 = 750_000_000;

    /// Translate a firmware bus address into an ARM physical address.
    pub const fn bus_to_phys(bus: u32) -> u32 {
        bus.wrapping_add(0x8000_0000)
    }
}

pub use map::{bus_to_phys, CLK_PLLD_FREQ, PERI_PHYS_BASE};

/// GPIO block offset from the peripheral base.
pub const GPIO_OFFSET: u32 = 0x0020_0000;
/// Pin level register for GPIO 0-31, relative to the GPIO block.
pub const GPLEV0_OFFSET: u32 = 0x34;

/// Bus address of the GPIO level register; the source of every capture
/// transfer.
pub const GPLEV0_BUS: u32 = PERI_BUS_BASE + GPIO_OFFSET + GPLEV0_OFFSET;

/// Bus address of the PWM FIFO; the destination of every pacing
/// transfer.
pub const PWM_FIFO_BUS: u32 = PERI_BUS_BASE + pwm::OFFSET + pwm::FIF1_OFFSET;
