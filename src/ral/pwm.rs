//! PWM peripheral registers.
//!
//! The PWM is used purely as a timing reference: its FIFO consumption
//! rate, set by the range register, paces the DMA chain through the
//! DREQ signal. No waveform ever leaves the chip.

#![allow(non_snake_case)]

use ral_registers::RWRegister;

/// PWM block offset from the peripheral base.
pub const OFFSET: u32 = 0x0020_C000;
/// Bytes of register space to map.
pub const LEN: usize = 0x28;
/// Offset of the FIFO input register within the block.
pub const FIF1_OFFSET: u32 = 0x18;
/// DREQ peripheral-mapping number of the PWM.
pub const DREQ_PERMAP: u32 = 5;

/// The PWM register block.
#[repr(C)]
pub struct RegisterBlock {
    /// Control.
    pub CTL: RWRegister<u32>,
    /// Status; write 1 to clear.
    pub STA: RWRegister<u32>,
    /// DMA configuration.
    pub DMAC: RWRegister<u32>,
    _reserved0: [u32; 1],
    /// Channel 1 range.
    pub RNG1: RWRegister<u32>,
    /// Channel 1 data.
    pub DAT1: RWRegister<u32>,
    /// FIFO input.
    pub FIF1: RWRegister<u32>,
    _reserved1: [u32; 1],
    /// Channel 2 range.
    pub RNG2: RWRegister<u32>,
    /// Channel 2 data.
    pub DAT2: RWRegister<u32>,
}

/// Clear the channel 1 FIFO.
pub const CTL_CLRF1: u32 = 1 << 6;
/// Feed channel 1 from the FIFO.
pub const CTL_USEF1: u32 = 1 << 5;
/// Serializer mode for channel 1.
pub const CTL_MODE1: u32 = 1 << 1;
/// Enable channel 1.
pub const CTL_PWEN1: u32 = 1 << 0;

/// Master DMA enable.
pub const DMAC_ENAB: u32 = 1 << 31;

/// Panic threshold field of the DMA configuration register.
pub const fn dmac_panic(threshold: u32) -> u32 {
    threshold << 8
}

/// DREQ threshold field of the DMA configuration register.
pub const fn dmac_dreq(threshold: u32) -> u32 {
    threshold
}
