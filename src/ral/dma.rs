//! DMA controller registers.

#![allow(non_snake_case)]

use ral_registers::RWRegister;

/// DMA block offset from the peripheral base.
pub const OFFSET: u32 = 0x0000_7000;
/// Register-space stride between adjacent channels.
pub const CHANNEL_STRIDE: usize = 0x100;
/// Channels reachable through this block. Channel 15 is mapped at a
/// separate base and is not covered.
pub const CHANNEL_COUNT: usize = 15;
/// Bytes of register space covering every channel in the block.
pub const LEN: usize = CHANNEL_COUNT * CHANNEL_STRIDE;

/// Control and status registers of one DMA channel.
#[repr(C)]
pub struct RegisterBlock {
    /// Control and status.
    pub CS: RWRegister<u32>,
    /// Bus address of the control block being loaded.
    pub CONBLK_AD: RWRegister<u32>,
}

/// Writing 1 resets the channel.
pub const CS_RESET: u32 = 1 << 31;
/// Abort the control block currently being executed.
pub const CS_ABORT: u32 = 1 << 30;
/// Keep the debug pause signal from stalling the channel.
pub const CS_DISDEBUG: u32 = 1 << 29;
/// Wait for outstanding AXI write responses before continuing.
pub const CS_WAIT_FOR_OUTSTANDING_WRITES: u32 = 1 << 28;
/// Interrupt status; write 1 to clear.
pub const CS_INT: u32 = 1 << 2;
/// End-of-chain flag; write 1 to clear.
pub const CS_END: u32 = 1 << 1;
/// Run bit. The engine walks the chain while this is set.
pub const CS_ACTIVE: u32 = 1 << 0;

/// AXI priority of this channel's transactions.
pub const fn cs_priority(level: u32) -> u32 {
    level << 16
}

/// AXI priority while the panic signal is asserted.
pub const fn cs_panic_priority(level: u32) -> u32 {
    level << 20
}

/// Transfer-information flag: never issue wide bursts.
pub const TI_NO_WIDE_BURSTS: u32 = 1 << 26;
/// Transfer-information flag: gate writes on the mapped peripheral's
/// DREQ line.
pub const TI_DEST_DREQ: u32 = 1 << 6;
/// Transfer-information flag: wait for each write response before
/// proceeding.
pub const TI_WAIT_RESP: u32 = 1 << 3;

/// Route the numbered peripheral's DREQ onto this transfer.
pub const fn ti_permap(peripheral: u32) -> u32 {
    peripheral << 16
}
