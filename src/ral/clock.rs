//! Clock manager registers for the PWM clock domain.

#![allow(non_snake_case)]

use ral_registers::RWRegister;

/// Clock manager block offset from the peripheral base.
pub const OFFSET: u32 = 0x0010_1000;
/// Bytes of register space to map.
pub const LEN: usize = 0xA8;
/// Offset of the PWM clock's control/divider pair within the block.
pub const PWM_CLOCK_OFFSET: usize = 0xA0;

/// Control and divider registers of one clock generator.
#[repr(C)]
pub struct RegisterBlock {
    /// Control.
    pub CTL: RWRegister<u32>,
    /// Divider.
    pub DIV: RWRegister<u32>,
}

/// Password gate; required in the top byte of every write.
pub const PASSWD: u32 = 0x5A << 24;
/// The generator is running.
pub const CTL_BUSY: u32 = 1 << 7;
/// Stop the generator immediately.
pub const CTL_KILL: u32 = 1 << 5;
/// Enable the generator.
pub const CTL_ENAB: u32 = 1 << 4;
/// Source select: PLLD.
pub const CTL_SRC_PLLD: u32 = 6;
/// Position of the integer divider field.
pub const DIV_DIVI_SHIFT: u32 = 12;
