//! DMA channel lifecycle.

use std::sync::atomic::{compiler_fence, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::Error;
use crate::mmap::RegisterWindow;
use crate::ral::dma;

/// Lifecycle state of a [`DmaChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No chain armed. The only state that accepts `configure`.
    Idle,
    /// A chain head is recorded and the channel registers are reset.
    Configured,
    /// The engine is walking the chain on its own.
    Active,
}

/// Delay after the abort and reset writes while the engine winds down.
const STOP_SETTLE: Duration = Duration::from_micros(100);

/// One physical DMA channel and its control/status registers.
///
/// Exactly one value exists per channel, owning the channel's register
/// window. The whole configure/start/stop lifecycle goes through it;
/// out-of-order calls are refused with [`Error::InvalidState`] instead
/// of corrupting an engine that may be running.
pub struct DmaChannel {
    window: RegisterWindow,
    index: usize,
    state: ChannelState,
    chain_head: u32,
}

impl DmaChannel {
    /// Take ownership of channel `index` within the mapped DMA block.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below [`dma::CHANNEL_COUNT`]. Channel
    /// 15 lives at a separate base address and is not reachable through
    /// this window.
    pub fn new(window: RegisterWindow, index: usize) -> Self {
        assert!(
            index < dma::CHANNEL_COUNT,
            "DMA channel index {index} exceeds CHANNEL_COUNT"
        );
        DmaChannel {
            window,
            index,
            state: ChannelState::Idle,
            chain_head: 0,
        }
    }

    /// The channel number within the DMA block.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    fn registers(&self) -> &dma::RegisterBlock {
        self.window.instance(self.index * dma::CHANNEL_STRIDE)
    }

    fn expect(&self, expected: ChannelState) -> Result<(), Error> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                expected,
                found: self.state,
            })
        }
    }

    /// Reset the channel and record the chain to run.
    ///
    /// Valid from `Idle` only. Aborts and resets the engine and clears
    /// the interrupt and end flags; the run bit stays clear until
    /// [`start`](Self::start).
    pub fn configure(&mut self, chain_head_bus_addr: u32) -> Result<(), Error> {
        self.expect(ChannelState::Idle)?;
        let regs = self.registers();
        regs.CS.write(dma::CS_ABORT);
        regs.CS.write(0);
        regs.CS.write(dma::CS_RESET);
        regs.CONBLK_AD.write(0);
        // INT and END are write-one-to-clear
        regs.CS.write(dma::CS_INT | dma::CS_END);
        self.chain_head = chain_head_bus_addr;
        self.state = ChannelState::Configured;
        Ok(())
    }

    /// Arm the recorded chain head and set the engine running.
    ///
    /// Valid from `Configured` only; a second `start` without an
    /// intervening [`stop`](Self::stop) is refused, never absorbed.
    /// Once the run bit is set, the hardware walks the chain with no
    /// further software involvement.
    pub fn start(&mut self) -> Result<(), Error> {
        self.expect(ChannelState::Configured)?;
        let regs = self.registers();
        regs.CONBLK_AD.write(self.chain_head);
        regs.CS
            .write(dma::cs_priority(8) | dma::cs_panic_priority(8) | dma::CS_DISDEBUG);
        // Everything the chain references must be in memory before the
        // engine can observe the run bit.
        compiler_fence(Ordering::Release);
        regs.CS
            .write(regs.CS.read() | dma::CS_WAIT_FOR_OUTSTANDING_WRITES | dma::CS_ACTIVE);
        self.state = ChannelState::Active;
        log::info!(
            "channel {}: chain armed at {:#010x}, engine running",
            self.index,
            self.chain_head
        );
        Ok(())
    }

    /// Halt the engine and return the channel to `Idle`.
    ///
    /// Valid from `Configured` or `Active`. Aborts the current block,
    /// clears the run bit, then resets the channel, settling after each
    /// step. Every buffer the chain references must stay allocated
    /// until this returns; releasing memory the engine may still
    /// address is a memory-safety violation, not a logic bug.
    pub fn stop(&mut self) -> Result<(), Error> {
        if self.state == ChannelState::Idle {
            return Err(Error::InvalidState {
                expected: ChannelState::Active,
                found: self.state,
            });
        }
        let regs = self.registers();
        regs.CS.write(regs.CS.read() | dma::CS_ABORT);
        thread::sleep(STOP_SETTLE);
        regs.CS.write(regs.CS.read() & !dma::CS_ACTIVE);
        regs.CS.write(regs.CS.read() | dma::CS_RESET);
        thread::sleep(STOP_SETTLE);
        // No reads of chain memory may be hoisted above the shutdown.
        compiler_fence(Ordering::Acquire);
        self.state = ChannelState::Idle;
        self.chain_head = 0;
        log::info!("channel {}: engine stopped", self.index);
        Ok(())
    }

    /// `true` while the hardware reports the run bit set.
    ///
    /// Observability only; the lifecycle is driven by the fixed capture
    /// window, not by polling this.
    pub fn is_engine_active(&self) -> bool {
        self.registers().CS.read() & dma::CS_ACTIVE != 0
    }
}

// A channel can move to another execution context. It cannot be cloned,
// so the registers are never mutably shared.
unsafe impl Send for DmaChannel {}

#[cfg(test)]
mod tests {
    use super::{ChannelState, DmaChannel};
    use crate::error::Error;
    use crate::mmap::RegisterWindow;
    use crate::ral::dma;

    fn channel(index: usize) -> DmaChannel {
        let window = RegisterWindow::anonymous(dma::LEN).unwrap();
        DmaChannel::new(window, index)
    }

    #[test]
    fn start_from_idle_is_refused() {
        let mut chan = channel(9);
        let err = chan.start().unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                expected: ChannelState::Configured,
                found: ChannelState::Idle,
            }
        ));
    }

    #[test]
    fn double_start_is_refused() {
        let mut chan = channel(9);
        chan.configure(0xC000_1000).unwrap();
        chan.start().unwrap();
        let err = chan.start().unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                found: ChannelState::Active,
                ..
            }
        ));
    }

    #[test]
    fn configure_requires_idle() {
        let mut chan = channel(3);
        chan.configure(0xC000_1000).unwrap();
        let err = chan.configure(0xC000_2000).unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[test]
    fn stop_from_idle_is_refused() {
        let mut chan = channel(0);
        assert!(matches!(chan.stop(), Err(Error::InvalidState { .. })));
    }

    #[test]
    fn stop_from_configured_is_allowed() {
        let mut chan = channel(1);
        chan.configure(0xC000_3000).unwrap();
        chan.stop().unwrap();
        assert_eq!(chan.state(), ChannelState::Idle);
    }

    #[test]
    fn lifecycle_programs_the_head_and_returns_to_idle() {
        let mut chan = channel(9);
        let window_base = {
            // peek at the same memory the channel writes through
            let regs = chan.registers();
            regs as *const dma::RegisterBlock
        };

        chan.configure(0xC000_1000).unwrap();
        assert_eq!(chan.state(), ChannelState::Configured);

        chan.start().unwrap();
        assert_eq!(chan.state(), ChannelState::Active);
        let regs = unsafe { &*window_base };
        assert_eq!(regs.CONBLK_AD.read(), 0xC000_1000);
        assert!(chan.is_engine_active());

        chan.stop().unwrap();
        assert_eq!(chan.state(), ChannelState::Idle);
        assert!(!chan.is_engine_active());
    }
}
