//! Control-block chains.
//!
//! The engine executes a linked list of fixed-layout control blocks,
//! each describing one transfer and the bus address of its successor.
//! A capture chain reads the GPIO level register into consecutive
//! sample slots; a paced chain interleaves, after every capture, a
//! FIFO write that stalls on the PWM DREQ line until the pacing clock
//! consumes the next word.

use std::mem;
use std::ptr;

use crate::error::Error;
use crate::mailbox::{MailboxAllocator, MailboxInterface, PhysicalBuffer};
use crate::ral::{self, dma, pwm};

/// Width of one capture snapshot: the 32-bit GPIO level word.
pub const SAMPLE_WIDTH: usize = mem::size_of::<u32>();

const CB_BYTES: usize = mem::size_of::<ControlBlock>();

/// One DMA control block, laid out exactly as the engine reads it.
///
/// Control blocks live in firmware-granted memory and are addressed by
/// the engine exclusively through bus addresses. From the moment the
/// chain is armed until the channel has stopped, they are immutable.
#[repr(C, align(32))]
#[derive(Debug, Clone, Copy)]
pub struct ControlBlock {
    /// Transfer information flags.
    pub transfer_info: u32,
    /// Source bus address.
    pub src: u32,
    /// Destination bus address.
    pub dest: u32,
    /// Transfer length in bytes.
    pub length: u32,
    /// 2D stride; unused by capture chains.
    pub stride: u32,
    /// Bus address of the next control block, or 0 to halt.
    pub next_cb: u32,
    /// Padding to the 32-byte block the engine expects.
    pub reserved: [u32; 2],
}

impl ControlBlock {
    /// `true` when this block stalls on the PWM transfer-request line.
    pub fn is_paced(&self) -> bool {
        self.transfer_info & dma::TI_DEST_DREQ != 0
    }
}

/// A built, engine-ready chain and the firmware memory holding it.
///
/// The ring owns its descriptor buffer; the sample buffer the chain
/// writes into stays with the caller. Neither may be released while a
/// channel armed with this chain has not been stopped.
#[derive(Debug)]
pub struct ControlBlockRing {
    buffer: PhysicalBuffer,
    count: usize,
}

impl ControlBlockRing {
    /// Lay out and link the chain for `sample_count` snapshots into
    /// `samples`.
    ///
    /// With pacing, every capture block is followed by a DREQ-gated
    /// write to the PWM FIFO, doubling the block count. The pacing
    /// write takes its (meaningless) source word from a dedicated
    /// scratch slot at the tail of the descriptor buffer.
    ///
    /// The request is validated before any firmware memory is touched;
    /// a zero `sample_count` never allocates.
    ///
    /// The final block's successor address is zero: the engine halts
    /// and clears its active bit after the last transfer instead of
    /// running off the end of the array.
    pub fn build<M: MailboxInterface>(
        allocator: &mut MailboxAllocator<M>,
        samples: &PhysicalBuffer,
        sample_count: usize,
        pacing: bool,
    ) -> Result<Self, Error> {
        if sample_count == 0 {
            return Err(Error::InvalidConfiguration("sample count is zero"));
        }
        if samples.len() < sample_count * SAMPLE_WIDTH {
            return Err(Error::InvalidConfiguration(
                "sample buffer shorter than the requested sample count",
            ));
        }

        let count = if pacing { 2 * sample_count } else { sample_count };
        // one scratch word past the blocks feeds the pacing writes
        let buffer = allocator.allocate(count * CB_BYTES + SAMPLE_WIDTH)?;
        let scratch_bus = buffer.bus_addr_at(count, CB_BYTES);
        let blocks = buffer.as_mut_ptr() as *mut ControlBlock;

        let link = |index: usize| {
            if index + 1 == count {
                0
            } else {
                buffer.bus_addr_at(index + 1, CB_BYTES)
            }
        };

        let mut index = 0;
        for slot in 0..sample_count {
            let capture = ControlBlock {
                transfer_info: dma::TI_NO_WIDE_BURSTS | dma::TI_WAIT_RESP,
                src: ral::GPLEV0_BUS,
                dest: samples.bus_addr_at(slot, SAMPLE_WIDTH),
                length: SAMPLE_WIDTH as u32,
                stride: 0,
                next_cb: link(index),
                reserved: [0; 2],
            };
            // Safety: index < count and the buffer holds count blocks.
            unsafe { ptr::write_volatile(blocks.add(index), capture) };
            index += 1;

            if pacing {
                let pace = ControlBlock {
                    transfer_info: dma::TI_NO_WIDE_BURSTS
                        | dma::TI_WAIT_RESP
                        | dma::TI_DEST_DREQ
                        | dma::ti_permap(pwm::DREQ_PERMAP),
                    src: scratch_bus,
                    dest: ral::PWM_FIFO_BUS,
                    length: SAMPLE_WIDTH as u32,
                    stride: 0,
                    next_cb: link(index),
                    reserved: [0; 2],
                };
                // Safety: index < count, as above.
                unsafe { ptr::write_volatile(blocks.add(index), pace) };
                index += 1;
            }
        }

        log::debug!(
            "chain built: {count} control blocks for {sample_count} samples (paced: {pacing})"
        );
        Ok(ControlBlockRing { buffer, count })
    }

    /// Bus address of the first block; what the channel gets armed with.
    pub fn head_bus_addr(&self) -> u32 {
        self.buffer.bus_addr()
    }

    /// Number of control blocks in the chain.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Bus address of block `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn block_bus_addr(&self, index: usize) -> u32 {
        assert!(index < self.count);
        self.buffer.bus_addr_at(index, CB_BYTES)
    }

    /// Snapshot of block `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range or the ring has been released.
    pub fn control_block(&self, index: usize) -> ControlBlock {
        assert!(index < self.count);
        assert!(!self.buffer.is_released(), "ring already released");
        // Safety: index is in range and the backing buffer is live.
        unsafe { ptr::read_volatile((self.buffer.as_mut_ptr() as *const ControlBlock).add(index)) }
    }

    /// `true` once the descriptor memory has been handed back.
    pub fn is_released(&self) -> bool {
        self.buffer.is_released()
    }

    /// Hand the descriptor memory back to the firmware.
    ///
    /// Only sound once the channel armed with this chain has stopped.
    /// Releasing twice is a no-op.
    pub fn release<M: MailboxInterface>(
        &mut self,
        allocator: &mut MailboxAllocator<M>,
    ) -> Result<(), Error> {
        allocator.release(&mut self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::{ControlBlockRing, CB_BYTES, SAMPLE_WIDTH};
    use crate::error::Error;
    use crate::mailbox::MailboxAllocator;
    use crate::ral::{self, dma, pwm};
    use crate::sim::SimMailbox;

    #[test]
    fn unpaced_chain_has_one_linked_block_per_sample() {
        let mut allocator = MailboxAllocator::with_interface(SimMailbox::new());
        let samples = allocator.allocate(8 * SAMPLE_WIDTH).unwrap();
        let mut ring = ControlBlockRing::build(&mut allocator, &samples, 8, false).unwrap();

        assert_eq!(ring.len(), 8);
        for i in 0..8 {
            let cb = ring.control_block(i);
            assert_eq!(cb.src, ral::GPLEV0_BUS);
            assert_eq!(cb.dest, samples.bus_addr() + (i * SAMPLE_WIDTH) as u32);
            assert_eq!(cb.length, SAMPLE_WIDTH as u32);
            assert!(!cb.is_paced());
            if i + 1 < 8 {
                assert_eq!(cb.next_cb, ring.block_bus_addr(i + 1));
            } else {
                assert_eq!(cb.next_cb, 0);
            }
        }

        let mut samples = samples;
        ring.release(&mut allocator).unwrap();
        allocator.release(&mut samples).unwrap();
    }

    #[test]
    fn paced_chain_alternates_capture_and_pacing_blocks() {
        let mut allocator = MailboxAllocator::with_interface(SimMailbox::new());
        let mut samples = allocator.allocate(5 * SAMPLE_WIDTH).unwrap();
        let mut ring = ControlBlockRing::build(&mut allocator, &samples, 5, true).unwrap();

        assert_eq!(ring.len(), 10);
        let scratch_bus = ring.head_bus_addr() + (ring.len() * CB_BYTES) as u32;
        for i in 0..10 {
            let cb = ring.control_block(i);
            if i % 2 == 0 {
                assert!(!cb.is_paced(), "block {i} should capture");
                assert_eq!(cb.src, ral::GPLEV0_BUS);
            } else {
                assert!(cb.is_paced(), "block {i} should pace");
                assert_eq!(cb.dest, ral::PWM_FIFO_BUS);
                assert_eq!(cb.src, scratch_bus);
                assert_ne!(
                    cb.transfer_info & dma::ti_permap(pwm::DREQ_PERMAP),
                    0
                );
            }
        }
        assert_eq!(ring.control_block(9).next_cb, 0);

        ring.release(&mut allocator).unwrap();
        allocator.release(&mut samples).unwrap();
    }

    #[test]
    fn zero_samples_rejected_before_any_allocation() {
        let mailbox = SimMailbox::new();
        let mut allocator = MailboxAllocator::with_interface(mailbox.clone());
        let mut samples = allocator.allocate(SAMPLE_WIDTH).unwrap();
        assert_eq!(mailbox.live_regions(), 1);

        let err = ControlBlockRing::build(&mut allocator, &samples, 0, false).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
        // no partial allocation happened
        assert_eq!(mailbox.live_regions(), 1);

        allocator.release(&mut samples).unwrap();
    }

    #[test]
    fn undersized_sample_buffer_is_rejected() {
        let mut allocator = MailboxAllocator::with_interface(SimMailbox::new());
        let mut samples = allocator.allocate(SAMPLE_WIDTH).unwrap();
        // a page holds 1024 slots; ask for more
        let err = ControlBlockRing::build(&mut allocator, &samples, 2000, false).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
        allocator.release(&mut samples).unwrap();
    }
}
