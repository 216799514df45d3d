//! Capture sessions.
//!
//! One session runs the strict operation order the hardware demands:
//! allocate memory, build the chain, bring up pacing, configure the
//! channel, start, sleep out the capture window, stop, and only then
//! release the memory. The sampling itself never executes on the host
//! CPU: between start and stop, the engine is on its own.

use std::thread;
use std::time::Duration;

use crate::channel::DmaChannel;
use crate::error::Error;
use crate::mailbox::{MailboxAllocator, MailboxInterface, VcioMailbox};
use crate::mmap::RegisterWindow;
use crate::pacing::{PacingClock, PacingConfig};
use crate::ral::{clock, dma, pwm};
use crate::ring::{ControlBlockRing, SAMPLE_WIDTH};

/// Immutable description of one capture request.
#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    /// Number of level snapshots to take.
    pub sample_count: usize,
    /// Requested sample rate. Zero runs the chain free, unpaced, at
    /// whatever rate the bus sustains.
    pub sample_rate_hz: u32,
}

/// A finished capture.
#[derive(Debug, Clone)]
pub struct Capture {
    /// Exactly `sample_count` level snapshots, in capture order.
    pub samples: Vec<u32>,
    /// The paced rate after quantization, or 0 for a free-running
    /// capture.
    pub effective_rate_hz: u32,
}

/// Assumed worst-case rate of a free-running chain, used only to size
/// the wait for unpaced captures. Deliberately below what the bus
/// achieves, so the wait always covers the chain.
const FREE_RUN_RATE_HZ: u32 = 1_000_000;

/// Fixed margin added to every capture wait. Covers pacing bring-up
/// and the latency between setting the run bit and the engine's first
/// fetch.
const WAIT_MARGIN: Duration = Duration::from_millis(2);

/// The capture engine: allocator, channel, and pacing clock, in one
/// place and driven by one thread.
///
/// The control plane is strictly single-threaded; the only concurrent
/// actor is the hardware engine itself once `start` has run, which is
/// the entire point of the design.
pub struct CaptureEngine<M: MailboxInterface> {
    allocator: MailboxAllocator<M>,
    channel: DmaChannel,
    pacing: PacingClock,
}

impl CaptureEngine<VcioMailbox> {
    /// Map the real peripheral windows and claim DMA channel
    /// `channel_index`.
    ///
    /// Any mapping failure is fatal for the caller: without register
    /// access there is nothing this driver can do.
    pub fn open(channel_index: usize) -> Result<Self, Error> {
        let dma_window = RegisterWindow::map(dma::OFFSET, dma::LEN)?;
        let clock_window = RegisterWindow::map(clock::OFFSET, clock::LEN)?;
        let pwm_window = RegisterWindow::map(pwm::OFFSET, pwm::LEN)?;
        Ok(CaptureEngine {
            allocator: MailboxAllocator::new(),
            channel: DmaChannel::new(dma_window, channel_index),
            pacing: PacingClock::new(clock_window, pwm_window),
        })
    }
}

impl<M: MailboxInterface> CaptureEngine<M> {
    /// Assemble an engine from explicitly provided parts.
    ///
    /// This is the seam the simulated backend plugs into;
    /// [`open`](CaptureEngine::open) wires the same parts to real
    /// hardware.
    pub fn from_parts(
        allocator: MailboxAllocator<M>,
        channel: DmaChannel,
        pacing: PacingClock,
    ) -> Self {
        CaptureEngine {
            allocator,
            channel,
            pacing,
        }
    }

    /// Borrow the channel, e.g. to inspect its lifecycle state.
    pub fn channel(&self) -> &DmaChannel {
        &self.channel
    }

    /// Run one capture to completion.
    ///
    /// Derives pacing, reserves memory, builds and arms the chain,
    /// starts the engine, sleeps out the pre-computed capture window,
    /// then stops unconditionally and releases every buffer, in that
    /// order, always. There is no completion interrupt in this design;
    /// a capture that outruns its window is truncated silently.
    pub fn capture(&mut self, config: &CaptureConfig) -> Result<Capture, Error> {
        // reject impossible requests before touching firmware or
        // hardware
        if config.sample_count == 0 {
            return Err(Error::InvalidConfiguration("sample count is zero"));
        }
        let pacing_config = PacingConfig::derive(config.sample_rate_hz)?;
        let effective_rate_hz = pacing_config.map_or(0, |c| c.effective_rate_hz);

        let mut samples = self.allocator.allocate(config.sample_count * SAMPLE_WIDTH)?;
        let mut ring = match ControlBlockRing::build(
            &mut self.allocator,
            &samples,
            config.sample_count,
            pacing_config.is_some(),
        ) {
            Ok(ring) => ring,
            Err(err) => {
                // the build error is the interesting one; the sample
                // buffer goes back on a best-effort basis
                let _ = self.allocator.release(&mut samples);
                return Err(err);
            }
        };

        if let Some(pacing) = &pacing_config {
            self.pacing.configure(pacing);
        }

        let window = capture_window(config.sample_count, effective_rate_hz);
        log::info!(
            "capturing {} samples at {} Hz effective ({} control blocks, {:?} window)",
            config.sample_count,
            effective_rate_hz,
            ring.len(),
            window
        );

        self.channel.configure(ring.head_bus_addr())?;
        self.channel.start()?;
        thread::sleep(window);
        self.channel.stop()?;

        // the engine has halted: read the samples out, then hand the
        // memory back
        let words = samples.read_words(config.sample_count);
        self.allocator.release(&mut samples)?;
        ring.release(&mut self.allocator)?;

        Ok(Capture {
            samples: words,
            effective_rate_hz,
        })
    }
}

/// The fixed wait for a capture: sample count over the paced (or
/// assumed) rate, plus a small margin.
fn capture_window(sample_count: usize, effective_rate_hz: u32) -> Duration {
    let rate = if effective_rate_hz == 0 {
        FREE_RUN_RATE_HZ
    } else {
        effective_rate_hz
    };
    let micros = (sample_count as u64).saturating_mul(1_000_000) / u64::from(rate);
    Duration::from_micros(micros) + WAIT_MARGIN
}

#[cfg(test)]
mod tests {
    use super::{capture_window, WAIT_MARGIN};
    use std::time::Duration;

    #[test]
    fn window_covers_the_sample_train() {
        assert_eq!(
            capture_window(1000, 1_000_000),
            Duration::from_millis(1) + WAIT_MARGIN
        );
        assert_eq!(
            capture_window(5, 1_000),
            Duration::from_millis(5) + WAIT_MARGIN
        );
    }

    #[test]
    fn free_running_window_uses_the_conservative_rate() {
        assert_eq!(
            capture_window(64, 0),
            Duration::from_micros(64) + WAIT_MARGIN
        );
    }
}
