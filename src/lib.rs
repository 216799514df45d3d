//! DMA-paced GPIO capture driver for BCM2835/BCM2711 processors
//!
//! `bcm-dma` drives one channel of the DMA engine found on Raspberry Pi
//! class single-board computers to snapshot the GPIO level register at
//! a programmable rate, with no CPU involvement while the capture runs.
//! It provides
//!
//! - firmware-mailbox allocation of the physically contiguous,
//!   non-cached memory the engine works in,
//! - construction of linked control-block chains, optionally paced by
//!   the PWM peripheral's DREQ signal,
//! - the clock-manager and PWM bring-up that turns a requested sample
//!   rate into hardware pacing, and
//! - the configure/start/stop lifecycle of the DMA channel itself.
//!
//! The sampling loop never executes on the host CPU: once started, the
//! engine walks the chain on its own, and the host simply sleeps out
//! the pre-computed capture window before stopping the channel.
//!
//! Trigger policy, command-line handling, and output serialization are
//! deliberately someone else's job; consumers receive the finished
//! sample words and the achieved rate and take it from there.
//!
//! # Portability
//!
//! The register map is selected at build time. The default targets the
//! BCM2711 (Raspberry Pi 4); the `rpi3` feature selects the
//! BCM2835/BCM2837 map. Running against real hardware requires access
//! to `/dev/mem` and `/dev/vcio`. Every register sequence also runs
//! unmodified against the in-process backends in [`sim`], which is how
//! this crate is tested off-target.
//!
//! ### License
//!
//! Licensed under either of
//!
//! - [Apache License, Version 2.0](http://www.apache.org/licenses/LICENSE-2.0) ([LICENSE-APACHE](./LICENSE-APACHE))
//! - [MIT License](http://opensource.org/licenses/MIT) ([LICENSE-MIT](./LICENSE-MIT))
//!
//! at your option.
//!
//! Unless you explicitly state otherwise, any contribution intentionally submitted
//! for inclusion in the work by you, as defined in the Apache-2.0 license, shall be
//! dual licensed as above, without any additional terms or conditions.

mod capture;
mod channel;
mod error;
mod mailbox;
mod mmap;
mod pacing;
pub mod ral;
mod ring;
pub mod sim;

pub use capture::{Capture, CaptureConfig, CaptureEngine};
pub use channel::{ChannelState, DmaChannel};
pub use error::Error;
pub use mailbox::{MailboxAllocator, MailboxInterface, PhysicalBuffer, VcioMailbox};
pub use mmap::RegisterWindow;
pub use pacing::{PacingClock, PacingConfig, CLOCK_DIVIDER};
pub use ring::{ControlBlock, ControlBlockRing, SAMPLE_WIDTH};

/// A driver result.
pub type Result<T> = core::result::Result<T, Error>;
