//! Sample-rate pacing through the PWM clock.
//!
//! An unpaced chain captures as fast as the bus allows. To hit a
//! requested rate, the PWM peripheral is set up as a pure timing
//! reference: its clock is divided down from PLLD, its range register
//! fixes the FIFO consumption interval, and the chain's pacing blocks
//! stall on the PWM DREQ line until the next word is consumed.

use std::thread;
use std::time::Duration;

use crate::error::Error;
use crate::mmap::RegisterWindow;
use crate::ral::{clock, pwm, CLK_PLLD_FREQ};

/// Fixed divider applied to PLLD ahead of the PWM. 750 MHz / 10 leaves
/// a 75 MHz pacing clock (500 MHz / 10 = 50 MHz on the Pi 3 map).
pub const CLOCK_DIVIDER: u32 = 10;

/// Settle time after each register write during bring-up.
const SETTLE: Duration = Duration::from_micros(10);
/// Gap at the end of each bring-up stage.
const STAGE_SETTLE: Duration = Duration::from_micros(100);

/// Pacing parameters, derived once per capture request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingConfig {
    /// Divider applied to PLLD ahead of the PWM peripheral.
    pub clock_divider: u32,
    /// PWM range: pacing-clock ticks per consumed FIFO word.
    pub pwm_range: u32,
    /// The rate the hardware will pace at, after integer quantization.
    pub effective_rate_hz: u32,
}

impl PacingConfig {
    /// Derive the divider/range pair for `rate_hz`.
    ///
    /// A rate of zero disables pacing entirely and yields `None`: the
    /// capture runs free. Rates above the post-divide pacing clock
    /// cannot be produced and are rejected before anything is touched.
    pub fn derive(rate_hz: u32) -> Result<Option<PacingConfig>, Error> {
        if rate_hz == 0 {
            return Ok(None);
        }
        let pacing_clock = CLK_PLLD_FREQ / CLOCK_DIVIDER;
        if rate_hz > pacing_clock {
            return Err(Error::InvalidConfiguration(
                "sample rate exceeds the pacing clock",
            ));
        }
        let pwm_range = div_round(pacing_clock, rate_hz).max(1);
        Ok(Some(PacingConfig {
            clock_divider: CLOCK_DIVIDER,
            pwm_range,
            effective_rate_hz: div_round(pacing_clock, pwm_range),
        }))
    }
}

const fn div_round(n: u32, d: u32) -> u32 {
    (n + d / 2) / d
}

/// One bring-up step: a register, the value to write, and the settle
/// delay the datasheet asks for before the next access.
struct Step {
    reg: Reg,
    value: u32,
    settle: Duration,
}

/// Register selector for [`Step`]. The two peripherals live behind
/// separate windows, so a plain offset would not do.
#[derive(Clone, Copy)]
enum Reg {
    ClockCtl,
    ClockDiv,
    PwmCtl,
    PwmSta,
    PwmDmac,
    PwmRng1,
}

/// Owns the clock-manager and PWM register windows and programs the
/// pacing described by a [`PacingConfig`].
pub struct PacingClock {
    clock: RegisterWindow,
    pwm: RegisterWindow,
}

impl PacingClock {
    /// `clock` must map the clock-manager block, `pwm` the PWM block.
    pub fn new(clock: RegisterWindow, pwm: RegisterWindow) -> Self {
        PacingClock { clock, pwm }
    }

    fn clock_regs(&self) -> &clock::RegisterBlock {
        self.clock.instance(clock::PWM_CLOCK_OFFSET)
    }

    fn pwm_regs(&self) -> &pwm::RegisterBlock {
        self.pwm.instance(0)
    }

    /// Program the pacing clock and the PWM timing reference.
    ///
    /// A blocking bring-up bounded to a few hundred microseconds of
    /// fixed settle delays; each write-then-wait step matches the
    /// documented hardware settle requirements. Not a candidate for
    /// concurrent execution.
    pub fn configure(&mut self, config: &PacingConfig) {
        self.kill_clock();
        self.apply(&Self::clock_steps(config));
        self.apply(&Self::pwm_steps(config));
        log::debug!(
            "pacing clock up: divider {}, range {}, {} Hz effective",
            config.clock_divider,
            config.pwm_range,
            config.effective_rate_hz
        );
    }

    /// Stop a busy clock generator before reprogramming it.
    ///
    /// The loop waits for a documented precondition (BUSY must drop
    /// after KILL); it is not an error-recovery retry.
    fn kill_clock(&self) {
        let regs = self.clock_regs();
        while regs.CTL.read() & clock::CTL_BUSY != 0 {
            regs.CTL.write(clock::PASSWD | clock::CTL_KILL);
        }
    }

    fn clock_steps(config: &PacingConfig) -> [Step; 3] {
        [
            // source the PWM clock from PLLD
            Step {
                reg: Reg::ClockCtl,
                value: clock::PASSWD | clock::CTL_SRC_PLLD,
                settle: SETTLE,
            },
            Step {
                reg: Reg::ClockDiv,
                value: clock::PASSWD | (config.clock_divider << clock::DIV_DIVI_SHIFT),
                settle: SETTLE,
            },
            // enable, keeping the source field programmed above
            Step {
                reg: Reg::ClockCtl,
                value: clock::PASSWD | clock::CTL_SRC_PLLD | clock::CTL_ENAB,
                settle: STAGE_SETTLE,
            },
        ]
    }

    fn pwm_steps(config: &PacingConfig) -> [Step; 6] {
        [
            Step {
                reg: Reg::PwmCtl,
                value: 0,
                settle: SETTLE,
            },
            // status bits are write-one-to-clear
            Step {
                reg: Reg::PwmSta,
                value: u32::MAX,
                settle: SETTLE,
            },
            Step {
                reg: Reg::PwmRng1,
                value: config.pwm_range,
                settle: SETTLE,
            },
            // DMA pacing on, panic and DREQ thresholds at their ceiling
            Step {
                reg: Reg::PwmDmac,
                value: pwm::DMAC_ENAB | pwm::dmac_panic(15) | pwm::dmac_dreq(15),
                settle: SETTLE,
            },
            Step {
                reg: Reg::PwmCtl,
                value: pwm::CTL_CLRF1,
                settle: SETTLE,
            },
            // channel 1 on, fed from the FIFO
            Step {
                reg: Reg::PwmCtl,
                value: pwm::CTL_USEF1 | pwm::CTL_MODE1 | pwm::CTL_PWEN1,
                settle: STAGE_SETTLE,
            },
        ]
    }

    /// Apply an ordered bring-up sequence, settling after each write.
    fn apply(&self, steps: &[Step]) {
        for step in steps {
            match step.reg {
                Reg::ClockCtl => self.clock_regs().CTL.write(step.value),
                Reg::ClockDiv => self.clock_regs().DIV.write(step.value),
                Reg::PwmCtl => self.pwm_regs().CTL.write(step.value),
                Reg::PwmSta => self.pwm_regs().STA.write(step.value),
                Reg::PwmDmac => self.pwm_regs().DMAC.write(step.value),
                Reg::PwmRng1 => self.pwm_regs().RNG1.write(step.value),
            }
            thread::sleep(step.settle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PacingClock, PacingConfig, CLOCK_DIVIDER};
    use crate::error::Error;
    use crate::mmap::RegisterWindow;
    use crate::ral::{clock, pwm, CLK_PLLD_FREQ};

    #[test]
    fn zero_rate_disables_pacing() {
        assert!(PacingConfig::derive(0).unwrap().is_none());
    }

    #[test]
    fn rates_beyond_the_pacing_clock_are_rejected() {
        let err = PacingConfig::derive(80_000_000).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn quantized_rates_stay_within_tolerance() {
        for rate in [1_000u32, 10_000, 100_000, 250_000, 1_000_000, 2_000_000, 5_000_000] {
            let config = PacingConfig::derive(rate).unwrap().unwrap();
            assert!(config.pwm_range >= 1);
            let relative = (f64::from(config.effective_rate_hz) - f64::from(rate)).abs()
                / f64::from(rate);
            assert!(
                relative < 0.05,
                "{rate} Hz quantized to {} Hz ({relative:.4} off)",
                config.effective_rate_hz
            );
            // divider * range reproduces the oscillator ratio within
            // integer rounding
            let ratio = u64::from(config.clock_divider) * u64::from(config.pwm_range);
            let ideal = u64::from(CLK_PLLD_FREQ / rate);
            assert!(ratio.abs_diff(ideal) <= u64::from(CLOCK_DIVIDER));
        }
    }

    #[test]
    fn bring_up_programs_the_documented_values() {
        let clock_window = RegisterWindow::anonymous(clock::LEN).unwrap();
        let pwm_window = RegisterWindow::anonymous(pwm::LEN).unwrap();
        let clock_ptr = clock_window.as_ptr();
        let pwm_ptr = pwm_window.as_ptr();

        let mut pacer = PacingClock::new(clock_window, pwm_window);
        let config = PacingConfig::derive(1_000_000).unwrap().unwrap();
        pacer.configure(&config);

        // Safety: the windows are still owned by `pacer` and mapped.
        let clk = unsafe {
            &*(clock_ptr.add(clock::PWM_CLOCK_OFFSET) as *const clock::RegisterBlock)
        };
        assert_eq!(
            clk.DIV.read(),
            clock::PASSWD | (CLOCK_DIVIDER << clock::DIV_DIVI_SHIFT)
        );
        assert_eq!(
            clk.CTL.read(),
            clock::PASSWD | clock::CTL_SRC_PLLD | clock::CTL_ENAB
        );

        let pwm_regs = unsafe { &*(pwm_ptr as *const pwm::RegisterBlock) };
        assert_eq!(pwm_regs.RNG1.read(), config.pwm_range);
        assert_eq!(
            pwm_regs.DMAC.read(),
            pwm::DMAC_ENAB | pwm::dmac_panic(15) | pwm::dmac_dreq(15)
        );
        assert_eq!(
            pwm_regs.CTL.read(),
            pwm::CTL_USEF1 | pwm::CTL_MODE1 | pwm::CTL_PWEN1
        );
    }
}
