//! # Power Control
//!
//! Low-power mode entry, backup domain access, wake-up pin control and the
//! programmable voltage detector.

use cortex_m::asm;
use cortex_m::peripheral::SCB;

use crate::exti::{Exti, LineConfig};
use crate::rcc::ClockGate;
use crate::pac;

/// Regulator state while in Stop mode.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Regulator {
    Main,
    LowPower,
}

/// Signal that leaves a low-power mode.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WakeUp {
    Interrupt,
    Event,
}

/// Voltage detector threshold.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PvdLevel {
    V2_2 = 0,
    V2_3 = 1,
    V2_4 = 2,
    V2_5 = 3,
    V2_6 = 4,
    V2_7 = 5,
    V2_8 = 6,
    V2_9 = 7,
}

/// Voltage detector setup.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PvdConfig {
    pub level: PvdLevel,
    /// Routing of the detector's EXTI line.
    pub line: LineConfig,
}

/// EXTI line wired to the voltage detector output.
pub const PVD_EXTI_LINE: u8 = 16;

/// The power controller.
pub struct Pwr {
    rb: pac::PWR,
}

impl Pwr {
    /// Takes the peripheral and opens its clock gate.
    pub fn new(rb: pac::PWR) -> Self {
        critical_section::with(|_| pac::PWR::gate(true));
        Self { rb }
    }

    /// Enters Sleep mode: the core stops, peripherals keep running.
    pub fn sleep(&mut self, wake: WakeUp) {
        match wake {
            WakeUp::Interrupt => asm::wfi(),
            WakeUp::Event => asm::wfe(),
        }
    }

    /// Enters Stop mode: all clocks stop, SRAM and registers are kept.
    ///
    /// On wake-up the device runs from the internal oscillator; restoring
    /// the clock tree is the caller's business.
    pub fn stop(&mut self, scb: &mut SCB, wake: WakeUp, regulator: Regulator) {
        self.rb.cr().modify(|_, w| {
            w.pdds().clear_bit();
            w.lpds().bit(regulator == Regulator::LowPower)
        });

        scb.set_sleepdeep();
        match wake {
            WakeUp::Interrupt => asm::wfi(),
            WakeUp::Event => asm::wfe(),
        }
        scb.clear_sleepdeep();
    }

    /// Enters Standby mode: the 1.8 V domain powers off; leaving it is a
    /// reset. Returns only when a debugger keeps the core powered.
    pub fn standby(&mut self, scb: &mut SCB) {
        self.rb.cr().modify(|_, w| {
            w.pdds().set_bit();
            // a stale wake-up flag would end the mode immediately
            w.cwuf().set_bit()
        });

        scb.set_sleepdeep();
        asm::wfi();
    }

    /// Opens or closes write access to the backup domain registers.
    pub fn backup_access(&mut self, enable: bool) {
        self.rb.cr().modify(|_, w| w.dbp().bit(enable));
    }

    /// Enables or disables the WKUP pin as a Standby wake-up source.
    pub fn wakeup_pin(&mut self, enable: bool) {
        self.rb.csr().modify(|_, w| w.ewup().bit(enable));
    }

    /// Whether a wake-up event was received.
    pub fn wakeup_flag(&self) -> bool {
        self.rb.csr().read().wuf().bit_is_set()
    }

    pub fn clear_wakeup_flag(&mut self) {
        self.rb.cr().modify(|_, w| w.cwuf().set_bit());
    }

    /// Whether the device resumed from Standby.
    pub fn standby_flag(&self) -> bool {
        self.rb.csr().read().sbf().bit_is_set()
    }

    pub fn clear_standby_flag(&mut self) {
        self.rb.cr().modify(|_, w| w.csbf().set_bit());
    }

    /// Configures the voltage detector threshold and its EXTI routing.
    /// The detector itself stays disabled until [`Pwr::pvd_enable`].
    pub fn pvd_init(&mut self, exti: &mut Exti, config: &PvdConfig) {
        self.rb
            .cr()
            .modify(|_, w| unsafe { w.pls().bits(config.level as u8) });
        exti.init(PVD_EXTI_LINE, &config.line);
    }

    pub fn pvd_enable(&mut self) {
        self.rb.cr().modify(|_, w| w.pvde().set_bit());
    }

    pub fn pvd_disable(&mut self) {
        self.rb.cr().modify(|_, w| w.pvde().clear_bit());
    }

    /// Detector output: set while supply voltage is below the threshold.
    pub fn pvd_output(&self) -> bool {
        self.rb.csr().read().pvdo().bit_is_set()
    }
}
