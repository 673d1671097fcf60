//! # Extended Interrupts and Events
//!
//! Per-line routing of external interrupt/event requests: unmasking,
//! edge trigger selection, pending flags and software triggering.
//! Dispatching the EXTI interrupt vectors stays with integration code.

use crate::pac;

/// Lines available on this family.
pub const LINE_COUNT: u8 = 19;

/// What a line activates when it triggers.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reaction {
    None,
    /// Request the line's interrupt.
    Interrupt,
    /// Wake the event signal only, no interrupt is taken.
    Event,
    Both,
}

impl Reaction {
    fn interrupt(self) -> bool {
        matches!(self, Reaction::Interrupt | Reaction::Both)
    }

    fn event(self) -> bool {
        matches!(self, Reaction::Event | Reaction::Both)
    }
}

/// Signal edges a line triggers on.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    None,
    Rising,
    Falling,
    Both,
}

impl Edge {
    fn rising(self) -> bool {
        matches!(self, Edge::Rising | Edge::Both)
    }

    fn falling(self) -> bool {
        matches!(self, Edge::Falling | Edge::Both)
    }
}

/// Setup of one line.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineConfig {
    pub reaction: Reaction,
    pub edge: Edge,
}

/// The EXTI line router.
pub struct Exti {
    rb: pac::EXTI,
}

impl Exti {
    pub fn new(rb: pac::EXTI) -> Self {
        Self { rb }
    }

    /// Configures the line according to the setup parameters.
    pub fn init(&mut self, line: u8, config: &LineConfig) {
        debug_assert!(line < LINE_COUNT);
        let bit = 1 << line;

        self.rb.imr().modify(|r, w| unsafe {
            w.bits(set_or_clear(r.bits(), bit, config.reaction.interrupt()))
        });
        self.rb.emr().modify(|r, w| unsafe {
            w.bits(set_or_clear(r.bits(), bit, config.reaction.event()))
        });

        self.rb.rtsr().modify(|r, w| unsafe {
            w.bits(set_or_clear(r.bits(), bit, config.edge.rising()))
        });
        self.rb.ftsr().modify(|r, w| unsafe {
            w.bits(set_or_clear(r.bits(), bit, config.edge.falling()))
        });
    }

    /// Restores the line to its default state.
    pub fn deinit(&mut self, line: u8) {
        debug_assert!(line < LINE_COUNT);
        let bit = 1 << line;

        self.rb.imr().modify(|r, w| unsafe { w.bits(r.bits() & !bit) });
        self.rb.emr().modify(|r, w| unsafe { w.bits(r.bits() & !bit) });
        self.rb.rtsr().modify(|r, w| unsafe { w.bits(r.bits() & !bit) });
        self.rb.ftsr().modify(|r, w| unsafe { w.bits(r.bits() & !bit) });
    }

    /// Whether the line's interrupt request is pending.
    pub fn is_pending(&self, line: u8) -> bool {
        self.rb.pr().read().bits() & (1 << line) != 0
    }

    /// Clears the line's pending interrupt request.
    pub fn clear_pending(&mut self, line: u8) {
        // Write-one-to-clear; untouched lines read the no-op zero.
        self.rb.pr().write(|w| unsafe { w.bits(1 << line) });
    }

    /// Raises the line's request from software.
    pub fn trigger(&mut self, line: u8) {
        self.rb.swier().modify(|r, w| unsafe { w.bits(r.bits() | 1 << line) });
    }

    /// Releases the register block.
    pub fn free(self) -> pac::EXTI {
        self.rb
    }
}

fn set_or_clear(word: u32, bit: u32, set: bool) -> u32 {
    if set {
        word | bit
    } else {
        word & !bit
    }
}
