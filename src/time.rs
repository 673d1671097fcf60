//! Monotonic time base for the bounded waits of the transfer engine.

use cortex_m::peripheral::{DCB, DWT};
use fugit::HertzU32;

use crate::common::tick::TickInstant;

/// A monotonic non-decreasing timer
///
/// This uses the timer in the debug watch trace peripheral. This means, that if the
/// core is stopped, the timer does not count up. This may be relevant if you are using
/// cortex_m_semihosting::hprintln for debugging in which case the timer will be stopped
/// while printing
#[derive(Clone, Copy)]
pub struct MonoTimer {
    frequency: HertzU32,
}

impl MonoTimer {
    /// Creates a new `Monotonic` timer
    pub fn new(mut dwt: DWT, mut dcb: DCB, hclk: HertzU32) -> Self {
        dcb.enable_trace();
        dwt.enable_cycle_counter();
        // now the CYCCNT counter can't be stopped or reset

        MonoTimer { frequency: hclk }
    }

    /// Returns the frequency at which the monotonic timer is operating at
    pub fn frequency(self) -> HertzU32 {
        self.frequency
    }

    /// Returns an `Instant` corresponding to "now"
    pub fn now(self) -> Instant {
        Instant {
            now: DWT::cycle_count(),
        }
    }
}

/// A measurement of a monotonically non-decreasing clock
#[derive(Clone, Copy)]
pub struct Instant {
    now: u32,
}

impl Instant {
    /// Ticks elapsed since the `Instant` was created
    pub fn elapsed(self) -> u32 {
        DWT::cycle_count().wrapping_sub(self.now)
    }
}

// ----------------------------------------------------------------------------

/// Core-cycle [`TickInstant`] over the DWT counter, for timing
/// [`crate::common::dma::DmaStream`] waits on hardware.
///
/// The counter must be running; see [`MonoTimer::new`].
#[derive(Clone, Copy)]
pub struct DwtInstant(u32);

impl TickInstant for DwtInstant {
    #[inline]
    fn now() -> Self {
        Self(DWT::cycle_count())
    }

    #[inline]
    fn tick_since(self, earlier: Self) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }
}
