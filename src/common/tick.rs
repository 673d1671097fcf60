//! Monotonic tick source for bounded busy-waits.

/// A point in time of a monotonically increasing tick counter.
///
/// Elapsed time is measured by unsigned subtraction, so measurements stay
/// correct across counter wraparound as long as the measured span is
/// shorter than one full counter period.
pub trait TickInstant: Copy {
    fn now() -> Self;
    /// Returns the amount of ticks elapsed from another instant to this one.
    fn tick_since(self, earlier: Self) -> u32;
    /// Returns the amount of ticks elapsed since this instant.
    fn tick_elapsed(self) -> u32 {
        Self::now().tick_since(self)
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        use std::sync::OnceLock;
        use std::time::Instant;

        static EPOCH: OnceLock<Instant> = OnceLock::new();

        /// Microsecond tick source for host builds.
        ///
        /// This implementation is only for unit testing and host tooling.
        #[derive(Clone, Copy)]
        pub struct StdInstant(u32);

        impl TickInstant for StdInstant {
            fn now() -> Self {
                let epoch = EPOCH.get_or_init(Instant::now);
                Self(epoch.elapsed().as_micros() as u32)
            }

            fn tick_since(self, earlier: Self) -> u32 {
                self.0.wrapping_sub(earlier.0)
            }
        }
    }
}
