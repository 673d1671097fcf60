//! Peripheral clock gates on the RCC enable registers.

use crate::pac;

/// Clock gate of one peripheral on an RCC enable register.
///
/// Implementations steal the RCC register block for a single-bit
/// read-modify-write; callers serialize through a critical section (the
/// DMA clock ledger does, and peripheral constructors run before any
/// contending context exists).
pub trait ClockGate {
    /// Opens or closes the peripheral's clock gate.
    fn gate(enable: bool);
}

macro_rules! clock_gate {
    ($($PERIPH:ty: ($reg:ident, $en:ident),)+) => {
        $(
            impl ClockGate for $PERIPH {
                #[inline]
                fn gate(enable: bool) {
                    let rcc = unsafe { &*pac::RCC::ptr() };
                    rcc.$reg().modify(|_, w| w.$en().bit(enable));
                }
            }
        )+
    };
}

clock_gate! {
    pac::DMA1: (ahbenr, dma1en),
    pac::DMA2: (ahbenr, dma2en),
    pac::PWR: (apb1enr, pwren),
}
