//! # Direct Memory Access
//!
//! Register binding of the [`crate::common::dma`] transfer core for the
//! DMA1/DMA2 controllers.

pub use crate::common::dma::*;

use crate::{pac, rcc::ClockGate, Steal};

impl<RB, const A: usize> Steal for stm32f1::Periph<RB, A> {
    unsafe fn steal(&self) -> Self {
        unsafe { Self::steal() }
    }
}

/// One DMA controller servicing a group of channels.
pub trait Instance: ClockGate {
    fn regs(&self) -> &pac::dma1::RegisterBlock;
    /// Clock bookkeeping shared by the controller's channels.
    fn ledger() -> &'static ClockLedger;
}

/// Carves a controller into its independently owned channels.
pub trait DmaInit {
    type Channels;

    fn split(self) -> Self::Channels;
}

macro_rules! dma {
    ($DMAX:ty: ($dmaX:ident, $en:ident, {
        $($CX:ident: ($ch:literal),)+
    }),) => {
        pub mod $dmaX {
            use super::*;

            static LEDGER: ClockLedger = ClockLedger::new();

            #[non_exhaustive]
            #[allow(clippy::manual_non_exhaustive)]
            pub struct Channels((), $(pub $CX),+);

            $(
                pub type $CX = super::Ch<$DMAX, $ch>;
            )+

            impl Instance for $DMAX {
                #[inline(always)]
                fn regs(&self) -> &pac::dma1::RegisterBlock {
                    self
                }

                #[inline(always)]
                fn ledger() -> &'static ClockLedger {
                    &LEDGER
                }
            }

            impl DmaInit for $DMAX {
                type Channels = Channels;

                fn split(self) -> Channels {
                    Channels((), $(Ch::<$DMAX, $ch> { dma: unsafe { self.steal() } }),+)
                }
            }
        }
    }
}

dma! {
    pac::DMA1: (dma1, dma1en, {
        C1: (0),
        C2: (1),
        C3: (2),
        C4: (3),
        C5: (4),
        C6: (5),
        C7: (6),
    }),
}

dma! {
    pac::DMA2: (dma2, dma2en, {
        C1: (0),
        C2: (1),
        C3: (2),
        C4: (3),
        C5: (4),
    }),
}

// DMA Channel ----------------------------------------------------------------

/// One channel register block of a controller, plus its 4-bit flag group
/// in the controller-level status registers.
pub struct Ch<DMA, const C: u8> {
    pub(crate) dma: DMA,
}

impl<DMA, const C: u8> Ch<DMA, C>
where
    DMA: Instance,
{
    #[inline(always)]
    fn ch(&self) -> &pac::dma1::CH {
        self.dma.regs().ch(C as usize)
    }
}

impl<DMA, const C: u8> Steal for Ch<DMA, C>
where
    DMA: Instance + Steal,
{
    unsafe fn steal(&self) -> Self {
        unsafe {
            Self {
                dma: self.dma.steal(),
            }
        }
    }
}

impl<DMA, const C: u8> DmaChannel for Ch<DMA, C>
where
    DMA: Instance,
{
    #[inline]
    fn clock_acquire(&self) {
        DMA::ledger().acquire(C, DMA::gate);
    }

    #[inline]
    fn clock_release(&self) {
        DMA::ledger().release(C, DMA::gate);
    }

    #[inline]
    fn enable(&mut self) {
        self.ch().cr().modify(|_, w| w.en().set_bit());
    }

    #[inline]
    fn disable(&mut self) {
        self.ch().cr().modify(|_, w| w.en().clear_bit());
    }

    #[inline]
    fn is_enabled(&self) -> bool {
        self.ch().cr().read().en().bit_is_set()
    }

    fn apply_config(&mut self, config: &Config) {
        self.ch().cr().modify(|_, w| {
            match config.priority {
                Priority::Low => w.pl().low(),
                Priority::Medium => w.pl().medium(),
                Priority::High => w.pl().high(),
                Priority::VeryHigh => w.pl().very_high(),
            };
            w.dir().bit(config.direction == Direction::MemoryToPeriph);
            w.mem2mem().bit(config.direction == Direction::MemoryToMemory);
            w.circ().bit(config.circular);

            w.pinc().bit(config.peripheral.increment);
            w.minc().bit(config.memory.increment);

            match config.peripheral.data_size {
                DataSize::Bits8 => w.psize().bits8(),
                DataSize::Bits16 => w.psize().bits16(),
                DataSize::Bits32 => w.psize().bits32(),
            };
            match config.memory.data_size {
                DataSize::Bits8 => w.msize().bits8(),
                DataSize::Bits16 => w.msize().bits16(),
                DataSize::Bits32 => w.msize().bits32(),
            }
        });
    }

    #[inline]
    fn set_direction(&mut self, direction: Direction) {
        self.ch().cr().modify(|_, w| {
            w.dir().bit(direction == Direction::MemoryToPeriph);
            w.mem2mem().bit(direction == Direction::MemoryToMemory)
        });
    }

    fn reset(&mut self) {
        self.ch().cr().reset();
        self.ch().ndtr().reset();
        self.ch().par().reset();
        self.ch().mar().reset();
    }

    #[inline]
    fn set_peripheral_address(&mut self, address: u32) {
        self.ch().par().write(|w| unsafe { w.pa().bits(address) });
    }

    #[inline]
    fn peripheral_address(&self) -> u32 {
        self.ch().par().read().bits()
    }

    #[inline]
    fn set_memory_address(&mut self, address: u32) {
        self.ch().mar().write(|w| unsafe { w.ma().bits(address) });
    }

    #[inline]
    fn set_transfer_length(&mut self, len: u16) {
        self.ch().ndtr().write(|w| w.ndt().set(len));
    }

    #[inline]
    fn remaining(&self) -> u16 {
        self.ch().ndtr().read().ndt().bits()
    }

    #[inline]
    fn is_circular(&self) -> bool {
        self.ch().cr().read().circ().bit_is_set()
    }

    #[inline]
    fn flag(&self, event: DmaEvent) -> bool {
        let isr = self.dma.regs().isr().read();
        match event {
            DmaEvent::HalfTransfer => isr.htif(C).bit_is_set(),
            DmaEvent::TransferComplete => isr.tcif(C).bit_is_set(),
            DmaEvent::TransferError => isr.teif(C).bit_is_set(),
        }
    }

    #[inline]
    fn clear_flag(&mut self, event: DmaEvent) {
        self.dma.regs().ifcr().write(|w| match event {
            DmaEvent::HalfTransfer => w.chtif(C).set_bit(),
            DmaEvent::TransferComplete => w.ctcif(C).set_bit(),
            DmaEvent::TransferError => w.cteif(C).set_bit(),
        });
    }

    #[inline]
    fn listen(&mut self, event: DmaEvent, enable: bool) {
        self.ch().cr().modify(|_, w| match event {
            DmaEvent::HalfTransfer => w.htie().bit(enable),
            DmaEvent::TransferComplete => w.tcie().bit(enable),
            DmaEvent::TransferError => w.teie().bit(enable),
        });
    }
}
