//! Target-independent driver cores.
//!
//! The DMA transfer engine in [`dma`] is generic over a register-access
//! capability and a tick source, so it runs against simulated hardware on
//! the host (`std` feature) and against the PAC bindings on the target
//! (`mcu` feature).

pub mod dma;
pub mod tick;
