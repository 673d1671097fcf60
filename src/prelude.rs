pub use crate::common::{dma::DmaChannel as _, tick::TickInstant as _};
