//! DMA engines: the 4-channel APB-DMA and the 2-channel BLN-DMA blitter.

pub mod apb;
pub mod bln;
pub mod descramble;

pub use apb::ApbDma;
pub use bln::BlnDma;
