//! Hardware-abstraction helpers shared across drivers: DMA buffer
//! allocation and typed MMIO accessors.

pub mod dma;
pub mod mmio;
