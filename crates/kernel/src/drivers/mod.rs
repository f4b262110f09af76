//! Device drivers.

pub mod timeout;   // Timeout utilities for hardware operations
pub mod error;     // Common driver error types
pub mod ata;       // PIO+DMA ATA block driver

// Re-export common types for convenience
pub use error::{DriverError, DriverResult, Validator};
pub use timeout::{Timeout, TimeoutError};
