// Sensorless rotor position/speed estimation.
// Luenberger state observer + PLL with redundant reliability checking.

mod speed_buffer;
pub mod sto_pll;

// Re-export main types for easier access
pub use sto_pll::StateObserver;

/// Capacity of the rotor speed history buffer; configured window sizes may
/// use any power of two up to this.
pub const MAX_SPEED_BUFFER_SIZE: usize = 64;
