// FOC (Field Oriented Control) building blocks
// Coordinate transforms, PID loops and the velocity filter used by the
// 40kHz control cycle.

pub mod filter;
pub mod pid;
pub mod transforms;

// Re-export main types for easier access
pub use filter::WindowedAverage;
pub use pid::{PidConfig, PidState};
pub use transforms::{dq_transform, frac, inverse_dq_transform, limit, Dq, SinCos};
