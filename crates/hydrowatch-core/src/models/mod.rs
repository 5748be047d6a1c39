//! Data models for HydroWatch

mod alert;
mod device;
mod payload;
pub mod reading;
mod threshold;

pub use alert::*;
pub use device::*;
pub use payload::*;
pub use reading::{Metrics, Reading};
pub use threshold::*;
