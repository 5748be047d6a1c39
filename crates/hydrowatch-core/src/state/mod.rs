//! Shared in-memory state
//!
//! Both components own their map outright and expose only narrow
//! operations; callers never see the underlying collection.

mod cache;
mod thresholds;

pub use cache::StateCache;
pub use thresholds::ThresholdStore;
