//! Windowed anomaly detectors over the ordered trade stream.

pub mod engine;
pub mod worker;

pub use engine::{BatchContext, DetectorConfig, SignalEngine};
