//! Data structures for scale readings.

pub mod measurement;

pub use measurement::Measurement;
