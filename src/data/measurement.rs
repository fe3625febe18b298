//! Finalized measurement data structures.

use chrono::{DateTime, Utc};

use crate::utils::kilograms_to_pounds;

/// A settled weight reading.
///
/// Produced when the scale reports a final reading; the timestamp is taken
/// on the host when the event is received.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Measurement {
    /// Weight in kilograms.
    pub weight_kg: f64,
    /// When the reading was received.
    pub taken_at: DateTime<Utc>,
}

impl Measurement {
    /// Create a measurement stamped with the current time.
    pub fn new(weight_kg: f64) -> Self {
        Self::at(weight_kg, Utc::now())
    }

    /// Create a measurement with an explicit timestamp.
    pub fn at(weight_kg: f64, taken_at: DateTime<Utc>) -> Self {
        Self {
            weight_kg,
            taken_at,
        }
    }

    /// Weight in pounds.
    pub fn weight_lb(&self) -> f64 {
        kilograms_to_pounds(self.weight_kg)
    }
}

impl std::fmt::Display for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2} kg", self.weight_kg)
    }
}
