//! Validated geographic coordinates
//!
//! A [`Coordinate`] can only exist with an in-range latitude, longitude and accuracy radius.
//! Every way of constructing one (the constructor, the builder-style setters and serde
//! deserialization) goes through the same validation, so an out-of-range value can never
//! reach the fix injector.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Accuracy radius in meters used when the caller doesn't supply one
pub const DEFAULT_ACCURACY: f32 = 10.0;

/// Reasons a coordinate was rejected at construction
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum CoordinateError {
    #[error("latitude must be between -90 and 90, got {0}")]
    Latitude(f64),
    #[error("longitude must be between -180 and 180, got {0}")]
    Longitude(f64),
    #[error("accuracy must be positive, got {0}")]
    Accuracy(f32),
}

/// An immutable, validated position to report in place of the device's own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate", into = "RawCoordinate")]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
    accuracy: f32,
    label: Option<String>,
}

/// Unchecked wire shape, validated on the way into [`Coordinate`]
#[derive(Serialize, Deserialize)]
struct RawCoordinate {
    latitude: f64,
    longitude: f64,
    #[serde(default = "default_accuracy")]
    accuracy: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
}

fn default_accuracy() -> f32 {
    DEFAULT_ACCURACY
}

impl Coordinate {
    /// Creates a coordinate with the default accuracy radius
    ///
    /// # Errors
    /// Returns `CoordinateError` if latitude is outside [-90, 90] or longitude is outside
    /// [-180, 180]. NaN is rejected for both.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoordinateError> {
        Self::with_accuracy(latitude, longitude, DEFAULT_ACCURACY)
    }

    /// Creates a coordinate with an explicit accuracy radius in meters
    ///
    /// # Errors
    /// Returns `CoordinateError` on any out-of-range component; the accuracy must be finite
    /// and strictly positive.
    pub fn with_accuracy(
        latitude: f64,
        longitude: f64,
        accuracy: f32,
    ) -> Result<Self, CoordinateError> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(CoordinateError::Latitude(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(CoordinateError::Longitude(longitude));
        }
        if !accuracy.is_finite() || accuracy <= 0.0 {
            return Err(CoordinateError::Accuracy(accuracy));
        }
        Ok(Self {
            latitude,
            longitude,
            accuracy,
            label: None,
        })
    }

    /// Returns a copy carrying a display label. An empty label is treated as no label.
    pub fn labeled(self, label: impl Into<String>) -> Self {
        let label: String = label.into();
        Self {
            label: if label.is_empty() { None } else { Some(label) },
            ..self
        }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Accuracy radius in meters
    pub fn accuracy(&self) -> f32 {
        self.accuracy
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = CoordinateError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        let c = Self::with_accuracy(raw.latitude, raw.longitude, raw.accuracy)?;
        Ok(match raw.label {
            Some(l) => c.labeled(l),
            None => c,
        })
    }
}

impl From<Coordinate> for RawCoordinate {
    fn from(c: Coordinate) -> Self {
        Self {
            latitude: c.latitude,
            longitude: c.longitude,
            accuracy: c.accuracy,
            label: c.label,
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{label} ({}, {})", self.latitude, self.longitude),
            None => write!(f, "{}, {}", self.latitude, self.longitude),
        }
    }
}
