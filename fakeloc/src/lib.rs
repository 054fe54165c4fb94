//! Report a chosen position to every consumer of a device's location services.
//!
//! The [`SpoofingCoordinator`] is the foreground entry point: it checks the preconditions,
//! injects fixes through the [`injector::FixInjector`] and publishes a [`SpoofingState`].
//! The [`service::ServiceHost`] runs the background continuity task that keeps a fix alive
//! without any UI. Both reach the platform only through the traits in [`platform`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fakeloc::{Coordinate, SpoofingCoordinator, platform::simulated::SimulatedDevice};
//!
//! let device = Arc::new(SimulatedDevice::default());
//! let mut coordinator = SpoofingCoordinator::from_platform(device);
//! coordinator.start_spoofing(Coordinate::new(37.7749, -122.4194)?)?;
//! # Ok::<(), fakeloc::SpoofError>(())
//! ```

pub mod coordinate;
pub mod coordinator;
pub mod injector;
pub mod platform;
pub mod preconditions;
pub mod presets;
pub mod profile;
pub mod reader;
pub mod service;

pub use coordinate::{Coordinate, CoordinateError};
pub use coordinator::{SpoofingCoordinator, SpoofingState};

use std::io;

use thiserror::Error;

/// Every failure the spoofing core can report
///
/// None of these are fatal. The ones a user can fix (permission, developer toggle, rejected
/// fix) end up as the message of [`SpoofingState::Error`].
#[derive(Error, Debug)]
#[repr(i32)]
#[non_exhaustive]
pub enum SpoofError {
    #[error("Mock location permission not granted")]
    PermissionDenied = -1,
    #[error("Mock location is not enabled in Developer Options")]
    NotEnabled = -2,
    #[error("Failed to set mock location: {0}")]
    InjectionFailed(String) = -3,
    #[error("Location permission not granted")]
    LocationPermissionDenied = -4,
    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(#[from] CoordinateError) = -5,
    #[error("location unavailable: {0}")]
    LocationUnavailable(String) = -6,
    #[error("foreground execution refused: {0}")]
    ForegroundUnavailable(String) = -7,
    #[error("unknown service command `{0}`")]
    UnknownCommand(String) = -8,
    #[error("service is not running")]
    ServiceStopped = -9,
    #[error("io failed")]
    Io(#[from] io::Error) = -10,
    #[error("io on plist")]
    Plist(#[from] plist::Error) = -11,
}

impl SpoofError {
    pub fn code(&self) -> i32 {
        match self {
            SpoofError::PermissionDenied => -1,
            SpoofError::NotEnabled => -2,
            SpoofError::InjectionFailed(_) => -3,
            SpoofError::LocationPermissionDenied => -4,
            SpoofError::InvalidCoordinate(_) => -5,
            SpoofError::LocationUnavailable(_) => -6,
            SpoofError::ForegroundUnavailable(_) => -7,
            SpoofError::UnknownCommand(_) => -8,
            SpoofError::ServiceStopped => -9,
            SpoofError::Io(_) => -10,
            SpoofError::Plist(_) => -11,
        }
    }

    /// Whether granting a permission, flipping a setting or retrying can clear this error
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            SpoofError::PermissionDenied
                | SpoofError::NotEnabled
                | SpoofError::InjectionFailed(_)
                | SpoofError::LocationPermissionDenied
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(SpoofError::PermissionDenied.code(), -1);
        assert_eq!(SpoofError::NotEnabled.code(), -2);
        assert_eq!(SpoofError::InjectionFailed("x".into()).code(), -3);
        assert_eq!(
            SpoofError::InvalidCoordinate(CoordinateError::Latitude(91.0)).code(),
            -5
        );
    }

    #[test]
    fn recoverable_errors() {
        assert!(SpoofError::NotEnabled.is_user_recoverable());
        assert!(!SpoofError::ServiceStopped.is_user_recoverable());
        assert!(SpoofError::NotEnabled.to_string().contains("not enabled"));
    }
}
