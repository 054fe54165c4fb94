//! Collaborator interfaces onto the host platform
//!
//! The core never talks to an operating system directly. Permission checks, the location
//! subsystem and the foreground-execution host are reached through the traits in this module,
//! and [`simulated::SimulatedDevice`] implements all of them in-process.

use std::fmt::Debug;

use thiserror::Error;

use crate::{reader::LocationRequest, service::ControlSurface};

pub mod simulated;

/// Permission that allows an application to override reported locations
pub const MOCK_LOCATION: &str = "android.permission.MOCK_LOCATION";
pub const ACCESS_FINE_LOCATION: &str = "android.permission.ACCESS_FINE_LOCATION";
pub const ACCESS_COARSE_LOCATION: &str = "android.permission.ACCESS_COARSE_LOCATION";

/// Name of the developer-facing mock provider
pub const MOCK_PROVIDER: &str = "mock";
/// Provider name stamped on injected fixes
pub const FUSED_PROVIDER: &str = "fused";

/// Failures reported by a platform collaborator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlatformError {
    #[error("security exception: {0}")]
    Security(String),
    #[error("not supported on this platform: {0}")]
    Unsupported(String),
    #[error("{0}")]
    Failed(String),
}

/// A location record in the shape the platform's location subsystem expects
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformFix {
    pub provider: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Accuracy radius in meters
    pub accuracy: f32,
    pub altitude: f64,
    pub bearing: f32,
    pub speed: f32,
    /// Wall-clock time in milliseconds since the Unix epoch
    pub time_ms: u64,
    /// Monotonic time in nanoseconds
    pub elapsed_realtime_nanos: u64,
}

/// Invoked once with the result of a last-known-location query
pub type FixCallback = Box<dyn FnOnce(Result<Option<PlatformFix>, PlatformError>) + Send>;
/// Invoked for every location update until the registration is removed
pub type UpdateSink = Box<dyn Fn(PlatformFix) + Send + Sync>;

/// Permission and provider introspection
///
/// All queries are synchronous and must not block.
pub trait PermissionApi: Send + Sync + Debug {
    /// Platform API level, used to select the capability probe
    fn api_level(&self) -> u32;

    /// Package name of the calling application
    fn package_name(&self) -> &str;

    /// Whether the calling process holds `permission`
    fn check_self_permission(&self, permission: &str) -> Result<bool, PlatformError>;

    /// Whether the package manager lists `permission` as granted to `package`
    fn check_package_permission(
        &self,
        permission: &str,
        package: &str,
    ) -> Result<bool, PlatformError>;

    /// Looks up a location provider by name
    ///
    /// # Errors
    /// `Unsupported` when the lookup itself isn't available on this platform version,
    /// anything else when the provider is missing or disabled.
    fn get_provider(&self, name: &str) -> Result<(), PlatformError>;
}

/// The platform's global location subsystem
pub trait LocationApi: Send + Sync + Debug {
    /// Enables or disables mock mode for every consumer of location services
    fn set_mock_mode(&self, enabled: bool) -> Result<(), PlatformError>;

    /// Reports `fix` to all consumers. Only honored while mock mode is enabled.
    fn set_mock_location(&self, fix: &PlatformFix) -> Result<(), PlatformError>;

    /// Requests the last known location. The callback fires at most once, possibly after this
    /// call returns.
    fn last_location(&self, callback: FixCallback) -> Result<(), PlatformError>;

    /// Registers `sink` for continuous updates and returns a registration id
    fn request_updates(
        &self,
        request: &LocationRequest,
        sink: UpdateSink,
    ) -> Result<u64, PlatformError>;

    /// Removes a registration. Unknown ids are ignored.
    fn remove_updates(&self, id: u64);
}

/// Grants the background task its foreground-execution guarantee
pub trait ForegroundHost: Send + Sync + Debug {
    /// Pins the task in the foreground while `surface` is displayed
    fn start_foreground(&self, surface: &ControlSurface) -> Result<(), PlatformError>;

    /// Removes the control surface and the guarantee. Idempotent.
    fn stop_foreground(&self);
}
