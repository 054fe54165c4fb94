//! In-process simulated device
//!
//! Behaves like a phone's permission manager, location subsystem and foreground-service host
//! at once. While mock mode is on, every consumer (last-location queries and update
//! registrations) sees the injected fix; otherwise they see the profile's true position.
//! It records every platform call so the command-line tool can report status and tests can
//! assert on side effects.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use tracing::{debug, trace};

use super::{
    FixCallback, ForegroundHost, LocationApi, MOCK_PROVIDER, PermissionApi, PlatformError,
    PlatformFix, UpdateSink,
};
use crate::{
    injector::FixInjector,
    profile::{DeviceProfile, ProviderAvailability},
    reader::LocationRequest,
    service::ControlSurface,
};

#[derive(Default)]
struct DeviceState {
    profile: DeviceProfile,
    mock_mode: bool,
    mock_fix: Option<PlatformFix>,
    injections: Vec<PlatformFix>,
    releases: usize,
    failure: Option<PlatformError>,
    foreground: Option<ControlSurface>,
    foreground_grants: usize,
    deferred: Vec<FixCallback>,
    defer_queries: bool,
    listeners: HashMap<u64, UpdateSink>,
    next_listener: u64,
}

/// A device that lives entirely in memory
pub struct SimulatedDevice {
    package: String,
    state: Mutex<DeviceState>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new(DeviceProfile::default())
    }
}

impl std::fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("SimulatedDevice")
            .field("profile", &state.profile)
            .field("mock_mode", &state.mock_mode)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

impl SimulatedDevice {
    pub fn new(profile: DeviceProfile) -> Self {
        Self {
            package: profile.package_name.clone(),
            state: Mutex::new(DeviceState {
                profile,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        // A panicking listener can't leave the bookkeeping half-updated
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Grants or revokes a permission, as the user would in system settings
    pub fn set_permission(&self, permission: &str, granted: bool) {
        let mut state = self.state();
        state.profile.granted_permissions.retain(|p| p != permission);
        if granted {
            state.profile.granted_permissions.push(permission.to_string());
        }
    }

    /// Flips the developer-settings mock provider toggle
    pub fn set_mock_provider(&self, availability: ProviderAvailability) {
        self.state().profile.mock_provider = availability;
    }

    /// Makes the next platform call that submits a fix or toggles mock mode on fail
    pub fn fail_next_injection(&self, error: PlatformError) {
        self.state().failure = Some(error);
    }

    /// Holds last-location callbacks until [`Self::deliver_deferred`] is called
    pub fn defer_location_queries(&self, defer: bool) {
        self.state().defer_queries = defer;
    }

    /// Fires every held last-location callback with the current answer. Returns how many
    /// callbacks were fired.
    pub fn deliver_deferred(&self) -> usize {
        let (callbacks, answer) = {
            let mut state = self.state();
            let callbacks = std::mem::take(&mut state.deferred);
            (callbacks, Self::visible_fix(&state))
        };
        let n = callbacks.len();
        for cb in callbacks {
            cb(Ok(answer.clone()));
        }
        n
    }

    /// Pushes a real (non-mocked) position, as if the GPS produced a new reading. Ignored by
    /// consumers while mock mode is on.
    pub fn move_to(&self, fix: PlatformFix) {
        let mut state = self.state();
        state.profile.true_position = crate::Coordinate::with_accuracy(
            fix.latitude,
            fix.longitude,
            fix.accuracy,
        )
        .ok();
        if !state.mock_mode {
            for sink in state.listeners.values() {
                sink(fix.clone());
            }
        }
    }

    pub fn mock_mode(&self) -> bool {
        self.state().mock_mode
    }

    /// The fix consumers currently see, if any
    pub fn reported_fix(&self) -> Option<PlatformFix> {
        Self::visible_fix(&self.state())
    }

    /// Every fix successfully submitted, oldest first
    pub fn injections(&self) -> Vec<PlatformFix> {
        self.state().injections.clone()
    }

    /// How many times mock mode was switched off
    pub fn releases(&self) -> usize {
        self.state().releases
    }

    pub fn foreground_surface(&self) -> Option<ControlSurface> {
        self.state().foreground.clone()
    }

    /// How many times a foreground guarantee was granted
    pub fn foreground_grants(&self) -> usize {
        self.state().foreground_grants
    }

    pub fn listener_count(&self) -> usize {
        self.state().listeners.len()
    }

    pub fn profile(&self) -> DeviceProfile {
        self.state().profile.clone()
    }

    fn visible_fix(state: &DeviceState) -> Option<PlatformFix> {
        if state.mock_mode {
            return state.mock_fix.clone();
        }
        state
            .profile
            .true_position
            .as_ref()
            .map(|c| FixInjector::build_with_provider(c, "gps"))
    }
}

impl PermissionApi for SimulatedDevice {
    fn api_level(&self) -> u32 {
        self.state().profile.api_level
    }

    fn package_name(&self) -> &str {
        &self.package
    }

    fn check_self_permission(&self, permission: &str) -> Result<bool, PlatformError> {
        Ok(self.state().profile.grants(permission))
    }

    fn check_package_permission(
        &self,
        permission: &str,
        package: &str,
    ) -> Result<bool, PlatformError> {
        let state = self.state();
        if state.profile.package_name != package {
            return Err(PlatformError::Failed(format!("unknown package {package}")));
        }
        Ok(state.profile.grants(permission))
    }

    fn get_provider(&self, name: &str) -> Result<(), PlatformError> {
        if name != MOCK_PROVIDER {
            return Err(PlatformError::Failed(format!("no provider named {name}")));
        }
        match self.state().profile.mock_provider {
            ProviderAvailability::Enabled => Ok(()),
            ProviderAvailability::Disabled => Err(PlatformError::Failed(
                "mock provider is disabled".to_string(),
            )),
            ProviderAvailability::Unsupported => Err(PlatformError::Unsupported(
                "provider lookup".to_string(),
            )),
        }
    }
}

impl LocationApi for SimulatedDevice {
    fn set_mock_mode(&self, enabled: bool) -> Result<(), PlatformError> {
        let mut state = self.state();
        if enabled {
            if let Some(e) = state.failure.take() {
                return Err(e);
            }
        } else {
            state.releases += 1;
            state.mock_fix = None;
        }
        debug!("Mock mode -> {enabled}");
        state.mock_mode = enabled;
        Ok(())
    }

    fn set_mock_location(&self, fix: &PlatformFix) -> Result<(), PlatformError> {
        let mut state = self.state();
        if !state.mock_mode {
            return Err(PlatformError::Security(
                "mock mode is not enabled".to_string(),
            ));
        }
        if let Some(e) = state.failure.take() {
            return Err(e);
        }
        trace!("Reporting mocked fix {}, {}", fix.latitude, fix.longitude);
        state.mock_fix = Some(fix.clone());
        state.injections.push(fix.clone());
        for sink in state.listeners.values() {
            sink(fix.clone());
        }
        Ok(())
    }

    fn last_location(&self, callback: FixCallback) -> Result<(), PlatformError> {
        let answer = {
            let mut state = self.state();
            if state.defer_queries {
                state.deferred.push(callback);
                return Ok(());
            }
            Self::visible_fix(&state)
        };
        callback(Ok(answer));
        Ok(())
    }

    fn request_updates(
        &self,
        request: &LocationRequest,
        sink: UpdateSink,
    ) -> Result<u64, PlatformError> {
        let mut state = self.state();
        let id = state.next_listener;
        state.next_listener += 1;
        debug!(
            "Registered update listener {id} every {:?}",
            request.interval
        );
        state.listeners.insert(id, sink);
        Ok(id)
    }

    fn remove_updates(&self, id: u64) {
        if self.state().listeners.remove(&id).is_some() {
            debug!("Removed update listener {id}");
        }
    }
}

impl ForegroundHost for SimulatedDevice {
    fn start_foreground(&self, surface: &ControlSurface) -> Result<(), PlatformError> {
        let mut state = self.state();
        state.foreground = Some(surface.clone());
        state.foreground_grants += 1;
        Ok(())
    }

    fn stop_foreground(&self) {
        self.state().foreground = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Coordinate;

    #[test]
    fn mocked_fix_hides_true_position() {
        let device = SimulatedDevice::new(DeviceProfile {
            true_position: Some(Coordinate::new(52.52, 13.405).unwrap()),
            ..Default::default()
        });
        assert_eq!(device.reported_fix().unwrap().latitude, 52.52);

        let fix = FixInjector::build(&Coordinate::new(1.0, 2.0).unwrap());
        assert!(device.set_mock_location(&fix).is_err());

        device.set_mock_mode(true).unwrap();
        device.set_mock_location(&fix).unwrap();
        assert_eq!(device.reported_fix().unwrap().latitude, 1.0);

        device.set_mock_mode(false).unwrap();
        assert_eq!(device.reported_fix().unwrap().latitude, 52.52);
        assert_eq!(device.releases(), 1);
    }

    #[test]
    fn provider_lookup_follows_profile() {
        let device = SimulatedDevice::default();
        assert!(device.get_provider(MOCK_PROVIDER).is_ok());
        device.set_mock_provider(ProviderAvailability::Unsupported);
        assert!(matches!(
            device.get_provider(MOCK_PROVIDER),
            Err(PlatformError::Unsupported(_))
        ));
        assert!(device.get_provider("gps").is_err());
    }

    #[test]
    fn package_name_is_stable() {
        let device = SimulatedDevice::default();
        assert_eq!(device.package_name(), "com.fakelocation.app");
        assert_eq!(device.package_name(), device.package_name());
    }
}
