//! Builds platform fixes and pushes them into the location subsystem
//!
//! Mock mode is a single global resource. Both the foreground coordinator and the background
//! continuity task write to it, so every platform call goes through one lock that also
//! remembers which [`Controller`] currently holds the injection.

use std::{
    sync::{Arc, Mutex, MutexGuard, OnceLock},
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use tracing::{debug, info, warn};

use crate::{
    Coordinate, SpoofError,
    platform::{FUSED_PROVIDER, LocationApi, PlatformFix},
    preconditions::PreconditionChecker,
};

/// The control path issuing an inject or release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Controller {
    /// The spoofing coordinator driven by the UI
    Foreground,
    /// The background continuity task
    Background,
}

/// Submits fixes to the platform, shared between control paths
#[derive(Debug, Clone)]
pub struct FixInjector {
    checker: PreconditionChecker,
    location: Arc<dyn LocationApi>,
    holder: Arc<Mutex<Option<Controller>>>,
}

fn monotonic_nanos() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let elapsed = EPOCH.get_or_init(Instant::now).elapsed();
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}

impl FixInjector {
    pub fn new(checker: PreconditionChecker, location: Arc<dyn LocationApi>) -> Self {
        Self {
            checker,
            location,
            holder: Arc::new(Mutex::new(None)),
        }
    }

    /// Constructs a fused-provider fix for `coordinate`, stamped with the current time
    pub fn build(coordinate: &Coordinate) -> PlatformFix {
        Self::build_with_provider(coordinate, FUSED_PROVIDER)
    }

    pub fn build_with_provider(coordinate: &Coordinate, provider: &str) -> PlatformFix {
        let time_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        PlatformFix {
            provider: provider.to_string(),
            latitude: coordinate.latitude(),
            longitude: coordinate.longitude(),
            accuracy: coordinate.accuracy(),
            altitude: 0.0,
            bearing: 0.0,
            speed: 0.0,
            time_ms,
            elapsed_realtime_nanos: monotonic_nanos(),
        }
    }

    pub fn checker(&self) -> &PreconditionChecker {
        &self.checker
    }

    /// The control path currently holding the injection, if any
    pub fn holder(&self) -> Option<Controller> {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Controller>> {
        self.holder.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Puts the platform into mock mode and reports `fix` to every consumer
    ///
    /// # Arguments
    /// * `controller` - The control path taking ownership of the injection
    /// * `fix` - The fix to report
    ///
    /// # Errors
    /// - `PermissionDenied` if the mock capability is missing
    /// - `NotEnabled` if the mock provider is switched off
    /// - `InjectionFailed` if the platform rejected the fix. Mock mode is switched back off
    ///   unless the other controller still holds its own injection.
    pub fn inject(&self, controller: Controller, fix: &PlatformFix) -> Result<(), SpoofError> {
        let mut holder = self.lock();
        self.checker.ensure_injectable()?;

        let previous = *holder;
        if let Some(previous) = previous {
            if previous != controller {
                warn!("{controller:?} is taking over the injection held by {previous:?}");
            }
        }

        let submitted = self
            .location
            .set_mock_mode(true)
            .and_then(|_| self.location.set_mock_location(fix));

        match submitted {
            Ok(()) => {
                debug!(
                    "{controller:?} injected fix {}, {} (±{}m)",
                    fix.latitude, fix.longitude, fix.accuracy
                );
                *holder = Some(controller);
                Ok(())
            }
            Err(e) => {
                warn!("Platform rejected fix: {e}");
                match previous {
                    Some(other) if other != controller => {
                        debug!("Leaving the injection held by {other:?} in place");
                    }
                    _ => {
                        if let Err(e) = self.location.set_mock_mode(false) {
                            warn!("Unable to leave mock mode after failed injection: {e}");
                        }
                        *holder = None;
                    }
                }
                Err(SpoofError::InjectionFailed(e.to_string()))
            }
        }
    }

    /// Takes the platform out of mock mode. Idempotent, never fails.
    pub fn release(&self, controller: Controller) {
        let mut holder = self.lock();
        if let Some(previous) = *holder {
            if previous != controller {
                warn!("{controller:?} is releasing the injection held by {previous:?}");
            }
        }
        if let Err(e) = self.location.set_mock_mode(false) {
            // Nothing the caller could do about it
            warn!("Failed to leave mock mode: {e}");
        }
        if holder.take().is_some() {
            info!("Mock location released by {controller:?}");
        }
    }

    /// Releases only if `controller` holds the injection. Returns whether it did.
    pub fn release_if_held(&self, controller: Controller) -> bool {
        let mut holder = self.lock();
        if *holder != Some(controller) {
            return false;
        }
        if let Err(e) = self.location.set_mock_mode(false) {
            warn!("Failed to leave mock mode: {e}");
        }
        *holder = None;
        true
    }
}
