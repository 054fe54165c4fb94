//! Checks whether the platform will currently accept an injected fix
//!
//! How the mock-location capability and the developer toggle are queried depends on the
//! platform version. Each version bracket gets its own [`CapabilityProbe`], picked once when
//! the [`PreconditionChecker`] is built.

use std::{fmt::Debug, sync::Arc};

use tracing::{debug, warn};

use crate::{
    SpoofError,
    platform::{
        ACCESS_COARSE_LOCATION, ACCESS_FINE_LOCATION, MOCK_LOCATION, MOCK_PROVIDER,
        PermissionApi, PlatformError,
    },
};

/// First API level where the capability is a runtime permission of the calling process and
/// the mock provider can be looked up
pub const SCOPED_MOCK_API_LEVEL: u32 = 29;

/// Version-specific way of answering the two mock-related questions
pub trait CapabilityProbe: Send + Sync + Debug {
    fn has_mock_capability(&self, api: &dyn PermissionApi) -> bool;
    fn is_mock_provider_enabled(&self, api: &dyn PermissionApi) -> bool;
}

/// Platforms before [`SCOPED_MOCK_API_LEVEL`]
#[derive(Debug)]
pub struct LegacyProbe;

impl CapabilityProbe for LegacyProbe {
    fn has_mock_capability(&self, api: &dyn PermissionApi) -> bool {
        api.check_package_permission(MOCK_LOCATION, api.package_name())
            .unwrap_or_else(|e| {
                warn!("Package permission query failed: {e}");
                false
            })
    }

    fn is_mock_provider_enabled(&self, _api: &dyn PermissionApi) -> bool {
        // The toggle can't be queried here, so it never blocks
        true
    }
}

/// Platforms from [`SCOPED_MOCK_API_LEVEL`] on
#[derive(Debug)]
pub struct ScopedProbe;

impl CapabilityProbe for ScopedProbe {
    fn has_mock_capability(&self, api: &dyn PermissionApi) -> bool {
        api.check_self_permission(MOCK_LOCATION).unwrap_or_else(|e| {
            warn!("Self permission query failed: {e}");
            false
        })
    }

    fn is_mock_provider_enabled(&self, api: &dyn PermissionApi) -> bool {
        match api.get_provider(MOCK_PROVIDER) {
            Ok(()) => true,
            Err(PlatformError::Unsupported(what)) => {
                debug!("Mock provider lookup unsupported ({what}), assuming enabled");
                true
            }
            Err(e) => {
                debug!("Mock provider unavailable: {e}");
                false
            }
        }
    }
}

/// Picks the probe for a platform API level
pub fn select_probe(api_level: u32) -> Arc<dyn CapabilityProbe> {
    if api_level >= SCOPED_MOCK_API_LEVEL {
        Arc::new(ScopedProbe)
    } else {
        Arc::new(LegacyProbe)
    }
}

/// Side-effect free queries over the platform's permission state
#[derive(Debug, Clone)]
pub struct PreconditionChecker {
    api: Arc<dyn PermissionApi>,
    probe: Arc<dyn CapabilityProbe>,
}

impl PreconditionChecker {
    /// Builds a checker, selecting the probe for the platform's API level
    pub fn new(api: Arc<dyn PermissionApi>) -> Self {
        let level = api.api_level();
        let probe = select_probe(level);
        debug!("Using {probe:?} for API level {level}");
        Self { api, probe }
    }

    /// Builds a checker with an explicit probe
    pub fn with_probe(api: Arc<dyn PermissionApi>, probe: Arc<dyn CapabilityProbe>) -> Self {
        Self { api, probe }
    }

    /// Whether the app may override reported locations
    pub fn has_mock_capability(&self) -> bool {
        self.probe.has_mock_capability(self.api.as_ref())
    }

    /// Whether fine or coarse location permission is granted
    pub fn has_location_permission(&self) -> bool {
        [ACCESS_FINE_LOCATION, ACCESS_COARSE_LOCATION]
            .iter()
            .any(|p| self.api.check_self_permission(p).unwrap_or(false))
    }

    /// Whether the developer-settings mock provider is switched on
    pub fn is_mock_provider_enabled(&self) -> bool {
        self.probe.is_mock_provider_enabled(self.api.as_ref())
    }

    /// Checks everything an injection needs, capability first
    ///
    /// # Errors
    /// `PermissionDenied` without the capability, `NotEnabled` with the provider switched off
    pub fn ensure_injectable(&self) -> Result<(), SpoofError> {
        if !self.has_mock_capability() {
            return Err(SpoofError::PermissionDenied);
        }
        if !self.is_mock_provider_enabled() {
            return Err(SpoofError::NotEnabled);
        }
        Ok(())
    }
}
