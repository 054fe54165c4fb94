//! The spoofing state machine
//!
//! [`SpoofingCoordinator`] owns the target coordinate and publishes a [`SpoofingState`] on a
//! watch channel. Late subscribers see the current state immediately; a slow subscriber only
//! ever misses superseded states, never sees them out of order.
//!
//! Every state is re-enterable. `start_spoofing` moves to `Active` or `Error` from anywhere,
//! `stop_spoofing` always lands on `Inactive`, and `update_location` only acts while `Active`.

use std::{fmt, sync::Arc};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::{
    Coordinate, SpoofError,
    injector::{Controller, FixInjector},
    platform::{LocationApi, PermissionApi, PlatformFix},
    preconditions::PreconditionChecker,
    reader::{LocationReader, LocationUpdates},
};

/// What the coordinator is currently doing
#[derive(Debug, Clone, PartialEq)]
pub enum SpoofingState {
    /// No fix is being injected
    Inactive,
    /// The coordinate is being reported in place of the real position
    Active(Coordinate),
    /// The last attempt to start failed; no fix is being injected
    Error(String),
}

impl SpoofingState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }

    /// The injected coordinate while active
    pub fn coordinate(&self) -> Option<&Coordinate> {
        match self {
            Self::Active(c) => Some(c),
            Self::Inactive | Self::Error(_) => None,
        }
    }
}

impl fmt::Display for SpoofingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactive => write!(f, "inactive"),
            Self::Active(c) => write!(f, "active at {c}"),
            Self::Error(message) => write!(f, "error: {message}"),
        }
    }
}

/// Drives spoofing from the foreground and publishes its state
#[derive(Debug)]
pub struct SpoofingCoordinator {
    injector: FixInjector,
    reader: LocationReader,
    state: watch::Sender<SpoofingState>,
    target: Option<Coordinate>,
}

impl SpoofingCoordinator {
    pub fn new(injector: FixInjector, reader: LocationReader) -> Self {
        let (state, _) = watch::channel(SpoofingState::Inactive);
        Self {
            injector,
            reader,
            state,
            target: None,
        }
    }

    /// Wires a coordinator straight onto a platform
    pub fn from_platform<P>(platform: Arc<P>) -> Self
    where
        P: PermissionApi + LocationApi + 'static,
    {
        let checker = PreconditionChecker::new(platform.clone());
        let reader = LocationReader::new(checker.clone(), platform.clone());
        Self::new(FixInjector::new(checker, platform), reader)
    }

    /// The injector this coordinator writes through, for sharing with a background task
    pub fn injector(&self) -> &FixInjector {
        &self.injector
    }

    /// Observes state changes. The receiver starts out holding the current state.
    pub fn subscribe(&self) -> watch::Receiver<SpoofingState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SpoofingState {
        self.state.borrow().clone()
    }

    /// The coordinate being injected, if active
    pub fn current_target(&self) -> Option<&Coordinate> {
        self.target.as_ref()
    }

    /// Starts reporting `coordinate`, replacing any fix already injected
    ///
    /// # Errors
    /// Any precondition or injection failure. The state moves to `Error` with the same
    /// message and nothing is retried.
    pub fn start_spoofing(&mut self, coordinate: Coordinate) -> Result<(), SpoofError> {
        let fix = FixInjector::build(&coordinate);
        match self.injector.inject(Controller::Foreground, &fix) {
            Ok(()) => {
                info!("Spoofing location at {coordinate}");
                self.target = Some(coordinate.clone());
                self.transition(SpoofingState::Active(coordinate));
                Ok(())
            }
            Err(e) => {
                // An earlier fix of ours may still be live if only the preconditions failed
                if self.target.take().is_some()
                    && self.injector.release_if_held(Controller::Foreground)
                {
                    debug!("Released previous fix after failed restart");
                }
                self.transition(SpoofingState::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Stops spoofing. Safe to call from any state.
    pub fn stop_spoofing(&mut self) {
        self.injector.release(Controller::Foreground);
        self.target = None;
        self.transition(SpoofingState::Inactive);
    }

    /// Moves an active spoof to `coordinate`. Does nothing unless currently active.
    ///
    /// # Errors
    /// Same as [`Self::start_spoofing`]
    pub fn update_location(&mut self, coordinate: Coordinate) -> Result<(), SpoofError> {
        if !self.state.borrow().is_active() {
            debug!("Ignoring location update while not spoofing");
            return Ok(());
        }
        self.start_spoofing(coordinate)
    }

    /// Whether the developer-settings mock provider is switched on
    pub fn is_mock_location_enabled(&self) -> bool {
        self.injector.checker().is_mock_provider_enabled()
    }

    /// Whether the app holds the mock-location capability
    pub fn has_mock_location_permission(&self) -> bool {
        self.injector.checker().has_mock_capability()
    }

    /// The location every consumer currently sees
    pub async fn current_location(&self) -> Result<Option<PlatformFix>, SpoofError> {
        self.reader.current_location().await
    }

    pub fn location_updates(&self) -> Result<LocationUpdates, SpoofError> {
        self.reader.updates()
    }

    fn transition(&mut self, next: SpoofingState) {
        debug!("State -> {next}");
        self.state.send_replace(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        platform::{MOCK_LOCATION, PlatformError, simulated::SimulatedDevice},
        profile::ProviderAvailability,
    };

    fn coordinator() -> (Arc<SimulatedDevice>, SpoofingCoordinator) {
        let device = Arc::new(SimulatedDevice::default());
        let c = SpoofingCoordinator::from_platform(device.clone());
        (device, c)
    }

    fn at(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    #[test]
    fn starts_inactive() {
        let (_, c) = coordinator();
        assert_eq!(c.state(), SpoofingState::Inactive);
        assert_eq!(*c.subscribe().borrow(), SpoofingState::Inactive);
        assert!(c.current_target().is_none());
    }

    #[test]
    fn start_with_preconditions_met() {
        let (device, mut c) = coordinator();
        let sf = Coordinate::with_accuracy(37.7749, -122.4194, 10.0).unwrap();
        c.start_spoofing(sf.clone()).unwrap();

        assert_eq!(c.state(), SpoofingState::Active(sf.clone()));
        assert_eq!(c.current_target(), Some(&sf));
        let injections = device.injections();
        assert_eq!(injections.len(), 1);
        assert_eq!(injections[0].latitude, 37.7749);
        assert_eq!(injections[0].longitude, -122.4194);
    }

    #[test]
    fn stop_twice_from_inactive() {
        let (device, mut c) = coordinator();
        let mut rx = c.subscribe();
        c.stop_spoofing();
        c.stop_spoofing();
        assert_eq!(c.state(), SpoofingState::Inactive);
        assert_eq!(*rx.borrow_and_update(), SpoofingState::Inactive);
        assert!(device.injections().is_empty());
        assert!(!device.mock_mode());
    }

    #[test]
    fn restart_replaces_without_passing_inactive() {
        let (device, mut c) = coordinator();
        let mut rx = c.subscribe();

        c.start_spoofing(at(40.7128, -74.0060)).unwrap();
        assert_eq!(*rx.borrow_and_update(), SpoofingState::Active(at(40.7128, -74.0060)));

        c.start_spoofing(at(51.5074, -0.1278)).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), SpoofingState::Active(at(51.5074, -0.1278)));
        assert_eq!(device.releases(), 0);
        assert_eq!(device.injections().len(), 2);
        assert_eq!(device.reported_fix().unwrap().latitude, 51.5074);
    }

    #[test]
    fn missing_capability_never_injects() {
        let (device, mut c) = coordinator();
        device.set_permission(MOCK_LOCATION, false);
        let err = c.start_spoofing(at(10.0, 20.0)).unwrap_err();
        assert!(matches!(err, SpoofError::PermissionDenied));
        assert_eq!(
            c.state(),
            SpoofingState::Error("Mock location permission not granted".into())
        );
        assert!(device.injections().is_empty());
        assert!(!c.has_mock_location_permission());
    }

    #[test]
    fn disabled_provider_reports_not_enabled() {
        let (device, mut c) = coordinator();
        device.set_mock_provider(ProviderAvailability::Disabled);
        assert!(!c.is_mock_location_enabled());
        assert!(c.start_spoofing(at(0.0, 0.0)).is_err());
        match c.state() {
            SpoofingState::Error(m) => assert!(m.contains("not enabled")),
            other => panic!("unexpected state {other:?}"),
        }
        assert!(device.injections().is_empty());
    }

    #[test]
    fn update_while_inactive_is_noop() {
        let (device, mut c) = coordinator();
        c.update_location(at(1.0, 1.0)).unwrap();
        assert_eq!(c.state(), SpoofingState::Inactive);
        assert!(device.injections().is_empty());
    }

    #[test]
    fn update_while_active_reinjects() {
        let (device, mut c) = coordinator();
        c.start_spoofing(at(1.0, 1.0)).unwrap();
        c.update_location(at(2.0, 2.0)).unwrap();
        assert_eq!(c.state(), SpoofingState::Active(at(2.0, 2.0)));
        assert_eq!(device.injections().len(), 2);
    }

    #[test]
    fn update_while_errored_is_noop() {
        let (device, mut c) = coordinator();
        device.set_permission(MOCK_LOCATION, false);
        let _ = c.start_spoofing(at(1.0, 1.0));
        device.set_permission(MOCK_LOCATION, true);
        c.update_location(at(2.0, 2.0)).unwrap();
        assert!(matches!(c.state(), SpoofingState::Error(_)));
        assert!(device.injections().is_empty());
    }

    #[test]
    fn failed_restart_drops_previous_fix() {
        let (device, mut c) = coordinator();
        c.start_spoofing(at(1.0, 1.0)).unwrap();
        device.set_permission(MOCK_LOCATION, false);
        assert!(c.update_location(at(2.0, 2.0)).is_err());
        assert!(matches!(c.state(), SpoofingState::Error(_)));
        assert!(c.current_target().is_none());
        assert!(!device.mock_mode());
    }

    #[test]
    fn injection_failure_then_recovery() {
        let (device, mut c) = coordinator();
        device.fail_next_injection(PlatformError::Failed("provider crashed".into()));
        assert!(c.start_spoofing(at(3.0, 3.0)).is_err());
        match c.state() {
            SpoofingState::Error(m) => {
                assert_eq!(m, "Failed to set mock location: provider crashed")
            }
            other => panic!("unexpected state {other:?}"),
        }

        c.start_spoofing(at(3.0, 3.0)).unwrap();
        assert!(c.state().is_active());
        c.stop_spoofing();
        assert_eq!(c.state(), SpoofingState::Inactive);
        assert!(!device.mock_mode());
    }

    #[tokio::test]
    async fn late_subscriber_sees_current_state() {
        let (_, mut c) = coordinator();
        c.start_spoofing(at(22.3193, 114.1694)).unwrap();
        let rx = c.subscribe();
        assert_eq!(
            rx.borrow().coordinate().map(|c| c.latitude()),
            Some(22.3193)
        );

        let location = c.current_location().await.unwrap().unwrap();
        assert_eq!(location.longitude, 114.1694);
    }
}
