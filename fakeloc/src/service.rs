//! Background continuity service
//!
//! Keeps an injected fix alive while no foreground UI exists. The service runs as its own
//! tokio task fed by START/STOP commands and never looks at the coordinator's state machine;
//! the only thing it shares with the foreground is the [`FixInjector`] lock.
//!
//! The [`ServiceHost`] plays the part of the operating system: it launches the task on first
//! command, and if the task is killed from outside it can re-deliver the last START
//! ([`ServiceHost::relaunch`]). That record only lives in memory.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    Coordinate, SpoofError,
    coordinate::DEFAULT_ACCURACY,
    injector::{Controller, FixInjector},
    platform::ForegroundHost,
};

pub const ACTION_START: &str = "START_SPOOFING";
pub const ACTION_STOP: &str = "STOP_SPOOFING";
pub const EXTRA_LATITUDE: &str = "latitude";
pub const EXTRA_LONGITUDE: &str = "longitude";
pub const EXTRA_ACCURACY: &str = "accuracy";

pub const CHANNEL_ID: &str = "location_spoofing_channel";
pub const NOTIFICATION_ID: u32 = 1001;

/// The persistent notification shown while the service holds its foreground guarantee
#[derive(Debug, Clone, PartialEq)]
pub struct ControlSurface {
    pub channel_id: String,
    pub notification_id: u32,
    pub title: String,
    pub text: String,
    /// Label of the single action, which delivers [`ACTION_STOP`]
    pub stop_label: String,
    /// Ongoing surfaces can't be dismissed by the user
    pub ongoing: bool,
    pub low_priority: bool,
}

impl Default for ControlSurface {
    fn default() -> Self {
        Self {
            channel_id: CHANNEL_ID.to_string(),
            notification_id: NOTIFICATION_ID,
            title: "Location Spoofing Active".to_string(),
            text: "Your location is being spoofed".to_string(),
            stop_label: "Stop Spoofing".to_string(),
            ongoing: true,
            low_priority: true,
        }
    }
}

impl ControlSurface {
    pub fn stop_action(&self) -> &'static str {
        ACTION_STOP
    }
}

/// A command understood by the service
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceCommand {
    Start(Coordinate),
    Stop,
}

impl ServiceCommand {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Start(_) => ACTION_START,
            Self::Stop => ACTION_STOP,
        }
    }

    /// Parses a named action and its extras
    ///
    /// Missing latitude or longitude default to 0, a missing accuracy to the default radius.
    ///
    /// # Errors
    /// - `UnknownCommand` for any other action
    /// - `InvalidCoordinate` if the extras are out of range
    pub fn from_action(action: &str, extras: &plist::Dictionary) -> Result<Self, SpoofError> {
        match action {
            ACTION_START => {
                let real = |key: &str| extras.get(key).and_then(|v| v.as_real());
                let latitude = real(EXTRA_LATITUDE).unwrap_or(0.0);
                let longitude = real(EXTRA_LONGITUDE).unwrap_or(0.0);
                let accuracy = real(EXTRA_ACCURACY)
                    .map(|a| a as f32)
                    .unwrap_or(DEFAULT_ACCURACY);
                Ok(Self::Start(Coordinate::with_accuracy(
                    latitude, longitude, accuracy,
                )?))
            }
            ACTION_STOP => Ok(Self::Stop),
            _ => Err(SpoofError::UnknownCommand(action.to_string())),
        }
    }

    /// The extras carried by this command
    pub fn extras(&self) -> plist::Dictionary {
        let mut extras = plist::Dictionary::new();
        if let Self::Start(c) = self {
            extras.insert(EXTRA_LATITUDE.into(), c.latitude().into());
            extras.insert(EXTRA_LONGITUDE.into(), c.longitude().into());
            extras.insert(EXTRA_ACCURACY.into(), (c.accuracy() as f64).into());
        }
        extras
    }
}

/// Why the service task ended
#[derive(Debug)]
pub enum ServiceExit {
    /// A STOP command was handled
    Stopped,
    /// A START could not be honored; the task cleaned up after itself
    Failed(SpoofError),
    /// Every command sender went away
    Detached,
}

/// Last START delivered. Cleared by STOP, or by the service when that START failed.
type StickyRecord = Arc<Mutex<Option<ServiceCommand>>>;

fn sticky(record: &StickyRecord) -> MutexGuard<'_, Option<ServiceCommand>> {
    record.lock().unwrap_or_else(|e| e.into_inner())
}

/// The long-running task body
struct ContinuityService {
    injector: FixInjector,
    foreground: Arc<dyn ForegroundHost>,
    surface: ControlSurface,
    in_foreground: bool,
    record: StickyRecord,
}

impl ContinuityService {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ServiceCommand>) -> ServiceExit {
        info!("Continuity service started");
        let mut pending = None;
        loop {
            let command = match pending.take() {
                Some(command) => command,
                None => match commands.recv().await {
                    Some(command) => command,
                    None => break,
                },
            };
            debug!("Service received {}", command.action());
            let Some(exit) = self.handle(&command) else {
                continue;
            };

            // Senders hold the record while queueing, so nothing can slip in after this check
            let mut last = sticky(&self.record);
            if matches!(exit, ServiceExit::Failed(_)) && last.as_ref() == Some(&command) {
                *last = None;
            }
            match commands.try_recv() {
                Ok(next) => {
                    info!(
                        "Continuity service ended ({exit:?}) with {} queued, carrying on",
                        next.action()
                    );
                    pending = Some(next);
                }
                Err(_) => {
                    commands.close();
                    drop(last);
                    info!("Continuity service terminated: {exit:?}");
                    return exit;
                }
            }
        }
        debug!("All command senders dropped, service detached");
        ServiceExit::Detached
    }

    fn handle(&mut self, command: &ServiceCommand) -> Option<ServiceExit> {
        match command {
            ServiceCommand::Start(coordinate) => {
                if !self.in_foreground {
                    if let Err(e) = self.foreground.start_foreground(&self.surface) {
                        warn!("Foreground guarantee refused: {e}");
                        return Some(ServiceExit::Failed(SpoofError::ForegroundUnavailable(
                            e.to_string(),
                        )));
                    }
                    self.in_foreground = true;
                }

                let fix = FixInjector::build(coordinate);
                match self.injector.inject(Controller::Background, &fix) {
                    Ok(()) => {
                        info!("Service keeping {coordinate} alive");
                        None
                    }
                    Err(e) => {
                        warn!("Service failed to inject {coordinate}: {e}");
                        self.injector.release_if_held(Controller::Background);
                        self.leave_foreground();
                        Some(ServiceExit::Failed(e))
                    }
                }
            }
            ServiceCommand::Stop => {
                self.injector.release(Controller::Background);
                self.leave_foreground();
                Some(ServiceExit::Stopped)
            }
        }
    }

    fn leave_foreground(&mut self) {
        self.foreground.stop_foreground();
        self.in_foreground = false;
    }
}

struct RunningService {
    sender: mpsc::UnboundedSender<ServiceCommand>,
    task: JoinHandle<ServiceExit>,
}

/// Launches the continuity service and delivers commands to it
///
/// Must be used from within a tokio runtime.
pub struct ServiceHost {
    injector: FixInjector,
    foreground: Arc<dyn ForegroundHost>,
    surface: ControlSurface,
    record: StickyRecord,
    running: Option<RunningService>,
}

impl std::fmt::Debug for ServiceHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHost")
            .field("last_command", &*sticky(&self.record))
            .field("running", &self.is_running())
            .finish()
    }
}

impl ServiceHost {
    pub fn new(injector: FixInjector, foreground: Arc<dyn ForegroundHost>) -> Self {
        Self {
            injector,
            foreground,
            surface: ControlSurface::default(),
            record: Arc::new(Mutex::new(None)),
            running: None,
        }
    }

    pub fn with_surface(mut self, surface: ControlSurface) -> Self {
        self.surface = surface;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .map(|r| !r.task.is_finished())
            .unwrap_or(false)
    }

    /// The command that would be re-delivered on relaunch
    pub fn last_command(&self) -> Option<ServiceCommand> {
        sticky(&self.record).clone()
    }

    /// Delivers a command, launching the service first if it isn't running
    ///
    /// # Errors
    /// `ServiceStopped` if the service terminated before it could take the command
    pub fn deliver(&mut self, command: ServiceCommand) -> Result<(), SpoofError> {
        let record = self.record.clone();
        // A terminating service closes its channel only while holding this lock
        let mut last = sticky(&record);
        match &command {
            ServiceCommand::Start(_) => *last = Some(command.clone()),
            ServiceCommand::Stop => *last = None,
        }

        let sender = self.ensure_running();
        sender
            .send(command)
            .map_err(|_| SpoofError::ServiceStopped)
    }

    /// Parses and delivers a named action
    pub fn deliver_action(
        &mut self,
        action: &str,
        extras: &plist::Dictionary,
    ) -> Result<(), SpoofError> {
        let command = ServiceCommand::from_action(action, extras)?;
        self.deliver(command)
    }

    fn ensure_running(&mut self) -> mpsc::UnboundedSender<ServiceCommand> {
        if let Some(running) = &self.running {
            if !running.sender.is_closed() {
                return running.sender.clone();
            }
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let service = ContinuityService {
            injector: self.injector.clone(),
            foreground: self.foreground.clone(),
            surface: self.surface.clone(),
            in_foreground: false,
            record: self.record.clone(),
        };
        let task = tokio::spawn(service.run(receiver));
        self.running = Some(RunningService {
            sender: sender.clone(),
            task,
        });
        sender
    }

    /// Waits for the service to terminate on its own
    ///
    /// # Returns
    /// `None` if no service was running
    pub async fn join(&mut self) -> Option<ServiceExit> {
        let running = self.running.as_mut()?;
        // Awaiting through a reference keeps the service intact if this future is dropped
        let result = (&mut running.task).await;
        self.running = None;
        match result {
            Ok(exit) => Some(exit),
            Err(e) => {
                warn!("Continuity service task ended abnormally: {e}");
                None
            }
        }
    }

    /// Kills the service the way the platform would under memory pressure. The sticky record
    /// survives and the injected fix is left in place.
    pub fn kill(&mut self) {
        if let Some(running) = self.running.take() {
            running.task.abort();
            self.foreground.stop_foreground();
            info!("Continuity service killed");
        }
    }

    /// Re-delivers the last START after the service was killed
    ///
    /// # Returns
    /// Whether a command was re-delivered
    pub fn relaunch(&mut self) -> Result<bool, SpoofError> {
        if self.is_running() {
            return Ok(false);
        }
        match self.last_command() {
            Some(command) => {
                info!("Relaunching continuity service with {}", command.action());
                self.deliver(command)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        platform::{MOCK_LOCATION, PlatformError, simulated::SimulatedDevice},
        preconditions::PreconditionChecker,
    };

    fn host() -> (Arc<SimulatedDevice>, ServiceHost) {
        let device = Arc::new(SimulatedDevice::default());
        let injector = FixInjector::new(PreconditionChecker::new(device.clone()), device.clone());
        (device.clone(), ServiceHost::new(injector, device))
    }

    fn start(lat: f64, lon: f64) -> ServiceCommand {
        ServiceCommand::Start(Coordinate::new(lat, lon).unwrap())
    }

    #[tokio::test]
    async fn start_then_stop() {
        let (device, mut host) = host();
        let mut extras = plist::Dictionary::new();
        extras.insert(EXTRA_LATITUDE.into(), 1.35.into());
        extras.insert(EXTRA_LONGITUDE.into(), 103.82.into());
        extras.insert(EXTRA_ACCURACY.into(), 10.0.into());
        host.deliver_action(ACTION_START, &extras).unwrap();
        host.deliver_action(ACTION_STOP, &plist::Dictionary::new())
            .unwrap();

        assert!(matches!(host.join().await, Some(ServiceExit::Stopped)));
        let injections = device.injections();
        assert_eq!(injections.len(), 1);
        assert_eq!(injections[0].latitude, 1.35);
        assert_eq!(injections[0].longitude, 103.82);
        assert_eq!(device.releases(), 1);
        assert!(device.foreground_surface().is_none());
        assert!(!host.is_running());
        assert!(host.last_command().is_none());
    }

    #[tokio::test]
    async fn shows_control_surface_while_active() {
        let (device, mut host) = host();
        host.deliver(start(48.8566, 2.3522)).unwrap();
        while device.injections().is_empty() {
            tokio::task::yield_now().await;
        }
        let surface = device.foreground_surface().unwrap();
        assert!(surface.ongoing);
        assert_eq!(surface.channel_id, CHANNEL_ID);
        assert_eq!(surface.stop_action(), ACTION_STOP);

        host.deliver(start(35.6762, 139.6503)).unwrap();
        host.deliver(ServiceCommand::Stop).unwrap();
        host.join().await;
        assert_eq!(device.injections().len(), 2);
        assert_eq!(device.foreground_grants(), 1);
    }

    #[tokio::test]
    async fn injection_failure_terminates() {
        let (device, mut host) = host();
        device.set_permission(MOCK_LOCATION, false);
        host.deliver(start(0.0, 0.0)).unwrap();

        assert!(matches!(
            host.join().await,
            Some(ServiceExit::Failed(SpoofError::PermissionDenied))
        ));
        assert!(device.foreground_surface().is_none());
        assert_eq!(device.foreground_grants(), 1);
        assert!(device.injections().is_empty());
        assert!(host.last_command().is_none());
        assert!(!host.relaunch().unwrap());
    }

    #[tokio::test]
    async fn platform_rejection_terminates() {
        let (device, mut host) = host();
        device.fail_next_injection(PlatformError::Failed("gone".into()));
        host.deliver(start(5.0, 5.0)).unwrap();
        assert!(matches!(
            host.join().await,
            Some(ServiceExit::Failed(SpoofError::InjectionFailed(_)))
        ));
        assert!(!device.mock_mode());
    }

    #[tokio::test]
    async fn relaunch_redelivers_last_start() {
        let (device, mut host) = host();
        host.deliver(start(31.2304, 121.4737)).unwrap();
        while device.injections().is_empty() {
            tokio::task::yield_now().await;
        }

        host.kill();
        assert!(!host.is_running());
        assert_eq!(host.last_command(), Some(start(31.2304, 121.4737)));

        assert!(host.relaunch().unwrap());
        while device.injections().len() < 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(device.injections()[1].latitude, 31.2304);
        assert!(device.foreground_surface().is_some());

        host.deliver(ServiceCommand::Stop).unwrap();
        host.join().await;
        assert!(!host.relaunch().unwrap());
    }

    #[tokio::test]
    async fn stop_then_start_relaunches() {
        let (device, mut host) = host();
        host.deliver(start(1.0, 1.0)).unwrap();
        while device.injections().is_empty() {
            tokio::task::yield_now().await;
        }

        host.deliver(ServiceCommand::Stop).unwrap();
        host.deliver(start(2.0, 2.0)).unwrap();
        while device.injections().len() < 2 {
            tokio::task::yield_now().await;
        }
        assert!(host.is_running());
        assert_eq!(host.last_command(), Some(start(2.0, 2.0)));
        assert!(device.mock_mode());
        assert_eq!(device.reported_fix().unwrap().latitude, 2.0);
        assert!(device.foreground_surface().is_some());
        assert_eq!(device.foreground_grants(), 2);

        host.deliver(ServiceCommand::Stop).unwrap();
        assert!(matches!(host.join().await, Some(ServiceExit::Stopped)));
        assert!(!device.mock_mode());
    }

    #[tokio::test]
    async fn start_after_service_exit_launches_again() {
        let (device, mut host) = host();
        host.deliver(start(1.0, 1.0)).unwrap();
        host.deliver(ServiceCommand::Stop).unwrap();
        assert!(matches!(host.join().await, Some(ServiceExit::Stopped)));

        host.deliver(start(3.0, 3.0)).unwrap();
        while device.injections().len() < 2 {
            tokio::task::yield_now().await;
        }
        assert!(host.is_running());
        assert_eq!(device.reported_fix().unwrap().latitude, 3.0);

        host.deliver(ServiceCommand::Stop).unwrap();
        host.join().await;
    }

    #[tokio::test]
    async fn start_queued_behind_failed_start_runs() {
        let (device, mut host) = host();
        device.fail_next_injection(PlatformError::Failed("busy".into()));
        host.deliver(start(5.0, 5.0)).unwrap();
        host.deliver(start(6.0, 6.0)).unwrap();

        while device.injections().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(host.is_running());
        assert_eq!(device.injections()[0].latitude, 6.0);
        assert_eq!(host.last_command(), Some(start(6.0, 6.0)));
        assert!(device.foreground_surface().is_some());
        assert_eq!(device.foreground_grants(), 2);

        host.deliver(ServiceCommand::Stop).unwrap();
        assert!(matches!(host.join().await, Some(ServiceExit::Stopped)));
    }

    #[test]
    fn parses_actions() {
        let empty = plist::Dictionary::new();
        assert_eq!(
            ServiceCommand::from_action(ACTION_START, &empty).unwrap(),
            start(0.0, 0.0)
        );
        assert_eq!(
            ServiceCommand::from_action(ACTION_STOP, &empty).unwrap(),
            ServiceCommand::Stop
        );
        assert!(matches!(
            ServiceCommand::from_action("RESTART", &empty),
            Err(SpoofError::UnknownCommand(_))
        ));

        let mut bad = plist::Dictionary::new();
        bad.insert(EXTRA_LATITUDE.into(), 95.0.into());
        assert!(matches!(
            ServiceCommand::from_action(ACTION_START, &bad),
            Err(SpoofError::InvalidCoordinate(_))
        ));

        let extras = start(1.5, -2.5).extras();
        assert_eq!(
            ServiceCommand::from_action(ACTION_START, &extras).unwrap(),
            start(1.5, -2.5)
        );
    }

    #[tokio::test]
    async fn foreground_failure_keeps_background_fix() {
        let device = Arc::new(SimulatedDevice::default());
        let mut coordinator =
            crate::coordinator::SpoofingCoordinator::from_platform(device.clone());
        let mut host = ServiceHost::new(coordinator.injector().clone(), device.clone());

        host.deliver(start(39.9042, 116.4074)).unwrap();
        while device.injections().is_empty() {
            tokio::task::yield_now().await;
        }

        device.set_permission(MOCK_LOCATION, false);
        assert!(coordinator.start_spoofing(Coordinate::new(1.0, 1.0).unwrap()).is_err());
        assert!(device.mock_mode());
        assert_eq!(device.reported_fix().unwrap().latitude, 39.9042);

        device.set_permission(MOCK_LOCATION, true);
        device.fail_next_injection(PlatformError::Failed("boom".into()));
        assert!(coordinator.start_spoofing(Coordinate::new(1.0, 1.0).unwrap()).is_err());
        assert!(device.mock_mode());
        assert_eq!(device.reported_fix().unwrap().latitude, 39.9042);
        assert_eq!(
            coordinator.injector().holder(),
            Some(Controller::Background)
        );
        assert!(host.is_running());
        assert!(device.foreground_surface().is_some());

        host.deliver(ServiceCommand::Stop).unwrap();
        host.join().await;
        assert!(!device.mock_mode());
    }
}
