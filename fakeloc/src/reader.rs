//! Reads the location the platform currently reports
//!
//! Used for display only. The answer is whatever every other consumer sees, so while a fix is
//! injected this returns the mocked position.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use futures::Stream;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::{
    SpoofError,
    platform::{LocationApi, PlatformFix},
    preconditions::PreconditionChecker,
};

/// Power/accuracy tradeoff requested from the location subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    HighAccuracy,
    BalancedPowerAccuracy,
    LowPower,
    Passive,
}

/// Parameters for continuous updates
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRequest {
    pub priority: Priority,
    pub interval: Duration,
    /// Updates are never delivered faster than this
    pub min_interval: Duration,
    pub wait_for_accurate_location: bool,
}

impl Default for LocationRequest {
    fn default() -> Self {
        Self {
            priority: Priority::HighAccuracy,
            interval: Duration::from_millis(1000),
            min_interval: Duration::from_millis(500),
            wait_for_accurate_location: false,
        }
    }
}

/// Queries the device's reported location
#[derive(Debug, Clone)]
pub struct LocationReader {
    checker: PreconditionChecker,
    location: Arc<dyn LocationApi>,
    request: LocationRequest,
}

impl LocationReader {
    pub fn new(checker: PreconditionChecker, location: Arc<dyn LocationApi>) -> Self {
        Self {
            checker,
            location,
            request: LocationRequest::default(),
        }
    }

    pub fn with_request(mut self, request: LocationRequest) -> Self {
        self.request = request;
        self
    }

    /// Gets the last known location
    ///
    /// Suspends until the platform answers. Dropping the returned future abandons the query;
    /// a late answer is discarded.
    ///
    /// # Returns
    /// `None` if the platform knows no location yet
    ///
    /// # Errors
    /// - `LocationPermissionDenied` without fine or coarse location permission
    /// - `LocationUnavailable` if the platform query failed
    pub async fn current_location(&self) -> Result<Option<PlatformFix>, SpoofError> {
        if !self.checker.has_location_permission() {
            return Err(SpoofError::LocationPermissionDenied);
        }

        let (tx, rx) = oneshot::channel();
        self.location
            .last_location(Box::new(move |res| {
                if tx.send(res).is_err() {
                    debug!("Location query answered after its caller went away");
                }
            }))
            .map_err(|e| SpoofError::LocationUnavailable(e.to_string()))?;

        match rx.await {
            Ok(Ok(fix)) => Ok(fix),
            Ok(Err(e)) => Err(SpoofError::LocationUnavailable(e.to_string())),
            Err(_) => Err(SpoofError::LocationUnavailable(
                "platform dropped the query".to_string(),
            )),
        }
    }

    /// Subscribes to continuous location updates
    ///
    /// The registration lives as long as the returned stream.
    ///
    /// # Errors
    /// Same as [`Self::current_location`]
    pub fn updates(&self) -> Result<LocationUpdates, SpoofError> {
        if !self.checker.has_location_permission() {
            return Err(SpoofError::LocationPermissionDenied);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let id = self
            .location
            .request_updates(
                &self.request,
                Box::new(move |fix| {
                    if tx.send(fix).is_err() {
                        debug!("Location update arrived after its stream was dropped");
                    }
                }),
            )
            .map_err(|e| SpoofError::LocationUnavailable(e.to_string()))?;

        Ok(LocationUpdates {
            id,
            receiver: rx,
            location: self.location.clone(),
        })
    }
}

/// Stream of reported fixes. Unregisters from the platform when dropped.
#[derive(Debug)]
pub struct LocationUpdates {
    id: u64,
    receiver: mpsc::UnboundedReceiver<PlatformFix>,
    location: Arc<dyn LocationApi>,
}

impl LocationUpdates {
    /// Waits for the next fix
    pub async fn next_fix(&mut self) -> Option<PlatformFix> {
        self.receiver.recv().await
    }
}

impl Stream for LocationUpdates {
    type Item = PlatformFix;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for LocationUpdates {
    fn drop(&mut self) {
        self.location.remove_updates(self.id);
    }
}
