//! Geolocation watch capability. The shell owns the platform location
//! manager; the core asks it to start a filtered watch and receives a stream
//! of fixes until the watch is stopped.

use crux_core::capability::{Capability, CapabilityContext, Operation};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{TRACKING_MIN_DISTANCE_M, TRACKING_MIN_INTERVAL_MS};

pub struct Location<Ev> {
    context: CapabilityContext<LocationOperation, Ev>,
}

impl<Ev> Capability<Ev> for Location<Ev> {
    type Operation = LocationOperation;
    type MappedSelf<MappedEv> = Location<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Location::new(self.context.map_event(f))
    }
}

impl<Ev> Clone for Location<Ev> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
        }
    }
}

impl<Ev> Location<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<LocationOperation, Ev>) -> Self {
        Self { context }
    }

    /// Starts a position watch. `make_event` runs once per delivered fix
    /// until the shell ends the stream.
    pub fn start_watch<F>(&self, config: WatchConfig, make_event: F)
    where
        F: Fn(PositionResult) -> Ev + Send + 'static,
    {
        let config = config.validated();
        self.context.spawn({
            let context = self.context.clone();
            async move {
                let mut stream =
                    context.stream_from_shell(LocationOperation::StartWatch { config });
                while let Some(result) = stream.next().await {
                    context.update_app(make_event(result));
                }
            }
        });
    }

    /// Tells the shell to tear the watch down. Fire and forget; any fixes
    /// already in flight may still arrive.
    pub fn stop_watch(&self) {
        self.context.spawn({
            let context = self.context.clone();
            async move {
                context.notify_shell(LocationOperation::StopWatch).await;
            }
        });
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationOperation {
    StartWatch { config: WatchConfig },
    StopWatch,
}

impl Operation for LocationOperation {
    type Output = PositionResult;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Accuracy {
    #[default]
    Best,
    Balanced,
    Low,
}

/// Sampling policy for a watch. The shell applies both filters: no fix more
/// often than the interval, none closer than the distance to the last one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    pub accuracy: Accuracy,
    pub min_interval_ms: u64,
    pub min_distance_m: u32,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            accuracy: Accuracy::Best,
            min_interval_ms: TRACKING_MIN_INTERVAL_MS,
            min_distance_m: TRACKING_MIN_DISTANCE_M,
        }
    }
}

impl WatchConfig {
    pub fn with_accuracy(mut self, accuracy: Accuracy) -> Self {
        self.accuracy = accuracy;
        self
    }

    pub fn with_min_interval_ms(mut self, interval_ms: u64) -> Self {
        self.min_interval_ms = interval_ms;
        self.validated()
    }

    pub fn with_min_distance_m(mut self, distance_m: u32) -> Self {
        self.min_distance_m = distance_m;
        self.validated()
    }

    pub fn validated(mut self) -> Self {
        self.min_interval_ms = self.min_interval_ms.clamp(1_000, 300_000);
        self.min_distance_m = self.min_distance_m.min(1_000);
        self
    }
}

/// A raw fix from the shell. Range validation happens in the update loop,
/// not here.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp_ms: u64,
}

/// Outcome of one watch delivery.
///
/// Note: not a `Result` because generics are not currently supported across
/// the FFI boundary when using the builtin typegen.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PositionResult {
    Ok { fix: PositionFix },
    Err { error: LocationError },
}

#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("location permission denied permanently - user must enable in settings")]
    PermissionDeniedPermanently,

    #[error("location services are disabled")]
    ServicesDisabled,

    #[error("location unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("no position fix within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl LocationError {
    #[must_use]
    pub fn is_permission_error(&self) -> bool {
        matches!(
            self,
            LocationError::PermissionDenied | LocationError::PermissionDeniedPermanently
        )
    }

    #[must_use]
    pub fn should_show_settings(&self) -> bool {
        matches!(
            self,
            LocationError::PermissionDeniedPermanently | LocationError::ServicesDisabled
        )
    }
}
