//! Shared core of the Leafdrop mobile client: model, events, update loop and
//! typed view model for both the Business and Leafleteer apps. All side
//! effects (HTTP, key-value storage, geolocation, render) are capabilities
//! resolved by the native shells.

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod account;
pub mod api;
pub mod app;
pub mod bids;
pub mod capabilities;
pub mod error;
pub mod event;
pub mod ids;
pub mod jobs;
pub mod model;
pub mod notifications;
pub mod session;
pub mod tracking;

pub use app::App;
pub use capabilities::{Capabilities, Effect};
pub use error::{ApiError, ErrorKind};
pub use event::Event;
pub use model::{AppState, Model, ToastKind, UserFacingError, ViewModel, ViewState};
pub use session::{Secret, Session, SessionState, StorageKey, UserRole};
pub use tracking::{Coordinate, PendingRoute, RouteQueue, UnixTimeMs};

/// Production API origin. Paths are joined relative to this, so the trailing
/// slash matters.
pub const DEFAULT_API_BASE_URL: &str = "https://api.leafdrop.app/";

/// Minimum time between position samples while tracking.
pub const TRACKING_MIN_INTERVAL_MS: u64 = 5_000;

/// Minimum distance between position samples while tracking.
pub const TRACKING_MIN_DISTANCE_M: u32 = 5;

/// Mean Earth radius, for haversine distances.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Upper bound on locally queued unsent routes; oldest entries are evicted
/// past this point.
pub const MAX_PENDING_ROUTES: usize = 128;

/// Upper bound on notifications kept in the model.
pub const MAX_NOTIFICATIONS: usize = 200;

/// How long toasts stay visible.
pub const TOAST_DURATION_MS: u64 = 4_000;
