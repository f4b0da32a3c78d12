use serde::{Deserialize, Serialize};

use crate::account::{Profile, StripeAccountStatus};
use crate::api::{ApiConfig, ApiRequest};
use crate::bids::Bid;
use crate::error::ApiError;
use crate::ids::{BidId, JobId, NotificationId};
use crate::jobs::{Job, RouteSummary};
use crate::notifications::{unread_total, Notification};
use crate::session::{SessionState, StorageKey, UserRole};
use crate::tracking::{format_distance, Coordinate, RouteQueue, RouteRecorder};
use crate::{MAX_NOTIFICATIONS, TOAST_DURATION_MS};

/// Which surface the shell should be showing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppState {
    /// Session restore is still running.
    #[default]
    Starting,
    Unauthenticated,
    Authenticating,
    Home,
    Tracking,
}

/// Collects the session reads issued at launch. Bootstrap only completes
/// once every key has reported back, so a slow store cannot leave the model
/// half restored.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BootstrapState {
    in_progress: bool,
    awaiting: Vec<StorageKey>,
    values: Vec<(StorageKey, Option<Vec<u8>>)>,
}

impl BootstrapState {
    pub fn begin(&mut self) {
        self.in_progress = true;
        self.awaiting = StorageKey::ALL.to_vec();
        self.values.clear();
    }

    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    /// Records one read. Returns true once every key has reported back.
    /// Failed reads are recorded as absent.
    pub fn record(&mut self, key: StorageKey, value: Option<Vec<u8>>) -> bool {
        if !self.in_progress {
            return false;
        }
        self.awaiting.retain(|k| *k != key);
        self.values.push((key, value));
        self.awaiting.is_empty()
    }

    pub fn take(&mut self, key: StorageKey) -> Option<Vec<u8>> {
        let idx = self.values.iter().position(|(k, _)| *k == key)?;
        self.values.swap_remove(idx).1
    }

    pub fn finish(&mut self) {
        self.in_progress = false;
        self.awaiting.clear();
        self.values.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToastKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToastMessage {
    pub message: String,
    pub kind: ToastKind,
    pub duration_ms: u64,
}

impl ToastMessage {
    #[must_use]
    pub fn new(message: impl Into<String>, kind: ToastKind) -> Self {
        Self {
            message: message.into(),
            kind,
            duration_ms: TOAST_DURATION_MS,
        }
    }

    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(message, ToastKind::Success)
    }

    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(message, ToastKind::Info)
    }
}

#[derive(Debug, Default)]
pub struct Model {
    // Session & transport
    pub session: SessionState,
    pub config: ApiConfig,
    pub bootstrap: BootstrapState,
    pub refresh_in_flight: bool,
    /// Requests held back while a token refresh is running.
    pub parked: Vec<ApiRequest>,

    // Surface
    pub state: AppState,
    pub profile: Option<Profile>,

    // Business data
    pub business_jobs: Vec<Job>,
    pub selected_job: Option<Job>,
    pub selected_job_bids: Vec<Bid>,
    pub route_summaries: Vec<RouteSummary>,

    // Leafleteer data
    pub active_jobs: Vec<Job>,
    pub available_jobs: Vec<Job>,

    // Route tracking
    pub tracking: Option<RouteRecorder>,
    pub map_center: Option<Coordinate>,
    pub route_queue: RouteQueue,
    /// Client ref of the queued route currently being retried, if any.
    pub retrying_route: Option<String>,

    // Notifications
    pub notifications: Vec<Notification>,
    pub unread_notifications: u32,

    // Payments
    pub stripe_status: Option<StripeAccountStatus>,
    pub stripe_onboarding_url: Option<String>,
    pub stripe_dashboard_url: Option<String>,

    // Transient surfaces
    pub active_error: Option<ApiError>,
    pub active_toast: Option<ToastMessage>,
    in_flight_requests: usize,
}

impl Model {
    pub fn begin_request(&mut self) {
        self.in_flight_requests += 1;
    }

    pub fn finish_request(&mut self) {
        self.in_flight_requests = self.in_flight_requests.saturating_sub(1);
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.in_flight_requests > 0 || self.refresh_in_flight
    }

    /// Replaces the notification list, keeping the newest entries when the
    /// server sends more than the cap, and recomputes the unread count.
    pub fn set_notifications(&mut self, mut list: Vec<Notification>) {
        list.truncate(MAX_NOTIFICATIONS);
        self.unread_notifications = unread_total(&list);
        self.notifications = list;
    }

    /// Clears everything tied to the signed-in user. The pending route queue
    /// stays: its entries are replayed once someone signs back in, and its
    /// storage key is not part of the session.
    pub fn reset_for_logout(&mut self) {
        self.session = SessionState::Anonymous;
        self.state = AppState::Unauthenticated;
        self.profile = None;
        self.business_jobs.clear();
        self.selected_job = None;
        self.selected_job_bids.clear();
        self.route_summaries.clear();
        self.active_jobs.clear();
        self.available_jobs.clear();
        self.tracking = None;
        self.map_center = None;
        self.retrying_route = None;
        self.notifications.clear();
        self.unread_notifications = 0;
        self.stripe_status = None;
        self.stripe_onboarding_url = None;
        self.stripe_dashboard_url = None;
        self.active_error = None;
        self.active_toast = None;
        self.refresh_in_flight = false;
        self.parked.clear();
        self.in_flight_requests = 0;
    }
}

// --- Shell-facing projections ---

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserFacingError {
    pub message: String,
    pub code: String,
    pub is_retryable: bool,
}

impl From<&ApiError> for UserFacingError {
    fn from(e: &ApiError) -> Self {
        Self {
            message: e.user_facing_message().to_string(),
            code: e.kind.code().to_string(),
            is_retryable: e.is_retryable(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToastView {
    pub message: String,
    pub kind: ToastKind,
    pub duration_ms: u64,
}

impl From<&ToastMessage> for ToastView {
    fn from(t: &ToastMessage) -> Self {
        Self {
            message: t.message.clone(),
            kind: t.kind,
            duration_ms: t.duration_ms,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JobCard {
    pub id: JobId,
    pub title: String,
    pub status: String,
    pub number_of_leaflets: u32,
    pub budget: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl From<&Job> for JobCard {
    fn from(job: &Job) -> Self {
        let location = job.location();
        Self {
            id: job.id,
            title: job.title.clone(),
            status: job.status.display_name().to_string(),
            number_of_leaflets: job.number_of_leaflets,
            budget: job.budget.clone(),
            latitude: location.map(|(lat, _)| lat),
            longitude: location.map(|(_, lon)| lon),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BidView {
    pub id: BidId,
    pub amount: String,
    pub status: String,
    pub is_pending: bool,
}

impl From<&Bid> for BidView {
    fn from(bid: &Bid) -> Self {
        Self {
            id: bid.id,
            amount: bid.amount.clone(),
            status: bid.status.display_name().to_string(),
            is_pending: bid.is_pending(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JobDetailView {
    pub job: JobCard,
    pub description: String,
    pub bids: Vec<BidView>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RouteView {
    pub id: Option<u64>,
    pub job_id: Option<JobId>,
    pub distance_text: String,
    pub coordinate_count: usize,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

impl From<&RouteSummary> for RouteView {
    fn from(summary: &RouteSummary) -> Self {
        Self {
            id: summary.id,
            job_id: summary.job,
            distance_text: summary.distance_text(),
            coordinate_count: summary.coordinates.len(),
            start_time: summary.start_time.clone(),
            end_time: summary.end_time.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NotificationView {
    pub id: NotificationId,
    pub message: String,
    pub read: bool,
    pub created_at: Option<String>,
    pub job_id: Option<JobId>,
}

impl From<&Notification> for NotificationView {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id,
            message: n.message.clone(),
            read: n.read,
            created_at: n.created_at.clone(),
            job_id: n.job_id,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct StripeView {
    pub has_account: bool,
    pub onboarding_complete: bool,
    pub payouts_enabled: bool,
    pub needs_onboarding: bool,
    pub onboarding_url: Option<String>,
    pub dashboard_url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum ViewState {
    Starting,
    Unauthenticated,
    Authenticating,
    BusinessHome {
        jobs: Vec<JobCard>,
        selected: Option<JobDetailView>,
        recent_routes: Vec<RouteView>,
        stripe: StripeView,
    },
    LeafleteerHome {
        active: Vec<JobCard>,
        available: Vec<JobCard>,
        stripe: StripeView,
    },
    Tracking {
        job_id: JobId,
        sample_count: usize,
        distance_text: String,
        center_lat: Option<f64>,
        center_lon: Option<f64>,
    },
}

impl Default for ViewState {
    fn default() -> Self {
        Self::Starting
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ViewModel {
    pub state: ViewState,
    pub notifications: Vec<NotificationView>,
    pub error: Option<UserFacingError>,
    pub toast: Option<ToastView>,
    pub is_loading: bool,
    pub unread_notifications: u32,
    pub pending_route_count: usize,
    pub is_authenticated: bool,
    pub role: Option<UserRole>,
}

/// Projects the tracking model into its view payload.
pub(crate) fn tracking_view(recorder: &RouteRecorder, center: Option<&Coordinate>) -> ViewState {
    ViewState::Tracking {
        job_id: recorder.job_id(),
        sample_count: recorder.sample_count(),
        distance_text: format_distance(recorder.distance_m()),
        center_lat: center.map(Coordinate::latitude),
        center_lon: center.map(Coordinate::longitude),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::jobs::JobStatus;
    use crate::session::Session;
    use crate::tracking::UnixTimeMs;

    fn notification(id: u64, read: bool) -> Notification {
        Notification {
            id: NotificationId::from(id),
            message: format!("note {id}"),
            read,
            created_at: None,
            job_id: None,
        }
    }

    #[test]
    fn test_bootstrap_completes_after_all_keys() {
        let mut bootstrap = BootstrapState::default();
        bootstrap.begin();
        assert!(bootstrap.is_in_progress());

        let mut done = false;
        for key in StorageKey::ALL {
            assert!(!done);
            done = bootstrap.record(key, Some(vec![1]));
        }
        assert!(done);
        assert_eq!(bootstrap.take(StorageKey::AccessToken), Some(vec![1]));

        bootstrap.finish();
        assert!(!bootstrap.is_in_progress());
        assert_eq!(bootstrap.take(StorageKey::RefreshToken), None);
    }

    #[test]
    fn test_bootstrap_ignores_reads_when_idle() {
        let mut bootstrap = BootstrapState::default();
        assert!(!bootstrap.record(StorageKey::AccessToken, Some(vec![1])));
        assert_eq!(bootstrap.take(StorageKey::AccessToken), None);
    }

    #[test]
    fn test_loading_tracks_in_flight_requests() {
        let mut model = Model::default();
        assert!(!model.is_loading());
        model.begin_request();
        model.begin_request();
        model.finish_request();
        assert!(model.is_loading());
        model.finish_request();
        assert!(!model.is_loading());
        // Extra finish never underflows.
        model.finish_request();
        assert!(!model.is_loading());
    }

    #[test]
    fn test_notifications_are_capped_and_counted() {
        let mut model = Model::default();
        let list: Vec<Notification> = (0..(MAX_NOTIFICATIONS as u64 + 10))
            .map(|i| notification(i, i % 2 == 0))
            .collect();
        model.set_notifications(list);
        assert_eq!(model.notifications.len(), MAX_NOTIFICATIONS);
        assert_eq!(
            model.unread_notifications,
            unread_total(&model.notifications)
        );
    }

    #[test]
    fn test_logout_reset_keeps_route_queue_and_config() {
        let mut model = Model::default();
        model.session = SessionState::Authenticated(Session {
            access_token: "token".into(),
            refresh_token: None,
            role: UserRole::Leafleteer,
            user_id: None,
        });
        model.state = AppState::Home;
        model.notifications = vec![notification(1, false)];
        model.unread_notifications = 1;
        model.route_queue.push(crate::tracking::PendingRoute::new(
            JobId::from(9),
            vec![Coordinate::new(1.0, 2.0, UnixTimeMs(0)).unwrap()],
        ));

        model.reset_for_logout();

        assert_eq!(model.session, SessionState::Anonymous);
        assert_eq!(model.state, AppState::Unauthenticated);
        assert!(model.notifications.is_empty());
        assert_eq!(model.route_queue.len(), 1);
    }

    #[test]
    fn test_user_facing_error_projection() {
        let error = ApiError::network_unreachable();
        let view = UserFacingError::from(&error);
        assert_eq!(view.code, ErrorKind::NetworkUnreachable.code());
        assert!(view.is_retryable);
        assert!(!view.message.is_empty());
    }

    #[test]
    fn test_job_card_drops_invalid_location() {
        let mut job = Job {
            id: JobId::from(4),
            status: JobStatus::Open,
            title: "Flyers".into(),
            number_of_leaflets: 500,
            latitude: Some(200.0),
            longitude: Some(0.0),
            ..Job::default()
        };
        let card = JobCard::from(&job);
        assert_eq!(card.status, "Open");
        assert_eq!(card.latitude, None);

        job.latitude = Some(51.5);
        let card = JobCard::from(&job);
        assert_eq!(card.latitude, Some(51.5));
        assert_eq!(card.longitude, Some(0.0));
    }

    #[test]
    fn test_tracking_view_formats_distance() {
        let mut recorder = RouteRecorder::start(JobId::from(2));
        let a = Coordinate::new(51.5074, -0.1278, UnixTimeMs(0)).unwrap();
        let b = Coordinate::new(51.5075, -0.1278, UnixTimeMs(5_000)).unwrap();
        recorder.record(a);
        recorder.record(b);

        let state = tracking_view(&recorder, recorder.last_position());
        match state {
            ViewState::Tracking {
                job_id,
                sample_count,
                distance_text,
                center_lat,
                ..
            } => {
                assert_eq!(job_id, JobId::from(2));
                assert_eq!(sample_count, 2);
                assert!(distance_text.ends_with(" m"));
                assert_eq!(center_lat, Some(51.5075));
            }
            other => panic!("expected tracking state, got {other:?}"),
        }
    }
}
