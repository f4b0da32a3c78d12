//! The backend surface as a closed catalogue: every request the core can
//! make, with its method, path, body and auth requirements in one place, plus
//! the retry accounting for the 401-refresh recovery.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::account::{LoginPayload, ProfileUpdate, RegistrationPayload};
use crate::bids::BidDraft;
use crate::error::ApiError;
use crate::ids::{BidId, JobId, NotificationId, ProfileId, RequestId, UserId};
use crate::jobs::JobDraft;
use crate::session::Secret;
use crate::tracking::{Coordinate, PendingRoute};
use crate::DEFAULT_API_BASE_URL;

/// Validated API origin. Paths join relative to it, so the stored URL always
/// ends in a slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    base_url: Url,
}

impl ApiConfig {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let mut url = Url::parse(base_url)
            .map_err(|e| ApiError::validation(format!("Invalid API base URL: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(ApiError::validation("API base URL cannot be a base"));
        }
        let scheme_ok = match url.scheme() {
            "https" => true,
            "http" => matches!(url.host_str(), Some("localhost" | "127.0.0.1")),
            _ => false,
        };
        if !scheme_ok {
            return Err(ApiError::validation(
                "API base URL must be https (http is allowed for loopback only)",
            ));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(Self { base_url: url })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL for an endpoint path. Paths in the catalogue are
    /// relative, so this cannot escape the configured origin.
    pub fn join(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::validation(format!("Invalid request path {path:?}: {e}")))
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        // locked by test_default_config_is_valid
        Self::new(DEFAULT_API_BASE_URL).expect("default base URL is valid")
    }
}

/// How often this request has been sent. A request is retried at most once,
/// and only after a successful token refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Attempt {
    #[default]
    Initial,
    RetriedAfterRefresh,
}

impl Attempt {
    #[must_use]
    pub const fn is_retry(self) -> bool {
        matches!(self, Self::RetriedAfterRefresh)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// Every call the core can make, except the token refresh, which has its own
/// single-flight path. Adding a variant here is the whole story for a new
/// backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    Login(LoginPayload),
    Register(RegistrationPayload),
    FetchProfile,
    UpdateProfile { id: ProfileId, update: ProfileUpdate },
    DeleteProfile { id: ProfileId },
    BusinessJobs,
    PostJob(JobDraft),
    BusinessJobDetail { id: JobId },
    RecentRoutes { business_user: UserId },
    JobRoutes { id: JobId },
    ActiveJobs,
    AvailableJobs,
    StartJob { id: JobId },
    CompleteJob { id: JobId },
    CancelJob { id: JobId },
    RemoveJob { id: JobId },
    BidsForJob { job_id: JobId },
    PlaceBid(BidDraft),
    AcceptBid { id: BidId },
    RejectBid { id: BidId },
    DeleteBid { id: BidId },
    SubmitRoute(PendingRoute),
    Notifications,
    MarkNotificationRead { id: NotificationId },
    ClearNotifications,
    UnreadCount,
    StripeAccountStatus,
    StripeOnboardingUrl,
    StripeDashboardLink,
}

impl Endpoint {
    #[must_use]
    pub const fn method(&self) -> HttpMethod {
        match self {
            Self::FetchProfile
            | Self::BusinessJobs
            | Self::BusinessJobDetail { .. }
            | Self::RecentRoutes { .. }
            | Self::JobRoutes { .. }
            | Self::ActiveJobs
            | Self::AvailableJobs
            | Self::BidsForJob { .. }
            | Self::Notifications
            | Self::UnreadCount
            | Self::StripeAccountStatus
            | Self::StripeOnboardingUrl
            | Self::StripeDashboardLink => HttpMethod::Get,
            Self::Login(_)
            | Self::Register(_)
            | Self::PostJob(_)
            | Self::StartJob { .. }
            | Self::CompleteJob { .. }
            | Self::CancelJob { .. }
            | Self::RemoveJob { .. }
            | Self::PlaceBid(_)
            | Self::AcceptBid { .. }
            | Self::RejectBid { .. }
            | Self::SubmitRoute(_) => HttpMethod::Post,
            Self::UpdateProfile { .. } => HttpMethod::Put,
            Self::MarkNotificationRead { .. } => HttpMethod::Patch,
            Self::DeleteProfile { .. } | Self::DeleteBid { .. } | Self::ClearNotifications => {
                HttpMethod::Delete
            }
        }
    }

    /// Path relative to the configured origin, query string included.
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::Login(_) => "token/".into(),
            Self::Register(_) => "register/".into(),
            Self::FetchProfile => "profiles/".into(),
            Self::UpdateProfile { id, .. } | Self::DeleteProfile { id } => {
                format!("profiles/{id}/")
            }
            Self::BusinessJobs | Self::PostJob(_) => "business-jobs/".into(),
            Self::BusinessJobDetail { id } => format!("business-jobs/{id}/"),
            Self::RecentRoutes { business_user } => {
                format!("business-jobs/recent_routes/?business_user={business_user}")
            }
            Self::JobRoutes { id } => format!("business-jobs/{id}/view_routes/"),
            Self::ActiveJobs => "leafleteerjobs/active/".into(),
            Self::AvailableJobs => "leafleteerjobs/available/".into(),
            Self::StartJob { id } => format!("leafleteerjobs/{id}/start/"),
            Self::CompleteJob { id } => format!("leafleteerjobs/{id}/complete/"),
            Self::CancelJob { id } => format!("leafleteerjobs/{id}/cancel/"),
            Self::RemoveJob { id } => format!("leafleteerjobs/{id}/remove/"),
            Self::BidsForJob { job_id } => format!("bids/?job_id={job_id}"),
            Self::PlaceBid(_) => "bids/".into(),
            Self::AcceptBid { id } => format!("bids/{id}/accept/"),
            Self::RejectBid { id } => format!("bids/{id}/reject/"),
            Self::DeleteBid { id } => format!("bids/{id}/"),
            Self::SubmitRoute(_) => "routes/".into(),
            Self::Notifications => "notifications/".into(),
            Self::MarkNotificationRead { id } => format!("notifications/{id}/"),
            Self::ClearNotifications => "notifications/clear_all/".into(),
            Self::UnreadCount => "notifications/unread-count/".into(),
            Self::StripeAccountStatus => "stripe-account-status/".into(),
            Self::StripeOnboardingUrl => "stripe-onboarding-url/".into(),
            Self::StripeDashboardLink => "get-dashboard-link/".into(),
        }
    }

    pub fn body(&self) -> Result<Option<serde_json::Value>, ApiError> {
        match self {
            Self::Login(payload) => encode_body(payload),
            Self::Register(payload) => encode_body(payload),
            Self::UpdateProfile { update, .. } => encode_body(update),
            Self::PostJob(draft) => encode_body(draft),
            Self::PlaceBid(draft) => encode_body(draft),
            Self::SubmitRoute(route) => encode_body(&RoutePayload::from_pending(route)?),
            _ => Ok(None),
        }
    }

    /// Login and registration are the only calls made without a bearer
    /// token. The refresh call is not in this catalogue.
    #[must_use]
    pub const fn requires_auth(&self) -> bool {
        !matches!(self, Self::Login(_) | Self::Register(_))
    }

    /// Route submissions carry the entry's client ref so a retry of the same
    /// route cannot double-record.
    #[must_use]
    pub fn idempotency_key(&self) -> Option<&str> {
        match self {
            Self::SubmitRoute(route) => Some(&route.client_ref),
            _ => None,
        }
    }

    /// Stable name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Login(_) => "login",
            Self::Register(_) => "register",
            Self::FetchProfile => "fetch_profile",
            Self::UpdateProfile { .. } => "update_profile",
            Self::DeleteProfile { .. } => "delete_profile",
            Self::BusinessJobs => "business_jobs",
            Self::PostJob(_) => "post_job",
            Self::BusinessJobDetail { .. } => "business_job_detail",
            Self::RecentRoutes { .. } => "recent_routes",
            Self::JobRoutes { .. } => "job_routes",
            Self::ActiveJobs => "active_jobs",
            Self::AvailableJobs => "available_jobs",
            Self::StartJob { .. } => "start_job",
            Self::CompleteJob { .. } => "complete_job",
            Self::CancelJob { .. } => "cancel_job",
            Self::RemoveJob { .. } => "remove_job",
            Self::BidsForJob { .. } => "bids_for_job",
            Self::PlaceBid(_) => "place_bid",
            Self::AcceptBid { .. } => "accept_bid",
            Self::RejectBid { .. } => "reject_bid",
            Self::DeleteBid { .. } => "delete_bid",
            Self::SubmitRoute(_) => "submit_route",
            Self::Notifications => "notifications",
            Self::MarkNotificationRead { .. } => "mark_notification_read",
            Self::ClearNotifications => "clear_notifications",
            Self::UnreadCount => "unread_count",
            Self::StripeAccountStatus => "stripe_account_status",
            Self::StripeOnboardingUrl => "stripe_onboarding_url",
            Self::StripeDashboardLink => "stripe_dashboard_link",
        }
    }
}

fn encode_body<T: Serialize>(value: &T) -> Result<Option<serde_json::Value>, ApiError> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| ApiError::validation(format!("Could not encode request body: {e}")))
}

/// One outbound call with its retry accounting. Kept verbatim while parked
/// behind an in-flight token refresh, then replayed.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub id: RequestId,
    pub endpoint: Endpoint,
    pub attempt: Attempt,
}

impl ApiRequest {
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            id: RequestId::generate(),
            endpoint,
            attempt: Attempt::Initial,
        }
    }

    #[must_use]
    pub fn retried(mut self) -> Self {
        self.attempt = Attempt::RetriedAfterRefresh;
        self
    }
}

/// Body of `POST token/` responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access: Secret,
    #[serde(default)]
    pub refresh: Option<Secret>,
    #[serde(default)]
    pub user_type: Option<String>,
}

/// Body of `POST token/refresh/`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshPayload {
    pub refresh: Secret,
}

/// Body of `POST token/refresh/` responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access: Secret,
}

/// Body of `POST routes/`. Timestamps are normalized to RFC 3339 regardless
/// of the raw device format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePayload {
    pub job_id: JobId,
    pub coordinates: Vec<Coordinate>,
    pub start_time: String,
    pub end_time: String,
}

impl RoutePayload {
    pub fn from_pending(route: &PendingRoute) -> Result<Self, ApiError> {
        let (Some(first), Some(last)) = (route.coordinates.first(), route.coordinates.last())
        else {
            return Err(ApiError::validation("Cannot submit an empty route"));
        };
        let start_time = first
            .timestamp()
            .to_rfc3339()
            .ok_or_else(|| ApiError::validation("Route timestamps are out of range"))?;
        let end_time = last
            .timestamp()
            .to_rfc3339()
            .ok_or_else(|| ApiError::validation("Route timestamps are out of range"))?;
        Ok(Self {
            job_id: route.job_id,
            coordinates: route.coordinates.clone(),
            start_time,
            end_time,
        })
    }
}
