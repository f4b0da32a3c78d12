//! The update loop. Everything the shells can do funnels through
//! [`App::update`]; everything they can show comes out of [`App::view`].

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::account::{Profile, StripeAccountStatus, StripeLink};
use crate::api::{
    ApiRequest, Endpoint, HttpMethod, RefreshPayload, RefreshResponse, TokenResponse,
};
use crate::bids::{Bid, BidStatus};
use crate::capabilities::{Capabilities, PositionResult, WatchConfig};
use crate::error::ApiError;
use crate::event::{ApiResult, Event};
use crate::ids::{BidId, JobId};
use crate::jobs::{Job, JobStatus, RouteSummary};
use crate::model::{
    tracking_view, AppState, BidView, JobCard, JobDetailView, Model, NotificationView, RouteView,
    StripeView, ToastKind, ToastMessage, UserFacingError, ViewModel, ViewState,
};
use crate::notifications::{unread_total, Notification, UnreadCount};
use crate::session::{restore_session, Secret, Session, SessionState, StorageKey, UserRole};
use crate::tracking::{Coordinate, PendingRoute, RouteQueue, RouteRecorder, UnixTimeMs};

#[derive(Default)]
pub struct App;

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        match event {
            // --- Session ---
            Event::AppLaunched => {
                model.state = AppState::Starting;
                model.session = SessionState::Restoring;
                model.bootstrap.begin();
                for key in StorageKey::ALL {
                    caps.key_value.get(key.storage_key().to_string(), move |result| {
                        Event::StoredValueLoaded {
                            key,
                            result: Box::new(result),
                        }
                    });
                }
                caps.render.render();
            }

            Event::LoginRequested { credentials } => {
                model.active_error = None;
                match credentials.into_payload() {
                    Ok(payload) => {
                        model.state = AppState::Authenticating;
                        Self::send_api_request(
                            model,
                            caps,
                            ApiRequest::new(Endpoint::Login(payload)),
                        );
                    }
                    Err(error) => {
                        model.state = AppState::Unauthenticated;
                        model.active_error = Some(error);
                    }
                }
                caps.render.render();
            }

            Event::RegistrationRequested(draft) => {
                model.active_error = None;
                match draft.into_payload() {
                    Ok(payload) => Self::send_api_request(
                        model,
                        caps,
                        ApiRequest::new(Endpoint::Register(payload)),
                    ),
                    Err(error) => model.active_error = Some(error),
                }
                caps.render.render();
            }

            Event::LogoutRequested => {
                info!("logging out, clearing session storage");
                if model.tracking.is_some() {
                    caps.location.stop_watch();
                }
                Self::clear_session_storage(caps);
                model.reset_for_logout();
                caps.render.render();
            }

            // --- Profile & account ---
            Event::ProfileRequested => {
                Self::send_api_request(model, caps, ApiRequest::new(Endpoint::FetchProfile));
            }

            Event::ProfileUpdateRequested(update) => {
                let profile_id = model.profile.as_ref().map(|p| p.id);
                match (profile_id, update.validated()) {
                    (Some(id), Ok(update)) => Self::send_api_request(
                        model,
                        caps,
                        ApiRequest::new(Endpoint::UpdateProfile { id, update }),
                    ),
                    (None, _) => Self::surface_error(
                        model,
                        caps,
                        ApiError::validation("Your profile has not loaded yet"),
                    ),
                    (_, Err(error)) => Self::surface_error(model, caps, error),
                }
            }

            Event::AccountDeletionRequested => {
                let profile_id = model.profile.as_ref().map(|p| p.id);
                match profile_id {
                    Some(id) => Self::send_api_request(
                        model,
                        caps,
                        ApiRequest::new(Endpoint::DeleteProfile { id }),
                    ),
                    None => Self::surface_error(
                        model,
                        caps,
                        ApiError::validation("Your profile has not loaded yet"),
                    ),
                }
            }

            // --- Business jobs ---
            Event::BusinessJobsRequested => {
                Self::send_api_request(model, caps, ApiRequest::new(Endpoint::BusinessJobs));
            }

            Event::JobPostRequested(draft) => match draft.validate() {
                Ok(()) => Self::send_api_request(
                    model,
                    caps,
                    ApiRequest::new(Endpoint::PostJob(*draft)),
                ),
                Err(error) => Self::surface_error(model, caps, error),
            },

            Event::JobDetailRequested { id } => {
                model.selected_job = None;
                model.selected_job_bids.clear();
                Self::send_api_request(
                    model,
                    caps,
                    ApiRequest::new(Endpoint::BusinessJobDetail { id }),
                );
                Self::send_api_request(
                    model,
                    caps,
                    ApiRequest::new(Endpoint::BidsForJob { job_id: id }),
                );
            }

            Event::RecentRoutesRequested => {
                let business_user = model.session.session().and_then(|s| s.user_id);
                match business_user {
                    Some(business_user) => Self::send_api_request(
                        model,
                        caps,
                        ApiRequest::new(Endpoint::RecentRoutes { business_user }),
                    ),
                    None => Self::surface_error(
                        model,
                        caps,
                        ApiError::validation("Your account id has not loaded yet"),
                    ),
                }
            }

            Event::JobRoutesRequested { id } => {
                Self::send_api_request(model, caps, ApiRequest::new(Endpoint::JobRoutes { id }));
            }

            // --- Leafleteer jobs ---
            Event::ActiveJobsRequested => {
                Self::send_api_request(model, caps, ApiRequest::new(Endpoint::ActiveJobs));
            }

            Event::AvailableJobsRequested => {
                Self::send_api_request(model, caps, ApiRequest::new(Endpoint::AvailableJobs));
            }

            Event::JobStartRequested { id } => {
                match Self::guard_job_transition(model, id, JobStatus::InProgress) {
                    Ok(()) => Self::send_api_request(
                        model,
                        caps,
                        ApiRequest::new(Endpoint::StartJob { id }),
                    ),
                    Err(error) => Self::surface_error(model, caps, error),
                }
            }

            Event::JobCompletionRequested { id } => {
                match Self::guard_job_transition(model, id, JobStatus::Completed) {
                    Ok(()) => Self::send_api_request(
                        model,
                        caps,
                        ApiRequest::new(Endpoint::CompleteJob { id }),
                    ),
                    Err(error) => Self::surface_error(model, caps, error),
                }
            }

            Event::JobCancellationRequested { id } => {
                match Self::guard_job_transition(model, id, JobStatus::Cancelled) {
                    Ok(()) => Self::send_api_request(
                        model,
                        caps,
                        ApiRequest::new(Endpoint::CancelJob { id }),
                    ),
                    Err(error) => Self::surface_error(model, caps, error),
                }
            }

            Event::JobRemovalRequested { id } => match Self::guard_job_removal(model, id) {
                Ok(()) => Self::send_api_request(
                    model,
                    caps,
                    ApiRequest::new(Endpoint::RemoveJob { id }),
                ),
                Err(error) => Self::surface_error(model, caps, error),
            },

            // --- Bids ---
            Event::BidPlacementRequested { draft } => match draft.validate() {
                Ok(()) => Self::send_api_request(
                    model,
                    caps,
                    ApiRequest::new(Endpoint::PlaceBid(draft)),
                ),
                Err(error) => Self::surface_error(model, caps, error),
            },

            Event::BidAcceptanceRequested { id } => {
                match Self::guard_bid_decision(model, id, BidStatus::Accepted) {
                    Ok(()) => Self::send_api_request(
                        model,
                        caps,
                        ApiRequest::new(Endpoint::AcceptBid { id }),
                    ),
                    Err(error) => Self::surface_error(model, caps, error),
                }
            }

            Event::BidRejectionRequested { id } => {
                match Self::guard_bid_decision(model, id, BidStatus::Rejected) {
                    Ok(()) => Self::send_api_request(
                        model,
                        caps,
                        ApiRequest::new(Endpoint::RejectBid { id }),
                    ),
                    Err(error) => Self::surface_error(model, caps, error),
                }
            }

            Event::BidWithdrawalRequested { id } => {
                Self::send_api_request(model, caps, ApiRequest::new(Endpoint::DeleteBid { id }));
            }

            // --- Route tracking ---
            Event::TrackingStarted { job_id } => {
                if !model.session.is_authenticated() {
                    Self::surface_error(
                        model,
                        caps,
                        ApiError::authorization("Sign in to record routes", None),
                    );
                    return;
                }
                if model.tracking.is_some() {
                    caps.location.stop_watch();
                }
                info!(job_id = job_id.value(), "tracking started");
                model.tracking = Some(RouteRecorder::start(job_id));
                model.map_center = None;
                model.state = AppState::Tracking;
                caps.location
                    .start_watch(WatchConfig::default(), Event::PositionUpdated);
                caps.render.render();
            }

            Event::TrackingStopped => {
                caps.location.stop_watch();
                let Some(recorder) = model.tracking.take() else {
                    caps.render.render();
                    return;
                };
                model.state = AppState::Home;
                let (job_id, samples) = recorder.finish();
                if samples.is_empty() {
                    debug!(job_id = job_id.value(), "tracking stopped with no samples");
                    caps.render.render();
                    return;
                }
                info!(
                    job_id = job_id.value(),
                    samples = samples.len(),
                    "tracking stopped, submitting route"
                );
                let route = PendingRoute::new(job_id, samples);
                Self::send_api_request(
                    model,
                    caps,
                    ApiRequest::new(Endpoint::SubmitRoute(route)),
                );
                caps.render.render();
            }

            // --- Notifications ---
            Event::NotificationsRequested => {
                Self::send_api_request(model, caps, ApiRequest::new(Endpoint::Notifications));
            }

            Event::NotificationReadRequested { id } => {
                Self::send_api_request(
                    model,
                    caps,
                    ApiRequest::new(Endpoint::MarkNotificationRead { id }),
                );
            }

            Event::NotificationsClearRequested => {
                Self::send_api_request(model, caps, ApiRequest::new(Endpoint::ClearNotifications));
            }

            Event::UnreadCountRequested => {
                Self::send_api_request(model, caps, ApiRequest::new(Endpoint::UnreadCount));
            }

            // --- Payments ---
            Event::StripeStatusRequested => {
                Self::send_api_request(
                    model,
                    caps,
                    ApiRequest::new(Endpoint::StripeAccountStatus),
                );
            }

            Event::StripeOnboardingRequested => {
                Self::send_api_request(
                    model,
                    caps,
                    ApiRequest::new(Endpoint::StripeOnboardingUrl),
                );
            }

            Event::StripeDashboardRequested => {
                Self::send_api_request(
                    model,
                    caps,
                    ApiRequest::new(Endpoint::StripeDashboardLink),
                );
            }

            // --- Transient surfaces ---
            Event::ToastDismissed => {
                model.active_toast = None;
                caps.render.render();
            }

            Event::ErrorDismissed => {
                model.active_error = None;
                caps.render.render();
            }

            // --- Capability responses ---
            Event::ApiResponded { request, result } => {
                Self::handle_api_response(model, caps, *request, *result);
            }

            Event::TokenRefreshCompleted(result) => {
                Self::handle_refresh_response(model, caps, *result);
            }

            Event::StoredValueLoaded { key, result } => {
                let value = match *result {
                    Ok(value) => value,
                    Err(error) => {
                        warn!(key = key.storage_key(), %error, "storage read failed");
                        None
                    }
                };
                if model.bootstrap.record(key, value) {
                    Self::finish_bootstrap(model, caps);
                }
            }

            Event::StoredValueWritten { key, result } => {
                if let Err(error) = *result {
                    warn!(key = key.storage_key(), %error, "storage write failed");
                }
            }

            Event::PositionUpdated(result) => {
                Self::handle_position(model, caps, result);
            }
        }
    }

    fn view(&self, model: &Model) -> ViewModel {
        let state = match model.state {
            AppState::Starting => ViewState::Starting,
            AppState::Unauthenticated => ViewState::Unauthenticated,
            AppState::Authenticating => ViewState::Authenticating,
            AppState::Home => Self::home_view(model),
            AppState::Tracking => match &model.tracking {
                Some(recorder) => tracking_view(recorder, model.map_center.as_ref()),
                None => Self::home_view(model),
            },
        };

        ViewModel {
            state,
            notifications: model
                .notifications
                .iter()
                .map(NotificationView::from)
                .collect(),
            error: model.active_error.as_ref().map(UserFacingError::from),
            toast: model.active_toast.as_ref().map(Into::into),
            is_loading: model.is_loading(),
            unread_notifications: model.unread_notifications,
            pending_route_count: model.route_queue.len(),
            is_authenticated: model.session.is_authenticated(),
            role: model.session.role(),
        }
    }
}

impl App {
    // --- Bootstrap ---

    fn finish_bootstrap(model: &mut Model, caps: &Capabilities) {
        let access = model.bootstrap.take(StorageKey::AccessToken);
        let refresh = model.bootstrap.take(StorageKey::RefreshToken);
        let user_type = model.bootstrap.take(StorageKey::UserType);
        let user_id = model.bootstrap.take(StorageKey::UserId);
        let routes = model.bootstrap.take(StorageKey::PendingRoutes);
        model.bootstrap.finish();

        model.route_queue = match routes {
            Some(bytes) => RouteQueue::decode(&bytes),
            None => RouteQueue::default(),
        };

        match restore_session(access, refresh, user_type, user_id) {
            Some(session) => {
                info!(
                    role = session.role.as_str(),
                    pending_routes = model.route_queue.len(),
                    "session restored"
                );
                model.session = SessionState::Authenticated(session);
                model.state = AppState::Home;
                Self::send_api_request(model, caps, ApiRequest::new(Endpoint::UnreadCount));
                Self::advance_retry_pass(model, caps);
            }
            None => {
                model.session = SessionState::Anonymous;
                model.state = AppState::Unauthenticated;
            }
        }
        caps.render.render();
    }

    // --- Outbound requests ---

    fn send_api_request(model: &mut Model, caps: &Capabilities, request: ApiRequest) {
        match Self::build_request(model, caps, &request) {
            Ok(builder) => {
                if Self::counts_toward_loading(&request.endpoint) {
                    model.begin_request();
                }
                builder.send(move |result| Event::ApiResponded {
                    request: Box::new(request),
                    result: Box::new(result),
                });
            }
            Err(error) => Self::fail_request(model, caps, request, error),
        }
    }

    fn build_request(
        model: &Model,
        caps: &Capabilities,
        request: &ApiRequest,
    ) -> Result<crux_http::RequestBuilder<Event>, ApiError> {
        let endpoint = &request.endpoint;
        let url = model.config.join(&endpoint.path())?;
        let mut builder = caps.http.request(wire_method(endpoint.method()), url);

        if endpoint.requires_auth() {
            let session = model
                .session
                .session()
                .ok_or_else(|| ApiError::authorization("You are not signed in", None))?;
            let bearer = session.bearer();
            builder = builder.header("Authorization", bearer.as_str());
        }
        if let Some(key) = endpoint.idempotency_key() {
            builder = builder.header("Idempotency-Key", key);
        }
        if let Some(body) = endpoint.body()? {
            builder = builder
                .body_json(&body)
                .map_err(|e| ApiError::validation(format!("Could not encode request body: {e}")))?;
        }
        Ok(builder)
    }

    /// Route submissions surface through toasts and the queue depth instead
    /// of the global spinner.
    const fn counts_toward_loading(endpoint: &Endpoint) -> bool {
        !matches!(endpoint, Endpoint::SubmitRoute(_))
    }

    // --- Responses ---

    fn handle_api_response(
        model: &mut Model,
        caps: &Capabilities,
        request: ApiRequest,
        result: ApiResult,
    ) {
        if Self::counts_toward_loading(&request.endpoint) {
            model.finish_request();
        }
        match result {
            Ok(response) => {
                if let Err(error) = Self::apply_response(model, caps, &request, response) {
                    Self::fail_request(model, caps, request, error);
                } else {
                    caps.render.render();
                }
            }
            Err(crux_http::Error::Http(http_error))
                if u16::from(http_error.code) == 401 && request.endpoint.requires_auth() =>
            {
                Self::handle_unauthorized(model, caps, request);
            }
            Err(error) => {
                let error = Self::classify_transport(error);
                Self::fail_request(model, caps, request, error);
            }
        }
    }

    fn classify_transport(error: crux_http::Error) -> ApiError {
        match error {
            crux_http::Error::Http(http_error) => ApiError::server(
                u16::from(http_error.code),
                http_error.body.as_deref().unwrap_or(&[]),
            ),
            crux_http::Error::Io(_) | crux_http::Error::Timeout => ApiError::network_unreachable(),
            crux_http::Error::Json(message) => ApiError::malformed(message),
            crux_http::Error::Url(message) => ApiError::validation(message),
        }
    }

    fn apply_response(
        model: &mut Model,
        caps: &Capabilities,
        request: &ApiRequest,
        mut response: crux_http::Response<Vec<u8>>,
    ) -> Result<(), ApiError> {
        match &request.endpoint {
            Endpoint::Login(_) => {
                let token: TokenResponse = Self::parse_json(&mut response)?;
                let role = token
                    .user_type
                    .as_deref()
                    .and_then(UserRole::parse)
                    .ok_or_else(|| {
                        ApiError::malformed("Login response did not include a known user type")
                    })?;
                info!(role = role.as_str(), "login succeeded");

                Self::persist_value(
                    caps,
                    StorageKey::AccessToken,
                    token.access.expose().as_bytes().to_vec(),
                );
                if let Some(refresh) = &token.refresh {
                    Self::persist_value(
                        caps,
                        StorageKey::RefreshToken,
                        refresh.expose().as_bytes().to_vec(),
                    );
                }
                Self::persist_value(
                    caps,
                    StorageKey::UserType,
                    role.as_str().as_bytes().to_vec(),
                );

                model.session = SessionState::Authenticated(Session {
                    access_token: token.access,
                    refresh_token: token.refresh,
                    role,
                    user_id: None,
                });
                model.state = AppState::Home;
                Self::send_api_request(model, caps, ApiRequest::new(Endpoint::FetchProfile));
            }

            Endpoint::Register(_) => {
                model.active_toast =
                    Some(ToastMessage::success("Account created. You can sign in now."));
            }

            Endpoint::FetchProfile => {
                let profiles: Vec<Profile> = Self::parse_json(&mut response)?;
                let profile = profiles
                    .into_iter()
                    .next()
                    .ok_or_else(|| ApiError::malformed("Profile list was empty"))?;
                if let Some(user_id) = profile.user {
                    if let Some(session) = model.session.session_mut() {
                        session.user_id = Some(user_id);
                    }
                    Self::persist_value(
                        caps,
                        StorageKey::UserId,
                        user_id.value().to_string().into_bytes(),
                    );
                }
                model.profile = Some(profile);
            }

            Endpoint::UpdateProfile { .. } => {
                let profile: Profile = Self::parse_json(&mut response)?;
                model.profile = Some(profile);
                model.active_toast = Some(ToastMessage::success("Profile updated"));
            }

            Endpoint::DeleteProfile { .. } => {
                Self::clear_session_storage(caps);
                model.reset_for_logout();
                model.active_toast = Some(ToastMessage::info("Your account has been deleted"));
            }

            Endpoint::BusinessJobs => {
                model.business_jobs = Self::parse_json(&mut response)?;
            }

            Endpoint::PostJob(_) => {
                let job: Job = Self::parse_json(&mut response)?;
                model.business_jobs.insert(0, job);
                model.active_toast = Some(ToastMessage::success("Job posted"));
            }

            Endpoint::BusinessJobDetail { .. } => {
                model.selected_job = Some(Self::parse_json(&mut response)?);
            }

            Endpoint::RecentRoutes { .. } | Endpoint::JobRoutes { .. } => {
                let routes: Vec<RouteSummary> = Self::parse_json(&mut response)?;
                model.route_summaries = routes;
            }

            Endpoint::ActiveJobs => {
                model.active_jobs = Self::parse_json(&mut response)?;
            }

            Endpoint::AvailableJobs => {
                model.available_jobs = Self::parse_json(&mut response)?;
            }

            Endpoint::StartJob { .. } => {
                let job: Job = Self::parse_json(&mut response)?;
                model.available_jobs.retain(|j| j.id != job.id);
                Self::upsert_active_job(model, job);
                model.active_toast = Some(ToastMessage::success("Job started"));
            }

            Endpoint::CompleteJob { .. } => {
                let job: Job = Self::parse_json(&mut response)?;
                Self::upsert_active_job(model, job);
                model.active_toast = Some(ToastMessage::success("Job completed"));
            }

            Endpoint::CancelJob { .. } => {
                let job: Job = Self::parse_json(&mut response)?;
                Self::upsert_active_job(model, job);
                model.active_toast = Some(ToastMessage::info("Job cancelled"));
            }

            Endpoint::RemoveJob { id } => {
                model.active_jobs.retain(|j| j.id != *id);
            }

            Endpoint::BidsForJob { .. } => {
                model.selected_job_bids = Self::parse_json(&mut response)?;
            }

            Endpoint::PlaceBid(_) => {
                let _bid: Bid = Self::parse_json(&mut response)?;
                model.active_toast = Some(ToastMessage::success("Bid placed"));
            }

            Endpoint::AcceptBid { .. } => {
                let bid: Bid = Self::parse_json(&mut response)?;
                Self::upsert_bid(model, bid);
                model.active_toast = Some(ToastMessage::success("Bid accepted"));
            }

            Endpoint::RejectBid { .. } => {
                let bid: Bid = Self::parse_json(&mut response)?;
                Self::upsert_bid(model, bid);
                model.active_toast = Some(ToastMessage::info("Bid rejected"));
            }

            Endpoint::DeleteBid { id } => {
                model.selected_job_bids.retain(|b| b.id != *id);
                model.active_toast = Some(ToastMessage::info("Bid withdrawn"));
            }

            Endpoint::SubmitRoute(route) => {
                Self::route_submission_succeeded(model, caps, &route.client_ref);
            }

            Endpoint::Notifications => {
                let list: Vec<Notification> = Self::parse_json(&mut response)?;
                model.set_notifications(list);
            }

            Endpoint::MarkNotificationRead { id } => {
                let mut found = false;
                if let Some(n) = model.notifications.iter_mut().find(|n| n.id == *id) {
                    n.mark_read();
                    found = true;
                }
                if found {
                    model.unread_notifications = unread_total(&model.notifications);
                } else {
                    model.unread_notifications = model.unread_notifications.saturating_sub(1);
                }
            }

            Endpoint::ClearNotifications => {
                model.notifications.clear();
                model.unread_notifications = 0;
                model.active_toast = Some(ToastMessage::info("Notifications cleared"));
            }

            Endpoint::UnreadCount => {
                let count: UnreadCount = Self::parse_json(&mut response)?;
                model.unread_notifications = count.unread_count;
            }

            Endpoint::StripeAccountStatus => {
                let status: StripeAccountStatus = Self::parse_json(&mut response)?;
                model.stripe_status = Some(status);
            }

            Endpoint::StripeOnboardingUrl => {
                let link: StripeLink = Self::parse_json(&mut response)?;
                model.stripe_onboarding_url = Some(link.url);
            }

            Endpoint::StripeDashboardLink => {
                let link: StripeLink = Self::parse_json(&mut response)?;
                model.stripe_dashboard_url = Some(link.url);
            }
        }
        Ok(())
    }

    fn parse_json<T: DeserializeOwned>(
        response: &mut crux_http::Response<Vec<u8>>,
    ) -> Result<T, ApiError> {
        let bytes = response.take_body().unwrap_or_default();
        serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::malformed(format!("Could not parse the server response: {e}")))
    }

    fn fail_request(model: &mut Model, caps: &Capabilities, request: ApiRequest, error: ApiError) {
        warn!(
            endpoint = request.endpoint.name(),
            code = error.kind.code(),
            message = %error,
            "request failed"
        );
        match request.endpoint {
            Endpoint::SubmitRoute(route) => {
                Self::route_submission_failed(model, caps, route);
                return;
            }
            Endpoint::Login(_) | Endpoint::Register(_) => {
                model.state = AppState::Unauthenticated;
                model.active_error = Some(error);
            }
            _ => model.active_error = Some(error),
        }
        caps.render.render();
    }

    fn surface_error(model: &mut Model, caps: &Capabilities, error: ApiError) {
        model.active_error = Some(error);
        caps.render.render();
    }

    // --- 401 recovery ---

    fn handle_unauthorized(model: &mut Model, caps: &Capabilities, request: ApiRequest) {
        let refresh = model
            .session
            .session()
            .and_then(|s| s.refresh_token.clone());
        match refresh {
            Some(refresh) if !request.attempt.is_retry() => {
                info!(
                    endpoint = request.endpoint.name(),
                    "received 401, parking request behind token refresh"
                );
                model.parked.push(request);
                if !model.refresh_in_flight {
                    model.refresh_in_flight = true;
                    Self::send_refresh_request(model, caps, refresh);
                }
                caps.render.render();
            }
            _ => Self::fail_request(model, caps, request, ApiError::session_expired()),
        }
    }

    fn send_refresh_request(model: &mut Model, caps: &Capabilities, refresh: Secret) {
        match model.config.join("token/refresh/") {
            Ok(url) => {
                let payload = RefreshPayload { refresh };
                match caps.http.post(url).body_json(&payload) {
                    Ok(builder) => {
                        builder.send(|result| Event::TokenRefreshCompleted(Box::new(result)));
                    }
                    Err(e) => Self::refresh_failed(
                        model,
                        caps,
                        ApiError::validation(format!("Could not encode refresh request: {e}")),
                    ),
                }
            }
            Err(error) => Self::refresh_failed(model, caps, error),
        }
    }

    fn handle_refresh_response(model: &mut Model, caps: &Capabilities, result: ApiResult) {
        model.refresh_in_flight = false;
        match result {
            Ok(mut response) => match Self::parse_json::<RefreshResponse>(&mut response) {
                Ok(token) => Self::refresh_succeeded(model, caps, token.access),
                Err(error) => Self::refresh_failed(model, caps, error),
            },
            Err(error) => {
                let error = Self::classify_transport(error);
                Self::refresh_failed(model, caps, error);
            }
        }
    }

    fn refresh_succeeded(model: &mut Model, caps: &Capabilities, access: Secret) {
        info!(
            parked = model.parked.len(),
            "token refresh succeeded, replaying parked requests"
        );
        Self::persist_value(
            caps,
            StorageKey::AccessToken,
            access.expose().as_bytes().to_vec(),
        );
        if let Some(session) = model.session.session_mut() {
            session.access_token = access;
        }
        let parked = std::mem::take(&mut model.parked);
        for request in parked {
            Self::send_api_request(model, caps, request.retried());
        }
        caps.render.render();
    }

    fn refresh_failed(model: &mut Model, caps: &Capabilities, error: ApiError) {
        warn!(code = error.kind.code(), "token refresh failed, clearing session");
        model.refresh_in_flight = false;
        Self::delete_value(caps, StorageKey::AccessToken);
        Self::delete_value(caps, StorageKey::RefreshToken);
        model.session = SessionState::Anonymous;
        model.state = AppState::Unauthenticated;

        let parked = std::mem::take(&mut model.parked);
        for request in parked {
            Self::fail_request(model, caps, request, ApiError::session_expired());
        }
        // The refresh error wins over whatever the parked failures surfaced.
        model.active_error = Some(error);
        caps.render.render();
    }

    // --- Route queue ---

    fn route_submission_succeeded(model: &mut Model, caps: &Capabilities, client_ref: &str) {
        if model.retrying_route.as_deref() == Some(client_ref) {
            model.retrying_route = None;
            if model.route_queue.remove(client_ref).is_some() {
                Self::persist_route_queue(model, caps);
            }
            info!(client_ref, "queued route submitted");
            Self::advance_retry_pass(model, caps);
        } else {
            info!(client_ref, "route submitted");
            model.active_toast = Some(ToastMessage::success("Route submitted"));
        }
    }

    fn route_submission_failed(model: &mut Model, caps: &Capabilities, route: PendingRoute) {
        if model.retrying_route.as_deref() == Some(route.client_ref.as_str()) {
            // The entry is still queued; the pass stops at the first failure.
            model.retrying_route = None;
            info!(
                client_ref = %route.client_ref,
                remaining = model.route_queue.len(),
                "queued route retry failed, stopping pass"
            );
            caps.render.render();
            return;
        }
        model.route_queue.push(route);
        Self::persist_route_queue(model, caps);
        model.active_toast = Some(ToastMessage::new(
            "Couldn't submit the route. It was saved and will be retried.",
            ToastKind::Warning,
        ));
        caps.render.render();
    }

    fn advance_retry_pass(model: &mut Model, caps: &Capabilities) {
        if model.retrying_route.is_some() {
            return;
        }
        let Some(front) = model.route_queue.front() else {
            return;
        };
        let route = front.clone();
        model.retrying_route = Some(route.client_ref.clone());
        info!(
            client_ref = %route.client_ref,
            job_id = route.job_id.value(),
            "retrying queued route"
        );
        Self::send_api_request(model, caps, ApiRequest::new(Endpoint::SubmitRoute(route)));
    }

    fn persist_route_queue(model: &Model, caps: &Capabilities) {
        match model.route_queue.encode() {
            Ok(bytes) => Self::persist_value(caps, StorageKey::PendingRoutes, bytes),
            Err(error) => warn!(%error, "could not encode the pending route queue"),
        }
    }

    // --- Storage ---

    fn persist_value(caps: &Capabilities, key: StorageKey, value: Vec<u8>) {
        caps.key_value
            .set(key.storage_key().to_string(), value, move |result| {
                Event::StoredValueWritten {
                    key,
                    result: Box::new(result),
                }
            });
    }

    fn delete_value(caps: &Capabilities, key: StorageKey) {
        caps.key_value
            .delete(key.storage_key().to_string(), move |result| {
                Event::StoredValueWritten {
                    key,
                    result: Box::new(result),
                }
            });
    }

    fn clear_session_storage(caps: &Capabilities) {
        for key in [
            StorageKey::AccessToken,
            StorageKey::RefreshToken,
            StorageKey::UserType,
            StorageKey::UserId,
        ] {
            Self::delete_value(caps, key);
        }
    }

    // --- Tracking ---

    fn handle_position(model: &mut Model, caps: &Capabilities, result: PositionResult) {
        if !model.session.is_authenticated() {
            // Watch cancellation can race a fix already in flight.
            return;
        }
        let Some(recorder) = model.tracking.as_mut() else {
            return;
        };
        match result {
            PositionResult::Ok { fix } => {
                match Coordinate::new(fix.latitude, fix.longitude, UnixTimeMs(fix.timestamp_ms)) {
                    Ok(coordinate) => {
                        recorder.record(coordinate);
                        model.map_center = Some(coordinate);
                        caps.render.render();
                    }
                    Err(error) => debug!(%error, "dropping invalid position fix"),
                }
            }
            PositionResult::Err { error } => {
                warn!(%error, "position watch reported an error");
                if error.is_permission_error() {
                    Self::surface_error(model, caps, ApiError::validation(error.to_string()));
                }
            }
        }
    }

    // --- Local guards ---

    fn guard_job_transition(model: &Model, id: JobId, to: JobStatus) -> Result<(), ApiError> {
        match model.active_jobs.iter().find(|j| j.id == id) {
            Some(job) => job.status.validate_transition(to).map_err(ApiError::from),
            None => Ok(()),
        }
    }

    fn guard_job_removal(model: &Model, id: JobId) -> Result<(), ApiError> {
        match model.active_jobs.iter().find(|j| j.id == id) {
            Some(job) if !job.status.is_terminal() => Err(ApiError::validation(
                "Only completed or cancelled jobs can be removed",
            )),
            _ => Ok(()),
        }
    }

    fn guard_bid_decision(model: &Model, id: BidId, to: BidStatus) -> Result<(), ApiError> {
        match model.selected_job_bids.iter().find(|b| b.id == id) {
            Some(bid) => bid.status.validate_decision(to).map_err(ApiError::from),
            None => Ok(()),
        }
    }

    fn upsert_active_job(model: &mut Model, job: Job) {
        if let Some(slot) = model.active_jobs.iter_mut().find(|j| j.id == job.id) {
            *slot = job;
        } else {
            model.active_jobs.push(job);
        }
    }

    fn upsert_bid(model: &mut Model, bid: Bid) {
        if let Some(slot) = model.selected_job_bids.iter_mut().find(|b| b.id == bid.id) {
            *slot = bid;
        }
    }

    // --- View building ---

    fn home_view(model: &Model) -> ViewState {
        match model.session.role() {
            Some(UserRole::Business) => ViewState::BusinessHome {
                jobs: model.business_jobs.iter().map(JobCard::from).collect(),
                selected: model.selected_job.as_ref().map(|job| JobDetailView {
                    job: JobCard::from(job),
                    description: job.description.clone().unwrap_or_default(),
                    bids: model.selected_job_bids.iter().map(BidView::from).collect(),
                }),
                recent_routes: model.route_summaries.iter().map(RouteView::from).collect(),
                stripe: Self::stripe_view(model),
            },
            Some(UserRole::Leafleteer) => ViewState::LeafleteerHome {
                active: model.active_jobs.iter().map(JobCard::from).collect(),
                available: model.available_jobs.iter().map(JobCard::from).collect(),
                stripe: Self::stripe_view(model),
            },
            None => ViewState::Unauthenticated,
        }
    }

    fn stripe_view(model: &Model) -> StripeView {
        let status = model.stripe_status.as_ref();
        StripeView {
            has_account: status.is_some_and(|s| s.has_account),
            onboarding_complete: status.is_some_and(|s| s.onboarding_complete),
            payouts_enabled: status.is_some_and(|s| s.payouts_enabled),
            needs_onboarding: status.map_or(true, |s| s.needs_onboarding()),
            onboarding_url: model.stripe_onboarding_url.clone(),
            dashboard_url: model.stripe_dashboard_url.clone(),
        }
    }
}

fn wire_method(method: HttpMethod) -> crux_http::http::Method {
    match method {
        HttpMethod::Get => crux_http::http::Method::Get,
        HttpMethod::Post => crux_http::http::Method::Post,
        HttpMethod::Put => crux_http::http::Method::Put,
        HttpMethod::Patch => crux_http::http::Method::Patch,
        HttpMethod::Delete => crux_http::http::Method::Delete,
    }
}
