use serde::{Deserialize, Serialize};

use crux_kv::error::KeyValueError;

use crate::account::{LoginCredentials, ProfileUpdate, RegistrationDraft};
use crate::api::ApiRequest;
use crate::bids::BidDraft;
use crate::capabilities::PositionResult;
use crate::ids::{BidId, JobId, NotificationId};
use crate::jobs::JobDraft;
use crate::session::StorageKey;

/// Raw outcome of one HTTP exchange, before the core classifies it.
pub type ApiResult = crux_http::Result<crux_http::Response<Vec<u8>>>;

/// Outcome of one key-value operation. `Ok` carries the previous value for
/// writes and the stored value for reads.
pub type StorageResult = Result<Option<Vec<u8>>, KeyValueError>;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Event {
    // Session
    AppLaunched,
    LoginRequested {
        credentials: LoginCredentials,
    },
    RegistrationRequested(Box<RegistrationDraft>),
    LogoutRequested,

    // Profile & account
    ProfileRequested,
    ProfileUpdateRequested(Box<ProfileUpdate>),
    AccountDeletionRequested,

    // Business jobs
    BusinessJobsRequested,
    JobPostRequested(Box<JobDraft>),
    JobDetailRequested {
        id: JobId,
    },
    RecentRoutesRequested,
    JobRoutesRequested {
        id: JobId,
    },

    // Leafleteer jobs
    ActiveJobsRequested,
    AvailableJobsRequested,
    JobStartRequested {
        id: JobId,
    },
    JobCompletionRequested {
        id: JobId,
    },
    JobCancellationRequested {
        id: JobId,
    },
    JobRemovalRequested {
        id: JobId,
    },

    // Bids
    BidPlacementRequested {
        draft: BidDraft,
    },
    BidAcceptanceRequested {
        id: BidId,
    },
    BidRejectionRequested {
        id: BidId,
    },
    BidWithdrawalRequested {
        id: BidId,
    },

    // Route tracking
    TrackingStarted {
        job_id: JobId,
    },
    TrackingStopped,

    // Notifications
    NotificationsRequested,
    NotificationReadRequested {
        id: NotificationId,
    },
    NotificationsClearRequested,
    UnreadCountRequested,

    // Payments
    StripeStatusRequested,
    StripeOnboardingRequested,
    StripeDashboardRequested,

    // Transient surfaces
    ToastDismissed,
    ErrorDismissed,

    // Capability responses (boxed to keep the enum small)
    #[serde(skip)]
    ApiResponded {
        request: Box<ApiRequest>,
        result: Box<ApiResult>,
    },
    #[serde(skip)]
    TokenRefreshCompleted(Box<ApiResult>),
    #[serde(skip)]
    StoredValueLoaded {
        key: StorageKey,
        result: Box<StorageResult>,
    },
    #[serde(skip)]
    StoredValueWritten {
        key: StorageKey,
        result: Box<StorageResult>,
    },
    #[serde(skip)]
    PositionUpdated(PositionResult),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_size_is_reasonable() {
        // Large payloads ride behind a Box.
        let size = std::mem::size_of::<Event>();
        assert!(size <= 128, "Event is {size} bytes; box more variants");
    }

    #[test]
    fn test_shell_events_round_trip_as_json() {
        let events = vec![
            Event::AppLaunched,
            Event::LoginRequested {
                credentials: LoginCredentials {
                    email: "user@example.com".into(),
                    password: "hunter2hunter2".into(),
                },
            },
            Event::TrackingStarted {
                job_id: JobId::from(7),
            },
            Event::TrackingStopped,
            Event::NotificationReadRequested {
                id: NotificationId::from(3),
            },
        ];
        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let back: Event = serde_json::from_str(&json).unwrap();
            assert_eq!(back, event);
        }
    }
}
