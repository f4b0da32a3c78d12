//! Leafleting jobs: the status machine both apps share, wire DTOs for the
//! business and leafleteer job surfaces, and draft validation for posting.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ApiError;
use crate::ids::{JobId, UserId};
use crate::tracking::{format_distance, route_distance_m, validate_lat_lon, Coordinate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Open,
    Assigned,
    InProgress,
    Completed,
    Cancelled,
}

impl JobStatus {
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "open" | "pending" | "posted" => Some(Self::Open),
            "assigned" | "claimed" | "accepted" => Some(Self::Assigned),
            "in_progress" | "inprogress" | "started" | "active" => Some(Self::InProgress),
            "completed" | "complete" | "done" | "finished" => Some(Self::Completed),
            "cancelled" | "canceled" | "aborted" => Some(Self::Cancelled),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Assigned => "Assigned",
            Self::InProgress => "In Progress",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Assigned | Self::InProgress)
    }

    /// Cancellation is allowed from any non-terminal status; completion only
    /// out of `InProgress`.
    #[must_use]
    pub fn valid_transitions(self) -> Vec<Self> {
        match self {
            Self::Open => vec![Self::Assigned, Self::Cancelled],
            Self::Assigned => vec![Self::InProgress, Self::Cancelled],
            Self::InProgress => vec![Self::Completed, Self::Cancelled],
            Self::Completed | Self::Cancelled => vec![],
        }
    }

    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        self.valid_transitions().contains(&to)
    }

    pub fn validate_transition(self, to: Self) -> Result<(), TransitionError> {
        if self == to {
            return Err(TransitionError::SameStatus);
        }
        if self.is_terminal() {
            return Err(TransitionError::FromTerminalStatus { status: self });
        }
        if !self.can_transition_to(to) {
            return Err(TransitionError::InvalidTransition { from: self, to });
        }
        Ok(())
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Cannot transition to the same status")]
    SameStatus,
    #[error("Cannot transition from terminal status: {status}")]
    FromTerminalStatus { status: JobStatus },
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}

impl From<TransitionError> for ApiError {
    fn from(e: TransitionError) -> Self {
        ApiError::validation(e.to_string())
    }
}

/// A job as the backend returns it. Everything beyond the identity fields is
/// tolerated missing so list endpoints can slim their payloads down.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    #[serde(default)]
    pub business_user: Option<UserId>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub number_of_leaflets: u32,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub radius_m: Option<u32>,
    #[serde(default)]
    pub budget: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Job {
    #[must_use]
    pub fn location(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => validate_lat_lon(lat, lon).ok().map(|()| (lat, lon)),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// What a business fills in before posting a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub number_of_leaflets: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: u32,
    pub budget: String,
}

impl JobDraft {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.title.trim().is_empty() {
            return Err(ApiError::validation("Job title cannot be empty"));
        }
        if self.number_of_leaflets == 0 {
            return Err(ApiError::validation("Number of leaflets must be at least 1"));
        }
        validate_lat_lon(self.latitude, self.longitude)?;
        if self.radius_m == 0 {
            return Err(ApiError::validation("Delivery radius must be at least 1 m"));
        }
        match self.budget.trim().parse::<f64>() {
            Ok(amount) if amount > 0.0 && amount.is_finite() => Ok(()),
            _ => Err(ApiError::validation("Budget must be a positive amount")),
        }
    }
}

/// One recorded route of a job, as the business route views return it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSummary {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub job: Option<JobId>,
    #[serde(default)]
    pub coordinates: Vec<Coordinate>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

impl RouteSummary {
    #[must_use]
    pub fn distance_m(&self) -> f64 {
        route_distance_m(&self.coordinates)
    }

    #[must_use]
    pub fn distance_text(&self) -> String {
        format_distance(self.distance_m())
    }
}
