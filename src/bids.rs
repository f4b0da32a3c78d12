//! Bids leafleteers place on open jobs, and the accept/reject decision the
//! business takes on them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ApiError;
use crate::ids::{BidId, JobId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

impl BidStatus {
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "pending" | "open" | "submitted" => Some(Self::Pending),
            "accepted" | "approved" | "won" => Some(Self::Accepted),
            "rejected" | "declined" | "lost" => Some(Self::Rejected),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Accepted => "Accepted",
            Self::Rejected => "Rejected",
        }
    }

    #[must_use]
    pub const fn is_decided(self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected)
    }

    /// A bid is decided exactly once, out of `Pending`.
    pub fn validate_decision(self, to: Self) -> Result<(), BidDecisionError> {
        if self.is_decided() {
            return Err(BidDecisionError::AlreadyDecided { status: self });
        }
        if !to.is_decided() {
            return Err(BidDecisionError::NotADecision);
        }
        Ok(())
    }
}

impl std::fmt::Display for BidStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BidDecisionError {
    #[error("Bid has already been {status}")]
    AlreadyDecided { status: BidStatus },
    #[error("A bid can only move to accepted or rejected")]
    NotADecision,
}

impl From<BidDecisionError> for ApiError {
    fn from(e: BidDecisionError) -> Self {
        ApiError::validation(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    #[serde(default)]
    pub job_id: Option<JobId>,
    #[serde(default)]
    pub leafleteer: Option<UserId>,
    #[serde(default)]
    pub amount: String,
    #[serde(default)]
    pub status: BidStatus,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Bid {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == BidStatus::Pending
    }

    /// Parsed bid amount, `None` when the backend string is not a number.
    #[must_use]
    pub fn amount_value(&self) -> Option<f64> {
        self.amount.trim().parse::<f64>().ok().filter(|a| a.is_finite())
    }
}

/// What a leafleteer submits against an open job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BidDraft {
    pub job_id: JobId,
    pub amount: String,
}

impl BidDraft {
    pub fn validate(&self) -> Result<(), ApiError> {
        match self.amount.trim().parse::<f64>() {
            Ok(amount) if amount > 0.0 && amount.is_finite() => Ok(()),
            _ => Err(ApiError::validation("Bid amount must be a positive amount")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings_round_trip() {
        for status in [BidStatus::Pending, BidStatus::Accepted, BidStatus::Rejected] {
            assert_eq!(BidStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(BidStatus::from_str("DECLINED"), Some(BidStatus::Rejected));
        assert_eq!(BidStatus::from_str("approved"), Some(BidStatus::Accepted));
        assert_eq!(BidStatus::from_str("maybe"), None);
    }

    #[test]
    fn test_pending_bid_can_be_decided() {
        assert!(BidStatus::Pending.validate_decision(BidStatus::Accepted).is_ok());
        assert!(BidStatus::Pending.validate_decision(BidStatus::Rejected).is_ok());
    }

    #[test]
    fn test_decided_bid_stays_decided() {
        assert!(matches!(
            BidStatus::Accepted.validate_decision(BidStatus::Rejected),
            Err(BidDecisionError::AlreadyDecided { status: BidStatus::Accepted })
        ));
        assert!(matches!(
            BidStatus::Rejected.validate_decision(BidStatus::Accepted),
            Err(BidDecisionError::AlreadyDecided { status: BidStatus::Rejected })
        ));
        assert!(matches!(
            BidStatus::Pending.validate_decision(BidStatus::Pending),
            Err(BidDecisionError::NotADecision)
        ));
    }

    #[test]
    fn test_bid_tolerates_minimal_payload() {
        let bid: Bid = serde_json::from_str(r#"{"id": 12}"#).unwrap();
        assert_eq!(bid.id, BidId(12));
        assert!(bid.is_pending());
        assert!(bid.amount_value().is_none());

        let bid: Bid = serde_json::from_str(
            r#"{"id": 12, "job_id": 3, "amount": "45.50", "status": "accepted"}"#,
        )
        .unwrap();
        assert_eq!(bid.status, BidStatus::Accepted);
        assert_eq!(bid.amount_value(), Some(45.5));
    }

    #[test]
    fn test_draft_validation() {
        let draft = BidDraft {
            job_id: JobId(3),
            amount: "45.50".into(),
        };
        assert!(draft.validate().is_ok());

        for bad in ["", "0", "-2", "lots", "NaN"] {
            let draft = BidDraft {
                job_id: JobId(3),
                amount: bad.into(),
            };
            assert!(draft.validate().is_err(), "expected {bad:?} to fail");
        }
    }
}
