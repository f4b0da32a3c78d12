//! Account surfaces: login and registration input, the user profile, and the
//! Stripe onboarding state for leafleteer payouts.

use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::ids::{ProfileId, UserId};
use crate::session::{Secret, UserRole};

/// Canonicalizes an email the way the backend stores it: trimmed and
/// lowercased. Rejects anything that is not plausibly an address.
pub fn normalize_email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim().to_lowercase();
    let mut parts = email.split('@');
    let valid = match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && domain.contains('.')
                && domain.split('.').all(|segment| !segment.is_empty())
                && !email.contains(char::is_whitespace)
        }
        _ => false,
    };
    if !valid {
        return Err(ApiError::validation("Enter a valid email address"));
    }
    Ok(email)
}

/// Login form state. Turned into the wire body only after validation, so an
/// invalid form never produces a network effect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: Secret,
}

impl LoginCredentials {
    pub fn into_payload(self) -> Result<LoginPayload, ApiError> {
        let email = normalize_email(&self.email)?;
        if self.password.is_empty() {
            return Err(ApiError::validation("Password cannot be empty"));
        }
        Ok(LoginPayload {
            email,
            password: self.password,
        })
    }
}

/// Body of `POST token/`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoginPayload {
    pub email: String,
    pub password: Secret,
}

/// Registration form state, validated the same way as login.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationDraft {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: Secret,
    pub user_type: Option<UserRole>,
}

impl RegistrationDraft {
    pub fn into_payload(self) -> Result<RegistrationPayload, ApiError> {
        let first_name = self.first_name.trim().to_owned();
        let last_name = self.last_name.trim().to_owned();
        if first_name.is_empty() || last_name.is_empty() {
            return Err(ApiError::validation("First and last name are required"));
        }
        let email = normalize_email(&self.email)?;
        if self.password.expose().chars().count() < 8 {
            return Err(ApiError::validation(
                "Password must be at least 8 characters",
            ));
        }
        let Some(user_type) = self.user_type else {
            return Err(ApiError::validation("Choose an account type"));
        };
        Ok(RegistrationPayload {
            first_name,
            last_name,
            email,
            password: self.password,
            user_type,
        })
    }
}

/// Body of `POST register/`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationPayload {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: Secret,
    pub user_type: UserRole,
}

/// A profile as `GET profiles/` returns it. The `user` field is the backend
/// auth-user id the route queries need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    #[serde(default)]
    pub user: Option<UserId>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub user_type: Option<UserRole>,
}

impl Profile {
    #[must_use]
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        name.trim().to_owned()
    }
}

/// Body of `PUT profiles/{id}/`. Absent fields are left untouched server-side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl ProfileUpdate {
    /// Validates and canonicalizes the update in place.
    pub fn validated(mut self) -> Result<Self, ApiError> {
        if let Some(first_name) = &self.first_name {
            if first_name.trim().is_empty() {
                return Err(ApiError::validation("First name cannot be empty"));
            }
        }
        if let Some(last_name) = &self.last_name {
            if last_name.trim().is_empty() {
                return Err(ApiError::validation("Last name cannot be empty"));
            }
        }
        if let Some(email) = &self.email {
            self.email = Some(normalize_email(email)?);
        }
        Ok(self)
    }
}

/// Body of `GET stripe-account-status/`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripeAccountStatus {
    #[serde(default)]
    pub has_account: bool,
    #[serde(default)]
    pub onboarding_complete: bool,
    #[serde(default)]
    pub payouts_enabled: bool,
}

impl StripeAccountStatus {
    /// Whether the leafleteer still has onboarding steps ahead of them.
    #[must_use]
    pub const fn needs_onboarding(self) -> bool {
        !self.has_account || !self.onboarding_complete
    }
}

/// Body of `GET stripe-onboarding-url/` and `GET get-dashboard-link/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StripeLink {
    #[serde(default)]
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_is_trimmed_and_lowercased() {
        assert_eq!(
            normalize_email("  User@Example.COM ").unwrap(),
            "user@example.com"
        );
    }

    #[test]
    fn test_email_rejects_malformed_input() {
        for bad in [
            "",
            "   ",
            "plainaddress",
            "@example.com",
            "user@",
            "user@nodot",
            "user@@example.com",
            "user@.com",
            "user@example..com",
            "us er@example.com",
        ] {
            assert!(normalize_email(bad).is_err(), "expected {bad:?} to fail");
        }
    }

    #[test]
    fn test_login_payload_requires_password() {
        let creds = LoginCredentials {
            email: "User@Example.com".into(),
            password: Secret::new("hunter2"),
        };
        let payload = creds.into_payload().unwrap();
        assert_eq!(payload.email, "user@example.com");

        let creds = LoginCredentials {
            email: "user@example.com".into(),
            password: Secret::default(),
        };
        assert!(creds.into_payload().is_err());
    }

    #[test]
    fn test_registration_validation() {
        let draft = RegistrationDraft {
            first_name: " Ada ".into(),
            last_name: "Lovelace".into(),
            email: "Ada@Example.com".into(),
            password: Secret::new("longenough"),
            user_type: Some(UserRole::Leafleteer),
        };
        let payload = draft.clone().into_payload().unwrap();
        assert_eq!(payload.first_name, "Ada");
        assert_eq!(payload.email, "ada@example.com");
        assert_eq!(payload.user_type, UserRole::Leafleteer);

        let mut bad = draft.clone();
        bad.password = Secret::new("short");
        assert!(bad.into_payload().is_err());

        let mut bad = draft.clone();
        bad.user_type = None;
        assert!(bad.into_payload().is_err());

        let mut bad = draft;
        bad.first_name = String::new();
        assert!(bad.into_payload().is_err());
    }

    #[test]
    fn test_profile_tolerates_minimal_payload() {
        let profile: Profile = serde_json::from_str(r#"{"id": 2}"#).unwrap();
        assert_eq!(profile.id, ProfileId(2));
        assert!(profile.user.is_none());
        assert_eq!(profile.display_name(), "");

        let profile: Profile = serde_json::from_str(
            r#"{"id": 2, "user": 40, "first_name": "Ada", "last_name": "Lovelace"}"#,
        )
        .unwrap();
        assert_eq!(profile.user, Some(UserId(40)));
        assert_eq!(profile.display_name(), "Ada Lovelace");
    }

    #[test]
    fn test_profile_update_canonicalizes_email() {
        let update = ProfileUpdate {
            email: Some("New@Example.com".into()),
            ..ProfileUpdate::default()
        };
        let update = update.validated().unwrap();
        assert_eq!(update.email.as_deref(), Some("new@example.com"));

        let update = ProfileUpdate {
            first_name: Some("  ".into()),
            ..ProfileUpdate::default()
        };
        assert!(update.validated().is_err());
    }

    #[test]
    fn test_stripe_status_onboarding_flag() {
        assert!(StripeAccountStatus::default().needs_onboarding());
        let done = StripeAccountStatus {
            has_account: true,
            onboarding_complete: true,
            payouts_enabled: true,
        };
        assert!(!done.needs_onboarding());
    }

    #[test]
    fn test_registration_wire_body_shape() {
        let payload = RegistrationPayload {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            password: Secret::new("longenough"),
            user_type: UserRole::Business,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["password"], "longenough");
        assert_eq!(value["user_type"], "business");
    }
}
