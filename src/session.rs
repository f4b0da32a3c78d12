//! Session state and its device-local persistence format. Tokens live in a
//! redacted wrapper so a stray `Debug` can never leak them into logs.

use std::fmt;
use std::str;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::ids::UserId;

/// Opaque credential. `Debug` is redacted and the backing memory is wiped on
/// drop.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl From<String> for Secret {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for Secret {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[serde(alias = "Business")]
    Business,
    #[serde(alias = "Leafleteer")]
    Leafleteer,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Business => "business",
            UserRole::Leafleteer => "leafleteer",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "business" => Some(UserRole::Business),
            "leafleteer" => Some(UserRole::Leafleteer),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub access_token: Secret,
    pub refresh_token: Option<Secret>,
    pub role: UserRole,
    pub user_id: Option<UserId>,
}

impl Session {
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.expose())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Bootstrap has not finished reading the persisted keys yet.
    #[default]
    Restoring,
    Anonymous,
    Authenticated(Session),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        match self {
            SessionState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn role(&self) -> Option<UserRole> {
        self.session().map(|s| s.role)
    }
}

/// The five device-local keys this app persists. Key strings are part of the
/// on-device format and must not change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageKey {
    AccessToken,
    RefreshToken,
    UserType,
    UserId,
    PendingRoutes,
}

impl StorageKey {
    pub const ALL: [StorageKey; 5] = [
        StorageKey::AccessToken,
        StorageKey::RefreshToken,
        StorageKey::UserType,
        StorageKey::UserId,
        StorageKey::PendingRoutes,
    ];

    pub fn storage_key(&self) -> &'static str {
        match self {
            StorageKey::AccessToken => "access_token",
            StorageKey::RefreshToken => "refresh_token",
            StorageKey::UserType => "user_type",
            StorageKey::UserId => "user_id",
            StorageKey::PendingRoutes => "unsavedRoutes",
        }
    }
}

fn decode_utf8(bytes: Option<Vec<u8>>) -> Option<String> {
    let bytes = bytes?;
    match String::from_utf8(bytes) {
        Ok(s) if !s.trim().is_empty() => Some(s),
        _ => None,
    }
}

/// Rebuilds a session from the raw persisted values. Returns `None` when the
/// stored state is absent or too damaged to use; callers treat that as
/// logged-out rather than an error.
pub fn restore_session(
    access: Option<Vec<u8>>,
    refresh: Option<Vec<u8>>,
    user_type: Option<Vec<u8>>,
    user_id: Option<Vec<u8>>,
) -> Option<Session> {
    let access_token = Secret::new(decode_utf8(access)?);
    let role = UserRole::parse(&decode_utf8(user_type)?)?;
    let refresh_token = decode_utf8(refresh).map(Secret::new);
    let user_id = decode_utf8(user_id)
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(UserId);

    Some(Session {
        access_token,
        refresh_token,
        role,
        user_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(s: &str) -> Option<Vec<u8>> {
        Some(s.as_bytes().to_vec())
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{secret:?}"), "Secret(****)");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_role_parse_accepts_both_cases() {
        assert_eq!(UserRole::parse("business"), Some(UserRole::Business));
        assert_eq!(UserRole::parse("Leafleteer"), Some(UserRole::Leafleteer));
        assert_eq!(UserRole::parse(" BUSINESS "), Some(UserRole::Business));
        assert_eq!(UserRole::parse("admin"), None);
    }

    #[test]
    fn test_role_wire_format_is_lowercase() {
        assert_eq!(
            serde_json::to_string(&UserRole::Leafleteer).unwrap(),
            r#""leafleteer""#
        );
        let role: UserRole = serde_json::from_str(r#""Business""#).unwrap();
        assert_eq!(role, UserRole::Business);
    }

    #[test]
    fn test_restore_full_session() {
        let session = restore_session(
            bytes("acc-123"),
            bytes("ref-456"),
            bytes("leafleteer"),
            bytes("17"),
        )
        .unwrap();
        assert_eq!(session.access_token.expose(), "acc-123");
        assert_eq!(session.refresh_token.unwrap().expose(), "ref-456");
        assert_eq!(session.role, UserRole::Leafleteer);
        assert_eq!(session.user_id, Some(UserId(17)));
    }

    #[test]
    fn test_restore_requires_access_token_and_role() {
        assert!(restore_session(None, bytes("r"), bytes("business"), None).is_none());
        assert!(restore_session(bytes("a"), bytes("r"), None, None).is_none());
        assert!(restore_session(bytes("a"), bytes("r"), bytes("wizard"), None).is_none());
    }

    #[test]
    fn test_restore_tolerates_damaged_optional_fields() {
        let session = restore_session(
            bytes("acc"),
            Some(vec![0xff, 0xfe]),
            bytes("business"),
            bytes("not-a-number"),
        )
        .unwrap();
        assert!(session.refresh_token.is_none());
        assert!(session.user_id.is_none());
    }

    #[test]
    fn test_bearer_header_value() {
        let session = Session {
            access_token: Secret::new("tok"),
            refresh_token: None,
            role: UserRole::Business,
            user_id: None,
        };
        assert_eq!(session.bearer(), "Bearer tok");
    }

    #[test]
    fn test_storage_key_strings_are_frozen() {
        assert_eq!(StorageKey::AccessToken.storage_key(), "access_token");
        assert_eq!(StorageKey::RefreshToken.storage_key(), "refresh_token");
        assert_eq!(StorageKey::UserType.storage_key(), "user_type");
        assert_eq!(StorageKey::UserId.storage_key(), "user_id");
        assert_eq!(StorageKey::PendingRoutes.storage_key(), "unsavedRoutes");
    }
}
