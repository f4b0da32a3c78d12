//! In-app notifications and the unread badge count.

use serde::{Deserialize, Serialize};

use crate::ids::{JobId, NotificationId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub job_id: Option<JobId>,
}

impl Notification {
    pub fn mark_read(&mut self) {
        self.read = true;
    }
}

/// Body of `GET notifications/unread-count/`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCount {
    #[serde(default)]
    pub unread_count: u32,
}

#[must_use]
pub fn unread_total(notifications: &[Notification]) -> u32 {
    notifications.iter().filter(|n| !n.read).count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(id: u64, read: bool) -> Notification {
        Notification {
            id: NotificationId(id),
            message: format!("notification {id}"),
            read,
            created_at: None,
            job_id: None,
        }
    }

    #[test]
    fn test_tolerates_minimal_payload() {
        let n: Notification = serde_json::from_str(r#"{"id": 9}"#).unwrap();
        assert_eq!(n.id, NotificationId(9));
        assert!(!n.read);
        assert!(n.message.is_empty());
    }

    #[test]
    fn test_unread_total_counts_unread_only() {
        let list = vec![notification(1, false), notification(2, true), notification(3, false)];
        assert_eq!(unread_total(&list), 2);
        assert_eq!(unread_total(&[]), 0);
    }

    #[test]
    fn test_mark_read_is_idempotent() {
        let mut n = notification(1, false);
        n.mark_read();
        assert!(n.read);
        n.mark_read();
        assert!(n.read);
    }

    #[test]
    fn test_unread_count_body() {
        let count: UnreadCount = serde_json::from_str(r#"{"unread_count": 4}"#).unwrap();
        assert_eq!(count.unread_count, 4);
        let count: UnreadCount = serde_json::from_str("{}").unwrap();
        assert_eq!(count.unread_count, 0);
    }
}
