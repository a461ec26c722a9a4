//! Public signing link records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::LinkStatus;

/// A capability link bound to one document.
///
/// Only the SHA-256 hash of the token is ever stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicLink {
    pub id: String,
    pub document_id: String,
    /// Hex SHA-256 of the plaintext token
    pub token_hash: String,
    pub recipient_email: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub one_time: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub used_by_ip: Option<String>,
    pub status: LinkStatus,
    pub access_count: u64,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub allow_visual_sign: bool,
    pub allow_download_after_sign: bool,
    /// Free-form JSON supplied by the link creator
    pub metadata: Option<String>,
}

impl PublicLink {
    pub fn new(document_id: &str, token_hash: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            token_hash,
            recipient_email: None,
            created_by: None,
            created_at: Utc::now(),
            expires_at: None,
            one_time: true,
            used_at: None,
            used_by_ip: None,
            status: LinkStatus::Active,
            access_count: 0,
            last_accessed_at: None,
            allow_visual_sign: true,
            allow_download_after_sign: true,
            metadata: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }

    pub fn is_active(&self) -> bool {
        self.status == LinkStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_link_defaults() {
        let link = PublicLink::new("doc-1", "ab".repeat(32));
        assert!(link.one_time);
        assert!(link.is_active());
        assert_eq!(link.access_count, 0);
        assert!(link.allow_visual_sign);
        assert!(link.allow_download_after_sign);
    }

    #[test]
    fn test_expiry_comparison() {
        let now = Utc::now();
        let mut link = PublicLink::new("doc-1", String::new());
        assert!(!link.is_expired_at(now));

        link.expires_at = Some(now - Duration::minutes(1));
        assert!(link.is_expired_at(now));

        link.expires_at = Some(now + Duration::minutes(1));
        assert!(!link.is_expired_at(now));
    }
}
