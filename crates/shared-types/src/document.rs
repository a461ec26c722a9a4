use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::DocumentStatus;

/// The slice of a stored document the signing engine needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub owner_id: String,
    /// Original upload name; artifacts are named `stamped_<file_name>` and `signed_<file_name>`
    pub file_name: String,
    /// Where the uploaded PDF lives
    pub source_path: String,
    /// Latest signed artifact, once any signer has finalized
    pub signed_path: Option<String>,
    pub status: DocumentStatus,
    pub is_signed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn new(owner_id: &str, file_name: &str, source_path: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            file_name: file_name.to_string(),
            source_path: source_path.to_string(),
            signed_path: None,
            status: DocumentStatus::Pending,
            is_signed: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }

    /// The newest artifact: the signed copy if one exists, otherwise the upload
    pub fn current_path(&self) -> &str {
        self.signed_path.as_deref().unwrap_or(&self.source_path)
    }

    pub fn mark_signed(&mut self) {
        self.is_signed = true;
        self.status = DocumentStatus::Signed;
        self.updated_at = Utc::now();
    }
}
