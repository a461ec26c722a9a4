//! Signature placement records
//!
//! Placements reference their document and signer by id only; nothing
//! here holds a live reference to another record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SigningError};
use crate::types::{SignatureStatus, SignatureType};

/// One signer's placeholder on one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignaturePlacement {
    pub id: String,
    pub document_id: String,
    pub signer_id: String,
    /// Percentage of page width, measured from the left edge
    pub x_pct: f64,
    /// Percentage of page height, measured from the top edge
    pub y_pct: f64,
    /// 1-based
    pub page_number: u32,
    pub signature_type: SignatureType,
    pub status: SignatureStatus,
    pub signed_at: Option<DateTime<Utc>>,
    /// Typed text or the raw submitted payload
    pub signature_data: Option<String>,
    /// Path of the stored signature image
    pub image_ref: Option<String>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub reason: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields the document owner supplies when assigning a signer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPlacement {
    pub document_id: String,
    pub signer_id: String,
    pub x_pct: f64,
    pub y_pct: f64,
    pub page_number: u32,
    pub signature_type: SignatureType,
    pub width: Option<f64>,
    pub height: Option<f64>,
}

impl NewPlacement {
    pub fn new(document_id: &str, signer_id: &str, x_pct: f64, y_pct: f64, page_number: u32) -> Self {
        Self {
            document_id: document_id.to_string(),
            signer_id: signer_id.to_string(),
            x_pct,
            y_pct,
            page_number,
            signature_type: SignatureType::Digital,
            width: None,
            height: None,
        }
    }

    pub fn with_type(mut self, signature_type: SignatureType) -> Self {
        self.signature_type = signature_type;
        self
    }

    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }
}

impl SignaturePlacement {
    /// Build a fresh `Pending` placement
    pub fn create(new: NewPlacement) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            document_id: new.document_id,
            signer_id: new.signer_id,
            x_pct: new.x_pct,
            y_pct: new.y_pct,
            page_number: new.page_number,
            signature_type: new.signature_type,
            status: SignatureStatus::Pending,
            signed_at: None,
            signature_data: None,
            image_ref: None,
            width: new.width,
            height: new.height,
            reason: None,
            location: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == SignatureStatus::Pending
    }

    pub fn is_signed(&self) -> bool {
        self.status == SignatureStatus::Signed
    }

    /// Move to `next`, refusing to leave a terminal state
    pub fn transition(&mut self, next: SignatureStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(SigningError::StateConflict(format!(
                "placement {} is {} and cannot become {}",
                self.id, self.status, next
            )));
        }
        let now = Utc::now();
        self.status = next;
        if next == SignatureStatus::Signed {
            self.signed_at = Some(now);
        }
        self.updated_at = now;
        Ok(())
    }

    /// Errors with `StateConflict` unless still `Pending`
    pub fn ensure_pending(&self) -> Result<()> {
        if self.is_pending() {
            Ok(())
        } else {
            Err(SigningError::StateConflict(format!(
                "placement {} has already been processed ({})",
                self.id, self.status
            )))
        }
    }
}

/// Per-document signing progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementStats {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub all_signed: bool,
}

impl PlacementStats {
    pub fn from_placements(placements: &[SignaturePlacement]) -> Self {
        let completed = placements.iter().filter(|p| p.is_signed()).count();
        let pending = placements.iter().filter(|p| p.is_pending()).count();
        Self {
            total: placements.len(),
            completed,
            pending,
            all_signed: completed == placements.len(),
        }
    }
}
