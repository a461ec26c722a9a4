//! Signature placement lifecycle
//!
//! Owners assign signers and move placeholders around while they are
//! pending; signers sign or reject their own placement. Every mutation
//! checks the caller against the stored records, and status changes are
//! applied with a compare-and-set against `Pending`.

use std::sync::Arc;

use shared_pdf::coords::validate_dimensions;
use shared_pdf::{validate_position, ValidationResult};
use shared_types::{
    DocumentRecord, DocumentStatus, NewPlacement, PlacementStats, Result, SignaturePlacement,
    SignatureStatus, SigningError,
};
use tracing::{debug, info};

use crate::store::{DocumentStore, PlacementStore};

/// What a signer submits when signing directly
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignRequest {
    pub signature_data: String,
    pub reason: Option<String>,
    pub location: Option<String>,
}

impl SignRequest {
    pub fn new(signature_data: &str) -> Self {
        Self {
            signature_data: signature_data.to_string(),
            ..Self::default()
        }
    }
}

pub struct PlacementService {
    documents: Arc<dyn DocumentStore>,
    placements: Arc<dyn PlacementStore>,
}

impl PlacementService {
    pub fn new(documents: Arc<dyn DocumentStore>, placements: Arc<dyn PlacementStore>) -> Self {
        Self {
            documents,
            placements,
        }
    }

    /// Assign a signer to a document. Only the document owner may do this,
    /// and a signer holds at most one open placement per document.
    pub fn create(&self, caller: &str, new: NewPlacement) -> Result<SignaturePlacement> {
        let mut document = self.document(&new.document_id)?;
        if !document.is_owned_by(caller) {
            return Err(SigningError::Authorization(
                "only the document owner can add signers".to_string(),
            ));
        }

        check_position(new.x_pct, new.y_pct, new.page_number)?;
        if !validate_dimensions(new.width, new.height) {
            return Err(SigningError::validation("Signature dimensions out of acceptable range"));
        }

        let open = self
            .placements
            .by_document(&new.document_id)?
            .into_iter()
            .any(|p| p.signer_id == new.signer_id && !p.status.is_terminal());
        if open {
            return Err(SigningError::DuplicateSigner {
                document_id: new.document_id,
                signer_id: new.signer_id,
            });
        }

        let placement = SignaturePlacement::create(new);
        self.placements.save(placement.clone())?;

        if document.status == DocumentStatus::Pending {
            document.status = DocumentStatus::AwaitingSignatures;
            document.updated_at = placement.created_at;
            self.documents.save(document)?;
        }

        info!(
            placement_id = %placement.id,
            document_id = %placement.document_id,
            signer_id = %placement.signer_id,
            "Created signature placement"
        );
        Ok(placement)
    }

    /// Record a signature without producing a PDF artifact. The document
    /// only becomes SIGNED once a finalize has written one.
    pub fn sign(&self, caller: &str, placement_id: &str, request: SignRequest) -> Result<SignaturePlacement> {
        let mut placement = self.get(placement_id)?;
        ensure_signer(&placement, caller)?;
        placement.ensure_pending()?;
        if request.signature_data.trim().is_empty() {
            return Err(SigningError::validation("Signature data is missing."));
        }

        placement.signature_data = Some(request.signature_data);
        placement.reason = request.reason.or(placement.reason);
        placement.location = request.location.or(placement.location);
        let placement = self.mark_signed(&placement)?;
        self.refresh_document_status(&placement.document_id)?;
        Ok(placement)
    }

    pub fn reject(&self, caller: &str, placement_id: &str, reason: Option<&str>) -> Result<SignaturePlacement> {
        let placement = self.get(placement_id)?;
        ensure_signer(&placement, caller)?;
        let placement = self.update_pending(placement_id, |p| {
            p.transition(SignatureStatus::Rejected)?;
            if let Some(reason) = reason {
                p.reason = Some(reason.to_string());
            }
            Ok(())
        })?;

        info!(placement_id = %placement.id, signer_id = %placement.signer_id, "Signature rejected");
        Ok(placement)
    }

    /// Move a pending placement. Allowed for the signer and the document owner.
    pub fn update_coordinates(
        &self,
        caller: &str,
        placement_id: &str,
        x_pct: f64,
        y_pct: f64,
        page_number: u32,
    ) -> Result<SignaturePlacement> {
        let placement = self.get(placement_id)?;
        if placement.signer_id != caller {
            self.ensure_owner(&placement, caller)?;
        }
        placement.ensure_pending()?;
        check_position(x_pct, y_pct, page_number)?;

        let placement = self.update_pending(placement_id, |p| {
            p.x_pct = x_pct;
            p.y_pct = y_pct;
            p.page_number = page_number;
            p.updated_at = chrono::Utc::now();
            Ok(())
        })?;

        debug!(placement_id = %placement.id, x_pct, y_pct, page_number, "Moved placement");
        Ok(placement)
    }

    pub fn delete(&self, caller: &str, placement_id: &str) -> Result<()> {
        let placement = self.get(placement_id)?;
        self.ensure_owner(&placement, caller)?;
        placement.ensure_pending()?;
        if !self.placements.delete_if(placement_id, SignatureStatus::Pending)? {
            return Err(self.conflict(placement_id));
        }

        info!(placement_id, document_id = %placement.document_id, "Deleted placement");
        Ok(())
    }

    /// Withdraw a pending request. Owner only.
    pub fn cancel(&self, caller: &str, placement_id: &str) -> Result<SignaturePlacement> {
        let placement = self.get(placement_id)?;
        self.ensure_owner(&placement, caller)?;
        let placement = self.update_pending(placement_id, |p| p.transition(SignatureStatus::Cancelled))?;

        info!(placement_id, "Cancelled placement");
        Ok(placement)
    }

    /// Expiry hook for an external retention or deadline policy
    pub fn expire(&self, placement_id: &str) -> Result<SignaturePlacement> {
        let placement = self.update_pending(placement_id, |p| p.transition(SignatureStatus::Expired))?;

        info!(placement_id, "Expired placement");
        Ok(placement)
    }

    pub fn get(&self, placement_id: &str) -> Result<SignaturePlacement> {
        self.placements
            .get(placement_id)?
            .ok_or_else(|| SigningError::NotFound(format!("signature placement {}", placement_id)))
    }

    pub fn document_placements(&self, document_id: &str) -> Result<Vec<SignaturePlacement>> {
        self.placements.by_document(document_id)
    }

    pub fn pending_placements(&self, document_id: &str) -> Result<Vec<SignaturePlacement>> {
        Ok(self
            .placements
            .by_document(document_id)?
            .into_iter()
            .filter(SignaturePlacement::is_pending)
            .collect())
    }

    pub fn signer_placements(&self, signer_id: &str) -> Result<Vec<SignaturePlacement>> {
        self.placements.by_signer(signer_id)
    }

    /// Vacuously true for a document without placements
    pub fn are_all_signed(&self, document_id: &str) -> Result<bool> {
        Ok(self
            .placements
            .by_document(document_id)?
            .iter()
            .all(SignaturePlacement::is_signed))
    }

    pub fn stats(&self, document_id: &str) -> Result<PlacementStats> {
        Ok(PlacementStats::from_placements(
            &self.placements.by_document(document_id)?,
        ))
    }

    /// Store `prepared` as SIGNED. `prepared` is a copy read earlier and
    /// filled in by the signer; it fails with `StateConflict` if the stored
    /// placement left `Pending` or was updated after that read.
    pub(crate) fn mark_signed(&self, prepared: &SignaturePlacement) -> Result<SignaturePlacement> {
        let placement = self.update_pending(&prepared.id, |stored| {
            if stored.updated_at != prepared.updated_at {
                return Err(SigningError::StateConflict(format!(
                    "placement {} changed while it was being signed",
                    stored.id
                )));
            }
            *stored = prepared.clone();
            stored.transition(SignatureStatus::Signed)
        })?;

        info!(
            placement_id = %placement.id,
            document_id = %placement.document_id,
            signer_id = %placement.signer_id,
            "Signature applied"
        );
        Ok(placement)
    }

    /// Mark the document signed once every placement is signed and a
    /// signed artifact has been recorded
    pub fn refresh_document_status(&self, document_id: &str) -> Result<DocumentRecord> {
        let mut document = self.document(document_id)?;
        if document.is_signed || document.signed_path.is_none() {
            return Ok(document);
        }
        let placements = self.placements.by_document(document_id)?;
        if !placements.is_empty() && placements.iter().all(SignaturePlacement::is_signed) {
            document.mark_signed();
            self.documents.save(document.clone())?;
            info!(document_id, signers = placements.len(), "All signatures collected");
        }
        Ok(document)
    }

    /// Point the document at its newest signed artifact
    pub(crate) fn record_artifact(&self, document_id: &str, signed_path: &str) -> Result<()> {
        let mut document = self.document(document_id)?;
        document.signed_path = Some(signed_path.to_string());
        document.updated_at = chrono::Utc::now();
        self.documents.save(document)
    }

    /// Apply `change` to a copy of the stored placement and write it back
    /// only if the placement is still `Pending` at that moment
    fn update_pending<F>(&self, placement_id: &str, change: F) -> Result<SignaturePlacement>
    where
        F: FnOnce(&mut SignaturePlacement) -> Result<()>,
    {
        let mut change = Some(change);
        let mut outcome = None;
        let applied = self
            .placements
            .update_if(placement_id, SignatureStatus::Pending, &mut |stored| {
                if let Some(change) = change.take() {
                    let mut next = stored.clone();
                    let result = change(&mut next);
                    if result.is_ok() {
                        *stored = next.clone();
                    }
                    outcome = Some(result.map(|()| next));
                }
            })?;

        match outcome {
            Some(result) if applied => result,
            _ => Err(self.conflict(placement_id)),
        }
    }

    /// Explain why a placement is no longer open
    fn conflict(&self, placement_id: &str) -> SigningError {
        match self.placements.get(placement_id) {
            Ok(Some(current)) => match current.ensure_pending() {
                Err(e) => e,
                Ok(()) => SigningError::StateConflict(format!(
                    "placement {} changed concurrently",
                    placement_id
                )),
            },
            Ok(None) => SigningError::NotFound(format!("signature placement {}", placement_id)),
            Err(e) => e,
        }
    }

    pub(crate) fn document(&self, document_id: &str) -> Result<DocumentRecord> {
        self.documents
            .get(document_id)?
            .ok_or_else(|| SigningError::NotFound(format!("document {}", document_id)))
    }

    fn ensure_owner(&self, placement: &SignaturePlacement, caller: &str) -> Result<()> {
        if self.document(&placement.document_id)?.is_owned_by(caller) {
            Ok(())
        } else {
            Err(SigningError::Authorization(
                "only the document owner can change this placement".to_string(),
            ))
        }
    }
}

pub(crate) fn ensure_signer(placement: &SignaturePlacement, caller: &str) -> Result<()> {
    if placement.signer_id == caller {
        Ok(())
    } else {
        Err(SigningError::Authorization(
            "only the assigned signer can act on this placement".to_string(),
        ))
    }
}

fn check_position(x_pct: f64, y_pct: f64, page_number: u32) -> Result<()> {
    let result = validate_position(Some(x_pct), Some(y_pct), Some(i64::from(page_number)));
    if result.is_valid {
        Ok(())
    } else {
        Err(validation_error(result))
    }
}

/// Carry the clamped recommendations back to the caller
pub(crate) fn validation_error(result: ValidationResult) -> SigningError {
    SigningError::Validation {
        details: result.error_details.unwrap_or(result.message),
        recommended_x: result.recommended_x,
        recommended_y: result.recommended_y,
    }
}
