//! Finalize: stamp the signer's image, sign the result, then record it
//!
//! Work on one document is serialized behind a per-document lock. All PDF
//! and key work runs on the blocking pool. Artifacts are staged in temp
//! files and renamed into place together. A placement only becomes SIGNED
//! after its signed artifact is on disk, and the document only points at
//! the artifact after the placement is SIGNED.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use shared_crypto::CertifiedIdentity;
use shared_pdf::stamper::{DEFAULT_HEIGHT, DEFAULT_WIDTH};
use shared_pdf::{embed, sign_pdf, validate_placement, StampPlacement};
use shared_types::{DocumentRecord, Result, SignaturePlacement, SignatureType, SigningError};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::links::PublicLinkService;
use crate::placement::{ensure_signer, validation_error, PlacementService};
use crate::storage::{decode_payload, SignatureImageStore, StagedWrite};

/// Final position and presentation chosen by the signer at signing time
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementOverride {
    pub x_pct: f64,
    pub y_pct: f64,
    pub page_number: u32,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub signature_type: Option<SignatureType>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinalizeRequest {
    pub document_id: String,
    pub placement_id: String,
    pub caller: String,
    /// Base64 PNG, optionally a data URL. Falls back to the stored image.
    pub image: Option<String>,
    pub reason: Option<String>,
    pub location: Option<String>,
    pub placement_override: Option<PlacementOverride>,
}

impl FinalizeRequest {
    pub fn new(document_id: &str, placement_id: &str, caller: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            placement_id: placement_id.to_string(),
            caller: caller.to_string(),
            ..Self::default()
        }
    }

    pub fn with_image(mut self, payload: &str) -> Self {
        self.image = Some(payload.to_string());
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }
}

/// Redemption of a public link followed by a finalize as the link's signer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublicFinalizeRequest {
    pub token: String,
    /// Forwarded client address, kept for attribution only
    pub request_ip: Option<String>,
    pub placement_id: String,
    pub image: Option<String>,
    pub reason: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalizeOutcome {
    pub placement: SignaturePlacement,
    pub document: DocumentRecord,
    pub stamped_path: PathBuf,
    pub signed_path: PathBuf,
}

pub struct FinalizeEngine {
    pipeline: Arc<Pipeline>,
    links: Arc<PublicLinkService>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl FinalizeEngine {
    pub fn new(config: EngineConfig, placements: Arc<PlacementService>, links: Arc<PublicLinkService>) -> Self {
        let images = SignatureImageStore::from_config(&config);
        Self {
            pipeline: Arc::new(Pipeline {
                config,
                placements,
                images,
            }),
            links,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn finalize(&self, request: FinalizeRequest) -> Result<FinalizeOutcome> {
        let lock = self.document_lock(&request.document_id);
        let _guard = lock.lock().await;

        let pipeline = Arc::clone(&self.pipeline);
        tokio::task::spawn_blocking(move || pipeline.run(request))
            .await
            .map_err(|e| SigningError::Io(io::Error::other(format!("finalize task failed: {}", e))))?
    }

    /// The signer picks the final position and supplies the image in one call
    pub async fn sign_with_placement(
        &self,
        caller: &str,
        placement_id: &str,
        image: &str,
        placement: PlacementOverride,
    ) -> Result<FinalizeOutcome> {
        let validation = validate_placement(
            Some(placement.x_pct),
            Some(placement.y_pct),
            Some(i64::from(placement.page_number)),
            Some(image),
            placement.width,
            placement.height,
        );
        if !validation.is_valid {
            return Err(validation_error(validation));
        }

        let current = self.pipeline.placements.get(placement_id)?;
        let request = FinalizeRequest {
            placement_override: Some(placement),
            ..FinalizeRequest::new(&current.document_id, placement_id, caller).with_image(image)
        };
        self.finalize(request).await
    }

    /// Redeem the link, then finalize as the placement's signer. The link is
    /// spent even if the finalize step fails afterwards.
    pub async fn finalize_public(&self, request: PublicFinalizeRequest) -> Result<FinalizeOutcome> {
        let link = self
            .links
            .resolve(&request.token)?
            .ok_or_else(|| SigningError::StateConflict("signing link is invalid or expired".to_string()))?;
        if request.image.is_some() && !link.allow_visual_sign {
            return Err(SigningError::Authorization(
                "this link does not allow visual signatures".to_string(),
            ));
        }

        let placement = self.pipeline.placements.get(&request.placement_id)?;
        if placement.document_id != link.document_id {
            return Err(SigningError::Authorization(
                "signing link does not cover this placement".to_string(),
            ));
        }

        let link = self.links.redeem(&request.token, request.request_ip.as_deref())?;
        info!(link_id = %link.id, placement_id = %placement.id, "Finalizing through public link");

        self.finalize(FinalizeRequest {
            document_id: link.document_id,
            placement_id: placement.id,
            caller: placement.signer_id,
            image: request.image,
            reason: request.reason,
            location: request.location,
            placement_override: None,
        })
        .await
    }

    fn document_lock(&self, document_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(document_id.to_string()).or_default())
    }
}

struct Pipeline {
    config: EngineConfig,
    placements: Arc<PlacementService>,
    images: SignatureImageStore,
}

impl Pipeline {
    fn run(&self, request: FinalizeRequest) -> Result<FinalizeOutcome> {
        let mut placement = self.placements.get(&request.placement_id)?;
        if placement.document_id != request.document_id {
            return Err(SigningError::NotFound(format!(
                "placement {} on document {}",
                request.placement_id, request.document_id
            )));
        }
        ensure_signer(&placement, &request.caller)?;
        placement.ensure_pending()?;
        let document = self.placements.document(&request.document_id)?;

        info!(
            document_id = %document.id,
            placement_id = %placement.id,
            "Finalize started"
        );

        // Key material first: a bad keystore must fail before any output exists
        let identity = CertifiedIdentity::load(&self.config.key_material())?;

        if let Some(o) = &request.placement_override {
            placement.x_pct = o.x_pct;
            placement.y_pct = o.y_pct;
            placement.page_number = o.page_number;
            placement.width = o.width.or(placement.width);
            placement.height = o.height.or(placement.height);
            placement.signature_type = o.signature_type.unwrap_or(SignatureType::Image);
            placement.notes = o.notes.clone().or(placement.notes.take());
        }

        let image = match (&request.image, &placement.image_ref) {
            (Some(payload), _) => Some(decode_payload(payload)?),
            (None, Some(stored)) => Some(self.images.read_image(stored)?),
            (None, None) => None,
        };

        let source = std::fs::read(document.current_path())?;
        let stamp = StampPlacement::new(placement.page_number, placement.x_pct, placement.y_pct)
            .with_size(
                placement.width.unwrap_or(DEFAULT_WIDTH),
                placement.height.unwrap_or(DEFAULT_HEIGHT),
            );
        let stamped = embed(&source, image.as_deref(), &[stamp])?;

        let options = self
            .config
            .signature_options(request.reason.as_deref(), request.location.as_deref());
        let signed = sign_pdf(&stamped, &identity, &options)?;

        let base = base_name(&document.file_name);
        let out_dir = &self.config.output_dir;
        let mut staged = StagedWrite::new();
        let stamped_path = staged.stage(out_dir, &format!("stamped_{}", base), &stamped)?;
        let signed_path = staged.stage(out_dir, &format!("signed_{}", base), &signed)?;

        if let Some(payload) = &request.image {
            let stored = self.images.store_image(payload, &placement.id)?;
            placement.image_ref = Some(stored.to_string_lossy().to_string());
        }
        placement.reason = request.reason.clone().or(placement.reason);
        placement.location = request.location.clone().or(placement.location);

        let committed = match staged.commit() {
            Ok(committed) => committed,
            Err(e) => {
                self.discard_image(&request, &placement);
                return Err(e);
            }
        };

        // The artifacts are in place; a lost compare-and-set puts the old ones back
        let placement = match self.placements.mark_signed(&placement) {
            Ok(signed) => signed,
            Err(e) => {
                committed.rollback();
                self.discard_image(&request, &placement);
                warn!(placement_id = %placement.id, error = %e, "Placement changed during finalize");
                return Err(e);
            }
        };
        committed.finish();

        self.placements
            .record_artifact(&document.id, &signed_path.to_string_lossy())?;
        let document = self.placements.refresh_document_status(&document.id)?;

        info!(
            document_id = %document.id,
            placement_id = %placement.id,
            signed_path = %signed_path.display(),
            bytes = signed.len(),
            "Finalize complete"
        );

        Ok(FinalizeOutcome {
            placement,
            document,
            stamped_path,
            signed_path,
        })
    }

    /// Remove an image stored by this run
    fn discard_image(&self, request: &FinalizeRequest, placement: &SignaturePlacement) {
        if request.image.is_none() {
            return;
        }
        if let Some(path) = &placement.image_ref {
            if let Err(e) = self.images.delete_image(path) {
                warn!(path = %path, error = %e, "Failed to remove signature image");
            }
        }
    }
}

/// File name without any directory part
fn base_name(file_name: &str) -> String {
    Path::new(file_name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "document.pdf".to_string())
}
