//! Error taxonomy shared by every signing-engine crate

use thiserror::Error;

/// Failures surfaced by the signing engine.
///
/// Every variant is terminal for the invoking call; the engine never
/// retries internally.
#[derive(Error, Debug)]
pub enum SigningError {
    /// Bad coordinates, dimensions, or missing signature data.
    /// Carries clamped values the caller can retry with.
    #[error("Validation failed: {details}")]
    Validation {
        details: String,
        recommended_x: Option<f64>,
        recommended_y: Option<f64>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Signer {signer_id} already has an open placement on document {document_id}")]
    DuplicateSigner {
        document_id: String,
        signer_id: String,
    },

    /// Key material unreadable or wrong credentials
    #[error("Key material error: {0}")]
    CryptoConfig(String),

    #[error("Signature of {required} bytes exceeds the reserved {reserved} bytes")]
    SigningCapacity { required: usize, reserved: usize },

    #[error("Malformed PDF: {0}")]
    Pdf(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SigningError {
    /// Shorthand for a validation failure without recommendations
    pub fn validation(details: impl Into<String>) -> Self {
        Self::Validation {
            details: details.into(),
            recommended_x: None,
            recommended_y: None,
        }
    }

    /// True when the caller can fix the request and try again
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::InvalidInput(_) | Self::DuplicateSigner { .. }
        )
    }

    /// The engine never retries; kept explicit for callers wiring retry policies
    pub fn is_retryable(&self) -> bool {
        false
    }
}

pub type Result<T> = std::result::Result<T, SigningError>;
