use shared_types::SigningError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Failed to load key material: {0}")]
    KeyMaterial(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Malformed signed data: {0}")]
    Malformed(String),

    #[error("Signature verification failed: {0}")]
    Verification(String),
}

impl From<CryptoError> for SigningError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::KeyMaterial(_) | CryptoError::Certificate(_) => {
                SigningError::CryptoConfig(err.to_string())
            }
            CryptoError::Malformed(_) | CryptoError::Verification(_) => {
                SigningError::InvalidInput(err.to_string())
            }
        }
    }
}
