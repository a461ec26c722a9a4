use shared_crypto::CryptoError;
use shared_types::SigningError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PdfError {
    #[error("Failed to parse PDF: {0}")]
    Parse(String),

    #[error("Unsupported PDF: {0}")]
    Unsupported(String),

    #[error("Invalid signature image: {0}")]
    Image(String),

    #[error("PDF operation failed: {0}")]
    Operation(String),

    #[error("Signature of {required} bytes does not fit the {reserved}-byte reservation")]
    Capacity { required: usize, reserved: usize },

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl From<lopdf::Error> for PdfError {
    fn from(err: lopdf::Error) -> Self {
        PdfError::Parse(err.to_string())
    }
}

impl From<PdfError> for SigningError {
    fn from(err: PdfError) -> Self {
        match err {
            PdfError::Capacity { required, reserved } => {
                SigningError::SigningCapacity { required, reserved }
            }
            PdfError::Crypto(e) => e.into(),
            PdfError::Image(msg) => SigningError::InvalidInput(msg),
            other => SigningError::Pdf(other.to_string()),
        }
    }
}
