//! Shared PDF handling utilities
//!
//! Coordinate validation, page geometry, signature image stamping, and
//! detached signing by incremental update.

pub mod coords;
pub mod error;
pub mod image;
pub mod parser;
pub mod signer;
pub mod stamper;
pub mod writer;

pub use coords::{validate_coordinates, validate_placement, validate_position, ValidationResult};
pub use error::PdfError;
pub use parser::PdfDocument;
pub use signer::{sign_pdf, verify_pdf, SignatureOptions, VerifiedPdfSignature, DEFAULT_RESERVED_SIZE};
pub use stamper::{embed, StampPlacement};
