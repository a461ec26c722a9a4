//! Shared cryptography utilities
//!
//! This crate provides key material loading, certificate handling, and
//! detached CMS SignedData construction and verification for PDF signing.

pub mod cert;
pub mod cms;
pub mod error;
pub mod keys;
pub mod verify;

pub use error::CryptoError;
pub use keys::{sha256, sha256_hex, CertifiedIdentity, KeyFormat, KeyMaterialConfig, SigningIdentity};
pub use verify::{verify_detached, SignatureInfo};
