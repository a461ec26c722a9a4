//! Engine configuration
//!
//! Read from `DOCSIGN_*` environment variables, with builder overrides for
//! tests and embedding.

use std::fmt;
use std::path::PathBuf;

use shared_crypto::{KeyFormat, KeyMaterialConfig};
use shared_pdf::{SignatureOptions, DEFAULT_RESERVED_SIZE};
use shared_types::{Result, SigningError};

/// 5 MiB
pub const DEFAULT_MAX_SIGNATURE_SIZE: usize = 5 * 1024 * 1024;
pub const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:8080/public/sign";

#[derive(Clone)]
pub struct EngineConfig {
    pub keystore_path: PathBuf,
    pub keystore_password: Option<String>,
    pub key_alias: String,
    pub keystore_format: KeyFormat,
    /// Bytes reserved in the PDF for the CMS blob
    pub signature_reserved_size: usize,
    /// Where stamped and signed artifacts are written
    pub output_dir: PathBuf,
    /// Where uploaded signature images are kept
    pub signature_storage_dir: PathBuf,
    /// Largest decoded signature image accepted, in bytes
    pub signature_max_size: usize,
    /// Public signing links are `<base>/<token>`
    pub public_base_url: String,
    pub signer_name: String,
    pub reason: String,
    pub location: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            keystore_path: PathBuf::from("./keystore"),
            keystore_password: None,
            key_alias: "signer".to_string(),
            keystore_format: KeyFormat::Pem,
            signature_reserved_size: DEFAULT_RESERVED_SIZE,
            output_dir: PathBuf::from("./signed-documents"),
            signature_storage_dir: PathBuf::from("./signature-uploads"),
            signature_max_size: DEFAULT_MAX_SIGNATURE_SIZE,
            public_base_url: DEFAULT_PUBLIC_BASE_URL.to_string(),
            signer_name: "Signer".to_string(),
            reason: "Approved".to_string(),
            location: "Location".to_string(),
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("keystore_path", &self.keystore_path)
            .field("keystore_password", &self.keystore_password.as_ref().map(|_| "<redacted>"))
            .field("key_alias", &self.key_alias)
            .field("keystore_format", &self.keystore_format)
            .field("signature_reserved_size", &self.signature_reserved_size)
            .field("output_dir", &self.output_dir)
            .field("signature_storage_dir", &self.signature_storage_dir)
            .field("signature_max_size", &self.signature_max_size)
            .field("public_base_url", &self.public_base_url)
            .field("signer_name", &self.signer_name)
            .field("reason", &self.reason)
            .field("location", &self.location)
            .finish()
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or empty values keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(path) = get("DOCSIGN_KEYSTORE_PATH") {
            config.keystore_path = PathBuf::from(path);
        }
        config.keystore_password = get("DOCSIGN_KEYSTORE_PASSWORD");
        if let Some(alias) = get("DOCSIGN_KEY_ALIAS") {
            config.key_alias = alias;
        }
        if let Some(format) = get("DOCSIGN_KEYSTORE_FORMAT") {
            config.keystore_format = format.parse().map_err(|_| {
                SigningError::CryptoConfig(format!(
                    "DOCSIGN_KEYSTORE_FORMAT must be pem or der, got {:?}",
                    format
                ))
            })?;
        }
        if let Some(size) = get("DOCSIGN_SIGNATURE_RESERVED_SIZE") {
            config.signature_reserved_size = parse_size("DOCSIGN_SIGNATURE_RESERVED_SIZE", &size)?;
        }
        if let Some(dir) = get("DOCSIGN_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("DOCSIGN_SIGNATURE_STORAGE_DIR") {
            config.signature_storage_dir = PathBuf::from(dir);
        }
        if let Some(size) = get("DOCSIGN_SIGNATURE_MAX_SIZE") {
            config.signature_max_size = parse_size("DOCSIGN_SIGNATURE_MAX_SIZE", &size)?;
        }
        if let Some(url) = get("DOCSIGN_PUBLIC_BASE_URL") {
            config.public_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(name) = get("DOCSIGN_SIGNER_NAME") {
            config.signer_name = name;
        }
        if let Some(reason) = get("DOCSIGN_SIGNER_REASON") {
            config.reason = reason;
        }
        if let Some(location) = get("DOCSIGN_SIGNER_LOCATION") {
            config.location = location;
        }

        Ok(config)
    }

    pub fn with_keystore(mut self, path: impl Into<PathBuf>, alias: &str) -> Self {
        self.keystore_path = path.into();
        self.key_alias = alias.to_string();
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.keystore_password = Some(password.to_string());
        self
    }

    pub fn with_format(mut self, format: KeyFormat) -> Self {
        self.keystore_format = format;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.signature_storage_dir = dir.into();
        self
    }

    pub fn with_reserved_size(mut self, size: usize) -> Self {
        self.signature_reserved_size = size;
        self
    }

    pub fn with_max_signature_size(mut self, size: usize) -> Self {
        self.signature_max_size = size;
        self
    }

    pub fn with_public_base_url(mut self, url: &str) -> Self {
        self.public_base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Key material description handed to the signer
    pub fn key_material(&self) -> KeyMaterialConfig {
        let mut material = KeyMaterialConfig::new(&self.keystore_path, &self.key_alias)
            .with_format(self.keystore_format);
        if let Some(password) = &self.keystore_password {
            material = material.with_password(password);
        }
        material
    }

    /// Signature dictionary values, with per-call reason/location overrides
    pub fn signature_options(&self, reason: Option<&str>, location: Option<&str>) -> SignatureOptions {
        SignatureOptions::new(
            &self.signer_name,
            reason.unwrap_or(&self.reason),
            location.unwrap_or(&self.location),
        )
        .with_reserved_size(self.signature_reserved_size)
    }

    pub fn public_url(&self, token: &str) -> String {
        format!("{}/{}", self.public_base_url, token)
    }
}

fn parse_size(key: &str, value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(size) if size > 0 => Ok(size),
        _ => Err(SigningError::InvalidInput(format!(
            "{} must be a positive integer, got {:?}",
            key, value
        ))),
    }
}
