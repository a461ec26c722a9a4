//! Signing identities backed by configured key material
//!
//! A keystore is a directory holding `<alias>.key` (PKCS#8 P-256 private
//! key, encrypted when a password is configured) and `<alias>.crt` (the
//! certificate chain, leaf first).

use std::fmt;
use std::path::{Path, PathBuf};

use p256::ecdsa::{signature::Signer, signature::Verifier, Signature, SigningKey, VerifyingKey};
use p256::pkcs8::DecodePrivateKey;
use p256::SecretKey;
use sha2::{Digest, Sha256};
use tracing::debug;
use x509_cert::Certificate;

use crate::cert;
use crate::error::CryptoError;

/// Trait for any identity that can sign documents
pub trait SigningIdentity {
    /// SEC1 uncompressed public key
    fn public_key_sec1(&self) -> Vec<u8>;

    fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_sec1())
    }

    /// ECDSA P-256 over SHA-256(data), DER-encoded
    fn sign(&self, data: &[u8]) -> Vec<u8>;

    fn verify(&self, data: &[u8], signature: &[u8]) -> bool;

    /// Certificate chain, leaf first
    fn certificate_chain(&self) -> &[Certificate];

    /// Subject CN of the leaf certificate
    fn signer_name(&self) -> Option<String> {
        self.certificate_chain().first().and_then(cert::common_name)
    }
}

/// On-disk encoding of the keystore files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyFormat {
    #[default]
    Pem,
    Der,
}

impl std::str::FromStr for KeyFormat {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pem" => Ok(Self::Pem),
            "der" => Ok(Self::Der),
            other => Err(CryptoError::KeyMaterial(format!(
                "unknown keystore format: {}",
                other
            ))),
        }
    }
}

/// Where and how to load the signing key
#[derive(Clone)]
pub struct KeyMaterialConfig {
    pub path: PathBuf,
    pub password: Option<String>,
    pub alias: String,
    pub format: KeyFormat,
}

impl fmt::Debug for KeyMaterialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterialConfig")
            .field("path", &self.path)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("alias", &self.alias)
            .field("format", &self.format)
            .finish()
    }
}

impl KeyMaterialConfig {
    pub fn new(path: impl Into<PathBuf>, alias: &str) -> Self {
        Self {
            path: path.into(),
            password: None,
            alias: alias.to_string(),
            format: KeyFormat::Pem,
        }
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn with_format(mut self, format: KeyFormat) -> Self {
        self.format = format;
        self
    }

    pub fn key_path(&self) -> PathBuf {
        self.path.join(format!("{}.key", self.alias))
    }

    pub fn chain_path(&self) -> PathBuf {
        self.path.join(format!("{}.crt", self.alias))
    }
}

/// A private key paired with its certificate chain
pub struct CertifiedIdentity {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    chain: Vec<Certificate>,
}

impl CertifiedIdentity {
    /// Load and cross-check key material. Any failure is a `KeyMaterial` or
    /// `Certificate` error; nothing is cached.
    pub fn load(config: &KeyMaterialConfig) -> Result<Self, CryptoError> {
        debug!(alias = %config.alias, path = %config.path.display(), "Loading key material");

        let secret_key = load_secret_key(config)?;
        let chain = load_chain(&config.chain_path(), config.format)?;
        Self::from_parts(secret_key, chain)
    }

    /// Pair a key with a chain, refusing a leaf that belongs to another key
    pub fn from_parts(secret_key: SecretKey, chain: Vec<Certificate>) -> Result<Self, CryptoError> {
        let leaf = chain
            .first()
            .ok_or_else(|| CryptoError::Certificate("certificate chain is empty".to_string()))?;

        let signing_key = SigningKey::from(&secret_key);
        let verifying_key = VerifyingKey::from(&signing_key);

        let cert_key = cert::verifying_key(leaf)?;
        if cert_key.to_encoded_point(false) != verifying_key.to_encoded_point(false) {
            return Err(CryptoError::Certificate(
                "leaf certificate does not match the private key".to_string(),
            ));
        }

        Ok(Self {
            signing_key,
            verifying_key,
            chain,
        })
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }
}

impl SigningIdentity for CertifiedIdentity {
    fn public_key_sec1(&self) -> Vec<u8> {
        self.verifying_key
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing_key.sign(data);
        signature.to_der().as_bytes().to_vec()
    }

    fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        match Signature::from_der(signature) {
            Ok(sig) => self.verifying_key.verify(data, &sig).is_ok(),
            Err(_) => false,
        }
    }

    fn certificate_chain(&self) -> &[Certificate] {
        &self.chain
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, CryptoError> {
    std::fs::read(path)
        .map_err(|e| CryptoError::KeyMaterial(format!("cannot read {}: {}", path.display(), e)))
}

fn load_secret_key(config: &KeyMaterialConfig) -> Result<SecretKey, CryptoError> {
    let bytes = read_file(&config.key_path())?;

    let result = match (config.format, config.password.as_deref()) {
        (KeyFormat::Pem, Some(password)) => {
            let pem = std::str::from_utf8(&bytes)
                .map_err(|_| CryptoError::KeyMaterial("private key PEM is not UTF-8".to_string()))?;
            SecretKey::from_pkcs8_encrypted_pem(pem, password.as_bytes())
        }
        (KeyFormat::Pem, None) => {
            let pem = std::str::from_utf8(&bytes)
                .map_err(|_| CryptoError::KeyMaterial("private key PEM is not UTF-8".to_string()))?;
            SecretKey::from_pkcs8_pem(pem)
        }
        (KeyFormat::Der, Some(password)) => {
            SecretKey::from_pkcs8_encrypted_der(&bytes, password.as_bytes())
        }
        (KeyFormat::Der, None) => SecretKey::from_pkcs8_der(&bytes),
    };

    // The pkcs8 error does not distinguish a wrong password from corruption
    result.map_err(|e| {
        CryptoError::KeyMaterial(format!(
            "cannot decode private key for alias {}: {}",
            config.alias, e
        ))
    })
}

fn load_chain(path: &Path, format: KeyFormat) -> Result<Vec<Certificate>, CryptoError> {
    let bytes = read_file(path)?;
    match format {
        KeyFormat::Pem => cert::chain_from_pem(&bytes),
        KeyFormat::Der => Ok(vec![cert::certificate_from_der(&bytes)?]),
    }
}

/// Compute SHA-256 hash of data
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Compute SHA-256 hash and return as hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}
