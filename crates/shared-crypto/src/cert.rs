//! X.509 certificate helpers for the signing chain

use p256::ecdsa::VerifyingKey;
use x509_cert::der::asn1::{ObjectIdentifier, PrintableStringRef, Utf8StringRef};
use x509_cert::der::{Decode, Encode};
use x509_cert::Certificate;

use crate::error::CryptoError;

/// id-at-commonName: 2.5.4.3
const OID_COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");

/// Parse a chain from a PEM bundle (leaf first)
pub fn chain_from_pem(pem: &[u8]) -> Result<Vec<Certificate>, CryptoError> {
    Certificate::load_pem_chain(pem)
        .map_err(|e| CryptoError::Certificate(format!("invalid PEM certificate chain: {}", e)))
}

/// Parse a single DER certificate
pub fn certificate_from_der(der: &[u8]) -> Result<Certificate, CryptoError> {
    Certificate::from_der(der)
        .map_err(|e| CryptoError::Certificate(format!("invalid DER certificate: {}", e)))
}

pub fn to_der(cert: &Certificate) -> Result<Vec<u8>, CryptoError> {
    cert.to_der()
        .map_err(|e| CryptoError::Certificate(format!("failed to encode certificate: {}", e)))
}

/// Encoded `IssuerAndSerialNumber` for a CMS SignerInfo
pub fn issuer_and_serial_der(cert: &Certificate) -> Result<Vec<u8>, CryptoError> {
    let tbs = &cert.tbs_certificate;
    let issuer = tbs
        .issuer
        .to_der()
        .map_err(|e| CryptoError::Certificate(format!("failed to encode issuer: {}", e)))?;
    let serial = tbs
        .serial_number
        .to_der()
        .map_err(|e| CryptoError::Certificate(format!("failed to encode serial: {}", e)))?;
    Ok(crate::cms::build_sequence(&[&issuer, &serial]))
}

/// Subject public key as a P-256 verifying key
pub fn verifying_key(cert: &Certificate) -> Result<VerifyingKey, CryptoError> {
    let bits = cert
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .raw_bytes();
    VerifyingKey::from_sec1_bytes(bits).map_err(|_| {
        CryptoError::Certificate("certificate does not carry a P-256 public key".to_string())
    })
}

/// First CN in the subject, if any
pub fn common_name(cert: &Certificate) -> Option<String> {
    for rdn in cert.tbs_certificate.subject.0.iter() {
        for atv in rdn.0.iter() {
            if atv.oid != OID_COMMON_NAME {
                continue;
            }
            if let Ok(s) = atv.value.decode_as::<Utf8StringRef<'_>>() {
                return Some(s.as_str().to_string());
            }
            if let Ok(s) = atv.value.decode_as::<PrintableStringRef<'_>>() {
                return Some(s.as_str().to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAIN_PEM: &[u8] = include_bytes!("../tests/fixtures/signer.crt");
    const LEAF_DER: &[u8] = include_bytes!("../tests/fixtures/plain.crt");

    #[test]
    fn test_chain_from_pem_reads_leaf_and_ca() {
        let chain = chain_from_pem(CHAIN_PEM).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(common_name(&chain[0]).as_deref(), Some("DocSign Test Signer"));
        assert_eq!(common_name(&chain[1]).as_deref(), Some("DocSign Test CA"));
    }

    #[test]
    fn test_der_matches_pem_leaf() {
        let from_der = certificate_from_der(LEAF_DER).unwrap();
        let chain = chain_from_pem(CHAIN_PEM).unwrap();
        assert_eq!(from_der, chain[0]);
        assert_eq!(to_der(&from_der).unwrap(), LEAF_DER);
    }

    #[test]
    fn test_issuer_and_serial_is_a_sequence() {
        let chain = chain_from_pem(CHAIN_PEM).unwrap();
        let ias = issuer_and_serial_der(&chain[0]).unwrap();
        assert_eq!(ias[0], 0x30);
        // Leaf issuer is the CA subject
        let ca_subject = chain[1].tbs_certificate.subject.to_der().unwrap();
        assert!(ias.windows(ca_subject.len()).any(|w| w == ca_subject.as_slice()));
    }

    #[test]
    fn test_verifying_key_from_leaf() {
        let chain = chain_from_pem(CHAIN_PEM).unwrap();
        assert!(verifying_key(&chain[0]).is_ok());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            certificate_from_der(b"not a certificate"),
            Err(CryptoError::Certificate(_))
        ));
        assert!(chain_from_pem(b"-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n").is_err());
    }
}
