//! CMS (Cryptographic Message Syntax) construction for detached PDF signatures
//!
//! Produces a PKCS#7 SignedData with:
//! - eContentType id-data and no encapsulated content (detached)
//! - the full signer certificate chain
//! - signed attributes: content-type, signing-time, message-digest,
//!   signing-certificate-v2
//!
//! The signature covers the DER `SET OF` encoding of the signed attributes,
//! which is then re-tagged `[0] IMPLICIT` inside the SignerInfo.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::cert;
use crate::error::CryptoError;
use crate::keys::SigningIdentity;

/// OID for SHA-256: 2.16.840.1.101.3.4.2.1
pub(crate) const OID_SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];

/// OID for ECDSA with SHA-256: 1.2.840.10045.4.3.2
pub(crate) const OID_ECDSA_SHA256: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x04, 0x03, 0x02];

/// OID for id-data (PKCS#7): 1.2.840.113549.1.7.1
pub(crate) const OID_DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x01];

/// OID for id-signedData (PKCS#7): 1.2.840.113549.1.7.2
pub(crate) const OID_SIGNED_DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x02];

/// OID for content-type attribute: 1.2.840.113549.1.9.3
const OID_CONTENT_TYPE: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x03];

/// OID for message-digest attribute: 1.2.840.113549.1.9.4
pub(crate) const OID_MESSAGE_DIGEST: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x04];

/// OID for signing-time attribute: 1.2.840.113549.1.9.5
pub(crate) const OID_SIGNING_TIME: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x05];

/// OID for id-aa-signingCertificateV2: 1.2.840.113549.1.9.16.2.47
const OID_SIGNING_CERTIFICATE_V2: &[u8] = &[
    0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x10, 0x02, 0x2F,
];

/// Build a detached SignedData over `document_digest` (SHA-256 of the byte range)
pub fn build_signed_data<I: SigningIdentity>(
    identity: &I,
    document_digest: &[u8; 32],
    signing_time: DateTime<Utc>,
) -> Result<Vec<u8>, CryptoError> {
    let chain = identity.certificate_chain();
    let leaf = chain
        .first()
        .ok_or_else(|| CryptoError::Certificate("certificate chain is empty".to_string()))?;
    let leaf_der = cert::to_der(leaf)?;

    let signed_attrs = build_signed_attributes(document_digest, signing_time, &leaf_der);
    let signature = identity.sign(&signed_attrs);

    let issuer_and_serial = cert::issuer_and_serial_der(leaf)?;
    let signer_info = build_signer_info(&issuer_and_serial, &signed_attrs, &signature);

    let mut chain_der = Vec::with_capacity(chain.len());
    for c in chain {
        chain_der.push(cert::to_der(c)?);
    }

    let signed_data = build_signed_data_content(&chain_der, &signer_info);
    Ok(build_content_info(&signed_data))
}

/// Signed attributes as a DER `SET OF Attribute` (tag 0x31)
fn build_signed_attributes(
    document_digest: &[u8],
    signing_time: DateTime<Utc>,
    leaf_der: &[u8],
) -> Vec<u8> {
    let utc = signing_time.format("%y%m%d%H%M%SZ").to_string();

    let attrs = vec![
        build_attribute(OID_CONTENT_TYPE, &build_oid(OID_DATA)),
        build_attribute(OID_SIGNING_TIME, &build_tlv(0x17, utc.as_bytes())),
        build_attribute(OID_MESSAGE_DIGEST, &build_octet_string(document_digest)),
        build_signing_certificate_v2(leaf_der),
    ];

    build_set_of(attrs)
}

/// ESS signing-certificate-v2 binding the signature to the leaf certificate.
///
/// ESSCertIDv2 omits hashAlgorithm because SHA-256 is the DEFAULT.
fn build_signing_certificate_v2(leaf_der: &[u8]) -> Vec<u8> {
    let cert_hash: [u8; 32] = Sha256::digest(leaf_der).into();
    let ess_cert_id = build_sequence(&[&build_octet_string(&cert_hash)]);
    let certs = build_sequence(&[&ess_cert_id]);
    let signing_cert = build_sequence(&[&certs]);
    build_attribute(OID_SIGNING_CERTIFICATE_V2, &signing_cert)
}

/// Attribute ::= SEQUENCE { attrType OID, attrValues SET OF value }
fn build_attribute(oid: &[u8], value: &[u8]) -> Vec<u8> {
    build_sequence(&[&build_oid(oid), &build_tlv(0x31, value)])
}

fn build_signer_info(issuer_and_serial: &[u8], signed_attrs: &[u8], signature: &[u8]) -> Vec<u8> {
    // Same content, IMPLICIT [0] instead of SET
    let mut attrs_tagged = signed_attrs.to_vec();
    attrs_tagged[0] = 0xA0;

    build_sequence(&[
        &build_integer(&[1]),
        issuer_and_serial,
        &build_algorithm_identifier(OID_SHA256),
        &attrs_tagged,
        &build_algorithm_identifier(OID_ECDSA_SHA256),
        &build_octet_string(signature),
    ])
}

fn build_signed_data_content(chain_der: &[Vec<u8>], signer_info: &[u8]) -> Vec<u8> {
    let digest_algorithms = build_tlv(0x31, &build_algorithm_identifier(OID_SHA256));
    let encap_content_info = build_sequence(&[&build_oid(OID_DATA)]);

    // certificates [0] IMPLICIT CertificateSet, DER-sorted like any SET OF
    let mut sorted = chain_der.to_vec();
    sorted.sort();
    let certificates = build_tlv(0xA0, &sorted.concat());

    build_sequence(&[
        &build_integer(&[1]),
        &digest_algorithms,
        &encap_content_info,
        &certificates,
        &build_tlv(0x31, signer_info),
    ])
}

fn build_content_info(signed_data: &[u8]) -> Vec<u8> {
    build_sequence(&[&build_oid(OID_SIGNED_DATA), &build_tlv(0xA0, signed_data)])
}

// === ASN.1 DER Encoding Helpers ===

pub(crate) fn build_sequence(items: &[&[u8]]) -> Vec<u8> {
    build_tlv(0x30, &items.concat())
}

/// SET OF with members in ascending encoded order
fn build_set_of(mut members: Vec<Vec<u8>>) -> Vec<u8> {
    members.sort();
    build_tlv(0x31, &members.concat())
}

fn build_oid(oid_bytes: &[u8]) -> Vec<u8> {
    build_tlv(0x06, oid_bytes)
}

fn build_integer(value: &[u8]) -> Vec<u8> {
    // Leading zero keeps a set high bit from reading as negative
    if !value.is_empty() && value[0] & 0x80 != 0 {
        let mut padded = vec![0];
        padded.extend(value);
        build_tlv(0x02, &padded)
    } else {
        build_tlv(0x02, value)
    }
}

fn build_octet_string(content: &[u8]) -> Vec<u8> {
    build_tlv(0x04, content)
}

/// AlgorithmIdentifier with absent parameters (RFC 5754, RFC 5758)
fn build_algorithm_identifier(oid: &[u8]) -> Vec<u8> {
    build_sequence(&[&build_oid(oid)])
}

pub(crate) fn build_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut result = vec![tag];
    result.extend(encode_length(content.len()));
    result.extend(content);
    result
}

/// DER definite length: short form below 128, otherwise minimal long form
fn encode_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    let significant = &bytes[skip..];
    let mut out = Vec::with_capacity(significant.len() + 1);
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_integer() {
        let int = build_integer(&[0x01]);
        assert_eq!(int, vec![0x02, 0x01, 0x01]);

        // High bit set - needs padding
        let int_padded = build_integer(&[0x80]);
        assert_eq!(int_padded, vec![0x02, 0x02, 0x00, 0x80]);
    }

    #[test]
    fn test_long_form_lengths() {
        assert_eq!(encode_length(127), vec![0x7F]);
        assert_eq!(encode_length(128), vec![0x81, 0x80]);
        assert_eq!(encode_length(300), vec![0x82, 0x01, 0x2C]);
        assert_eq!(encode_length(70_000), vec![0x83, 0x01, 0x11, 0x70]);
    }

    #[test]
    fn test_set_of_sorts_members() {
        let set = build_set_of(vec![vec![0x04, 0x01, 0xFF], vec![0x02, 0x01, 0x05]]);
        assert_eq!(set, vec![0x31, 0x06, 0x02, 0x01, 0x05, 0x04, 0x01, 0xFF]);
    }

    #[test]
    fn test_algorithm_identifier_has_no_params() {
        let alg = build_algorithm_identifier(OID_ECDSA_SHA256);
        assert_eq!(alg[0], 0x30);
        assert_eq!(alg[1] as usize, 2 + OID_ECDSA_SHA256.len());
    }

    #[test]
    fn test_signed_attributes_are_a_sorted_set() {
        let attrs = build_signed_attributes(&[7u8; 32], Utc::now(), b"leaf");
        assert_eq!(attrs[0], 0x31);
        // message digest is embedded verbatim
        assert!(attrs.windows(34).any(|w| w[0] == 0x04 && w[1] == 32 && w[2..] == [7u8; 32]));
    }
}
