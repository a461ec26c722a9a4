//! Verification of detached CMS SignedData against a known content digest

use chrono::{DateTime, Utc};
use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::signed_data::{SignedData, SignerIdentifier, SignerInfo};
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::Signature;
use x509_cert::der::asn1::{OctetStringRef, UtcTime};
use x509_cert::der::{Decode, Encode, SliceReader};
use x509_cert::Certificate;

use crate::cert;
use crate::cms::{OID_DATA, OID_ECDSA_SHA256, OID_MESSAGE_DIGEST, OID_SHA256, OID_SIGNED_DATA, OID_SIGNING_TIME};
use crate::error::CryptoError;

/// What a successful verification learned about the signer
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SignatureInfo {
    pub signer_common_name: Option<String>,
    pub signing_time: Option<DateTime<Utc>>,
    pub chain_len: usize,
}

/// Verify `cms_der` (trailing zero padding allowed) over `content_digest`
pub fn verify_detached(cms_der: &[u8], content_digest: &[u8; 32]) -> Result<SignatureInfo, CryptoError> {
    // The PDF slot is zero-padded, so decode exactly one ContentInfo
    let mut reader = SliceReader::new(cms_der).map_err(malformed)?;
    let content_info = ContentInfo::decode(&mut reader).map_err(malformed)?;

    if content_info.content_type.as_bytes() != OID_SIGNED_DATA {
        return Err(CryptoError::Malformed(format!(
            "content type {} is not signed-data",
            content_info.content_type
        )));
    }

    let signed_data: SignedData = content_info.content.decode_as().map_err(malformed)?;

    if signed_data.encap_content_info.econtent_type.as_bytes() != OID_DATA {
        return Err(CryptoError::Malformed("encapsulated content is not id-data".to_string()));
    }
    if signed_data.encap_content_info.econtent.is_some() {
        return Err(CryptoError::Malformed("signature is not detached".to_string()));
    }

    let certificates: Vec<Certificate> = signed_data
        .certificates
        .as_ref()
        .map(|set| {
            set.0
                .iter()
                .filter_map(|choice| match choice {
                    CertificateChoices::Certificate(c) => Some(c.clone()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    let signer_info = signed_data
        .signer_infos
        .0
        .iter()
        .next()
        .ok_or_else(|| CryptoError::Malformed("no SignerInfo present".to_string()))?;

    let signer_cert = find_signer_certificate(signer_info, &certificates)?;
    let signing_time = verify_signer_info(signer_info, signer_cert, content_digest)?;

    Ok(SignatureInfo {
        signer_common_name: cert::common_name(signer_cert),
        signing_time,
        chain_len: certificates.len(),
    })
}

fn find_signer_certificate<'a>(
    signer_info: &SignerInfo,
    certificates: &'a [Certificate],
) -> Result<&'a Certificate, CryptoError> {
    let SignerIdentifier::IssuerAndSerialNumber(ias) = &signer_info.sid else {
        return Err(CryptoError::Malformed(
            "only issuer-and-serial signer identifiers are supported".to_string(),
        ));
    };

    certificates
        .iter()
        .find(|c| c.tbs_certificate.issuer == ias.issuer && c.tbs_certificate.serial_number == ias.serial_number)
        .ok_or_else(|| CryptoError::Verification("signer certificate not embedded".to_string()))
}

/// Check the message digest and the signature over the signed attributes
fn verify_signer_info(
    signer_info: &SignerInfo,
    signer_cert: &Certificate,
    content_digest: &[u8; 32],
) -> Result<Option<DateTime<Utc>>, CryptoError> {
    if signer_info.digest_alg.oid.as_bytes() != OID_SHA256 {
        return Err(CryptoError::Verification(format!(
            "unsupported digest algorithm {}",
            signer_info.digest_alg.oid
        )));
    }
    if signer_info.signature_algorithm.oid.as_bytes() != OID_ECDSA_SHA256 {
        return Err(CryptoError::Verification(format!(
            "unsupported signature algorithm {}",
            signer_info.signature_algorithm.oid
        )));
    }

    let signed_attrs = signer_info
        .signed_attrs
        .as_ref()
        .ok_or_else(|| CryptoError::Malformed("signed attributes missing".to_string()))?;

    let mut message_digest = None;
    let mut signing_time = None;
    for attr in signed_attrs.iter() {
        let Some(value) = attr.values.iter().next() else {
            continue;
        };
        if attr.oid.as_bytes() == OID_MESSAGE_DIGEST {
            let digest: OctetStringRef<'_> = value.decode_as().map_err(malformed)?;
            message_digest = Some(digest.as_bytes().to_vec());
        } else if attr.oid.as_bytes() == OID_SIGNING_TIME {
            if let Ok(time) = value.decode_as::<UtcTime>() {
                let secs = time.to_unix_duration().as_secs() as i64;
                signing_time = DateTime::<Utc>::from_timestamp(secs, 0);
            }
        }
    }

    match message_digest {
        Some(d) if d.as_slice() == content_digest.as_slice() => {}
        Some(_) => {
            return Err(CryptoError::Verification(
                "message digest does not match the signed byte range".to_string(),
            ))
        }
        None => return Err(CryptoError::Malformed("message-digest attribute missing".to_string())),
    }

    // Signature covers the attributes re-encoded as a SET
    let attrs_der = signed_attrs.to_der().map_err(malformed)?;
    let signature = Signature::from_der(signer_info.signature.as_bytes())
        .map_err(|_| CryptoError::Malformed("signature is not a DER ECDSA value".to_string()))?;
    cert::verifying_key(signer_cert)?
        .verify(&attrs_der, &signature)
        .map_err(|_| CryptoError::Verification("ECDSA signature does not verify".to_string()))?;

    Ok(signing_time)
}

fn malformed(e: x509_cert::der::Error) -> CryptoError {
    CryptoError::Malformed(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::cms::build_signed_data;
    use crate::keys::{sha256, CertifiedIdentity, KeyFormat, KeyMaterialConfig};
    use chrono::TimeZone;
    use std::path::Path;

    fn identity() -> CertifiedIdentity {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
        CertifiedIdentity::load(&KeyMaterialConfig::new(dir, "signer").with_password("changeit")).unwrap()
    }

    #[test]
    fn test_round_trip_verifies() {
        let digest = sha256(b"%PDF-1.7 byte range");
        let time = Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap();
        let cms = build_signed_data(&identity(), &digest, time).unwrap();

        let info = verify_detached(&cms, &digest).unwrap();
        assert_eq!(info.signer_common_name.as_deref(), Some("DocSign Test Signer"));
        assert_eq!(info.signing_time, Some(time));
        assert_eq!(info.chain_len, 2);
    }

    #[test]
    fn test_zero_padding_is_ignored() {
        let digest = sha256(b"content");
        let mut cms = build_signed_data(&identity(), &digest, Utc::now()).unwrap();
        cms.extend(std::iter::repeat(0u8).take(512));
        assert!(verify_detached(&cms, &digest).is_ok());
    }

    #[test]
    fn test_wrong_digest_rejected() {
        let digest = sha256(b"content");
        let cms = build_signed_data(&identity(), &digest, Utc::now()).unwrap();
        let err = verify_detached(&cms, &sha256(b"tampered")).unwrap_err();
        assert!(matches!(err, CryptoError::Verification(_)));
    }

    #[test]
    fn test_flipped_signature_byte_rejected() {
        let digest = sha256(b"content");
        let mut cms = build_signed_data(&identity(), &digest, Utc::now()).unwrap();
        // The ECDSA value sits at the tail of the structure; corrupt its last byte
        let last = cms.len() - 1;
        cms[last] ^= 0x01;
        assert!(verify_detached(&cms, &digest).is_err());
    }

    #[test]
    fn test_single_cert_chain() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
        let id = CertifiedIdentity::load(&KeyMaterialConfig::new(dir, "plain").with_format(KeyFormat::Der)).unwrap();
        let digest = sha256(b"content");
        let cms = build_signed_data(&id, &digest, Utc::now()).unwrap();
        assert_eq!(verify_detached(&cms, &digest).unwrap().chain_len, 1);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            verify_detached(&[0x30, 0x03, 0x02, 0x01, 0x01], &[0u8; 32]),
            Err(CryptoError::Malformed(_))
        ));
    }
}
