//! Public signing links
//!
//! A link is a bearer capability: 256 random bits handed out once as a
//! base64url token. Only the SHA-256 of the token is stored, so a lost
//! token can only be replaced by minting a new link.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use shared_crypto::sha256_hex;
use shared_types::{LinkStatus, PublicLink, Result, SigningError};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::notify::{LinkNotification, LinkNotifier};
use crate::store::{DocumentStore, LinkStore};

const TOKEN_BYTES: usize = 32;

/// Parameters for a new link
#[derive(Debug, Clone, PartialEq)]
pub struct MintRequest {
    pub document_id: String,
    pub recipient_email: Option<String>,
    /// Zero or negative means the link never expires
    pub ttl_minutes: Option<i64>,
    pub one_time: bool,
    pub created_by: Option<String>,
    pub allow_visual_sign: bool,
    pub allow_download_after_sign: bool,
    pub metadata: Option<String>,
}

impl MintRequest {
    pub fn new(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            recipient_email: None,
            ttl_minutes: None,
            one_time: true,
            created_by: None,
            allow_visual_sign: true,
            allow_download_after_sign: true,
            metadata: None,
        }
    }

    pub fn recipient(mut self, email: &str) -> Self {
        self.recipient_email = Some(email.to_string());
        self
    }

    pub fn ttl_minutes(mut self, minutes: i64) -> Self {
        self.ttl_minutes = Some(minutes);
        self
    }

    pub fn multi_use(mut self) -> Self {
        self.one_time = false;
        self
    }

    pub fn created_by(mut self, user_id: &str) -> Self {
        self.created_by = Some(user_id.to_string());
        self
    }

    pub fn metadata(mut self, json: &str) -> Self {
        self.metadata = Some(json.to_string());
        self
    }
}

/// The only place the plaintext token ever appears
#[derive(Debug, Clone)]
pub struct MintedLink {
    pub token: String,
    pub url: String,
    pub link: PublicLink,
}

pub struct PublicLinkService {
    config: EngineConfig,
    documents: Arc<dyn DocumentStore>,
    links: Arc<dyn LinkStore>,
    notifier: Arc<dyn LinkNotifier>,
}

impl PublicLinkService {
    pub fn new(
        config: EngineConfig,
        documents: Arc<dyn DocumentStore>,
        links: Arc<dyn LinkStore>,
        notifier: Arc<dyn LinkNotifier>,
    ) -> Self {
        Self {
            config,
            documents,
            links,
            notifier,
        }
    }

    pub fn mint(&self, request: MintRequest) -> Result<MintedLink> {
        let document = self
            .documents
            .get(&request.document_id)?
            .ok_or_else(|| SigningError::NotFound(format!("document {}", request.document_id)))?;

        if let Some(metadata) = &request.metadata {
            serde_json::from_str::<serde_json::Value>(metadata)
                .map_err(|e| SigningError::InvalidInput(format!("link metadata is not JSON: {}", e)))?;
        }

        let token = generate_token()?;
        let mut link = PublicLink::new(&document.id, hash_token(&token));
        link.recipient_email = request.recipient_email;
        link.created_by = request.created_by;
        link.one_time = request.one_time;
        link.allow_visual_sign = request.allow_visual_sign;
        link.allow_download_after_sign = request.allow_download_after_sign;
        link.metadata = request.metadata;
        link.expires_at = request
            .ttl_minutes
            .filter(|ttl| *ttl > 0)
            .map(|ttl| link.created_at + Duration::minutes(ttl));

        self.links.insert(link.clone())?;
        let url = self.config.public_url(&token);

        info!(
            link_id = %link.id,
            document_id = %link.document_id,
            token_hash = short_hash(&link.token_hash),
            one_time = link.one_time,
            expires_at = ?link.expires_at,
            "Minted public signing link"
        );

        if let Some(recipient) = &link.recipient_email {
            let notification = LinkNotification::new(recipient, &document.file_name, &url, link.expires_at);
            if let Err(e) = self.notifier.notify(&notification) {
                warn!(link_id = %link.id, error = %e, "Link notification failed");
            }
        }

        Ok(MintedLink { token, url, link })
    }

    /// Look a token up without touching it
    pub fn resolve(&self, token: &str) -> Result<Option<PublicLink>> {
        self.links.find_by_hash(&hash_token(token))
    }

    /// Redeem a token. False when it is unknown, no longer active, or
    /// expired; an expired link is marked `Expired` on the way out.
    pub fn consume(&self, token: &str, request_ip: Option<&str>) -> Result<bool> {
        Ok(self.try_consume(token, request_ip)?.is_some())
    }

    /// `consume` that returns the updated link or a `StateConflict`
    pub fn redeem(&self, token: &str, request_ip: Option<&str>) -> Result<PublicLink> {
        self.try_consume(token, request_ip)?
            .ok_or_else(|| SigningError::StateConflict("signing link is invalid or expired".to_string()))
    }

    /// Idempotent; unknown ids are ignored
    pub fn revoke(&self, link_id: &str) -> Result<()> {
        if self.links.set_status(link_id, LinkStatus::Revoked)? {
            info!(link_id, "Revoked public signing link");
        } else {
            debug!(link_id, "Revoke for unknown link ignored");
        }
        Ok(())
    }

    pub fn get(&self, link_id: &str) -> Result<PublicLink> {
        self.links
            .get(link_id)?
            .ok_or_else(|| SigningError::NotFound(format!("public link {}", link_id)))
    }

    fn try_consume(&self, token: &str, request_ip: Option<&str>) -> Result<Option<PublicLink>> {
        let Some(link) = self.resolve(token)? else {
            debug!("Consume with unknown token");
            return Ok(None);
        };
        if !link.is_active() {
            debug!(link_id = %link.id, status = %link.status, "Consume on inactive link");
            return Ok(None);
        }

        let now = Utc::now();
        if link.is_expired_at(now) {
            let marked = self
                .links
                .update_if(&link.id, LinkStatus::Active, &mut |l| l.status = LinkStatus::Expired)?;
            if marked {
                info!(link_id = %link.id, "Public signing link expired");
            }
            return Ok(None);
        }

        let mut updated = None;
        let won = self.links.update_if(&link.id, LinkStatus::Active, &mut |l| {
            l.access_count += 1;
            l.last_accessed_at = Some(now);
            l.used_by_ip = request_ip.map(str::to_string);
            if l.one_time {
                l.status = LinkStatus::Used;
                l.used_at = Some(now);
            }
            updated = Some(l.clone());
        })?;

        if won {
            info!(
                link_id = %link.id,
                token_hash = short_hash(&link.token_hash),
                one_time = link.one_time,
                "Consumed public signing link"
            );
        } else {
            debug!(link_id = %link.id, "Lost consume race");
        }
        Ok(updated)
    }
}

/// Hex SHA-256 of the token text
pub fn hash_token(token: &str) -> String {
    sha256_hex(token.as_bytes())
}

fn generate_token() -> Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| SigningError::CryptoConfig(format!("system random number generator failed: {}", e)))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingNotifier;
    use crate::store::{InMemoryDocuments, InMemoryLinks};
    use shared_types::DocumentRecord;
    use std::thread;

    struct Fixture {
        service: Arc<PublicLinkService>,
        links: Arc<InMemoryLinks>,
        notifier: Arc<RecordingNotifier>,
        document_id: String,
    }

    fn fixture_with(notifier: Arc<dyn LinkNotifier>, recording: Arc<RecordingNotifier>) -> Fixture {
        let documents = Arc::new(InMemoryDocuments::new());
        let document = DocumentRecord::new("owner", "lease.pdf", "/tmp/lease.pdf");
        let document_id = document.id.clone();
        documents.save(document).unwrap();
        let links = Arc::new(InMemoryLinks::new());
        let config = EngineConfig::default().with_public_base_url("https://sign.example.com/p");
        Fixture {
            service: Arc::new(PublicLinkService::new(config, documents, links.clone(), notifier)),
            links,
            notifier: recording,
            document_id,
        }
    }

    fn fixture() -> Fixture {
        let recording = Arc::new(RecordingNotifier::new());
        fixture_with(recording.clone(), recording)
    }

    fn backdate(f: &Fixture, link_id: &str) {
        let past = Utc::now() - Duration::minutes(5);
        f.links
            .update_if(link_id, LinkStatus::Active, &mut |l| l.expires_at = Some(past))
            .unwrap();
    }

    #[test]
    fn test_token_round_trip() {
        let f = fixture();
        let minted = f.service.mint(MintRequest::new(&f.document_id)).unwrap();

        assert_eq!(minted.token.len(), 43);
        assert!(!minted.token.contains('='));
        assert_eq!(minted.url, format!("https://sign.example.com/p/{}", minted.token));

        let found = f.service.resolve(&minted.token).unwrap().unwrap();
        assert_eq!(found.id, minted.link.id);
        assert_ne!(found.token_hash, minted.token);
        assert!(f.service.resolve("wrong-token").unwrap().is_none());
    }

    #[test]
    fn test_unknown_document() {
        let f = fixture();
        assert!(matches!(
            f.service.mint(MintRequest::new("missing")),
            Err(SigningError::NotFound(_))
        ));
    }

    #[test]
    fn test_one_time_link_consumed_once() {
        let f = fixture();
        let minted = f.service.mint(MintRequest::new(&f.document_id)).unwrap();

        assert!(f.service.consume(&minted.token, Some("203.0.113.9")).unwrap());
        assert!(!f.service.consume(&minted.token, None).unwrap());

        let link = f.service.get(&minted.link.id).unwrap();
        assert_eq!(link.status, LinkStatus::Used);
        assert_eq!(link.access_count, 1);
        assert_eq!(link.used_by_ip.as_deref(), Some("203.0.113.9"));
        assert!(link.used_at.is_some());
    }

    #[test]
    fn test_multi_use_link_counts_access() {
        let f = fixture();
        let minted = f.service.mint(MintRequest::new(&f.document_id).multi_use()).unwrap();
        for _ in 0..3 {
            assert!(f.service.consume(&minted.token, None).unwrap());
        }
        let link = f.service.get(&minted.link.id).unwrap();
        assert_eq!(link.status, LinkStatus::Active);
        assert_eq!(link.access_count, 3);
        assert!(link.used_at.is_none());
    }

    #[test]
    fn test_expired_link_marked_once() {
        let f = fixture();
        let minted = f.service.mint(MintRequest::new(&f.document_id).ttl_minutes(60)).unwrap();
        assert!(minted.link.expires_at.is_some());
        backdate(&f, &minted.link.id);

        for _ in 0..2 {
            assert!(!f.service.consume(&minted.token, None).unwrap());
            let link = f.service.get(&minted.link.id).unwrap();
            assert_eq!(link.status, LinkStatus::Expired);
            assert_eq!(link.access_count, 0);
        }
    }

    #[test]
    fn test_non_positive_ttl_never_expires() {
        let f = fixture();
        let minted = f.service.mint(MintRequest::new(&f.document_id).ttl_minutes(0)).unwrap();
        assert!(minted.link.expires_at.is_none());
        let minted = f.service.mint(MintRequest::new(&f.document_id).ttl_minutes(-5)).unwrap();
        assert!(minted.link.expires_at.is_none());
    }

    #[test]
    fn test_revoke_is_idempotent() {
        let f = fixture();
        let minted = f.service.mint(MintRequest::new(&f.document_id)).unwrap();
        f.service.revoke(&minted.link.id).unwrap();
        f.service.revoke(&minted.link.id).unwrap();
        f.service.revoke("no-such-link").unwrap();

        assert_eq!(f.service.get(&minted.link.id).unwrap().status, LinkStatus::Revoked);
        assert!(!f.service.consume(&minted.token, None).unwrap());
        assert!(matches!(
            f.service.redeem(&minted.token, None),
            Err(SigningError::StateConflict(_))
        ));
    }

    #[test]
    fn test_revoke_after_use() {
        let f = fixture();
        let minted = f.service.mint(MintRequest::new(&f.document_id)).unwrap();
        assert!(f.service.consume(&minted.token, None).unwrap());
        f.service.revoke(&minted.link.id).unwrap();
        assert_eq!(f.service.get(&minted.link.id).unwrap().status, LinkStatus::Revoked);
    }

    #[test]
    fn test_recipient_notified() {
        let f = fixture();
        let minted = f
            .service
            .mint(MintRequest::new(&f.document_id).recipient("jo@example.com").created_by("owner"))
            .unwrap();

        let sent = f.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "jo@example.com");
        assert_eq!(sent[0].subject, "Please sign document: lease.pdf");
        assert!(sent[0].body.contains(&minted.url));
        assert_eq!(minted.link.created_by.as_deref(), Some("owner"));
    }

    #[test]
    fn test_no_recipient_no_notification() {
        let f = fixture();
        f.service.mint(MintRequest::new(&f.document_id)).unwrap();
        assert!(f.notifier.sent().is_empty());
    }

    struct FailingNotifier;

    impl LinkNotifier for FailingNotifier {
        fn notify(&self, _notification: &LinkNotification) -> std::result::Result<(), String> {
            Err("smtp unavailable".to_string())
        }
    }

    #[test]
    fn test_notifier_failure_does_not_fail_mint() {
        let f = fixture_with(Arc::new(FailingNotifier), Arc::new(RecordingNotifier::new()));
        let minted = f
            .service
            .mint(MintRequest::new(&f.document_id).recipient("jo@example.com"))
            .unwrap();
        assert!(f.service.resolve(&minted.token).unwrap().is_some());
    }

    #[test]
    fn test_concurrent_consume_single_winner() {
        let f = fixture();
        let minted = f.service.mint(MintRequest::new(&f.document_id)).unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let service = Arc::clone(&f.service);
                let token = minted.token.clone();
                thread::spawn(move || service.consume(&token, None).unwrap())
            })
            .collect();
        let results: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|ok| **ok).count(), 1);
        let link = f.service.get(&minted.link.id).unwrap();
        assert_eq!(link.status, LinkStatus::Used);
        assert_eq!(link.access_count, 1);
    }

    #[test]
    fn test_metadata_must_be_json() {
        let f = fixture();
        let minted = f
            .service
            .mint(MintRequest::new(&f.document_id).metadata(r#"{"unit":"4B"}"#))
            .unwrap();
        assert_eq!(minted.link.metadata.as_deref(), Some(r#"{"unit":"4B"}"#));
        assert!(matches!(
            f.service.mint(MintRequest::new(&f.document_id).metadata("{unit")),
            Err(SigningError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_tokens_are_unique() {
        let f = fixture();
        let a = f.service.mint(MintRequest::new(&f.document_id)).unwrap();
        let b = f.service.mint(MintRequest::new(&f.document_id)).unwrap();
        assert_ne!(a.token, b.token);
        assert_ne!(a.link.token_hash, b.link.token_hash);
    }
}
