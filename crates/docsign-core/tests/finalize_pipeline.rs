//! End-to-end finalize tests against real key material

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use docsign_core::{
    DocumentRecord, DocumentStore, EngineConfig, FinalizeRequest, InMemoryDocuments, InMemoryLinks,
    InMemoryPlacements, LinkStatus, MintRequest, NewPlacement, NoopNotifier, PlacementOverride,
    PlacementStore, PublicFinalizeRequest, SignatureStatus, SignatureType, SigningEngine, SigningError,
};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use shared_crypto::KeyFormat;
use shared_pdf::verify_pdf;
use tempfile::TempDir;

fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../shared-crypto/tests/fixtures")
}

fn write_sample_pdf(path: &Path, pages: usize) {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids = Vec::new();
    for i in 0..pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(format!("Lease page {}", i + 1))]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        });
        kids.push(Object::Reference(page_id));
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

fn signature_image() -> String {
    let (w, h) = (8u32, 4u32);
    let mut pixels = Vec::new();
    for i in 0..(w * h) {
        pixels.extend_from_slice(&[10, 20, 120, if i % 3 == 0 { 0 } else { 255 }]);
    }
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, w, h);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&pixels).unwrap();
    }
    format!("data:image/png;base64,{}", BASE64.encode(out))
}

struct Harness {
    _dir: TempDir,
    root: PathBuf,
    engine: SigningEngine,
    document_id: String,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(|c| c)
    }

    fn with_config(adjust: impl FnOnce(EngineConfig) -> EngineConfig) -> Self {
        Self::build(adjust, SigningEngine::in_memory)
    }

    fn with_stores(documents: Arc<dyn DocumentStore>, placements: Arc<dyn PlacementStore>) -> Self {
        Self::build(
            |c| c,
            |config| {
                SigningEngine::new(
                    config,
                    documents,
                    placements,
                    Arc::new(InMemoryLinks::new()),
                    Arc::new(NoopNotifier),
                )
            },
        )
    }

    fn build(
        adjust: impl FnOnce(EngineConfig) -> EngineConfig,
        engine: impl FnOnce(EngineConfig) -> SigningEngine,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let source = root.join("lease.pdf");
        write_sample_pdf(&source, 2);

        let config = EngineConfig::default()
            .with_keystore(fixtures_dir(), "signer")
            .with_password("changeit")
            .with_output_dir(root.join("out"))
            .with_storage_dir(root.join("uploads"));
        let engine = engine(adjust(config));

        let document = DocumentRecord::new("owner", "lease.pdf", &source.to_string_lossy());
        let document_id = document.id.clone();
        engine.documents.save(document).unwrap();

        Self {
            _dir: dir,
            root,
            engine,
            document_id,
        }
    }

    fn assign(&self, signer: &str, x: f64, y: f64) -> String {
        self.engine
            .placements
            .create("owner", NewPlacement::new(&self.document_id, signer, x, y, 1))
            .unwrap()
            .id
    }

    fn files_in(&self, sub: &str) -> usize {
        fs::read_dir(self.root.join(sub))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    fn document(&self) -> DocumentRecord {
        self.engine.documents.get(&self.document_id).unwrap().unwrap()
    }
}

/// Cancels one placement the next time a document is read, standing in
/// for an owner whose cancel lands while a finalize is in flight
struct CancelOnNextRead {
    documents: InMemoryDocuments,
    placements: Arc<InMemoryPlacements>,
    armed: Mutex<Option<String>>,
}

impl CancelOnNextRead {
    fn arm(&self, placement_id: &str) {
        *self.armed.lock().unwrap() = Some(placement_id.to_string());
    }
}

impl DocumentStore for CancelOnNextRead {
    fn get(&self, id: &str) -> docsign_core::Result<Option<DocumentRecord>> {
        if let Some(placement_id) = self.armed.lock().unwrap().take() {
            let cancelled = self
                .placements
                .update_if(&placement_id, SignatureStatus::Pending, &mut |p| {
                    p.status = SignatureStatus::Cancelled
                })
                .unwrap();
            assert!(cancelled);
        }
        self.documents.get(id)
    }

    fn save(&self, document: DocumentRecord) -> docsign_core::Result<()> {
        self.documents.save(document)
    }
}

#[tokio::test]
async fn finalize_stamps_signs_and_records() {
    let h = Harness::new();
    let placement_id = h.assign("alice", 25.5, 75.3);

    let outcome = h
        .engine
        .finalizer
        .finalize(
            FinalizeRequest::new(&h.document_id, &placement_id, "alice")
                .with_image(&signature_image())
                .with_reason("Lease agreement"),
        )
        .await
        .unwrap();

    assert_eq!(outcome.signed_path.file_name().unwrap(), "signed_lease.pdf");
    assert_eq!(outcome.stamped_path.file_name().unwrap(), "stamped_lease.pdf");
    assert!(outcome.stamped_path.exists());

    let signed = fs::read(&outcome.signed_path).unwrap();
    let verified = verify_pdf(&signed).unwrap();
    assert!(verified.covers_whole_document);
    assert_eq!(verified.signer.signer_common_name.as_deref(), Some("DocSign Test Signer"));

    // The signed file is the stamped file plus one appended revision
    let stamped = fs::read(&outcome.stamped_path).unwrap();
    assert_eq!(&signed[..stamped.len()], stamped.as_slice());

    assert_eq!(outcome.placement.status, SignatureStatus::Signed);
    assert_eq!(outcome.placement.reason.as_deref(), Some("Lease agreement"));
    let image_ref = outcome.placement.image_ref.clone().unwrap();
    assert!(Path::new(&image_ref).exists());

    let document = h.document();
    assert!(document.is_signed);
    assert_eq!(
        document.signed_path,
        Some(outcome.signed_path.to_string_lossy().to_string())
    );
}

#[tokio::test]
async fn wrong_password_writes_nothing() {
    let h = Harness::with_config(|c| c.with_password("not-the-password"));
    let placement_id = h.assign("alice", 10.0, 10.0);

    let err = h
        .engine
        .finalizer
        .finalize(FinalizeRequest::new(&h.document_id, &placement_id, "alice").with_image(&signature_image()))
        .await
        .unwrap_err();

    assert!(matches!(err, SigningError::CryptoConfig(_)), "{err:?}");
    assert_eq!(h.files_in("out"), 0);
    assert_eq!(h.files_in("uploads"), 0);
    assert!(h.engine.placements.get(&placement_id).unwrap().is_pending());
    assert!(!h.document().is_signed);
}

#[tokio::test]
async fn mismatched_certificate_is_a_config_error() {
    let h = Harness::with_config(|c| EngineConfig {
        keystore_password: None,
        ..c.with_keystore(fixtures_dir(), "mismatched")
    });
    let placement_id = h.assign("alice", 10.0, 10.0);

    let err = h
        .engine
        .finalizer
        .finalize(FinalizeRequest::new(&h.document_id, &placement_id, "alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, SigningError::CryptoConfig(_)));
    assert_eq!(h.files_in("out"), 0);
}

#[tokio::test]
async fn der_keystore_signs() {
    let h = Harness::with_config(|c| EngineConfig {
        keystore_password: None,
        ..c.with_keystore(fixtures_dir(), "plain").with_format(KeyFormat::Der)
    });
    let placement_id = h.assign("alice", 10.0, 10.0);

    let outcome = h
        .engine
        .finalizer
        .finalize(FinalizeRequest::new(&h.document_id, &placement_id, "alice"))
        .await
        .unwrap();
    let verified = verify_pdf(&fs::read(outcome.signed_path).unwrap()).unwrap();
    assert_eq!(verified.signer.chain_len, 1);
}

#[tokio::test]
async fn undersized_reservation_fails_cleanly() {
    let h = Harness::with_config(|c| c.with_reserved_size(128));
    let placement_id = h.assign("alice", 10.0, 10.0);

    let err = h
        .engine
        .finalizer
        .finalize(FinalizeRequest::new(&h.document_id, &placement_id, "alice"))
        .await
        .unwrap_err();
    match err {
        SigningError::SigningCapacity { required, reserved } => {
            assert_eq!(reserved, 128);
            assert!(required > reserved);
        }
        other => panic!("expected capacity error, got {other:?}"),
    }
    assert_eq!(h.files_in("out"), 0);
    assert!(h.engine.placements.get(&placement_id).unwrap().is_pending());
}

#[tokio::test]
async fn only_the_signer_can_finalize() {
    let h = Harness::new();
    let placement_id = h.assign("alice", 10.0, 10.0);

    let err = h
        .engine
        .finalizer
        .finalize(FinalizeRequest::new(&h.document_id, &placement_id, "mallory"))
        .await
        .unwrap_err();
    assert!(matches!(err, SigningError::Authorization(_)));
    assert_eq!(h.files_in("out"), 0);
}

#[tokio::test]
async fn second_finalize_is_a_state_conflict() {
    let h = Harness::new();
    let placement_id = h.assign("alice", 10.0, 10.0);
    let request = FinalizeRequest::new(&h.document_id, &placement_id, "alice");

    h.engine.finalizer.finalize(request.clone()).await.unwrap();
    let before = fs::read(h.root.join("out/signed_lease.pdf")).unwrap();

    let err = h.engine.finalizer.finalize(request).await.unwrap_err();
    assert!(matches!(err, SigningError::StateConflict(_)));
    assert_eq!(fs::read(h.root.join("out/signed_lease.pdf")).unwrap(), before);
}

#[tokio::test]
async fn next_signer_appends_to_previous_signed_copy() {
    let h = Harness::new();
    let alice = h.assign("alice", 10.0, 80.0);
    let bob = h.assign("bob", 60.0, 80.0);

    let first = h
        .engine
        .finalizer
        .finalize(FinalizeRequest::new(&h.document_id, &alice, "alice").with_image(&signature_image()))
        .await
        .unwrap();
    let first_bytes = fs::read(&first.signed_path).unwrap();
    assert!(!first.document.is_signed);

    let second = h
        .engine
        .finalizer
        .finalize(FinalizeRequest::new(&h.document_id, &bob, "bob"))
        .await
        .unwrap();
    let second_bytes = fs::read(&second.signed_path).unwrap();

    // No image for bob: his revision is appended to alice's signed bytes
    assert_eq!(&second_bytes[..first_bytes.len()], first_bytes.as_slice());
    assert!(verify_pdf(&second_bytes).unwrap().covers_whole_document);
    assert!(second.document.is_signed);
    assert!(h.engine.placements.are_all_signed(&h.document_id).unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_finalize_on_one_document_is_serialized() {
    let h = Harness::new();
    let alice = h.assign("alice", 10.0, 80.0);
    let bob = h.assign("bob", 60.0, 80.0);

    let (a, b) = tokio::join!(
        h.engine
            .finalizer
            .finalize(FinalizeRequest::new(&h.document_id, &alice, "alice")),
        h.engine
            .finalizer
            .finalize(FinalizeRequest::new(&h.document_id, &bob, "bob")),
    );
    a.unwrap();
    b.unwrap();

    // Both signatures survive only if the second run read the first's output
    let signed = fs::read(h.root.join("out/signed_lease.pdf")).unwrap();
    let doc = Document::load_mem(&signed).unwrap();
    let form_id = doc
        .catalog()
        .unwrap()
        .get(b"AcroForm")
        .unwrap()
        .as_reference()
        .unwrap();
    let fields = doc
        .get_dictionary(form_id)
        .unwrap()
        .get(b"Fields")
        .unwrap()
        .as_array()
        .unwrap()
        .len();
    assert_eq!(fields, 2);
    assert!(h.document().is_signed);
}

#[tokio::test]
async fn sign_with_placement_validates_then_signs() {
    let h = Harness::new();
    let placement_id = h.assign("alice", 50.0, 50.0);

    let bad = PlacementOverride {
        x_pct: 150.0,
        y_pct: 40.0,
        page_number: 1,
        width: None,
        height: None,
        signature_type: None,
        notes: None,
    };
    let err = h
        .engine
        .finalizer
        .sign_with_placement("alice", &placement_id, &signature_image(), bad)
        .await
        .unwrap_err();
    match err {
        SigningError::Validation { recommended_x, .. } => assert_eq!(recommended_x, Some(100.0)),
        other => panic!("expected validation error, got {other:?}"),
    }

    let good = PlacementOverride {
        x_pct: 20.0,
        y_pct: 85.0,
        page_number: 2,
        width: Some(120.0),
        height: Some(40.0),
        signature_type: None,
        notes: Some("initialled by hand".to_string()),
    };
    let outcome = h
        .engine
        .finalizer
        .sign_with_placement("alice", &placement_id, &signature_image(), good)
        .await
        .unwrap();

    let p = outcome.placement;
    assert_eq!((p.x_pct, p.y_pct, p.page_number), (20.0, 85.0, 2));
    assert_eq!((p.width, p.height), (Some(120.0), Some(40.0)));
    assert_eq!(p.signature_type, SignatureType::Image);
    assert_eq!(p.notes.as_deref(), Some("initialled by hand"));
    assert_eq!(p.status, SignatureStatus::Signed);
}

#[tokio::test]
async fn public_link_finalizes_once() {
    let h = Harness::new();
    let placement_id = h.assign("guest@example.com", 30.0, 70.0);
    let minted = h
        .engine
        .links
        .mint(MintRequest::new(&h.document_id).recipient("guest@example.com"))
        .unwrap();

    let request = PublicFinalizeRequest {
        token: minted.token.clone(),
        request_ip: Some("198.51.100.7".to_string()),
        placement_id: placement_id.clone(),
        image: Some(signature_image()),
        ..PublicFinalizeRequest::default()
    };

    let outcome = h.engine.finalizer.finalize_public(request.clone()).await.unwrap();
    assert_eq!(outcome.placement.status, SignatureStatus::Signed);

    let link = h.engine.links.get(&minted.link.id).unwrap();
    assert_eq!(link.status, LinkStatus::Used);
    assert_eq!(link.used_by_ip.as_deref(), Some("198.51.100.7"));

    let err = h.engine.finalizer.finalize_public(request).await.unwrap_err();
    assert!(matches!(err, SigningError::StateConflict(_)));
}

#[tokio::test]
async fn public_link_cannot_reach_other_documents() {
    let h = Harness::new();
    let other = DocumentRecord::new("owner", "other.pdf", "/nonexistent/other.pdf");
    let other_id = other.id.clone();
    h.engine.documents.save(other).unwrap();

    let placement_id = h.assign("alice", 30.0, 70.0);
    let minted = h.engine.links.mint(MintRequest::new(&other_id)).unwrap();

    let err = h
        .engine
        .finalizer
        .finalize_public(PublicFinalizeRequest {
            token: minted.token.clone(),
            placement_id,
            ..PublicFinalizeRequest::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SigningError::Authorization(_)));
    // Rejected before redemption
    assert!(h.engine.links.consume(&minted.token, None).unwrap());
}

#[tokio::test]
async fn cancel_during_finalize_wins_and_restores_artifacts() {
    let placements = Arc::new(InMemoryPlacements::new());
    let documents = Arc::new(CancelOnNextRead {
        documents: InMemoryDocuments::new(),
        placements: placements.clone(),
        armed: Mutex::new(None),
    });
    let h = Harness::with_stores(documents.clone(), placements);
    let alice = h.assign("alice", 10.0, 80.0);
    let bob = h.assign("bob", 60.0, 80.0);

    h.engine
        .finalizer
        .finalize(FinalizeRequest::new(&h.document_id, &bob, "bob"))
        .await
        .unwrap();
    let stamped_before = fs::read(h.root.join("out/stamped_lease.pdf")).unwrap();
    let signed_before = fs::read(h.root.join("out/signed_lease.pdf")).unwrap();
    let document_before = h.document();

    documents.arm(&alice);
    let err = h
        .engine
        .finalizer
        .finalize(FinalizeRequest::new(&h.document_id, &alice, "alice").with_image(&signature_image()))
        .await
        .unwrap_err();
    assert!(matches!(err, SigningError::StateConflict(_)), "{err:?}");

    let placement = h.engine.placements.get(&alice).unwrap();
    assert_eq!(placement.status, SignatureStatus::Cancelled);
    assert!(placement.signed_at.is_none());
    assert!(placement.image_ref.is_none());

    assert_eq!(fs::read(h.root.join("out/stamped_lease.pdf")).unwrap(), stamped_before);
    assert_eq!(fs::read(h.root.join("out/signed_lease.pdf")).unwrap(), signed_before);
    assert!(verify_pdf(&signed_before).unwrap().covers_whole_document);
    assert_eq!(h.files_in("out"), 2);
    assert_eq!(h.files_in("uploads"), 0);

    let document = h.document();
    assert_eq!(document.signed_path, document_before.signed_path);
    assert!(!document.is_signed);
}

#[tokio::test]
async fn failed_artifact_write_keeps_previous_outputs() {
    let h = Harness::new();
    let placement_id = h.assign("alice", 25.5, 75.3);

    let out = h.root.join("out");
    fs::create_dir_all(out.join("signed_lease.pdf")).unwrap();
    fs::write(out.join("stamped_lease.pdf"), b"previous stamped copy").unwrap();

    let err = h
        .engine
        .finalizer
        .finalize(FinalizeRequest::new(&h.document_id, &placement_id, "alice").with_image(&signature_image()))
        .await
        .unwrap_err();
    assert!(matches!(err, SigningError::Io(_)), "{err:?}");

    assert_eq!(fs::read(out.join("stamped_lease.pdf")).unwrap(), b"previous stamped copy");
    assert!(out.join("signed_lease.pdf").is_dir());
    assert_eq!(h.files_in("out"), 2);
    assert_eq!(h.files_in("uploads"), 0);

    let placement = h.engine.placements.get(&placement_id).unwrap();
    assert!(placement.is_pending());
    assert!(placement.image_ref.is_none());
    let document = h.document();
    assert_eq!(document.signed_path, None);
    assert!(!document.is_signed);
}
