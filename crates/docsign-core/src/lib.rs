//! Document signing engine
//!
//! Placement lifecycle, public signing links, signature image storage,
//! and the finalize pipeline that stamps and signs PDFs.

pub mod config;
pub mod engine;
pub mod finalize;
pub mod links;
pub mod notify;
pub mod placement;
pub mod storage;
pub mod store;

pub use config::EngineConfig;
pub use engine::SigningEngine;
pub use finalize::{FinalizeEngine, FinalizeOutcome, FinalizeRequest, PlacementOverride, PublicFinalizeRequest};
pub use links::{hash_token, MintRequest, MintedLink, PublicLinkService};
pub use notify::{LinkNotification, LinkNotifier, NoopNotifier, RecordingNotifier};
pub use placement::{PlacementService, SignRequest};
pub use storage::{is_valid_format, SignatureImageStore};
pub use store::{DocumentStore, InMemoryDocuments, InMemoryLinks, InMemoryPlacements, LinkStore, PlacementStore};

pub use shared_types::{
    DocumentRecord, DocumentStatus, LinkStatus, NewPlacement, PlacementStats, PublicLink, Result,
    SignaturePlacement, SignatureStatus, SignatureType, SigningError,
};
