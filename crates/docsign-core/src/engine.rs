//! Wiring of the engine services over one set of stores

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::finalize::FinalizeEngine;
use crate::links::PublicLinkService;
use crate::notify::{LinkNotifier, NoopNotifier};
use crate::placement::PlacementService;
use crate::store::{
    DocumentStore, InMemoryDocuments, InMemoryLinks, InMemoryPlacements, LinkStore, PlacementStore,
};

pub struct SigningEngine {
    pub config: EngineConfig,
    pub documents: Arc<dyn DocumentStore>,
    pub placements: Arc<PlacementService>,
    pub links: Arc<PublicLinkService>,
    pub finalizer: FinalizeEngine,
}

impl SigningEngine {
    pub fn new(
        config: EngineConfig,
        documents: Arc<dyn DocumentStore>,
        placement_store: Arc<dyn PlacementStore>,
        link_store: Arc<dyn LinkStore>,
        notifier: Arc<dyn LinkNotifier>,
    ) -> Self {
        let placements = Arc::new(PlacementService::new(documents.clone(), placement_store));
        let links = Arc::new(PublicLinkService::new(
            config.clone(),
            documents.clone(),
            link_store,
            notifier,
        ));
        let finalizer = FinalizeEngine::new(config.clone(), placements.clone(), links.clone());
        Self {
            config,
            documents,
            placements,
            links,
            finalizer,
        }
    }

    /// Everything kept in process memory, no notifications
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::with_notifier(config, Arc::new(NoopNotifier))
    }

    pub fn with_notifier(config: EngineConfig, notifier: Arc<dyn LinkNotifier>) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryDocuments::new()),
            Arc::new(InMemoryPlacements::new()),
            Arc::new(InMemoryLinks::new()),
            notifier,
        )
    }
}
