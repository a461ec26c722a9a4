//! Persistence seams for documents, placements, and public links
//!
//! Records reference each other by id. The engine only needs lookups,
//! saves, and compare-and-set on placement and link status; the in-memory
//! implementations back tests and the CLI.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use shared_types::{
    DocumentRecord, LinkStatus, PublicLink, Result, SignaturePlacement, SignatureStatus, SigningError,
};

pub trait DocumentStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<DocumentRecord>>;

    fn save(&self, document: DocumentRecord) -> Result<()>;
}

pub trait PlacementStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<SignaturePlacement>>;

    /// Insert or overwrite. Status changes go through `update_if`.
    fn save(&self, placement: SignaturePlacement) -> Result<()>;

    /// Apply `update` only if the placement's status is still `expected`,
    /// as one atomic step. Returns whether the update was applied.
    fn update_if(
        &self,
        id: &str,
        expected: SignatureStatus,
        update: &mut dyn FnMut(&mut SignaturePlacement),
    ) -> Result<bool>;

    /// Remove the placement if its status is still `expected`
    fn delete_if(&self, id: &str, expected: SignatureStatus) -> Result<bool>;

    /// Oldest first
    fn by_document(&self, document_id: &str) -> Result<Vec<SignaturePlacement>>;

    /// Oldest first
    fn by_signer(&self, signer_id: &str) -> Result<Vec<SignaturePlacement>>;
}

pub trait LinkStore: Send + Sync {
    /// Fails with `StateConflict` if the token hash is already taken
    fn insert(&self, link: PublicLink) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<PublicLink>>;

    fn find_by_hash(&self, token_hash: &str) -> Result<Option<PublicLink>>;

    /// Apply `update` only if the link's status is still `expected`, as one
    /// atomic step. Returns whether the update was applied.
    fn update_if(
        &self,
        id: &str,
        expected: LinkStatus,
        update: &mut dyn FnMut(&mut PublicLink),
    ) -> Result<bool>;

    /// Unconditional status write. Returns false when the link is unknown.
    fn set_status(&self, id: &str, status: LinkStatus) -> Result<bool>;
}

/// A poisoned lock still holds consistent records: every mutation below is
/// a single assignment
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct InMemoryDocuments {
    records: Mutex<HashMap<String, DocumentRecord>>,
}

impl InMemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for InMemoryDocuments {
    fn get(&self, id: &str) -> Result<Option<DocumentRecord>> {
        Ok(lock(&self.records).get(id).cloned())
    }

    fn save(&self, document: DocumentRecord) -> Result<()> {
        lock(&self.records).insert(document.id.clone(), document);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPlacements {
    records: Mutex<HashMap<String, SignaturePlacement>>,
}

impl InMemoryPlacements {
    pub fn new() -> Self {
        Self::default()
    }

    fn filtered<F>(&self, keep: F) -> Vec<SignaturePlacement>
    where
        F: Fn(&SignaturePlacement) -> bool,
    {
        let mut found: Vec<_> = lock(&self.records)
            .values()
            .filter(|p| keep(p))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        found
    }
}

impl PlacementStore for InMemoryPlacements {
    fn get(&self, id: &str) -> Result<Option<SignaturePlacement>> {
        Ok(lock(&self.records).get(id).cloned())
    }

    fn save(&self, placement: SignaturePlacement) -> Result<()> {
        lock(&self.records).insert(placement.id.clone(), placement);
        Ok(())
    }

    fn update_if(
        &self,
        id: &str,
        expected: SignatureStatus,
        update: &mut dyn FnMut(&mut SignaturePlacement),
    ) -> Result<bool> {
        let mut records = lock(&self.records);
        match records.get_mut(id) {
            Some(placement) if placement.status == expected => {
                update(placement);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete_if(&self, id: &str, expected: SignatureStatus) -> Result<bool> {
        let mut records = lock(&self.records);
        match records.get(id) {
            Some(placement) if placement.status == expected => Ok(records.remove(id).is_some()),
            _ => Ok(false),
        }
    }

    fn by_document(&self, document_id: &str) -> Result<Vec<SignaturePlacement>> {
        Ok(self.filtered(|p| p.document_id == document_id))
    }

    fn by_signer(&self, signer_id: &str) -> Result<Vec<SignaturePlacement>> {
        Ok(self.filtered(|p| p.signer_id == signer_id))
    }
}

#[derive(Default)]
pub struct InMemoryLinks {
    records: Mutex<HashMap<String, PublicLink>>,
}

impl InMemoryLinks {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LinkStore for InMemoryLinks {
    fn insert(&self, link: PublicLink) -> Result<()> {
        let mut records = lock(&self.records);
        if records.values().any(|l| l.token_hash == link.token_hash) {
            return Err(SigningError::StateConflict("token hash already registered".to_string()));
        }
        records.insert(link.id.clone(), link);
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<PublicLink>> {
        Ok(lock(&self.records).get(id).cloned())
    }

    fn find_by_hash(&self, token_hash: &str) -> Result<Option<PublicLink>> {
        Ok(lock(&self.records)
            .values()
            .find(|l| l.token_hash == token_hash)
            .cloned())
    }

    fn update_if(
        &self,
        id: &str,
        expected: LinkStatus,
        update: &mut dyn FnMut(&mut PublicLink),
    ) -> Result<bool> {
        let mut records = lock(&self.records);
        match records.get_mut(id) {
            Some(link) if link.status == expected => {
                update(link);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn set_status(&self, id: &str, status: LinkStatus) -> Result<bool> {
        match lock(&self.records).get_mut(id) {
            Some(link) => {
                link.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
