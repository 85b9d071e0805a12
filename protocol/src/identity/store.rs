//! The credential-store seam.
//!
//! Persistent identity bookkeeping (enrollment, wallet storage, password
//! checks) belongs to the application. The gateway asks one question of it:
//! "give me the identity behind this reference".

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use super::Identity;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("no identity registered for {0:?}")]
    NotFound(String),

    #[error("identity {0:?} is already registered")]
    AlreadyRegistered(String),

    #[error("credential store unavailable: {0}")]
    Backend(String),
}

/// Resolves an identity reference (usually an owner id) to credentials.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn resolve(&self, identity_ref: &str) -> Result<Identity, IdentityError>;
}

/// Map-backed store for tests and the devnet node.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    identities: DashMap<String, Identity>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an identity under its owner id. Identities are immutable once
    /// registered, so a second registration for the same owner is refused.
    pub fn register(&self, identity: Identity) -> Result<(), IdentityError> {
        use dashmap::mapref::entry::Entry;

        let key = identity.owner_id().as_str().to_string();
        match self.identities.entry(key) {
            Entry::Occupied(e) => Err(IdentityError::AlreadyRegistered(e.key().clone())),
            Entry::Vacant(e) => {
                e.insert(identity);
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn resolve(&self, identity_ref: &str) -> Result<Identity, IdentityError> {
        self.identities
            .get(identity_ref)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| IdentityError::NotFound(identity_ref.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;

    fn identity(owner: &str) -> Identity {
        Identity::new(owner, "RegistrarMSP", b"c".to_vec(), b"k".to_vec(), Role::Student)
    }

    #[tokio::test]
    async fn resolves_registered_identity() {
        let store = InMemoryIdentityStore::new();
        store.register(identity("S1")).unwrap();

        let found = store.resolve("S1").await.unwrap();
        assert_eq!(found.owner_id().as_str(), "S1");
        assert_eq!(found.role(), &Role::Student);
    }

    #[tokio::test]
    async fn unknown_reference_is_not_found() {
        let store = InMemoryIdentityStore::new();
        assert_eq!(
            store.resolve("ghost").await.unwrap_err(),
            IdentityError::NotFound("ghost".into())
        );
    }

    #[test]
    fn duplicate_registration_refused() {
        let store = InMemoryIdentityStore::new();
        store.register(identity("S1")).unwrap();
        assert!(matches!(
            store.register(identity("S1")),
            Err(IdentityError::AlreadyRegistered(_))
        ));
        assert_eq!(store.len(), 1);
    }
}
