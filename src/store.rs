//! Persistence boundary. The core never talks to storage on its own: the session hands a
//! finished document to a [`DocumentStore`] and receives raw stored JSON back for sanitizing.

use crate::schema::{FinancialDocument, Revision};
use futures::future::{BoxFuture, FutureExt};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Revision conflict: changes are based on {base:?} but the stored document is at {current:?}")]
    Conflict {
        base: Option<Revision>,
        current: Option<Revision>,
    },

    #[error("Storage failure: {0}")]
    Failure(String),
}

impl StoreError {
    /// A conflict needs the caller to reload or force; plain failures can simply be retried.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Failure(_))
    }
}

/// A stored document exactly as persisted, before sanitizing.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub revision: Revision,
    pub body: serde_json::Value,
}

pub trait DocumentStore: Send + Sync {
    fn load<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Option<StoredDocument>, StoreError>>;

    /// Compare-and-swap save: succeeds only while the stored revision still equals `base`
    /// (`None` meaning nothing has been stored yet).
    fn save<'a>(
        &'a self,
        user_id: &'a str,
        document: &'a FinancialDocument,
        base: Option<&'a Revision>,
    ) -> BoxFuture<'a, Result<Revision, StoreError>>;
}

/// Process-local store used by tests and offline sessions.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    documents: Mutex<HashMap<String, StoredDocument>>,
    counter: AtomicU64,
    offline: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores arbitrary JSON for `user_id`, bypassing all checks.
    pub fn insert_raw(&self, user_id: &str, body: serde_json::Value) -> Result<Revision, StoreError> {
        let revision = self.next_revision();
        self.lock()?.insert(
            user_id.to_string(),
            StoredDocument {
                revision: revision.clone(),
                body,
            },
        );
        Ok(revision)
    }

    /// While offline every call fails with a retryable error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn next_revision(&self) -> Revision {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Revision(format!("rev-{}", n))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredDocument>>, StoreError> {
        self.documents
            .lock()
            .map_err(|_| StoreError::Failure("store lock poisoned".to_string()))
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Failure("store is offline".to_string()));
        }
        Ok(())
    }

    fn load_now(&self, user_id: &str) -> Result<Option<StoredDocument>, StoreError> {
        self.check_online()?;
        Ok(self.lock()?.get(user_id).cloned())
    }

    fn save_now(
        &self,
        user_id: &str,
        document: &FinancialDocument,
        base: Option<&Revision>,
    ) -> Result<Revision, StoreError> {
        self.check_online()?;
        let mut documents = self.lock()?;
        let current = documents.get(user_id).map(|d| d.revision.clone());
        if current.as_ref() != base {
            warn!(
                "Rejecting save for {}: base {:?}, stored {:?}",
                user_id, base, current
            );
            return Err(StoreError::Conflict {
                base: base.cloned(),
                current,
            });
        }

        let mut stored = document.clone();
        stored.revision = None;
        let body = serde_json::to_value(&stored).map_err(|e| StoreError::Failure(e.to_string()))?;
        let revision = self.next_revision();
        documents.insert(
            user_id.to_string(),
            StoredDocument {
                revision: revision.clone(),
                body,
            },
        );
        debug!("Saved document for {} at {}", user_id, revision);
        Ok(revision)
    }
}

impl DocumentStore for InMemoryStore {
    fn load<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Option<StoredDocument>, StoreError>> {
        futures::future::ready(self.load_now(user_id)).boxed()
    }

    fn save<'a>(
        &'a self,
        user_id: &'a str,
        document: &'a FinancialDocument,
        base: Option<&'a Revision>,
    ) -> BoxFuture<'a, Result<Revision, StoreError>> {
        futures::future::ready(self.save_now(user_id, document, base)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn test_save_then_load() {
        let store = InMemoryStore::new();
        let doc = FinancialDocument::new(12, ["a"]);
        let revision = block_on(store.save("u1", &doc, None)).unwrap();

        let stored = block_on(store.load("u1")).unwrap().unwrap();
        assert_eq!(stored.revision, revision);
        assert_eq!(stored.body["horizon"], 12);
        assert!(block_on(store.load("nobody")).unwrap().is_none());
    }

    #[test]
    fn test_stale_revision_conflicts() {
        let store = InMemoryStore::new();
        let doc = FinancialDocument::default();
        let first = block_on(store.save("u1", &doc, None)).unwrap();
        let second = block_on(store.save("u1", &doc, Some(&first))).unwrap();

        let err = block_on(store.save("u1", &doc, Some(&first))).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(
            err,
            StoreError::Conflict {
                base: Some(first),
                current: Some(second),
            }
        );
        assert!(block_on(store.save("u1", &doc, None)).unwrap_err().is_conflict());
    }

    #[test]
    fn test_offline_failure_is_retryable() {
        let store = InMemoryStore::new();
        store.set_offline(true);
        let err = block_on(store.load("u1")).unwrap_err();
        assert!(err.is_retryable());
        assert!(!err.is_conflict());
        store.set_offline(false);
        assert!(block_on(store.load("u1")).is_ok());
    }
}
