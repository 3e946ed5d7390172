//! Object URLs for pass-through documents.
//!
//! Bytes that are shown as-is (PDF, PNG, JPEG) are not converted; they are
//! registered here and referred to by an opaque `blob:docview/<n>` locator
//! until revoked.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

/// Prefix of every locator handed out by [`ObjectUrlRegistry`].
pub const OBJECT_URL_PREFIX: &str = "blob:docview/";

/// Bytes behind an object URL.
#[derive(Debug)]
pub struct ObjectBlob {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub name: String,
}

#[derive(Debug, Default)]
struct Entries {
    next_id: u64,
    blobs: HashMap<u64, Arc<ObjectBlob>>,
}

/// Shared registry of live object URLs. Cloning shares the registry.
#[derive(Debug, Clone, Default)]
pub struct ObjectUrlRegistry {
    inner: Arc<Mutex<Entries>>,
}

impl ObjectUrlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `bytes` and return a fresh locator for them.
    pub fn create(
        &self,
        bytes: Vec<u8>,
        mime_type: impl Into<String>,
        name: impl Into<String>,
    ) -> String {
        let mut entries = self.lock();
        entries.next_id += 1;
        let id = entries.next_id;
        let blob = ObjectBlob {
            bytes,
            mime_type: mime_type.into(),
            name: name.into(),
        };
        debug!(id, name = %blob.name, size = blob.bytes.len(), "object url created");
        entries.blobs.insert(id, Arc::new(blob));
        format!("{OBJECT_URL_PREFIX}{id}")
    }

    /// Look up a live locator.
    pub fn resolve(&self, uri: &str) -> Option<Arc<ObjectBlob>> {
        let id = parse_id(uri)?;
        self.lock().blobs.get(&id).cloned()
    }

    /// Release a locator. Returns false if it was unknown or already revoked.
    pub fn revoke(&self, uri: &str) -> bool {
        let Some(id) = parse_id(uri) else {
            return false;
        };
        let removed = self.lock().blobs.remove(&id).is_some();
        if removed {
            debug!(id, "object url revoked");
        }
        removed
    }

    /// Number of live locators.
    pub fn len(&self) -> usize {
        self.lock().blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The numeric id of a `blob:docview/<n>` locator, or of a bare `<n>`.
pub fn parse_id(uri: &str) -> Option<u64> {
    uri.strip_prefix(OBJECT_URL_PREFIX)
        .unwrap_or(uri)
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_resolve() {
        let registry = ObjectUrlRegistry::new();
        let uri = registry.create(vec![1, 2, 3], "image/png", "photo.png");
        assert!(uri.starts_with(OBJECT_URL_PREFIX));

        let blob = registry.resolve(&uri).unwrap();
        assert_eq!(blob.bytes, [1, 2, 3]);
        assert_eq!(blob.mime_type, "image/png");
        assert_eq!(blob.name, "photo.png");
    }

    #[test]
    fn test_locators_are_unique() {
        let registry = ObjectUrlRegistry::new();
        let a = registry.create(vec![], "application/pdf", "a.pdf");
        let b = registry.create(vec![], "application/pdf", "a.pdf");
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_revoke() {
        let registry = ObjectUrlRegistry::new();
        let uri = registry.create(vec![0], "application/pdf", "doc.pdf");
        assert!(registry.revoke(&uri));
        assert!(registry.resolve(&uri).is_none());
        assert!(!registry.revoke(&uri), "second revoke is a no-op");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clones_share_entries() {
        let registry = ObjectUrlRegistry::new();
        let other = registry.clone();
        let uri = registry.create(vec![9], "image/jpeg", "x.jpg");
        assert!(other.resolve(&uri).is_some());
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("blob:docview/42"), Some(42));
        assert_eq!(parse_id("42"), Some(42));
        assert_eq!(parse_id("blob:other/42"), None);
        assert_eq!(parse_id("blob:docview/abc"), None);
    }
}
