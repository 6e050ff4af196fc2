//! Credential store for encrypted layers.
//!
//! Credentials are keyed by the container key of the layer they unlock, so a
//! credential added for `bde` on top of a partition applies to every lookup
//! inside that volume. Drivers only read; callers add and remove.

use std::collections::HashMap;

use dashmap::DashMap;
use tracing::debug;

use layerfs_types::{Credential, CredentialKind, PathSpec};

/// Process-wide credential store. Read-mostly and safe to share.
#[derive(Debug, Default)]
pub struct CredentialStore {
    entries: DashMap<PathSpec, HashMap<CredentialKind, Credential>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the credential of `kind` for the layer, replacing any previous
    /// value of the same kind.
    pub fn add_credential(&self, path_spec: &PathSpec, kind: CredentialKind, value: impl Into<String>) {
        let key = path_spec.container_key();
        debug!(path_spec = %key, kind = %kind, "credential added");
        self.entries
            .entry(key)
            .or_default()
            .insert(kind, Credential::new(kind, value));
    }

    pub fn get_credential(&self, path_spec: &PathSpec, kind: CredentialKind) -> Option<Credential> {
        self.entries
            .get(&path_spec.container_key())
            .and_then(|kinds| kinds.get(&kind).cloned())
    }

    /// Every credential for the layer, in no particular order.
    pub fn credentials(&self, path_spec: &PathSpec) -> Vec<Credential> {
        self.entries
            .get(&path_spec.container_key())
            .map(|kinds| kinds.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_credentials(&self, path_spec: &PathSpec) -> bool {
        self.entries.contains_key(&path_spec.container_key())
    }

    /// Forget all credentials for the layer. Returns how many were removed.
    pub fn remove_credentials(&self, path_spec: &PathSpec) -> usize {
        let key = path_spec.container_key();
        let removed = self
            .entries
            .remove(&key)
            .map(|(_, kinds)| kinds.len())
            .unwrap_or(0);
        if removed > 0 {
            debug!(path_spec = %key, removed, "credentials removed");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume() -> PathSpec {
        PathSpec::builder("bde")
            .parent(PathSpec::os("/images/bitlocker.raw"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_add_get_remove() {
        let store = CredentialStore::new();
        let spec = volume();
        assert!(store.get_credential(&spec, CredentialKind::Password).is_none());

        store.add_credential(&spec, CredentialKind::Password, "bde-TEST");
        store.add_credential(&spec, CredentialKind::RecoveryPassword, "1234-5678");
        assert_eq!(
            store.get_credential(&spec, CredentialKind::Password).unwrap().value,
            "bde-TEST"
        );
        assert_eq!(store.credentials(&spec).len(), 2);

        store.add_credential(&spec, CredentialKind::Password, "changed");
        assert_eq!(
            store.get_credential(&spec, CredentialKind::Password).unwrap().value,
            "changed"
        );

        assert_eq!(store.remove_credentials(&spec), 2);
        assert!(!store.has_credentials(&spec));
        assert_eq!(store.remove_credentials(&spec), 0);
    }

    #[test]
    fn test_keyed_by_container() {
        let store = CredentialStore::new();
        let spec = volume();
        store.add_credential(&spec, CredentialKind::Key, "00ff");

        let inner = spec.with_location("/secret.txt");
        assert!(store.get_credential(&inner, CredentialKind::Key).is_some());

        let other = PathSpec::builder("bde")
            .parent(PathSpec::os("/images/other.raw"))
            .build()
            .unwrap();
        assert!(store.get_credential(&other, CredentialKind::Key).is_none());
    }
}
