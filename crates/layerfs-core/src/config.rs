//! Resolver configuration, loaded from RON.
//!
//! ```ron
//! (
//!     drivers: ["os", "cpio", "mbr"],
//!     mbr_bytes_per_sector: 4096,
//!     os_root: Some("/srv/evidence"),
//!     credentials: [
//!         (
//!             path_spec: r#"{"type_indicator":"os","location":"/srv/evidence/vault.bin"}"#,
//!             kind: password,
//!             value: "hunter2",
//!         ),
//!     ],
//! )
//! ```
//!
//! Every field is optional; missing fields take their defaults.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use layerfs_types::type_indicator::{CPIO, DATA_RANGE, MBR, OS};
use layerfs_types::{CredentialKind, PathSpec};

use crate::vfs::backends::{self, mbr::DEFAULT_BYTES_PER_SECTOR};
use crate::vfs::{CredentialStore, DriverRegistry, Resolver, VfsError, VfsResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Type indicators of the built-in drivers to register.
    pub drivers: Vec<String>,
    pub mbr_bytes_per_sector: u32,
    /// Confine the `os` driver to this directory.
    pub os_root: Option<PathBuf>,
    pub credentials: Vec<CredentialConfig>,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            drivers: [OS, CPIO, MBR, DATA_RANGE].map(String::from).to_vec(),
            mbr_bytes_per_sector: DEFAULT_BYTES_PER_SECTOR,
            os_root: None,
            credentials: Vec::new(),
        }
    }
}

/// A credential preloaded into the resolver's store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Path spec in its JSON form.
    pub path_spec: String,
    pub kind: CredentialKind,
    pub value: String,
}

impl VfsConfig {
    pub fn from_ron_str(text: &str) -> VfsResult<Self> {
        ron::from_str(text).map_err(|e| VfsError::Config(format!("invalid config: {e}")))
    }

    pub fn load(path: impl AsRef<Path>) -> VfsResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| VfsError::Config(format!("{}: {e}", path.display())))?;
        Self::from_ron_str(&text)
    }
}

impl Resolver {
    /// Build a resolver with the configured built-in drivers and credentials.
    pub fn from_config(config: &VfsConfig) -> VfsResult<Resolver> {
        let registry = DriverRegistry::new();
        backends::register_builtin(&registry, config)?;

        let credentials = CredentialStore::new();
        for entry in &config.credentials {
            let spec = PathSpec::from_json(&entry.path_spec)
                .map_err(|e| VfsError::Config(format!("credential path spec: {e}")))?;
            credentials.add_credential(&spec, entry.kind, entry.value.clone());
        }

        info!(
            drivers = ?registry.type_indicators(),
            credentials = config.credentials.len(),
            "resolver configured"
        );
        Ok(Resolver::with_credentials(Arc::new(registry), Arc::new(credentials)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_config() {
        let config = VfsConfig::from_ron_str("()").unwrap();
        assert_eq!(config, VfsConfig::default());
        assert_eq!(config.mbr_bytes_per_sector, 512);

        let resolver = Resolver::from_config(&config).unwrap();
        assert_eq!(
            resolver.registry().type_indicators(),
            vec!["cpio", "data_range", "mbr", "os"]
        );
    }

    #[test]
    fn test_credentials_preloaded() {
        let text = r##"(
            drivers: ["os"],
            credentials: [
                (
                    path_spec: r#"{"type_indicator":"os","location":"/vault.bin"}"#,
                    kind: password,
                    value: "hunter2",
                ),
            ],
        )"##;
        let config = VfsConfig::from_ron_str(text).unwrap();
        let resolver = Resolver::from_config(&config).unwrap();

        let credential = resolver
            .credentials()
            .get_credential(&PathSpec::os("/vault.bin"), CredentialKind::Password)
            .unwrap();
        assert_eq!(credential.value, "hunter2");
    }

    #[test]
    fn test_unknown_driver_rejected() {
        let config = VfsConfig {
            drivers: vec!["ntfs".to_string()],
            ..VfsConfig::default()
        };
        let err = Resolver::from_config(&config).unwrap_err();
        assert!(matches!(err, VfsError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vfs.ron");
        std::fs::write(&path, "(mbr_bytes_per_sector: 4096)").unwrap();
        let config = VfsConfig::load(&path).unwrap();
        assert_eq!(config.mbr_bytes_per_sector, 4096);

        assert!(VfsConfig::load(dir.path().join("missing.ron")).is_err());
        assert!(VfsConfig::from_ron_str("(drivers: 3)").is_err());
    }
}
