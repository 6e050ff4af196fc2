//! Driver registry: type indicator → format driver.
//!
//! Drivers register once at startup. Looking a driver up clones an `Arc`, so
//! the registry lock is never held while a driver does I/O.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use layerfs_types::PathSpec;

use super::ops::FileSystem;
use super::resolver::Resolver;
use super::source::ByteSource;
use super::volume::VolumeSystem;
use super::{VfsError, VfsResult};

/// A format driver.
///
/// Every `open_*` receives the resolver so the driver can obtain its parent
/// layer with [`Resolver::open_source`]. The parent is always opened (and
/// cached) before the driver is called, so that lookup is a cache hit.
pub trait Driver: Send + Sync {
    fn type_indicator(&self) -> &str;

    /// Parameters a path spec of this type must carry on its own layer.
    fn required_parameters(&self) -> &[&'static str] {
        &[]
    }

    /// Whether layers of this type sit on top of a parent layer.
    fn requires_parent(&self) -> bool {
        true
    }

    /// Open the file system addressed by the container key `path_spec`.
    fn open_file_system(
        &self,
        resolver: &Resolver,
        path_spec: &PathSpec,
    ) -> VfsResult<Arc<dyn FileSystem>> {
        let _ = (resolver, path_spec);
        Err(VfsError::unsupported(format!(
            "{} has no file system",
            self.type_indicator()
        )))
    }

    /// Open the volume system addressed by the container key `path_spec`.
    fn open_volume_system(
        &self,
        resolver: &Resolver,
        path_spec: &PathSpec,
    ) -> VfsResult<Arc<dyn VolumeSystem>> {
        let _ = (resolver, path_spec);
        Err(VfsError::unsupported(format!(
            "{} has no volume system",
            self.type_indicator()
        )))
    }

    /// Open the byte stream addressed by `path_spec`.
    ///
    /// The default reads a data stream through the layer's file system.
    fn open_source(
        &self,
        resolver: &Resolver,
        path_spec: &PathSpec,
    ) -> VfsResult<Arc<dyn ByteSource>> {
        let file_system = resolver.open_file_system(path_spec)?;
        file_system.open_data_stream(path_spec)
    }
}

/// Registry of format drivers keyed by type indicator.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: RwLock<HashMap<String, Arc<dyn Driver>>>,
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.type_indicators())
            .finish()
    }
}

impl DriverRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver. Registering the same type indicator twice is an
    /// error.
    pub fn register(&self, driver: Arc<dyn Driver>) -> VfsResult<()> {
        let type_indicator = driver.type_indicator().to_string();
        let mut drivers = self.drivers.write();
        if drivers.contains_key(&type_indicator) {
            return Err(VfsError::DuplicateDriver(type_indicator));
        }
        debug!(type_indicator = %type_indicator, "registered driver");
        drivers.insert(type_indicator, driver);
        Ok(())
    }

    /// Remove a driver. Returns the driver if it was registered.
    pub fn deregister(&self, type_indicator: &str) -> Option<Arc<dyn Driver>> {
        let removed = self.drivers.write().remove(type_indicator);
        if removed.is_some() {
            debug!(type_indicator, "deregistered driver");
        }
        removed
    }

    pub fn get_factory(&self, type_indicator: &str) -> VfsResult<Arc<dyn Driver>> {
        self.drivers
            .read()
            .get(type_indicator)
            .cloned()
            .ok_or_else(|| VfsError::UnknownDriver(type_indicator.to_string()))
    }

    pub fn contains(&self, type_indicator: &str) -> bool {
        self.drivers.read().contains_key(type_indicator)
    }

    /// Registered type indicators, sorted.
    pub fn type_indicators(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Check every layer of `path_spec` against its driver: the driver
    /// exists, the parent requirement holds, required parameters are set.
    pub fn validate_chain(&self, path_spec: &PathSpec) -> VfsResult<()> {
        for layer in path_spec.ancestors() {
            let driver = self.get_factory(layer.type_indicator())?;
            match (driver.requires_parent(), layer.has_parent()) {
                (true, false) => {
                    return Err(VfsError::path_spec(format!(
                        "{} layer requires a parent",
                        layer.type_indicator()
                    )));
                }
                (false, true) => {
                    return Err(VfsError::path_spec(format!(
                        "{} layer cannot have a parent",
                        layer.type_indicator()
                    )));
                }
                _ => {}
            }
            for name in driver.required_parameters() {
                if layer.parameter(name).is_none() {
                    return Err(VfsError::path_spec(format!(
                        "{} layer is missing parameter {name}",
                        layer.type_indicator()
                    )));
                }
            }
        }
        Ok(())
    }
}
