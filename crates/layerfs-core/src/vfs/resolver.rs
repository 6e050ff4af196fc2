//! Resolver: opens path-spec chains layer by layer through the caches.
//!
//! Opening a layer first makes sure every ancestor is available as a cached
//! byte source. Ancestors are opened outermost first, so each driver call
//! finds its parent already cached and resolution never recurses deeper
//! than one layer regardless of chain length.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use layerfs_types::PathSpec;

use super::cache::ResourceCache;
use super::credentials::CredentialStore;
use super::entry::{FileEntry, FileSystemHandle};
use super::ops::FileSystem;
use super::registry::DriverRegistry;
use super::source::{ByteSource, FileObject, SourceHandle};
use super::volume::{VolumeSystem, VolumeSystemHandle};
use super::{VfsError, VfsResult};

/// Resolution context shared by every caller that opens path specs.
///
/// Cloning is cheap and shares the caches.
#[derive(Clone)]
pub struct Resolver {
    registry: Arc<DriverRegistry>,
    credentials: Arc<CredentialStore>,
    file_systems: Arc<ResourceCache<dyn FileSystem>>,
    volume_systems: Arc<ResourceCache<dyn VolumeSystem>>,
    sources: Arc<ResourceCache<dyn ByteSource>>,
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("registry", &self.registry)
            .field("file_systems", &self.file_systems)
            .field("volume_systems", &self.volume_systems)
            .field("sources", &self.sources)
            .finish()
    }
}

impl Resolver {
    pub fn new(registry: Arc<DriverRegistry>) -> Self {
        Self::with_credentials(registry, Arc::new(CredentialStore::new()))
    }

    pub fn with_credentials(registry: Arc<DriverRegistry>, credentials: Arc<CredentialStore>) -> Self {
        Self {
            registry,
            credentials,
            file_systems: ResourceCache::new("file_systems"),
            volume_systems: ResourceCache::new("volume_systems"),
            sources: ResourceCache::new("sources"),
        }
    }

    pub fn registry(&self) -> &Arc<DriverRegistry> {
        &self.registry
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    // ========================================================================
    // Opening layers
    // ========================================================================

    /// Open (or reuse) the file system containing `path_spec`.
    pub fn open_file_system(&self, path_spec: &PathSpec) -> VfsResult<FileSystemHandle> {
        let key = path_spec.container_key();
        if let Some(handle) = self.file_systems.acquire(&key) {
            return Ok(handle);
        }
        self.registry.validate_chain(&key)?;
        let driver = self.registry.get_factory(key.type_indicator())?;

        let _ancestors = self.prepare_ancestors(&key)?;
        debug!(type_indicator = key.type_indicator(), path_spec = %key, "opening file system");
        let file_system = driver
            .open_file_system(self, &key)
            .map_err(|e| self.layer_failed(&key, e))?;
        Ok(self.file_systems.store(key, file_system))
    }

    /// Open (or reuse) the volume system containing `path_spec`.
    pub fn open_volume_system(&self, path_spec: &PathSpec) -> VfsResult<VolumeSystemHandle> {
        let key = path_spec.container_key();
        if let Some(handle) = self.volume_systems.acquire(&key) {
            return Ok(handle);
        }
        self.registry.validate_chain(&key)?;
        let driver = self.registry.get_factory(key.type_indicator())?;

        let _ancestors = self.prepare_ancestors(&key)?;
        debug!(type_indicator = key.type_indicator(), path_spec = %key, "opening volume system");
        let volume_system = driver
            .open_volume_system(self, &key)
            .map_err(|e| self.layer_failed(&key, e))?;
        Ok(self.volume_systems.store(key, volume_system))
    }

    /// Open (or reuse) the byte stream addressed by `path_spec`.
    ///
    /// A missing leaf is reported as [`VfsError::NotFound`]; a failing
    /// ancestor as [`VfsError::OpenLayer`].
    pub fn open_source(&self, path_spec: &PathSpec) -> VfsResult<SourceHandle> {
        if let Some(handle) = self.sources.acquire(path_spec) {
            return Ok(handle);
        }
        self.registry.validate_chain(path_spec)?;
        self.open_source_layer(path_spec, true)
    }

    /// `Read + Seek` view of the byte stream addressed by `path_spec`.
    pub fn open_file_object(&self, path_spec: &PathSpec) -> VfsResult<FileObject> {
        Ok(FileObject::new(self.open_source(path_spec)?))
    }

    /// Open the containing file system and look the entry up.
    pub fn get_file_entry(&self, path_spec: &PathSpec) -> VfsResult<FileEntry> {
        self.open_file_system(path_spec)?
            .get_file_entry_by_path_spec(path_spec)
    }

    pub fn file_entry_exists(&self, path_spec: &PathSpec) -> VfsResult<bool> {
        self.open_file_system(path_spec)?.file_entry_exists(path_spec)
    }

    /// Open one source layer whose parent chain is already validated.
    fn open_source_layer(&self, path_spec: &PathSpec, is_leaf: bool) -> VfsResult<SourceHandle> {
        if let Some(handle) = self.sources.acquire(path_spec) {
            return Ok(handle);
        }
        let driver = self.registry.get_factory(path_spec.type_indicator())?;
        let _ancestors = self.prepare_ancestors(path_spec)?;

        debug!(type_indicator = path_spec.type_indicator(), path_spec = %path_spec, "opening source");
        let source = match driver.open_source(self, path_spec) {
            Ok(source) => source,
            Err(e) if is_leaf && e.is_not_found() => return Err(e),
            Err(e) => return Err(self.layer_failed(path_spec, e)),
        };
        Ok(self.sources.store(path_spec.clone(), source))
    }

    /// Make every ancestor of `path_spec` available as a cached source.
    ///
    /// Walks up to the first cached ancestor, then opens the missing ones
    /// outermost first. The returned handles keep them alive until the
    /// caller's driver has taken its own references; dropping them on an
    /// error path releases everything acquired so far.
    fn prepare_ancestors(&self, path_spec: &PathSpec) -> VfsResult<Vec<SourceHandle>> {
        let mut held = Vec::new();
        let mut missing = Vec::new();

        let mut current = path_spec.parent();
        while let Some(layer) = current {
            if let Some(handle) = self.sources.acquire(layer) {
                held.push(handle);
                break;
            }
            missing.push(layer);
            current = layer.parent();
        }

        for layer in missing.into_iter().rev() {
            held.push(self.open_source_layer(layer, false)?);
        }
        Ok(held)
    }

    fn layer_failed(&self, path_spec: &PathSpec, error: VfsError) -> VfsError {
        warn!(type_indicator = path_spec.type_indicator(), path_spec = %path_spec, error = %error, "layer failed to open");
        VfsError::open_layer(path_spec, error)
    }

    // ========================================================================
    // Lifecycle and statistics
    // ========================================================================

    /// Close every cached resource.
    ///
    /// Handles that are still alive keep their objects but no longer count
    /// against the caches. Returns the number of resources closed.
    pub fn empty(&self) -> usize {
        let closed = self.file_systems.drain() + self.volume_systems.drain() + self.sources.drain();
        debug!(closed, "resolver emptied");
        closed
    }

    pub fn cached_file_systems(&self) -> usize {
        self.file_systems.len()
    }

    pub fn cached_volume_systems(&self) -> usize {
        self.volume_systems.len()
    }

    pub fn cached_sources(&self) -> usize {
        self.sources.len()
    }

    /// True when nothing is cached.
    pub fn is_idle(&self) -> bool {
        self.file_systems.is_empty() && self.volume_systems.is_empty() && self.sources.is_empty()
    }

    /// Live references to the file system containing `path_spec`.
    pub fn file_system_reference_count(&self, path_spec: &PathSpec) -> Option<usize> {
        self.file_systems.reference_count(&path_spec.container_key())
    }

    /// Live references to the source addressed by `path_spec`.
    pub fn source_reference_count(&self, path_spec: &PathSpec) -> Option<usize> {
        self.sources.reference_count(path_spec)
    }
}
