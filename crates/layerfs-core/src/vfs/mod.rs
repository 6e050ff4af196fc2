//! Layered virtual filesystem.
//!
//! A [`PathSpec`](layerfs_types::PathSpec) names a resource as a chain of
//! layers (`os` file → partition → archive member). The [`Resolver`] walks
//! the chain bottom-up, opening each layer once through the [`Driver`]
//! registered for its type indicator and caching it by path spec.
//!
//! Key components:
//!
//! - [`Resolver`] - opens file systems, volume systems and byte sources
//! - [`ResourceCache`] / [`CacheHandle`] - reference-counted layer cache
//! - [`DriverRegistry`] - type indicator to [`Driver`] lookup
//! - [`FileSystem`] / [`FileEntry`] / [`Directory`] - file system contract
//! - [`VolumeSystem`] / [`Volume`] / [`VolumeExtent`] - partitions
//! - [`CredentialStore`] - keys and passwords for encrypted layers
//!
//! ## Lifetimes
//!
//! Handles returned by the resolver keep their layer open. Dropping the last
//! handle closes the layer and releases the handle it held on its parent, so
//! a whole chain unwinds once the leaf goes away.

pub mod backends;
mod cache;
mod credentials;
mod entry;
mod error;
mod ops;
mod registry;
mod resolver;
mod source;
mod types;
mod volume;

pub use cache::{CacheHandle, ResourceCache};
pub use credentials::CredentialStore;
pub use entry::{FileEntry, FileSystemHandle, SubFileEntries};
pub use error::{VfsError, VfsResult};
pub use ops::{Directory, DirectoryEntries, FileEntryBackend, FileSystem, Resource};
pub use registry::{Driver, DriverRegistry};
pub use resolver::Resolver;
pub use source::{ByteSource, BytesSource, FileObject, ParentSource, RangeSource, SourceHandle};
pub use types::{
    Attribute, DataStream, FileEntryType, Stat, StatAttribute, Timestamp, Timestamps,
};
pub use volume::{
    ExtentType, Section, SectionKind, Volume, VolumeAttribute, VolumeExtent, VolumeSystem,
    VolumeSystemHandle,
};
