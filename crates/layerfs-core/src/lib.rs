//! # layerfs-core
//!
//! Resolution and access for nested storage layers.
//!
//! Given a [`PathSpec`] chain such as *file `/syslog` inside a cpio archive
//! stored in partition `p2` of the disk image `/images/disk.raw`*, the
//! [`Resolver`](vfs::Resolver) opens every layer in turn, shares and caches
//! the intermediate file systems, and hands back a [`FileEntry`](vfs::FileEntry)
//! or a readable [`FileObject`](vfs::FileObject).
//!
//! ```no_run
//! use layerfs_core::config::VfsConfig;
//! use layerfs_core::vfs::Resolver;
//! use layerfs_core::PathSpec;
//!
//! # fn main() -> layerfs_core::vfs::VfsResult<()> {
//! let resolver = Resolver::from_config(&VfsConfig::default())?;
//! let image = PathSpec::os("/images/disk.raw");
//! let partition = PathSpec::builder("mbr").location("/p2").parent(image).build()?;
//! let syslog = PathSpec::builder("cpio").location("/syslog").parent(partition).build()?;
//!
//! let entry = resolver.get_file_entry(&syslog)?;
//! println!("{} bytes", entry.size().unwrap_or(0));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod vfs;

pub use layerfs_types::{
    Credential, CredentialKind, ParamValue, PathSpec, PathSpecBuilder, PathSpecError,
    type_indicator,
};
