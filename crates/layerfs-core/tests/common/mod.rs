//! Helpers shared by the integration tests.
//!
//! Images are synthesized on the fly by the crate's own fixture builders
//! and written to a temp dir; nothing binary is checked in.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use layerfs_core::PathSpec;
use layerfs_core::vfs::backends::{CpioDriver, DataRangeDriver, FakeDriver, MbrDriver, MemoryTree, OsDriver};
use layerfs_core::vfs::{DriverRegistry, Resolver};

#[path = "../../src/vfs/backends/fixtures.rs"]
mod fixtures;

pub use fixtures::*;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("layerfs_core=debug")
        .try_init();
}

pub fn resolver() -> Resolver {
    resolver_with_tree(MemoryTree::new())
}

pub fn resolver_with_tree(tree: MemoryTree) -> Resolver {
    init_tracing();
    let registry = DriverRegistry::new();
    registry.register(Arc::new(OsDriver::new())).unwrap();
    registry.register(Arc::new(FakeDriver::new(Arc::new(tree)))).unwrap();
    registry.register(Arc::new(CpioDriver)).unwrap();
    registry.register(Arc::new(MbrDriver::default())).unwrap();
    registry.register(Arc::new(DataRangeDriver)).unwrap();
    Resolver::new(Arc::new(registry))
}

pub fn os(path: &Path) -> PathSpec {
    PathSpec::os(path.to_string_lossy())
}

pub fn layer(type_indicator: &str, location: &str, parent: PathSpec) -> PathSpec {
    PathSpec::builder(type_indicator)
        .location(location)
        .parent(parent)
        .build()
        .unwrap()
}

pub fn write_fixture(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}
