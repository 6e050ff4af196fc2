//! Format drivers.
//!
//! Each driver implements [`Driver`] for one type indicator. `os` and `fake`
//! are system-level; the rest read their parent layer as a byte source.

pub mod cpio;
pub mod data_range;
pub mod mbr;
pub mod memory;
pub mod os;

#[cfg(test)]
pub(crate) mod fixtures;

use std::sync::Arc;

use tracing::debug;

use layerfs_types::type_indicator::{CPIO, DATA_RANGE, FAKE, MBR, OS};

use crate::config::VfsConfig;
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::registry::{Driver, DriverRegistry};

pub use cpio::CpioDriver;
pub use data_range::DataRangeDriver;
pub use mbr::MbrDriver;
pub use memory::{FakeDriver, MemoryTree};
pub use os::OsDriver;

/// Register the drivers named in `config.drivers`.
///
/// `fake` is not constructible from config since it needs a populated
/// [`MemoryTree`]; register [`FakeDriver`] directly.
pub fn register_builtin(registry: &DriverRegistry, config: &VfsConfig) -> VfsResult<()> {
    for name in &config.drivers {
        let driver: Arc<dyn Driver> = match name.as_str() {
            OS => match &config.os_root {
                Some(root) => Arc::new(OsDriver::confined(root.clone())),
                None => Arc::new(OsDriver::new()),
            },
            CPIO => Arc::new(CpioDriver),
            MBR => Arc::new(MbrDriver::new(config.mbr_bytes_per_sector)),
            DATA_RANGE => Arc::new(DataRangeDriver),
            FAKE => {
                return Err(VfsError::Config(
                    "fake driver needs a MemoryTree, register it directly".to_string(),
                ));
            }
            other => {
                return Err(VfsError::Config(format!("unknown driver: {other}")));
            }
        };
        registry.register(driver)?;
        debug!(driver = %name, "registered driver");
    }
    Ok(())
}
