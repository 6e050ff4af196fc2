//! Byte range driver (`data_range`): a window of the parent layer given by
//! `range_offset` and `range_size`.

use std::sync::Arc;

use layerfs_types::type_indicator::{DATA_RANGE, RANGE_OFFSET, RANGE_SIZE};
use layerfs_types::{ParamValue, PathSpec};

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::registry::Driver;
use crate::vfs::resolver::Resolver;
use crate::vfs::source::{ByteSource, RangeSource};

#[derive(Debug, Default, Clone, Copy)]
pub struct DataRangeDriver;

fn integer(path_spec: &PathSpec, name: &str) -> VfsResult<u64> {
    path_spec
        .parameter(name)
        .and_then(ParamValue::as_u64)
        .ok_or_else(|| VfsError::path_spec(format!("{name} must be an unsigned integer")))
}

impl Driver for DataRangeDriver {
    fn type_indicator(&self) -> &str {
        DATA_RANGE
    }

    fn required_parameters(&self) -> &[&'static str] {
        &[RANGE_OFFSET, RANGE_SIZE]
    }

    fn open_source(
        &self,
        resolver: &Resolver,
        path_spec: &PathSpec,
    ) -> VfsResult<Arc<dyn ByteSource>> {
        let offset = integer(path_spec, RANGE_OFFSET)?;
        let size = integer(path_spec, RANGE_SIZE)?;
        let parent_spec = path_spec
            .parent()
            .ok_or_else(|| VfsError::path_spec("data_range layer requires a parent"))?;
        let parent = resolver.open_source(parent_spec)?;

        let parent_size = parent.size()?;
        let end = offset
            .checked_add(size)
            .ok_or_else(|| VfsError::path_spec("range end overflows"))?;
        if end > parent_size {
            return Err(VfsError::back_end(
                path_spec,
                format!("range {offset}..{end} exceeds parent size {parent_size}"),
            ));
        }
        Ok(Arc::new(RangeSource::new(parent, offset, size)))
    }
}
