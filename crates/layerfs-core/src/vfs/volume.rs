//! Volume-system model: partition tables and other volume managers.
//!
//! Offsets and sizes are always bytes. Drivers convert from sectors at the
//! boundary (`sector * bytes_per_sector`).

use serde::{Deserialize, Serialize};
use strum::Display;

use layerfs_types::PathSpec;

use super::cache::CacheHandle;
use super::ops::Resource;
use super::{VfsError, VfsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExtentType {
    /// Bytes stored in the underlying source.
    Data,
    /// Range with no backing storage; reads as zeros.
    Sparse,
}

/// Contiguous byte range of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeExtent {
    pub offset: u64,
    pub size: u64,
    pub extent_type: ExtentType,
}

impl VolumeExtent {
    pub fn data(offset: u64, size: u64) -> Self {
        Self {
            offset,
            size,
            extent_type: ExtentType::Data,
        }
    }

    /// One past the last byte.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SectionKind {
    /// Partition tables, extended headers and similar bookkeeping.
    Metadata,
    /// Space no table entry claims.
    Unallocated,
    /// Space backing a volume.
    Allocated,
}

/// A region of the source as laid out by the volume system.
///
/// A region may be a section without being a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub offset: u64,
    pub size: u64,
    pub kind: SectionKind,
    pub description: String,
}

/// Named volume attribute, e.g. partition type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeAttribute {
    pub identifier: String,
    pub value: String,
}

impl VolumeAttribute {
    pub fn new(identifier: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            value: value.into(),
        }
    }
}

/// A volume: identifier, ordered disjoint extents, attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    identifier: String,
    extents: Vec<VolumeExtent>,
    attributes: Vec<VolumeAttribute>,
}

impl Volume {
    /// Build a volume, rejecting unordered or overlapping extents.
    pub fn new(
        identifier: impl Into<String>,
        extents: Vec<VolumeExtent>,
        attributes: Vec<VolumeAttribute>,
    ) -> VfsResult<Self> {
        let identifier = identifier.into();
        for pair in extents.windows(2) {
            if pair[1].offset < pair[0].end() {
                return Err(VfsError::BackEnd {
                    path_spec: format!("volume {identifier}"),
                    message: format!(
                        "extent at {} overlaps or precedes extent ending at {}",
                        pair[1].offset,
                        pair[0].end()
                    ),
                });
            }
        }
        Ok(Self {
            identifier,
            extents,
            attributes,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn extents(&self) -> &[VolumeExtent] {
        &self.extents
    }

    pub fn number_of_extents(&self) -> usize {
        self.extents.len()
    }

    pub fn get_extent_by_index(&self, index: usize) -> VfsResult<&VolumeExtent> {
        self.extents.get(index).ok_or_else(|| {
            VfsError::not_found(format!("volume {}: no extent {index}", self.identifier))
        })
    }

    pub fn attributes(&self) -> &[VolumeAttribute] {
        &self.attributes
    }

    pub fn number_of_attributes(&self) -> usize {
        self.attributes.len()
    }

    pub fn get_attribute_by_index(&self, index: usize) -> VfsResult<&VolumeAttribute> {
        self.attributes.get(index).ok_or_else(|| {
            VfsError::not_found(format!("volume {}: no attribute {index}", self.identifier))
        })
    }

    pub fn get_attribute(&self, identifier: &str) -> Option<&VolumeAttribute> {
        self.attributes.iter().find(|a| a.identifier == identifier)
    }

    /// Sum of extent sizes.
    pub fn size(&self) -> u64 {
        self.extents.iter().map(|e| e.size).sum()
    }
}

/// An opened volume system bound to one path-spec layer.
pub trait VolumeSystem: Resource {
    fn type_indicator(&self) -> &str;

    fn path_spec(&self) -> &PathSpec;

    fn bytes_per_sector(&self) -> u32;

    fn sections(&self) -> &[Section];

    fn volumes(&self) -> &[Volume];

    fn number_of_sections(&self) -> usize {
        self.sections().len()
    }

    fn get_section_by_index(&self, index: usize) -> VfsResult<&Section> {
        self.sections()
            .get(index)
            .ok_or_else(|| VfsError::not_found(format!("no section {index}")))
    }

    fn number_of_volumes(&self) -> usize {
        self.volumes().len()
    }

    fn get_volume_by_index(&self, index: usize) -> VfsResult<&Volume> {
        self.volumes()
            .get(index)
            .ok_or_else(|| VfsError::not_found(format!("no volume {index}")))
    }

    fn get_volume_by_identifier(&self, identifier: &str) -> VfsResult<&Volume> {
        self.volumes()
            .iter()
            .find(|v| v.identifier() == identifier)
            .ok_or_else(|| VfsError::not_found(format!("no volume {identifier}")))
    }
}

/// Scoped reference to a cached volume system.
pub type VolumeSystemHandle = CacheHandle<dyn VolumeSystem>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_rejects_overlap() {
        let overlapping = vec![VolumeExtent::data(0, 512), VolumeExtent::data(256, 512)];
        assert!(Volume::new("p1", overlapping, vec![]).is_err());

        let unordered = vec![VolumeExtent::data(1024, 512), VolumeExtent::data(0, 512)];
        assert!(Volume::new("p1", unordered, vec![]).is_err());

        let adjacent = vec![VolumeExtent::data(0, 512), VolumeExtent::data(512, 512)];
        let volume = Volume::new("p1", adjacent, vec![]).unwrap();
        assert_eq!(volume.size(), 1024);
    }

    #[test]
    fn test_volume_accessors() {
        let volume = Volume::new(
            "p2",
            vec![VolumeExtent::data(180_224, 1_024)],
            vec![
                VolumeAttribute::new("type", "0x83"),
                VolumeAttribute::new("description", "Linux"),
            ],
        )
        .unwrap();

        assert_eq!(volume.number_of_extents(), 1);
        assert_eq!(volume.get_extent_by_index(0).unwrap().offset, 180_224);
        assert!(volume.get_extent_by_index(1).unwrap_err().is_not_found());
        assert_eq!(volume.number_of_attributes(), 2);
        assert_eq!(volume.get_attribute_by_index(1).unwrap().value, "Linux");
        assert_eq!(volume.get_attribute("type").unwrap().value, "0x83");
        assert!(volume.get_attribute("flags").is_none());
    }
}
