//! DOS (MBR) partition table driver (`mbr`).
//!
//! Opens as a volume system (sections and volumes) or as a file system whose
//! virtual root lists the partitions as `/p1`..`/pN`. Partition data is
//! addressed by `location` (`/p2`) or by zero-based `part_index`.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use layerfs_types::type_indicator::MBR;
use layerfs_types::PathSpec;

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::{Directory, DirectoryEntries, FileEntryBackend, FileSystem, Resource};
use crate::vfs::registry::Driver;
use crate::vfs::resolver::Resolver;
use crate::vfs::source::{ByteSource, ParentSource, RangeSource};
use crate::vfs::types::{FileEntryType, StatAttribute};
use crate::vfs::volume::{
    Section, SectionKind, Volume, VolumeAttribute, VolumeExtent, VolumeSystem,
};

const TABLE_OFFSET: usize = 446;
const ENTRY_SIZE: usize = 16;
const SIGNATURE: [u8; 2] = [0x55, 0xAA];
const EXTENDED_TYPES: [u8; 3] = [0x05, 0x0F, 0x85];
/// Upper bound on logical partitions, guards against EBR cycles.
const MAX_LOGICAL: usize = 128;

pub const DEFAULT_BYTES_PER_SECTOR: u32 = 512;

fn type_description(partition_type: u8) -> &'static str {
    match partition_type {
        0x01 => "DOS FAT12",
        0x04 => "DOS FAT16 (<32M)",
        0x05 => "DOS Extended",
        0x06 => "DOS FAT16 (>=32M)",
        0x07 => "NTFS / exFAT",
        0x0B => "Win95 FAT32",
        0x0C => "Win95 FAT32 (0x0C)",
        0x0E => "DOS FAT16 (LBA)",
        0x0F => "Win95 Extended",
        0x82 => "Linux Swap",
        0x83 => "Linux",
        0x85 => "Linux Extended",
        0x8E => "Linux Logical Volume Manager",
        0xEE => "GPT Safety Partition",
        _ => "Unknown Type",
    }
}

#[derive(Debug, Clone, Copy)]
struct TableEntry {
    partition_type: u8,
    start: u64,
    count: u64,
}

impl TableEntry {
    fn is_empty(&self) -> bool {
        self.partition_type == 0 || self.count == 0
    }

    fn is_extended(&self) -> bool {
        EXTENDED_TYPES.contains(&self.partition_type)
    }
}

/// Partitions in sector units, before conversion to bytes.
#[derive(Debug, Clone, Copy)]
struct Partition {
    partition_type: u8,
    start: u64,
    count: u64,
}

/// Parsed partition layout, in bytes.
#[derive(Debug)]
struct Layout {
    bytes_per_sector: u32,
    sections: Vec<Section>,
    volumes: Vec<Volume>,
}

/// Byte offset of sector `sector`.
fn sector_offset(sector: u64, bytes_per_sector: u64, path_spec: &PathSpec) -> VfsResult<u64> {
    sector.checked_mul(bytes_per_sector).ok_or_else(|| {
        VfsError::back_end(path_spec, format!("sector {sector} is beyond addressable bytes"))
    })
}

/// Fail unless sectors `start..start + count` lie within `parent_size` bytes.
fn check_bounds(
    start: u64,
    count: u64,
    bytes_per_sector: u64,
    parent_size: u64,
    path_spec: &PathSpec,
) -> VfsResult<()> {
    let end_sector = start.saturating_add(count);
    let end = sector_offset(end_sector, bytes_per_sector, path_spec)?;
    if end > parent_size {
        return Err(VfsError::back_end(
            path_spec,
            format!("sectors {start}..{end_sector} run past the parent's {parent_size} bytes"),
        ));
    }
    Ok(())
}

fn read_table(
    parent: &ParentSource,
    sector: u64,
    bytes_per_sector: u64,
    path_spec: &PathSpec,
) -> VfsResult<[TableEntry; 4]> {
    let mut block = [0u8; 512];
    parent.read_exact_at(sector_offset(sector, bytes_per_sector, path_spec)?, &mut block)?;
    if block[510..512] != SIGNATURE {
        return Err(VfsError::back_end(
            path_spec,
            format!("missing partition table signature in sector {sector}"),
        ));
    }
    let entry = |i: usize| {
        let raw = &block[TABLE_OFFSET + i * ENTRY_SIZE..TABLE_OFFSET + (i + 1) * ENTRY_SIZE];
        TableEntry {
            partition_type: raw[4],
            start: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]) as u64,
            count: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]) as u64,
        }
    };
    Ok([entry(0), entry(1), entry(2), entry(3)])
}

/// Rank for ordering sections that start on the same sector.
fn rank(kind: SectionKind) -> u8 {
    match kind {
        SectionKind::Metadata => 0,
        SectionKind::Unallocated => 1,
        SectionKind::Allocated => 2,
    }
}

impl Layout {
    fn parse(parent: &ParentSource, bytes_per_sector: u32, path_spec: &PathSpec) -> VfsResult<Self> {
        let bps = bytes_per_sector as u64;
        let parent_size = parent.size()?;
        let total_sectors = parent_size / bps;

        // (start sector, sector count, kind, description)
        let mut regions: Vec<(u64, u64, SectionKind, String)> = Vec::new();
        let mut partitions: Vec<Partition> = Vec::new();

        regions.push((0, 1, SectionKind::Metadata, "Primary Table (#0)".to_string()));
        let mut primary: Vec<TableEntry> = read_table(parent, 0, bps, path_spec)?
            .into_iter()
            .filter(|e| !e.is_empty())
            .collect();
        primary.sort_by_key(|e| e.start);

        let mut table_number = 0;
        for entry in primary {
            if !entry.is_extended() {
                partitions.push(Partition {
                    partition_type: entry.partition_type,
                    start: entry.start,
                    count: entry.count,
                });
                continue;
            }

            check_bounds(entry.start, entry.count, bps, parent_size, path_spec)?;
            regions.push((
                entry.start,
                entry.count,
                SectionKind::Metadata,
                format!("{} (0x{:02x})", type_description(entry.partition_type), entry.partition_type),
            ));

            let base = entry.start;
            let mut ebr = base;
            let mut visited = HashSet::new();
            while visited.insert(ebr) && visited.len() <= MAX_LOGICAL {
                table_number += 1;
                regions.push((ebr, 1, SectionKind::Metadata, format!("Extended Table (#{table_number})")));
                let table = read_table(parent, ebr, bps, path_spec)?;

                let logical = table[0];
                if !logical.is_empty() && !logical.is_extended() {
                    partitions.push(Partition {
                        partition_type: logical.partition_type,
                        start: ebr + logical.start,
                        count: logical.count,
                    });
                }
                let next = table[1];
                if next.is_empty() || !next.is_extended() {
                    break;
                }
                ebr = base + next.start;
            }
        }

        // Unallocated gaps are computed against partitions only; table
        // sectors count as unallocated space.
        let mut allocated: Vec<(u64, u64)> = partitions.iter().map(|p| (p.start, p.count)).collect();
        allocated.sort();
        let mut cursor = 0;
        for (start, count) in &allocated {
            if *start > cursor {
                regions.push((cursor, start - cursor, SectionKind::Unallocated, "Unallocated".to_string()));
            }
            cursor = cursor.max(start + count);
        }
        if cursor < total_sectors {
            regions.push((cursor, total_sectors - cursor, SectionKind::Unallocated, "Unallocated".to_string()));
        }

        let mut volumes = Vec::new();
        let mut ordered = partitions.clone();
        ordered.sort_by_key(|p| p.start);
        for (index, partition) in ordered.iter().enumerate() {
            check_bounds(partition.start, partition.count, bps, parent_size, path_spec)?;
            let description = type_description(partition.partition_type);
            regions.push((
                partition.start,
                partition.count,
                SectionKind::Allocated,
                format!("{description} (0x{:02x})", partition.partition_type),
            ));
            volumes.push(Volume::new(
                format!("p{}", index + 1),
                vec![VolumeExtent::data(
                    sector_offset(partition.start, bps, path_spec)?,
                    sector_offset(partition.count, bps, path_spec)?,
                )],
                vec![
                    VolumeAttribute::new("type", format!("0x{:02x}", partition.partition_type)),
                    VolumeAttribute::new("description", description),
                ],
            )?);
        }

        // Stable: equal keys keep discovery order.
        regions.sort_by_key(|(start, _, kind, _)| (*start, rank(*kind)));
        let sections = regions
            .into_iter()
            .map(|(start, count, kind, description)| {
                Ok(Section {
                    offset: sector_offset(start, bps, path_spec)?,
                    size: sector_offset(count, bps, path_spec)?,
                    kind,
                    description,
                })
            })
            .collect::<VfsResult<Vec<_>>>()?;

        debug!(path_spec = %path_spec, volumes = volumes.len(), "parsed partition table");
        Ok(Layout {
            bytes_per_sector,
            sections,
            volumes,
        })
    }
}

/// Driver for the `mbr` type indicator.
#[derive(Debug, Clone)]
pub struct MbrDriver {
    bytes_per_sector: u32,
}

impl Default for MbrDriver {
    fn default() -> Self {
        Self::new(DEFAULT_BYTES_PER_SECTOR)
    }
}

impl MbrDriver {
    pub fn new(bytes_per_sector: u32) -> Self {
        Self { bytes_per_sector }
    }

    fn open(&self, resolver: &Resolver, path_spec: &PathSpec) -> VfsResult<(ParentSource, Layout)> {
        if self.bytes_per_sector < 512 || !self.bytes_per_sector.is_power_of_two() {
            return Err(VfsError::Config(format!(
                "invalid bytes per sector: {}",
                self.bytes_per_sector
            )));
        }
        let parent_spec = path_spec
            .parent()
            .ok_or_else(|| VfsError::path_spec("mbr layer requires a parent"))?;
        let parent = ParentSource::new(resolver.open_source(parent_spec)?);
        let layout = Layout::parse(&parent, self.bytes_per_sector, path_spec)?;
        Ok((parent, layout))
    }
}

impl Driver for MbrDriver {
    fn type_indicator(&self) -> &str {
        MBR
    }

    fn open_volume_system(
        &self,
        resolver: &Resolver,
        path_spec: &PathSpec,
    ) -> VfsResult<Arc<dyn VolumeSystem>> {
        let (parent, layout) = self.open(resolver, path_spec)?;
        Ok(Arc::new(MbrVolumeSystem {
            path_spec: path_spec.clone(),
            parent,
            layout,
        }))
    }

    fn open_file_system(
        &self,
        resolver: &Resolver,
        path_spec: &PathSpec,
    ) -> VfsResult<Arc<dyn FileSystem>> {
        let (parent, layout) = self.open(resolver, path_spec)?;
        Ok(Arc::new(MbrFileSystem {
            path_spec: path_spec.clone(),
            parent,
            volumes: Arc::new(layout.volumes),
        }))
    }
}

/// An opened partition table as a volume system.
pub struct MbrVolumeSystem {
    path_spec: PathSpec,
    parent: ParentSource,
    layout: Layout,
}

impl Resource for MbrVolumeSystem {
    fn close(&self) {
        self.parent.close();
    }
}

impl VolumeSystem for MbrVolumeSystem {
    fn type_indicator(&self) -> &str {
        MBR
    }

    fn path_spec(&self) -> &PathSpec {
        &self.path_spec
    }

    fn bytes_per_sector(&self) -> u32 {
        self.layout.bytes_per_sector
    }

    fn sections(&self) -> &[Section] {
        &self.layout.sections
    }

    fn volumes(&self) -> &[Volume] {
        &self.layout.volumes
    }
}

/// An opened partition table as a file system of partitions.
pub struct MbrFileSystem {
    path_spec: PathSpec,
    parent: ParentSource,
    volumes: Arc<Vec<Volume>>,
}

impl MbrFileSystem {
    /// Volume index addressed by `path_spec`; `None` means the root.
    fn select(&self, path_spec: &PathSpec) -> Option<Option<usize>> {
        if let Some(index) = path_spec.part_index() {
            let index = usize::try_from(index).ok()?;
            return (index < self.volumes.len()).then_some(Some(index));
        }
        let location = path_spec.location()?;
        let name = location.trim_matches('/');
        if name.is_empty() {
            return Some(None);
        }
        self.volumes
            .iter()
            .position(|v| v.identifier() == name)
            .map(Some)
    }
}

impl Resource for MbrFileSystem {
    fn close(&self) {
        self.parent.close();
    }
}

impl FileSystem for MbrFileSystem {
    fn type_indicator(&self) -> &str {
        MBR
    }

    fn path_spec(&self) -> &PathSpec {
        &self.path_spec
    }

    fn lookup(&self, path_spec: &PathSpec) -> VfsResult<Option<Box<dyn FileEntryBackend>>> {
        Ok(self.select(path_spec).map(|index| {
            Box::new(PartitionEntry {
                path_spec: path_spec.clone(),
                container: self.path_spec.clone(),
                volumes: Arc::clone(&self.volumes),
                index,
            }) as Box<dyn FileEntryBackend>
        }))
    }

    fn open_data_stream(&self, path_spec: &PathSpec) -> VfsResult<Arc<dyn ByteSource>> {
        let Some(Some(index)) = self.select(path_spec) else {
            return Err(VfsError::not_found(path_spec.to_string()));
        };
        if path_spec.data_stream().is_some_and(|name| !name.is_empty()) {
            return Err(VfsError::not_found(format!("{path_spec}: named data stream")));
        }
        let extent = self.volumes[index].get_extent_by_index(0)?;
        Ok(Arc::new(RangeSource::new(
            self.parent.handle()?,
            extent.offset,
            extent.size,
        )))
    }
}

/// The virtual root (`index == None`) or one partition.
struct PartitionEntry {
    path_spec: PathSpec,
    container: PathSpec,
    volumes: Arc<Vec<Volume>>,
    index: Option<usize>,
}

impl FileEntryBackend for PartitionEntry {
    fn path_spec(&self) -> &PathSpec {
        &self.path_spec
    }

    fn entry_type(&self) -> Option<FileEntryType> {
        match self.index {
            None => Some(FileEntryType::Directory),
            Some(_) => Some(FileEntryType::File),
        }
    }

    fn name(&self) -> Option<String> {
        match self.index {
            None => Some(String::new()),
            Some(index) => Some(self.volumes[index].identifier().to_string()),
        }
    }

    fn is_root(&self) -> bool {
        self.index.is_none()
    }

    fn is_virtual(&self) -> bool {
        self.index.is_none()
    }

    fn size(&self) -> Option<u64> {
        self.index.map(|index| self.volumes[index].size())
    }

    fn extents(&self) -> VfsResult<Vec<VolumeExtent>> {
        Ok(self
            .index
            .map(|index| self.volumes[index].extents().to_vec())
            .unwrap_or_default())
    }

    fn stat_attribute(&self) -> VfsResult<Option<StatAttribute>> {
        Ok(Some(StatAttribute {
            size: self.size(),
            file_type: self.entry_type(),
            ..StatAttribute::default()
        }))
    }

    fn directory(&self) -> VfsResult<Option<Box<dyn Directory>>> {
        if self.index.is_some() {
            return Ok(None);
        }
        Ok(Some(Box::new(PartitionDirectory {
            container: self.container.clone(),
            volumes: Arc::clone(&self.volumes),
        })))
    }

    fn parent_path_spec(&self) -> Option<PathSpec> {
        self.index
            .map(|_| self.container.with_location("/"))
    }
}

struct PartitionDirectory {
    container: PathSpec,
    volumes: Arc<Vec<Volume>>,
}

impl Directory for PartitionDirectory {
    fn entries(&self) -> VfsResult<DirectoryEntries> {
        let specs: Vec<VfsResult<PathSpec>> = self
            .volumes
            .iter()
            .enumerate()
            .map(|(index, volume)| {
                Ok(self
                    .container
                    .with_location(format!("/{}", volume.identifier()))
                    .with_part_index(index as u64))
            })
            .collect();
        Ok(Box::new(specs.into_iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::backends::fixtures::{partitioned_image, write_table};
    use crate::vfs::backends::memory::{FakeDriver, MemoryTree};
    use crate::vfs::registry::DriverRegistry;

    fn resolver(image: Vec<u8>) -> Resolver {
        resolver_with(image, MbrDriver::default())
    }

    fn resolver_with(image: Vec<u8>, driver: MbrDriver) -> Resolver {
        let tree = MemoryTree::new();
        tree.add_file("/disk.raw", image).unwrap();
        let registry = DriverRegistry::new();
        registry.register(Arc::new(FakeDriver::new(Arc::new(tree)))).unwrap();
        registry.register(Arc::new(driver)).unwrap();
        Resolver::new(Arc::new(registry))
    }

    fn mbr() -> PathSpec {
        PathSpec::builder(MBR)
            .parent(PathSpec::builder("fake").location("/disk.raw").build().unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn test_sections_match_layout() {
        let resolver = resolver(partitioned_image(&[]));
        let vs = resolver.open_volume_system(&mbr()).unwrap();

        let described: Vec<(u64, SectionKind, &str)> = vs
            .sections()
            .iter()
            .map(|s| (s.offset / 512, s.kind, s.description.as_str()))
            .collect();
        assert_eq!(
            described,
            vec![
                (0, SectionKind::Metadata, "Primary Table (#0)"),
                (0, SectionKind::Unallocated, "Unallocated"),
                (1, SectionKind::Allocated, "Linux (0x83)"),
                (351, SectionKind::Metadata, "DOS Extended (0x05)"),
                (351, SectionKind::Metadata, "Extended Table (#1)"),
                (351, SectionKind::Unallocated, "Unallocated"),
                (352, SectionKind::Allocated, "Linux (0x83)"),
            ]
        );
        assert_eq!(vs.get_volume_by_identifier("p1").unwrap().size(), 350 * 512);
        assert!(vs.get_volume_by_identifier("p3").unwrap_err().is_not_found());
        assert!(vs.get_section_by_index(7).unwrap_err().is_not_found());
    }

    #[test]
    fn test_partition_file_system() {
        let resolver = resolver(partitioned_image(&[]));
        let fs = resolver.open_file_system(&mbr()).unwrap();
        let root = fs.get_root_file_entry().unwrap();
        assert!(root.is_virtual());
        let names: Vec<String> = root
            .get_sub_file_entries()
            .unwrap()
            .map(|e| e.unwrap().name().unwrap())
            .collect();
        assert_eq!(names, vec!["p1", "p2"]);

        let by_index = mbr().with_part_index(1);
        let source = resolver.open_source(&by_index).unwrap();
        assert_eq!(source.size().unwrap(), 2528 * 512);

        let missing = mbr().with_location("/p9");
        assert!(resolver.open_source(&missing).unwrap_err().is_not_found());
    }

    #[test]
    fn test_missing_signature() {
        let resolver = resolver(vec![0u8; 4096]);
        let err = resolver.open_volume_system(&mbr()).unwrap_err();
        assert!(matches!(err.root_cause(), VfsError::BackEnd { .. }));
        assert!(resolver.is_idle());
    }

    #[test]
    fn test_ebr_cycle_terminates() {
        let mut image = vec![0u8; 64 * 512];
        write_table(&mut image, 0, &[(0x05, 10, 54)]);
        // Next-EBR link points back at itself.
        write_table(&mut image, 10, &[(0x83, 1, 5), (0x05, 0, 54)]);
        let resolver = resolver(image);
        let vs = resolver.open_volume_system(&mbr()).unwrap();
        assert_eq!(vs.number_of_volumes(), 1);
    }

    #[test]
    fn test_partition_extents() {
        let resolver = resolver(partitioned_image(&[]));
        let p2 = resolver.get_file_entry(&mbr().with_location("/p2")).unwrap();
        assert_eq!(p2.get_extents().unwrap(), vec![VolumeExtent::data(352 * 512, 2528 * 512)]);

        let root = resolver.get_file_entry(&mbr().with_location("/")).unwrap();
        assert!(root.get_extents().unwrap().is_empty());
    }

    #[test]
    fn test_partition_past_end_of_image() {
        let mut image = partitioned_image(&[]);
        image.truncate(1000 * 512);
        let resolver = resolver(image);
        let err = resolver.open_volume_system(&mbr()).unwrap_err();
        assert!(matches!(err.root_cause(), VfsError::BackEnd { .. }));
        assert!(resolver.is_idle());
    }

    #[test]
    fn test_large_sector_size_rejects_layout() {
        let resolver = resolver_with(partitioned_image(&[]), MbrDriver::new(1 << 31));
        let err = resolver.open_volume_system(&mbr()).unwrap_err();
        assert!(matches!(err.root_cause(), VfsError::BackEnd { .. }));
        assert!(resolver.is_idle());
    }

    #[test]
    fn test_sector_offset_overflow() {
        assert_eq!(sector_offset(3, 512, &mbr()).unwrap(), 1536);
        let err = sector_offset(u64::MAX, 512, &mbr()).unwrap_err();
        assert!(matches!(err, VfsError::BackEnd { .. }));
        assert!(check_bounds(u64::MAX - 1, 2, 512, u64::MAX, &mbr()).is_err());
        assert!(check_bounds(1, 350, 512, 2880 * 512, &mbr()).is_ok());
    }
}
