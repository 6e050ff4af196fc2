//! CPIO archive driver (`cpio`).
//!
//! Reads the portable ASCII formats: newc (`070701`), newc with checksum
//! (`070702`) and odc (`070707`). The archive is indexed once at open;
//! member data is served as byte ranges of the parent layer.
//!
//! The archive root is virtual. Directories implied by member names but
//! missing from the archive are synthesized.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use layerfs_types::type_indicator::CPIO;
use layerfs_types::PathSpec;

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::{Directory, DirectoryEntries, FileEntryBackend, FileSystem, Resource};
use crate::vfs::registry::Driver;
use crate::vfs::resolver::Resolver;
use crate::vfs::source::{ByteSource, ParentSource, RangeSource};
use crate::vfs::types::{FileEntryType, StatAttribute, Timestamp, Timestamps};
use crate::vfs::volume::VolumeExtent;

const NEWC_MAGIC: &[u8] = b"070701";
const CRC_MAGIC: &[u8] = b"070702";
const ODC_MAGIC: &[u8] = b"070707";
const NEWC_HEADER_SIZE: usize = 110;
const ODC_HEADER_SIZE: usize = 76;
const TRAILER: &str = "TRAILER!!!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Newc,
    Odc,
}

/// One archive member as recorded in its header.
#[derive(Debug, Clone)]
struct Member {
    path: String,
    inode: u64,
    mode: u32,
    uid: u32,
    gid: u32,
    nlink: u64,
    mtime: i64,
    data_offset: u64,
    data_size: u64,
    link_target: Option<String>,
}

impl Member {
    fn entry_type(&self) -> Option<FileEntryType> {
        FileEntryType::from_mode(self.mode)
    }
}

/// Parsed archive index.
#[derive(Debug, Default)]
struct Archive {
    members: Vec<Member>,
    by_path: BTreeMap<String, usize>,
    /// Directories implied by member paths but not stored.
    synthesized: BTreeSet<String>,
    children: BTreeMap<String, BTreeSet<String>>,
}

fn parse_field(bytes: &[u8], radix: u32, path_spec: &PathSpec) -> VfsResult<u64> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| VfsError::back_end(path_spec, "non-ASCII header field"))?;
    u64::from_str_radix(text, radix)
        .map_err(|_| VfsError::back_end(path_spec, format!("invalid header field {text:?}")))
}

fn align4(value: u64) -> u64 {
    (value + 3) & !3
}

/// Normalize a member name to an absolute `/`-separated path.
fn member_path(name: &str) -> String {
    let segments: Vec<&str> = name
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    format!("/{}", segments.join("/"))
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(pos) => &path[..pos],
    }
}

impl Archive {
    fn parse(parent: &ParentSource, path_spec: &PathSpec) -> VfsResult<Self> {
        let size = parent.size()?;
        let mut archive = Archive::default();
        let mut offset = 0u64;

        loop {
            if offset + 6 > size {
                return Err(VfsError::back_end(path_spec, "archive ends without trailer"));
            }
            let mut magic = [0u8; 6];
            parent.read_exact_at(offset, &mut magic)?;
            let format = match &magic[..] {
                NEWC_MAGIC | CRC_MAGIC => Format::Newc,
                ODC_MAGIC => Format::Odc,
                _ => {
                    return Err(VfsError::back_end(
                        path_spec,
                        format!("unsupported cpio signature at offset {offset}"),
                    ));
                }
            };

            let header_size = match format {
                Format::Newc => NEWC_HEADER_SIZE,
                Format::Odc => ODC_HEADER_SIZE,
            };
            let mut header = vec![0u8; header_size];
            parent.read_exact_at(offset, &mut header)?;

            let field = |start: usize, len: usize| -> VfsResult<u64> {
                let radix = if format == Format::Newc { 16 } else { 8 };
                parse_field(&header[start..start + len], radix, path_spec)
            };

            // (inode, mode, uid, gid, nlink, mtime, name size, data size)
            let (inode, mode, uid, gid, nlink, mtime, name_size, data_size) = match format {
                Format::Newc => (
                    field(6, 8)?,
                    field(14, 8)?,
                    field(22, 8)?,
                    field(30, 8)?,
                    field(38, 8)?,
                    field(46, 8)?,
                    field(94, 8)?,
                    field(54, 8)?,
                ),
                Format::Odc => (
                    field(12, 6)?,
                    field(18, 6)?,
                    field(24, 6)?,
                    field(30, 6)?,
                    field(36, 6)?,
                    field(48, 11)?,
                    field(59, 6)?,
                    field(65, 11)?,
                ),
            };

            let name_offset = offset + header_size as u64;
            if name_size == 0 || name_offset + name_size > size {
                return Err(VfsError::back_end(path_spec, "member name out of bounds"));
            }
            let mut name = vec![0u8; name_size as usize];
            parent.read_exact_at(name_offset, &mut name)?;
            if name.last() == Some(&0) {
                name.pop();
            }
            let name = String::from_utf8_lossy(&name).into_owned();

            let data_offset = match format {
                Format::Newc => align4(name_offset + name_size),
                Format::Odc => name_offset + name_size,
            };
            if data_offset + data_size > size {
                return Err(VfsError::back_end(
                    path_spec,
                    format!("member {name} extends past the end of the archive"),
                ));
            }
            offset = match format {
                Format::Newc => align4(data_offset + data_size),
                Format::Odc => data_offset + data_size,
            };

            if name == TRAILER {
                break;
            }
            let path = member_path(&name);
            if path == "/" {
                continue;
            }

            let mode = mode as u32;
            let link_target = if FileEntryType::from_mode(mode) == Some(FileEntryType::Link) {
                let mut target = vec![0u8; data_size as usize];
                parent.read_exact_at(data_offset, &mut target)?;
                Some(String::from_utf8_lossy(&target).into_owned())
            } else {
                None
            };

            archive.by_path.insert(path.clone(), archive.members.len());
            archive.members.push(Member {
                path,
                inode,
                mode,
                uid: uid as u32,
                gid: gid as u32,
                nlink,
                mtime: mtime as i64,
                data_offset,
                data_size,
                link_target,
            });
        }

        archive.link_tree();
        debug!(path_spec = %path_spec, members = archive.members.len(), "indexed cpio archive");
        Ok(archive)
    }

    /// Fill in parent/child relations, synthesizing missing directories.
    fn link_tree(&mut self) {
        let paths: Vec<String> = self.by_path.keys().cloned().collect();
        for path in paths {
            let mut child = path;
            loop {
                let parent = parent_of(&child).to_string();
                self.children
                    .entry(parent.clone())
                    .or_default()
                    .insert(child);
                if parent == "/" || self.by_path.contains_key(&parent) || !self.synthesized.insert(parent.clone()) {
                    break;
                }
                child = parent;
            }
        }
    }

    fn find(&self, path: &str) -> Option<Node> {
        if path == "/" {
            Some(Node::Root)
        } else if let Some(&index) = self.by_path.get(path) {
            Some(Node::Member(index))
        } else if self.synthesized.contains(path) {
            Some(Node::Synthesized(path.to_string()))
        } else {
            None
        }
    }

    /// Member with the given inode. Hard links share an inode, so when
    /// several members match, `location` picks one; without it the lookup
    /// is ambiguous.
    fn find_by_inode(&self, inode: u64, location: Option<&str>) -> Option<Node> {
        let mut matches = self.members.iter().enumerate().filter(|(_, m)| m.inode == inode);
        let (first, _) = matches.next()?;
        let Some((second, _)) = matches.next() else {
            return Some(Node::Member(first));
        };
        let path = member_path(location?);
        [first, second]
            .into_iter()
            .chain(matches.map(|(index, _)| index))
            .find(|&index| self.members[index].path == path)
            .map(Node::Member)
    }
}

#[derive(Debug, Clone)]
enum Node {
    Root,
    Synthesized(String),
    Member(usize),
}

/// Driver for the `cpio` type indicator.
#[derive(Debug, Clone, Default)]
pub struct CpioDriver;

impl Driver for CpioDriver {
    fn type_indicator(&self) -> &str {
        CPIO
    }

    fn open_file_system(
        &self,
        resolver: &Resolver,
        path_spec: &PathSpec,
    ) -> VfsResult<Arc<dyn FileSystem>> {
        let parent_spec = path_spec
            .parent()
            .ok_or_else(|| VfsError::path_spec("cpio layer requires a parent"))?;
        let parent = ParentSource::new(resolver.open_source(parent_spec)?);
        let archive = Archive::parse(&parent, path_spec)?;
        Ok(Arc::new(CpioFileSystem {
            path_spec: path_spec.clone(),
            parent,
            archive: Arc::new(archive),
        }))
    }
}

/// An opened cpio archive.
pub struct CpioFileSystem {
    path_spec: PathSpec,
    parent: ParentSource,
    archive: Arc<Archive>,
}

impl CpioFileSystem {
    fn node(&self, path_spec: &PathSpec) -> Option<Node> {
        match (path_spec.identifier(), path_spec.location()) {
            (Some(inode), location) => self.archive.find_by_inode(inode, location),
            (None, Some(location)) => self.archive.find(&member_path(location)),
            (None, None) => None,
        }
    }
}

impl Resource for CpioFileSystem {
    fn close(&self) {
        self.parent.close();
    }
}

impl FileSystem for CpioFileSystem {
    fn type_indicator(&self) -> &str {
        CPIO
    }

    fn path_spec(&self) -> &PathSpec {
        &self.path_spec
    }

    fn lookup(&self, path_spec: &PathSpec) -> VfsResult<Option<Box<dyn FileEntryBackend>>> {
        Ok(self.node(path_spec).map(|node| {
            Box::new(CpioEntry {
                path_spec: path_spec.clone(),
                container: self.path_spec.clone(),
                archive: Arc::clone(&self.archive),
                node,
            }) as Box<dyn FileEntryBackend>
        }))
    }

    fn open_data_stream(&self, path_spec: &PathSpec) -> VfsResult<Arc<dyn ByteSource>> {
        let Some(Node::Member(index)) = self.node(path_spec) else {
            return Err(VfsError::not_found(path_spec.to_string()));
        };
        let member = &self.archive.members[index];
        if member.entry_type() != Some(FileEntryType::File) {
            return Err(VfsError::not_found(format!("{} has no data stream", member.path)));
        }
        if path_spec.data_stream().is_some_and(|name| !name.is_empty()) {
            return Err(VfsError::not_found(format!(
                "{}: data stream {}",
                member.path,
                path_spec.data_stream().unwrap_or_default()
            )));
        }
        Ok(Arc::new(RangeSource::new(
            self.parent.handle()?,
            member.data_offset,
            member.data_size,
        )))
    }
}

struct CpioEntry {
    path_spec: PathSpec,
    container: PathSpec,
    archive: Arc<Archive>,
    node: Node,
}

impl CpioEntry {
    fn member(&self) -> Option<&Member> {
        match self.node {
            Node::Member(index) => self.archive.members.get(index),
            _ => None,
        }
    }

    fn path(&self) -> &str {
        match &self.node {
            Node::Root => "/",
            Node::Synthesized(path) => path,
            Node::Member(index) => &self.archive.members[*index].path,
        }
    }
}

impl FileEntryBackend for CpioEntry {
    fn path_spec(&self) -> &PathSpec {
        &self.path_spec
    }

    fn entry_type(&self) -> Option<FileEntryType> {
        match self.member() {
            Some(member) => member.entry_type(),
            None => Some(FileEntryType::Directory),
        }
    }

    fn name(&self) -> Option<String> {
        let location = self.path_spec.location()?;
        let path = member_path(location);
        Some(path.rsplit('/').next().unwrap_or("").to_string())
    }

    fn is_root(&self) -> bool {
        matches!(self.node, Node::Root)
    }

    fn is_virtual(&self) -> bool {
        !matches!(self.node, Node::Member(_))
    }

    fn size(&self) -> Option<u64> {
        self.member().map(|m| m.data_size)
    }

    fn extents(&self) -> VfsResult<Vec<VolumeExtent>> {
        Ok(self
            .member()
            .filter(|m| m.entry_type() == Some(FileEntryType::File) && m.data_size > 0)
            .map(|m| VolumeExtent::data(m.data_offset, m.data_size))
            .into_iter()
            .collect())
    }

    fn timestamps(&self) -> Timestamps {
        Timestamps {
            modification: self.member().map(|m| Timestamp::from_seconds(m.mtime)),
            ..Timestamps::default()
        }
    }

    fn stat_attribute(&self) -> VfsResult<Option<StatAttribute>> {
        Ok(self.member().map(|m| StatAttribute {
            inode_number: Some(m.inode),
            mode: Some(m.mode & 0o7777),
            owner_identifier: Some(m.uid),
            group_identifier: Some(m.gid),
            number_of_links: Some(m.nlink),
            size: Some(m.data_size),
            file_type: m.entry_type(),
        }))
    }

    fn directory(&self) -> VfsResult<Option<Box<dyn Directory>>> {
        if self.entry_type() != Some(FileEntryType::Directory) {
            return Ok(None);
        }
        Ok(Some(Box::new(CpioDirectory {
            container: self.container.clone(),
            archive: Arc::clone(&self.archive),
            path: self.path().to_string(),
        })))
    }

    fn link_target(&self) -> VfsResult<Option<String>> {
        Ok(self.member().and_then(|m| m.link_target.clone()))
    }

    fn parent_path_spec(&self) -> Option<PathSpec> {
        if self.is_root() {
            return None;
        }
        Some(
            self.container
                .with_location(parent_of(self.path())),
        )
    }
}

struct CpioDirectory {
    container: PathSpec,
    archive: Arc<Archive>,
    path: String,
}

impl Directory for CpioDirectory {
    fn entries(&self) -> VfsResult<DirectoryEntries> {
        let children: Vec<String> = self
            .archive
            .children
            .get(&self.path)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default();
        let container = self.container.clone();
        Ok(Box::new(
            children
                .into_iter()
                .map(move |path| Ok(container.with_location(path))),
        ))
    }
}
