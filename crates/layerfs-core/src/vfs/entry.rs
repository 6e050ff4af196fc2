//! File entries: caller-owned views of one node inside an opened file system.
//!
//! A [`FileEntry`] holds a handle to its file system, so the file system
//! stays cached for as long as any entry (or sub-entry iterator) is alive.
//! Derived properties are computed on first access and memoized on the
//! instance only.

use std::fmt;
use std::sync::OnceLock;

use layerfs_types::type_indicator::DATA_STREAM;
use layerfs_types::PathSpec;

use super::cache::CacheHandle;
use super::ops::{DirectoryEntries, FileEntryBackend, FileSystem};
use super::source::FileObject;
use super::types::{
    Attribute, DataStream, FileEntryType, Stat, StatAttribute, Timestamp, Timestamps,
};
use super::volume::VolumeExtent;
use super::{VfsError, VfsResult};

/// Scoped reference to a cached file system.
pub type FileSystemHandle = CacheHandle<dyn FileSystem>;

impl CacheHandle<dyn FileSystem> {
    /// Look up the entry addressed by `path_spec`.
    ///
    /// `path_spec` must address this file system. Absence is
    /// [`VfsError::NotFound`], distinct from the container being unreadable.
    pub fn get_file_entry_by_path_spec(&self, path_spec: &PathSpec) -> VfsResult<FileEntry> {
        if path_spec.container_key() != *self.key() {
            return Err(VfsError::path_spec(format!(
                "{path_spec} does not address file system {}",
                self.key()
            )));
        }
        match self.lookup(path_spec)? {
            Some(backend) => Ok(FileEntry::new(self.clone(), backend)),
            None => Err(VfsError::not_found(path_spec.to_string())),
        }
    }

    pub fn get_root_file_entry(&self) -> VfsResult<FileEntry> {
        self.get_file_entry_by_path_spec(&self.root_path_spec())
    }
}

/// One node of a file system.
pub struct FileEntry {
    file_system: FileSystemHandle,
    backend: Box<dyn FileEntryBackend>,
    stat_attribute: OnceLock<Option<StatAttribute>>,
    attributes: OnceLock<Vec<Attribute>>,
    data_streams: OnceLock<Vec<DataStream>>,
    link: OnceLock<Option<String>>,
}

impl FileEntry {
    pub fn new(file_system: FileSystemHandle, backend: Box<dyn FileEntryBackend>) -> Self {
        Self {
            file_system,
            backend,
            stat_attribute: OnceLock::new(),
            attributes: OnceLock::new(),
            data_streams: OnceLock::new(),
            link: OnceLock::new(),
        }
    }

    pub fn path_spec(&self) -> &PathSpec {
        self.backend.path_spec()
    }

    pub fn file_system(&self) -> &FileSystemHandle {
        &self.file_system
    }

    // ========================================================================
    // Properties
    // ========================================================================

    pub fn entry_type(&self) -> Option<FileEntryType> {
        self.backend.entry_type()
    }

    pub fn is_file(&self) -> bool {
        self.entry_type() == Some(FileEntryType::File)
    }

    pub fn is_directory(&self) -> bool {
        self.entry_type() == Some(FileEntryType::Directory)
    }

    pub fn is_link(&self) -> bool {
        self.entry_type() == Some(FileEntryType::Link)
    }

    pub fn is_device(&self) -> bool {
        self.entry_type() == Some(FileEntryType::Device)
    }

    pub fn is_pipe(&self) -> bool {
        self.entry_type() == Some(FileEntryType::Pipe)
    }

    pub fn is_socket(&self) -> bool {
        self.entry_type() == Some(FileEntryType::Socket)
    }

    /// Entry name; `None` when it cannot be derived (identifier-only
    /// lookups).
    pub fn name(&self) -> Option<String> {
        self.backend.name()
    }

    pub fn size(&self) -> Option<u64> {
        self.backend.size()
    }

    pub fn timestamps(&self) -> Timestamps {
        self.backend.timestamps()
    }

    pub fn access_time(&self) -> Option<Timestamp> {
        self.timestamps().access
    }

    pub fn modification_time(&self) -> Option<Timestamp> {
        self.timestamps().modification
    }

    pub fn change_time(&self) -> Option<Timestamp> {
        self.timestamps().change
    }

    pub fn creation_time(&self) -> Option<Timestamp> {
        self.timestamps().creation
    }

    pub fn added_time(&self) -> Option<Timestamp> {
        self.timestamps().added
    }

    pub fn is_root(&self) -> bool {
        self.backend.is_root()
    }

    pub fn is_virtual(&self) -> bool {
        self.backend.is_virtual()
    }

    pub fn is_allocated(&self) -> bool {
        self.backend.is_allocated()
    }

    // ========================================================================
    // Stat
    // ========================================================================

    pub fn get_stat_attribute(&self) -> VfsResult<Option<&StatAttribute>> {
        if let Some(cached) = self.stat_attribute.get() {
            return Ok(cached.as_ref());
        }
        let computed = self.backend.stat_attribute()?;
        Ok(self.stat_attribute.get_or_init(|| computed).as_ref())
    }

    /// Flattened stat view, or `None` when the format reports nothing at all.
    pub fn get_stat(&self) -> VfsResult<Option<Stat>> {
        let attribute = self.get_stat_attribute()?;
        let timestamps = self.timestamps();
        let file_type = self.entry_type();
        if attribute.is_none() && file_type.is_none() && timestamps == Timestamps::default() {
            return Ok(None);
        }

        let attribute = attribute.cloned().unwrap_or_default();
        Ok(Some(Stat {
            file_type: file_type.or(attribute.file_type),
            size: attribute.size.or_else(|| self.size()),
            mode: attribute.mode,
            uid: attribute.owner_identifier,
            gid: attribute.group_identifier,
            ino: attribute.inode_number,
            nlink: attribute.number_of_links,
            atime: timestamps.access,
            mtime: timestamps.modification,
            ctime: timestamps.change,
            crtime: timestamps.creation,
            is_allocated: self.is_allocated(),
        }))
    }

    // ========================================================================
    // Extended attributes and data streams
    // ========================================================================

    pub fn get_attributes(&self) -> VfsResult<&[Attribute]> {
        if let Some(cached) = self.attributes.get() {
            return Ok(cached);
        }
        let computed = self.backend.attributes()?;
        Ok(self.attributes.get_or_init(|| computed))
    }

    pub fn number_of_attributes(&self) -> VfsResult<usize> {
        Ok(self.get_attributes()?.len())
    }

    pub fn get_data_streams(&self) -> VfsResult<&[DataStream]> {
        if let Some(cached) = self.data_streams.get() {
            return Ok(cached);
        }
        let computed = self.backend.data_streams()?;
        Ok(self.data_streams.get_or_init(|| computed))
    }

    pub fn number_of_data_streams(&self) -> VfsResult<usize> {
        Ok(self.get_data_streams()?.len())
    }

    /// The stream called `name`, `""` being the default stream.
    pub fn get_data_stream(&self, name: &str) -> VfsResult<Option<&DataStream>> {
        Ok(self.get_data_streams()?.iter().find(|s| s.name == name))
    }

    pub fn has_data_stream(&self, name: &str) -> VfsResult<bool> {
        Ok(self.get_data_stream(name)?.is_some())
    }

    /// Open the stream called `name` for reading, `""` being the default
    /// stream.
    ///
    /// `None` when the entry has no such stream, which includes every
    /// directory.
    pub fn get_file_object(&self, name: &str) -> VfsResult<Option<FileObject>> {
        if !self.has_data_stream(name)? {
            return Ok(None);
        }
        let path_spec = if name.is_empty() {
            self.path_spec().without_parameter(DATA_STREAM)
        } else {
            self.path_spec().with_data_stream(name)
        };
        let source = self.file_system.open_data_stream(&path_spec)?;
        Ok(Some(FileObject::from_stream(path_spec, source)))
    }

    /// Byte extents of the default stream within the parent layer.
    pub fn get_extents(&self) -> VfsResult<Vec<VolumeExtent>> {
        self.backend.extents()
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Children of a directory; empty for every other type.
    ///
    /// Each call walks the directory again.
    pub fn get_sub_file_entries(&self) -> VfsResult<SubFileEntries> {
        let entries = match self.backend.directory()? {
            Some(directory) => Some(directory.entries()?),
            None => None,
        };
        Ok(SubFileEntries {
            file_system: self.file_system.clone(),
            entries,
        })
    }

    pub fn number_of_sub_file_entries(&self) -> VfsResult<usize> {
        let mut count = 0;
        for entry in self.get_sub_file_entries()? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    pub fn get_sub_file_entry_by_name(&self, name: &str) -> VfsResult<FileEntry> {
        for entry in self.get_sub_file_entries()? {
            let entry = entry?;
            if entry.name().as_deref() == Some(name) {
                return Ok(entry);
            }
        }
        Err(VfsError::not_found(format!("{name} in {}", self.path_spec())))
    }

    /// The containing directory. Not found for the root, or when the entry
    /// was addressed without a location and the format cannot tell.
    pub fn get_parent_file_entry(&self) -> VfsResult<FileEntry> {
        if self.is_root() {
            return Err(VfsError::not_found(format!(
                "{} is the root and has no parent",
                self.path_spec()
            )));
        }

        let parent = match self.backend.parent_path_spec() {
            Some(spec) => spec,
            None => {
                let Some(location) = self.path_spec().location() else {
                    return Err(VfsError::not_found(format!(
                        "parent of {} (no location)",
                        self.path_spec()
                    )));
                };
                let dirname = self.file_system.dirname(location);
                if dirname.is_empty() {
                    return Err(VfsError::not_found(format!("parent of {location}")));
                }
                self.file_system.path_spec().with_location(dirname)
            }
        };
        self.file_system.get_file_entry_by_path_spec(&parent)
    }

    /// Raw link target, memoized.
    pub fn link(&self) -> VfsResult<Option<&str>> {
        if let Some(cached) = self.link.get() {
            return Ok(cached.as_deref());
        }
        let computed = self.backend.link_target()?;
        Ok(self.link.get_or_init(|| computed).as_deref())
    }

    /// Follow a link to the entry it points at.
    ///
    /// Relative targets resolve against the directory holding the link.
    pub fn get_linked_file_entry(&self) -> VfsResult<FileEntry> {
        if !self.is_link() {
            return Err(VfsError::not_found(format!("{} is not a link", self.path_spec())));
        }
        if let Some(spec) = self.backend.linked_path_spec()? {
            return self.file_system.get_file_entry_by_path_spec(&spec);
        }

        let Some(target) = self.link()? else {
            return Err(VfsError::not_found(format!("link target of {}", self.path_spec())));
        };
        let separator = self.file_system.path_separator();
        let absolute = if target.starts_with(separator) {
            target.to_string()
        } else {
            let base = self
                .path_spec()
                .location()
                .map(|location| self.file_system.dirname(location))
                .unwrap_or_else(|| separator.to_string());
            format!("{base}{separator}{target}")
        };
        let location = normalize(&absolute, separator);
        let spec = self.file_system.path_spec().with_location(location);
        self.file_system.get_file_entry_by_path_spec(&spec)
    }
}

impl fmt::Debug for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEntry")
            .field("path_spec", self.path_spec())
            .field("entry_type", &self.entry_type())
            .finish()
    }
}

/// Collapse `.`, `..` and repeated separators in an absolute path.
fn normalize(path: &str, separator: char) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(separator) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    let mut out = String::new();
    for segment in segments {
        out.push(separator);
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push(separator);
    }
    out
}

/// Iterator over the children of a directory entry.
///
/// Keeps the file system referenced until dropped.
pub struct SubFileEntries {
    file_system: FileSystemHandle,
    entries: Option<DirectoryEntries>,
}

impl Iterator for SubFileEntries {
    type Item = VfsResult<FileEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let spec = match self.entries.as_mut()?.next()? {
            Ok(spec) => spec,
            Err(e) => return Some(Err(e)),
        };
        Some(self.file_system.get_file_entry_by_path_spec(&spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/a/b/../c", '/'), "/a/c");
        assert_eq!(normalize("/a/./b//", '/'), "/a/b");
        assert_eq!(normalize("/../..", '/'), "/");
        assert_eq!(normalize("\\a\\..\\b", '\\'), "\\b");
    }
}
