//! Host operating system driver (`os`).
//!
//! The bottom layer of most chains. Locations are host paths. An optional
//! root confines every location to one directory tree.

use std::fs::{self, File, Metadata};
use std::io;
use std::os::unix::fs::{FileExt, FileTypeExt, MetadataExt};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use layerfs_types::type_indicator::OS;
use layerfs_types::PathSpec;

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::{Directory, DirectoryEntries, FileEntryBackend, FileSystem, Resource};
use crate::vfs::registry::Driver;
use crate::vfs::resolver::Resolver;
use crate::vfs::source::ByteSource;
use crate::vfs::types::{FileEntryType, StatAttribute, Timestamp, Timestamps};

/// Driver for the `os` type indicator.
#[derive(Debug, Clone, Default)]
pub struct OsDriver {
    root: Option<PathBuf>,
}

impl OsDriver {
    /// Unconfined host access.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only locations under `root` are reachable.
    ///
    /// The root is canonicalized at construction time to handle symlinks
    /// (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn confined(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Self { root: Some(root) }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }
}

/// Map `location` to a host path, checking it against the confinement root.
///
/// Trailing separators are stripped so the last component itself is
/// examined (a symlink named with a trailing `/` is still a symlink). Under
/// a root, symlinks are resolved before the containment check: every
/// component but the last always, the last only when `follow_leaf` is set.
fn host_path(root: Option<&Path>, location: &str, follow_leaf: bool) -> VfsResult<PathBuf> {
    if !location.starts_with('/') {
        return Err(VfsError::path_spec(format!(
            "os location must be absolute: {location}"
        )));
    }
    let trimmed = location.trim_end_matches('/');
    let path = PathBuf::from(if trimmed.is_empty() { "/" } else { trimmed });

    let Some(root) = root else {
        return Ok(path);
    };
    let outside = || VfsError::path_spec(format!("{location} is not under {}", root.display()));
    if !lexical_normalize(&path).starts_with(root) {
        return Err(outside());
    }

    let resolved = match (follow_leaf, path.parent(), path.file_name()) {
        (false, Some(parent), Some(name)) => dunce::canonicalize(parent).map(|p| p.join(name)),
        _ => dunce::canonicalize(&path),
    }
    .map_err(|e| match e.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => {
            VfsError::not_found(location.to_string())
        }
        _ => VfsError::path_spec(format!("{location}: {e}")),
    })?;
    if !resolved.starts_with(root) {
        return Err(outside());
    }
    Ok(resolved)
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(s) => normalized.push(s),
            _ => {}
        }
    }
    normalized
}

fn io_error(path_spec: &PathSpec, e: io::Error) -> VfsError {
    match e.kind() {
        io::ErrorKind::NotFound => VfsError::not_found(path_spec.to_string()),
        _ => VfsError::back_end(path_spec, e.to_string()),
    }
}

impl Driver for OsDriver {
    fn type_indicator(&self) -> &str {
        OS
    }

    fn requires_parent(&self) -> bool {
        false
    }

    fn open_file_system(
        &self,
        _resolver: &Resolver,
        path_spec: &PathSpec,
    ) -> VfsResult<Arc<dyn FileSystem>> {
        Ok(Arc::new(OsFileSystem {
            path_spec: path_spec.clone(),
            root: self.root.clone(),
        }))
    }

    fn open_source(
        &self,
        _resolver: &Resolver,
        path_spec: &PathSpec,
    ) -> VfsResult<Arc<dyn ByteSource>> {
        open_host_file(self.root.as_deref(), path_spec)
    }
}

fn open_host_file(root: Option<&Path>, path_spec: &PathSpec) -> VfsResult<Arc<dyn ByteSource>> {
    let location = path_spec
        .location()
        .ok_or_else(|| VfsError::path_spec("os layer is missing parameter location"))?;
    if path_spec.data_stream().is_some_and(|name| !name.is_empty()) {
        return Err(VfsError::not_found(format!(
            "{location}: named data streams are not supported"
        )));
    }
    let path = host_path(root, location, true)?;
    let file = File::open(&path).map_err(|e| io_error(path_spec, e))?;
    let metadata = file.metadata().map_err(|e| io_error(path_spec, e))?;
    if metadata.is_dir() {
        return Err(VfsError::not_found(format!("{location} is a directory")));
    }
    trace!(path = %path.display(), size = metadata.len(), "opened host file");
    Ok(Arc::new(OsSource {
        file: RwLock::new(Some(file)),
        size: metadata.len(),
    }))
}

/// An open host file.
pub struct OsSource {
    file: RwLock<Option<File>>,
    size: u64,
}

impl Resource for OsSource {
    fn close(&self) {
        self.file.write().take();
    }
}

impl ByteSource for OsSource {
    fn size(&self) -> VfsResult<u64> {
        Ok(self.size)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> VfsResult<usize> {
        let guard = self.file.read();
        let file = guard
            .as_ref()
            .ok_or_else(|| VfsError::Io(io::Error::other("host file is closed")))?;
        loop {
            match file.read_at(buf, offset) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => return Ok(result?),
            }
        }
    }
}

/// The host file system as seen through one `os` container key.
#[derive(Debug)]
pub struct OsFileSystem {
    path_spec: PathSpec,
    root: Option<PathBuf>,
}

impl Resource for OsFileSystem {}

impl FileSystem for OsFileSystem {
    fn type_indicator(&self) -> &str {
        OS
    }

    fn path_spec(&self) -> &PathSpec {
        &self.path_spec
    }

    fn root_path_spec(&self) -> PathSpec {
        let root = match &self.root {
            Some(root) => root.to_string_lossy().into_owned(),
            None => "/".to_string(),
        };
        self.path_spec.with_location(root)
    }

    fn lookup(&self, path_spec: &PathSpec) -> VfsResult<Option<Box<dyn FileEntryBackend>>> {
        let Some(location) = path_spec.location() else {
            return Err(VfsError::path_spec("os entries are addressed by location"));
        };
        let path = match host_path(self.root.as_deref(), location, false) {
            Ok(path) => path,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(VfsError::back_end(path_spec, e.to_string())),
        };
        let is_root = match &self.root {
            Some(root) => path == *root,
            None => path == Path::new("/"),
        };
        Ok(Some(Box::new(OsEntry {
            path_spec: path_spec.clone(),
            container: self.path_spec.clone(),
            path,
            metadata,
            is_root,
        })))
    }

    fn open_data_stream(&self, path_spec: &PathSpec) -> VfsResult<Arc<dyn ByteSource>> {
        open_host_file(self.root.as_deref(), path_spec)
    }
}

struct OsEntry {
    path_spec: PathSpec,
    container: PathSpec,
    path: PathBuf,
    metadata: Metadata,
    is_root: bool,
}

fn timestamp(seconds: i64, nanoseconds: i64) -> Timestamp {
    Timestamp::from_parts(seconds, nanoseconds.clamp(0, 999_999_999) as u32)
}

impl FileEntryBackend for OsEntry {
    fn path_spec(&self) -> &PathSpec {
        &self.path_spec
    }

    /// Symlinks are checked first so a link to a directory reports as a link.
    fn entry_type(&self) -> Option<FileEntryType> {
        let file_type = self.metadata.file_type();
        if file_type.is_symlink() {
            Some(FileEntryType::Link)
        } else if file_type.is_dir() {
            Some(FileEntryType::Directory)
        } else if file_type.is_file() {
            Some(FileEntryType::File)
        } else if file_type.is_block_device() || file_type.is_char_device() {
            Some(FileEntryType::Device)
        } else if file_type.is_fifo() {
            Some(FileEntryType::Pipe)
        } else if file_type.is_socket() {
            Some(FileEntryType::Socket)
        } else {
            None
        }
    }

    fn name(&self) -> Option<String> {
        if self.is_root {
            return Some(String::new());
        }
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }

    fn is_root(&self) -> bool {
        self.is_root
    }

    fn size(&self) -> Option<u64> {
        Some(self.metadata.len())
    }

    fn timestamps(&self) -> Timestamps {
        let m = &self.metadata;
        Timestamps {
            access: Some(timestamp(m.atime(), m.atime_nsec())),
            modification: Some(timestamp(m.mtime(), m.mtime_nsec())),
            change: Some(timestamp(m.ctime(), m.ctime_nsec())),
            creation: m.created().ok().map(Timestamp::from_system_time),
            added: None,
        }
    }

    fn stat_attribute(&self) -> VfsResult<Option<StatAttribute>> {
        let m = &self.metadata;
        Ok(Some(StatAttribute {
            inode_number: Some(m.ino()),
            mode: Some(m.mode() & 0o7777),
            owner_identifier: Some(m.uid()),
            group_identifier: Some(m.gid()),
            number_of_links: Some(m.nlink()),
            size: Some(m.len()),
            file_type: self.entry_type(),
        }))
    }

    fn directory(&self) -> VfsResult<Option<Box<dyn Directory>>> {
        if !self.metadata.is_dir() {
            return Ok(None);
        }
        Ok(Some(Box::new(OsDirectory {
            path_spec: self.path_spec.clone(),
            container: self.container.clone(),
            path: self.path.clone(),
        })))
    }

    fn link_target(&self) -> VfsResult<Option<String>> {
        if !self.metadata.file_type().is_symlink() {
            return Ok(None);
        }
        let target = fs::read_link(&self.path)
            .map_err(|e| VfsError::back_end(&self.path_spec, e.to_string()))?;
        Ok(Some(target.to_string_lossy().into_owned()))
    }
}

struct OsDirectory {
    path_spec: PathSpec,
    container: PathSpec,
    path: PathBuf,
}

impl Directory for OsDirectory {
    fn entries(&self) -> VfsResult<DirectoryEntries> {
        let read_dir = fs::read_dir(&self.path)
            .map_err(|e| VfsError::back_end(&self.path_spec, e.to_string()))?;
        let container = self.container.clone();
        let path_spec = self.path_spec.clone();
        Ok(Box::new(read_dir.map(move |entry| {
            let entry = entry.map_err(|e| VfsError::back_end(&path_spec, e.to_string()))?;
            let location = entry.path().to_string_lossy().into_owned();
            Ok(container.with_location(location))
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::registry::DriverRegistry;
    use std::io::Read;
    use tempfile::TempDir;

    fn resolver(driver: OsDriver) -> Resolver {
        let registry = DriverRegistry::new();
        registry.register(Arc::new(driver)).unwrap();
        Resolver::new(Arc::new(registry))
    }

    fn location(dir: &TempDir, name: &str) -> String {
        dunce::canonicalize(dir.path()).unwrap().join(name).to_string_lossy().into_owned()
    }

    #[test]
    fn test_stat_regular_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("hello.txt"), b"hello, world").unwrap();
        let resolver = resolver(OsDriver::new());

        let spec = PathSpec::os(location(&dir, "hello.txt"));
        let entry = resolver.get_file_entry(&spec).unwrap();
        assert!(entry.is_file());
        assert_eq!(entry.name().as_deref(), Some("hello.txt"));
        assert_eq!(entry.size(), Some(12));
        let stat = entry.get_stat().unwrap().unwrap();
        assert_eq!(stat.size, Some(12));
        assert!(stat.mtime.is_some());
        assert_eq!(entry.number_of_data_streams().unwrap(), 1);

        let mut contents = String::new();
        resolver
            .open_file_object(&spec)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "hello, world");
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(OsDriver::new());
        let spec = PathSpec::os(location(&dir, "absent"));
        assert!(resolver.get_file_entry(&spec).unwrap_err().is_not_found());
        assert!(resolver.open_source(&spec).unwrap_err().is_not_found());
    }

    #[test]
    fn test_confinement() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("inside"), b"x").unwrap();
        let resolver = resolver(OsDriver::confined(dir.path()));

        assert!(resolver
            .get_file_entry(&PathSpec::os(location(&dir, "inside")))
            .is_ok());
        let escape = PathSpec::os(location(&dir, "../etc/passwd"));
        assert!(matches!(
            resolver.get_file_entry(&escape),
            Err(VfsError::PathSpec(_))
        ));
    }

    #[test]
    fn test_confinement_resolves_symlinks() {
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret"), b"top secret").unwrap();
        let jail = TempDir::new().unwrap();
        fs::write(jail.path().join("inside"), b"fine").unwrap();
        std::os::unix::fs::symlink(outside.path(), jail.path().join("escape")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret"), jail.path().join("leak")).unwrap();
        std::os::unix::fs::symlink(jail.path().join("inside"), jail.path().join("alias")).unwrap();
        let resolver = resolver(OsDriver::confined(jail.path()));

        // A directory symlink in the middle of the path.
        let through = PathSpec::os(location(&jail, "escape/secret"));
        assert!(matches!(
            resolver.get_file_entry(&through),
            Err(VfsError::PathSpec(_))
        ));
        let err = resolver.open_source(&through).unwrap_err();
        assert!(matches!(err.root_cause(), VfsError::PathSpec(_)));

        // A file symlink as the leaf is visible as a link but not readable.
        let leak = PathSpec::os(location(&jail, "leak"));
        let entry = resolver.get_file_entry(&leak).unwrap();
        assert!(entry.is_link());
        let err = resolver.open_source(&leak).unwrap_err();
        assert!(matches!(err.root_cause(), VfsError::PathSpec(_)));
        assert!(entry.get_linked_file_entry().is_err());

        // Links that stay inside the root keep working.
        let alias = PathSpec::os(location(&jail, "alias"));
        let data = resolver.open_file_object(&alias).unwrap().read_to_vec().unwrap();
        assert_eq!(data, b"fine");

        let missing = PathSpec::os(location(&jail, "nowhere/file"));
        assert!(!resolver.file_entry_exists(&missing).unwrap());
    }

    #[test]
    fn test_relative_location_rejected() {
        let resolver = resolver(OsDriver::new());
        assert!(matches!(
            resolver.get_file_entry(&PathSpec::os("relative/path")),
            Err(VfsError::PathSpec(_))
        ));
    }
}
