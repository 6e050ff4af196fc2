//! Capability traits every format driver implements.
//!
//! A driver hands out three kinds of resources: [`FileSystem`]s,
//! [`VolumeSystem`](super::VolumeSystem)s and
//! [`ByteSource`](super::ByteSource)s. All of them live in the resolver's
//! caches and are closed exactly once, when the last handle goes away or the
//! resolver is drained.

use std::sync::Arc;

use layerfs_types::PathSpec;

use super::source::ByteSource;
use super::types::{Attribute, DataStream, FileEntryType, StatAttribute, Timestamps};
use super::volume::VolumeExtent;
use super::VfsResult;

/// An opened native resource owned by a cache.
pub trait Resource: Send + Sync + 'static {
    /// Release native handles. Must be idempotent and safe after a failed
    /// open.
    fn close(&self) {}
}

/// An opened container bound to one path-spec layer.
///
/// Implementations only know how to look entries up. Navigation between
/// entries, memoization and reference counting live in
/// [`FileEntry`](super::FileEntry).
pub trait FileSystem: Resource {
    fn type_indicator(&self) -> &str;

    /// The container key this file system was opened for.
    fn path_spec(&self) -> &PathSpec;

    fn path_separator(&self) -> char {
        '/'
    }

    /// Path spec of the root entry.
    fn root_path_spec(&self) -> PathSpec {
        self.path_spec()
            .with_location(self.path_separator().to_string())
    }

    /// Find the entry addressed by `path_spec`.
    ///
    /// `Ok(None)` means the container is readable but holds no such entry.
    /// When both an identifier and a location are present the identifier
    /// wins; the location is only used to derive the name.
    fn lookup(&self, path_spec: &PathSpec) -> VfsResult<Option<Box<dyn FileEntryBackend>>>;

    /// Open the data stream selected by `path_spec` (default stream when no
    /// `data_stream` parameter is present).
    fn open_data_stream(&self, path_spec: &PathSpec) -> VfsResult<Arc<dyn ByteSource>> {
        let _ = path_spec;
        Err(super::VfsError::unsupported(format!(
            "{} file system has no data streams",
            self.type_indicator()
        )))
    }

    fn file_entry_exists(&self, path_spec: &PathSpec) -> VfsResult<bool> {
        Ok(self.lookup(path_spec)?.is_some())
    }

    /// Last path segment, ignoring trailing separators.
    fn basename<'a>(&self, path: &'a str) -> &'a str {
        let separator = self.path_separator();
        let trimmed = path.trim_end_matches(separator);
        match trimmed.rfind(separator) {
            Some(pos) => &trimmed[pos + separator.len_utf8()..],
            None => trimmed,
        }
    }

    /// Everything before the last segment. The dirname of a top-level entry
    /// is the separator itself.
    fn dirname(&self, path: &str) -> String {
        let separator = self.path_separator();
        let trimmed = path.trim_end_matches(separator);
        match trimmed.rfind(separator) {
            Some(0) => separator.to_string(),
            Some(pos) => trimmed[..pos].to_string(),
            None => String::new(),
        }
    }

    /// Non-empty segments of `path`.
    fn split_path(&self, path: &str) -> Vec<String> {
        path.split(self.path_separator())
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Join segments into an absolute path.
    fn join_path(&self, segments: &[&str]) -> String {
        let separator = self.path_separator();
        let mut path = String::new();
        for segment in segments {
            let segment = segment.trim_matches(separator);
            if segment.is_empty() {
                continue;
            }
            path.push(separator);
            path.push_str(segment);
        }
        if path.is_empty() {
            path.push(separator);
        }
        path
    }
}

/// Driver-side view of one entry. Wrapped by [`FileEntry`](super::FileEntry).
///
/// Every property a format cannot determine is `None`; never substitute a
/// zero that would look like a real value.
pub trait FileEntryBackend: Send + Sync {
    fn path_spec(&self) -> &PathSpec;

    fn entry_type(&self) -> Option<FileEntryType>;

    /// Name derived from the location; `None` when only an identifier was
    /// given.
    fn name(&self) -> Option<String>;

    fn is_root(&self) -> bool {
        false
    }

    /// Synthesized node with no on-disk counterpart.
    fn is_virtual(&self) -> bool {
        false
    }

    fn is_allocated(&self) -> bool {
        true
    }

    fn size(&self) -> Option<u64> {
        None
    }

    fn timestamps(&self) -> Timestamps {
        Timestamps::default()
    }

    fn stat_attribute(&self) -> VfsResult<Option<StatAttribute>> {
        Ok(None)
    }

    fn attributes(&self) -> VfsResult<Vec<Attribute>> {
        Ok(Vec::new())
    }

    /// Files carry a single unnamed stream unless the format says otherwise.
    fn data_streams(&self) -> VfsResult<Vec<DataStream>> {
        match self.entry_type() {
            Some(FileEntryType::File) => Ok(vec![DataStream::default()]),
            _ => Ok(Vec::new()),
        }
    }

    /// Where the default stream's bytes sit in the parent layer. Empty when
    /// the format does not store them contiguously or has no data.
    fn extents(&self) -> VfsResult<Vec<VolumeExtent>> {
        Ok(Vec::new())
    }

    /// Child enumerator; `None` for anything that is not a directory.
    fn directory(&self) -> VfsResult<Option<Box<dyn Directory>>> {
        Ok(None)
    }

    /// Raw link target as stored by the format.
    fn link_target(&self) -> VfsResult<Option<String>> {
        Ok(None)
    }

    /// Explicit parent spec. `None` lets the caller derive it from the
    /// location.
    fn parent_path_spec(&self) -> Option<PathSpec> {
        None
    }

    /// Explicit link destination. `None` lets the caller resolve
    /// [`link_target`](Self::link_target).
    fn linked_path_spec(&self) -> VfsResult<Option<PathSpec>> {
        Ok(None)
    }
}

/// Child path specs of one entry.
pub type DirectoryEntries = Box<dyn Iterator<Item = VfsResult<PathSpec>> + Send>;

/// Lazy enumerator over the direct children of a directory entry.
pub trait Directory: Send + Sync {
    /// Walk the underlying structure again. Every call starts from scratch.
    fn entries(&self) -> VfsResult<DirectoryEntries>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare {
        spec: PathSpec,
    }

    impl Resource for Bare {}

    impl FileSystem for Bare {
        fn type_indicator(&self) -> &str {
            "bare"
        }

        fn path_spec(&self) -> &PathSpec {
            &self.spec
        }

        fn lookup(&self, _: &PathSpec) -> VfsResult<Option<Box<dyn FileEntryBackend>>> {
            Ok(None)
        }
    }

    struct Backslash(Bare);

    impl Resource for Backslash {}

    impl FileSystem for Backslash {
        fn type_indicator(&self) -> &str {
            "backslash"
        }

        fn path_spec(&self) -> &PathSpec {
            &self.0.spec
        }

        fn path_separator(&self) -> char {
            '\\'
        }

        fn lookup(&self, _: &PathSpec) -> VfsResult<Option<Box<dyn FileEntryBackend>>> {
            Ok(None)
        }
    }

    fn bare() -> Bare {
        Bare {
            spec: PathSpec::builder("bare").build().unwrap(),
        }
    }

    #[test]
    fn test_basename_dirname() {
        let fs = bare();
        assert_eq!(fs.basename("/a/b/c"), "c");
        assert_eq!(fs.basename("/a/b/"), "b");
        assert_eq!(fs.basename("c"), "c");
        assert_eq!(fs.basename("/"), "");
        assert_eq!(fs.dirname("/a/b/c"), "/a/b");
        assert_eq!(fs.dirname("/a"), "/");
        assert_eq!(fs.dirname("a"), "");
    }

    #[test]
    fn test_split_join() {
        let fs = bare();
        assert_eq!(fs.split_path("/a//b/"), vec!["a", "b"]);
        assert_eq!(fs.join_path(&["a", "/b/", "c"]), "/a/b/c");
        assert_eq!(fs.join_path(&[]), "/");
    }

    #[test]
    fn test_custom_separator() {
        let fs = Backslash(bare());
        assert_eq!(fs.basename("\\Windows\\System32"), "System32");
        assert_eq!(fs.dirname("\\Windows\\System32"), "\\Windows");
        assert_eq!(fs.root_path_spec().location(), Some("\\"));
    }

    #[test]
    fn test_root_path_spec_and_missing_streams() {
        let fs = bare();
        assert_eq!(fs.root_path_spec().location(), Some("/"));
        assert!(!fs.file_entry_exists(&fs.root_path_spec()).unwrap());
        assert!(fs.open_data_stream(&fs.root_path_spec()).is_err());
    }
}
