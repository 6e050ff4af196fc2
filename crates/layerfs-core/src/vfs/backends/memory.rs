//! In-memory file system driver (`fake`).
//!
//! Used for testing and synthesized trees. Every node carries a native
//! identifier so lookups can be made by identifier, by location, or both.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use layerfs_types::type_indicator::FAKE;
use layerfs_types::PathSpec;

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::{Directory, DirectoryEntries, FileEntryBackend, FileSystem, Resource};
use crate::vfs::registry::Driver;
use crate::vfs::resolver::Resolver;
use crate::vfs::source::{ByteSource, BytesSource};
use crate::vfs::types::{
    Attribute, DataStream, FileEntryType, StatAttribute, Timestamp, Timestamps,
};

/// Identifier of the root directory.
pub const ROOT_IDENTIFIER: u64 = 1;

#[derive(Debug, Clone)]
enum NodeKind {
    File {
        data: Arc<[u8]>,
        streams: BTreeMap<String, Arc<[u8]>>,
    },
    Directory,
    Symlink {
        target: String,
    },
}

#[derive(Debug, Clone)]
struct Node {
    identifier: u64,
    kind: NodeKind,
    mode: u32,
    owner: Option<(u32, u32)>,
    modified: Option<Timestamp>,
    added: Option<Timestamp>,
    xattrs: Vec<Attribute>,
}

impl Node {
    fn new(identifier: u64, kind: NodeKind, mode: u32) -> Self {
        Self {
            identifier,
            kind,
            mode,
            owner: None,
            modified: None,
            added: None,
            xattrs: Vec::new(),
        }
    }

    fn entry_type(&self) -> FileEntryType {
        match self.kind {
            NodeKind::File { .. } => FileEntryType::File,
            NodeKind::Directory => FileEntryType::Directory,
            NodeKind::Symlink { .. } => FileEntryType::Link,
        }
    }
}

#[derive(Debug)]
struct TreeState {
    nodes: BTreeMap<String, Node>,
    paths: HashMap<u64, String>,
    next_identifier: u64,
}

/// In-memory tree shared by every file system the `fake` driver opens.
///
/// Thread-safe via internal `RwLock`. Paths are absolute and `/`-separated.
#[derive(Debug)]
pub struct MemoryTree {
    state: RwLock<TreeState>,
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTree {
    /// Create a tree holding only the root directory.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node::new(ROOT_IDENTIFIER, NodeKind::Directory, 0o755),
        );
        let mut paths = HashMap::new();
        paths.insert(ROOT_IDENTIFIER, "/".to_string());
        Self {
            state: RwLock::new(TreeState {
                nodes,
                paths,
                next_identifier: ROOT_IDENTIFIER + 1,
            }),
        }
    }

    /// Normalize a path: leading `/`, no trailing `/`, `.` and `..` resolved.
    fn normalize(path: &str) -> String {
        let mut segments: Vec<&str> = Vec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other),
            }
        }
        format!("/{}", segments.join("/"))
    }

    fn insert(&self, path: &str, kind: NodeKind, mode: u32) -> VfsResult<u64> {
        let path = Self::normalize(path);
        if path == "/" {
            return Err(VfsError::path_spec("cannot replace the root directory"));
        }
        let mut guard = self.state.write();
        let state = &mut *guard;

        // Ensure all parent directories exist.
        let mut current = String::new();
        let segments: Vec<&str> = path[1..].split('/').collect();
        for segment in &segments[..segments.len() - 1] {
            current.push('/');
            current.push_str(segment);
            match state.nodes.get(&current).map(Node::entry_type) {
                Some(FileEntryType::Directory) => {}
                Some(_) => {
                    return Err(VfsError::path_spec(format!("{current} is not a directory")));
                }
                None => {
                    let identifier = state.next_identifier;
                    state.next_identifier += 1;
                    state.paths.insert(identifier, current.clone());
                    state.nodes.insert(
                        current.clone(),
                        Node::new(identifier, NodeKind::Directory, 0o755),
                    );
                }
            }
        }

        let identifier = match state.nodes.get(&path) {
            Some(existing) => existing.identifier,
            None => {
                let identifier = state.next_identifier;
                state.next_identifier += 1;
                identifier
            }
        };
        state.paths.insert(identifier, path.clone());
        state.nodes.insert(path, Node::new(identifier, kind, mode));
        Ok(identifier)
    }

    fn update(&self, path: &str, f: impl FnOnce(&mut Node) -> VfsResult<()>) -> VfsResult<()> {
        let path = Self::normalize(path);
        let mut state = self.state.write();
        let node = state
            .nodes
            .get_mut(&path)
            .ok_or_else(|| VfsError::not_found(path.clone()))?;
        f(node)
    }

    /// Add (or replace) a regular file. Returns its identifier.
    pub fn add_file(&self, path: &str, data: impl Into<Arc<[u8]>>) -> VfsResult<u64> {
        self.insert(
            path,
            NodeKind::File {
                data: data.into(),
                streams: BTreeMap::new(),
            },
            0o644,
        )
    }

    pub fn add_directory(&self, path: &str) -> VfsResult<u64> {
        self.insert(path, NodeKind::Directory, 0o755)
    }

    pub fn add_symlink(&self, path: &str, target: &str) -> VfsResult<u64> {
        self.insert(
            path,
            NodeKind::Symlink {
                target: target.to_string(),
            },
            0o777,
        )
    }

    /// Attach a named data stream to an existing file.
    pub fn add_data_stream(&self, path: &str, name: &str, data: impl Into<Arc<[u8]>>) -> VfsResult<()> {
        if name.is_empty() {
            return Err(VfsError::path_spec("the default stream is the file data"));
        }
        let data = data.into();
        self.update(path, |node| match &mut node.kind {
            NodeKind::File { streams, .. } => {
                streams.insert(name.to_string(), data);
                Ok(())
            }
            _ => Err(VfsError::path_spec(format!("{path} is not a file"))),
        })
    }

    pub fn add_extended_attribute(&self, path: &str, name: &str, value: &[u8]) -> VfsResult<()> {
        self.update(path, |node| {
            node.xattrs.retain(|a| a.name != name);
            node.xattrs.push(Attribute::new(name, value));
            Ok(())
        })
    }

    pub fn set_owner(&self, path: &str, uid: u32, gid: u32) -> VfsResult<()> {
        self.update(path, |node| {
            node.owner = Some((uid, gid));
            Ok(())
        })
    }

    pub fn set_mode(&self, path: &str, mode: u32) -> VfsResult<()> {
        self.update(path, |node| {
            node.mode = mode & 0o7777;
            Ok(())
        })
    }

    pub fn set_modification_time(&self, path: &str, time: Timestamp) -> VfsResult<()> {
        self.update(path, |node| {
            node.modified = Some(time);
            Ok(())
        })
    }

    pub fn set_added_time(&self, path: &str, time: Timestamp) -> VfsResult<()> {
        self.update(path, |node| {
            node.added = Some(time);
            Ok(())
        })
    }

    /// Identifier of the node at `path`.
    pub fn identifier_of(&self, path: &str) -> Option<u64> {
        let path = Self::normalize(path);
        self.state.read().nodes.get(&path).map(|n| n.identifier)
    }

    /// Resolve a spec to (path, node). Identifier takes precedence.
    fn find(&self, path_spec: &PathSpec) -> Option<(String, Node)> {
        let state = self.state.read();
        let path = match (path_spec.identifier(), path_spec.location()) {
            (Some(identifier), _) => state.paths.get(&identifier)?.clone(),
            (None, Some(location)) => Self::normalize(location),
            (None, None) => return None,
        };
        let node = state.nodes.get(&path)?.clone();
        Some((path, node))
    }

    fn children(&self, path: &str) -> Vec<(String, u64)> {
        let state = self.state.read();
        state
            .nodes
            .iter()
            .filter(|(child, _)| child.as_str() != "/" && parent_of(child) == path)
            .map(|(child, node)| (child.clone(), node.identifier))
            .collect()
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(pos) => &path[..pos],
    }
}

/// Driver for the `fake` type indicator.
#[derive(Debug, Clone)]
pub struct FakeDriver {
    tree: Arc<MemoryTree>,
}

impl FakeDriver {
    pub fn new(tree: Arc<MemoryTree>) -> Self {
        Self { tree }
    }
}

impl Driver for FakeDriver {
    fn type_indicator(&self) -> &str {
        FAKE
    }

    fn requires_parent(&self) -> bool {
        false
    }

    fn open_file_system(
        &self,
        _resolver: &Resolver,
        path_spec: &PathSpec,
    ) -> VfsResult<Arc<dyn FileSystem>> {
        Ok(Arc::new(MemoryFileSystem {
            path_spec: path_spec.clone(),
            tree: Arc::clone(&self.tree),
        }))
    }
}

/// File system view over a [`MemoryTree`].
#[derive(Debug)]
pub struct MemoryFileSystem {
    path_spec: PathSpec,
    tree: Arc<MemoryTree>,
}

impl Resource for MemoryFileSystem {}

impl FileSystem for MemoryFileSystem {
    fn type_indicator(&self) -> &str {
        FAKE
    }

    fn path_spec(&self) -> &PathSpec {
        &self.path_spec
    }

    fn lookup(&self, path_spec: &PathSpec) -> VfsResult<Option<Box<dyn FileEntryBackend>>> {
        Ok(self.tree.find(path_spec).map(|(path, node)| {
            Box::new(MemoryEntry {
                path_spec: path_spec.clone(),
                container: self.path_spec.clone(),
                tree: Arc::clone(&self.tree),
                path,
                node,
            }) as Box<dyn FileEntryBackend>
        }))
    }

    fn open_data_stream(&self, path_spec: &PathSpec) -> VfsResult<Arc<dyn ByteSource>> {
        let (path, node) = self
            .tree
            .find(path_spec)
            .ok_or_else(|| VfsError::not_found(path_spec.to_string()))?;
        let NodeKind::File { data, streams } = node.kind else {
            return Err(VfsError::not_found(format!("{path} has no data stream")));
        };
        let data = match path_spec.data_stream().unwrap_or("") {
            "" => data,
            name => streams
                .get(name)
                .cloned()
                .ok_or_else(|| VfsError::not_found(format!("{path}: data stream {name}")))?,
        };
        Ok(Arc::new(BytesSource::new(data)))
    }
}

struct MemoryEntry {
    path_spec: PathSpec,
    container: PathSpec,
    tree: Arc<MemoryTree>,
    path: String,
    node: Node,
}

impl FileEntryBackend for MemoryEntry {
    fn path_spec(&self) -> &PathSpec {
        &self.path_spec
    }

    fn entry_type(&self) -> Option<FileEntryType> {
        Some(self.node.entry_type())
    }

    fn name(&self) -> Option<String> {
        let location = self.path_spec.location()?;
        let trimmed = location.trim_end_matches('/');
        Some(trimmed.rsplit('/').next().unwrap_or("").to_string())
    }

    fn is_root(&self) -> bool {
        self.node.identifier == ROOT_IDENTIFIER
    }

    fn size(&self) -> Option<u64> {
        match &self.node.kind {
            NodeKind::File { data, .. } => Some(data.len() as u64),
            NodeKind::Symlink { target } => Some(target.len() as u64),
            NodeKind::Directory => None,
        }
    }

    fn timestamps(&self) -> Timestamps {
        Timestamps {
            modification: self.node.modified,
            added: self.node.added,
            ..Timestamps::default()
        }
    }

    fn stat_attribute(&self) -> VfsResult<Option<StatAttribute>> {
        Ok(Some(StatAttribute {
            inode_number: Some(self.node.identifier),
            mode: Some(self.node.mode),
            owner_identifier: self.node.owner.map(|(uid, _)| uid),
            group_identifier: self.node.owner.map(|(_, gid)| gid),
            number_of_links: Some(1),
            size: self.size(),
            file_type: Some(self.node.entry_type()),
        }))
    }

    fn attributes(&self) -> VfsResult<Vec<Attribute>> {
        Ok(self.node.xattrs.clone())
    }

    fn data_streams(&self) -> VfsResult<Vec<DataStream>> {
        match &self.node.kind {
            NodeKind::File { streams, .. } => Ok(std::iter::once(DataStream::default())
                .chain(streams.keys().map(DataStream::new))
                .collect()),
            _ => Ok(Vec::new()),
        }
    }

    fn directory(&self) -> VfsResult<Option<Box<dyn Directory>>> {
        match self.node.kind {
            NodeKind::Directory => Ok(Some(Box::new(MemoryDirectory {
                container: self.container.clone(),
                tree: Arc::clone(&self.tree),
                path: self.path.clone(),
            }))),
            _ => Ok(None),
        }
    }

    fn link_target(&self) -> VfsResult<Option<String>> {
        match &self.node.kind {
            NodeKind::Symlink { target } => Ok(Some(target.clone())),
            _ => Ok(None),
        }
    }

    /// Derived from the stored path, so identifier-only entries can still
    /// navigate upwards.
    fn parent_path_spec(&self) -> Option<PathSpec> {
        if self.is_root() {
            return None;
        }
        Some(
            self.container
                .with_location(parent_of(&self.path)),
        )
    }
}

struct MemoryDirectory {
    container: PathSpec,
    tree: Arc<MemoryTree>,
    path: String,
}

impl Directory for MemoryDirectory {
    fn entries(&self) -> VfsResult<DirectoryEntries> {
        let container = self.container.clone();
        let children = self.tree.children(&self.path);
        Ok(Box::new(children.into_iter().map(move |(path, identifier)| {
            Ok(container
                .with_location(path)
                .with_identifier(identifier))
        })))
    }
}
