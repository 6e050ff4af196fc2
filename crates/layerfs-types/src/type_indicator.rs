//! Well-known type indicators and parameter names.
//!
//! Type indicators are plain strings so that drivers living outside this
//! workspace can register new formats without touching this list.

/// Host operating system file.
pub const OS: &str = "os";

/// In-memory file system (tests, synthesized trees).
pub const FAKE: &str = "fake";

/// CPIO archive.
pub const CPIO: &str = "cpio";

/// DOS (MBR) partition table.
pub const MBR: &str = "mbr";

/// Byte range of the parent layer.
pub const DATA_RANGE: &str = "data_range";

// ── Parameter names ─────────────────────────────────────────────────────────

/// Textual location within the layer, e.g. `/a_directory/a_file`.
pub const LOCATION: &str = "location";

/// Format-native identifier, e.g. an inode number.
pub const IDENTIFIER: &str = "identifier";

/// Name of a data stream; the unnamed (default) stream is `""`.
pub const DATA_STREAM: &str = "data_stream";

/// Zero-based partition index within a volume system.
pub const PART_INDEX: &str = "part_index";

/// Start of a byte range in the parent layer.
pub const RANGE_OFFSET: &str = "range_offset";

/// Size of a byte range in the parent layer.
pub const RANGE_SIZE: &str = "range_size";

/// Names that never appear as parameters because the serialized form
/// already uses them for structure.
pub const RESERVED: &[&str] = &["type_indicator", "parent"];

/// Parameters that select something *inside* a container rather than the
/// container itself. Stripping them from the leaf layer yields the key under
/// which the opened container is cached.
pub const LEAF_PARAMETERS: &[&str] = &[LOCATION, IDENTIFIER, DATA_STREAM, PART_INDEX];
