//! Core VFS types: the normalized stat model every driver reports into.
//!
//! Every property that a format may be unable to determine is an `Option`.
//! Drivers report `None` rather than a zero that would look like a real
//! value.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use strum::{Display, EnumString};

/// File entry type. Exactly one per entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FileEntryType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Link,
    /// Block or character device.
    Device,
    /// Named pipe.
    Pipe,
    /// Socket.
    Socket,
}

impl FileEntryType {
    /// Derive the type from POSIX `st_mode` format bits.
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & 0o170_000 {
            0o100_000 => Some(FileEntryType::File),
            0o040_000 => Some(FileEntryType::Directory),
            0o120_000 => Some(FileEntryType::Link),
            0o020_000 | 0o060_000 => Some(FileEntryType::Device),
            0o010_000 => Some(FileEntryType::Pipe),
            0o140_000 => Some(FileEntryType::Socket),
            _ => None,
        }
    }
}

/// POSIX timestamp with optional sub-second precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since the Unix epoch.
    pub seconds: i64,
    /// Nanoseconds within the second, when the format records them.
    pub nanoseconds: Option<u32>,
}

impl Timestamp {
    /// Whole-second timestamp.
    pub fn from_seconds(seconds: i64) -> Self {
        Self {
            seconds,
            nanoseconds: None,
        }
    }

    /// Timestamp with nanosecond precision.
    pub fn from_parts(seconds: i64, nanoseconds: u32) -> Self {
        Self {
            seconds,
            nanoseconds: Some(nanoseconds),
        }
    }

    /// Convert from a `SystemTime`, handling times before the epoch.
    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => Self::from_parts(d.as_secs() as i64, d.subsec_nanos()),
            Err(e) => {
                let d = e.duration();
                let mut seconds = -(d.as_secs() as i64);
                let mut nanos = d.subsec_nanos();
                if nanos > 0 {
                    seconds -= 1;
                    nanos = 1_000_000_000 - nanos;
                }
                Self::from_parts(seconds, nanos)
            }
        }
    }
}

/// The timestamps of an entry, each independently optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    pub access: Option<Timestamp>,
    pub modification: Option<Timestamp>,
    pub change: Option<Timestamp>,
    pub creation: Option<Timestamp>,
    /// When the entry was added to its container; only some formats record
    /// it.
    #[serde(default)]
    pub added: Option<Timestamp>,
}

/// Typed stat attribute as reported by a driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatAttribute {
    pub inode_number: Option<u64>,
    /// Permission bits (`st_mode & 0o7777`).
    pub mode: Option<u32>,
    pub owner_identifier: Option<u32>,
    pub group_identifier: Option<u32>,
    pub number_of_links: Option<u64>,
    pub size: Option<u64>,
    pub file_type: Option<FileEntryType>,
}

/// Flattened stat view combining the stat attribute and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub file_type: Option<FileEntryType>,
    pub size: Option<u64>,
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub ino: Option<u64>,
    pub nlink: Option<u64>,
    pub atime: Option<Timestamp>,
    pub mtime: Option<Timestamp>,
    pub ctime: Option<Timestamp>,
    pub crtime: Option<Timestamp>,
    pub is_allocated: bool,
}

/// Extended attribute (name + raw value).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: Vec<u8>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A data stream of an entry. The default (unnamed) stream has name `""`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataStream {
    pub name: String,
}

impl DataStream {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn is_default(&self) -> bool {
        self.name.is_empty()
    }
}
