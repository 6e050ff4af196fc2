//! VFS error types.

use std::io;
use thiserror::Error;

use layerfs_types::{PathSpec, PathSpecError};

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// Malformed or incomplete path specification.
    #[error("invalid path specification: {0}")]
    PathSpec(String),

    /// A driver's parsing or decoding operation failed.
    #[error("back-end failure at {path_spec}: {message}")]
    BackEnd { path_spec: String, message: String },

    /// No matching entry, volume or section.
    #[error("not found: {0}")]
    NotFound(String),

    /// A required credential is missing or incorrect.
    #[error("missing or incorrect credential: {0}")]
    Credential(String),

    /// Reference-count bookkeeping was violated. Always a bug.
    #[error("cache consistency violation: {0}")]
    CacheConsistency(String),

    /// A layer of a chain could not be opened.
    #[error("unable to open {type_indicator} layer {path_spec}: {source}")]
    OpenLayer {
        type_indicator: String,
        path_spec: String,
        #[source]
        source: Box<VfsError>,
    },

    /// A driver for this type indicator is already registered.
    #[error("driver already registered: {0}")]
    DuplicateDriver(String),

    /// No driver registered for this type indicator.
    #[error("no driver for type indicator: {0}")]
    UnknownDriver(String),

    /// The driver does not offer this capability.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl VfsError {
    /// Create a PathSpec error.
    pub fn path_spec(msg: impl Into<String>) -> Self {
        Self::PathSpec(msg.into())
    }

    /// Create a BackEnd error for the given layer.
    pub fn back_end(path_spec: &PathSpec, msg: impl Into<String>) -> Self {
        Self::BackEnd {
            path_spec: path_spec.to_string(),
            message: msg.into(),
        }
    }

    /// Create a NotFound error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a Credential error.
    pub fn credential(msg: impl Into<String>) -> Self {
        Self::Credential(msg.into())
    }

    /// Create a CacheConsistency error.
    pub fn cache_consistency(msg: impl Into<String>) -> Self {
        Self::CacheConsistency(msg.into())
    }

    /// Create an Unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Wrap a failure while opening `path_spec`.
    ///
    /// Errors that already name a layer pass through unchanged so the
    /// innermost failing layer is the one reported.
    pub fn open_layer(path_spec: &PathSpec, source: VfsError) -> Self {
        match source {
            e @ VfsError::OpenLayer { .. } => e,
            source => Self::OpenLayer {
                type_indicator: path_spec.type_indicator().to_string(),
                path_spec: path_spec.to_string(),
                source: Box::new(source),
            },
        }
    }

    /// True when a lookup found nothing; ancestor failures are never
    /// reported as not-found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, VfsError::NotFound(_))
    }

    /// True when the innermost cause is a missing or wrong credential.
    pub fn is_credential_error(&self) -> bool {
        matches!(self.root_cause(), VfsError::Credential(_))
    }

    /// The innermost error, unwrapping layer context.
    pub fn root_cause(&self) -> &VfsError {
        let mut current = self;
        while let VfsError::OpenLayer { source, .. } = current {
            current = source;
        }
        current
    }
}

impl From<PathSpecError> for VfsError {
    fn from(e: PathSpecError) -> Self {
        VfsError::PathSpec(e.to_string())
    }
}

/// Convert VfsError to std::io::Error for `Read`/`Seek` compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::PathSpec(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::Credential(msg) => io::Error::new(io::ErrorKind::PermissionDenied, msg),
            VfsError::Unsupported(msg) => io::Error::new(io::ErrorKind::Unsupported, msg),
            VfsError::Io(e) => e,
            other => io::Error::other(other.to_string()),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_layer_keeps_innermost() {
        let os = PathSpec::os("/missing.raw");
        let inner = VfsError::open_layer(&os, VfsError::not_found("/missing.raw"));
        let outer = VfsError::open_layer(&PathSpec::os("/other"), inner);

        match &outer {
            VfsError::OpenLayer { path_spec, .. } => {
                assert_eq!(path_spec, "os[location=/missing.raw]")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!outer.is_not_found());
        assert!(outer.root_cause().is_not_found());
    }

    #[test]
    fn test_credential_detection_through_layers() {
        let err = VfsError::open_layer(&PathSpec::os("/x"), VfsError::credential("locked"));
        assert!(err.is_credential_error());
        assert!(!VfsError::not_found("x").is_credential_error());
    }

    #[test]
    fn test_into_io_error() {
        let io_err: io::Error = VfsError::not_found("/a").into();
        assert_eq!(io_err.kind(), io::ErrorKind::NotFound);

        let io_err: io::Error = VfsError::credential("locked").into();
        assert_eq!(io_err.kind(), io::ErrorKind::PermissionDenied);
    }
}
