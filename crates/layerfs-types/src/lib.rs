//! Path specification and credential types for layerfs.
//!
//! This crate is the addressing foundation: a [`PathSpec`] describes one
//! storage layer (an OS file, a partition, an archive, ...) and optionally
//! points at the layer it is nested in. It has **no internal layerfs
//! dependencies**; it is a pure leaf crate that `layerfs-core` builds on.
//!
//! # Layer chain
//!
//! ```text
//! PathSpec(os, location=/images/disk.raw)       ← physical source, no parent
//!     └── PathSpec(mbr, location=/p2)           ← partition inside the image
//!         └── PathSpec(cpio, location=/syslog)  ← file inside an archive
//! ```
//!
//! # Key Types
//!
//! |--------------------|---------------------------------------------|
//! | Type               | Purpose                                     |
//! |--------------------|---------------------------------------------|
//! | [`PathSpec`]       | Immutable, hashable layer address + parent  |
//! | [`PathSpecBuilder`]| Validating constructor for `PathSpec`       |
//! | [`ParamValue`]     | Scalar format parameter value               |
//! | [`CredentialKind`] | Kind of secret an encrypted layer accepts   |
//! | [`Credential`]     | A credential value (redacted in `Debug`)    |
//! |--------------------|---------------------------------------------|

pub mod credential;
pub mod path_spec;
pub mod type_indicator;

// Re-export primary types at crate root for convenience.
pub use credential::{Credential, CredentialKind};
pub use path_spec::{Ancestors, ParamValue, PathSpec, PathSpecBuilder, PathSpecError};
