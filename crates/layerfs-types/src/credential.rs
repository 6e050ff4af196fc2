//! Credential types for encrypted layers.
//!
//! Drivers for encrypted volumes ask the credential store for a secret of a
//! particular kind. The value is never printed by `Debug`.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// What kind of secret a credential carries.
#[derive(
    Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CredentialKind {
    /// User password or passphrase.
    Password,
    /// Recovery password (e.g. a BitLocker-style numeric key).
    RecoveryPassword,
    /// Startup key file contents.
    StartupKey,
    /// Raw key material, hex encoded.
    Key,
}

/// A credential value together with its kind.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub kind: CredentialKind,
    pub value: String,
}

impl Credential {
    pub fn new(kind: CredentialKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("value", &"<redacted>")
            .finish()
    }
}
