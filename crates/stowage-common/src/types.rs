//! Domain primitive types used across the Stowage workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StowageError};

/// Which image repository an operation targets.
///
/// Passed explicitly to every store operation; it selects a backing
/// directory and is never recorded on the stored image itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// Per-user repository owned by the caller.
    Local,
    /// Repository shared by every user of the host or cluster.
    Centralized,
}

impl Topology {
    /// Maps the CLI's `--centralized-repository` switch to a topology.
    #[must_use]
    pub const fn from_centralized_flag(centralized: bool) -> Self {
        if centralized {
            Self::Centralized
        } else {
            Self::Local
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Centralized => write!(f, "centralized"),
        }
    }
}

/// Short identifier of an image, derived from its config digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageId(String);

impl ImageId {
    /// Number of hex characters kept for display.
    pub const SHORT_LEN: usize = 12;

    /// Derives the image ID from the digest of the image config.
    #[must_use]
    pub fn from_config_digest(digest: &Sha256Hash) -> Self {
        Self(digest.as_hex().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the truncated form shown in listings.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..Self::SHORT_LEN).unwrap_or(&self.0)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-256 hash digest used for content addressing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sha256Hash(String);

impl Sha256Hash {
    /// Creates a hash from a hex-encoded string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid 64-character hex string.
    pub fn from_hex(hex: impl Into<String>) -> Result<Self> {
        let hex = hex.into();
        if hex.len() != crate::constants::SHA256_HEX_LENGTH
            || !hex.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(StowageError::Config {
                message: format!("invalid SHA-256 hex string: {hex}"),
            });
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// Hex-encodes a raw digest as produced by a SHA-256 hasher.
    #[must_use]
    pub fn from_digest(bytes: &[u8]) -> Self {
        use std::fmt::Write;

        let mut hex = String::with_capacity(crate::constants::SHA256_HEX_LENGTH);
        for byte in bytes {
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }

    /// Returns the hex-encoded hash string.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl FromStr for Sha256Hash {
    type Err = StowageError;

    /// Accepts both `sha256:<hex>` and bare hex.
    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s.strip_prefix("sha256:").unwrap_or(s))
    }
}

impl TryFrom<String> for Sha256Hash {
    type Error = StowageError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Sha256Hash> for String {
    fn from(hash: Sha256Hash) -> Self {
        hash.to_string()
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

/// Progress of a single archive import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportState {
    /// Nothing has happened yet.
    Unloaded,
    /// The archive is being read and written to the store.
    Importing,
    /// The entry is committed and visible.
    Loaded,
    /// The import stopped; no entry was left behind.
    Failed,
}

impl ImportState {
    /// Whether no further transition can happen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Loaded | Self::Failed)
    }

    /// Returns the next state, or `None` if the transition is not allowed.
    #[must_use]
    pub const fn advance(self, succeeded: bool) -> Option<Self> {
        match (self, succeeded) {
            (Self::Unloaded, _) => Some(Self::Importing),
            (Self::Importing, true) => Some(Self::Loaded),
            (Self::Importing, false) => Some(Self::Failed),
            (Self::Loaded | Self::Failed, _) => None,
        }
    }
}

impl fmt::Display for ImportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unloaded => write!(f, "unloaded"),
            Self::Importing => write!(f, "importing"),
            Self::Loaded => write!(f, "loaded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
