//! Domain newtypes shared across the Nimbus crates.
//!
//! The central type is [`ItemId`], the stable identifier of a drive item.
//! Items created locally carry a synthetic id until the server assigns a
//! real one; the id is swapped ("promoted") at upload time.

use std::fmt::{self, Display, Formatter};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Prefix marking an id as host-local (not yet known to the server).
const LOCAL_ID_PREFIX: &str = "local-";

/// Number of random alphanumeric characters in a generated local id.
const LOCAL_ID_SUFFIX_LEN: usize = 20;

// ============================================================================
// ItemId
// ============================================================================

/// Stable identifier of a drive item.
///
/// Either a remote id assigned by the server, or a host-local id of the
/// form `local-<20 random alphanumerics>` for items that have not been
/// uploaded yet. The empty string is also treated as local.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Wraps an id received from the server (or restored from disk).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh host-local id for a newly created item.
    pub fn local() -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(LOCAL_ID_SUFFIX_LEN)
            .map(char::from)
            .collect();
        Self(format!("{LOCAL_ID_PREFIX}{suffix}"))
    }

    /// Returns true if this id has not been assigned by the server.
    pub fn is_local(&self) -> bool {
        self.0.is_empty() || self.0.starts_with(LOCAL_ID_PREFIX)
    }

    /// The raw id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ItemId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// DriveType
// ============================================================================

/// The kind of drive backing the mount.
///
/// Determines which integrity hash the server advertises for file content:
/// personal drives expose SHA-1, business drives and SharePoint document
/// libraries expose QuickXorHash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DriveType {
    Personal,
    Business,
    DocumentLibrary,
}

impl DriveType {
    /// Maps the `driveType` string of a Graph drive resource.
    ///
    /// Unknown values are treated as business drives, which is the safe
    /// default because those validate with QuickXorHash.
    pub fn from_graph(raw: &str) -> Self {
        match raw {
            "personal" => Self::Personal,
            "documentLibrary" => Self::DocumentLibrary,
            _ => Self::Business,
        }
    }
}

// ============================================================================
// ContentHashes
// ============================================================================

/// Integrity hashes recorded for a file's content.
///
/// Which hash is authoritative depends on the [`DriveType`]; the other one
/// may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHashes {
    /// Uppercase hex SHA-1 digest (personal drives).
    pub sha1: Option<String>,
    /// Base64 QuickXorHash digest (business drives).
    pub quick_xor: Option<String>,
}

impl ContentHashes {
    /// The hash relevant for the given drive type, if recorded.
    pub fn for_drive(&self, drive: DriveType) -> Option<&str> {
        match drive {
            DriveType::Personal => self.sha1.as_deref(),
            _ => self.quick_xor.as_deref(),
        }
    }

    /// Whether two hash records attest to the same content on a drive.
    ///
    /// A missing hash on either side counts as "unknown" and therefore as
    /// different content. SHA-1 digests compare case-insensitively because
    /// the server is inconsistent about hex casing.
    pub fn same_content(&self, other: &ContentHashes, drive: DriveType) -> bool {
        match (self.for_drive(drive), other.for_drive(drive)) {
            (Some(a), Some(b)) => match drive {
                DriveType::Personal => a.eq_ignore_ascii_case(b),
                _ => a == b,
            },
            _ => false,
        }
    }
}
