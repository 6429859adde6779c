//! Graph API wire types.
//!
//! JSON shapes of the DriveItem resource and its facets, plus the drive
//! and quota resources. Fields are optional where the API omits them
//! (deleted items lack most metadata, folders lack file hashes).
//!
//! See: <https://learn.microsoft.com/en-us/graph/api/resources/driveitem>

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nimbus_core::types::ContentHashes;

/// A drive item (file or folder) as returned by the Graph API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriveItem {
    /// Unique identifier of the item within the drive.
    pub id: String,
    /// File or folder name.
    pub name: String,
    /// Size in bytes; folders report an aggregate, deleted items omit it.
    pub size: u64,
    /// Opaque change tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
    /// Last modification time, ISO 8601.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified_date_time: Option<DateTime<Utc>>,
    /// Reference to the containing folder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_reference: Option<ParentReference>,
    /// Present when the item is a file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileFacet>,
    /// Present when the item is a folder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<FolderFacet>,
    /// Present when the item has been deleted (delta feed only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<DeletedFacet>,
    /// Present on the drive root item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<serde_json::Value>,
}

impl DriveItem {
    pub fn is_dir(&self) -> bool {
        self.folder.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    pub fn is_root(&self) -> bool {
        self.root.is_some()
    }

    /// Modification time as seconds since the epoch (0 when absent).
    pub fn mtime_unix(&self) -> u64 {
        self.last_modified_date_time
            .map(|t| t.timestamp().max(0) as u64)
            .unwrap_or(0)
    }

    /// The id of the containing folder, if the server sent one.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_reference.as_ref().and_then(|p| p.id.as_deref())
    }

    /// The content hashes of the file facet, in domain form.
    pub fn content_hashes(&self) -> Option<ContentHashes> {
        let hashes = self.file.as_ref()?.hashes.as_ref()?;
        Some(ContentHashes {
            sha1: hashes.sha1_hash.clone(),
            quick_xor: hashes.quick_xor_hash.clone(),
        })
    }
}

/// Reference to a drive item's parent folder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParentReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Path of the form `/drive/root:/Documents`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// File facet: present on files, carries the content hashes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileFacet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashes: Option<HashesFacet>,
}

/// Hash values advertised for a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HashesFacet {
    /// Uppercase hex SHA-1 (personal drives).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha1_hash: Option<String>,
    /// Base64 QuickXorHash (business drives).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quick_xor_hash: Option<String>,
}

/// Folder facet: its presence marks the item as a directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FolderFacet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_count: Option<u64>,
}

/// Deleted facet: its presence marks a tombstone in the delta feed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeletedFacet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// One page of a children listing.
#[derive(Debug, Deserialize)]
pub struct DriveItemList {
    #[serde(default)]
    pub value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

/// The drive resource: identity, type and quota.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Drive {
    pub id: Option<String>,
    /// `personal`, `business` or `documentLibrary`.
    pub drive_type: Option<String>,
    pub quota: Option<Quota>,
}

/// Storage quota of a drive.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Quota {
    pub total: Option<u64>,
    pub used: Option<u64>,
    pub remaining: Option<u64>,
}

/// Response to creating a resumable upload session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSessionInfo {
    /// Pre-authenticated URL accepting the chunk PUTs.
    pub upload_url: String,
    /// When the server will garbage-collect the session.
    #[serde(default)]
    pub expiration_date_time: Option<DateTime<Utc>>,
}
