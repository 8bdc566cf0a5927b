//! Response view types for the `dev.skywell.*` query endpoints.

use serde::{Deserialize, Serialize};

use crate::record::Blob;

/// `dev.skywell.defs#profileView`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    /// Account DID.
    pub did: String,
    /// Current handle.
    pub handle: String,
    /// Display name, falling back to the handle upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Avatar URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Number of indexed files owned by the account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_count: Option<i64>,
}

/// `dev.skywell.defs#fileView`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileView {
    /// Record URI.
    pub uri: String,
    /// Record CID.
    pub cid: String,
    /// The attached blob.
    pub blob: Blob,
    /// Author-claimed creation time.
    pub created_at: String,
    /// Display name.
    pub name: String,
    /// Description, omitted when empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Short shareable key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
}

/// Output of `dev.skywell.getFileFromSlug`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFromSlugOutput {
    /// Record CID.
    pub cid: String,
    /// Record URI.
    pub uri: String,
    /// The file itself.
    pub file: FileView,
    /// The owner.
    pub actor: ProfileView,
}

/// Output of `dev.skywell.getActorFiles`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorFilesOutput {
    /// The owner.
    pub actor: ProfileView,
    /// Cursor for the next page; absent at end of list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// One page of files, newest first.
    pub files: Vec<FileView>,
}
