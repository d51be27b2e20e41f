//! Object type enumeration shared by the loose and pack layers.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::errors::GitError;

/// In Git, each object type is assigned a unique integer value used to
/// identify the type of the object inside pack entry headers.
///
/// * `Commit` (1): snapshot metadata, tree pointer and parent links.
/// * `Tree` (2): a directory listing of (mode, name, child id).
/// * `Blob` (3): file content.
/// * `Tag` (4): an annotated tag pointing at another object.
/// * `OffsetDelta` (6): a delta whose base is at a relative pack offset.
/// * `HashDelta` (7): a delta whose base is named by a full object id.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Commit = 1,
    Tree = 2,
    Blob = 3,
    Tag = 4,
    OffsetDelta = 6,
    HashDelta = 7,
}

const COMMIT_OBJECT_TYPE: &[u8] = b"commit";
const TREE_OBJECT_TYPE: &[u8] = b"tree";
const BLOB_OBJECT_TYPE: &[u8] = b"blob";
const TAG_OBJECT_TYPE: &[u8] = b"tag";

impl Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ObjectType::Commit => write!(f, "commit"),
            ObjectType::Tree => write!(f, "tree"),
            ObjectType::Blob => write!(f, "blob"),
            ObjectType::Tag => write!(f, "tag"),
            ObjectType::OffsetDelta => write!(f, "ofs-delta"),
            ObjectType::HashDelta => write!(f, "ref-delta"),
        }
    }
}

impl ObjectType {
    /// Whether this is one of the four base types that may appear in
    /// loose storage and object headers (deltas exist only in packs).
    pub fn is_base(&self) -> bool {
        matches!(
            self,
            ObjectType::Commit | ObjectType::Tree | ObjectType::Blob | ObjectType::Tag
        )
    }

    /// Wire name bytes as used in loose headers and tag `type` lines.
    ///
    /// Only base types have a wire name; calling this on a delta type
    /// is a logic error in the pack layer.
    pub fn to_bytes(&self) -> &'static [u8] {
        match self {
            ObjectType::Commit => COMMIT_OBJECT_TYPE,
            ObjectType::Tree => TREE_OBJECT_TYPE,
            ObjectType::Blob => BLOB_OBJECT_TYPE,
            ObjectType::Tag => TAG_OBJECT_TYPE,
            ObjectType::OffsetDelta | ObjectType::HashDelta => {
                unreachable!("delta types have no wire name")
            }
        }
    }

    /// Parse a wire name (`commit`, `tree`, `blob`, `tag`).
    pub fn from_bytes(s: &[u8]) -> Result<ObjectType, GitError> {
        match s {
            COMMIT_OBJECT_TYPE => Ok(ObjectType::Commit),
            TREE_OBJECT_TYPE => Ok(ObjectType::Tree),
            BLOB_OBJECT_TYPE => Ok(ObjectType::Blob),
            TAG_OBJECT_TYPE => Ok(ObjectType::Tag),
            _ => Err(GitError::Corrupt(
                String::from_utf8_lossy(s).to_string(),
                "not a valid git object type".to_string(),
            )),
        }
    }

    /// Parse the string form of a wire name.
    pub fn from_string(s: &str) -> Result<ObjectType, GitError> {
        ObjectType::from_bytes(s.as_bytes())
    }

    /// Convert to the 3-bit pack entry header type id.
    pub fn to_pack_type_u8(&self) -> u8 {
        *self as u8
    }

    /// Decode a 3-bit pack entry header type id.
    pub fn from_pack_type_u8(number: u8) -> Result<ObjectType, GitError> {
        match number {
            1 => Ok(ObjectType::Commit),
            2 => Ok(ObjectType::Tree),
            3 => Ok(ObjectType::Blob),
            4 => Ok(ObjectType::Tag),
            6 => Ok(ObjectType::OffsetDelta),
            7 => Ok(ObjectType::HashDelta),
            _ => Err(GitError::Corrupt(
                format!("pack type {number}"),
                "invalid pack object type number".to_string(),
            )),
        }
    }
}
