//! The Blob object stores raw file content. It has no structure of its
//! own; the bytes are the payload.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::errors::GitError;
use crate::hash::ObjectId;
use crate::internal::object::ObjectTrait;
use crate::internal::object::types::ObjectType;

/// File content, addressed by the hash of its `blob`-prefixed form.
#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    pub id: ObjectId,
    pub data: Vec<u8>,
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "blob {} ({} bytes)", self.id, self.data.len())
    }
}

impl Blob {
    /// Build a blob from content, computing its id.
    pub fn from_content(content: &[u8]) -> Blob {
        Blob {
            id: ObjectId::from_type_and_data(ObjectType::Blob, content),
            data: content.to_vec(),
        }
    }
}

impl ObjectTrait for Blob {
    fn from_bytes(data: &[u8], id: ObjectId) -> Result<Self, GitError> {
        Ok(Blob {
            id,
            data: data.to_vec(),
        })
    }

    fn object_type_static() -> ObjectType {
        ObjectType::Blob
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Blob
    }

    fn get_size(&self) -> usize {
        self.data.len()
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        Ok(self.data.clone())
    }

    fn object_id(&self) -> Result<ObjectId, GitError> {
        Ok(self.id)
    }
}
