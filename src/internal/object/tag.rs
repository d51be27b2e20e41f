//! The Tag object is an annotated tag: a named, messaged pointer at
//! another object (usually a commit), with a tagger identity.
//!
//! Header lines are `object`, `type`, `tag`, and optionally `tagger`;
//! the message follows the first blank line. Lightweight tags have no
//! tag object at all, only a ref.

use std::fmt::Display;
use std::str::FromStr;

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::GitError;
use crate::hash::{OBJECT_ID_HEX_LEN, ObjectId};
use crate::internal::object::ObjectTrait;
use crate::internal::object::signature::{Signature, SignatureKind};
use crate::internal::object::types::ObjectType;

/// An annotated tag object.
#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: ObjectId,
    /// The object this tag points at.
    pub object_id: ObjectId,
    /// The declared type of the target.
    pub object_type: ObjectType,
    pub tag_name: String,
    pub tagger: Option<Signature>,
    pub message: String,
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "object {}", self.object_id)?;
        writeln!(f, "type {}", self.object_type)?;
        writeln!(f, "tag {}", self.tag_name)?;
        if let Some(tagger) = &self.tagger {
            writeln!(f, "tagger {tagger}")?;
        }
        writeln!(f, "{}", self.message)
    }
}

impl Tag {
    pub fn new(
        object_id: ObjectId,
        object_type: ObjectType,
        tag_name: &str,
        tagger: Signature,
        message: &str,
    ) -> Result<Tag, GitError> {
        let mut tag = Tag {
            id: ObjectId::ZERO,
            object_id,
            object_type,
            tag_name: tag_name.to_string(),
            tagger: Some(tagger),
            message: message.to_string(),
        };
        tag.id = ObjectId::from_type_and_data(ObjectType::Tag, &tag.to_data()?);
        Ok(tag)
    }
}

impl ObjectTrait for Tag {
    fn from_bytes(data: &[u8], id: ObjectId) -> Result<Self, GitError> {
        let corrupt = |reason: &str| GitError::Corrupt(id.to_hex(), format!("tag: {reason}"));

        let mut object_id = None;
        let mut object_type = None;
        let mut tag_name = None;
        let mut tagger = None;

        let mut rest = data;
        loop {
            let line_end = rest.find_byte(b'\n').ok_or_else(|| corrupt("no message separator"))?;
            let line = &rest[..line_end];

            if line.is_empty() {
                rest = &rest[line_end + 1..];
                break;
            }
            if let Some(hex) = line.strip_prefix(b"object ") {
                let parsed = ObjectId::from_str(
                    hex.to_str().map_err(|_| corrupt("object id is not UTF-8"))?,
                )?;
                object_id = Some(parsed);
            } else if let Some(name) = line.strip_prefix(b"type ") {
                object_type = Some(ObjectType::from_bytes(name)?);
            } else if let Some(name) = line.strip_prefix(b"tag ") {
                tag_name = Some(
                    name.to_str()
                        .map_err(|_| corrupt("tag name is not UTF-8"))?
                        .to_string(),
                );
            } else if line.starts_with(b"tagger ") {
                tagger = Some(Signature::from_data(line.to_vec())?);
                if tagger.as_ref().map(|t| t.kind) != Some(SignatureKind::Tagger) {
                    return Err(corrupt("expected tagger header"));
                }
            } else {
                // Unknown headers (e.g. signature continuations) end the
                // header block; keep them with the message.
                break;
            }
            rest = &rest[line_end + 1..];
        }

        Ok(Tag {
            id,
            object_id: object_id.ok_or_else(|| corrupt("no object header"))?,
            object_type: object_type.ok_or_else(|| corrupt("no type header"))?,
            tag_name: tag_name.ok_or_else(|| corrupt("no tag header"))?,
            tagger,
            message: String::from_utf8_lossy(rest).to_string(),
        })
    }

    fn object_type_static() -> ObjectType {
        ObjectType::Tag
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tag
    }

    fn get_size(&self) -> usize {
        let mut size = b"object ".len() + OBJECT_ID_HEX_LEN + 1;
        size += b"type ".len() + self.object_type.to_bytes().len() + 1;
        size += b"tag ".len() + self.tag_name.len() + 1;
        if let Some(tagger) = &self.tagger {
            size += tagger.encoded_len() + 1;
        }
        // Blank separator line, then the message.
        size + 1 + self.message.len()
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();
        data.extend(b"object ");
        data.extend(self.object_id.to_hex().as_bytes());
        data.push(b'\n');
        data.extend(b"type ");
        data.extend(self.object_type.to_bytes());
        data.push(b'\n');
        data.extend(b"tag ");
        data.extend(self.tag_name.as_bytes());
        data.push(b'\n');
        if let Some(tagger) = &self.tagger {
            data.extend(tagger.to_data()?);
            data.push(b'\n');
        }
        data.push(b'\n');
        data.extend(self.message.as_bytes());
        Ok(data)
    }

    fn object_id(&self) -> Result<ObjectId, GitError> {
        Ok(self.id)
    }
}
