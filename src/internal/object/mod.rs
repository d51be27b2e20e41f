//! Object model definitions for Git blobs, trees, commits and tags, and
//! the trait that lets the storage layers create strongly typed values
//! from raw bytes.

pub mod blob;
pub mod commit;
pub mod signature;
pub mod tag;
pub mod tree;
pub mod types;

use std::fmt::Display;

use crate::errors::GitError;
use crate::hash::ObjectId;
use crate::internal::object::types::ObjectType;

/// **The Object Trait**
///
/// Common interface for the four base object types. Implementations
/// parse the exact byte form stored on disk and serialize back to it;
/// the id of an object is always the hash of its type-prefixed form.
pub trait ObjectTrait: Send + Sync + Display {
    /// Creates a new object from a byte slice, trusting the supplied id.
    fn from_bytes(data: &[u8], id: ObjectId) -> Result<Self, GitError>
    where
        Self: Sized;

    /// Parses a byte slice and computes the id from the content.
    fn parse(data: &[u8]) -> Result<Self, GitError>
    where
        Self: Sized,
    {
        let id = ObjectId::from_type_and_data(Self::object_type_static(), data);
        Self::from_bytes(data, id)
    }

    /// The type this implementation models.
    fn object_type_static() -> ObjectType
    where
        Self: Sized;

    /// Returns the type of the object.
    fn get_type(&self) -> ObjectType;

    /// Payload size in bytes once serialized.
    fn get_size(&self) -> usize;

    /// Serialize to the canonical byte form (without the loose header).
    fn to_data(&self) -> Result<Vec<u8>, GitError>;

    /// Computes the object id from serialized data.
    ///
    /// Default implementation serializes the object and hashes the
    /// type-prefixed form; override only for cached ids.
    fn object_id(&self) -> Result<ObjectId, GitError> {
        let data = self.to_data()?;
        Ok(ObjectId::from_type_and_data(self.get_type(), &data))
    }
}
