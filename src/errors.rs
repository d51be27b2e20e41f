//! Error types for the git-core crate.
//!
//! One unified enumeration is used across the object database, the
//! reference database, and the revision resolver. It integrates with
//! `thiserror` for `Display` implementations and error source chaining.
//!
//! Notes:
//! - Variants carry the offending id or name where one exists.
//! - Read paths translate a `NotFound` I/O error into [`GitError::Missing`];
//!   only unexpected storage failures surface as [`GitError::IO`].

use thiserror::Error;

use crate::hash::ObjectId;
use crate::internal::object::types::ObjectType;

#[derive(Error, Debug)]
/// Unified error enumeration for the git-core library.
pub enum GitError {
    /// Object or ref absent from storage and all alternates.
    #[error("`{0}` does not exist")]
    Missing(String),

    /// An abbreviated id resolved to two or more candidates.
    #[error("short id `{prefix}` is ambiguous ({} candidates)", candidates.len())]
    Ambiguous {
        prefix: String,
        candidates: Vec<ObjectId>,
    },

    /// A type hint or peel expectation was violated.
    #[error("object {id} is a {actual}, expected {expected}")]
    IncorrectType {
        id: ObjectId,
        expected: ObjectType,
        actual: ObjectType,
    },

    /// Stored bytes cannot be parsed per the on-disk format.
    /// The first field names the artifact (object id, file, ref).
    #[error("corrupt `{0}`: {1}")]
    Corrupt(String, String),

    /// Requested byte materialisation exceeds the caller limit.
    #[error("object {id} is too large ({size} bytes) for in-memory use")]
    LargeObject { id: ObjectId, size: u64 },

    /// Compare-and-swap miss, stale lock, or lock timeout.
    #[error("cannot lock `{0}`: {1}")]
    LockFailure(String, String),

    /// Ref creation target already exists.
    #[error("ref `{0}` already exists")]
    RefAlreadyExists(String),

    /// Named ref does not exist.
    #[error("ref `{0}` not found")]
    RefNotFound(String),

    /// The name fails the ref-name validation rules.
    #[error("`{0}` is not a valid ref name")]
    InvalidRefName(String),

    /// Refusal to delete the branch HEAD currently points to.
    #[error("cannot delete the currently checked out branch `{0}`")]
    CannotDeleteCurrentBranch(String),

    /// HEAD points directly at an object where a branch was required.
    #[error("HEAD is detached")]
    DetachedHead,

    /// Revision expression grammar error.
    #[error("invalid revision `{expr}`: {reason}")]
    RevisionSyntax { expr: String, reason: String },

    /// Operation requires a work tree on a bare repository.
    #[error("bare repository has no work tree")]
    NoWorkTree,

    /// Wraps lower-level storage failures.
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),

    /// Cooperative cancellation observed between work units.
    #[error("operation cancelled")]
    Cancelled,
}
