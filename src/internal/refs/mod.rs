//! The reference database: named pointers into the object graph.
//!
//! A ref is either direct (names an object) or symbolic (names another
//! ref, as `HEAD` usually is). Refs live loose under `refs/` with a
//! compact overflow in `packed-refs`; every transition can be recorded
//! in a per-ref reflog.

pub mod batch;
pub mod database;
pub mod lock;
pub mod loose;
pub mod name;
pub mod packed;
pub mod reflog;
pub mod update;

use serde::{Deserialize, Serialize};

use crate::hash::ObjectId;

/// The symbolic ref everything starts from.
pub const HEAD: &str = "HEAD";

/// Prefix of all refs.
pub const R_REFS: &str = "refs/";

/// Prefix of local branches.
pub const R_HEADS: &str = "refs/heads/";

/// Prefix of tags.
pub const R_TAGS: &str = "refs/tags/";

/// Prefix of remote-tracking refs.
pub const R_REMOTES: &str = "refs/remotes/";

/// Longest accepted symbolic ref chain; deeper chains are rejected.
pub const MAX_SYMBOLIC_DEPTH: usize = 5;

/// Where a ref record was read from. Advisory metadata consumed by
/// compare-and-swap writes and listing; a ref present both loose and
/// packed reads as `LoosePacked` with the loose value winning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefStorage {
    /// Not yet persisted anywhere.
    New,
    Loose,
    Packed,
    LoosePacked,
}

/// What a ref points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    /// The ref names an object.
    Direct(ObjectId),
    /// The ref names another ref.
    Symbolic(String),
}

/// An immutable ref descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ref {
    pub name: String,
    pub storage: RefStorage,
    pub target: RefTarget,
    /// Cached first non-tag object reached by peeling, when known.
    /// Consumers treat this as a hint and may re-peel.
    pub peeled: Option<ObjectId>,
    /// Whether a peel was attempted for this record.
    pub is_peeled: bool,
}

impl Ref {
    /// A direct ref with no peel information.
    pub fn direct(name: &str, storage: RefStorage, id: ObjectId) -> Ref {
        Ref {
            name: name.to_string(),
            storage,
            target: RefTarget::Direct(id),
            peeled: None,
            is_peeled: false,
        }
    }

    /// A symbolic ref pointing at `target`.
    pub fn symbolic(name: &str, storage: RefStorage, target: &str) -> Ref {
        Ref {
            name: name.to_string(),
            storage,
            target: RefTarget::Symbolic(target.to_string()),
            peeled: None,
            is_peeled: false,
        }
    }

    /// The object id for direct refs, `None` for symbolic ones.
    pub fn object_id(&self) -> Option<ObjectId> {
        match &self.target {
            RefTarget::Direct(id) => Some(*id),
            RefTarget::Symbolic(_) => None,
        }
    }

    /// The target name for symbolic refs.
    pub fn symbolic_target(&self) -> Option<&str> {
        match &self.target {
            RefTarget::Direct(_) => None,
            RefTarget::Symbolic(target) => Some(target),
        }
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self.target, RefTarget::Symbolic(_))
    }
}
