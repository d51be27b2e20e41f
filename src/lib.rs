//! git-core is the storage core of a Git repository: the
//! content-addressed object database (file-backed loose + pack, or
//! fully in-memory), the reference database with atomic single and
//! batch updates plus reflogs, and the revision expression resolver
//! that binds them together under a [`Repository`] handle.

pub mod errors;
pub mod hash;
pub mod internal;
pub mod utils;

pub use crate::errors::GitError;
pub use crate::hash::{AbbreviatedId, ObjectId};
pub use crate::internal::repository::{
    EnvTable, Repository, RepositoryBuilder, RepositoryEvent, init,
};
