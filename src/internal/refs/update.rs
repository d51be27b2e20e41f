//! Single-ref updates: compare-and-swap transitions with the enumerated
//! result state machine.
//!
//! An update is configured (expected old id, new id, force flag, reflog
//! message) and then committed exactly once. Runtime outcomes are
//! reported through [`RefUpdateResult`]; only configuration errors
//! (invalid names, missing targets) surface as `Err`.

use std::collections::{HashSet, VecDeque};

use tracing::debug;

use crate::errors::GitError;
use crate::hash::ObjectId;
use crate::internal::object::types::ObjectType;
use crate::internal::odb::ObjectDatabase;
use crate::internal::refs::database::RefDatabase;
use crate::internal::refs::name as refname;
use crate::internal::refs::{HEAD, Ref, RefTarget};

/// Outcome of a ref update or delete. Initial state is `NotAttempted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefUpdateResult {
    NotAttempted,
    /// Ref did not exist and has been created.
    New,
    /// Old and new ids are identical.
    NoChange,
    /// New id is a descendant of the old id.
    FastForward,
    /// Non-fast-forward accepted because force was set.
    Forced,
    /// Non-fast-forward refused without force.
    Rejected,
    /// Expected-old-id did not match, or another writer holds the lock.
    LockFailure,
    /// Storage error while writing.
    IoFailure,
    /// Produced only by rename operations.
    Renamed,
}

impl RefUpdateResult {
    fn reflog_status(&self) -> Option<&'static str> {
        match self {
            RefUpdateResult::New => Some("created"),
            RefUpdateResult::FastForward => Some("fast-forward"),
            RefUpdateResult::Forced => Some("forced-update"),
            _ => None,
        }
    }
}

/// A configured update of one ref.
pub struct RefUpdate<'db> {
    db: &'db RefDatabase,
    /// Name the caller addressed; `HEAD` when updating through it.
    orig_name: String,
    /// Leaf ref actually written.
    name: String,
    detach: bool,
    expected_old: Option<ObjectId>,
    new_id: Option<ObjectId>,
    force: bool,
    reflog_message: Option<String>,
    append_status: bool,
    reflog_disabled: bool,
    result: RefUpdateResult,
}

impl<'db> RefUpdate<'db> {
    pub(crate) fn new(
        db: &'db RefDatabase,
        name: &str,
        detach: bool,
    ) -> Result<RefUpdate<'db>, GitError> {
        if !refname::is_valid_update_name(name) {
            return Err(GitError::InvalidRefName(name.to_string()));
        }
        // By default an update through a symbolic ref rewrites the
        // pointed leaf; with detach the symbolic ref itself changes.
        let leaf = if detach {
            name.to_string()
        } else {
            db.resolve_leaf(name)?.0
        };
        Ok(RefUpdate {
            db,
            orig_name: name.to_string(),
            name: leaf,
            detach,
            expected_old: None,
            new_id: None,
            force: false,
            reflog_message: None,
            append_status: false,
            reflog_disabled: false,
            result: RefUpdateResult::NotAttempted,
        })
    }

    /// Leaf ref this update writes.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Require the ref to currently hold `id`; the zero id requires the
    /// ref to not exist. A mismatch commits as `LockFailure`.
    pub fn set_expected_old_id(&mut self, id: ObjectId) -> &mut Self {
        self.expected_old = Some(id);
        self
    }

    /// The id to write. Required before [`RefUpdate::update`].
    pub fn set_new_id(&mut self, id: ObjectId) -> &mut Self {
        self.new_id = Some(id);
        self
    }

    /// Accept non-fast-forward transitions.
    pub fn set_force(&mut self, force: bool) -> &mut Self {
        self.force = force;
        self
    }

    /// Reflog message; with `append_status` the result is appended,
    /// as in `message: fast-forward`.
    pub fn set_reflog_message(&mut self, message: &str, append_status: bool) -> &mut Self {
        self.reflog_message = Some(message.to_string());
        self.append_status = append_status;
        self
    }

    /// Suppress the reflog entry for this update.
    pub fn disable_reflog(&mut self) -> &mut Self {
        self.reflog_disabled = true;
        self
    }

    /// Result of the committed update.
    pub fn result(&self) -> RefUpdateResult {
        self.result
    }

    /// Read the value the CAS compares against: the leaf's direct id,
    /// resolving a still-symbolic leaf (detach case) through the chain.
    fn current_id(&self, current: &Option<Ref>) -> Result<Option<ObjectId>, GitError> {
        match current {
            None => Ok(None),
            Some(r) => match &r.target {
                RefTarget::Direct(id) => Ok(Some(*id)),
                RefTarget::Symbolic(target) => self.db.resolve_ref(target),
            },
        }
    }

    fn check_expected(&self, current_id: Option<ObjectId>) -> bool {
        match self.expected_old {
            None => true,
            Some(expected) if expected.is_zero() => current_id.is_none(),
            Some(expected) => current_id == Some(expected),
        }
    }

    fn write_log(&self, result: RefUpdateResult, old_id: ObjectId, new_id: ObjectId) {
        if self.reflog_disabled {
            return;
        }
        let mut message = self.reflog_message.clone().unwrap_or_default();
        if self.append_status {
            if let Some(status) = result.reflog_status() {
                if message.is_empty() {
                    message = status.to_string();
                } else {
                    message = format!("{message}: {status}");
                }
            }
        }
        let force = self.reflog_message.is_some();
        self.db
            .log_transition(&self.name, old_id, new_id, &message, force);
        // Writing through HEAD records the transition on HEAD too.
        if self.orig_name != self.name && self.orig_name == HEAD {
            self.db
                .log_transition(HEAD, old_id, new_id, &message, force);
        }
    }

    /// Commit the configured transition.
    pub fn update(&mut self) -> Result<RefUpdateResult, GitError> {
        let new_id = self.new_id.ok_or_else(|| {
            GitError::Corrupt(self.name.clone(), "update has no new id configured".into())
        })?;
        // Every stored direct ref must point at a present object.
        if !self.db.object_database().has(&new_id) {
            return Err(GitError::Missing(new_id.to_hex()));
        }

        let lock = match self.db.lock_ref(&self.name) {
            Ok(lock) => lock,
            Err(GitError::LockFailure(_, _)) => {
                self.result = RefUpdateResult::LockFailure;
                return Ok(self.result);
            }
            Err(e) => return Err(e),
        };

        let current = self.db.exact_ref(&self.name)?;
        let current_id = self.current_id(&current)?;
        if !self.check_expected(current_id) {
            self.result = RefUpdateResult::LockFailure;
            return Ok(self.result);
        }

        let result = match current_id {
            None => RefUpdateResult::New,
            Some(old) if old == new_id => {
                // Detaching a symbolic ref replaces it with the direct
                // value even when the id is unchanged.
                if self.detach && current.as_ref().is_some_and(Ref::is_symbolic) {
                    self.db
                        .commit_target(lock, &self.name, &RefTarget::Direct(new_id))?;
                }
                self.result = RefUpdateResult::NoChange;
                return Ok(self.result);
            }
            Some(old) => {
                if is_merged_into(self.db.object_database(), &old, &new_id)? {
                    RefUpdateResult::FastForward
                } else if self.force {
                    RefUpdateResult::Forced
                } else {
                    self.result = RefUpdateResult::Rejected;
                    return Ok(self.result);
                }
            }
        };

        match self
            .db
            .commit_target(lock, &self.name, &RefTarget::Direct(new_id))
        {
            Ok(()) => {}
            Err(GitError::IO(e)) => {
                debug!(ref_name = %self.name, error = %e, "ref write failed");
                self.result = RefUpdateResult::IoFailure;
                return Ok(self.result);
            }
            Err(e) => return Err(e),
        }

        self.write_log(result, current_id.unwrap_or(ObjectId::ZERO), new_id);
        self.result = result;
        Ok(result)
    }

    /// Commit a delete of the ref (the mirror of update with a zero
    /// new id). Deleting the branch HEAD points to is refused.
    pub fn delete(&mut self) -> Result<RefUpdateResult, GitError> {
        if self.name != HEAD {
            if let Some(head) = self.db.exact_ref(HEAD)? {
                if head.symbolic_target() == Some(self.name.as_str()) && self.orig_name != HEAD {
                    return Err(GitError::CannotDeleteCurrentBranch(self.name.clone()));
                }
            }
        }

        let lock = match self.db.lock_ref(&self.name) {
            Ok(lock) => lock,
            Err(GitError::LockFailure(_, _)) => {
                self.result = RefUpdateResult::LockFailure;
                return Ok(self.result);
            }
            Err(e) => return Err(e),
        };

        let current = self.db.exact_ref(&self.name)?;
        let current_id = self.current_id(&current)?;
        if current.is_none() {
            self.result = RefUpdateResult::NoChange;
            return Ok(self.result);
        }
        if !self.check_expected(current_id) {
            self.result = RefUpdateResult::LockFailure;
            return Ok(self.result);
        }

        match self.db.commit_delete(lock, &self.name) {
            Ok(()) => {}
            Err(GitError::IO(e)) => {
                debug!(ref_name = %self.name, error = %e, "ref delete failed");
                self.result = RefUpdateResult::IoFailure;
                return Ok(self.result);
            }
            Err(e) => return Err(e),
        }
        self.result = RefUpdateResult::Forced;
        Ok(self.result)
    }
}

/// Whether `ancestor` is reachable from `tip` over commit parents, i.e.
/// moving `ancestor` → `tip` is a fast-forward. Non-commits never
/// fast-forward.
pub(crate) fn is_merged_into(
    odb: &ObjectDatabase,
    ancestor: &ObjectId,
    tip: &ObjectId,
) -> Result<bool, GitError> {
    let is_commit = |id: &ObjectId| -> Result<bool, GitError> {
        match odb.open(id, None) {
            Ok(loader) => Ok(loader.object_type() == ObjectType::Commit),
            Err(GitError::Missing(_)) => Ok(false),
            Err(e) => Err(e),
        }
    };
    if !is_commit(ancestor)? || !is_commit(tip)? {
        return Ok(false);
    }

    let mut queue = VecDeque::from([*tip]);
    let mut seen = HashSet::new();
    while let Some(id) = queue.pop_front() {
        if id == *ancestor {
            return Ok(true);
        }
        if !seen.insert(id) {
            continue;
        }
        let commit = match odb.read_commit(&id) {
            Ok(commit) => commit,
            // A shallow boundary ends the walk on that path.
            Err(GitError::Missing(_)) => continue,
            Err(e) => return Err(e),
        };
        queue.extend(commit.parent_commit_ids);
    }
    Ok(false)
}
