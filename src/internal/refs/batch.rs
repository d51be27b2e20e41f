//! Batch (transactional) ref updates: a list of receive commands
//! applied together.
//!
//! In atomic mode the whole batch succeeds or leaves every visible ref
//! unchanged: validation and preconditions run with every per-ref lock
//! held behind the database-wide writer lock, and the first offender
//! aborts its peers with `TransactionAborted`. In non-atomic mode each
//! command proceeds independently.

use std::collections::HashMap;

use tracing::debug;

use crate::errors::GitError;
use crate::hash::ObjectId;
use crate::internal::object::types::ObjectType;
use crate::internal::refs::database::{RefDatabase, RefLock};
use crate::internal::refs::name as refname;
use crate::internal::refs::update::is_merged_into;
use crate::internal::refs::{Ref, RefStorage, RefTarget};
use crate::utils::CancelToken;

/// Kind of one receive command. `Update` requires a fast-forward;
/// `UpdateNonFastForward` accepts any transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveCommandKind {
    Create,
    Update,
    UpdateNonFastForward,
    Delete,
}

/// Per-command outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveCommandResult {
    NotAttempted,
    Ok,
    /// The command's new id is not present in the object database.
    RejectedMissingObject,
    /// A plain `Update` that would not be a fast-forward.
    RejectedNonFastForward,
    /// Invalid name or other static rejection.
    Rejected,
    /// Precondition miss: current ref state did not match.
    LockFailure,
    /// A peer command failed in an atomic batch.
    TransactionAborted,
}

/// One ref transition requested by a batch. The zero id stands for
/// "absent" on either side.
#[derive(Debug, Clone)]
pub struct ReceiveCommand {
    pub name: String,
    pub old_id: ObjectId,
    pub new_id: ObjectId,
    pub kind: ReceiveCommandKind,
    result: ReceiveCommandResult,
    message: Option<String>,
    /// Peeled id when the new target is an annotated tag.
    peeled: Option<ObjectId>,
}

impl ReceiveCommand {
    pub fn create(name: &str, new_id: ObjectId) -> ReceiveCommand {
        ReceiveCommand {
            name: name.to_string(),
            old_id: ObjectId::ZERO,
            new_id,
            kind: ReceiveCommandKind::Create,
            result: ReceiveCommandResult::NotAttempted,
            message: None,
            peeled: None,
        }
    }

    pub fn update(name: &str, old_id: ObjectId, new_id: ObjectId) -> ReceiveCommand {
        ReceiveCommand {
            name: name.to_string(),
            old_id,
            new_id,
            kind: ReceiveCommandKind::Update,
            result: ReceiveCommandResult::NotAttempted,
            message: None,
            peeled: None,
        }
    }

    pub fn update_non_fast_forward(
        name: &str,
        old_id: ObjectId,
        new_id: ObjectId,
    ) -> ReceiveCommand {
        ReceiveCommand {
            kind: ReceiveCommandKind::UpdateNonFastForward,
            ..ReceiveCommand::update(name, old_id, new_id)
        }
    }

    pub fn delete(name: &str, old_id: ObjectId) -> ReceiveCommand {
        ReceiveCommand {
            name: name.to_string(),
            old_id,
            new_id: ObjectId::ZERO,
            kind: ReceiveCommandKind::Delete,
            result: ReceiveCommandResult::NotAttempted,
            message: None,
            peeled: None,
        }
    }

    pub fn result(&self) -> ReceiveCommandResult {
        self.result
    }

    /// Human-readable rejection detail, when one was recorded.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    fn reject(&mut self, result: ReceiveCommandResult, message: &str) {
        self.result = result;
        self.message = Some(message.to_string());
    }
}

/// A batch of receive commands against one ref database.
pub struct BatchRefUpdate<'db> {
    db: &'db RefDatabase,
    commands: Vec<ReceiveCommand>,
    atomic: bool,
    reflog_message: Option<String>,
    reflog_disabled: bool,
    token: Option<CancelToken>,
}

impl<'db> BatchRefUpdate<'db> {
    pub(crate) fn new(db: &'db RefDatabase) -> BatchRefUpdate<'db> {
        BatchRefUpdate {
            db,
            commands: Vec::new(),
            atomic: true,
            reflog_message: None,
            reflog_disabled: false,
            token: None,
        }
    }

    pub fn add_command(&mut self, command: ReceiveCommand) -> &mut Self {
        self.commands.push(command);
        self
    }

    /// Both storage variants advertise atomic batches; turning this off
    /// makes commands proceed independently.
    pub fn set_atomic(&mut self, atomic: bool) -> &mut Self {
        self.atomic = atomic;
        self
    }

    pub fn set_reflog_message(&mut self, message: &str) -> &mut Self {
        self.reflog_message = Some(message.to_string());
        self
    }

    pub fn disable_reflog(&mut self) -> &mut Self {
        self.reflog_disabled = true;
        self
    }

    /// Cancellation is checked between commands.
    pub fn set_cancel_token(&mut self, token: CancelToken) -> &mut Self {
        self.token = Some(token);
        self
    }

    pub fn commands(&self) -> &[ReceiveCommand] {
        &self.commands
    }

    fn check_token(&self) -> Result<(), GitError> {
        match &self.token {
            Some(token) => token.check(),
            None => Ok(()),
        }
    }

    /// Static validation: ref names and new-object existence. Annotated
    /// tag targets are peeled here for the resulting ref records.
    fn validate(&mut self) -> Result<(), GitError> {
        let odb = self.db.object_database();
        for command in &mut self.commands {
            if !refname::is_valid_update_name(&command.name) {
                command.reject(ReceiveCommandResult::Rejected, "invalid ref name");
                continue;
            }
            if command.new_id.is_zero() {
                continue;
            }
            if !odb.has(&command.new_id) {
                command.reject(
                    ReceiveCommandResult::RejectedMissingObject,
                    "new object is not present in the object database",
                );
                continue;
            }
            let loader = odb.open(&command.new_id, None)?;
            if loader.object_type() == ObjectType::Tag {
                command.peeled = Some(odb.peel_tag(&command.new_id)?);
            }
        }
        Ok(())
    }

    /// Check one command's precondition against the observed state.
    fn precondition(&self, command: &ReceiveCommand) -> Result<ReceiveCommandResult, GitError> {
        let current = self.db.exact_ref(&command.name)?;
        let current_id = match &current {
            None => None,
            Some(r) => match &r.target {
                RefTarget::Direct(id) => Some(*id),
                RefTarget::Symbolic(target) => self.db.resolve_ref(target)?,
            },
        };

        match command.kind {
            ReceiveCommandKind::Create => {
                if current.is_some() {
                    return Ok(ReceiveCommandResult::LockFailure);
                }
            }
            ReceiveCommandKind::Update | ReceiveCommandKind::UpdateNonFastForward => {
                if current_id != Some(command.old_id) {
                    return Ok(ReceiveCommandResult::LockFailure);
                }
                if command.kind == ReceiveCommandKind::Update
                    && !is_merged_into(
                        self.db.object_database(),
                        &command.old_id,
                        &command.new_id,
                    )?
                {
                    return Ok(ReceiveCommandResult::RejectedNonFastForward);
                }
            }
            ReceiveCommandKind::Delete => {
                if command.old_id.is_zero() {
                    if current.is_none() {
                        return Ok(ReceiveCommandResult::LockFailure);
                    }
                } else if current_id != Some(command.old_id) {
                    return Ok(ReceiveCommandResult::LockFailure);
                }
            }
        }
        Ok(ReceiveCommandResult::Ok)
    }

    fn abort_pending(&mut self) {
        for command in &mut self.commands {
            if command.result == ReceiveCommandResult::NotAttempted {
                command.result = ReceiveCommandResult::TransactionAborted;
            }
        }
    }

    fn apply_one(&self, command: &ReceiveCommand, lock: RefLock<'db>) -> Result<(), GitError> {
        match command.kind {
            ReceiveCommandKind::Delete => self.db.commit_delete(lock, &command.name),
            _ => {
                let record = Ref {
                    name: command.name.clone(),
                    storage: RefStorage::Loose,
                    target: RefTarget::Direct(command.new_id),
                    peeled: command.peeled,
                    is_peeled: command.peeled.is_some(),
                };
                self.db.commit_record(lock, record)
            }
        }
    }

    fn log_one(&self, command: &ReceiveCommand) {
        if self.reflog_disabled {
            return;
        }
        if command.kind == ReceiveCommandKind::Delete {
            // The per-ref log went away with the ref.
            return;
        }
        let message = self.reflog_message.as_deref().unwrap_or("batch update");
        self.db.log_transition(
            &command.name,
            command.old_id,
            command.new_id,
            message,
            self.reflog_message.is_some(),
        );
    }

    /// Execute the batch; per-command outcomes land in
    /// [`BatchRefUpdate::commands`].
    pub fn execute(&mut self) -> Result<(), GitError> {
        self.validate()?;
        if self.atomic {
            self.execute_atomic()
        } else {
            self.execute_independent()
        }
    }

    fn execute_atomic(&mut self) -> Result<(), GitError> {
        if self
            .commands
            .iter()
            .any(|c| c.result != ReceiveCommandResult::NotAttempted)
        {
            // A static rejection aborts the batch before any lock.
            self.abort_pending();
            return Ok(());
        }

        let _serial = self.db.write_lock.lock().expect("ref write lock");

        // Lock every ref in name order, then re-check preconditions
        // under the locks.
        let mut names: Vec<String> = self.commands.iter().map(|c| c.name.clone()).collect();
        names.sort();
        names.dedup();
        let mut locks: HashMap<String, RefLock<'db>> = HashMap::new();
        for name in &names {
            self.check_token()?;
            match self.db.lock_ref(name) {
                Ok(lock) => {
                    locks.insert(name.clone(), lock);
                }
                Err(GitError::LockFailure(_, reason)) => {
                    for command in &mut self.commands {
                        if command.name == *name {
                            command.reject(ReceiveCommandResult::LockFailure, &reason);
                        }
                    }
                    self.abort_pending();
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }

        let mut failed = None;
        for (i, command) in self.commands.iter().enumerate() {
            let result = self.precondition(command)?;
            if result != ReceiveCommandResult::Ok {
                failed = Some((i, result));
                break;
            }
        }
        if let Some((i, result)) = failed {
            self.commands[i].reject(result, "precondition not satisfied");
            self.abort_pending();
            return Ok(());
        }

        // All preconditions hold with every lock held: apply.
        debug!(commands = self.commands.len(), "applying atomic batch");
        for i in 0..self.commands.len() {
            self.check_token()?;
            let command = self.commands[i].clone();
            let lock = match locks.remove(&command.name) {
                Some(lock) => lock,
                // Two commands on one name share the single lock; the
                // second write happens after the first released it.
                None => self.db.lock_ref(&command.name)?,
            };
            self.apply_one(&command, lock)?;
            self.log_one(&command);
            self.commands[i].result = ReceiveCommandResult::Ok;
        }
        Ok(())
    }

    fn execute_independent(&mut self) -> Result<(), GitError> {
        for i in 0..self.commands.len() {
            self.check_token()?;
            if self.commands[i].result != ReceiveCommandResult::NotAttempted {
                continue;
            }
            let command = self.commands[i].clone();
            let lock = match self.db.lock_ref(&command.name) {
                Ok(lock) => lock,
                Err(GitError::LockFailure(_, reason)) => {
                    self.commands[i].reject(ReceiveCommandResult::LockFailure, &reason);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let result = self.precondition(&command)?;
            if result != ReceiveCommandResult::Ok {
                self.commands[i].reject(result, "precondition not satisfied");
                drop(lock);
                continue;
            }
            self.apply_one(&command, lock)?;
            self.log_one(&command);
            self.commands[i].result = ReceiveCommandResult::Ok;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::object::ObjectTrait;
    use crate::internal::object::commit::Commit;
    use crate::internal::object::signature::{Signature, SignatureKind};
    use crate::internal::object::tag::Tag;
    use crate::internal::object::tree::Tree;
    use crate::internal::odb::{ObjectDatabase, OdbConfig};
    use std::sync::Arc;

    fn memory_db() -> RefDatabase {
        RefDatabase::new_memory(ObjectDatabase::new_memory(OdbConfig::default()))
    }

    fn sig(kind: SignatureKind) -> Signature {
        let mut s = Signature::now(kind, "Test", "test@example.com");
        s.timestamp = 1234567890;
        s
    }

    fn store_commit(odb: &Arc<ObjectDatabase>, parents: Vec<ObjectId>, message: &str) -> ObjectId {
        let tree = Tree::empty();
        odb.insert(ObjectType::Tree, &tree.to_data().unwrap()).unwrap();
        let commit = Commit::new(
            sig(SignatureKind::Author),
            sig(SignatureKind::Committer),
            tree.id,
            parents,
            message,
        )
        .unwrap();
        odb.insert(ObjectType::Commit, &commit.to_data().unwrap())
            .unwrap()
    }

    fn seed_ref(db: &RefDatabase, name: &str, id: ObjectId) {
        let mut update = db.new_update(name, false).unwrap();
        update.set_new_id(id);
        assert!(matches!(
            update.update().unwrap(),
            crate::internal::refs::update::RefUpdateResult::New
        ));
    }

    /// A create + delete pair applies atomically (the batch-rename
    /// scenario).
    #[test]
    fn atomic_rename_batch() {
        let db = memory_db();
        let odb = Arc::clone(db.object_database());
        let c = store_commit(&odb, vec![], "c\n");
        seed_ref(&db, "refs/heads/x", c);

        let mut batch = db.new_batch();
        batch
            .add_command(ReceiveCommand::delete("refs/heads/x", c))
            .add_command(ReceiveCommand::create("refs/heads/y", c));
        batch.execute().unwrap();

        for command in batch.commands() {
            assert_eq!(command.result(), ReceiveCommandResult::Ok);
        }
        assert!(db.exact_ref("refs/heads/x").unwrap().is_none());
        assert_eq!(
            db.exact_ref("refs/heads/y").unwrap().unwrap().object_id(),
            Some(c)
        );
    }

    /// A precondition miss aborts the whole atomic batch: the offender
    /// reports LockFailure, peers TransactionAborted, nothing changed.
    #[test]
    fn atomic_batch_aborts_on_precondition_miss() {
        let db = memory_db();
        let odb = Arc::clone(db.object_database());
        let c1 = store_commit(&odb, vec![], "one\n");
        let c2 = store_commit(&odb, vec![c1], "two\n");
        seed_ref(&db, "refs/heads/x", c1);

        let mut batch = db.new_batch();
        batch
            .add_command(ReceiveCommand::update("refs/heads/x", c2, c2))
            .add_command(ReceiveCommand::create("refs/heads/y", c1));
        batch.execute().unwrap();

        assert_eq!(
            batch.commands()[0].result(),
            ReceiveCommandResult::LockFailure
        );
        assert_eq!(
            batch.commands()[1].result(),
            ReceiveCommandResult::TransactionAborted
        );
        assert_eq!(
            db.exact_ref("refs/heads/x").unwrap().unwrap().object_id(),
            Some(c1)
        );
        assert!(db.exact_ref("refs/heads/y").unwrap().is_none());
    }

    /// Missing new objects reject the command; in atomic mode peers
    /// abort.
    #[test]
    fn missing_object_rejects() {
        let db = memory_db();
        let odb = Arc::clone(db.object_database());
        let c = store_commit(&odb, vec![], "c\n");

        let mut batch = db.new_batch();
        batch
            .add_command(ReceiveCommand::create(
                "refs/heads/ghost",
                ObjectId::hash_of(b"nowhere"),
            ))
            .add_command(ReceiveCommand::create("refs/heads/real", c));
        batch.execute().unwrap();

        assert_eq!(
            batch.commands()[0].result(),
            ReceiveCommandResult::RejectedMissingObject
        );
        assert_eq!(
            batch.commands()[1].result(),
            ReceiveCommandResult::TransactionAborted
        );
        assert!(db.exact_ref("refs/heads/real").unwrap().is_none());
    }

    /// In non-atomic mode peers proceed independently.
    #[test]
    fn independent_mode_applies_survivors() {
        let db = memory_db();
        let odb = Arc::clone(db.object_database());
        let c = store_commit(&odb, vec![], "c\n");

        let mut batch = db.new_batch();
        batch
            .set_atomic(false)
            .add_command(ReceiveCommand::create(
                "refs/heads/ghost",
                ObjectId::hash_of(b"nowhere"),
            ))
            .add_command(ReceiveCommand::create("refs/heads/real", c));
        batch.execute().unwrap();

        assert_eq!(
            batch.commands()[0].result(),
            ReceiveCommandResult::RejectedMissingObject
        );
        assert_eq!(batch.commands()[1].result(), ReceiveCommandResult::Ok);
        assert!(db.exact_ref("refs/heads/real").unwrap().is_some());
    }

    /// Plain Update commands demand fast-forward; the NonFastForward
    /// kind lifts that.
    #[test]
    fn non_fast_forward_commands() {
        let db = memory_db();
        let odb = Arc::clone(db.object_database());
        let c1 = store_commit(&odb, vec![], "one\n");
        let c2 = store_commit(&odb, vec![c1], "two\n");
        seed_ref(&db, "refs/heads/x", c2);

        let mut batch = db.new_batch();
        batch.add_command(ReceiveCommand::update("refs/heads/x", c2, c1));
        batch.execute().unwrap();
        assert_eq!(
            batch.commands()[0].result(),
            ReceiveCommandResult::RejectedNonFastForward
        );

        let mut batch = db.new_batch();
        batch.add_command(ReceiveCommand::update_non_fast_forward(
            "refs/heads/x",
            c2,
            c1,
        ));
        batch.execute().unwrap();
        assert_eq!(batch.commands()[0].result(), ReceiveCommandResult::Ok);
        assert_eq!(
            db.exact_ref("refs/heads/x").unwrap().unwrap().object_id(),
            Some(c1)
        );
    }

    /// New tag refs carry the peeled id in their record.
    #[test]
    fn tag_targets_are_peeled() {
        let db = memory_db();
        let odb = Arc::clone(db.object_database());
        let c = store_commit(&odb, vec![], "c\n");
        let tag = Tag::new(c, ObjectType::Commit, "v1", sig(SignatureKind::Tagger), "m\n").unwrap();
        let tag_id = odb.insert(ObjectType::Tag, &tag.to_data().unwrap()).unwrap();

        let mut batch = db.new_batch();
        batch.add_command(ReceiveCommand::create("refs/tags/v1", tag_id));
        batch.execute().unwrap();

        let r = db.exact_ref("refs/tags/v1").unwrap().unwrap();
        assert_eq!(r.object_id(), Some(tag_id));
        assert_eq!(r.peeled, Some(c));
        assert!(r.is_peeled);
    }

    /// Cancellation between commands surfaces as Cancelled.
    #[test]
    fn cancellation_is_observed() {
        let db = memory_db();
        let odb = Arc::clone(db.object_database());
        let c = store_commit(&odb, vec![], "c\n");

        let token = CancelToken::new();
        token.cancel();
        let mut batch = db.new_batch();
        batch
            .set_cancel_token(token)
            .add_command(ReceiveCommand::create("refs/heads/x", c));
        assert!(matches!(batch.execute(), Err(GitError::Cancelled)));
    }
}
