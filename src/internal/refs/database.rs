//! The reference database façade: lookups, iteration, peeling, single
//! and batch updates over one of the closed set of storage variants —
//! the files layout (loose + packed-refs) or the in-memory layout used
//! by memory repositories.
//!
//! Within one ref, updates are linearised by a per-ref lock: a
//! `<ref>.lock` sentinel for the files variant, a lock table for the
//! memory variant. Batches additionally serialise behind a
//! database-wide writer lock.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use dashmap::DashMap;
use tracing::warn;

use crate::errors::GitError;
use crate::hash::ObjectId;
use crate::internal::object::signature::{Signature, SignatureKind};
use crate::internal::object::types::ObjectType;
use crate::internal::odb::ObjectDatabase;
use crate::internal::refs::batch::BatchRefUpdate;
use crate::internal::refs::loose;
use crate::internal::refs::name as refname;
use crate::internal::refs::packed::PackedRefs;
use crate::internal::refs::reflog::{self, ReflogEntry};
use crate::internal::refs::update::{RefUpdate, RefUpdateResult};
use crate::internal::refs::{HEAD, MAX_SYMBOLIC_DEPTH, R_REFS, Ref, RefStorage, RefTarget};
use crate::internal::refs::lock::LockFile;
use crate::utils::CancelToken;

/// Files-backed ref storage rooted at the git directory.
pub(crate) struct FilesStore {
    git_dir: PathBuf,
    log_all: bool,
}

/// In-memory ref storage; per-ref locking via a lock table.
pub(crate) struct MemStore {
    refs: DashMap<String, Ref>,
    logs: DashMap<String, Vec<ReflogEntry>>,
    locked: DashMap<String, ()>,
}

pub(crate) enum RefStore {
    Files(FilesStore),
    Memory(MemStore),
}

/// An exclusively held per-ref write lock.
pub(crate) struct RefLock<'db> {
    inner: RefLockInner<'db>,
}

enum RefLockInner<'db> {
    Files(Option<LockFile>),
    Memory {
        store: &'db MemStore,
        name: String,
        released: bool,
    },
}

impl Drop for RefLock<'_> {
    fn drop(&mut self) {
        if let RefLockInner::Memory {
            store,
            name,
            released,
        } = &mut self.inner
        {
            if !*released {
                store.locked.remove(name.as_str());
            }
        }
        // A files lock cleans its sentinel up in LockFile's own Drop.
    }
}

/// Named ref storage bound to the object database it points into.
pub struct RefDatabase {
    store: RefStore,
    odb: Arc<ObjectDatabase>,
    ident: RwLock<Signature>,
    /// Database-wide writer lock serialising batches and renames.
    pub(crate) write_lock: Mutex<()>,
}

fn default_ident() -> Signature {
    Signature::now(SignatureKind::Committer, "git-core", "git-core@localhost")
}

impl RefDatabase {
    /// Files-backed database rooted at `git_dir`.
    pub fn new_files(git_dir: &Path, odb: Arc<ObjectDatabase>, log_all: bool) -> RefDatabase {
        RefDatabase {
            store: RefStore::Files(FilesStore {
                git_dir: git_dir.to_path_buf(),
                log_all,
            }),
            odb,
            ident: RwLock::new(default_ident()),
            write_lock: Mutex::new(()),
        }
    }

    /// In-memory database for memory repositories.
    pub fn new_memory(odb: Arc<ObjectDatabase>) -> RefDatabase {
        RefDatabase {
            store: RefStore::Memory(MemStore {
                refs: DashMap::new(),
                logs: DashMap::new(),
                locked: DashMap::new(),
            }),
            odb,
            ident: RwLock::new(default_ident()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn object_database(&self) -> &Arc<ObjectDatabase> {
        &self.odb
    }

    /// Identity stamped into reflog entries written by this database.
    pub fn set_ident(&self, ident: Signature) {
        *self.ident.write().expect("ident lock") = ident;
    }

    pub(crate) fn ident(&self) -> Signature {
        let mut ident = self.ident.read().expect("ident lock").clone();
        ident.timestamp = chrono::Utc::now().timestamp();
        ident
    }

    pub(crate) fn log_all(&self) -> bool {
        match &self.store {
            RefStore::Files(files) => files.log_all,
            RefStore::Memory(_) => true,
        }
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    /// The ref whose name matches exactly; no short-name heuristics.
    pub fn exact_ref(&self, name: &str) -> Result<Option<Ref>, GitError> {
        match &self.store {
            RefStore::Files(files) => {
                let loose_ref = loose::read(&files.git_dir, name)?;
                let packed = PackedRefs::load(&files.git_dir)?;
                let packed_ref = packed.find(name);
                match (loose_ref, packed_ref) {
                    (Some(mut r), Some(_)) => {
                        r.storage = RefStorage::LoosePacked;
                        Ok(Some(r))
                    }
                    (Some(r), None) => Ok(Some(r)),
                    (None, Some(pr)) => Ok(Some(Ref {
                        name: pr.name.clone(),
                        storage: RefStorage::Packed,
                        target: RefTarget::Direct(pr.id),
                        peeled: pr.peeled,
                        is_peeled: pr.peeled.is_some(),
                    })),
                    (None, None) => Ok(None),
                }
            }
            RefStore::Memory(mem) => Ok(mem.refs.get(name).map(|r| r.clone())),
        }
    }

    /// Follow the symbolic chain from `name` down to a leaf.
    ///
    /// Returns the leaf name and its record, if it exists. Chains
    /// deeper than [`MAX_SYMBOLIC_DEPTH`] are corrupt.
    pub(crate) fn resolve_leaf(&self, name: &str) -> Result<(String, Option<Ref>), GitError> {
        let mut current = name.to_string();
        for _ in 0..=MAX_SYMBOLIC_DEPTH {
            match self.exact_ref(&current)? {
                Some(r) => {
                    if let RefTarget::Symbolic(target) = &r.target {
                        current = target.clone();
                    } else {
                        return Ok((current, Some(r)));
                    }
                }
                None => return Ok((current, None)),
            }
        }
        Err(GitError::Corrupt(
            name.to_string(),
            format!("symbolic ref chain longer than {MAX_SYMBOLIC_DEPTH}"),
        ))
    }

    /// Resolve `name` through symbolic refs to an object id.
    /// A dangling chain (unborn branch) resolves to `None`.
    pub fn resolve_ref(&self, name: &str) -> Result<Option<ObjectId>, GitError> {
        let (_, leaf) = self.resolve_leaf(name)?;
        Ok(leaf.and_then(|r| r.object_id()))
    }

    /// Find a ref by short name, expanding in the fixed candidate
    /// order; the first hit wins.
    pub fn find_ref(&self, short: &str) -> Result<Option<Ref>, GitError> {
        for candidate in refname::expand_candidates(short) {
            if let Some(r) = self.exact_ref(&candidate)? {
                return Ok(Some(r));
            }
        }
        Ok(None)
    }

    /// Map of all refs under `prefix` (empty prefix returns everything,
    /// `HEAD` included), optionally cancellable between refs.
    pub fn get_refs(&self, prefix: &str) -> Result<BTreeMap<String, Ref>, GitError> {
        self.get_refs_with(prefix, None)
    }

    pub fn get_refs_with(
        &self,
        prefix: &str,
        token: Option<&CancelToken>,
    ) -> Result<BTreeMap<String, Ref>, GitError> {
        let mut out = BTreeMap::new();
        let names: Vec<String> = match &self.store {
            RefStore::Files(files) => {
                let mut names = loose::enumerate(&files.git_dir)?;
                let packed = PackedRefs::load(&files.git_dir)?;
                for pr in packed.refs() {
                    if !names.contains(&pr.name) {
                        names.push(pr.name.clone());
                    }
                }
                if prefix.is_empty() {
                    names.push(HEAD.to_string());
                }
                names
            }
            RefStore::Memory(mem) => mem.refs.iter().map(|e| e.key().clone()).collect(),
        };

        for name in names {
            if let Some(token) = token {
                token.check()?;
            }
            if prefix.is_empty() {
                if name != HEAD && !name.starts_with(R_REFS) {
                    continue;
                }
            } else if !name.starts_with(prefix) {
                continue;
            }
            match self.exact_ref(&name) {
                Ok(Some(r)) => {
                    out.insert(name, r);
                }
                Ok(None) => {}
                Err(GitError::Corrupt(_, _)) => {
                    // One mangled ref must not hide the rest of the map.
                    warn!(ref_name = %name, "skipping unreadable ref");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Return a record with peel information populated: the id of the
    /// first non-tag object for annotated tags, a null peel otherwise.
    pub fn peel(&self, r: &Ref) -> Result<Ref, GitError> {
        if r.is_peeled {
            return Ok(r.clone());
        }
        let mut peeled_ref = r.clone();
        peeled_ref.is_peeled = true;

        let id = match r.object_id() {
            Some(id) => Some(id),
            None => self.resolve_ref(&r.name)?,
        };
        if let Some(id) = id {
            let loader = self.odb.open(&id, None)?;
            if loader.object_type() == ObjectType::Tag {
                peeled_ref.peeled = Some(self.odb.peel_tag(&id)?);
            }
        }
        Ok(peeled_ref)
    }

    // ------------------------------------------------------------------
    // Updates
    // ------------------------------------------------------------------

    /// Begin a single-ref update. With `detach` the symbolic ref itself
    /// is replaced; otherwise updates write through to the leaf.
    pub fn new_update(&self, name: &str, detach: bool) -> Result<RefUpdate<'_>, GitError> {
        RefUpdate::new(self, name, detach)
    }

    /// Begin a batch of receive commands.
    pub fn new_batch(&self) -> BatchRefUpdate<'_> {
        BatchRefUpdate::new(self)
    }

    /// Write a symbolic ref (e.g. point `HEAD` at a branch).
    pub fn link(&self, name: &str, target: &str) -> Result<(), GitError> {
        if !refname::is_valid_update_name(name) {
            return Err(GitError::InvalidRefName(name.to_string()));
        }
        if !refname::is_valid_ref_name(target) {
            return Err(GitError::InvalidRefName(target.to_string()));
        }
        let lock = self.lock_ref(name)?;
        self.commit_target(lock, name, &RefTarget::Symbolic(target.to_string()))
    }

    /// Atomically rename a ref, keeping its object id and carrying the
    /// reflog where possible.
    ///
    /// With `from = None` the current branch is renamed; a detached
    /// HEAD makes that fail with `DetachedHead`.
    pub fn rename_ref(
        &self,
        from: Option<&str>,
        to: &str,
    ) -> Result<RefUpdateResult, GitError> {
        let _serial = self.write_lock.lock().expect("ref write lock");

        let from_name = match from {
            Some(name) => match self.find_ref(name)? {
                Some(r) => r.name,
                None => return Err(GitError::RefNotFound(name.to_string())),
            },
            None => {
                let head = self
                    .exact_ref(HEAD)?
                    .ok_or_else(|| GitError::RefNotFound(HEAD.to_string()))?;
                match head.symbolic_target() {
                    Some(target) => target.to_string(),
                    None => return Err(GitError::DetachedHead),
                }
            }
        };
        if !refname::is_valid_ref_name(to) {
            return Err(GitError::InvalidRefName(to.to_string()));
        }
        if self.exact_ref(to)?.is_some() {
            return Err(GitError::RefAlreadyExists(to.to_string()));
        }
        let id = self
            .resolve_ref(&from_name)?
            .ok_or_else(|| GitError::RefNotFound(from_name.clone()))?;

        // Lock both names in sorted order; batches and renames are
        // already serialised by the database writer lock.
        let (first, second) = if from_name.as_str() < to {
            (from_name.as_str(), to)
        } else {
            (to, from_name.as_str())
        };
        let lock_a = self.lock_ref(first)?;
        let lock_b = self.lock_ref(second)?;
        let (from_lock, to_lock) = if first == from_name.as_str() {
            (lock_a, lock_b)
        } else {
            (lock_b, lock_a)
        };

        self.commit_target(to_lock, to, &RefTarget::Direct(id))?;
        self.move_reflog(&from_name, to)?;
        self.log_transition(
            to,
            id,
            id,
            &format!("renamed from {from_name} to {to}"),
            true,
        );
        self.commit_delete(from_lock, &from_name)?;

        // A branch rename follows HEAD along.
        if let Some(head) = self.exact_ref(HEAD)? {
            if head.symbolic_target() == Some(from_name.as_str()) {
                self.link(HEAD, to)?;
            }
        }
        Ok(RefUpdateResult::Renamed)
    }

    // ------------------------------------------------------------------
    // Reflog access
    // ------------------------------------------------------------------

    /// All reflog entries of `name` in append order.
    pub fn read_reflog(&self, name: &str) -> Result<Vec<ReflogEntry>, GitError> {
        match &self.store {
            RefStore::Files(files) => reflog::read_all(&files.git_dir, name),
            RefStore::Memory(mem) => Ok(mem
                .logs
                .get(name)
                .map(|entries| entries.clone())
                .unwrap_or_default()),
        }
    }

    /// Entries newest-first.
    pub fn read_reflog_reverse(&self, name: &str) -> Result<Vec<ReflogEntry>, GitError> {
        let mut entries = self.read_reflog(name)?;
        entries.reverse();
        Ok(entries)
    }

    /// The n-th entry counting backwards (0 = newest).
    pub fn read_reflog_nth(&self, name: &str, n: usize) -> Result<Option<ReflogEntry>, GitError> {
        let entries = self.read_reflog(name)?;
        if n >= entries.len() {
            return Ok(None);
        }
        Ok(Some(entries[entries.len() - 1 - n].clone()))
    }

    /// Append a reflog transition, best-effort: failures are logged and
    /// swallowed so they can never fail a committed ref transition.
    pub fn log_transition(
        &self,
        name: &str,
        old_id: ObjectId,
        new_id: ObjectId,
        message: &str,
        force: bool,
    ) {
        let entry = ReflogEntry::new(old_id, new_id, self.ident(), message);
        let result = match &self.store {
            RefStore::Files(files) => {
                reflog::append(&files.git_dir, name, &entry, force, files.log_all)
            }
            RefStore::Memory(mem) => {
                mem.logs.entry(name.to_string()).or_default().push(entry);
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(ref_name = %name, error = %e, "reflog append failed");
        }
    }

    fn move_reflog(&self, from: &str, to: &str) -> Result<(), GitError> {
        match &self.store {
            RefStore::Files(files) => reflog::rename(&files.git_dir, from, to),
            RefStore::Memory(mem) => {
                if let Some((_, entries)) = mem.logs.remove(from) {
                    mem.logs.insert(to.to_string(), entries);
                }
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Storage primitives shared by update/batch
    // ------------------------------------------------------------------

    /// Acquire the per-ref writer lock with bounded retry.
    pub(crate) fn lock_ref(&self, name: &str) -> Result<RefLock<'_>, GitError> {
        match &self.store {
            RefStore::Files(files) => {
                let path = loose::ref_path(&files.git_dir, name);
                let lock = LockFile::acquire(&path)?;
                Ok(RefLock {
                    inner: RefLockInner::Files(Some(lock)),
                })
            }
            RefStore::Memory(mem) => {
                use dashmap::mapref::entry::Entry;
                for attempt in 0..=8u32 {
                    match mem.locked.entry(name.to_string()) {
                        Entry::Vacant(entry) => {
                            entry.insert(());
                            return Ok(RefLock {
                                inner: RefLockInner::Memory {
                                    store: mem,
                                    name: name.to_string(),
                                    released: false,
                                },
                            });
                        }
                        Entry::Occupied(_) => {
                            if attempt == 8 {
                                break;
                            }
                            thread::sleep(Duration::from_millis(5) * (attempt + 1));
                        }
                    }
                }
                Err(GitError::LockFailure(
                    name.to_string(),
                    "ref is locked by another writer".to_string(),
                ))
            }
        }
    }

    /// Publish `target` as the new value of `name` and release the lock.
    pub(crate) fn commit_target(
        &self,
        lock: RefLock<'_>,
        name: &str,
        target: &RefTarget,
    ) -> Result<(), GitError> {
        let mut lock = lock;
        match (&self.store, &mut lock.inner) {
            (RefStore::Files(_), RefLockInner::Files(file_lock)) => {
                let mut file_lock = file_lock.take().expect("lock still held");
                file_lock.write_all(&loose::serialize(target))?;
                file_lock.commit()
            }
            (RefStore::Memory(mem), RefLockInner::Memory { name: held, released, .. }) => {
                debug_assert_eq!(held, name);
                let record = match target {
                    RefTarget::Direct(id) => Ref::direct(name, RefStorage::Loose, *id),
                    RefTarget::Symbolic(t) => Ref::symbolic(name, RefStorage::Loose, t),
                };
                mem.refs.insert(name.to_string(), record);
                mem.locked.remove(name);
                *released = true;
                Ok(())
            }
            _ => unreachable!("lock and store variants always match"),
        }
    }

    /// Store a fully formed record (used by batches to carry the peeled
    /// cache of new tag refs) and release the lock.
    pub(crate) fn commit_record(
        &self,
        lock: RefLock<'_>,
        record: Ref,
    ) -> Result<(), GitError> {
        match &self.store {
            RefStore::Files(_) => {
                let name = record.name.clone();
                self.commit_target(lock, &name, &record.target)
            }
            RefStore::Memory(mem) => {
                let mut lock = lock;
                if let RefLockInner::Memory { released, .. } = &mut lock.inner {
                    mem.locked.remove(record.name.as_str());
                    *released = true;
                }
                mem.refs.insert(record.name.clone(), record);
                Ok(())
            }
        }
    }

    /// Remove `name` from every storage tier and release the lock.
    /// A ref that disappears loose but stays packed would otherwise
    /// re-expose the packed value.
    pub(crate) fn commit_delete(&self, lock: RefLock<'_>, name: &str) -> Result<(), GitError> {
        match &self.store {
            RefStore::Files(files) => {
                let mut packed = PackedRefs::load(&files.git_dir)?;
                if packed.remove(name) {
                    packed.write(&files.git_dir)?;
                }
                loose::delete(&files.git_dir, name)?;
                reflog::delete(&files.git_dir, name)?;
                let mut lock = lock;
                if let RefLockInner::Files(file_lock) = &mut lock.inner {
                    if let Some(file_lock) = file_lock.take() {
                        file_lock.rollback()?;
                    }
                }
                Ok(())
            }
            RefStore::Memory(mem) => {
                let mut lock = lock;
                mem.refs.remove(name);
                mem.logs.remove(name);
                if let RefLockInner::Memory { released, .. } = &mut lock.inner {
                    mem.locked.remove(name);
                    *released = true;
                }
                Ok(())
            }
        }
    }
}
