//! The object database: a unified read/write view over one primary
//! backend (file-backed loose + pack, or fully in-memory) and its
//! ordered chain of alternates.
//!
//! Reads search the primary backend first and then each alternate in
//! registration order. Writes go through scoped inserters that stage
//! into temporary artifacts and publish atomically on flush; an object
//! is either fully visible or absent.

pub mod file_store;
pub mod loose;
pub mod memory;
pub mod pack;

use std::collections::BTreeSet;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::errors::GitError;
use crate::hash::{AbbreviatedId, ObjectId};
use crate::internal::object::ObjectTrait;
use crate::internal::object::commit::Commit;
use crate::internal::object::tag::Tag;
use crate::internal::object::tree::Tree;
use crate::internal::object::types::ObjectType;
use crate::internal::odb::file_store::FileStore;
use crate::internal::odb::memory::{MemPackDescription, MemoryStore, PACK_EXT, append_record};

/// Nesting bound for alternate chains, matching git's own depth cap.
const MAX_ALTERNATE_DEPTH: usize = 5;

/// Tag chains longer than this are treated as corrupt when peeling.
pub const MAX_TAG_DEPTH: usize = 5;

/// Tunables of an object database.
#[derive(Debug, Clone, Copy)]
pub struct OdbConfig {
    /// Byte ceiling for materialising an object in memory; larger
    /// objects surface as `LargeObject`.
    pub large_object_limit: u64,
    /// Longest accepted delta chain inside a pack.
    pub max_delta_depth: usize,
}

impl Default for OdbConfig {
    fn default() -> Self {
        OdbConfig {
            large_object_limit: 512 << 20,
            max_delta_depth: 50,
        }
    }
}

/// One located object before type checking: its identity, type, size,
/// and a handle to the bytes.
pub struct RawObject {
    id: ObjectId,
    object_type: ObjectType,
    size: u64,
    data: RawData,
}

enum RawData {
    Inline(Arc<Vec<u8>>),
    /// A loose object left on disk until bytes are requested.
    LoosePending { objects_dir: PathBuf },
}

impl RawObject {
    pub(crate) fn inline(id: ObjectId, object_type: ObjectType, data: Vec<u8>) -> RawObject {
        RawObject {
            id,
            object_type,
            size: data.len() as u64,
            data: RawData::Inline(Arc::new(data)),
        }
    }

    pub(crate) fn shared(id: ObjectId, object_type: ObjectType, data: Arc<Vec<u8>>) -> RawObject {
        RawObject {
            id,
            object_type,
            size: data.len() as u64,
            data: RawData::Inline(data),
        }
    }

    pub(crate) fn loose(
        id: ObjectId,
        object_type: ObjectType,
        size: u64,
        objects_dir: PathBuf,
    ) -> RawObject {
        RawObject {
            id,
            object_type,
            size,
            data: RawData::LoosePending { objects_dir },
        }
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }
}

/// Read handle for one object: type and size are available immediately,
/// bytes are materialised on demand and bounded by the configured
/// large-object limit.
pub struct ObjectLoader {
    raw: RawObject,
    limit: u64,
}

impl ObjectLoader {
    pub fn id(&self) -> ObjectId {
        self.raw.id
    }

    pub fn object_type(&self) -> ObjectType {
        self.raw.object_type
    }

    pub fn size(&self) -> u64 {
        self.raw.size
    }

    /// Materialise the object bytes, honouring the database limit.
    pub fn bytes(&self) -> Result<Vec<u8>, GitError> {
        self.bytes_with_limit(self.limit)
    }

    /// Materialise the object bytes under an explicit caller limit.
    pub fn bytes_with_limit(&self, limit: u64) -> Result<Vec<u8>, GitError> {
        if self.raw.size > limit {
            return Err(GitError::LargeObject {
                id: self.raw.id,
                size: self.raw.size,
            });
        }
        match &self.raw.data {
            RawData::Inline(data) => Ok(data.as_ref().clone()),
            RawData::LoosePending { objects_dir } => {
                let (_, data) = loose::read(objects_dir, &self.raw.id)?
                    .ok_or_else(|| GitError::Missing(self.raw.id.to_hex()))?;
                Ok(data)
            }
        }
    }
}

/// The closed set of storage variants, chosen once at construction.
pub enum Backend {
    File(FileStore),
    Memory(MemoryStore),
}

/// A content-addressed object database with ordered alternates.
pub struct ObjectDatabase {
    backend: Backend,
    alternates: Vec<Arc<ObjectDatabase>>,
    config: OdbConfig,
}

impl ObjectDatabase {
    /// Open the file backend rooted at `objects_dir`, loading the
    /// `objects/info/alternates` chain plus any extra alternate object
    /// directories (e.g. from the environment).
    pub fn open_file(
        objects_dir: &Path,
        extra_alternates: &[PathBuf],
        config: OdbConfig,
    ) -> Result<Arc<ObjectDatabase>, GitError> {
        let mut seen = HashSet::new();
        Self::open_file_at_depth(objects_dir, extra_alternates, config, 0, &mut seen)
    }

    fn open_file_at_depth(
        objects_dir: &Path,
        extra_alternates: &[PathBuf],
        config: OdbConfig,
        depth: usize,
        seen: &mut HashSet<PathBuf>,
    ) -> Result<Arc<ObjectDatabase>, GitError> {
        if depth > MAX_ALTERNATE_DEPTH {
            return Err(GitError::Corrupt(
                objects_dir.display().to_string(),
                format!("alternate object stores nested deeper than {MAX_ALTERNATE_DEPTH}"),
            ));
        }
        let canonical = objects_dir
            .canonicalize()
            .unwrap_or_else(|_| objects_dir.to_path_buf());
        seen.insert(canonical);

        let store = FileStore::new(objects_dir.to_path_buf(), config.max_delta_depth);
        let mut alternate_dirs = store.read_alternates()?;
        alternate_dirs.extend(extra_alternates.iter().cloned());

        let mut alternates = Vec::new();
        for dir in alternate_dirs {
            let canonical = dir.canonicalize().unwrap_or_else(|_| dir.clone());
            // An alternate pointing back into the chain would loop.
            if seen.contains(&canonical) {
                continue;
            }
            alternates.push(Self::open_file_at_depth(&dir, &[], config, depth + 1, seen)?);
        }

        debug!(objects_dir = %objects_dir.display(), alternates = alternates.len(), "opened file object database");
        Ok(Arc::new(ObjectDatabase {
            backend: Backend::File(store),
            alternates,
            config,
        }))
    }

    /// Create a fully in-memory database.
    pub fn new_memory(config: OdbConfig) -> Arc<ObjectDatabase> {
        Arc::new(ObjectDatabase {
            backend: Backend::Memory(MemoryStore::new()),
            alternates: Vec::new(),
            config,
        })
    }

    pub fn config(&self) -> &OdbConfig {
        &self.config
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Ordered alternate databases searched after this one.
    pub fn alternates(&self) -> &[Arc<ObjectDatabase>] {
        &self.alternates
    }

    /// Release cached storage resources. Subsequent reads reopen them.
    pub fn release(&self) {
        if let Backend::File(store) = &self.backend {
            store.release();
        }
    }

    fn contains_local(&self, id: &ObjectId) -> bool {
        match &self.backend {
            Backend::File(store) => store.contains(id),
            Backend::Memory(store) => store.contains(id),
        }
    }

    /// Whether `id` exists here or in any alternate.
    pub fn has(&self, id: &ObjectId) -> bool {
        if self.contains_local(id) {
            return true;
        }
        self.alternates.iter().any(|alt| alt.has(id))
    }

    fn locate(&self, id: &ObjectId) -> Result<Option<RawObject>, GitError> {
        let local = match &self.backend {
            Backend::File(store) => store.locate(id)?,
            Backend::Memory(store) => store.locate(id)?,
        };
        if let Some(raw) = local {
            return Ok(Some(raw));
        }
        for alt in &self.alternates {
            if let Some(raw) = alt.locate(id)? {
                return Ok(Some(raw));
            }
        }
        Ok(None)
    }

    /// Open `id` for reading.
    ///
    /// Fails with `Missing` when neither this database nor an alternate
    /// holds the object, and with `IncorrectType` when a hint other
    /// than the found type was supplied.
    pub fn open(
        &self,
        id: &ObjectId,
        type_hint: Option<ObjectType>,
    ) -> Result<ObjectLoader, GitError> {
        let raw = self
            .locate(id)?
            .ok_or_else(|| GitError::Missing(id.to_hex()))?;
        if let Some(expected) = type_hint {
            if raw.object_type != expected {
                return Err(GitError::IncorrectType {
                    id: *id,
                    expected,
                    actual: raw.object_type,
                });
            }
        }
        Ok(ObjectLoader {
            raw,
            limit: self.config.large_object_limit,
        })
    }

    /// All ids matching the prefix, unioned over this database and its
    /// alternates. Callers classify by cardinality.
    pub fn resolve(&self, abbrev: &AbbreviatedId) -> Result<BTreeSet<ObjectId>, GitError> {
        let mut out = BTreeSet::new();
        self.resolve_into(abbrev, &mut out)?;
        Ok(out)
    }

    fn resolve_into(
        &self,
        abbrev: &AbbreviatedId,
        out: &mut BTreeSet<ObjectId>,
    ) -> Result<(), GitError> {
        match &self.backend {
            Backend::File(store) => store.resolve_prefix(abbrev, out)?,
            Backend::Memory(store) => store.resolve_prefix(abbrev, out)?,
        }
        for alt in &self.alternates {
            alt.resolve_into(abbrev, out)?;
        }
        Ok(())
    }

    /// Scoped read handle pinning the current storage snapshot.
    pub fn new_reader(self: &Arc<Self>) -> ObjectReader {
        let pinned = match &self.backend {
            Backend::File(store) => PinnedSnapshot::FilePacks(store.pack_list()),
            Backend::Memory(store) => PinnedSnapshot::MemPacks(store.pack_list()),
        };
        ObjectReader {
            db: Arc::clone(self),
            _pinned: pinned,
        }
    }

    /// Scoped write handle. Inserted ids become visible only at flush.
    pub fn new_inserter(self: &Arc<Self>) -> ObjectInserter {
        static INSERTER_SEQ: AtomicU64 = AtomicU64::new(1);
        ObjectInserter {
            db: Arc::clone(self),
            staged_loose: Vec::new(),
            staged_records: Vec::new(),
            name: format!("ins-{}", INSERTER_SEQ.fetch_add(1, Ordering::Relaxed)),
        }
    }

    /// Insert one object and flush immediately.
    pub fn insert(self: &Arc<Self>, object_type: ObjectType, data: &[u8]) -> Result<ObjectId, GitError> {
        let mut inserter = self.new_inserter();
        let id = inserter.insert(object_type, data)?;
        inserter.flush()?;
        Ok(id)
    }

    /// Follow annotated tags from `id` until a non-tag object, bounded
    /// by [`MAX_TAG_DEPTH`].
    pub fn peel_tag(&self, id: &ObjectId) -> Result<ObjectId, GitError> {
        let mut current = *id;
        for _ in 0..=MAX_TAG_DEPTH {
            let loader = self.open(&current, None)?;
            if loader.object_type() != ObjectType::Tag {
                return Ok(current);
            }
            let tag = Tag::from_bytes(&loader.bytes()?, current)?;
            current = tag.object_id;
        }
        Err(GitError::Corrupt(
            id.to_hex(),
            format!("tag chain longer than {MAX_TAG_DEPTH}"),
        ))
    }

    /// Open and parse a commit.
    pub fn read_commit(&self, id: &ObjectId) -> Result<Commit, GitError> {
        let loader = self.open(id, Some(ObjectType::Commit))?;
        Commit::from_bytes(&loader.bytes()?, *id)
    }

    /// Open and parse a tree.
    pub fn read_tree(&self, id: &ObjectId) -> Result<Tree, GitError> {
        let loader = self.open(id, Some(ObjectType::Tree))?;
        Tree::from_bytes(&loader.bytes()?, *id)
    }

    /// Open and parse an annotated tag.
    pub fn read_tag(&self, id: &ObjectId) -> Result<Tag, GitError> {
        let loader = self.open(id, Some(ObjectType::Tag))?;
        Tag::from_bytes(&loader.bytes()?, *id)
    }
}

enum PinnedSnapshot {
    FilePacks(Arc<Vec<Arc<pack::Pack>>>),
    MemPacks(Arc<Vec<Arc<memory::MemPack>>>),
}

/// Scoped reader over a stable storage snapshot; the snapshot's packs
/// stay alive for the reader's lifetime.
pub struct ObjectReader {
    db: Arc<ObjectDatabase>,
    _pinned: PinnedSnapshot,
}

impl ObjectReader {
    pub fn has(&self, id: &ObjectId) -> bool {
        self.db.has(id)
    }

    pub fn open(
        &self,
        id: &ObjectId,
        type_hint: Option<ObjectType>,
    ) -> Result<ObjectLoader, GitError> {
        self.db.open(id, type_hint)
    }

    pub fn resolve(&self, abbrev: &AbbreviatedId) -> Result<BTreeSet<ObjectId>, GitError> {
        self.db.resolve(abbrev)
    }
}

/// Scoped writer staging objects until an explicit flush.
///
/// Dropping an unflushed inserter discards its staging; nothing
/// half-written ever becomes visible.
pub struct ObjectInserter {
    db: Arc<ObjectDatabase>,
    staged_loose: Vec<(ObjectId, NamedTempFile)>,
    staged_records: Vec<(ObjectType, Vec<u8>)>,
    name: String,
}

impl ObjectInserter {
    /// Compute the id and stage the object. Duplicates of objects the
    /// database already holds are no-ops.
    pub fn insert(&mut self, object_type: ObjectType, data: &[u8]) -> Result<ObjectId, GitError> {
        if !object_type.is_base() {
            return Err(GitError::Corrupt(
                object_type.to_string(),
                "only base object types can be inserted".to_string(),
            ));
        }
        let id = ObjectId::from_type_and_data(object_type, data);
        if self.db.has(&id) {
            return Ok(id);
        }
        match &self.db.backend {
            Backend::File(store) => {
                let (staged_id, tmp) = loose::stage(store.objects_dir(), object_type, data)?;
                self.staged_loose.push((staged_id, tmp));
            }
            Backend::Memory(_) => {
                self.staged_records.push((object_type, data.to_vec()));
            }
        }
        Ok(id)
    }

    /// Publish everything staged so far. Until flush returns, none of
    /// the inserted ids may be announced to other parties.
    pub fn flush(&mut self) -> Result<(), GitError> {
        match &self.db.backend {
            Backend::File(store) => {
                for (id, tmp) in self.staged_loose.drain(..) {
                    loose::publish(store.objects_dir(), &id, tmp)?;
                }
            }
            Backend::Memory(store) => {
                if self.staged_records.is_empty() {
                    return Ok(());
                }
                let mut stream = Vec::new();
                for (object_type, data) in self.staged_records.drain(..) {
                    append_record(&mut stream, object_type, &data);
                }
                let mut description = MemPackDescription::new(&self.name);
                description.set_ext(PACK_EXT, stream);
                store.commit_pack(description, None)?;
            }
        }
        Ok(())
    }

    /// Explicitly discard staged objects without publishing them.
    pub fn rollback(mut self) {
        self.staged_loose.clear();
        if let Backend::Memory(store) = &self.db.backend {
            if !self.staged_records.is_empty() {
                let mut description = MemPackDescription::new(&self.name);
                let mut stream = Vec::new();
                for (object_type, data) in self.staged_records.drain(..) {
                    append_record(&mut stream, object_type, &data);
                }
                description.set_ext(PACK_EXT, stream);
                store.rollback_pack(description);
            }
        }
    }
}
