//! The on-disk object backend: loose objects under `objects/xx/`, pack
//! files under `objects/pack/`, and the `objects/info/alternates` list.
//!
//! The pack list is copy-on-write: scans build a new immutable list and
//! atomically replace the shared pointer, while readers keep working on
//! the snapshot they already hold. The list is rescanned when the pack
//! directory's mtime or file set changes.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use bstr::ByteSlice;
use tracing::{debug, warn};

use crate::errors::GitError;
use crate::hash::{AbbreviatedId, ObjectId};
use crate::internal::odb::RawObject;
use crate::internal::odb::loose;
use crate::internal::odb::pack::Pack;

/// Snapshot of the pack directory at one point in time.
struct PackSnapshot {
    mtime: Option<SystemTime>,
    names: Vec<String>,
    list: Arc<Vec<Arc<Pack>>>,
}

impl PackSnapshot {
    fn empty() -> PackSnapshot {
        PackSnapshot {
            mtime: None,
            names: Vec::new(),
            list: Arc::new(Vec::new()),
        }
    }
}

/// File-backed object storage (loose + pack).
pub struct FileStore {
    objects_dir: PathBuf,
    pack_dir: PathBuf,
    max_delta_depth: usize,
    packs: RwLock<PackSnapshot>,
}

impl FileStore {
    pub fn new(objects_dir: PathBuf, max_delta_depth: usize) -> FileStore {
        let pack_dir = objects_dir.join("pack");
        FileStore {
            objects_dir,
            pack_dir,
            max_delta_depth,
            packs: RwLock::new(PackSnapshot::empty()),
        }
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    /// Stat the pack directory and report (mtime, sorted pack names).
    fn stat_pack_dir(&self) -> (Option<SystemTime>, Vec<String>) {
        let mtime = fs::metadata(&self.pack_dir)
            .and_then(|m| m.modified())
            .ok();
        let mut names = Vec::new();
        if let Ok(entries) = fs::read_dir(&self.pack_dir) {
            for entry in entries.flatten() {
                if let Some(name) = entry.file_name().to_str() {
                    if name.starts_with("pack-") && name.ends_with(".pack") {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names.sort();
        (mtime, names)
    }

    /// Current pack list, rescanning lazily when the directory changed.
    ///
    /// Returned snapshots are immutable; readers holding one are not
    /// affected by later swaps.
    pub fn pack_list(&self) -> Arc<Vec<Arc<Pack>>> {
        let (mtime, names) = self.stat_pack_dir();
        {
            let snapshot = self.packs.read().expect("pack list lock");
            if snapshot.mtime == mtime && snapshot.names == names {
                return Arc::clone(&snapshot.list);
            }
        }

        let mut snapshot = self.packs.write().expect("pack list lock");
        // Another thread may have rescanned while we waited.
        if snapshot.mtime == mtime && snapshot.names == names {
            return Arc::clone(&snapshot.list);
        }

        debug!(pack_dir = %self.pack_dir.display(), packs = names.len(), "rescanning pack directory");
        let old: HashMap<String, Arc<Pack>> = snapshot
            .names
            .iter()
            .cloned()
            .zip(snapshot.list.iter().cloned())
            .collect();
        let mut list = Vec::with_capacity(names.len());
        let mut kept_names = Vec::with_capacity(names.len());
        for name in &names {
            if let Some(pack) = old.get(name) {
                list.push(Arc::clone(pack));
                kept_names.push(name.clone());
                continue;
            }
            match Pack::open(&self.pack_dir.join(name), self.max_delta_depth) {
                Ok(pack) => {
                    list.push(Arc::new(pack));
                    kept_names.push(name.clone());
                }
                Err(e) => {
                    // A pack mid-write may lack its index; skip it until
                    // the next rescan sees a stable pair.
                    warn!(pack = %name, error = %e, "skipping unreadable pack");
                }
            }
        }

        let list = Arc::new(list);
        *snapshot = PackSnapshot {
            mtime,
            names: kept_names,
            list: Arc::clone(&list),
        };
        list
    }

    /// Drop the cached pack snapshot, releasing mapped resources.
    /// The next read rescans from scratch.
    pub fn release(&self) {
        let mut snapshot = self.packs.write().expect("pack list lock");
        *snapshot = PackSnapshot::empty();
    }

    /// Whether `id` exists loose or in any pack.
    pub fn contains(&self, id: &ObjectId) -> bool {
        if loose::contains(&self.objects_dir, id) {
            return true;
        }
        self.pack_list().iter().any(|pack| pack.contains(id))
    }

    /// Locate `id`, preferring loose storage over packs.
    pub fn locate(&self, id: &ObjectId) -> Result<Option<RawObject>, GitError> {
        if let Some(header) = loose::peek_header(&self.objects_dir, id)? {
            return Ok(Some(RawObject::loose(
                *id,
                header.object_type,
                header.size,
                self.objects_dir.clone(),
            )));
        }
        for pack in self.pack_list().iter() {
            if let Some((object_type, data)) = pack.entry(id)? {
                return Ok(Some(RawObject::inline(*id, object_type, data)));
            }
        }
        Ok(None)
    }

    /// Union of loose and packed ids matching the prefix.
    pub fn resolve_prefix(
        &self,
        abbrev: &AbbreviatedId,
        out: &mut BTreeSet<ObjectId>,
    ) -> Result<(), GitError> {
        loose::scan_prefix(&self.objects_dir, abbrev, out)?;
        for pack in self.pack_list().iter() {
            pack.index.prefix_matches(abbrev, out);
        }
        Ok(())
    }

    /// Parse `objects/info/alternates`: one object directory per line,
    /// absolute or relative to this store's objects directory. Blank
    /// lines and `#` comments are skipped.
    pub fn read_alternates(&self) -> Result<Vec<PathBuf>, GitError> {
        let path = self.objects_dir.join("info").join("alternates");
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(GitError::IO(e)),
        };
        let mut dirs = Vec::new();
        for line in data.lines() {
            let line = line.trim_with(|c| c.is_ascii_whitespace());
            if line.is_empty() || line.starts_with(b"#") {
                continue;
            }
            let text = line.to_str().map_err(|_| {
                GitError::Corrupt(path.display().to_string(), "non-UTF-8 path".to_string())
            })?;
            let dir = PathBuf::from(text);
            if dir.is_absolute() {
                dirs.push(dir);
            } else {
                dirs.push(self.objects_dir.join(dir));
            }
        }
        Ok(dirs)
    }
}
