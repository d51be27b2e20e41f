//! The in-memory object backend: a list of pack descriptions, each
//! mapping a pack-extension key to a byte buffer. The `"pack"` buffer
//! holds a stream of `"<type> <size>\0"`-prefixed records; committing a
//! description decodes it into an object table for reads.
//!
//! Staged descriptions are invisible until [`MemoryStore::commit_pack`]
//! swaps them in; [`MemoryStore::rollback_pack`] discards a staging
//! attempt without publishing anything.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bstr::ByteSlice;
use dashmap::DashMap;
use tracing::debug;

use crate::errors::GitError;
use crate::hash::{AbbreviatedId, ObjectId};
use crate::internal::object::types::ObjectType;
use crate::internal::odb::RawObject;

/// Extension key of the record-stream buffer.
pub const PACK_EXT: &str = "pack";

/// Description of one in-memory pack: a name and the byte buffers that
/// make it up, keyed by pack-file extension.
#[derive(Clone, Debug, Default)]
pub struct MemPackDescription {
    pub name: String,
    exts: HashMap<String, Arc<Vec<u8>>>,
}

impl MemPackDescription {
    pub fn new(name: &str) -> MemPackDescription {
        MemPackDescription {
            name: name.to_string(),
            exts: HashMap::new(),
        }
    }

    /// Attach a byte buffer under an extension key.
    pub fn set_ext(&mut self, key: &str, data: Vec<u8>) {
        self.exts.insert(key.to_string(), Arc::new(data));
    }

    /// The buffer stored under an extension key, if any.
    pub fn ext(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        self.exts.get(key).cloned()
    }
}

/// Append one object record to a description's record stream.
pub fn append_record(stream: &mut Vec<u8>, object_type: ObjectType, data: &[u8]) {
    stream.extend(object_type.to_bytes());
    stream.push(b' ');
    stream.extend(data.len().to_string().as_bytes());
    stream.push(b'\0');
    stream.extend(data);
}

/// A committed in-memory pack: its description plus the decoded table.
pub struct MemPack {
    pub description: MemPackDescription,
    objects: DashMap<ObjectId, (ObjectType, Arc<Vec<u8>>)>,
}

impl MemPack {
    /// Decode a description's record stream into an object table.
    fn decode(description: MemPackDescription) -> Result<MemPack, GitError> {
        let corrupt = |reason: String| GitError::Corrupt(description.name.clone(), reason);

        let objects = DashMap::new();
        if let Some(stream) = description.ext(PACK_EXT) {
            let mut rest = stream.as_slice();
            while !rest.is_empty() {
                let nul = rest
                    .find_byte(b'\0')
                    .ok_or_else(|| corrupt("record header has no terminator".to_string()))?;
                let header = &rest[..nul];
                let space = header
                    .find_byte(b' ')
                    .ok_or_else(|| corrupt("record header has no size".to_string()))?;
                let object_type = ObjectType::from_bytes(&header[..space])?;
                let size: usize = header[space + 1..]
                    .to_str()
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| corrupt("record size is not a number".to_string()))?;
                rest = &rest[nul + 1..];
                if rest.len() < size {
                    return Err(corrupt("truncated record payload".to_string()));
                }
                let data = rest[..size].to_vec();
                rest = &rest[size..];

                let id = ObjectId::from_type_and_data(object_type, &data);
                objects.insert(id, (object_type, Arc::new(data)));
            }
        }
        Ok(MemPack {
            description,
            objects,
        })
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    fn get(&self, id: &ObjectId) -> Option<(ObjectType, Arc<Vec<u8>>)> {
        self.objects.get(id).map(|entry| entry.value().clone())
    }
}

/// Fully in-memory object storage.
pub struct MemoryStore {
    packs: RwLock<Arc<Vec<Arc<MemPack>>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore {
            packs: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Snapshot of the committed pack list.
    pub fn pack_list(&self) -> Arc<Vec<Arc<MemPack>>> {
        Arc::clone(&self.packs.read().expect("pack list lock"))
    }

    /// Decode and publish a staged description atomically, optionally
    /// replacing the committed pack of the given name.
    pub fn commit_pack(
        &self,
        description: MemPackDescription,
        replace: Option<&str>,
    ) -> Result<(), GitError> {
        let pack = Arc::new(MemPack::decode(description)?);
        let mut guard = self.packs.write().expect("pack list lock");
        let mut list: Vec<Arc<MemPack>> = guard
            .iter()
            .filter(|p| Some(p.description.name.as_str()) != replace)
            .cloned()
            .collect();
        debug!(pack = %pack.description.name, objects = pack.object_count(), "committing memory pack");
        list.push(pack);
        *guard = Arc::new(list);
        Ok(())
    }

    /// Discard a staged description. Staged data was never visible, so
    /// this only logs the drop.
    pub fn rollback_pack(&self, description: MemPackDescription) {
        debug!(pack = %description.name, "rolling back staged memory pack");
        drop(description);
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.pack_list().iter().any(|pack| pack.contains(id))
    }

    pub fn locate(&self, id: &ObjectId) -> Result<Option<RawObject>, GitError> {
        for pack in self.pack_list().iter() {
            if let Some((object_type, data)) = pack.get(id) {
                return Ok(Some(RawObject::shared(*id, object_type, data)));
            }
        }
        Ok(None)
    }

    pub fn resolve_prefix(
        &self,
        abbrev: &AbbreviatedId,
        out: &mut BTreeSet<ObjectId>,
    ) -> Result<(), GitError> {
        for pack in self.pack_list().iter() {
            for entry in pack.objects.iter() {
                if abbrev.matches(entry.key()) {
                    out.insert(*entry.key());
                }
            }
        }
        Ok(())
    }
}
