//! Pack file reader: random access to entries through the companion
//! index, with transparent reconstruction of delta chains, following
//! the [pack-format spec](https://git-scm.com/docs/pack-format).

pub mod delta;
pub mod idx;

use std::fs;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt};
use tracing::trace;

use crate::errors::GitError;
use crate::hash::{OBJECT_ID_LEN, ObjectId};
use crate::internal::object::types::ObjectType;
use crate::internal::odb::pack::idx::PackIndex;
use crate::internal::zlib::InflateReader;

/// 4-byte pack data signature.
const PACK_MAGIC: &[u8; 4] = b"PACK";

/// One pack file plus its parsed index.
pub struct Pack {
    pub pack_path: PathBuf,
    pub index: PackIndex,
    data_len: u64,
    max_delta_depth: usize,
}

impl Pack {
    /// Open a pack by its `.pack` path; the `.idx` must sit beside it.
    ///
    /// Validates the data header and that index and data agree on the
    /// object count.
    pub fn open(pack_path: &Path, max_delta_depth: usize) -> Result<Pack, GitError> {
        let idx_path = pack_path.with_extension("idx");
        let index = PackIndex::load(&idx_path)?;

        let label = pack_path.display().to_string();
        let corrupt = |reason: String| GitError::Corrupt(label.clone(), reason);

        let mut file = BufReader::new(fs::File::open(pack_path)?);
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic).map_err(|e| corrupt(e.to_string()))?;
        if &magic != PACK_MAGIC {
            return Err(corrupt("not a pack file (bad magic)".to_string()));
        }
        let version = file
            .read_u32::<BigEndian>()
            .map_err(|e| corrupt(e.to_string()))?;
        if version != 2 && version != 3 {
            return Err(corrupt(format!("unsupported pack version {version}")));
        }
        let count = file
            .read_u32::<BigEndian>()
            .map_err(|e| corrupt(e.to_string()))?;
        if count as usize != index.object_count() {
            return Err(corrupt(format!(
                "pack holds {count} objects but index lists {}",
                index.object_count()
            )));
        }
        let data_len = fs::metadata(pack_path)?.len();

        Ok(Pack {
            pack_path: pack_path.to_path_buf(),
            index,
            data_len,
            max_delta_depth,
        })
    }

    /// Whether the pack contains `id`.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.index.contains(id)
    }

    /// Read and reconstruct the object `id`, resolving delta chains.
    ///
    /// Returns `Ok(None)` when the pack does not hold `id`; the entry
    /// bytes are CRC-checked against the index before use.
    pub fn entry(&self, id: &ObjectId) -> Result<Option<(ObjectType, Vec<u8>)>, GitError> {
        let Some(offset) = self.index.offset_of(id) else {
            return Ok(None);
        };
        self.verify_crc(id, offset)?;
        let (object_type, data) = self.read_entry_at(offset, 0)?;
        trace!(pack = %self.pack_path.display(), id = %id, %object_type, "pack entry read");
        Ok(Some((object_type, data)))
    }

    /// Compare the stored CRC32 of the entry span against the bytes on
    /// disk. The span runs to the next entry offset, or to the trailer
    /// for the last entry.
    fn verify_crc(&self, id: &ObjectId, offset: u64) -> Result<(), GitError> {
        let Some(expected) = self.index.crc_of(id) else {
            return Ok(());
        };
        let end = self
            .index
            .next_offset_after(offset)
            .unwrap_or(self.data_len - OBJECT_ID_LEN as u64);
        let mut file = fs::File::open(&self.pack_path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut raw = vec![0u8; (end - offset) as usize];
        file.read_exact(&mut raw)?;
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&raw);
        let actual = hasher.finalize();
        if actual != expected {
            return Err(GitError::Corrupt(
                id.to_hex(),
                format!(
                    "pack entry CRC mismatch in {} (stored {expected:08x}, computed {actual:08x})",
                    self.pack_path.display()
                ),
            ));
        }
        Ok(())
    }

    /// Read the entry at `offset`, recursing through delta bases.
    fn read_entry_at(&self, offset: u64, depth: usize) -> Result<(ObjectType, Vec<u8>), GitError> {
        let label = self.pack_path.display().to_string();
        let corrupt = |reason: String| GitError::Corrupt(label.clone(), reason);

        if depth > self.max_delta_depth {
            return Err(corrupt(format!(
                "delta chain exceeds {} at offset {offset}",
                self.max_delta_depth
            )));
        }

        let mut reader = BufReader::new(fs::File::open(&self.pack_path)?);
        reader.seek(SeekFrom::Start(offset))?;

        // Entry header: 3 type bits and a varint size, low nibble first.
        let mut byte = reader.read_u8().map_err(|e| corrupt(e.to_string()))?;
        let type_bits = (byte >> 4) & 0x07;
        let mut size = u64::from(byte & 0x0F);
        let mut shift = 4;
        while byte & 0x80 != 0 {
            byte = reader.read_u8().map_err(|e| corrupt(e.to_string()))?;
            size |= u64::from(byte & 0x7F) << shift;
            shift += 7;
        }
        let object_type = ObjectType::from_pack_type_u8(type_bits)?;

        match object_type {
            ObjectType::OffsetDelta => {
                // Negative distance back to the base entry.
                let mut byte = reader.read_u8().map_err(|e| corrupt(e.to_string()))?;
                let mut distance = u64::from(byte & 0x7F);
                while byte & 0x80 != 0 {
                    byte = reader.read_u8().map_err(|e| corrupt(e.to_string()))?;
                    distance = ((distance + 1) << 7) | u64::from(byte & 0x7F);
                }
                let base_offset = offset
                    .checked_sub(distance)
                    .ok_or_else(|| corrupt(format!("delta base distance {distance} underflows")))?;
                if base_offset == offset {
                    return Err(corrupt("delta references itself".to_string()));
                }
                let delta = inflate_payload(reader, size, &label)?;
                let (base_type, base) = self.read_entry_at(base_offset, depth + 1)?;
                Ok((base_type, delta::apply(&base, &delta)?))
            }
            ObjectType::HashDelta => {
                let base_id = ObjectId::from_stream(&mut reader)?;
                let base_offset = self.index.offset_of(&base_id).ok_or_else(|| {
                    corrupt(format!("delta base {base_id} is not in this pack"))
                })?;
                let delta = inflate_payload(reader, size, &label)?;
                let (base_type, base) = self.read_entry_at(base_offset, depth + 1)?;
                Ok((base_type, delta::apply(&base, &delta)?))
            }
            _ => {
                let data = inflate_payload(reader, size, &label)?;
                Ok((object_type, data))
            }
        }
    }
}

/// Inflate exactly `size` bytes of entry payload.
fn inflate_payload<R: std::io::BufRead>(
    reader: R,
    size: u64,
    label: &str,
) -> Result<Vec<u8>, GitError> {
    let mut inflater = InflateReader::new_raw(reader);
    let mut data = vec![0u8; size as usize];
    inflater
        .read_exact(&mut data)
        .map_err(|e| GitError::Corrupt(label.to_string(), format!("entry payload: {e}")))?;
    Ok(data)
}
