//! Pack index (.idx) v2 reader: fanout table, sorted object names,
//! CRC32 table, and 31-bit offsets with a large-offset extension, as
//! described by the [pack-format spec](https://git-scm.com/docs/pack-format).

use std::collections::BTreeSet;
use std::fs;
use std::io::Cursor;
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};

use crate::errors::GitError;
use crate::hash::{AbbreviatedId, OBJECT_ID_LEN, ObjectId};
use crate::utils::read_bytes;

/// The 4-byte pack index signature `\377t0c` followed by version 2.
const IDX_V2_MAGIC: [u8; 4] = [0xFF, 0x74, 0x4F, 0x63];

/// Parsed pack index, ordered by object name.
pub struct PackIndex {
    fanout: [u32; 256],
    names: Vec<ObjectId>,
    crc32: Vec<u32>,
    offsets: Vec<u64>,
    /// Trailer hash of the companion .pack file.
    pub pack_hash: ObjectId,
}

impl PackIndex {
    /// Parse an idx v2 byte buffer.
    pub fn parse(path_label: &str, data: &[u8]) -> Result<PackIndex, GitError> {
        let corrupt = |reason: String| GitError::Corrupt(path_label.to_string(), reason);

        let mut cursor = Cursor::new(data);
        let magic = read_bytes(&mut cursor, 4).map_err(|e| corrupt(e.to_string()))?;
        if magic != IDX_V2_MAGIC {
            return Err(corrupt("not a pack index (bad magic)".to_string()));
        }
        let version = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| corrupt(e.to_string()))?;
        if version != 2 {
            return Err(corrupt(format!("unsupported pack index version {version}")));
        }

        let mut fanout = [0u32; 256];
        for slot in fanout.iter_mut() {
            *slot = cursor
                .read_u32::<BigEndian>()
                .map_err(|e| corrupt(e.to_string()))?;
        }
        let count = fanout[255] as usize;

        let mut names = Vec::with_capacity(count);
        for _ in 0..count {
            let raw = read_bytes(&mut cursor, OBJECT_ID_LEN).map_err(|e| corrupt(e.to_string()))?;
            names.push(ObjectId::from_bytes(&raw)?);
        }
        if !names.is_sorted() {
            return Err(corrupt("object names are not sorted".to_string()));
        }

        let mut crc32 = Vec::with_capacity(count);
        for _ in 0..count {
            crc32.push(
                cursor
                    .read_u32::<BigEndian>()
                    .map_err(|e| corrupt(e.to_string()))?,
            );
        }

        let mut small_offsets = Vec::with_capacity(count);
        let mut large_needed = 0usize;
        for _ in 0..count {
            let v = cursor
                .read_u32::<BigEndian>()
                .map_err(|e| corrupt(e.to_string()))?;
            if v & 0x8000_0000 != 0 {
                large_needed = large_needed.max((v & 0x7FFF_FFFF) as usize + 1);
            }
            small_offsets.push(v);
        }
        let mut large_offsets = Vec::with_capacity(large_needed);
        for _ in 0..large_needed {
            large_offsets.push(
                cursor
                    .read_u64::<BigEndian>()
                    .map_err(|e| corrupt(e.to_string()))?,
            );
        }

        let mut offsets = Vec::with_capacity(count);
        for v in small_offsets {
            if v & 0x8000_0000 != 0 {
                offsets.push(large_offsets[(v & 0x7FFF_FFFF) as usize]);
            } else {
                offsets.push(v as u64);
            }
        }

        let mut trailer = Cursor::new(&data[data.len().saturating_sub(2 * OBJECT_ID_LEN)..]);
        let pack_hash =
            ObjectId::from_stream(&mut trailer).map_err(|e| corrupt(e.to_string()))?;

        Ok(PackIndex {
            fanout,
            names,
            crc32,
            offsets,
            pack_hash,
        })
    }

    /// Load and parse an idx file from disk.
    pub fn load(path: &Path) -> Result<PackIndex, GitError> {
        let data = fs::read(path)?;
        PackIndex::parse(&path.display().to_string(), &data)
    }

    /// Number of objects in the pack.
    pub fn object_count(&self) -> usize {
        self.names.len()
    }

    /// Position of `id` in the sorted name table.
    fn position_of(&self, id: &ObjectId) -> Option<usize> {
        let bucket = id.first_byte() as usize;
        let lo = if bucket == 0 {
            0
        } else {
            self.fanout[bucket - 1] as usize
        };
        let hi = self.fanout[bucket] as usize;
        self.names[lo..hi]
            .binary_search(id)
            .ok()
            .map(|pos| lo + pos)
    }

    /// Whether the pack contains `id`.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.position_of(id).is_some()
    }

    /// Pack data offset of `id`, if present.
    pub fn offset_of(&self, id: &ObjectId) -> Option<u64> {
        self.position_of(id).map(|pos| self.offsets[pos])
    }

    /// CRC32 of the packed entry bytes for `id`, if present.
    pub fn crc_of(&self, id: &ObjectId) -> Option<u32> {
        self.position_of(id).map(|pos| self.crc32[pos])
    }

    /// Smallest stored offset strictly greater than `offset`, used to
    /// bound an entry's compressed span.
    pub fn next_offset_after(&self, offset: u64) -> Option<u64> {
        self.offsets
            .iter()
            .copied()
            .filter(|&o| o > offset)
            .min()
    }

    /// Collect all ids matching an abbreviated prefix.
    pub fn prefix_matches(&self, abbrev: &AbbreviatedId, out: &mut BTreeSet<ObjectId>) {
        // All candidates share the first fanout bucket of the prefix,
        // except single-nibble prefixes which span sixteen buckets.
        let prefix = abbrev.hex_prefix();
        let (lo_bucket, hi_bucket) = if prefix.len() >= 2 {
            let b = usize::from_str_radix(&prefix[..2], 16).unwrap_or(0);
            (b, b)
        } else {
            let n = usize::from_str_radix(&prefix, 16).unwrap_or(0);
            (n << 4, (n << 4) | 0x0F)
        };
        let lo = if lo_bucket == 0 {
            0
        } else {
            self.fanout[lo_bucket - 1] as usize
        };
        let hi = self.fanout[hi_bucket] as usize;
        for id in &self.names[lo..hi] {
            if abbrev.matches(id) {
                out.insert(*id);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    /// Serialize a minimal idx v2 for the given (id, offset, crc) rows.
    pub(crate) fn build_idx(entries: &mut Vec<(ObjectId, u64, u32)>, pack_hash: ObjectId) -> Vec<u8> {
        entries.sort_by_key(|(id, _, _)| *id);
        let mut out = Vec::new();
        out.extend(IDX_V2_MAGIC);
        out.write_u32::<BigEndian>(2).unwrap();

        let mut fanout = [0u32; 256];
        for (id, _, _) in entries.iter() {
            fanout[id.first_byte() as usize] += 1;
        }
        for i in 1..256 {
            fanout[i] += fanout[i - 1];
        }
        for v in fanout {
            out.write_u32::<BigEndian>(v).unwrap();
        }
        for (id, _, _) in entries.iter() {
            out.write_all(id.as_bytes()).unwrap();
        }
        for (_, _, crc) in entries.iter() {
            out.write_u32::<BigEndian>(*crc).unwrap();
        }
        let mut large = Vec::new();
        for (_, offset, _) in entries.iter() {
            if *offset <= 0x7FFF_FFFF {
                out.write_u32::<BigEndian>(*offset as u32).unwrap();
            } else {
                out.write_u32::<BigEndian>(0x8000_0000 | large.len() as u32)
                    .unwrap();
                large.push(*offset);
            }
        }
        for offset in large {
            out.write_u64::<BigEndian>(offset).unwrap();
        }
        out.write_all(pack_hash.as_bytes()).unwrap();
        // Trailer checksum of the idx itself; value is unchecked here.
        out.write_all(ObjectId::hash_of(&out).as_bytes()).unwrap();
        out
    }

    fn id_of(n: u8) -> ObjectId {
        ObjectId::from_bytes(&[n; 20]).unwrap()
    }

    /// Lookups find offsets and CRCs through the fanout table.
    #[test]
    fn lookup_by_fanout() {
        let mut entries = vec![
            (id_of(0x01), 12, 111),
            (id_of(0x55), 40, 222),
            (id_of(0xfe), 77, 333),
        ];
        let data = build_idx(&mut entries, id_of(0xAA));
        let idx = PackIndex::parse("test.idx", &data).unwrap();

        assert_eq!(idx.object_count(), 3);
        assert_eq!(idx.offset_of(&id_of(0x55)), Some(40));
        assert_eq!(idx.crc_of(&id_of(0x55)), Some(222));
        assert_eq!(idx.offset_of(&id_of(0x56)), None);
        assert!(idx.contains(&id_of(0xfe)));
        assert_eq!(idx.pack_hash, id_of(0xAA));
        assert_eq!(idx.next_offset_after(12), Some(40));
        assert_eq!(idx.next_offset_after(77), None);
    }

    /// Offsets above 2^31 go through the large-offset table.
    #[test]
    fn large_offsets_round_trip() {
        let big = 0x1_2345_6789u64;
        let mut entries = vec![(id_of(0x10), big, 1), (id_of(0x20), 64, 2)];
        let data = build_idx(&mut entries, id_of(0xBB));
        let idx = PackIndex::parse("test.idx", &data).unwrap();
        assert_eq!(idx.offset_of(&id_of(0x10)), Some(big));
        assert_eq!(idx.offset_of(&id_of(0x20)), Some(64));
    }

    /// Prefix scans return every id in the bucket that matches.
    #[test]
    fn prefix_scan() {
        let near = {
            let mut bytes = [0x55u8; 20];
            bytes[19] = 0x56;
            ObjectId::from_bytes(&bytes).unwrap()
        };
        let mut entries = vec![(id_of(0x55), 1, 0), (near, 2, 0), (id_of(0x57), 3, 0)];
        let data = build_idx(&mut entries, id_of(0xCC));
        let idx = PackIndex::parse("test.idx", &data).unwrap();

        let abbrev = AbbreviatedId::from_hex_prefix("5555").unwrap();
        let mut out = BTreeSet::new();
        idx.prefix_matches(&abbrev, &mut out);
        assert_eq!(out.len(), 2);
        assert!(out.contains(&id_of(0x55)));
        assert!(out.contains(&near));
    }

    /// Bad magic bytes are corrupt, not a silent empty index.
    #[test]
    fn reject_bad_magic() {
        let data = b"PACKidx nonsense".to_vec();
        assert!(matches!(
            PackIndex::parse("bad.idx", &data),
            Err(GitError::Corrupt(_, _))
        ));
    }
}
