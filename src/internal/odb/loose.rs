//! Loose object storage: one zlib-deflated file per object at
//! `objects/<xx>/<38-hex>`, whose inflated form is
//! `"<type> <size>\0"` followed by the payload.
//!
//! Reads verify the recomputed id against the file name. Writes deflate
//! into a temporary file in the objects directory and atomically
//! publish it by rename; an object that already exists is left alone.

use std::collections::BTreeSet;
use std::fs;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use bstr::ByteSlice;
use flate2::Compression;
use flate2::write::ZlibEncoder;
use tempfile::NamedTempFile;

use crate::errors::GitError;
use crate::hash::{AbbreviatedId, ObjectId};
use crate::internal::object::types::ObjectType;
use crate::internal::zlib::InflateReader;

/// Parsed `"<type> <size>\0"` prefix of a loose object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LooseHeader {
    pub object_type: ObjectType,
    pub size: u64,
}

/// Path of the loose file for `id` under `objects_dir`.
pub fn object_path(objects_dir: &Path, id: &ObjectId) -> PathBuf {
    let hex = id.to_hex();
    objects_dir.join(&hex[..2]).join(&hex[2..])
}

/// Whether a loose file exists for `id`.
pub fn contains(objects_dir: &Path, id: &ObjectId) -> bool {
    object_path(objects_dir, id).is_file()
}

fn parse_header(id: &ObjectId, bytes: &[u8]) -> Result<(LooseHeader, usize), GitError> {
    let corrupt = |reason: &str| GitError::Corrupt(id.to_hex(), reason.to_string());

    let nul = bytes
        .find_byte(b'\0')
        .ok_or_else(|| corrupt("loose header has no NUL terminator"))?;
    let header = &bytes[..nul];
    let space = header
        .find_byte(b' ')
        .ok_or_else(|| corrupt("loose header has no size field"))?;
    let object_type = ObjectType::from_bytes(&header[..space])?;
    if !object_type.is_base() {
        return Err(corrupt("delta type in loose header"));
    }
    let size: u64 = header[space + 1..]
        .to_str()
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| corrupt("loose header size is not a number"))?;
    Ok((LooseHeader { object_type, size }, nul + 1))
}

/// Read just the `"<type> <size>\0"` prefix of the loose file for `id`.
///
/// Returns `Ok(None)` when no loose file exists.
pub fn peek_header(objects_dir: &Path, id: &ObjectId) -> Result<Option<LooseHeader>, GitError> {
    let path = object_path(objects_dir, id);
    let file = match fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(GitError::IO(e)),
    };

    // The longest possible header is well under 64 bytes.
    let mut reader = InflateReader::new_raw(BufReader::new(file));
    let mut prefix = [0u8; 64];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = reader
            .read(&mut prefix[filled..])
            .map_err(|e| GitError::Corrupt(id.to_hex(), e.to_string()))?;
        if n == 0 {
            break;
        }
        filled += n;
        if prefix[..filled].contains(&b'\0') {
            break;
        }
    }
    let (header, _) = parse_header(id, &prefix[..filled])?;
    Ok(Some(header))
}

/// Read and verify the loose object for `id`.
///
/// Returns `Ok(None)` when no loose file exists; a hash or header
/// mismatch is `Corrupt`.
pub fn read(objects_dir: &Path, id: &ObjectId) -> Result<Option<(ObjectType, Vec<u8>)>, GitError> {
    let path = object_path(objects_dir, id);
    let file = match fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(GitError::IO(e)),
    };

    let mut reader = InflateReader::new_hashing(BufReader::new(file));
    let mut inflated = Vec::new();
    reader
        .read_to_end(&mut inflated)
        .map_err(|e| GitError::Corrupt(id.to_hex(), e.to_string()))?;
    let digest = reader.finalize_hash().expect("hashing reader");

    let (header, body_start) = parse_header(id, &inflated)?;
    let body = inflated.split_off(body_start);
    if body.len() as u64 != header.size {
        return Err(GitError::Corrupt(
            id.to_hex(),
            format!("loose size {} but payload is {} bytes", header.size, body.len()),
        ));
    }
    if &digest != id.as_bytes() {
        return Err(GitError::Corrupt(
            id.to_hex(),
            format!("loose content hashes to {}", hex::encode(digest)),
        ));
    }
    Ok(Some((header.object_type, body)))
}

/// Deflate an object into its loose file form.
pub fn compress(object_type: ObjectType, data: &[u8]) -> Result<Vec<u8>, GitError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(object_type.to_bytes())?;
    encoder.write_all(b" ")?;
    encoder.write_all(data.len().to_string().as_bytes())?;
    encoder.write_all(b"\0")?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Deflate `data` into a temporary file in `objects_dir`, to be
/// published later by [`publish`]. Staging in the same directory keeps
/// the final rename atomic.
pub fn stage(
    objects_dir: &Path,
    object_type: ObjectType,
    data: &[u8],
) -> Result<(ObjectId, NamedTempFile), GitError> {
    let id = ObjectId::from_type_and_data(object_type, data);
    let compressed = compress(object_type, data)?;
    let mut tmp = NamedTempFile::new_in(objects_dir)?;
    tmp.write_all(&compressed)?;
    tmp.flush()?;
    Ok((id, tmp))
}

/// Atomically publish a staged file as the loose object for `id`.
/// Publishing over an existing object is a no-op.
pub fn publish(objects_dir: &Path, id: &ObjectId, staged: NamedTempFile) -> Result<(), GitError> {
    let path = object_path(objects_dir, id);
    if path.is_file() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    staged
        .persist(&path)
        .map_err(|e| GitError::IO(e.error))?;
    Ok(())
}

/// Collect all loose ids matching an abbreviated prefix.
pub fn scan_prefix(
    objects_dir: &Path,
    abbrev: &AbbreviatedId,
    out: &mut BTreeSet<ObjectId>,
) -> Result<(), GitError> {
    let prefix = abbrev.hex_prefix();
    let fan_dirs: Vec<String> = if prefix.len() >= 2 {
        vec![prefix[..2].to_string()]
    } else {
        // A single-nibble prefix spans sixteen fanout directories.
        (0..16).map(|n| format!("{}{:x}", &prefix, n)).collect()
    };

    for fan in fan_dirs {
        let dir = objects_dir.join(&fan);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(GitError::IO(e)),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.len() != 38 {
                continue;
            }
            let hex = format!("{fan}{name}");
            let Ok(id) = hex.parse::<ObjectId>() else {
                continue;
            };
            if abbrev.matches(&id) {
                out.insert(id);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_objects_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    /// Staged writes publish atomically and read back verified.
    #[test]
    fn write_then_read_round_trip() {
        let dir = temp_objects_dir();
        let (id, staged) = stage(dir.path(), ObjectType::Blob, b"what is up, doc?").unwrap();
        publish(dir.path(), &id, staged).unwrap();

        assert!(contains(dir.path(), &id));
        let (ty, body) = read(dir.path(), &id).unwrap().unwrap();
        assert_eq!(ty, ObjectType::Blob);
        assert_eq!(body, b"what is up, doc?");
        assert_eq!(id.to_hex(), "bd9dbf5aae1a3862dd1526723246b20206e5fc37");
    }

    /// Publishing the same object twice is a no-op.
    #[test]
    fn duplicate_publish_is_noop() {
        let dir = temp_objects_dir();
        let (id, staged) = stage(dir.path(), ObjectType::Blob, b"dup").unwrap();
        publish(dir.path(), &id, staged).unwrap();
        let (id2, staged2) = stage(dir.path(), ObjectType::Blob, b"dup").unwrap();
        assert_eq!(id, id2);
        publish(dir.path(), &id2, staged2).unwrap();
        assert!(read(dir.path(), &id).unwrap().is_some());
    }

    /// Header peeking reports type and size without the payload.
    #[test]
    fn peek_reports_type_and_size() {
        let dir = temp_objects_dir();
        let (id, staged) = stage(dir.path(), ObjectType::Commit, b"tree x\n").unwrap();
        publish(dir.path(), &id, staged).unwrap();
        let header = peek_header(dir.path(), &id).unwrap().unwrap();
        assert_eq!(header.object_type, ObjectType::Commit);
        assert_eq!(header.size, 7);
    }

    /// Absent objects read as None, not as an error.
    #[test]
    fn missing_object_is_none() {
        let dir = temp_objects_dir();
        let id = ObjectId::hash_of(b"nope");
        assert!(read(dir.path(), &id).unwrap().is_none());
        assert!(peek_header(dir.path(), &id).unwrap().is_none());
    }

    /// Content that does not hash to the file name is corrupt.
    #[test]
    fn reject_hash_mismatch() {
        let dir = temp_objects_dir();
        let id = ObjectId::hash_of(b"claimed");
        let path = object_path(dir.path(), &id);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, compress(ObjectType::Blob, b"actual").unwrap()).unwrap();
        assert!(matches!(
            read(dir.path(), &id),
            Err(GitError::Corrupt(_, _))
        ));
    }

    /// Prefix scans find matching ids and ignore others.
    #[test]
    fn prefix_scan_finds_matches() {
        let dir = temp_objects_dir();
        let (id, staged) = stage(dir.path(), ObjectType::Blob, b"scan me").unwrap();
        publish(dir.path(), &id, staged).unwrap();

        let abbrev = AbbreviatedId::from_id(&id, 8);
        let mut out = BTreeSet::new();
        scan_prefix(dir.path(), &abbrev, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out.contains(&id));

        let other = AbbreviatedId::from_hex_prefix("ffffffff").unwrap();
        let mut none = BTreeSet::new();
        scan_prefix(dir.path(), &other, &mut none).unwrap();
        assert!(none.is_empty() || !none.contains(&id));
    }
}
