//! The `packed-refs` file: refs stored compactly in one file, with
//! optional cached peel lines for annotated tags.
//!
//! Format:
//! ```text
//! # pack-refs with: peeled fully-peeled sorted
//! <hex-oid> <refname>
//! ^<hex-oid>   (peeled value of the annotated tag above)
//! ```
//!
//! Loose files override packed entries of the same name; deleting a ref
//! must remove it from both places.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bstr::ByteSlice;

use crate::errors::GitError;
use crate::hash::ObjectId;
use crate::internal::refs::lock::LockFile;

/// A single entry in the packed-refs file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedRef {
    pub name: String,
    pub id: ObjectId,
    pub peeled: Option<ObjectId>,
}

/// Parsed packed-refs file.
#[derive(Debug, Clone, Default)]
pub struct PackedRefs {
    refs: Vec<PackedRef>,
    sorted: bool,
}

/// Path of the packed-refs file.
pub fn packed_refs_path(git_dir: &Path) -> PathBuf {
    git_dir.join("packed-refs")
}

impl PackedRefs {
    /// Parse packed-refs content.
    pub fn parse(data: &[u8]) -> Result<PackedRefs, GitError> {
        let corrupt =
            |reason: String| GitError::Corrupt("packed-refs".to_string(), reason);

        let mut refs: Vec<PackedRef> = Vec::new();
        let mut sorted = false;

        for line in data.lines() {
            if line.is_empty() {
                continue;
            }
            if line.starts_with(b"#") {
                if line.find(b"sorted").is_some() {
                    sorted = true;
                }
                continue;
            }
            if let Some(hex) = line.strip_prefix(b"^") {
                let hex = hex
                    .to_str()
                    .map_err(|_| corrupt("non-UTF-8 peel line".to_string()))?;
                let peeled = ObjectId::from_str(hex.trim())?;
                let last = refs
                    .last_mut()
                    .ok_or_else(|| corrupt("peel line before any ref".to_string()))?;
                last.peeled = Some(peeled);
                continue;
            }

            let space = line
                .find_byte(b' ')
                .ok_or_else(|| corrupt("line without separator".to_string()))?;
            let hex = line[..space]
                .to_str()
                .map_err(|_| corrupt("non-UTF-8 id".to_string()))?;
            let id = ObjectId::from_str(hex)?;
            let name = line[space + 1..]
                .to_str()
                .map_err(|_| corrupt("non-UTF-8 ref name".to_string()))?
                .trim()
                .to_string();
            refs.push(PackedRef {
                name,
                id,
                peeled: None,
            });
        }

        Ok(PackedRefs { refs, sorted })
    }

    /// Load packed-refs from disk; absent file reads as empty.
    pub fn load(git_dir: &Path) -> Result<PackedRefs, GitError> {
        let path = packed_refs_path(git_dir);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PackedRefs {
                    refs: Vec::new(),
                    sorted: true,
                });
            }
            Err(e) => return Err(GitError::IO(e)),
        };
        PackedRefs::parse(&data)
    }

    /// Look up a ref by name.
    pub fn find(&self, name: &str) -> Option<&PackedRef> {
        if self.sorted {
            self.refs
                .binary_search_by(|pr| pr.name.as_str().cmp(name))
                .ok()
                .map(|idx| &self.refs[idx])
        } else {
            self.refs.iter().find(|pr| pr.name == name)
        }
    }

    /// Add or update a ref.
    pub fn upsert(&mut self, name: &str, id: ObjectId, peeled: Option<ObjectId>) {
        if let Some(existing) = self.refs.iter_mut().find(|pr| pr.name == name) {
            existing.id = id;
            existing.peeled = peeled;
        } else {
            self.refs.push(PackedRef {
                name: name.to_string(),
                id,
                peeled,
            });
            self.refs.sort_by(|a, b| a.name.cmp(&b.name));
            self.sorted = true;
        }
    }

    /// Remove a ref; reports whether an entry was dropped.
    pub fn remove(&mut self, name: &str) -> bool {
        let len_before = self.refs.len();
        self.refs.retain(|pr| pr.name != name);
        self.refs.len() < len_before
    }

    pub fn refs(&self) -> &[PackedRef] {
        &self.refs
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Write the file atomically under its lock.
    pub fn write(&self, git_dir: &Path) -> Result<(), GitError> {
        let path = packed_refs_path(git_dir);
        let mut lock = LockFile::acquire(&path)?;

        let mut content = Vec::new();
        content.extend(b"# pack-refs with: peeled fully-peeled sorted \n");
        let mut sorted_refs = self.refs.clone();
        sorted_refs.sort_by(|a, b| a.name.cmp(&b.name));
        for pr in &sorted_refs {
            content.extend(format!("{} {}\n", pr.id.to_hex(), pr.name).as_bytes());
            if let Some(peeled) = &pr.peeled {
                content.extend(format!("^{}\n", peeled.to_hex()).as_bytes());
            }
        }
        lock.write_all(&content)?;
        lock.commit()
    }
}
