//! Loose ref files: one file per ref under the git directory, holding
//! either `ref: <target>\n` for symbolic refs or 40 hex digits for
//! direct ones.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bstr::ByteSlice;

use crate::errors::GitError;
use crate::hash::ObjectId;
use crate::internal::refs::{Ref, RefStorage, RefTarget};

/// File path of a loose ref. Names are validated before use, so the
/// path cannot escape the git directory.
pub fn ref_path(git_dir: &Path, name: &str) -> PathBuf {
    git_dir.join(name)
}

/// Serialize a target into loose file content.
pub fn serialize(target: &RefTarget) -> Vec<u8> {
    match target {
        RefTarget::Direct(id) => format!("{}\n", id.to_hex()).into_bytes(),
        RefTarget::Symbolic(name) => format!("ref: {name}\n").into_bytes(),
    }
}

/// Parse loose file content into a target.
pub fn parse(name: &str, data: &[u8]) -> Result<RefTarget, GitError> {
    let line = data.trim_with(|c| c.is_ascii_whitespace());
    if let Some(target) = line.strip_prefix(b"ref: ") {
        let target = target
            .to_str()
            .map_err(|_| GitError::Corrupt(name.to_string(), "non-UTF-8 symref target".into()))?;
        return Ok(RefTarget::Symbolic(target.trim().to_string()));
    }
    let hex = line
        .to_str()
        .map_err(|_| GitError::Corrupt(name.to_string(), "non-UTF-8 ref content".into()))?;
    let id = ObjectId::from_str(hex)
        .map_err(|_| GitError::Corrupt(name.to_string(), format!("`{hex}` is not a ref value")))?;
    Ok(RefTarget::Direct(id))
}

/// Read the loose ref `name`, or `None` when no loose file exists.
pub fn read(git_dir: &Path, name: &str) -> Result<Option<Ref>, GitError> {
    let path = ref_path(git_dir, name);
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(GitError::IO(e)),
    };
    let target = parse(name, &data)?;
    Ok(Some(Ref {
        name: name.to_string(),
        storage: RefStorage::Loose,
        target,
        peeled: None,
        is_peeled: false,
    }))
}

/// Remove the loose file of `name`, tolerating its absence.
pub fn delete(git_dir: &Path, name: &str) -> Result<(), GitError> {
    match fs::remove_file(ref_path(git_dir, name)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(GitError::IO(e)),
    }
}

/// Enumerate loose ref names under `refs/`, sorted.
pub fn enumerate(git_dir: &Path) -> Result<Vec<String>, GitError> {
    let mut names = Vec::new();
    let root = git_dir.join("refs");
    walk(&root, "refs", &mut names)?;
    names.sort();
    Ok(names)
}

fn walk(dir: &Path, prefix: &str, names: &mut Vec<String>) -> Result<(), GitError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(GitError::IO(e)),
    };
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if file_name.ends_with(".lock") {
            continue;
        }
        let child = format!("{prefix}/{file_name}");
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(&entry.path(), &child, names)?;
        } else {
            names.push(child);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Direct and symbolic contents round-trip through serialize/parse.
    #[test]
    fn serialize_parse_round_trip() {
        let id = ObjectId::hash_of(b"v");
        let direct = RefTarget::Direct(id);
        assert_eq!(parse("r", &serialize(&direct)).unwrap(), direct);

        let symbolic = RefTarget::Symbolic("refs/heads/main".to_string());
        assert_eq!(serialize(&symbolic), b"ref: refs/heads/main\n");
        assert_eq!(parse("HEAD", &serialize(&symbolic)).unwrap(), symbolic);
    }

    /// Reading tolerates absence and rejects garbage.
    #[test]
    fn read_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read(dir.path(), "refs/heads/none").unwrap().is_none());

        let path = ref_path(dir.path(), "refs/heads/bad");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"not a hash\n").unwrap();
        assert!(matches!(
            read(dir.path(), "refs/heads/bad"),
            Err(GitError::Corrupt(_, _))
        ));
    }

    /// Enumeration walks nested directories and skips lock files.
    #[test]
    fn enumerate_walks_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "refs/heads/main",
            "refs/heads/feature/deep",
            "refs/tags/v1",
        ] {
            let path = ref_path(dir.path(), name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, format!("{}\n", ObjectId::hash_of(b"x").to_hex())).unwrap();
        }
        fs::write(dir.path().join("refs/heads/main.lock"), b"").unwrap();

        let names = enumerate(dir.path()).unwrap();
        assert_eq!(
            names,
            vec![
                "refs/heads/feature/deep",
                "refs/heads/main",
                "refs/tags/v1",
            ]
        );
    }
}
