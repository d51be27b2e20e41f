//! Per-ref reflogs: append-only records of (old → new) transitions at
//! `logs/<ref>`, one line per entry:
//!
//! ```text
//! <old-hex> <new-hex> Name <email> <epoch> <tz>\t<message>
//! ```
//!
//! Reflog writes are best-effort with respect to the ref transition
//! they describe: a failed append must never fail a transition that
//! already committed.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bstr::ByteSlice;

use crate::errors::GitError;
use crate::hash::{OBJECT_ID_HEX_LEN, ObjectId};
use crate::internal::object::signature::{Signature, SignatureKind};
use crate::internal::refs::{HEAD, R_HEADS, R_REMOTES};

/// One reflog line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflogEntry {
    pub old_id: ObjectId,
    pub new_id: ObjectId,
    pub who: Signature,
    pub message: String,
}

/// A `checkout: moving from X to Y` transition parsed from a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutEntry {
    pub from_branch: String,
    pub to_branch: String,
}

impl ReflogEntry {
    pub fn new(old_id: ObjectId, new_id: ObjectId, who: Signature, message: &str) -> ReflogEntry {
        ReflogEntry {
            old_id,
            new_id,
            who,
            // A reflog entry is one line; embedded newlines collapse.
            message: message.replace(['\n', '\r'], " ").trim_end().to_string(),
        }
    }

    /// Parse one reflog line.
    pub fn parse(line: &[u8]) -> Result<ReflogEntry, GitError> {
        let corrupt = |reason: &str| {
            GitError::Corrupt(
                String::from_utf8_lossy(line).to_string(),
                format!("reflog: {reason}"),
            )
        };

        if line.len() < OBJECT_ID_HEX_LEN * 2 + 2 {
            return Err(corrupt("line too short"));
        }
        let old_hex = line[..OBJECT_ID_HEX_LEN]
            .to_str()
            .map_err(|_| corrupt("old id is not UTF-8"))?;
        let old_id = ObjectId::from_str(old_hex)?;
        if line[OBJECT_ID_HEX_LEN] != b' ' {
            return Err(corrupt("missing id separator"));
        }
        let new_start = OBJECT_ID_HEX_LEN + 1;
        let new_hex = line[new_start..new_start + OBJECT_ID_HEX_LEN]
            .to_str()
            .map_err(|_| corrupt("new id is not UTF-8"))?;
        let new_id = ObjectId::from_str(new_hex)?;

        let rest = &line[new_start + OBJECT_ID_HEX_LEN + 1..];
        let (ident, message) = match rest.find_byte(b'\t') {
            Some(tab) => (&rest[..tab], &rest[tab + 1..]),
            None => (rest, &rest[rest.len()..]),
        };
        let who = Signature::parse_ident(SignatureKind::Committer, ident)?;
        let message = message
            .to_str()
            .map_err(|_| corrupt("message is not UTF-8"))?
            .trim_end()
            .to_string();

        Ok(ReflogEntry {
            old_id,
            new_id,
            who,
            message,
        })
    }

    /// Serialize back into a reflog line (without trailing newline).
    pub fn to_line(&self) -> String {
        format!(
            "{} {} {}\t{}",
            self.old_id.to_hex(),
            self.new_id.to_hex(),
            self.who.ident(),
            self.message
        )
    }

    /// Parse a checkout transition from the message, if it is one.
    pub fn parse_checkout(&self) -> Option<CheckoutEntry> {
        let rest = self.message.strip_prefix("checkout: moving from ")?;
        let (from, to) = rest.split_once(" to ")?;
        Some(CheckoutEntry {
            from_branch: from.to_string(),
            to_branch: to.to_string(),
        })
    }
}

/// Path of the reflog file for `name`.
pub fn log_path(git_dir: &Path, name: &str) -> PathBuf {
    git_dir.join("logs").join(name)
}

/// All entries of a ref's reflog in append (time) order; an absent log
/// reads as empty.
pub fn read_all(git_dir: &Path, name: &str) -> Result<Vec<ReflogEntry>, GitError> {
    let data = match fs::read(log_path(git_dir, name)) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(GitError::IO(e)),
    };
    let mut entries = Vec::new();
    for line in data.lines() {
        if line.is_empty() {
            continue;
        }
        entries.push(ReflogEntry::parse(line)?);
    }
    Ok(entries)
}

/// Entries newest-first.
pub fn read_reverse(git_dir: &Path, name: &str) -> Result<Vec<ReflogEntry>, GitError> {
    let mut entries = read_all(git_dir, name)?;
    entries.reverse();
    Ok(entries)
}

/// The n-th entry counting backwards from the newest (0 = newest).
pub fn read_nth_reverse(
    git_dir: &Path,
    name: &str,
    n: usize,
) -> Result<Option<ReflogEntry>, GitError> {
    let entries = read_all(git_dir, name)?;
    if n >= entries.len() {
        return Ok(None);
    }
    Ok(Some(entries[entries.len() - 1 - n].clone()))
}

/// Whether transitions of `name` are logged by default when the
/// repository has `core.logallrefupdates` enabled.
pub fn is_auto_logged(name: &str) -> bool {
    name == HEAD || name.starts_with(R_HEADS) || name.starts_with(R_REMOTES) || name.starts_with("refs/notes/")
}

/// Append one entry to the reflog of `name`.
///
/// Writes happen when the log already exists, or `force` is set, or the
/// repository logs all updates and the name is auto-logged.
pub fn append(
    git_dir: &Path,
    name: &str,
    entry: &ReflogEntry,
    force: bool,
    log_all: bool,
) -> Result<(), GitError> {
    let path = log_path(git_dir, name);
    if !path.is_file() && !force && !(log_all && is_auto_logged(name)) {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
    file.write_all(entry.to_line().as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Carry a reflog across a ref rename, where possible.
pub fn rename(git_dir: &Path, from: &str, to: &str) -> Result<(), GitError> {
    let from_path = log_path(git_dir, from);
    if !from_path.is_file() {
        return Ok(());
    }
    let to_path = log_path(git_dir, to);
    if let Some(parent) = to_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(&from_path, &to_path)?;
    Ok(())
}

/// Remove the reflog of a deleted ref.
pub fn delete(git_dir: &Path, name: &str) -> Result<(), GitError> {
    match fs::remove_file(log_path(git_dir, name)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(GitError::IO(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig() -> Signature {
        Signature::parse_ident(
            SignatureKind::Committer,
            b"Test User <test@example.com> 1234567890 +0000",
        )
        .unwrap()
    }

    /// Entries serialize to one line and parse back.
    #[test]
    fn line_round_trip() {
        let entry = ReflogEntry::new(
            ObjectId::ZERO,
            ObjectId::hash_of(b"new"),
            sig(),
            "commit (initial): init",
        );
        let line = entry.to_line();
        let parsed = ReflogEntry::parse(line.as_bytes()).unwrap();
        assert_eq!(parsed, entry);
        assert!(parsed.parse_checkout().is_none());
    }

    /// Multi-line messages collapse to one reflog line.
    #[test]
    fn message_newlines_collapse() {
        let entry = ReflogEntry::new(ObjectId::ZERO, ObjectId::ZERO, sig(), "a\nb\n");
        assert_eq!(entry.message, "a b");
    }

    /// Checkout messages parse into from/to branches.
    #[test]
    fn checkout_parse() {
        let entry = ReflogEntry::new(
            ObjectId::ZERO,
            ObjectId::ZERO,
            sig(),
            "checkout: moving from main to feature",
        );
        let checkout = entry.parse_checkout().unwrap();
        assert_eq!(checkout.from_branch, "main");
        assert_eq!(checkout.to_branch, "feature");
    }

    /// Appends accumulate in order; reverse reads flip them.
    #[test]
    fn append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let a = ReflogEntry::new(ObjectId::ZERO, ObjectId::hash_of(b"1"), sig(), "one");
        let b = ReflogEntry::new(
            ObjectId::hash_of(b"1"),
            ObjectId::hash_of(b"2"),
            sig(),
            "two",
        );
        append(dir.path(), "refs/heads/main", &a, true, false).unwrap();
        append(dir.path(), "refs/heads/main", &b, false, false).unwrap();

        let all = read_all(dir.path(), "refs/heads/main").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].message, "one");

        let newest = read_nth_reverse(dir.path(), "refs/heads/main", 0)
            .unwrap()
            .unwrap();
        assert_eq!(newest.message, "two");
        assert!(
            read_nth_reverse(dir.path(), "refs/heads/main", 2)
                .unwrap()
                .is_none()
        );
    }

    /// Without force, logging honours the auto-log policy.
    #[test]
    fn append_honours_policy() {
        let dir = tempfile::tempdir().unwrap();
        let entry = ReflogEntry::new(ObjectId::ZERO, ObjectId::hash_of(b"1"), sig(), "m");

        // Not forced, logging disabled: nothing is written.
        append(dir.path(), "refs/heads/main", &entry, false, false).unwrap();
        assert!(read_all(dir.path(), "refs/heads/main").unwrap().is_empty());

        // log_all covers branches and HEAD but not tags.
        append(dir.path(), "refs/heads/main", &entry, false, true).unwrap();
        assert_eq!(read_all(dir.path(), "refs/heads/main").unwrap().len(), 1);
        append(dir.path(), "refs/tags/v1", &entry, false, true).unwrap();
        assert!(read_all(dir.path(), "refs/tags/v1").unwrap().is_empty());
    }

    /// Renaming carries the log file to the new name.
    #[test]
    fn rename_moves_log() {
        let dir = tempfile::tempdir().unwrap();
        let entry = ReflogEntry::new(ObjectId::ZERO, ObjectId::hash_of(b"1"), sig(), "m");
        append(dir.path(), "refs/heads/old", &entry, true, false).unwrap();

        rename(dir.path(), "refs/heads/old", "refs/heads/new").unwrap();
        assert!(read_all(dir.path(), "refs/heads/old").unwrap().is_empty());
        assert_eq!(read_all(dir.path(), "refs/heads/new").unwrap().len(), 1);
    }
}
