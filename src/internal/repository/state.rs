//! Repository state derived from marker files in the git directory,
//! plus the minimal index probe needed to tell an in-progress merge
//! from a resolved one.

use std::fs;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

/// What operation the repository is in the middle of, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryState {
    /// Bare repositories never have an operation in progress.
    Bare,
    /// Nothing in progress.
    Safe,
    /// A merge recorded conflicts that are not yet resolved.
    Merging,
    /// A merge whose conflicts are all resolved, awaiting commit.
    MergingResolved,
    /// `git am` style patch application.
    Apply,
    Rebasing,
    RebasingRebasing,
    RebasingMerge,
    RebasingInteractive,
    Bisecting,
    CherryPicking,
    CherryPickingResolved,
    Reverting,
    RevertingResolved,
}

impl RepositoryState {
    /// Whether the working tree may change under this state.
    pub fn can_check_out(&self) -> bool {
        matches!(self, RepositoryState::Safe | RepositoryState::Bare)
    }

    /// Whether a commit can conclude the state.
    pub fn can_commit(&self) -> bool {
        !matches!(
            self,
            RepositoryState::Bare
                | RepositoryState::Merging
                | RepositoryState::CherryPicking
                | RepositoryState::Reverting
        )
    }
}

/// Probe the marker files and classify the state.
pub fn probe(git_dir: &Path, index_file: Option<&Path>, bare: bool) -> RepositoryState {
    if bare {
        return RepositoryState::Bare;
    }

    let rebase_apply = git_dir.join("rebase-apply");
    if rebase_apply.join("rebasing").is_file() {
        return RepositoryState::RebasingRebasing;
    }
    if rebase_apply.join("applying").is_file() {
        return RepositoryState::Apply;
    }
    if rebase_apply.is_dir() {
        return RepositoryState::Rebasing;
    }

    let rebase_merge = git_dir.join("rebase-merge");
    if rebase_merge.join("interactive").is_file() {
        return RepositoryState::RebasingInteractive;
    }
    if rebase_merge.is_dir() {
        return RepositoryState::RebasingMerge;
    }

    let unmerged = index_file.map(index_has_unmerged).unwrap_or(false);
    if git_dir.join("MERGE_HEAD").is_file() {
        return if unmerged {
            RepositoryState::Merging
        } else {
            RepositoryState::MergingResolved
        };
    }
    if git_dir.join("CHERRY_PICK_HEAD").is_file() {
        return if unmerged {
            RepositoryState::CherryPicking
        } else {
            RepositoryState::CherryPickingResolved
        };
    }
    if git_dir.join("REVERT_HEAD").is_file() {
        return if unmerged {
            RepositoryState::Reverting
        } else {
            RepositoryState::RevertingResolved
        };
    }
    if git_dir.join("BISECT_LOG").is_file() {
        return RepositoryState::Bisecting;
    }
    RepositoryState::Safe
}

/// Whether the index records any entry at a non-zero merge stage.
///
/// Reads just enough of the index format (versions 2 and 3) to find
/// stage bits; anything unreadable counts as "no conflicts" so a
/// damaged index degrades to the resolved state rather than an error.
pub fn index_has_unmerged(index_file: &Path) -> bool {
    let Ok(data) = fs::read(index_file) else {
        return false;
    };
    if data.len() < 12 || &data[..4] != b"DIRC" {
        return false;
    }
    let version = BigEndian::read_u32(&data[4..8]);
    if version != 2 && version != 3 {
        return false;
    }
    let entry_count = BigEndian::read_u32(&data[8..12]) as usize;

    let mut pos = 12;
    for _ in 0..entry_count {
        // 62 fixed bytes, flags at offset 60.
        if pos + 62 > data.len() {
            return false;
        }
        let flags = BigEndian::read_u16(&data[pos + 60..pos + 62]);
        let stage = (flags >> 12) & 0x3;
        if stage != 0 {
            return true;
        }
        let name_len = (flags & 0x0FFF) as usize;
        let mut fixed = 62;
        // Version 3 adds two extended-flag bytes when bit 14 is set.
        if flags & 0x4000 != 0 {
            fixed += 2;
        }
        // Entries are padded with NULs to a multiple of eight bytes.
        let entry_len = (fixed + name_len + 8) / 8 * 8;
        pos += entry_len;
    }
    false
}
