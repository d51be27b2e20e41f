//! The Commit object records one version of the project: the id of the
//! top-level tree, zero or more parent commit ids, the author and
//! committer identities, and the message.
//!
//! Header lines are `tree`, `parent`* , `author`, `committer`; anything
//! after the first blank line (including embedded PGP signatures) is
//! kept verbatim as part of the message.

use std::fmt::Display;
use std::str::FromStr;

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::GitError;
use crate::hash::{OBJECT_ID_HEX_LEN, ObjectId};
use crate::internal::object::ObjectTrait;
use crate::internal::object::signature::{Signature, SignatureKind};
use crate::internal::object::types::ObjectType;

/// The `Commit` struct represents one commit object.
///
/// - `tree_id` points to the complete state of the repository at the
///   time of the commit.
/// - `parent_commit_ids` chain commits into the history graph; zero
///   parents for a root commit, two or more for merges.
/// - `message` keeps everything after the headers verbatim, signatures
///   included.
#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub id: ObjectId,
    pub tree_id: ObjectId,
    pub parent_commit_ids: Vec<ObjectId>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

impl PartialEq for Commit {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Commit {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "tree: {}", self.tree_id)?;
        for parent in self.parent_commit_ids.iter() {
            writeln!(f, "parent: {parent}")?;
        }
        writeln!(f, "author {}", self.author)?;
        writeln!(f, "committer {}", self.committer)?;
        writeln!(f, "{}", self.message)
    }
}

impl Commit {
    pub fn new(
        author: Signature,
        committer: Signature,
        tree_id: ObjectId,
        parent_commit_ids: Vec<ObjectId>,
        message: &str,
    ) -> Result<Commit, GitError> {
        let mut commit = Commit {
            id: ObjectId::ZERO,
            tree_id,
            parent_commit_ids,
            author,
            committer,
            message: message.to_string(),
        };
        commit.id = ObjectId::from_type_and_data(ObjectType::Commit, &commit.to_data()?);
        Ok(commit)
    }

    /// Build a commit with freshly stamped identities, for callers that
    /// only have a tree and parents.
    pub fn from_tree_id(
        tree_id: ObjectId,
        parent_commit_ids: Vec<ObjectId>,
        ident_name: &str,
        ident_email: &str,
        message: &str,
    ) -> Result<Commit, GitError> {
        let author = Signature::now(SignatureKind::Author, ident_name, ident_email);
        let mut committer = author.clone();
        committer.kind = SignatureKind::Committer;
        Commit::new(author, committer, tree_id, parent_commit_ids, message)
    }

    /// First meaningful line of the message, skipping past a PGP
    /// signature block if one is embedded.
    pub fn format_message(&self) -> String {
        if let Some(pos) = self
            .message
            .lines()
            .position(|line| line.contains("-----END PGP SIGNATURE-----"))
        {
            return self
                .message
                .lines()
                .skip(pos + 1)
                .find(|line| !line.trim().is_empty())
                .map(|line| line.to_owned())
                .unwrap_or_else(|| self.message.clone());
        }

        self.message
            .lines()
            .find(|line| !line.trim().is_empty())
            .map(|line| line.to_owned())
            .unwrap_or_else(|| self.message.clone())
    }
}

impl ObjectTrait for Commit {
    fn from_bytes(data: &[u8], id: ObjectId) -> Result<Self, GitError> {
        let corrupt =
            |reason: &str| GitError::Corrupt(id.to_hex(), format!("commit: {reason}"));

        let mut rest = data;

        // `tree <hex>` is always the first header.
        let tree_end = rest.find_byte(b'\n').ok_or_else(|| corrupt("no tree header"))?;
        let tree_line = &rest[..tree_end];
        let tree_hex = tree_line
            .strip_prefix(b"tree ")
            .ok_or_else(|| corrupt("first header is not `tree`"))?;
        let tree_id = ObjectId::from_str(
            tree_hex.to_str().map_err(|_| corrupt("tree id is not UTF-8"))?,
        )?;
        rest = &rest[tree_end + 1..];

        // Zero or more `parent <hex>` headers.
        let mut parent_commit_ids = Vec::new();
        while let Some(parent_hex) = rest.strip_prefix(b"parent ") {
            let line_end = parent_hex
                .find_byte(b'\n')
                .ok_or_else(|| corrupt("unterminated parent header"))?;
            let parent = ObjectId::from_str(
                parent_hex[..line_end]
                    .to_str()
                    .map_err(|_| corrupt("parent id is not UTF-8"))?,
            )?;
            parent_commit_ids.push(parent);
            rest = &rest[b"parent ".len() + line_end + 1..];
        }

        let author_end = rest.find_byte(b'\n').ok_or_else(|| corrupt("no author header"))?;
        let author = Signature::from_data(rest[..author_end].to_vec())?;
        if author.kind != SignatureKind::Author {
            return Err(corrupt("expected author header"));
        }
        rest = &rest[author_end + 1..];

        let committer_end = rest
            .find_byte(b'\n')
            .ok_or_else(|| corrupt("no committer header"))?;
        let committer = Signature::from_data(rest[..committer_end].to_vec())?;
        if committer.kind != SignatureKind::Committer {
            return Err(corrupt("expected committer header"));
        }
        rest = &rest[committer_end + 1..];

        // Everything that remains, extension headers included, is kept
        // verbatim as the message.
        let message = String::from_utf8_lossy(rest).to_string();

        Ok(Commit {
            id,
            tree_id,
            parent_commit_ids,
            author,
            committer,
            message,
        })
    }

    fn object_type_static() -> ObjectType {
        ObjectType::Commit
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Commit
    }

    fn get_size(&self) -> usize {
        let mut size = b"tree ".len() + OBJECT_ID_HEX_LEN + 1;
        size += self.parent_commit_ids.len() * (b"parent ".len() + OBJECT_ID_HEX_LEN + 1);
        size += self.author.encoded_len() + 1;
        size += self.committer.encoded_len() + 1;
        size + self.message.len()
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();

        data.extend(b"tree ");
        data.extend(self.tree_id.to_hex().as_bytes());
        data.push(b'\n');

        for parent in &self.parent_commit_ids {
            data.extend(b"parent ");
            data.extend(parent.to_hex().as_bytes());
            data.push(b'\n');
        }

        data.extend(self.author.to_data()?);
        data.push(b'\n');
        data.extend(self.committer.to_data()?);
        data.push(b'\n');
        data.extend(self.message.as_bytes());

        Ok(data)
    }

    fn object_id(&self) -> Result<ObjectId, GitError> {
        Ok(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_commit() -> &'static [u8] {
        b"tree 341e54913a3a43069f2927cc0f703e5a9f730df1
parent 8ab686eafeb1f44702738c8b0f24f2567c36da6d
author A U Thor <author@example.com> 1757467768 +0800
committer C O Mitter <committer@example.com> 1757491219 +0800

first line

body
"
    }

    /// Headers and message parse into their fields.
    #[test]
    fn parse_commit() {
        let commit = Commit::parse(raw_commit()).unwrap();
        assert_eq!(
            commit.tree_id.to_hex(),
            "341e54913a3a43069f2927cc0f703e5a9f730df1"
        );
        assert_eq!(commit.parent_commit_ids.len(), 1);
        assert_eq!(commit.author.name, "A U Thor");
        assert_eq!(commit.committer.email, "committer@example.com");
        assert_eq!(commit.message, "\nfirst line\n\nbody\n");
        assert_eq!(commit.format_message(), "first line");
    }

    /// Serialization reproduces the parsed bytes, so the id holds, and
    /// the reported size matches the serialized payload.
    #[test]
    fn commit_round_trip() {
        let commit = Commit::parse(raw_commit()).unwrap();
        assert_eq!(commit.to_data().unwrap(), raw_commit());
        assert_eq!(commit.object_id().unwrap(), commit.id);
        assert_eq!(commit.get_size(), raw_commit().len());
    }

    /// A root commit has no parent headers.
    #[test]
    fn root_commit_has_no_parents() {
        let author = Signature::from_data(
            b"author A <a@example.com> 1234567890 +0000".to_vec(),
        )
        .unwrap();
        let committer = Signature::from_data(
            b"committer A <a@example.com> 1234567890 +0000".to_vec(),
        )
        .unwrap();
        let tree = ObjectId::from_str("4b825dc642cb6eb9a060e54bf8d69288fbee4904").unwrap();
        let commit = Commit::new(author, committer, tree, vec![], "init\n").unwrap();
        let parsed = Commit::parse(&commit.to_data().unwrap()).unwrap();
        assert!(parsed.parent_commit_ids.is_empty());
        assert_eq!(parsed.id, commit.id);
    }

    /// A message with an embedded PGP signature keeps the signature in
    /// the message and still formats the summary line.
    #[test]
    fn format_message_with_pgp_signature() {
        let raw = b"tree 341e54913a3a43069f2927cc0f703e5a9f730df1
author A <a@example.com> 1 +0000
committer A <a@example.com> 1 +0000
gpgsig -----BEGIN PGP SIGNATURE-----

 dGVzdA==
 -----END PGP SIGNATURE-----

signed summary
";
        let commit = Commit::parse(raw).unwrap();
        assert!(commit.message.contains("-----BEGIN PGP SIGNATURE-----"));
        assert_eq!(commit.format_message(), "signed summary");
    }

    /// A commit without a tree header is corrupt.
    #[test]
    fn reject_missing_tree() {
        let raw = b"parent 8ab686eafeb1f44702738c8b0f24f2567c36da6d\n";
        assert!(matches!(
            Commit::parse(raw),
            Err(GitError::Corrupt(_, _))
        ));
    }
}
