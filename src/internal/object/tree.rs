//! The Tree object represents a directory: a sorted list of entries,
//! each carrying a file mode, a name, and the id of the child object.
//!
//! The serialized form of one entry is `"<mode> <name>\0"` followed by
//! the 20 raw id bytes. Entries are ordered by git's name comparison,
//! where directory names sort as if they ended with `/`.

use std::cmp::Ordering;
use std::fmt::Display;

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::GitError;
use crate::hash::{OBJECT_ID_LEN, ObjectId};
use crate::internal::object::ObjectTrait;
use crate::internal::object::types::ObjectType;

/// File mode of a tree entry, as the octal string git writes.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeItemMode {
    Blob,
    BlobExecutable,
    Link,
    Tree,
    /// A gitlink (submodule commit reference).
    Commit,
}

impl TreeItemMode {
    /// The octal mode bytes as written in a tree entry.
    pub fn to_bytes(&self) -> &'static [u8] {
        match self {
            TreeItemMode::Blob => b"100644",
            TreeItemMode::BlobExecutable => b"100755",
            TreeItemMode::Link => b"120000",
            TreeItemMode::Tree => b"40000",
            TreeItemMode::Commit => b"160000",
        }
    }

    /// Parse an octal mode. `040000` is accepted as a historical
    /// spelling of the tree mode.
    pub fn from_bytes(mode: &[u8]) -> Result<TreeItemMode, GitError> {
        match mode {
            b"100644" | b"100664" => Ok(TreeItemMode::Blob),
            b"100755" => Ok(TreeItemMode::BlobExecutable),
            b"120000" => Ok(TreeItemMode::Link),
            b"40000" | b"040000" => Ok(TreeItemMode::Tree),
            b"160000" => Ok(TreeItemMode::Commit),
            _ => Err(GitError::Corrupt(
                String::from_utf8_lossy(mode).to_string(),
                "not a valid tree entry mode".to_string(),
            )),
        }
    }

    /// Whether the entry names a subtree.
    pub fn is_tree(&self) -> bool {
        matches!(self, TreeItemMode::Tree)
    }
}

/// A single (mode, name, id) entry of a tree.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct TreeItem {
    pub mode: TreeItemMode,
    pub id: ObjectId,
    pub name: String,
}

impl TreeItem {
    pub fn new(mode: TreeItemMode, id: ObjectId, name: String) -> TreeItem {
        TreeItem { mode, id, name }
    }

    /// Serialized entry bytes.
    pub fn to_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.name.len() + OBJECT_ID_LEN + 8);
        data.extend(self.mode.to_bytes());
        data.push(b' ');
        data.extend(self.name.as_bytes());
        data.push(b'\0');
        data.extend(self.id.as_bytes());
        data
    }
}

/// Compare entry names the way git sorts trees: a directory entry
/// sorts as if its name ended with `/`.
fn git_name_cmp(a: &TreeItem, b: &TreeItem) -> Ordering {
    let a_bytes = a.name.as_bytes();
    let b_bytes = b.name.as_bytes();
    let len = a_bytes.len().min(b_bytes.len());
    match a_bytes[..len].cmp(&b_bytes[..len]) {
        Ordering::Equal => {}
        other => return other,
    }
    let a_next = a_bytes.get(len).copied().or(a.mode.is_tree().then_some(b'/'));
    let b_next = b_bytes.get(len).copied().or(b.mode.is_tree().then_some(b'/'));
    match (a_next, b_next) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.cmp(&y),
    }
}

/// A directory listing pointing at blobs and subtrees.
#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub id: ObjectId,
    pub tree_items: Vec<TreeItem>,
}

impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for item in &self.tree_items {
            writeln!(
                f,
                "{} {} {}\t{}",
                String::from_utf8_lossy(item.mode.to_bytes()),
                if item.mode.is_tree() { "tree" } else { "blob" },
                item.id,
                item.name
            )?;
        }
        Ok(())
    }
}

impl Tree {
    /// Build a tree from entries, sorting them into git order and
    /// computing the id.
    pub fn from_tree_items(mut items: Vec<TreeItem>) -> Result<Tree, GitError> {
        items.sort_by(git_name_cmp);
        let mut tree = Tree {
            id: ObjectId::ZERO,
            tree_items: items,
        };
        tree.id = ObjectId::from_type_and_data(ObjectType::Tree, &tree.to_data()?);
        Ok(tree)
    }

    /// The empty tree.
    pub fn empty() -> Tree {
        Tree::from_tree_items(Vec::new()).expect("empty tree always serializes")
    }

    /// Look up a direct child entry by name.
    pub fn find(&self, name: &str) -> Option<&TreeItem> {
        self.tree_items.iter().find(|item| item.name == name)
    }
}

impl ObjectTrait for Tree {
    fn from_bytes(data: &[u8], id: ObjectId) -> Result<Self, GitError> {
        let corrupt =
            |reason: &str| GitError::Corrupt(id.to_hex(), format!("tree: {reason}"));

        let mut rest = data;
        let mut tree_items = Vec::new();
        while !rest.is_empty() {
            let mode_end = rest.find_byte(b' ').ok_or_else(|| corrupt("no mode terminator"))?;
            let mode = TreeItemMode::from_bytes(&rest[..mode_end])?;
            rest = &rest[mode_end + 1..];

            let name_end = rest.find_byte(b'\0').ok_or_else(|| corrupt("no name terminator"))?;
            let name = rest[..name_end]
                .to_str()
                .map_err(|_| corrupt("entry name is not UTF-8"))?
                .to_string();
            rest = &rest[name_end + 1..];

            if rest.len() < OBJECT_ID_LEN {
                return Err(corrupt("truncated entry id"));
            }
            let child = ObjectId::from_bytes(&rest[..OBJECT_ID_LEN])?;
            rest = &rest[OBJECT_ID_LEN..];

            tree_items.push(TreeItem::new(mode, child, name));
        }
        Ok(Tree { id, tree_items })
    }

    fn object_type_static() -> ObjectType {
        ObjectType::Tree
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tree
    }

    fn get_size(&self) -> usize {
        self.tree_items
            .iter()
            .map(|i| i.mode.to_bytes().len() + i.name.len() + OBJECT_ID_LEN + 2)
            .sum()
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::with_capacity(self.get_size());
        for item in &self.tree_items {
            data.extend(item.to_data());
        }
        Ok(data)
    }

    fn object_id(&self) -> Result<ObjectId, GitError> {
        Ok(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::object::blob::Blob;

    fn blob_id(content: &[u8]) -> ObjectId {
        Blob::from_content(content).id
    }

    /// The empty tree has git's well-known id.
    #[test]
    fn empty_tree_id() {
        assert_eq!(
            Tree::empty().id.to_hex(),
            "4b825dc642cb6eb9a060e54bf8d69288fbee4904"
        );
    }

    /// Serialization round-trips entries and id.
    #[test]
    fn tree_round_trip() {
        let tree = Tree::from_tree_items(vec![
            TreeItem::new(TreeItemMode::Blob, blob_id(b"a\n"), "A".to_string()),
            TreeItem::new(TreeItemMode::Blob, blob_id(b"b\n"), "B".to_string()),
        ])
        .unwrap();
        let data = tree.to_data().unwrap();
        let parsed = Tree::parse(&data).unwrap();
        assert_eq!(parsed.id, tree.id);
        assert_eq!(parsed.tree_items.len(), 2);
        assert_eq!(parsed.find("A").unwrap().id, blob_id(b"a\n"));
        assert!(parsed.find("C").is_none());
    }

    /// Directory entries sort as if their name ended with `/`.
    #[test]
    fn git_ordering_for_directories() {
        // In plain byte order "a.txt" < "a", but git sorts the
        // directory "a" as "a/" which is greater than "a.txt".
        let sub = Tree::empty();
        let tree = Tree::from_tree_items(vec![
            TreeItem::new(TreeItemMode::Tree, sub.id, "a".to_string()),
            TreeItem::new(TreeItemMode::Blob, blob_id(b"x"), "a.txt".to_string()),
        ])
        .unwrap();
        assert_eq!(tree.tree_items[0].name, "a.txt");
        assert_eq!(tree.tree_items[1].name, "a");
    }

    /// Truncated entries are corrupt.
    #[test]
    fn reject_truncated_tree() {
        let tree = Tree::from_tree_items(vec![TreeItem::new(
            TreeItemMode::Blob,
            blob_id(b"x"),
            "f".to_string(),
        )])
        .unwrap();
        let mut data = tree.to_data().unwrap();
        data.truncate(data.len() - 3);
        assert!(matches!(Tree::parse(&data), Err(GitError::Corrupt(_, _))));
    }
}
