//! Ref-name validation and short-name expansion.
//!
//! The validator is shared by updaters and the revision resolver and is
//! total: any string can be checked without touching storage.

use crate::internal::refs::{HEAD, R_HEADS, R_REMOTES, R_TAGS};

/// Characters git forbids anywhere in a ref name.
const FORBIDDEN: &[u8] = b"\\~^:?*[";

/// Whether `name` is a valid fully qualified ref name.
///
/// Rejects: the empty string, a `.lock` suffix on any component,
/// components starting or ending with `.`, `..` anywhere, empty path
/// components, ASCII control characters and space, the characters
/// `\ ~ ^ : ? * [`, the `@{` sequence, and names with fewer than two
/// slash-separated components.
pub fn is_valid_ref_name(name: &str) -> bool {
    if name.is_empty() || !name.contains('/') {
        return false;
    }
    if name.starts_with('/') || name.ends_with('/') {
        return false;
    }
    if name.contains("..") || name.contains("@{") {
        return false;
    }
    let bytes = name.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b <= 0x20 || b == 0x7F {
            return false;
        }
        if FORBIDDEN.contains(&b) {
            return false;
        }
        if b == b'/' && bytes.get(i + 1) == Some(&b'/') {
            return false;
        }
    }
    for component in name.split('/') {
        if component.is_empty() {
            return false;
        }
        if component.starts_with('.') || component.ends_with('.') {
            return false;
        }
        if component.ends_with(".lock") {
            return false;
        }
    }
    true
}

/// Whether `name` may be the subject of a ref write: a valid ref name,
/// or one of the all-caps root pseudo-refs such as `HEAD`.
pub fn is_valid_update_name(name: &str) -> bool {
    is_valid_ref_name(name) || is_root_ref(name)
}

/// Root-level pseudo-refs (`HEAD`, `ORIG_HEAD`, `MERGE_HEAD`, ...).
pub fn is_root_ref(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c == '_')
}

/// Candidate expansions for a short name, in lookup order.
pub fn expand_candidates(short: &str) -> Vec<String> {
    vec![
        short.to_string(),
        format!("refs/{short}"),
        format!("{R_TAGS}{short}"),
        format!("{R_HEADS}{short}"),
        format!("{R_REMOTES}{short}"),
        format!("{R_REMOTES}{short}/{HEAD}"),
    ]
}

/// Strip the standard prefixes for display: `refs/heads/main` becomes
/// `main`. Names outside the standard spaces are returned unchanged.
pub fn shorten(name: &str) -> &str {
    for prefix in [R_HEADS, R_TAGS, R_REMOTES] {
        if let Some(short) = name.strip_prefix(prefix) {
            return short;
        }
    }
    name
}
