//! The revision expression resolver: translates strings such as
//! `HEAD~3^{tree}:path/file`, `v10`, or `refs/heads/x@{2}` into object
//! ids.
//!
//! Expressions are lexed in one pass into a base and a list of
//! left-associative suffixes, then evaluated against the repository.
//! Unresolvable names yield `Ok(None)`; only grammar errors
//! (`RevisionSyntax`), type violations (`IncorrectType`) and ambiguous
//! abbreviations (`Ambiguous`) error out.

use crate::errors::GitError;
use crate::hash::{AbbreviatedId, OBJECT_ID_HEX_LEN, ObjectId};
use crate::internal::object::types::ObjectType;
use crate::internal::refs::{HEAD, R_HEADS};
use crate::internal::repository::Repository;

/// One parsed suffix of an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Suffix {
    /// `^n`: n-th parent; `^0` asserts commit-ness without moving.
    Parent(u32),
    /// `^{type}`: peel until the given type or fail.
    PeelTo(ObjectType),
    /// `^{}`: peel annotated tags to the first non-tag object.
    PeelOnion,
    /// `~n`: n-th first-parent ancestor.
    Ancestor(u32),
    /// `@{n}`: n-th prior value from the ref's reflog.
    ReflogIndex(usize),
    /// `@{upstream}` / `@{u}`.
    Upstream,
    /// `@{-N}`: N-th previous checkout from the HEAD reflog.
    PrevCheckout(usize),
    /// `:path`: entry lookup under the commit's tree.
    Path(String),
}

fn syntax(expr: &str, reason: &str) -> GitError {
    GitError::RevisionSyntax {
        expr: expr.to_string(),
        reason: reason.to_string(),
    }
}

/// Split an expression into its base and suffix list.
fn lex(expr: &str) -> Result<(String, Vec<Suffix>), GitError> {
    let bytes = expr.as_bytes();
    let mut base_end = bytes.len();
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'^' | b'~' | b':' => {
                base_end = i;
                break;
            }
            b'@' if bytes.get(i + 1) == Some(&b'{') => {
                base_end = i;
                break;
            }
            _ => {}
        }
    }
    let base = expr[..base_end].to_string();

    let mut suffixes = Vec::new();
    let mut rest = &expr[base_end..];
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("^{") {
            let end = tail
                .find('}')
                .ok_or_else(|| syntax(expr, "unterminated ^{...}"))?;
            let inner = &tail[..end];
            if inner.is_empty() {
                suffixes.push(Suffix::PeelOnion);
            } else {
                let ty = ObjectType::from_string(inner)
                    .map_err(|_| syntax(expr, "unknown object type in ^{...}"))?;
                suffixes.push(Suffix::PeelTo(ty));
            }
            rest = &tail[end + 1..];
        } else if let Some(tail) = rest.strip_prefix('^') {
            let digits = tail.chars().take_while(char::is_ascii_digit).count();
            let n = if digits == 0 {
                1
            } else {
                tail[..digits]
                    .parse()
                    .map_err(|_| syntax(expr, "parent count out of range"))?
            };
            suffixes.push(Suffix::Parent(n));
            rest = &tail[digits..];
        } else if let Some(tail) = rest.strip_prefix('~') {
            let digits = tail.chars().take_while(char::is_ascii_digit).count();
            let n = if digits == 0 {
                1
            } else {
                tail[..digits]
                    .parse()
                    .map_err(|_| syntax(expr, "ancestor count out of range"))?
            };
            suffixes.push(Suffix::Ancestor(n));
            rest = &tail[digits..];
        } else if let Some(tail) = rest.strip_prefix("@{") {
            let end = tail
                .find('}')
                .ok_or_else(|| syntax(expr, "unterminated @{...}"))?;
            let inner = &tail[..end];
            if inner == "upstream" || inner == "u" {
                suffixes.push(Suffix::Upstream);
            } else if let Some(count) = inner.strip_prefix('-') {
                let n: usize = count
                    .parse()
                    .map_err(|_| syntax(expr, "malformed @{-N}"))?;
                if n == 0 {
                    return Err(syntax(expr, "@{-N} counts from one"));
                }
                suffixes.push(Suffix::PrevCheckout(n));
            } else if inner.chars().all(|c| c.is_ascii_digit()) && !inner.is_empty() {
                let n: usize = inner
                    .parse()
                    .map_err(|_| syntax(expr, "reflog index out of range"))?;
                suffixes.push(Suffix::ReflogIndex(n));
            } else {
                return Err(syntax(expr, "unsupported @{...} form"));
            }
            rest = &tail[end + 1..];
        } else if let Some(tail) = rest.strip_prefix(':') {
            suffixes.push(Suffix::Path(tail.to_string()));
            rest = "";
        } else {
            return Err(syntax(expr, "unexpected character after base"));
        }
    }
    Ok((base, suffixes))
}

/// Evaluation state: the current id plus the ref identity it came from
/// (consumed by the reflog and upstream suffixes).
struct State {
    id: Option<ObjectId>,
    ref_name: Option<String>,
}

/// Resolve `expr` against the repository.
pub fn resolve(repo: &Repository, expr: &str) -> Result<Option<ObjectId>, GitError> {
    if expr.is_empty() {
        return Err(syntax(expr, "empty expression"));
    }
    let (base, suffixes) = lex(expr)?;
    if base.is_empty()
        && !matches!(
            suffixes.first(),
            Some(Suffix::PrevCheckout(_) | Suffix::ReflogIndex(_) | Suffix::Upstream)
        )
    {
        return Err(syntax(expr, "expression has no base"));
    }

    let mut state = if base.is_empty() {
        // Bare @{...} forms implicitly address HEAD.
        State {
            id: repo.ref_database().resolve_ref(HEAD)?,
            ref_name: Some(HEAD.to_string()),
        }
    } else {
        resolve_base(repo, &base)?
    };

    for suffix in suffixes {
        // A fully unresolved state makes the rest of the chain null.
        if state.id.is_none() && state.ref_name.is_none() {
            return Ok(None);
        }
        state = apply_suffix(repo, expr, state, &suffix)?;
    }
    Ok(state.id)
}

/// Reduce a plain ref expression to the full ref name it denotes.
pub fn simplify(repo: &Repository, expr: &str) -> Result<Option<String>, GitError> {
    let (base, suffixes) = lex(expr)?;
    if !suffixes.is_empty() || base.is_empty() {
        return Ok(None);
    }
    if base == HEAD {
        return Ok(Some(HEAD.to_string()));
    }
    Ok(repo.ref_database().find_ref(&base)?.map(|r| r.name))
}

/// Base matching order: literals, full hex, ref expansion, abbreviated
/// id, describe output.
fn resolve_base(repo: &Repository, base: &str) -> Result<State, GitError> {
    match base {
        HEAD => {
            return Ok(State {
                id: repo.ref_database().resolve_ref(HEAD)?,
                ref_name: Some(HEAD.to_string()),
            });
        }
        "MERGE_HEAD" => {
            return Ok(State {
                id: repo.read_merge_heads()?.and_then(|ids| ids.into_iter().next()),
                ref_name: None,
            });
        }
        "FETCH_HEAD" => {
            return Ok(State {
                id: repo.read_fetch_head()?,
                ref_name: None,
            });
        }
        _ => {}
    }

    if base.len() == OBJECT_ID_HEX_LEN && base.chars().all(|c| c.is_ascii_hexdigit()) {
        if let Ok(id) = base.parse::<ObjectId>() {
            let id = repo.object_database().has(&id).then_some(id);
            return Ok(State { id, ref_name: None });
        }
    }

    if let Some(r) = repo.ref_database().find_ref(base)? {
        let id = match r.object_id() {
            Some(id) => Some(id),
            None => repo.ref_database().resolve_ref(&r.name)?,
        };
        return Ok(State {
            id,
            ref_name: Some(r.name),
        });
    }

    if base.len() >= 4 && base.len() < OBJECT_ID_HEX_LEN && base.chars().all(|c| c.is_ascii_hexdigit())
    {
        if let Some(id) = resolve_abbrev(repo, base)? {
            return Ok(State {
                id: Some(id),
                ref_name: None,
            });
        }
    }

    // `git describe` output: `<anything>-g<hex>`.
    if let Some(pos) = base.rfind("-g") {
        let hex = &base[pos + 2..];
        if hex.len() >= 4 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            if let Some(id) = resolve_abbrev(repo, hex)? {
                return Ok(State {
                    id: Some(id),
                    ref_name: None,
                });
            }
        }
    }

    Ok(State {
        id: None,
        ref_name: None,
    })
}

/// Classify an abbreviation by candidate cardinality.
fn resolve_abbrev(repo: &Repository, hex: &str) -> Result<Option<ObjectId>, GitError> {
    let abbrev = AbbreviatedId::from_hex_prefix(hex)?;
    let candidates = repo.object_database().resolve(&abbrev)?;
    match candidates.len() {
        0 => Ok(None),
        1 => Ok(candidates.into_iter().next()),
        _ => Err(GitError::Ambiguous {
            prefix: hex.to_string(),
            candidates: candidates.into_iter().collect(),
        }),
    }
}

fn apply_suffix(
    repo: &Repository,
    expr: &str,
    state: State,
    suffix: &Suffix,
) -> Result<State, GitError> {
    let odb = repo.object_database();
    let refdb = repo.ref_database();
    let none = || State {
        id: None,
        ref_name: None,
    };

    match suffix {
        Suffix::ReflogIndex(n) => {
            let Some(ref_name) = state.ref_name else {
                return Err(syntax(expr, "@{n} applies only to a ref"));
            };
            let entries = refdb.read_reflog(&ref_name)?;
            let id = if *n < entries.len() {
                Some(entries[entries.len() - 1 - n].new_id)
            } else if *n == entries.len() && !entries.is_empty() {
                // Walking off the oldest entry lands on its old side.
                Some(entries[0].old_id).filter(|id| !id.is_zero())
            } else {
                None
            };
            Ok(State {
                id,
                ref_name: Some(ref_name),
            })
        }
        Suffix::Upstream => {
            let Some(ref_name) = state.ref_name else {
                return Err(syntax(expr, "@{upstream} applies only to a branch"));
            };
            // Through symbolic HEAD, the upstream is the branch's.
            let branch = if ref_name == HEAD {
                match repo.full_branch()? {
                    Some(branch) => branch,
                    None => return Ok(none()),
                }
            } else {
                ref_name
            };
            match repo.upstream_of(&branch) {
                None => Ok(none()),
                Some(upstream) => Ok(State {
                    id: refdb.resolve_ref(&upstream)?,
                    ref_name: Some(upstream),
                }),
            }
        }
        Suffix::PrevCheckout(n) => {
            if state.ref_name.as_deref() != Some(HEAD) {
                return Err(syntax(expr, "@{-N} applies only to HEAD"));
            }
            let entries = refdb.read_reflog_reverse(HEAD)?;
            let mut remaining = *n;
            for entry in entries {
                if let Some(checkout) = entry.parse_checkout() {
                    remaining -= 1;
                    if remaining == 0 {
                        let branch = format!("{R_HEADS}{}", checkout.from_branch);
                        return Ok(State {
                            id: refdb.resolve_ref(&branch)?,
                            ref_name: Some(branch),
                        });
                    }
                }
            }
            Ok(none())
        }
        _ => {
            // The remaining suffixes navigate the object graph.
            let Some(id) = state.id else {
                return Ok(none());
            };
            match suffix {
                Suffix::Parent(n) => {
                    let commit_id = peel_to_commit(repo, &id)?;
                    if *n == 0 {
                        return Ok(State {
                            id: Some(commit_id),
                            ref_name: None,
                        });
                    }
                    let commit = odb.read_commit(&commit_id)?;
                    match commit.parent_commit_ids.get(*n as usize - 1) {
                        Some(parent) if odb.has(parent) => Ok(State {
                            id: Some(*parent),
                            ref_name: None,
                        }),
                        _ => Ok(none()),
                    }
                }
                Suffix::Ancestor(n) => {
                    let mut current = peel_to_commit(repo, &id)?;
                    for _ in 0..*n {
                        let commit = odb.read_commit(&current)?;
                        match commit.parent_commit_ids.first() {
                            Some(parent) if odb.has(parent) => current = *parent,
                            _ => return Ok(none()),
                        }
                    }
                    Ok(State {
                        id: Some(current),
                        ref_name: None,
                    })
                }
                Suffix::PeelTo(want) => Ok(State {
                    id: Some(peel_to_type(repo, &id, *want)?),
                    ref_name: None,
                }),
                Suffix::PeelOnion => Ok(State {
                    id: Some(odb.peel_tag(&id)?),
                    ref_name: None,
                }),
                Suffix::Path(path) => Ok(State {
                    id: lookup_path(repo, &id, path)?,
                    ref_name: None,
                }),
                _ => unreachable!("ref suffixes handled above"),
            }
        }
    }
}

/// Peel tags until a commit; anything else violates the expectation.
fn peel_to_commit(repo: &Repository, id: &ObjectId) -> Result<ObjectId, GitError> {
    peel_to_type(repo, id, ObjectType::Commit)
}

/// Peel toward `want`: tags are unwrapped, commits yield their tree
/// when a tree is wanted, and any other combination is a type error.
fn peel_to_type(
    repo: &Repository,
    id: &ObjectId,
    want: ObjectType,
) -> Result<ObjectId, GitError> {
    let odb = repo.object_database();
    let mut current = *id;
    loop {
        let loader = odb.open(&current, None)?;
        let actual = loader.object_type();
        if actual == want {
            return Ok(current);
        }
        match actual {
            ObjectType::Tag => {
                current = odb.read_tag(&current)?.object_id;
            }
            ObjectType::Commit if want == ObjectType::Tree => {
                current = odb.read_commit(&current)?.tree_id;
            }
            _ => {
                return Err(GitError::IncorrectType {
                    id: current,
                    expected: want,
                    actual,
                });
            }
        }
    }
}

/// Walk `path` under the tree reached from `id`; the empty path names
/// the tree itself. Missing components resolve to `None`.
fn lookup_path(
    repo: &Repository,
    id: &ObjectId,
    path: &str,
) -> Result<Option<ObjectId>, GitError> {
    let odb = repo.object_database();
    let mut current = peel_to_type(repo, id, ObjectType::Tree)?;
    if path.is_empty() {
        return Ok(Some(current));
    }
    let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();
    while let Some(component) = components.next() {
        let tree = odb.read_tree(&current)?;
        let Some(item) = tree.find(component) else {
            return Ok(None);
        };
        if components.peek().is_none() {
            return Ok(Some(item.id));
        }
        if !item.mode.is_tree() {
            return Ok(None);
        }
        current = item.id;
    }
    Ok(Some(current))
}
