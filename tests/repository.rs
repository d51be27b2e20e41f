//! End-to-end scenarios over the repository façade: object writes, ref
//! transitions, batches, and revision resolution against a real
//! on-disk git directory.

use std::collections::HashMap;
use std::sync::Arc;

use tracing_subscriber::util::SubscriberInitExt;

use git_core::internal::object::ObjectTrait;
use git_core::internal::object::blob::Blob;
use git_core::internal::object::commit::Commit;
use git_core::internal::object::signature::{Signature, SignatureKind};
use git_core::internal::object::tag::Tag;
use git_core::internal::object::tree::{Tree, TreeItem, TreeItemMode};
use git_core::internal::object::types::ObjectType;
use git_core::internal::refs::batch::{ReceiveCommand, ReceiveCommandResult};
use git_core::internal::refs::update::RefUpdateResult;
use git_core::internal::refs::{HEAD, RefTarget};
use git_core::{EnvTable, GitError, ObjectId, Repository, RepositoryBuilder, init};

fn init_logger() {
    let _ = tracing_subscriber::fmt::Subscriber::builder()
        .with_target(false)
        .without_time()
        .with_level(true)
        .with_max_level(tracing::Level::DEBUG)
        .finish()
        .try_init();
}

fn new_repo() -> (tempfile::TempDir, Repository) {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let repo = init(dir.path(), false).unwrap();
    (dir, repo)
}

fn sig(kind: SignatureKind) -> Signature {
    let mut s = Signature::now(kind, "A U Thor", "author@example.com");
    s.timestamp = 1234567890;
    s.timezone = "+0000".to_string();
    s
}

fn write_commit(repo: &Repository, tree: &Tree, parents: Vec<ObjectId>, message: &str) -> ObjectId {
    let odb = repo.object_database();
    odb.insert(ObjectType::Tree, &tree.to_data().unwrap()).unwrap();
    let commit = Commit::new(
        sig(SignatureKind::Author),
        sig(SignatureKind::Committer),
        tree.id,
        parents,
        message,
    )
    .unwrap();
    odb.insert(ObjectType::Commit, &commit.to_data().unwrap())
        .unwrap()
}

fn set_ref(repo: &Repository, name: &str, id: ObjectId) -> RefUpdateResult {
    let refdb = repo.ref_database();
    let mut update = refdb.new_update(name, false).unwrap();
    update.set_new_id(id).set_force(true);
    update.update().unwrap()
}

/// Tree with blobs `A` and `B`, as the two-file scenario uses.
fn two_file_tree(repo: &Repository) -> (Tree, Blob, Blob) {
    let odb = repo.object_database();
    let a = Blob::from_content(b"file a\n");
    let b = Blob::from_content(b"file b\n");
    odb.insert(ObjectType::Blob, &a.data).unwrap();
    odb.insert(ObjectType::Blob, &b.data).unwrap();
    let tree = Tree::from_tree_items(vec![
        TreeItem::new(TreeItemMode::Blob, a.id, "A".to_string()),
        TreeItem::new(TreeItemMode::Blob, b.id, "B".to_string()),
    ])
    .unwrap();
    (tree, a, b)
}

/// S1: a fresh repository has symbolic HEAD onto an unborn master.
#[test]
fn fresh_repository_head() {
    let (_dir, repo) = new_repo();

    let head = repo.ref_database().exact_ref(HEAD).unwrap().unwrap();
    assert!(head.is_symbolic());
    assert_eq!(head.symbolic_target(), Some("refs/heads/master"));
    assert_eq!(repo.resolve(HEAD).unwrap(), None);
    assert_eq!(repo.get_branch().unwrap().as_deref(), Some("master"));
}

/// S2: tree + commit resolve through name, `^{tree}`, `:path`, and a
/// parentless `^` yields null.
#[test]
fn resolve_tree_commit_and_paths() {
    let (_dir, repo) = new_repo();
    let (tree, a, _) = two_file_tree(&repo);
    let c = write_commit(&repo, &tree, vec![], "initial\n");
    assert_eq!(set_ref(&repo, "refs/heads/main", c), RefUpdateResult::New);

    assert_eq!(repo.resolve("main").unwrap(), Some(c));
    assert_eq!(repo.resolve("refs/heads/main").unwrap(), Some(c));
    assert_eq!(repo.resolve("main^{tree}").unwrap(), Some(tree.id));
    assert_eq!(repo.resolve("main:A").unwrap(), Some(a.id));
    assert_eq!(repo.resolve("main:").unwrap(), Some(tree.id));
    assert_eq!(repo.resolve("main:missing").unwrap(), None);
    assert_eq!(repo.resolve("main^").unwrap(), None);
    assert_eq!(repo.resolve("nonexistent-name").unwrap(), None);

    let loader = repo
        .object_database()
        .open(&a.id, Some(ObjectType::Blob))
        .unwrap();
    assert_eq!(loader.object_type(), ObjectType::Blob);
    assert_eq!(loader.bytes().unwrap(), b"file a\n");
}

/// S2 continued: ancestry suffixes over a short history.
#[test]
fn resolve_ancestry() {
    let (_dir, repo) = new_repo();
    let (tree, _, _) = two_file_tree(&repo);
    let c1 = write_commit(&repo, &tree, vec![], "one\n");
    let c2 = write_commit(&repo, &tree, vec![c1], "two\n");
    let c3 = write_commit(&repo, &tree, vec![c2, c1], "merge\n");
    set_ref(&repo, "refs/heads/main", c3);

    assert_eq!(repo.resolve("main~1").unwrap(), Some(c2));
    assert_eq!(repo.resolve("main~2").unwrap(), Some(c1));
    assert_eq!(repo.resolve("main~3").unwrap(), None);
    assert_eq!(repo.resolve("main^1").unwrap(), Some(c2));
    assert_eq!(repo.resolve("main^2").unwrap(), Some(c1));
    assert_eq!(repo.resolve("main^3").unwrap(), None);
    assert_eq!(repo.resolve("main^0").unwrap(), Some(c3));
    assert_eq!(repo.resolve("main^^").unwrap(), Some(c1));
    assert_eq!(repo.resolve(&c3.to_hex()).unwrap(), Some(c3));

    // `~` on a blob violates the commit expectation.
    let blob = repo
        .object_database()
        .insert(ObjectType::Blob, b"no parents\n")
        .unwrap();
    set_ref(&repo, "refs/heads/blobref", blob);
    assert!(matches!(
        repo.resolve("blobref~1"),
        Err(GitError::IncorrectType { .. })
    ));

    // Malformed counts are grammar errors.
    assert!(matches!(
        repo.resolve("main~99999999999999999999"),
        Err(GitError::RevisionSyntax { .. })
    ));
}

/// S3: annotated tags peel through refs and `^{commit}`.
#[test]
fn annotated_tag_peeling() {
    let (_dir, repo) = new_repo();
    let (tree, _, _) = two_file_tree(&repo);
    let c = write_commit(&repo, &tree, vec![], "tagged\n");
    set_ref(&repo, "refs/heads/main", c);

    let tag = Tag::new(c, ObjectType::Commit, "v1", sig(SignatureKind::Tagger), "release\n").unwrap();
    let tag_id = repo
        .object_database()
        .insert(ObjectType::Tag, &tag.to_data().unwrap())
        .unwrap();
    set_ref(&repo, "refs/tags/v1", tag_id);

    let refdb = repo.ref_database();
    let record = refdb.exact_ref("refs/tags/v1").unwrap().unwrap();
    let peeled = refdb.peel(&record).unwrap();
    assert!(peeled.is_peeled);
    assert_eq!(peeled.peeled, Some(c));
    assert!(repo.object_database().has(&peeled.peeled.unwrap()));

    assert_eq!(repo.resolve("v1").unwrap(), Some(tag_id));
    assert_eq!(repo.resolve("v1^{commit}").unwrap(), Some(c));
    assert_eq!(repo.resolve("v1^{}").unwrap(), Some(c));
    assert_eq!(repo.resolve("v1^{tree}").unwrap(), Some(tree.id));
    assert!(matches!(
        repo.resolve("v1^{blob}"),
        Err(GitError::IncorrectType { .. })
    ));

    // Tags group under their peeled id.
    let by_peeled = repo.get_all_refs_by_peeled_id().unwrap();
    let for_commit = by_peeled.get(&c).unwrap();
    assert!(for_commit.iter().any(|r| r.name == "refs/tags/v1"));
    assert!(for_commit.iter().any(|r| r.name == "refs/heads/main"));
}

/// S4: a unique abbreviation resolves; a shared prefix is ambiguous.
#[test]
fn abbreviation_uniqueness() {
    let (_dir, repo) = new_repo();
    let odb = repo.object_database();
    let c = odb.insert(ObjectType::Blob, b"abbreviated target\n").unwrap();
    let prefix = &c.to_hex()[..4];

    assert_eq!(repo.resolve(prefix).unwrap(), Some(c));

    // Manufacture a second object sharing the 4-digit prefix.
    let mut sibling = None;
    for i in 0..2_000_000u32 {
        let candidate = ObjectId::from_type_and_data(
            ObjectType::Blob,
            format!("probe {i}\n").as_bytes(),
        );
        if candidate.to_hex().starts_with(prefix) && candidate != c {
            odb.insert(ObjectType::Blob, format!("probe {i}\n").as_bytes())
                .unwrap();
            sibling = Some(candidate);
            break;
        }
    }
    let sibling = sibling.expect("a colliding 4-digit prefix within the probe bound");
    assert_ne!(sibling, c);

    match repo.resolve(prefix) {
        Err(GitError::Ambiguous { candidates, .. }) => {
            assert!(candidates.contains(&c));
            assert!(candidates.contains(&sibling));
        }
        other => panic!("expected Ambiguous, got {other:?}"),
    }
}

/// S5: the atomic delete+create batch renames iff preconditions hold.
#[test]
fn batch_rename_scenario() {
    let (_dir, repo) = new_repo();
    let (tree, _, _) = two_file_tree(&repo);
    let c = write_commit(&repo, &tree, vec![], "c\n");
    let other = write_commit(&repo, &tree, vec![c], "other\n");
    set_ref(&repo, "refs/heads/x", c);

    let refdb = repo.ref_database();

    // Wrong old id: both commands report a consistent rejection and
    // both refs keep their pre-batch values.
    let mut batch = refdb.new_batch();
    batch
        .add_command(ReceiveCommand::delete("refs/heads/x", other))
        .add_command(ReceiveCommand::create("refs/heads/y", c));
    batch.execute().unwrap();
    assert_eq!(
        batch.commands()[0].result(),
        ReceiveCommandResult::LockFailure
    );
    assert_eq!(
        batch.commands()[1].result(),
        ReceiveCommandResult::TransactionAborted
    );
    assert_eq!(
        refdb.exact_ref("refs/heads/x").unwrap().unwrap().object_id(),
        Some(c)
    );
    assert!(refdb.exact_ref("refs/heads/y").unwrap().is_none());

    // Matching preconditions: both commands apply.
    let mut batch = refdb.new_batch();
    batch
        .add_command(ReceiveCommand::delete("refs/heads/x", c))
        .add_command(ReceiveCommand::create("refs/heads/y", c));
    batch.execute().unwrap();
    for command in batch.commands() {
        assert_eq!(command.result(), ReceiveCommandResult::Ok);
    }
    assert!(refdb.exact_ref("refs/heads/x").unwrap().is_none());
    assert_eq!(
        refdb.exact_ref("refs/heads/y").unwrap().unwrap().object_id(),
        Some(c)
    );
}

/// S6: renaming the current branch with detached HEAD fails cleanly.
#[test]
fn detached_head_rename() {
    let (_dir, repo) = new_repo();
    let (tree, _, _) = two_file_tree(&repo);
    let c = write_commit(&repo, &tree, vec![], "c\n");
    set_ref(&repo, "refs/heads/main", c);

    // Detach HEAD directly at the commit; the id is unchanged but the
    // symbolic ref is replaced by the direct value.
    let refdb = repo.ref_database();
    let mut update = refdb.new_update(HEAD, true).unwrap();
    update.set_new_id(c);
    update.update().unwrap();
    assert!(!refdb.exact_ref(HEAD).unwrap().unwrap().is_symbolic());

    assert!(matches!(
        refdb.rename_ref(None, "refs/heads/renamed"),
        Err(GitError::DetachedHead)
    ));
    let head = refdb.exact_ref(HEAD).unwrap().unwrap();
    assert_eq!(head.target, RefTarget::Direct(c));
}

/// P1: written objects hash back to their id through the loader.
#[test]
fn object_round_trip_hashes() {
    let (_dir, repo) = new_repo();
    let odb = repo.object_database();
    for (ty, payload) in [
        (ObjectType::Blob, b"payload one\n".to_vec()),
        (ObjectType::Blob, vec![0u8; 4096]),
    ] {
        let id = odb.insert(ty, &payload).unwrap();
        let loader = odb.open(&id, None).unwrap();
        let bytes = loader.bytes().unwrap();
        assert_eq!(ObjectId::from_type_and_data(ty, &bytes), id);
    }
}

/// P2/P3: successful updates are visible via exactRef, and whatever
/// resolve returns exists in the object database.
#[test]
fn resolved_ids_exist() {
    let (_dir, repo) = new_repo();
    let (tree, _, _) = two_file_tree(&repo);
    let c = write_commit(&repo, &tree, vec![], "c\n");
    set_ref(&repo, "refs/heads/main", c);

    let record = repo
        .ref_database()
        .exact_ref("refs/heads/main")
        .unwrap()
        .unwrap();
    assert_eq!(record.target, RefTarget::Direct(c));

    for expr in ["main", "main^{tree}", "main:A", "HEAD"] {
        // HEAD still points at unborn master here; null is acceptable.
        if let Some(id) = repo.resolve(expr).unwrap() {
            assert!(repo.object_database().has(&id), "{expr} resolved to a missing id");
        }
    }
}

/// P6 on the files backend: one winner among racing CAS writers.
#[test]
fn concurrent_file_backend_updates() {
    let (_dir, repo) = new_repo();
    let (tree, _, _) = two_file_tree(&repo);
    let c1 = write_commit(&repo, &tree, vec![], "one\n");
    let c2 = write_commit(&repo, &tree, vec![c1], "two\n");
    set_ref(&repo, "refs/heads/race", c1);

    let repo = Arc::new(repo);
    let mut handles = Vec::new();
    for _ in 0..6 {
        let repo = Arc::clone(&repo);
        handles.push(std::thread::spawn(move || {
            let mut update = repo
                .ref_database()
                .new_update("refs/heads/race", false)
                .unwrap();
            update.set_expected_old_id(c1).set_new_id(c2);
            update.update().unwrap()
        }));
    }
    let results: Vec<RefUpdateResult> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results
        .iter()
        .filter(|r| matches!(r, RefUpdateResult::FastForward | RefUpdateResult::Forced))
        .count();
    assert_eq!(winners, 1, "results: {results:?}");
    assert_eq!(
        repo.ref_database()
            .exact_ref("refs/heads/race")
            .unwrap()
            .unwrap()
            .object_id(),
        Some(c2)
    );
}

/// P7: symbolic chains beyond the depth bound fail cleanly.
#[test]
fn deep_symbolic_chain_fails() {
    let (_dir, repo) = new_repo();
    let refdb = repo.ref_database();
    for i in 0..8 {
        refdb
            .link(
                &format!("refs/heads/link{i}"),
                &format!("refs/heads/link{}", i + 1),
            )
            .unwrap();
    }
    assert!(matches!(
        refdb.resolve_ref("refs/heads/link0"),
        Err(GitError::Corrupt(_, _))
    ));
    // A short chain still resolves.
    let (tree, _, _) = two_file_tree(&repo);
    let c = write_commit(&repo, &tree, vec![], "c\n");
    set_ref(&repo, "refs/heads/leaf", c);
    refdb.link("refs/heads/alias", "refs/heads/leaf").unwrap();
    assert_eq!(refdb.resolve_ref("refs/heads/alias").unwrap(), Some(c));
}

/// Reflog suffixes: `@{n}` walks prior values, `@{-N}` follows
/// checkout entries in the HEAD log.
#[test]
fn reflog_expressions() {
    let (_dir, repo) = new_repo();
    let (tree, _, _) = two_file_tree(&repo);
    let c1 = write_commit(&repo, &tree, vec![], "one\n");
    let c2 = write_commit(&repo, &tree, vec![c1], "two\n");

    let refdb = repo.ref_database();
    let mut update = refdb.new_update("refs/heads/main", false).unwrap();
    update.set_new_id(c1).set_reflog_message("commit (initial): one", false);
    update.update().unwrap();
    let mut update = refdb.new_update("refs/heads/main", false).unwrap();
    update.set_new_id(c2).set_reflog_message("commit: two", false);
    update.update().unwrap();

    assert_eq!(repo.resolve("main@{0}").unwrap(), Some(c2));
    assert_eq!(repo.resolve("main@{1}").unwrap(), Some(c1));
    assert_eq!(repo.resolve("main@{9}").unwrap(), None);

    // Simulate two checkouts recorded on HEAD.
    refdb.log_transition(HEAD, c1, c1, "checkout: moving from main to topic", true);
    refdb.log_transition(HEAD, c1, c2, "checkout: moving from topic to main", true);
    set_ref(&repo, "refs/heads/topic", c1);

    assert_eq!(repo.resolve("@{-1}").unwrap(), Some(c1));
    assert_eq!(repo.resolve("@{-2}").unwrap(), Some(c2));
    assert_eq!(repo.resolve("@{-3}").unwrap(), None);
}

/// `@{upstream}` follows branch.<name>.remote/merge configuration.
#[test]
fn upstream_expression() {
    let (_dir, repo) = new_repo();
    let (tree, _, _) = two_file_tree(&repo);
    let local = write_commit(&repo, &tree, vec![], "local\n");
    let remote = write_commit(&repo, &tree, vec![local], "remote\n");
    set_ref(&repo, "refs/heads/main", local);
    set_ref(&repo, "refs/remotes/origin/main", remote);

    repo.update_config(|config| {
        config.set_string("remote", Some("origin"), "url", "https://example.com/r.git");
        config.set_string(
            "remote",
            Some("origin"),
            "fetch",
            "+refs/heads/*:refs/remotes/origin/*",
        );
        config.set_string("branch", Some("main"), "remote", "origin");
        config.set_string("branch", Some("main"), "merge", "refs/heads/main");
    })
    .unwrap();

    assert_eq!(repo.resolve("main@{upstream}").unwrap(), Some(remote));
    assert_eq!(repo.resolve("main@{u}").unwrap(), Some(remote));
    assert_eq!(repo.resolve("refs/heads/other@{upstream}").unwrap(), None);

    assert_eq!(
        repo.simplify("main").unwrap().as_deref(),
        Some("refs/heads/main")
    );
    assert_eq!(repo.simplify("main~1").unwrap(), None);
}

/// Reopening a repository sees state written by a previous handle.
#[test]
fn reopen_sees_previous_state() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let c;
    {
        let repo = init(dir.path(), false).unwrap();
        let (tree, _, _) = two_file_tree(&repo);
        c = write_commit(&repo, &tree, vec![], "persisted\n");
        set_ref(&repo, "refs/heads/main", c);
        repo.close();
    }

    let repo = RepositoryBuilder::new()
        .set_env(EnvTable::from_map(HashMap::new()))
        .set_git_dir(&dir.path().join(".git"))
        .open()
        .unwrap();
    assert_eq!(repo.resolve("main").unwrap(), Some(c));
    let state = repo.repository_state();
    assert_eq!(state, git_core::internal::repository::state::RepositoryState::Safe);
}
