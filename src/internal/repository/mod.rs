//! The repository façade: binds the object database, the reference
//! database and the configuration under one handle, and exposes the
//! revision resolver, the git-dir scalar files, derived ref views and
//! the state probe.

pub mod builder;
pub mod state;

use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use bstr::ByteSlice;
use tracing::{debug, warn};

use crate::errors::GitError;
use crate::hash::ObjectId;
use crate::internal::config::Config;
use crate::internal::odb::ObjectDatabase;
use crate::internal::refs::database::RefDatabase;
use crate::internal::refs::name as refname;
use crate::internal::refs::{HEAD, R_HEADS, R_TAGS, Ref};
use crate::internal::repository::state::RepositoryState;
use crate::internal::revision;

pub use builder::{EnvTable, RepositoryBuilder, init};

/// Events fired by the repository core. Listener failures never
/// propagate into the storage operation that triggered them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryEvent {
    ConfigChanged,
    IndexChanged,
}

type Listener = Box<dyn Fn(&RepositoryEvent) + Send + Sync>;

/// Snapshot of the `core.*` behaviour switches read at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreSettings {
    pub file_mode: bool,
    pub symlinks: bool,
    pub hide_dot_files: bool,
    pub log_all_ref_updates: bool,
    pub precompose_unicode: bool,
}

/// `branch.autosetupmerge` policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoSetupMerge {
    /// Track only when branching from a remote-tracking ref (`true`,
    /// the default).
    WhenRemote,
    /// Never set up tracking (`false`).
    Never,
    /// Track when branching from any ref (`always`).
    Always,
}

/// One configured remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub url: String,
    pub fetch: Vec<String>,
}

/// Opaque handle for unregistering a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(usize);

#[derive(Default)]
struct ListenerRegistry {
    next_id: AtomicUsize,
    listeners: Mutex<Vec<(usize, Listener)>>,
}

impl ListenerRegistry {
    fn add(&self, listener: Listener) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .expect("listener registry")
            .push((id, listener));
        ListenerHandle(id)
    }

    fn remove(&self, handle: ListenerHandle) {
        self.listeners
            .lock()
            .expect("listener registry")
            .retain(|(id, _)| *id != handle.0);
    }

    fn fire(&self, event: RepositoryEvent) {
        let listeners = self.listeners.lock().expect("listener registry");
        for (id, listener) in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!(listener = id, ?event, "repository listener panicked");
            }
        }
    }
}

/// An open repository.
///
/// The handle owns a use count starting at one; [`Repository::retain`]
/// increments it and [`Repository::close`] decrements it, releasing
/// cached database resources when it reaches zero.
pub struct Repository {
    git_dir: PathBuf,
    work_tree: Option<PathBuf>,
    index_file: Option<PathBuf>,
    bare: bool,
    config: RwLock<Config>,
    odb: Arc<ObjectDatabase>,
    refdb: Arc<RefDatabase>,
    use_count: AtomicUsize,
    listeners: ListenerRegistry,
}

impl Repository {
    pub(crate) fn assemble(
        git_dir: PathBuf,
        work_tree: Option<PathBuf>,
        index_file: Option<PathBuf>,
        bare: bool,
        config: Config,
        odb: Arc<ObjectDatabase>,
        refdb: Arc<RefDatabase>,
    ) -> Repository {
        Repository {
            git_dir,
            work_tree,
            index_file,
            bare,
            config: RwLock::new(config),
            odb,
            refdb,
            use_count: AtomicUsize::new(1),
            listeners: ListenerRegistry::default(),
        }
    }

    // ------------------------------------------------------------------
    // Paths and lifecycle
    // ------------------------------------------------------------------

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn is_bare(&self) -> bool {
        self.bare
    }

    /// The working tree root; bare repositories have none.
    pub fn work_tree(&self) -> Result<&Path, GitError> {
        self.work_tree.as_deref().ok_or(GitError::NoWorkTree)
    }

    /// The index file path; bare repositories have none.
    pub fn index_file(&self) -> Result<&Path, GitError> {
        self.index_file.as_deref().ok_or(GitError::NoWorkTree)
    }

    /// Increment the use count.
    pub fn retain(&self) -> usize {
        self.use_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrement the use count; at zero the databases release their
    /// cached resources (reads after that transparently reopen them).
    pub fn close(&self) -> usize {
        let previous = self.use_count.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 {
            debug!(git_dir = %self.git_dir.display(), "releasing repository resources");
            self.odb.release();
        }
        previous - 1
    }

    pub fn use_count(&self) -> usize {
        self.use_count.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Databases and config
    // ------------------------------------------------------------------

    pub fn object_database(&self) -> &Arc<ObjectDatabase> {
        &self.odb
    }

    pub fn ref_database(&self) -> &Arc<RefDatabase> {
        &self.refdb
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> Config {
        self.config.read().expect("config lock").clone()
    }

    /// Mutate the configuration, persist it, and fire `ConfigChanged`.
    pub fn update_config(
        &self,
        mutate: impl FnOnce(&mut Config),
    ) -> Result<(), GitError> {
        {
            let mut config = self.config.write().expect("config lock");
            mutate(&mut config);
            config.save(&self.git_dir.join("config"))?;
        }
        self.fire_event(RepositoryEvent::ConfigChanged);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    pub fn add_listener(
        &self,
        listener: impl Fn(&RepositoryEvent) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.listeners.add(Box::new(listener))
    }

    pub fn remove_listener(&self, handle: ListenerHandle) {
        self.listeners.remove(handle);
    }

    /// Fire an event through the registry; listener panics are logged
    /// and swallowed.
    pub fn fire_event(&self, event: RepositoryEvent) {
        self.listeners.fire(event);
    }

    /// Tell listeners the index file changed on disk.
    pub fn notify_index_changed(&self) {
        self.fire_event(RepositoryEvent::IndexChanged);
    }

    // ------------------------------------------------------------------
    // Revision resolution and branch views
    // ------------------------------------------------------------------

    /// Resolve a revision expression to an object id. Unresolvable
    /// names yield `Ok(None)`; grammar and type violations error.
    pub fn resolve(&self, expr: &str) -> Result<Option<ObjectId>, GitError> {
        revision::resolve(self, expr)
    }

    /// Reduce an expression to the full name of the ref it denotes, if
    /// it is a plain ref expression.
    pub fn simplify(&self, expr: &str) -> Result<Option<String>, GitError> {
        revision::simplify(self, expr)
    }

    /// Short name of the branch HEAD points at; detached HEAD gives
    /// the hex id; an absent HEAD gives `None`.
    pub fn get_branch(&self) -> Result<Option<String>, GitError> {
        match self.refdb.exact_ref(HEAD)? {
            None => Ok(None),
            Some(head) => match head.symbolic_target() {
                Some(target) => Ok(Some(refname::shorten(target).to_string())),
                None => Ok(head.object_id().map(|id| id.to_hex())),
            },
        }
    }

    /// Full name of the branch HEAD points at, if HEAD is symbolic.
    pub fn full_branch(&self) -> Result<Option<String>, GitError> {
        Ok(self
            .refdb
            .exact_ref(HEAD)?
            .and_then(|head| head.symbolic_target().map(str::to_string)))
    }

    /// Every ref in the repository, `HEAD` included.
    pub fn get_all_refs(&self) -> Result<std::collections::BTreeMap<String, Ref>, GitError> {
        self.refdb.get_refs("")
    }

    /// Tags keyed by their short name.
    pub fn get_tags(&self) -> Result<std::collections::BTreeMap<String, Ref>, GitError> {
        let tags = self.refdb.get_refs(R_TAGS)?;
        Ok(tags
            .into_values()
            .map(|r| (refname::shorten(&r.name).to_string(), r))
            .collect())
    }

    /// Group all refs by the object they ultimately point at (the
    /// peeled id for annotated tags, the direct id otherwise).
    pub fn get_all_refs_by_peeled_id(
        &self,
    ) -> Result<std::collections::HashMap<ObjectId, Vec<Ref>>, GitError> {
        let mut out: std::collections::HashMap<ObjectId, Vec<Ref>> =
            std::collections::HashMap::new();
        for (_, r) in self.get_all_refs()? {
            let peeled = self.refdb.peel(&r)?;
            let key = peeled.peeled.or_else(|| peeled.object_id());
            if let Some(key) = key {
                out.entry(key).or_default().push(peeled);
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Git-dir scalar files
    // ------------------------------------------------------------------

    fn scalar_path(&self, name: &str) -> PathBuf {
        self.git_dir.join(name)
    }

    fn read_id_file(&self, name: &str) -> Result<Option<ObjectId>, GitError> {
        Ok(self.read_ids_file(name)?.and_then(|ids| ids.into_iter().next()))
    }

    fn read_ids_file(&self, name: &str) -> Result<Option<Vec<ObjectId>>, GitError> {
        let data = match fs::read(self.scalar_path(name)) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(GitError::IO(e)),
        };
        let mut ids = Vec::new();
        for line in data.lines() {
            if line.is_empty() {
                continue;
            }
            // FETCH_HEAD lines carry annotations after the id.
            let hex = &line[..line.len().min(40)];
            let hex = hex
                .to_str()
                .map_err(|_| GitError::Corrupt(name.to_string(), "non-UTF-8 id".into()))?;
            ids.push(ObjectId::from_str(hex).map_err(|_| {
                GitError::Corrupt(name.to_string(), format!("`{hex}` is not an object id"))
            })?);
        }
        Ok(Some(ids))
    }

    fn write_ids_file(&self, name: &str, ids: Option<&[ObjectId]>) -> Result<(), GitError> {
        match ids {
            None => match fs::remove_file(self.scalar_path(name)) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(GitError::IO(e)),
            },
            Some(ids) => {
                let mut content = String::new();
                for id in ids {
                    content.push_str(&id.to_hex());
                    content.push('\n');
                }
                fs::write(self.scalar_path(name), content)?;
                Ok(())
            }
        }
    }

    fn read_text_file(&self, name: &str) -> Result<Option<String>, GitError> {
        match fs::read_to_string(self.scalar_path(name)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GitError::IO(e)),
        }
    }

    fn write_text_file(&self, name: &str, text: Option<&str>) -> Result<(), GitError> {
        match text {
            None => match fs::remove_file(self.scalar_path(name)) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(GitError::IO(e)),
            },
            Some(text) => {
                fs::write(self.scalar_path(name), text)?;
                Ok(())
            }
        }
    }

    /// Ids of the commits being merged, from `MERGE_HEAD`.
    pub fn read_merge_heads(&self) -> Result<Option<Vec<ObjectId>>, GitError> {
        self.read_ids_file("MERGE_HEAD")
    }

    pub fn write_merge_heads(&self, heads: Option<&[ObjectId]>) -> Result<(), GitError> {
        self.write_ids_file("MERGE_HEAD", heads)
    }

    pub fn read_orig_head(&self) -> Result<Option<ObjectId>, GitError> {
        self.read_id_file("ORIG_HEAD")
    }

    pub fn write_orig_head(&self, id: Option<ObjectId>) -> Result<(), GitError> {
        self.write_ids_file("ORIG_HEAD", id.as_ref().map(std::slice::from_ref))
    }

    pub fn read_cherry_pick_head(&self) -> Result<Option<ObjectId>, GitError> {
        self.read_id_file("CHERRY_PICK_HEAD")
    }

    pub fn write_cherry_pick_head(&self, id: Option<ObjectId>) -> Result<(), GitError> {
        self.write_ids_file("CHERRY_PICK_HEAD", id.as_ref().map(std::slice::from_ref))
    }

    pub fn read_revert_head(&self) -> Result<Option<ObjectId>, GitError> {
        self.read_id_file("REVERT_HEAD")
    }

    pub fn write_revert_head(&self, id: Option<ObjectId>) -> Result<(), GitError> {
        self.write_ids_file("REVERT_HEAD", id.as_ref().map(std::slice::from_ref))
    }

    /// First id recorded in `FETCH_HEAD`. The core never writes this
    /// file; fetch machinery does.
    pub fn read_fetch_head(&self) -> Result<Option<ObjectId>, GitError> {
        self.read_id_file("FETCH_HEAD")
    }

    pub fn read_merge_msg(&self) -> Result<Option<String>, GitError> {
        self.read_text_file("MERGE_MSG")
    }

    pub fn write_merge_msg(&self, msg: Option<&str>) -> Result<(), GitError> {
        self.write_text_file("MERGE_MSG", msg)
    }

    pub fn read_squash_msg(&self) -> Result<Option<String>, GitError> {
        self.read_text_file("SQUASH_MSG")
    }

    pub fn write_squash_msg(&self, msg: Option<&str>) -> Result<(), GitError> {
        self.write_text_file("SQUASH_MSG", msg)
    }

    pub fn read_commit_edit_msg(&self) -> Result<Option<String>, GitError> {
        self.read_text_file("COMMIT_EDITMSG")
    }

    pub fn write_commit_edit_msg(&self, msg: Option<&str>) -> Result<(), GitError> {
        self.write_text_file("COMMIT_EDITMSG", msg)
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    /// Classify the repository state from its marker files.
    pub fn repository_state(&self) -> RepositoryState {
        state::probe(&self.git_dir, self.index_file.as_deref(), self.bare)
    }

    /// Typed snapshot of the `core.*` keys the repository honours.
    pub fn core_settings(&self) -> CoreSettings {
        let config = self.config.read().expect("config lock");
        CoreSettings {
            file_mode: config.get_bool("core", None, "filemode").unwrap_or(true),
            symlinks: config.get_bool("core", None, "symlinks").unwrap_or(true),
            hide_dot_files: config
                .get_bool("core", None, "hidedotfiles")
                .unwrap_or(false),
            log_all_ref_updates: config
                .get_bool("core", None, "logallrefupdates")
                .unwrap_or(!self.bare),
            precompose_unicode: config
                .get_bool("core", None, "precomposeunicode")
                .unwrap_or(false),
        }
    }

    /// The `branch.autosetupmerge` policy for new branches.
    pub fn auto_setup_merge(&self) -> AutoSetupMerge {
        let config = self.config.read().expect("config lock");
        match config.get_string("branch", None, "autosetupmerge") {
            Some(value) if value.eq_ignore_ascii_case("always") => AutoSetupMerge::Always,
            Some(value) if value.eq_ignore_ascii_case("false") => AutoSetupMerge::Never,
            _ => AutoSetupMerge::WhenRemote,
        }
    }

    /// Names of the configured remotes.
    pub fn remote_names(&self) -> Vec<String> {
        let config = self.config.read().expect("config lock");
        config
            .subsections("remote")
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// `remote.<name>.url` and the `remote.<name>.fetch` refspecs.
    pub fn remote_config(&self, name: &str) -> Option<RemoteConfig> {
        let config = self.config.read().expect("config lock");
        let url = config.get_string("remote", Some(name), "url")?.to_string();
        let fetch = config
            .get_all("remote", Some(name), "fetch")
            .into_iter()
            .map(str::to_string)
            .collect();
        Some(RemoteConfig { url, fetch })
    }

    /// The upstream tracking ref of a local branch, from
    /// `branch.<name>.remote` and `branch.<name>.merge`.
    pub fn upstream_of(&self, branch: &str) -> Option<String> {
        let short = refname::shorten(branch);
        let config = self.config.read().expect("config lock");
        let remote = config.get_string("branch", Some(short), "remote")?.to_string();
        let merge = config.get_string("branch", Some(short), "merge")?.to_string();
        let merge_short = merge.strip_prefix(R_HEADS)?;
        if remote == "." {
            Some(format!("{R_HEADS}{merge_short}"))
        } else {
            Some(format!("refs/remotes/{remote}/{merge_short}"))
        }
    }
}
