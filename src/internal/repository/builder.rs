//! Repository construction: the single entry point for opening and
//! initialising repositories.
//!
//! Defaulting order is fixed: explicit setters win over the
//! environment, which wins over discovery, which wins over config.
//! Environment access goes through an injectable table so tests can
//! substitute values without touching the process environment.
//!
//! Only the repository's own `config` file is ever read; there is no
//! system or global chaining, so `GIT_CONFIG_NOSYSTEM` is honoured
//! trivially.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::GitError;
use crate::internal::config::Config;
use crate::internal::odb::{ObjectDatabase, OdbConfig};
use crate::internal::refs::HEAD;
use crate::internal::refs::database::RefDatabase;
use crate::internal::repository::Repository;

/// Environment variables the builder consumes.
const ENV_GIT_DIR: &str = "GIT_DIR";
const ENV_OBJECT_DIRECTORY: &str = "GIT_OBJECT_DIRECTORY";
const ENV_ALTERNATE_OBJECT_DIRECTORIES: &str = "GIT_ALTERNATE_OBJECT_DIRECTORIES";
const ENV_INDEX_FILE: &str = "GIT_INDEX_FILE";
const ENV_WORK_TREE: &str = "GIT_WORK_TREE";
const ENV_CEILING_DIRECTORIES: &str = "GIT_CEILING_DIRECTORIES";

/// Process-wide context for environment lookups, with a substitution
/// hook for tests. Lifecycle is the process lifetime; no dynamic
/// reload.
#[derive(Debug, Clone, Default)]
pub struct EnvTable {
    overrides: Option<HashMap<String, String>>,
}

impl EnvTable {
    /// Reads from the real process environment.
    pub fn process() -> EnvTable {
        EnvTable { overrides: None }
    }

    /// Reads only from the given table; absent keys read as unset.
    pub fn from_map(map: HashMap<String, String>) -> EnvTable {
        EnvTable {
            overrides: Some(map),
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        match &self.overrides {
            Some(map) => map.get(key).cloned(),
            None => std::env::var(key).ok(),
        }
    }
}

/// Builder for [`Repository`] handles.
#[derive(Default)]
pub struct RepositoryBuilder {
    git_dir: Option<PathBuf>,
    object_dir: Option<PathBuf>,
    work_tree: Option<PathBuf>,
    index_file: Option<PathBuf>,
    alternates: Vec<PathBuf>,
    ceilings: Vec<PathBuf>,
    env: EnvTable,
    env_read: bool,
    odb_config: OdbConfig,
}

impl RepositoryBuilder {
    pub fn new() -> RepositoryBuilder {
        RepositoryBuilder::default()
    }

    pub fn set_git_dir(mut self, git_dir: &Path) -> Self {
        self.git_dir = Some(git_dir.to_path_buf());
        self
    }

    pub fn set_object_directory(mut self, dir: &Path) -> Self {
        self.object_dir = Some(dir.to_path_buf());
        self
    }

    pub fn set_work_tree(mut self, work_tree: &Path) -> Self {
        self.work_tree = Some(work_tree.to_path_buf());
        self
    }

    pub fn set_index_file(mut self, index_file: &Path) -> Self {
        self.index_file = Some(index_file.to_path_buf());
        self
    }

    pub fn add_alternate_object_directory(mut self, dir: &Path) -> Self {
        self.alternates.push(dir.to_path_buf());
        self
    }

    pub fn add_ceiling_directory(mut self, dir: &Path) -> Self {
        self.ceilings.push(dir.to_path_buf());
        self
    }

    pub fn set_env(mut self, env: EnvTable) -> Self {
        self.env = env;
        self
    }

    pub fn set_odb_config(mut self, config: OdbConfig) -> Self {
        self.odb_config = config;
        self
    }

    /// Pull `GIT_DIR`, `GIT_OBJECT_DIRECTORY`,
    /// `GIT_ALTERNATE_OBJECT_DIRECTORIES`, `GIT_WORK_TREE`,
    /// `GIT_INDEX_FILE` and `GIT_CEILING_DIRECTORIES` from the
    /// environment table, without overriding explicit setters.
    pub fn read_environment(mut self) -> Self {
        if self.env_read {
            return self;
        }
        self.env_read = true;
        if self.git_dir.is_none() {
            if let Some(dir) = self.env.get(ENV_GIT_DIR) {
                self.git_dir = Some(PathBuf::from(dir));
            }
        }
        if self.object_dir.is_none() {
            if let Some(dir) = self.env.get(ENV_OBJECT_DIRECTORY) {
                self.object_dir = Some(PathBuf::from(dir));
            }
        }
        if let Some(list) = self.env.get(ENV_ALTERNATE_OBJECT_DIRECTORIES) {
            for dir in std::env::split_paths(&list) {
                self.alternates.push(dir);
            }
        }
        if self.work_tree.is_none() {
            if let Some(dir) = self.env.get(ENV_WORK_TREE) {
                self.work_tree = Some(PathBuf::from(dir));
            }
        }
        if self.index_file.is_none() {
            if let Some(file) = self.env.get(ENV_INDEX_FILE) {
                self.index_file = Some(PathBuf::from(file));
            }
        }
        if let Some(list) = self.env.get(ENV_CEILING_DIRECTORIES) {
            for dir in std::env::split_paths(&list) {
                self.ceilings.push(dir);
            }
        }
        self
    }

    /// Walk upward from `start` looking for a repository, honouring the
    /// configured ceiling directories. Both `.git` children (including
    /// `gitdir:` files) and bare layouts are recognised.
    pub fn find_git_dir(mut self, start: &Path) -> Result<Self, GitError> {
        if self.git_dir.is_some() {
            return Ok(self);
        }
        let mut current = Some(start.to_path_buf());
        while let Some(dir) = current {
            let dotgit = dir.join(".git");
            if dotgit.is_dir() {
                self.git_dir = Some(dotgit);
                if self.work_tree.is_none() {
                    self.work_tree = Some(dir);
                }
                return Ok(self);
            }
            if dotgit.is_file() {
                // Worktree-style `.git` file: `gitdir: <path>`.
                let content = fs::read_to_string(&dotgit)?;
                let target = content
                    .strip_prefix("gitdir:")
                    .map(str::trim)
                    .ok_or_else(|| {
                        GitError::Corrupt(
                            dotgit.display().to_string(),
                            "gitfile without gitdir pointer".to_string(),
                        )
                    })?;
                let resolved = if Path::new(target).is_absolute() {
                    PathBuf::from(target)
                } else {
                    dir.join(target)
                };
                self.git_dir = Some(resolved);
                if self.work_tree.is_none() {
                    self.work_tree = Some(dir);
                }
                return Ok(self);
            }
            if looks_like_git_dir(&dir) {
                self.git_dir = Some(dir);
                return Ok(self);
            }
            if self.ceilings.iter().any(|ceiling| ceiling == &dir) {
                break;
            }
            current = dir.parent().map(Path::to_path_buf);
        }
        Err(GitError::Missing(format!(
            "no git repository found above {}",
            start.display()
        )))
    }

    /// Open the repository. Validates the layout and the configuration
    /// before any database is touched.
    pub fn open(mut self) -> Result<Repository, GitError> {
        self = self.read_environment();
        let git_dir = self
            .git_dir
            .clone()
            .ok_or_else(|| GitError::Missing("git directory".to_string()))?;
        if !looks_like_git_dir(&git_dir) {
            return Err(GitError::Missing(format!(
                "{} is not a git repository",
                git_dir.display()
            )));
        }

        let config = Config::load(&git_dir.join("config"))?;
        validate_format(&config)?;

        let bare = match config.get_bool("core", None, "bare") {
            Some(bare) => bare && self.work_tree.is_none(),
            None => self.work_tree.is_none() && config.get_string("core", None, "worktree").is_none(),
        };
        let work_tree = if bare {
            None
        } else {
            self.work_tree
                .clone()
                .or_else(|| {
                    config
                        .get_string("core", None, "worktree")
                        .map(PathBuf::from)
                })
                .or_else(|| git_dir.parent().map(Path::to_path_buf))
        };
        let index_file = if bare {
            None
        } else {
            Some(
                self.index_file
                    .clone()
                    .unwrap_or_else(|| git_dir.join("index")),
            )
        };

        let object_dir = self
            .object_dir
            .clone()
            .unwrap_or_else(|| git_dir.join("objects"));
        let odb = ObjectDatabase::open_file(&object_dir, &self.alternates, self.odb_config)?;

        let log_all = config
            .get_bool("core", None, "logallrefupdates")
            .unwrap_or(!bare);
        let refdb = std::sync::Arc::new(RefDatabase::new_files(
            &git_dir,
            std::sync::Arc::clone(&odb),
            log_all,
        ));

        debug!(git_dir = %git_dir.display(), bare, "repository opened");
        Ok(Repository::assemble(
            git_dir, work_tree, index_file, bare, config, odb, refdb,
        ))
    }
}

/// A directory is a plausible git dir when it has the three mandatory
/// pieces of the layout.
fn looks_like_git_dir(dir: &Path) -> bool {
    dir.join(HEAD).is_file() && dir.join("objects").is_dir() && dir.join("refs").is_dir()
}

/// Enforce `core.repositoryformatversion` and the known-extension set.
fn validate_format(config: &Config) -> Result<(), GitError> {
    let version = config
        .get_int("core", None, "repositoryformatversion")
        .unwrap_or(0);
    let extension_keys = config.keys("extensions");

    match version {
        0 | 1 => {}
        other => {
            return Err(GitError::Corrupt(
                "config".to_string(),
                format!("unknown repository format version {other}"),
            ));
        }
    }
    for key in extension_keys {
        match key {
            "refsstorage" => {}
            other => {
                // Unknown extensions make the repository unreadable by
                // this build, regardless of version.
                return Err(GitError::Corrupt(
                    "config".to_string(),
                    format!("unknown repository extension `{other}`"),
                ));
            }
        }
    }
    match config.get_string("extensions", None, "refsstorage") {
        None => Ok(()),
        Some(value) if value.eq_ignore_ascii_case("files") => Ok(()),
        Some(value) if value.eq_ignore_ascii_case("reftree") => Err(GitError::Corrupt(
            "config".to_string(),
            "reftree ref storage is not supported by this build".to_string(),
        )),
        Some(other) => Err(GitError::Corrupt(
            "config".to_string(),
            format!("unknown refsStorage value `{other}`"),
        )),
    }
}

/// Create the git-dir skeleton for a new repository and open it.
pub fn init(path: &Path, bare: bool) -> Result<Repository, GitError> {
    let git_dir = if bare { path.to_path_buf() } else { path.join(".git") };
    if looks_like_git_dir(&git_dir) {
        return Err(GitError::RefAlreadyExists(git_dir.display().to_string()));
    }
    fs::create_dir_all(git_dir.join("objects/info"))?;
    fs::create_dir_all(git_dir.join("objects/pack"))?;
    fs::create_dir_all(git_dir.join("refs/heads"))?;
    fs::create_dir_all(git_dir.join("refs/tags"))?;
    fs::create_dir_all(git_dir.join("info"))?;
    fs::write(git_dir.join(HEAD), b"ref: refs/heads/master\n")?;
    fs::write(git_dir.join("info/exclude"), b"")?;
    fs::write(git_dir.join("description"), b"Unnamed repository\n")?;

    let mut config = Config::new();
    config.set_string("core", None, "repositoryformatversion", "0");
    config.set_string("core", None, "filemode", "true");
    config.set_string("core", None, "bare", if bare { "true" } else { "false" });
    config.set_string(
        "core",
        None,
        "logallrefupdates",
        if bare { "false" } else { "true" },
    );
    config.save(&git_dir.join("config"))?;

    let builder = RepositoryBuilder::new()
        .set_env(EnvTable::from_map(HashMap::new()))
        .set_git_dir(&git_dir);
    if bare {
        builder.open()
    } else {
        builder.set_work_tree(path).open()
    }
}
