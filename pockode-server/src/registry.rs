//! Worktree discovery and lifecycle
//!
//! The registry owns the list of worktrees for one project: the main
//! working directory plus siblings under `<parent>/<basename>-worktrees`.
//! Worktrees checked out anywhere else are invisible: not listed, not
//! resolvable, not deletable. The list is cached with a short TTL because
//! enumeration opens every linked worktree's repository.

use crate::error::WorktreeError;
use crate::gitops::GitOps;
use git2::{BranchType, Repository, StatusOptions, WorktreeAddOptions, WorktreePruneOptions};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// How long a cached worktree list stays fresh
pub const CACHE_TTL: Duration = Duration::from_secs(30);

/// One worktree. The empty name denotes the main working directory.
#[derive(Debug, Clone, Serialize)]
pub struct WorktreeInfo {
    pub name: String,
    pub path: PathBuf,
    pub branch: String,
    pub is_main: bool,
}

struct CacheEntry {
    at: Instant,
    list: Vec<WorktreeInfo>,
}

pub struct WorktreeRegistry {
    main_dir: PathBuf,
    worktrees_dir: PathBuf,
    cache: Mutex<Option<CacheEntry>>,
}

impl WorktreeRegistry {
    /// Resolve the project path (following symlinks) and compute the sibling
    /// worktrees directory next to it.
    pub fn new(work_dir: &Path) -> Result<Self, WorktreeError> {
        let main_dir = work_dir.canonicalize()?;
        let basename = main_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("project");
        let parent = main_dir.parent().unwrap_or(&main_dir);
        let worktrees_dir = parent.join(format!("{}-worktrees", basename));
        Ok(Self {
            main_dir,
            worktrees_dir,
            cache: Mutex::new(None),
        })
    }

    pub fn is_git_repo(&self) -> bool {
        GitOps::is_git_repo(&self.main_dir)
    }

    pub fn main_dir(&self) -> &Path {
        &self.main_dir
    }

    pub fn worktrees_dir(&self) -> &Path {
        &self.worktrees_dir
    }

    /// Names must be single path components: anything that could traverse
    /// out of the worktrees directory is rejected before touching git.
    fn validate_name(name: &str) -> Result<(), WorktreeError> {
        let invalid = name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains('%')
            || name == "."
            || name == ".."
            || name == ".git";
        if invalid {
            return Err(WorktreeError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    fn main_info(&self) -> WorktreeInfo {
        let branch = Repository::open(&self.main_dir)
            .ok()
            .and_then(|repo| current_branch(&repo).ok())
            .unwrap_or_default();
        WorktreeInfo {
            name: String::new(),
            path: self.main_dir.clone(),
            branch,
            is_main: true,
        }
    }

    /// The current worktree list, main first, cached for [`CACHE_TTL`]
    pub fn list(&self) -> Result<Vec<WorktreeInfo>, WorktreeError> {
        {
            let cache = self.cache.lock().unwrap();
            if let Some(entry) = cache.as_ref() {
                if entry.at.elapsed() < CACHE_TTL {
                    return Ok(entry.list.clone());
                }
            }
        }
        let list = self.enumerate()?;
        *self.cache.lock().unwrap() = Some(CacheEntry {
            at: Instant::now(),
            list: list.clone(),
        });
        Ok(list)
    }

    /// Force a refresh on next access
    pub fn invalidate(&self) {
        *self.cache.lock().unwrap() = None;
    }

    fn enumerate(&self) -> Result<Vec<WorktreeInfo>, WorktreeError> {
        let mut list = vec![self.main_info()];
        let Ok(repo) = Repository::open(&self.main_dir) else {
            return Ok(list);
        };

        for name in repo.worktrees()?.iter().flatten() {
            let Ok(wt) = repo.find_worktree(name) else {
                continue;
            };
            let path = wt.path().to_path_buf();
            // External worktrees are ignored.
            let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
            if !canonical.starts_with(&self.worktrees_dir) {
                debug!(name, path = %path.display(), "ignoring external worktree");
                continue;
            }
            let branch = Repository::open(&path)
                .ok()
                .and_then(|r| current_branch(&r).ok())
                .unwrap_or_else(|| name.to_string());
            list.push(WorktreeInfo {
                name: name.to_string(),
                path: canonical,
                branch,
                is_main: false,
            });
        }
        Ok(list)
    }

    /// Resolve a name to its worktree. The empty string is the main one.
    pub fn resolve(&self, name: &str) -> Result<WorktreeInfo, WorktreeError> {
        if name.is_empty() {
            return Ok(self.main_info());
        }
        Self::validate_name(name)?;
        self.list()?
            .into_iter()
            .find(|wt| wt.name == name)
            .ok_or_else(|| WorktreeError::NotFound(name.to_string()))
    }

    /// Create a worktree under the worktrees directory. Checks out `branch`
    /// if it already exists, otherwise creates it from `base_branch` (or
    /// HEAD).
    pub fn create(
        &self,
        name: &str,
        branch: &str,
        base_branch: Option<&str>,
    ) -> Result<WorktreeInfo, WorktreeError> {
        Self::validate_name(name)?;
        let repo = Repository::open(&self.main_dir)
            .map_err(|_| WorktreeError::NotAGitRepo(self.main_dir.clone()))?;

        let path = self.worktrees_dir.join(name);
        if path.exists() || self.list()?.iter().any(|wt| wt.name == name) {
            return Err(WorktreeError::AlreadyExists(name.to_string()));
        }
        if !self.worktrees_dir.exists() {
            std::fs::create_dir_all(&self.worktrees_dir)?;
        }

        let reference = match repo.find_branch(branch, BranchType::Local) {
            Ok(existing) => existing.into_reference(),
            Err(_) => {
                let commit = match base_branch {
                    Some(base) => repo
                        .find_branch(base, BranchType::Local)?
                        .get()
                        .peel_to_commit()?,
                    None => repo.head()?.peel_to_commit()?,
                };
                repo.branch(branch, &commit, false)?.into_reference()
            }
        };

        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(&reference));
        repo.worktree(name, &path, Some(&opts))?;
        self.invalidate();
        info!(name, branch, path = %path.display(), "worktree created");

        Ok(WorktreeInfo {
            name: name.to_string(),
            path,
            branch: branch.to_string(),
            is_main: false,
        })
    }

    /// Remove a worktree. The main worktree is never deletable; a worktree
    /// with modified tracked files needs `force`.
    pub fn delete(&self, name: &str, force: bool) -> Result<(), WorktreeError> {
        if name.is_empty() {
            return Err(WorktreeError::MainWorktree);
        }
        let info = self.resolve(name)?;
        if info.is_main {
            return Err(WorktreeError::MainWorktree);
        }
        if !force && has_modified_files(&info.path)? {
            return Err(WorktreeError::Modified(name.to_string()));
        }

        let repo = Repository::open(&self.main_dir)
            .map_err(|_| WorktreeError::NotAGitRepo(self.main_dir.clone()))?;
        if let Ok(wt) = repo.find_worktree(name) {
            let mut prune_opts = WorktreePruneOptions::new();
            prune_opts.valid(true).working_tree(true);
            wt.prune(Some(&mut prune_opts))?;
        }
        if info.path.exists() {
            std::fs::remove_dir_all(&info.path)?;
        }
        self.invalidate();
        info!(name, "worktree removed");
        Ok(())
    }
}

fn current_branch(repo: &Repository) -> Result<String, git2::Error> {
    let head = repo.head()?;
    Ok(head.shorthand().unwrap_or("HEAD").to_string())
}

/// Modified tracked files only; untracked files do not block deletion
fn has_modified_files(worktree_path: &Path) -> Result<bool, WorktreeError> {
    let repo = Repository::open(worktree_path)?;
    let mut opts = StatusOptions::new();
    opts.include_untracked(false);
    let statuses = repo.statuses(Some(&mut opts))?;
    Ok(!statuses.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init_project(root: &Path) -> PathBuf {
        let project = root.join("proj");
        std::fs::create_dir(&project).unwrap();
        let repo = Repository::init(&project).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();

        std::fs::write(project.join("README.md"), "hello\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = repo.signature().unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap();
        project
    }

    #[test]
    fn test_list_contains_main_first() {
        let dir = TempDir::new().unwrap();
        let project = init_project(dir.path());
        let registry = WorktreeRegistry::new(&project).unwrap();
        let list = registry.list().unwrap();
        assert_eq!(list.len(), 1);
        assert!(list[0].is_main);
        assert_eq!(list[0].name, "");
    }

    #[test]
    fn test_create_places_worktree_in_sibling_dir() {
        let dir = TempDir::new().unwrap();
        let project = init_project(dir.path());
        let registry = WorktreeRegistry::new(&project).unwrap();

        let info = registry.create("feat", "f1", None).unwrap();
        assert!(info.path.starts_with(registry.worktrees_dir()));
        assert!(info.path.join(".git").exists());

        let list = registry.list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].name, "feat");
        assert_eq!(list[1].branch, "f1");
    }

    #[test]
    fn test_create_duplicate_fails() {
        let dir = TempDir::new().unwrap();
        let project = init_project(dir.path());
        let registry = WorktreeRegistry::new(&project).unwrap();
        registry.create("feat", "f1", None).unwrap();
        assert!(matches!(
            registry.create("feat", "f2", None),
            Err(WorktreeError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_create_rejects_traversal_names() {
        let dir = TempDir::new().unwrap();
        let project = init_project(dir.path());
        let registry = WorktreeRegistry::new(&project).unwrap();
        for name in ["../escape", "a/b", "..", ".", "%2e%2e", ".git"] {
            assert!(
                matches!(
                    registry.create(name, "x", None),
                    Err(WorktreeError::InvalidName(_))
                ),
                "accepted {:?}",
                name
            );
        }
    }

    #[test]
    fn test_delete_main_is_rejected() {
        let dir = TempDir::new().unwrap();
        let project = init_project(dir.path());
        let registry = WorktreeRegistry::new(&project).unwrap();
        assert!(matches!(
            registry.delete("", false),
            Err(WorktreeError::MainWorktree)
        ));
    }

    #[test]
    fn test_create_then_delete_restores_filesystem() {
        let dir = TempDir::new().unwrap();
        let project = init_project(dir.path());
        let registry = WorktreeRegistry::new(&project).unwrap();

        let info = registry.create("feat", "f1", None).unwrap();
        assert!(info.path.exists());
        registry.delete("feat", false).unwrap();
        assert!(!info.path.exists());
        assert_eq!(registry.list().unwrap().len(), 1);
        assert!(project.exists());
    }

    #[test]
    fn test_delete_with_modified_files_needs_force() {
        let dir = TempDir::new().unwrap();
        let project = init_project(dir.path());
        let registry = WorktreeRegistry::new(&project).unwrap();

        let info = registry.create("feat", "f1", None).unwrap();
        std::fs::write(info.path.join("README.md"), "changed\n").unwrap();

        assert!(matches!(
            registry.delete("feat", false),
            Err(WorktreeError::Modified(_))
        ));
        registry.delete("feat", true).unwrap();
        assert!(!info.path.exists());
    }

    #[test]
    fn test_resolve_unknown_name() {
        let dir = TempDir::new().unwrap();
        let project = init_project(dir.path());
        let registry = WorktreeRegistry::new(&project).unwrap();
        assert!(matches!(
            registry.resolve("ghost"),
            Err(WorktreeError::NotFound(_))
        ));
    }

    #[test]
    fn test_create_from_base_branch() {
        let dir = TempDir::new().unwrap();
        let project = init_project(dir.path());
        let registry = WorktreeRegistry::new(&project).unwrap();

        let main_branch = registry.resolve("").unwrap().branch;
        let info = registry
            .create("feat", "new-branch", Some(&main_branch))
            .unwrap();
        assert_eq!(info.branch, "new-branch");
    }

    #[test]
    fn test_external_worktree_is_invisible() {
        let dir = TempDir::new().unwrap();
        let project = init_project(dir.path());
        let registry = WorktreeRegistry::new(&project).unwrap();

        // Checked out outside the worktrees dir: git sees it, pockode doesn't.
        let repo = Repository::open(&project).unwrap();
        let external = dir.path().join("elsewhere");
        repo.worktree("elsewhere", &external, None).unwrap();

        registry.invalidate();
        let list = registry.list().unwrap();
        assert!(list.iter().all(|wt| wt.name != "elsewhere"));
        assert!(matches!(
            registry.resolve("elsewhere"),
            Err(WorktreeError::NotFound(_))
        ));
        assert!(matches!(
            registry.delete("elsewhere", true),
            Err(WorktreeError::NotFound(_))
        ));
    }
}
