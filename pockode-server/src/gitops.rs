//! Git status, diff, and staging operations for a working copy

use crate::error::GitError;
use git2::{DiffFormat, DiffOptions, Repository, Status, StatusOptions};
use serde::Serialize;
use std::path::Path;

/// File change status on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Modified,
    Added,
    Deleted,
    Renamed,
    Untracked,
}

/// One entry in `git.status` output
#[derive(Debug, Clone, Serialize)]
pub struct GitStatusFile {
    pub path: String,
    pub status: FileStatus,
    pub staged: bool,
}

/// Status summary for a working copy
#[derive(Debug, Clone, Serialize)]
pub struct GitStatusSummary {
    pub branch: String,
    pub files: Vec<GitStatusFile>,
}

pub struct GitOps;

impl GitOps {
    pub fn is_git_repo(path: &Path) -> bool {
        Repository::open(path).is_ok()
    }

    fn open(path: &Path) -> Result<Repository, GitError> {
        Repository::open(path).map_err(|_| GitError::NotARepo(path.to_path_buf()))
    }

    /// Current status: staged and unstaged entries, untracked files included
    pub fn status(work_dir: &Path) -> Result<GitStatusSummary, GitError> {
        let repo = Self::open(work_dir)?;
        let branch = repo
            .head()
            .ok()
            .and_then(|h| h.shorthand().map(str::to_string))
            .unwrap_or_default();

        let mut opts = StatusOptions::new();
        opts.include_untracked(true);
        opts.recurse_untracked_dirs(true);
        opts.include_ignored(false);

        let statuses = repo.statuses(Some(&mut opts))?;
        let mut files = Vec::new();
        for entry in statuses.iter() {
            let Some(path) = entry.path() else { continue };
            let status = entry.status();

            if let Some(staged) = index_status(status) {
                files.push(GitStatusFile {
                    path: path.to_string(),
                    status: staged,
                    staged: true,
                });
            }
            if let Some(unstaged) = worktree_status(status) {
                files.push(GitStatusFile {
                    path: path.to_string(),
                    status: unstaged,
                    staged: false,
                });
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(GitStatusSummary { branch, files })
    }

    /// Unified diff text. `staged` diffs HEAD against the index; otherwise
    /// the index against the working directory (untracked content shown).
    pub fn diff(work_dir: &Path, path: Option<&str>, staged: bool) -> Result<String, GitError> {
        let repo = Self::open(work_dir)?;
        let head_tree = match repo.head() {
            Ok(head) => Some(head.peel_to_tree()?),
            Err(_) => None, // unborn branch
        };

        let mut opts = DiffOptions::new();
        if let Some(path) = path {
            opts.pathspec(path);
        }

        let diff = if staged {
            repo.diff_tree_to_index(head_tree.as_ref(), None, Some(&mut opts))?
        } else {
            opts.include_untracked(true);
            opts.recurse_untracked_dirs(true);
            opts.show_untracked_content(true);
            repo.diff_index_to_workdir(None, Some(&mut opts))?
        };

        let mut text = String::new();
        diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
            match line.origin() {
                '+' | '-' | ' ' => text.push(line.origin()),
                _ => {}
            }
            text.push_str(&String::from_utf8_lossy(line.content()));
            true
        })?;
        Ok(text)
    }

    /// Stage the given paths (adds, updates, and deletions)
    pub fn stage(work_dir: &Path, paths: &[String]) -> Result<(), GitError> {
        let repo = Self::open(work_dir)?;
        let mut index = repo.index()?;
        for path in paths {
            if work_dir.join(path).exists() {
                index.add_path(Path::new(path))?;
            } else {
                index.remove_path(Path::new(path))?;
            }
        }
        index.write()?;
        Ok(())
    }

    /// Unstage the given paths (reset index entries to HEAD)
    pub fn reset(work_dir: &Path, paths: &[String]) -> Result<(), GitError> {
        let repo = Self::open(work_dir)?;
        match repo.head() {
            Ok(head) => {
                let target = head.peel(git2::ObjectType::Commit)?;
                repo.reset_default(Some(&target), paths)?;
            }
            Err(_) => {
                // Unborn branch: unstaging means dropping the index entries.
                let mut index = repo.index()?;
                for path in paths {
                    index.remove_path(Path::new(path))?;
                }
                index.write()?;
            }
        }
        Ok(())
    }

    /// Initialize a repository with an identity and an empty initial commit.
    /// Used when the server is pointed at a fresh working directory.
    pub fn init_repo(path: &Path, user_name: &str, user_email: &str) -> Result<(), GitError> {
        let repo = Repository::init(path)?;
        let mut config = repo.config()?;
        config.set_str("user.name", user_name)?;
        config.set_str("user.email", user_email)?;

        let tree_id = repo.index()?.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let sig = repo.signature()?;
        repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])?;
        Ok(())
    }
}

fn index_status(status: Status) -> Option<FileStatus> {
    if status.contains(Status::INDEX_NEW) {
        Some(FileStatus::Added)
    } else if status.contains(Status::INDEX_MODIFIED) {
        Some(FileStatus::Modified)
    } else if status.contains(Status::INDEX_DELETED) {
        Some(FileStatus::Deleted)
    } else if status.contains(Status::INDEX_RENAMED) {
        Some(FileStatus::Renamed)
    } else {
        None
    }
}

fn worktree_status(status: Status) -> Option<FileStatus> {
    if status.contains(Status::WT_NEW) {
        Some(FileStatus::Untracked)
    } else if status.contains(Status::WT_MODIFIED) {
        Some(FileStatus::Modified)
    } else if status.contains(Status::WT_DELETED) {
        Some(FileStatus::Deleted)
    } else if status.contains(Status::WT_RENAMED) {
        Some(FileStatus::Renamed)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init_repo_with_commit(dir: &Path) -> Repository {
        let repo = Repository::init(dir).unwrap();
        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "Test").unwrap();
            config.set_str("user.email", "test@test.com").unwrap();
        }
        std::fs::write(dir.join("a.txt"), "one\n").unwrap();
        {
            let mut index = repo.index().unwrap();
            index.add_path(Path::new("a.txt")).unwrap();
            index.write().unwrap();
            let tree_id = index.write_tree().unwrap();
            let tree = repo.find_tree(tree_id).unwrap();
            let sig = repo.signature().unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
                .unwrap();
        }
        repo
    }

    #[test]
    fn test_status_clean_repo() {
        let dir = TempDir::new().unwrap();
        init_repo_with_commit(dir.path());
        let summary = GitOps::status(dir.path()).unwrap();
        assert!(summary.files.is_empty());
        assert!(!summary.branch.is_empty());
    }

    #[test]
    fn test_status_untracked_and_modified() {
        let dir = TempDir::new().unwrap();
        init_repo_with_commit(dir.path());
        std::fs::write(dir.path().join("a.txt"), "changed\n").unwrap();
        std::fs::write(dir.path().join("new.txt"), "new\n").unwrap();

        let summary = GitOps::status(dir.path()).unwrap();
        let modified = summary.files.iter().find(|f| f.path == "a.txt").unwrap();
        assert_eq!(modified.status, FileStatus::Modified);
        assert!(!modified.staged);
        let untracked = summary.files.iter().find(|f| f.path == "new.txt").unwrap();
        assert_eq!(untracked.status, FileStatus::Untracked);
    }

    #[test]
    fn test_stage_and_reset_round_trip() {
        let dir = TempDir::new().unwrap();
        init_repo_with_commit(dir.path());
        std::fs::write(dir.path().join("a.txt"), "changed\n").unwrap();

        GitOps::stage(dir.path(), &["a.txt".to_string()]).unwrap();
        let staged = GitOps::status(dir.path()).unwrap();
        assert!(staged.files.iter().any(|f| f.path == "a.txt" && f.staged));

        GitOps::reset(dir.path(), &["a.txt".to_string()]).unwrap();
        let unstaged = GitOps::status(dir.path()).unwrap();
        assert!(unstaged.files.iter().all(|f| !(f.path == "a.txt" && f.staged)));
    }

    #[test]
    fn test_stage_deleted_file() {
        let dir = TempDir::new().unwrap();
        init_repo_with_commit(dir.path());
        std::fs::remove_file(dir.path().join("a.txt")).unwrap();
        GitOps::stage(dir.path(), &["a.txt".to_string()]).unwrap();
        let summary = GitOps::status(dir.path()).unwrap();
        let entry = summary.files.iter().find(|f| f.path == "a.txt").unwrap();
        assert_eq!(entry.status, FileStatus::Deleted);
        assert!(entry.staged);
    }

    #[test]
    fn test_diff_contains_change() {
        let dir = TempDir::new().unwrap();
        init_repo_with_commit(dir.path());
        std::fs::write(dir.path().join("a.txt"), "two\n").unwrap();

        let text = GitOps::diff(dir.path(), Some("a.txt"), false).unwrap();
        assert!(text.contains("-one"));
        assert!(text.contains("+two"));

        // Nothing staged yet.
        let staged = GitOps::diff(dir.path(), Some("a.txt"), true).unwrap();
        assert!(staged.is_empty());
    }

    #[test]
    fn test_status_on_non_repo_fails() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            GitOps::status(dir.path()),
            Err(GitError::NotARepo(_))
        ));
    }

    #[test]
    fn test_init_repo_bootstrap() {
        let dir = TempDir::new().unwrap();
        GitOps::init_repo(dir.path(), "Pockode", "pockode@local").unwrap();
        assert!(GitOps::is_git_repo(dir.path()));
        let repo = Repository::open(dir.path()).unwrap();
        assert!(repo.head().is_ok());
    }
}
