//! Safe file access under a worktree
//!
//! `file.get` takes a relative path from the browser. Anything that could
//! point outside the working directory is rejected before touching the
//! filesystem, including URL-encoded traversal and symlink escapes.

use crate::error::FileError;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};

/// Validate a client-supplied path. Returns the normalized relative path;
/// the empty string maps to the work dir root.
pub fn validate_rel_path(input: &str) -> Option<PathBuf> {
    if input.is_empty() {
        return Some(PathBuf::new());
    }
    let lowered = input.to_ascii_lowercase();
    if lowered.contains("%2e") || lowered.contains("%2f") || lowered.contains("%5c") {
        return None;
    }
    if input.contains('\\') {
        return None;
    }
    let path = Path::new(input);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            // "." components, absolute prefixes, and ".." all reject.
            _ => return None,
        }
    }
    Some(clean)
}

#[derive(Debug, Clone, Serialize)]
pub struct DirEntryInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileContent {
    pub content: String,
    pub size: u64,
}

/// What `file.get` returns
#[derive(Debug, Clone)]
pub enum FileNode {
    Directory(Vec<DirEntryInfo>),
    File(FileContent),
}

/// Read a directory listing or file content at a validated relative path
pub fn get(work_dir: &Path, rel: &Path) -> Result<FileNode, FileError> {
    let full = work_dir.join(rel);
    if !full.exists() {
        return Err(FileError::NotFound(rel.to_string_lossy().to_string()));
    }

    // Symlinks inside the tree must not escape it.
    let canonical = full.canonicalize()?;
    let root = work_dir.canonicalize()?;
    if !canonical.starts_with(&root) {
        return Err(FileError::NotFound(rel.to_string_lossy().to_string()));
    }

    if canonical.is_dir() {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&canonical)? {
            let entry = entry?;
            let kind = if entry.file_type()?.is_dir() {
                "directory"
            } else {
                "file"
            };
            entries.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().to_string(),
                kind,
            });
        }
        entries.sort_by(|a, b| (a.kind, &a.name).cmp(&(b.kind, &b.name)));
        return Ok(FileNode::Directory(entries));
    }

    let bytes = std::fs::read(&canonical)?;
    let size = bytes.len() as u64;
    match String::from_utf8(bytes) {
        Ok(content) => Ok(FileNode::File(FileContent { content, size })),
        Err(_) => Err(FileError::Binary(rel.to_string_lossy().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_accepts_normal_paths() {
        assert_eq!(validate_rel_path("").unwrap(), PathBuf::new());
        assert_eq!(validate_rel_path("src").unwrap(), PathBuf::from("src"));
        assert_eq!(
            validate_rel_path("src/main.rs").unwrap(),
            PathBuf::from("src/main.rs")
        );
    }

    #[test]
    fn test_validate_rejects_traversal() {
        for input in [
            "..",
            "../etc/passwd",
            "src/../..",
            "/abs",
            "/etc/passwd",
            "%2e%2e/etc",
            "a/%2E%2E/b",
            "a\\..\\b",
            "./src",
        ] {
            assert!(validate_rel_path(input).is_none(), "accepted {:?}", input);
        }
    }

    #[test]
    fn test_get_root_listing() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("README.md"), "hi").unwrap();

        let node = get(dir.path(), Path::new("")).unwrap();
        match node {
            FileNode::Directory(entries) => {
                let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
                assert!(names.contains(&"src"));
                assert!(names.contains(&"README.md"));
                // Directories sort before files.
                assert_eq!(entries[0].kind, "directory");
            }
            FileNode::File(_) => panic!("expected directory"),
        }
    }

    #[test]
    fn test_get_file_content() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        match get(dir.path(), Path::new("a.txt")).unwrap() {
            FileNode::File(file) => {
                assert_eq!(file.content, "hello");
                assert_eq!(file.size, 5);
            }
            FileNode::Directory(_) => panic!("expected file"),
        }
    }

    #[test]
    fn test_get_missing_path() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            get(dir.path(), Path::new("nope")),
            Err(FileError::NotFound(_))
        ));
    }

    #[test]
    fn test_get_binary_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("blob"), [0u8, 159, 146, 150]).unwrap();
        assert!(matches!(
            get(dir.path(), Path::new("blob")),
            Err(FileError::Binary(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_not_found() {
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret"), "x").unwrap();
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("leak")).unwrap();
        assert!(matches!(
            get(dir.path(), Path::new("leak/secret")),
            Err(FileError::NotFound(_))
        ));
    }
}
