//! File system abstraction
//!
//! The deployment and extraction logic never touches `std::fs` directly;
//! it goes through this trait so unit tests can run against an in-memory
//! mock while the binary uses `LocalFs`.

use crate::error::DeployResult;
use std::path::{Path, PathBuf};

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Abstract file system interface
pub trait FileSystem {
    /// Read file content as UTF-8 text
    fn read_to_string(&self, path: &Path) -> DeployResult<String>;

    /// Read raw file content
    fn read_bytes(&self, path: &Path) -> DeployResult<Vec<u8>>;

    /// Write file content, replacing any existing file
    fn write(&self, path: &Path, content: &[u8]) -> DeployResult<()>;

    /// Check if a path exists
    fn exists(&self, path: &Path) -> bool;

    /// List a directory, discriminating files from subdirectories
    fn read_dir(&self, path: &Path) -> DeployResult<Vec<DirEntry>>;

    /// Create directory and parents
    fn create_dir_all(&self, path: &Path) -> DeployResult<()>;

    /// Remove a file
    fn remove_file(&self, path: &Path) -> DeployResult<()>;

    /// Hex-encoded SHA-256 of file content
    fn hash_file(&self, path: &Path) -> DeployResult<String>;
}

/// Real file system implementation
#[derive(Debug, Clone, Default)]
pub struct LocalFs;

impl LocalFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for LocalFs {
    fn read_to_string(&self, path: &Path) -> DeployResult<String> {
        Ok(std::fs::read_to_string(path)?)
    }

    fn read_bytes(&self, path: &Path) -> DeployResult<Vec<u8>> {
        Ok(std::fs::read(path)?)
    }

    fn write(&self, path: &Path, content: &[u8]) -> DeployResult<()> {
        Ok(std::fs::write(path, content)?)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_dir(&self, path: &Path) -> DeployResult<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            entries.push(DirEntry {
                is_dir: entry.file_type()?.is_dir(),
                path: entry.path(),
            });
        }
        Ok(entries)
    }

    fn create_dir_all(&self, path: &Path) -> DeployResult<()> {
        Ok(std::fs::create_dir_all(path)?)
    }

    fn remove_file(&self, path: &Path) -> DeployResult<()> {
        Ok(std::fs::remove_file(path)?)
    }

    fn hash_file(&self, path: &Path) -> DeployResult<String> {
        use sha2::{Digest, Sha256};
        let content = std::fs::read(path)?;
        let mut hasher = Sha256::new();
        hasher.update(&content);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// In-memory file system for testing
///
/// Uses `Arc<Mutex<>>` internally so it can be cloned and shared.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockFileSystem {
    state: std::sync::Arc<std::sync::Mutex<MockState>>,
}

#[cfg(test)]
#[derive(Default)]
struct MockState {
    files: std::collections::BTreeMap<PathBuf, Vec<u8>>,
    dirs: std::collections::BTreeSet<PathBuf>,
}

#[cfg(test)]
impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a text file, creating parent directories implicitly
    pub fn with_file(self, path: impl Into<PathBuf>, content: &str) -> Self {
        self.add_file(path, content);
        self
    }

    pub fn add_file(&self, path: impl Into<PathBuf>, content: &str) {
        let path = path.into();
        let mut state = self.state.lock().unwrap();
        let mut parent = path.parent();
        while let Some(dir) = parent {
            if dir.as_os_str().is_empty() {
                break;
            }
            state.dirs.insert(dir.to_path_buf());
            parent = dir.parent();
        }
        state.files.insert(path, content.as_bytes().to_vec());
    }

    pub fn with_dir(self, path: impl Into<PathBuf>) -> Self {
        self.state.lock().unwrap().dirs.insert(path.into());
        self
    }

    pub fn file_text(&self, path: &Path) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

#[cfg(test)]
impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> DeployResult<String> {
        self.file_text(path).ok_or_else(|| {
            crate::error::DeployError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("file not found: {}", path.display()),
            ))
        })
    }

    fn read_bytes(&self, path: &Path) -> DeployResult<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| {
                crate::error::DeployError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("file not found: {}", path.display()),
                ))
            })
    }

    fn write(&self, path: &Path, content: &[u8]) -> DeployResult<()> {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_path_buf(), content.to_vec());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let state = self.state.lock().unwrap();
        state.files.contains_key(path) || state.dirs.contains(path)
    }

    fn read_dir(&self, path: &Path) -> DeployResult<Vec<DirEntry>> {
        let state = self.state.lock().unwrap();
        let mut entries = Vec::new();
        for file in state.files.keys() {
            if file.parent() == Some(path) {
                entries.push(DirEntry {
                    path: file.clone(),
                    is_dir: false,
                });
            }
        }
        for dir in state.dirs.iter() {
            if dir.parent() == Some(path) {
                entries.push(DirEntry {
                    path: dir.clone(),
                    is_dir: true,
                });
            }
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn create_dir_all(&self, path: &Path) -> DeployResult<()> {
        self.state.lock().unwrap().dirs.insert(path.to_path_buf());
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> DeployResult<()> {
        self.state.lock().unwrap().files.remove(path);
        Ok(())
    }

    fn hash_file(&self, path: &Path) -> DeployResult<String> {
        use sha2::{Digest, Sha256};
        let content = self.read_bytes(path)?;
        let mut hasher = Sha256::new();
        hasher.update(&content);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_fs_lists_only_direct_children() {
        let fs = MockFileSystem::new()
            .with_file("root/a.js", "a")
            .with_file("root/sub/b.js", "b");

        let entries = fs.read_dir(Path::new("root")).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.path.clone()).collect();
        assert_eq!(names, vec![PathBuf::from("root/a.js"), PathBuf::from("root/sub")]);
        assert!(entries[1].is_dir);
    }

    #[test]
    fn mock_fs_hash_is_stable() {
        let fs = MockFileSystem::new().with_file("a.js", "print('x')");
        let first = fs.hash_file(Path::new("a.js")).unwrap();
        let second = fs.hash_file(Path::new("a.js")).unwrap();
        assert_eq!(first, second);
    }
}
