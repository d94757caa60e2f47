//! Virtual file system used to enumerate plugin candidates.
//!
//! Locations are addressed as `scheme://relative/path`. [`MountedFileSystem`] maps
//! each scheme onto a directory of the real file system.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Location scanned for dynamic plugins
pub const PLUGINS_ROOT: &str = "plugins://";

/// One entry of a virtual directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_file: bool,
}

pub trait VirtualFileSystem {
    /// List the entries of a virtual directory
    ///
    /// # Errors
    /// Returns an error if the location is not mounted or cannot be read
    fn open_directory(&self, uri: &str) -> io::Result<Vec<DirEntry>>;

    /// Resolve a virtual location to an absolute path
    fn get_entry(&self, uri: &str) -> Option<PathBuf>;
}

/// Scheme to directory mount table
#[derive(Debug, Clone, Default)]
pub struct MountedFileSystem {
    mounts: HashMap<String, PathBuf>,
}

impl MountedFileSystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `dir` at `scheme://`. `scheme` may be given with or without the `://` suffix.
    pub fn mount(&mut self, scheme: &str, dir: impl Into<PathBuf>) -> &mut Self {
        let scheme = scheme.trim_end_matches("://").to_string();
        self.mounts.insert(scheme, dir.into());
        self
    }

    fn resolve(&self, uri: &str) -> Option<PathBuf> {
        let (scheme, rest) = uri.split_once("://")?;
        let root = self.mounts.get(scheme)?;
        let rest = rest.trim_start_matches('/');
        // Keep lookups inside the mount
        if Path::new(rest)
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return None;
        }
        if rest.is_empty() {
            Some(root.clone())
        } else {
            Some(root.join(rest))
        }
    }
}

impl VirtualFileSystem for MountedFileSystem {
    fn open_directory(&self, uri: &str) -> io::Result<Vec<DirEntry>> {
        let dir = self.resolve(uri).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{uri} is not mounted"))
        })?;

        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            entries.push(DirEntry { name, is_file });
        }
        // read_dir order is platform dependent
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn get_entry(&self, uri: &str) -> Option<PathBuf> {
        let path = self.resolve(uri)?;
        if !path.exists() {
            return None;
        }
        fs::canonicalize(&path).ok().or(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_directory_lists_sorted_entries() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.so"), b"").unwrap();
        fs::write(dir.path().join("a.so"), b"").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let mut vfs = MountedFileSystem::new();
        vfs.mount("plugins", dir.path());

        let entries = vfs.open_directory(PLUGINS_ROOT).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.so", "b.so", "nested"]);
        assert!(entries[0].is_file);
        assert!(!entries[2].is_file);
    }

    #[test]
    fn test_unmounted_scheme_is_not_found() {
        let vfs = MountedFileSystem::new();
        let err = vfs.open_directory(PLUGINS_ROOT).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(vfs.get_entry("plugins://a.so").is_none());
    }

    #[test]
    fn test_get_entry_resolves_absolute_path() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("liba.so"), b"").unwrap();

        let mut vfs = MountedFileSystem::new();
        vfs.mount("plugins://", dir.path());

        let path = vfs.get_entry("plugins://liba.so").unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("liba.so"));
        assert!(vfs.get_entry("plugins://missing.so").is_none());
        assert!(vfs.get_entry("plugins://../liba.so").is_none());
    }
}
