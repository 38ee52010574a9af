//! Discovery of backup units: the non-empty directories directly under the
//! backup root.

use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithDebugObjectAndFnName;
use function_name::named;
use getset::Getters;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One directory selected for backup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Getters)]
#[getset(get = "pub")]
pub struct BackupUnit {
    /// Absolute source path
    path: PathBuf,
    /// Final path segment, used in archive names and as the archive's top-level entry
    name: String,
}

impl BackupUnit {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, name }
    }
}

/// A top-level directory found under the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    Unit(BackupUnit),
    Empty(BackupUnit),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DirectoryScanner;

impl DirectoryScanner {
    /// Lists every directory directly under `root`, sorted by name, tagged by
    /// whether it holds at least one entry. Files and symlinks are ignored.
    #[named]
    pub fn discover<P: AsRef<Path>>(&self, root: P) -> Result<Vec<Candidate>> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(Error::NotFound(root.to_path_buf()));
        }

        tracing::debug!("Scanning backup root {:?}", root);
        let mut candidates = Vec::new();
        for entry in WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry
                .map_err(Error::from)
                .with_debug_object_and_fn_name(root.to_path_buf(), function_path!())?;
            if !entry.file_type().is_dir() {
                tracing::trace!("Skipping {:?}, not a directory", entry.path());
                continue;
            }

            let unit = BackupUnit::new(entry.into_path());
            let candidate = match is_non_empty(unit.path()) {
                Ok(true) => Candidate::Unit(unit),
                Ok(false) => Candidate::Empty(unit),
                Err(e) => {
                    // Let the archive stage surface the real failure for this unit.
                    tracing::warn!("Cannot list {:?}: {e}", unit.path());
                    Candidate::Unit(unit)
                }
            };
            candidates.push(candidate);
        }
        Ok(candidates)
    }

    /// The non-empty directories directly under `root`, sorted by name.
    pub fn scan<P: AsRef<Path>>(&self, root: P) -> Result<Vec<BackupUnit>> {
        Ok(self
            .discover(root)?
            .into_iter()
            .filter_map(|c| match c {
                Candidate::Unit(u) => Some(u),
                Candidate::Empty(_) => None,
            })
            .collect())
    }
}

fn is_non_empty(dir: &Path) -> std::io::Result<bool> {
    Ok(std::fs::read_dir(dir)?.next().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_backup_root() -> TempDir {
        let root = TempDir::new().unwrap();
        let p = root.path();
        std::fs::create_dir_all(p.join("alpha")).unwrap();
        std::fs::write(p.join("alpha/a.txt"), "a").unwrap();
        std::fs::write(p.join("alpha/b.txt"), "b").unwrap();
        std::fs::create_dir_all(p.join("beta")).unwrap();
        std::fs::create_dir_all(p.join("gamma/sub")).unwrap();
        std::fs::write(p.join("2024-01-01_alpha.tar.gz"), "not a unit").unwrap();
        root
    }

    #[test]
    fn test_scan_returns_non_empty_directories_only() {
        let root = create_backup_root();
        let units = DirectoryScanner.scan(root.path()).unwrap();

        let names: Vec<_> = units.iter().map(|u| u.name().as_str()).collect();
        assert_eq!(names, vec!["alpha", "gamma"]);
        assert_eq!(units[0].path(), &root.path().join("alpha"));
    }

    #[test]
    fn test_discover_reports_empty_directories() {
        let root = create_backup_root();
        let candidates = DirectoryScanner.discover(root.path()).unwrap();

        assert_eq!(candidates.len(), 3);
        assert_eq!(
            candidates[1],
            Candidate::Empty(BackupUnit::new(root.path().join("beta")))
        );
    }

    #[test]
    fn test_scan_missing_root() {
        let root = TempDir::new().unwrap();
        let missing = root.path().join("missing");

        match DirectoryScanner.scan(&missing) {
            Err(Error::NotFound(p)) => assert_eq!(p, missing),
            other => panic!("Expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_scan_root_is_file() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("file");
        std::fs::write(&file, "x").unwrap();

        assert!(matches!(
            DirectoryScanner.scan(&file),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_scan_empty_root() {
        let root = TempDir::new().unwrap();
        assert!(DirectoryScanner.scan(root.path()).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_ignores_symlinked_directories() {
        let root = create_backup_root();
        std::os::unix::fs::symlink(root.path().join("alpha"), root.path().join("link")).unwrap();

        let names: Vec<_> = DirectoryScanner
            .scan(root.path())
            .unwrap()
            .into_iter()
            .map(|u| u.name().clone())
            .collect();
        assert_eq!(names, vec!["alpha", "gamma"]);
    }

    #[test]
    fn test_backup_unit_name() {
        let unit = BackupUnit::new("/backup/photos");
        assert_eq!(unit.name(), "photos");
    }
}
