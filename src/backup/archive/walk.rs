use crate::backup::archive::ArchiveEntry;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use crate::backup::scan::BackupUnit;

use dyn_iter::{DynIter, IntoDynIterator};
use function_name::named;
use walkdir::{DirEntry, WalkDir};

use std::path::{Path, PathBuf};

/// Walks the whole subtree of `unit`, mapping every entry below the unit
/// directory to a path rooted at the unit's own name, so the archive unpacks
/// into a single directory called `unit.name()`.
///
/// Symlinks are recorded as links, never followed. Entries come out in file
/// name order, parents before children.
#[named]
pub fn unit_entries<'a>(unit: &BackupUnit) -> Result<DynIter<'a, Result<ArchiveEntry>>> {
    if !unit.path().is_dir() {
        tracing::error!(
            "Unit directory does not exist or is not a directory: {:?}",
            unit.path()
        );
        return Err(Error::NotFound(unit.path().clone()));
    }

    tracing::debug!("Walking unit {:?} at {:?}", unit.name(), unit.path());
    let src_dir = unit.path().clone();
    let dst_dir = PathBuf::from(unit.name());
    let debug_unit = unit.clone();

    let entries = WalkDir::new(unit.path())
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .map(move |res| match res {
            Ok(de) => process_dir_entry(de, &src_dir, &dst_dir),
            Err(e) => Err(e.into()),
        })
        .map(move |res| res.with_debug_object_and_fn_name(debug_unit.clone(), function_path!()));

    Ok(entries.into_dyn_iter())
}

fn process_dir_entry<P1: AsRef<Path>, P2: AsRef<Path>>(
    de: DirEntry,
    base_src_dir: P1,
    base_dst_dir: P2,
) -> Result<ArchiveEntry> {
    let p = de.into_path();
    let stripped_path = p
        .strip_prefix(base_src_dir.as_ref())
        .map_err(|e| Error::from(std::io::Error::other(e)))
        .with_msg(format!(
            "Stripping {:?} from {:?} failed",
            base_src_dir.as_ref(),
            p
        ))?;
    let dst = base_dst_dir.as_ref().join(stripped_path);
    tracing::trace!("Including entry: {:?} -> {:?}", p, dst);
    Ok(ArchiveEntry::new(p, dst))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_files(dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(dir.join("subdir"))?;
        std::fs::write(dir.join("file1.txt"), "content1")?;
        std::fs::write(dir.join("subdir/file2.log"), "content2")?;
        Ok(())
    }

    #[test]
    fn test_unit_entries_are_rooted_at_unit_name() {
        let temp_dir = TempDir::new().unwrap();
        let unit_dir = temp_dir.path().join("alpha");
        create_test_files(&unit_dir).unwrap();

        let entries: Vec<_> = unit_entries(&BackupUnit::new(&unit_dir))
            .unwrap()
            .map(|e| e.unwrap())
            .collect();

        let dsts: Vec<_> = entries.iter().map(|e| e.dst.clone()).collect();
        assert_eq!(
            dsts,
            vec![
                PathBuf::from("alpha"),
                PathBuf::from("alpha/file1.txt"),
                PathBuf::from("alpha/subdir"),
                PathBuf::from("alpha/subdir/file2.log"),
            ]
        );
        assert_eq!(entries[1].src, unit_dir.join("file1.txt"));
    }

    #[test]
    fn test_unit_entries_with_nonexistent_directory() {
        let result = unit_entries(&BackupUnit::new("/nonexistent/directory"));
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_unit_entries_with_file_as_unit() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("not_a_directory.txt");
        std::fs::write(&file_path, "content").unwrap();

        assert!(unit_entries(&BackupUnit::new(file_path)).is_err());
    }
}
