pub mod walk;

use crate::backup::archive::walk::unit_entries;
use crate::backup::compress::gzip::GzipConfig;
use crate::backup::compress::CompressorBuilder;
use crate::backup::file_ext::FileExtProvider;
use crate::backup::finish::Finish;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::scan::BackupUnit;
use bon::Builder;
use chrono::NaiveDate;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, IntoInnerError};
use std::path::{Path, PathBuf};

/// Date component of every file name written by one run
pub static DATE_FORMAT: &str = "%Y-%m-%d";

/// What to do when today's output for a unit already exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Replace the existing file atomically
    #[default]
    Overwrite,
    /// Leave the existing file alone and fail the unit
    Fail,
}

impl CollisionPolicy {
    /// Moves a finished temporary file to `dst` according to the policy.
    pub fn persist(&self, tmp: tempfile::NamedTempFile, dst: &Path) -> Result<()> {
        match self {
            CollisionPolicy::Overwrite => tmp.persist(dst).map(|_| ())?,
            CollisionPolicy::Fail => tmp.persist_noclobber(dst).map(|_| ())?,
        }
        Ok(())
    }

    /// Fails with [`Error::AlreadyExists`] under [`CollisionPolicy::Fail`] if `path` exists.
    pub fn check(&self, path: &Path) -> Result<()> {
        match self {
            CollisionPolicy::Fail if path.exists() => Err(Error::AlreadyExists(path.to_path_buf())),
            _ => Ok(()),
        }
    }
}

/// A single file or directory to be included in a unit's archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Source path on the filesystem
    pub src: PathBuf,
    /// Path inside the archive, always starting with the unit name
    pub dst: PathBuf,
}

impl ArchiveEntry {
    pub fn new<A: Into<PathBuf>, B: Into<PathBuf>>(src: A, dst: B) -> ArchiveEntry {
        Self {
            src: src.into(),
            dst: dst.into(),
        }
    }
}

/// The compressed bundle produced from one unit
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct ArchiveArtifact {
    path: PathBuf,
    unit: BackupUnit,
    date: NaiveDate,
}

/// Writes one `{date}_{unit}.tar.gz` per unit.
///
/// The archive is streamed through tar and gzip into a temporary file in the
/// output directory, synced, and only then renamed to its final name, so a
/// file with the final name is always a complete archive.
#[derive(Debug, Clone, Builder, Getters)]
#[getset(get = "pub")]
pub struct ArchiveBuilder {
    run_date: NaiveDate,
    #[builder(default)]
    compressor: GzipConfig,
    #[builder(default)]
    collision_policy: CollisionPolicy,
}

impl ArchiveBuilder {
    pub fn file_name(&self, unit: &BackupUnit) -> String {
        let tar_name = format!("{}_{}.tar", self.run_date.format(DATE_FORMAT), unit.name());
        self.compressor.append_ext(tar_name)
    }

    pub fn build<P: AsRef<Path>>(&self, unit: &BackupUnit, out_dir: P) -> Result<ArchiveArtifact> {
        self.write_archive(unit, out_dir.as_ref())
            .map_err(|e| Error::archive(unit.name(), e))
    }

    fn write_archive(&self, unit: &BackupUnit, out_dir: &Path) -> Result<ArchiveArtifact> {
        let file_name = self.file_name(unit);
        let path = out_dir.join(&file_name);
        self.collision_policy.check(&path)?;

        let tmp = tempfile::Builder::new()
            .prefix(&format!(".{file_name}."))
            .suffix(".tmp")
            .tempfile_in(out_dir)?;

        let compressor = self.compressor.build_compressor(BufWriter::new(tmp.as_file()))?;
        let mut writer = tar::Builder::new(compressor);
        writer.follow_symlinks(false);

        let mut entry_count = 0usize;
        for entry in unit_entries(unit)? {
            let entry = entry?;
            writer.append_path_with_name(&entry.src, &entry.dst)?;
            entry_count += 1;
        }

        Finish::finish(writer.into_inner()?)?
            .into_inner()
            .map_err(IntoInnerError::into_error)?;
        tmp.as_file().sync_all()?;

        self.collision_policy.persist(tmp, &path)?;
        tracing::info!(
            "Archived unit {:?} ({} entries) to {:?}",
            unit.name(),
            entry_count,
            path
        );

        Ok(ArchiveArtifact {
            path,
            unit: unit.clone(),
            date: self.run_date,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::fs::File;
    use tempfile::TempDir;

    fn run_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
    }

    fn create_unit(root: &Path) -> BackupUnit {
        let dir = root.join("alpha");
        std::fs::create_dir_all(dir.join("nested/deeper")).unwrap();
        std::fs::write(dir.join("a.txt"), "first file").unwrap();
        std::fs::write(dir.join("nested/b.bin"), [0u8, 1, 2, 255]).unwrap();
        std::fs::write(dir.join("nested/deeper/c.txt"), "x".repeat(10_000)).unwrap();
        BackupUnit::new(dir)
    }

    fn extract(archive: &Path, into: &Path) -> Vec<PathBuf> {
        let mut archive = tar::Archive::new(GzDecoder::new(File::open(archive).unwrap()));
        let mut names = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            names.push(entry.path().unwrap().into_owned());
            entry.unpack_in(into).unwrap();
        }
        names
    }

    #[test]
    fn test_file_name() {
        let builder = ArchiveBuilder::builder().run_date(run_date()).build();
        assert_eq!(
            builder.file_name(&BackupUnit::new("/backup/alpha")),
            "2024-03-09_alpha.tar.gz"
        );
    }

    #[test]
    fn test_build_extracts_to_single_top_level_directory() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let unit = create_unit(src.path());

        let artifact = ArchiveBuilder::builder()
            .run_date(run_date())
            .build()
            .build(&unit, out.path())
            .unwrap();
        assert_eq!(artifact.path(), &out.path().join("2024-03-09_alpha.tar.gz"));
        assert_eq!(artifact.unit(), &unit);
        assert_eq!(artifact.date(), &run_date());

        let extracted = TempDir::new().unwrap();
        let names = extract(artifact.path(), extracted.path());
        assert!(names.iter().all(|n| n.starts_with("alpha")));

        let root = extracted.path().join("alpha");
        assert_eq!(std::fs::read(root.join("a.txt")).unwrap(), b"first file");
        assert_eq!(
            std::fs::read(root.join("nested/b.bin")).unwrap(),
            vec![0u8, 1, 2, 255]
        );
        assert_eq!(
            std::fs::read_to_string(root.join("nested/deeper/c.txt")).unwrap(),
            "x".repeat(10_000)
        );
    }

    #[test]
    fn test_build_leaves_no_temporary_files() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let unit = create_unit(src.path());

        ArchiveBuilder::builder()
            .run_date(run_date())
            .build()
            .build(&unit, out.path())
            .unwrap();

        let names: Vec<_> = std::fs::read_dir(out.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["2024-03-09_alpha.tar.gz"]);
    }

    #[test]
    fn test_same_day_collision_overwrites() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let unit = create_unit(src.path());
        let builder = ArchiveBuilder::builder().run_date(run_date()).build();

        let first = builder.build(&unit, out.path()).unwrap();
        std::fs::write(unit.path().join("added.txt"), "later").unwrap();
        let second = builder.build(&unit, out.path()).unwrap();
        assert_eq!(first.path(), second.path());

        let extracted = TempDir::new().unwrap();
        extract(second.path(), extracted.path());
        assert!(extracted.path().join("alpha/added.txt").is_file());
    }

    #[test]
    fn test_same_day_collision_fails_with_fail_policy() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let unit = create_unit(src.path());
        let builder = ArchiveBuilder::builder()
            .run_date(run_date())
            .collision_policy(CollisionPolicy::Fail)
            .build();

        let first = builder.build(&unit, out.path()).unwrap();
        let before = std::fs::read(first.path()).unwrap();

        match builder.build(&unit, out.path()) {
            Err(Error::Archive { unit, error }) => {
                assert_eq!(unit, "alpha");
                assert!(matches!(*error, Error::AlreadyExists(_)));
            }
            other => panic!("Expected Archive error, got {other:?}"),
        }
        assert_eq!(std::fs::read(first.path()).unwrap(), before);
    }

    #[test]
    fn test_build_missing_unit_is_archive_error() {
        let out = TempDir::new().unwrap();
        let unit = BackupUnit::new(out.path().join("vanished"));

        let err = ArchiveBuilder::builder()
            .run_date(run_date())
            .build()
            .build(&unit, out.path())
            .unwrap_err();
        assert!(matches!(err, Error::Archive { ref unit, .. } if unit == "vanished"));
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_build_unwritable_output_is_archive_error() {
        let src = TempDir::new().unwrap();
        let unit = create_unit(src.path());

        let err = ArchiveBuilder::builder()
            .run_date(run_date())
            .build()
            .build(&unit, src.path().join("no/such/dir"))
            .unwrap_err();
        assert!(matches!(err, Error::Archive { .. }));
    }

    #[test]
    fn test_collision_policy_deserialize() {
        let policy: CollisionPolicy = serde_json::from_str("\"fail\"").unwrap();
        assert_eq!(policy, CollisionPolicy::Fail);
        assert_eq!(CollisionPolicy::default(), CollisionPolicy::Overwrite);
    }
}
