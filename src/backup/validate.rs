//! Validation functions for configuration values.
//!
//! Provides custom validation functions for directories, cron expressions,
//! and the required-settings table checked before a run.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use chrono::Utc;
use validator::ValidationError;

use std::path::Path;

/// One configuration key with its current value and whether a run needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequiredSetting<'a> {
    pub name: &'static str,
    pub value: Option<&'a str>,
    pub required: bool,
}

impl<'a> RequiredSetting<'a> {
    pub fn new(name: &'static str, value: Option<&'a str>, required: bool) -> Self {
        Self {
            name,
            value,
            required,
        }
    }
}

/// Reports every required setting that is missing or blank in one error.
pub fn validate_required_settings<'a, I>(settings: I) -> Result<()>
where
    I: IntoIterator<Item = RequiredSetting<'a>>,
{
    let errors = settings
        .into_iter()
        .filter(|s| s.required)
        .filter(|s| s.value.map(|v| v.trim().is_empty()).unwrap_or(true))
        .map(|s| Error::config(s.name, "required but not set"))
        .collect();
    convert_error_vec(errors)
}

pub fn validate_dir_exist<P: AsRef<Path>>(dir: P) -> std::result::Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} not found", dir).into()));
    }

    Ok(())
}

pub fn validate_dir_exist_or_created<P: AsRef<Path>>(
    dir: P,
) -> std::result::Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        return std::fs::create_dir_all(dir).map_err(|e| {
            ValidationError::new("InvalidDirectory").with_message(
                format!("cannot create or access output path {:?}: {}", dir, e).into(),
            )
        });
    }

    Ok(())
}

pub fn validate_writable_dir<P: AsRef<Path>>(dir: P) -> std::result::Result<(), ValidationError> {
    let dir = dir.as_ref();
    validate_dir_exist_or_created(dir)?;
    tempfile::tempfile_in(dir).map(|_| ()).map_err(|e| {
        ValidationError::new("InvalidDirectory")
            .with_message(format!("cannot write to dir {:?}: {}", dir, e).into())
    })
}

pub fn validate_cron_str<S: AsRef<str>>(cron: S) -> std::result::Result<(), ValidationError> {
    let cron = cron.as_ref();
    if cron_parser::parse(cron, &Utc::now()).is_err() {
        return Err(ValidationError::new("InvalidCron")
            .with_message(format!("Invalid cron string: {cron:?}").into()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_required_settings_all_present() {
        let settings = [
            RequiredSetting::new("BACKUP_DIRECTORY", Some("/backup"), true),
            RequiredSetting::new("DROPBOX_CLIENT_ID", None, false),
        ];
        assert!(validate_required_settings(settings).is_ok());
    }

    #[test]
    fn test_required_settings_reports_every_missing_value() {
        let settings = [
            RequiredSetting::new("BACKUP_DIRECTORY", Some("  "), true),
            RequiredSetting::new("GPG_RECIPIENT", None, true),
            RequiredSetting::new("DROPBOX_CLIENT_ID", None, false),
        ];
        let err = validate_required_settings(settings).unwrap_err();

        let names: Vec<_> = err
            .into_iter()
            .map(|e| match e {
                Error::Config { name, .. } => name,
                other => panic!("Expected Config error, got {other}"),
            })
            .collect();
        assert_eq!(names, vec!["BACKUP_DIRECTORY", "GPG_RECIPIENT"]);
    }

    #[test]
    fn test_validate_dir_exist() {
        let temp_dir = TempDir::new().unwrap();
        assert!(validate_dir_exist(temp_dir.path()).is_ok());
        assert!(validate_dir_exist(temp_dir.path().join("missing")).is_err());

        let file = temp_dir.path().join("file");
        std::fs::write(&file, "x").unwrap();
        assert!(validate_dir_exist(&file).is_err());
    }

    #[test]
    fn test_validate_dir_exist_or_created() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a/b");
        assert!(validate_dir_exist_or_created(&nested).is_ok());
        assert!(nested.is_dir());
    }

    #[test]
    fn test_validate_writable_dir() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("out");
        assert!(validate_writable_dir(&out).is_ok());
        assert!(out.is_dir());
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);

        let file = temp_dir.path().join("file");
        std::fs::write(&file, "x").unwrap();
        assert!(validate_writable_dir(&file).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_validate_writable_dir_matches_actual_access() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let locked = temp_dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();

        let can_write = std::fs::write(locked.join("check"), "x").is_ok();
        let _ = std::fs::remove_file(locked.join("check"));
        assert_eq!(validate_writable_dir(&locked).is_ok(), can_write);

        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_validate_cron_str() {
        assert!(validate_cron_str("0 3 * * *").is_ok());
        assert!(validate_cron_str("not a cron").is_err());
    }
}
