use crate::backup::archive::CollisionPolicy;
use crate::backup::compress::gzip::DEFAULT_COMPRESSION_LEVEL;
use crate::backup::credential::DEFAULT_TOKEN_URL;
use crate::backup::logging::validate_log_level;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::upload::dropbox::DEFAULT_CONTENT_URL;
use crate::backup::validate::{validate_cron_str, validate_required_settings, RequiredSetting};
use bon::Builder;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::Validate;

fn default_log_file_location() -> PathBuf {
    PathBuf::from("./backup-to-cloud.log")
}

fn default_log_level() -> String {
    "info".into()
}

fn default_recipients_file() -> PathBuf {
    PathBuf::from("recipients.yml")
}

fn default_trust_store() -> PathBuf {
    PathBuf::from("trusted_recipients.yml")
}

fn default_compression_level() -> u32 {
    DEFAULT_COMPRESSION_LEVEL
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    1
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.into()
}

fn default_content_url() -> String {
    DEFAULT_CONTENT_URL.into()
}

fn default_upload_retries() -> u32 {
    3
}

fn default_retry_backoff() -> Duration {
    Duration::from_secs(1)
}

/// Every setting of a backup run, read once from the environment.
///
/// Each field maps to the upper-case environment variable of the same name,
/// e.g. `backup_directory` is `BACKUP_DIRECTORY`. Secrets are kept in
/// [`RedactedString`] so the whole struct can be logged.
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate, Builder, Getters, CopyGetters)]
pub struct BackupConfig {
    #[serde(default = "default_log_file_location")]
    #[builder(default = default_log_file_location(), into)]
    #[getset(get = "pub")]
    log_file_location: PathBuf,
    #[serde(default = "default_log_level")]
    #[validate(custom(function = validate_log_level))]
    #[builder(default = default_log_level(), into)]
    #[getset(get = "pub")]
    log_level: String,
    #[builder(into)]
    #[getset(get = "pub")]
    backup_directory: Option<PathBuf>,
    #[builder(into)]
    #[getset(get = "pub")]
    output_directory: Option<PathBuf>,
    #[builder(into)]
    #[getset(get = "pub")]
    gpg_recipient: Option<String>,
    #[serde(default = "default_recipients_file")]
    #[builder(default = default_recipients_file(), into)]
    #[getset(get = "pub")]
    recipients_file: PathBuf,
    #[serde(default = "default_trust_store")]
    #[builder(default = default_trust_store(), into)]
    #[getset(get = "pub")]
    trust_store: PathBuf,
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    always_trust: bool,
    #[serde(default = "default_compression_level")]
    #[validate(range(min = 0, max = 9))]
    #[builder(default = default_compression_level())]
    #[getset(get_copy = "pub")]
    compression_level: u32,
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    collision_policy: CollisionPolicy,
    #[serde(default = "default_true")]
    #[builder(default = true)]
    #[getset(get_copy = "pub")]
    keep_archive: bool,
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    delete_after_upload: bool,
    #[serde(default = "default_workers")]
    #[validate(range(min = 1, max = 64))]
    #[builder(default = default_workers())]
    #[getset(get_copy = "pub")]
    workers: usize,
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    dropbox_upload: bool,
    #[builder(into)]
    #[getset(get = "pub")]
    dropbox_remote_location: Option<String>,
    #[builder(into)]
    #[getset(get = "pub")]
    dropbox_client_id: Option<String>,
    #[builder(into)]
    #[getset(get = "pub")]
    dropbox_client_secret: Option<RedactedString>,
    #[builder(into)]
    #[getset(get = "pub")]
    dropbox_refresh_token: Option<RedactedString>,
    #[builder(into)]
    #[getset(get = "pub")]
    dropbox_redirect_uri: Option<String>,
    #[serde(default = "default_token_url")]
    #[builder(default = default_token_url(), into)]
    #[getset(get = "pub")]
    dropbox_token_url: String,
    #[serde(default = "default_content_url")]
    #[builder(default = default_content_url(), into)]
    #[getset(get = "pub")]
    dropbox_content_url: String,
    #[serde(default = "default_upload_retries")]
    #[validate(range(min = 1, max = 10))]
    #[builder(default = default_upload_retries())]
    #[getset(get_copy = "pub")]
    upload_retries: u32,
    #[serde(default = "default_retry_backoff", with = "humantime_serde")]
    #[builder(default = default_retry_backoff())]
    #[getset(get_copy = "pub")]
    retry_backoff: Duration,
    #[validate(custom(function = validate_cron_str))]
    #[builder(into)]
    #[getset(get = "pub")]
    backup_cron: Option<String>,
}

impl BackupConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        envy::from_env::<Self>()
            .map_err(Error::from)
            .with_msg("Reading configuration from environment failed")
    }

    /// Reads the configuration from explicit key/value pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter::<_, Self>(vars)
            .map_err(Error::from)
            .with_msg("Reading configuration failed")
    }

    /// The settings a run cannot do without; Dropbox settings are only
    /// required when uploading is enabled.
    pub fn required_settings(&self) -> Vec<RequiredSetting<'_>> {
        let upload = self.dropbox_upload;
        vec![
            RequiredSetting::new(
                "BACKUP_DIRECTORY",
                self.backup_directory.as_deref().and_then(Path::to_str),
                true,
            ),
            RequiredSetting::new("GPG_RECIPIENT", self.gpg_recipient.as_deref(), true),
            RequiredSetting::new(
                "DROPBOX_REMOTE_LOCATION",
                self.dropbox_remote_location.as_deref(),
                upload,
            ),
            RequiredSetting::new(
                "DROPBOX_CLIENT_ID",
                self.dropbox_client_id.as_deref(),
                upload,
            ),
            RequiredSetting::new(
                "DROPBOX_CLIENT_SECRET",
                self.dropbox_client_secret
                    .as_ref()
                    .map(|s| s.inner().as_str()),
                upload,
            ),
            RequiredSetting::new(
                "DROPBOX_REFRESH_TOKEN",
                self.dropbox_refresh_token
                    .as_ref()
                    .map(|s| s.inner().as_str()),
                upload,
            ),
        ]
    }

    /// Checks required settings and value ranges. Any failure is fatal to the run.
    pub fn check(&self) -> Result<()> {
        validate_required_settings(self.required_settings())?;
        self.validate()?;
        Ok(())
    }

    /// Where archives are written: `OUTPUT_DIRECTORY`, or the backup root itself.
    pub fn effective_output_directory(&self) -> Option<&Path> {
        self.output_directory
            .as_deref()
            .or(self.backup_directory.as_deref())
    }
}
