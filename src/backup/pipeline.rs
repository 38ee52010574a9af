//! One backup run over every unit under the backup root.
//!
//! Units go through archive, encrypt and upload independently of each other on
//! a bounded worker pool; a failing unit is recorded and the run moves on.

use crate::backup::archive::{ArchiveBuilder, CollisionPolicy};
use crate::backup::backup_config::BackupConfig;
use crate::backup::compress::gzip::GzipConfig;
use crate::backup::credential::{CredentialBroker, OAuthRefreshBroker};
use crate::backup::encrypt::keyring::RecipientKeyRing;
use crate::backup::encrypt::trust::TrustStore;
use crate::backup::encrypt::Encryptor;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::retry::RetryPolicy;
use crate::backup::scan::{BackupUnit, Candidate, DirectoryScanner};
use crate::backup::upload::dropbox::DropboxUploader;
use crate::backup::upload::{remote_path, Uploader};
use crate::backup::validate::{validate_dir_exist, validate_writable_dir};
use bon::Builder;
use chrono::NaiveDate;
use getset::Getters;
use rayon::prelude::*;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for one HTTP exchange, large uploads included
static HTTP_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Furthest stage a unit reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Discovered,
    Archived,
    Encrypted,
    Uploaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The directory has no entries
    Empty,
    /// The run was asked to stop before the unit started
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Succeeded(UnitState),
    ArchiveFailed(String),
    EncryptFailed(String),
    UploadFailed(String),
    Skipped(SkipReason),
}

impl UnitOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            UnitOutcome::ArchiveFailed(_)
                | UnitOutcome::EncryptFailed(_)
                | UnitOutcome::UploadFailed(_)
        )
    }
}

impl Display for UnitOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitOutcome::Succeeded(state) => write!(f, "succeeded ({state:?})"),
            UnitOutcome::ArchiveFailed(e) => write!(f, "archive failed: {e}"),
            UnitOutcome::EncryptFailed(e) => write!(f, "encrypt failed: {e}"),
            UnitOutcome::UploadFailed(e) => write!(f, "upload failed: {e}"),
            UnitOutcome::Skipped(SkipReason::Empty) => write!(f, "skipped, empty directory"),
            UnitOutcome::Skipped(SkipReason::Interrupted) => write!(f, "skipped, run interrupted"),
        }
    }
}

/// What happened to one unit, with the files it left behind.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct UnitReport {
    unit: BackupUnit,
    outcome: UnitOutcome,
    archive: Option<PathBuf>,
    encrypted: Option<PathBuf>,
}

impl UnitReport {
    fn new(unit: &BackupUnit, outcome: UnitOutcome) -> Self {
        Self {
            unit: unit.clone(),
            outcome,
            archive: None,
            encrypted: None,
        }
    }
}

/// Per-unit results of a run, in unit name order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct RunResult {
    reports: Vec<UnitReport>,
}

impl RunResult {
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Succeeded(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(UnitOutcome::is_failure)
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Skipped(_)))
    }

    pub fn interrupted(&self) -> bool {
        self.count(|o| *o == UnitOutcome::Skipped(SkipReason::Interrupted)) > 0
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && !self.interrupted()
    }

    /// Process exit status for the run: 0 only if no unit failed and the run
    /// was not cut short.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn outcome_of(&self, unit_name: &str) -> Option<&UnitOutcome> {
        self.reports
            .iter()
            .find(|r| r.unit.name() == unit_name)
            .map(|r| &r.outcome)
    }

    fn count<F: Fn(&UnitOutcome) -> bool>(&self, f: F) -> usize {
        self.reports.iter().filter(|r| f(&r.outcome)).count()
    }

    fn log_summary(&self) {
        for report in &self.reports {
            if report.outcome.is_failure() {
                tracing::error!("Unit {:?} {}", report.unit.name(), report.outcome);
            } else {
                tracing::debug!("Unit {:?} {}", report.unit.name(), report.outcome);
            }
        }
        tracing::info!(
            "Backup run finished: {} succeeded, {} failed, {} skipped",
            self.succeeded(),
            self.failed(),
            self.skipped()
        );
    }
}

/// Upload collaborators, present only when uploading is enabled.
#[derive(Clone, Builder)]
pub struct UploadStage {
    broker: Arc<dyn CredentialBroker>,
    uploader: Arc<dyn Uploader>,
    #[builder(default, into)]
    remote_root: String,
    #[builder(default)]
    retry: RetryPolicy,
}

impl UploadStage {
    fn upload(&self, file: &Path) -> Result<String> {
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let remote = remote_path(&self.remote_root, file_name);
        self.retry.run("Upload", |_| {
            let credential = self.broker.access_token()?;
            self.uploader.upload(file, &remote, &credential)
        })?;
        Ok(remote)
    }
}

/// Drives one backup run.
#[derive(Builder)]
pub struct PipelineOrchestrator {
    #[builder(into)]
    backup_root: PathBuf,
    #[builder(into)]
    output_dir: PathBuf,
    #[builder(into)]
    recipient: String,
    archiver: ArchiveBuilder,
    encryptor: Encryptor,
    upload: Option<UploadStage>,
    #[builder(default = true)]
    keep_archive: bool,
    #[builder(default)]
    delete_after_upload: bool,
    #[builder(default = 1)]
    workers: usize,
    #[builder(default)]
    interrupt: Arc<AtomicBool>,
}

impl PipelineOrchestrator {
    /// Checks the configuration and wires up every stage for a run dated
    /// `run_date`. Any error here is fatal: nothing has been written yet.
    pub fn from_config(
        config: &BackupConfig,
        run_date: NaiveDate,
        interrupt: Arc<AtomicBool>,
    ) -> Result<Self> {
        config.check().with_msg("Invalid configuration")?;

        let backup_root = config
            .backup_directory()
            .clone()
            .ok_or_else(|| Error::config("BACKUP_DIRECTORY", "required but not set"))?;
        validate_dir_exist(&backup_root).map_err(|_| Error::NotFound(backup_root.clone()))?;

        let output_dir = config
            .effective_output_directory()
            .unwrap_or(backup_root.as_path())
            .to_path_buf();
        validate_writable_dir(&output_dir).map_err(|e| {
            Error::config("OUTPUT_DIRECTORY", format!("{:?}: {e}", output_dir))
        })?;

        let recipient = config
            .gpg_recipient()
            .clone()
            .ok_or_else(|| Error::config("GPG_RECIPIENT", "required but not set"))?;
        let encryptor = Encryptor::new(
            RecipientKeyRing::load(config.recipients_file())?,
            TrustStore::open(config.trust_store())?,
            config.always_trust(),
            config.collision_policy(),
        );
        let archiver = ArchiveBuilder::builder()
            .run_date(run_date)
            .compressor(GzipConfig::builder().level(config.compression_level()).build())
            .collision_policy(config.collision_policy())
            .build();

        let upload = if config.dropbox_upload() {
            Some(Self::dropbox_stage(config)?)
        } else {
            None
        };

        Ok(Self::builder()
            .backup_root(backup_root)
            .output_dir(output_dir)
            .recipient(recipient)
            .archiver(archiver)
            .encryptor(encryptor)
            .maybe_upload(upload)
            .keep_archive(config.keep_archive())
            .delete_after_upload(config.delete_after_upload())
            .workers(config.workers())
            .interrupt(interrupt)
            .build())
    }

    fn dropbox_stage(config: &BackupConfig) -> Result<UploadStage> {
        let missing = |name: &str| Error::config(name, "required when DROPBOX_UPLOAD is enabled");
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;
        let retry = RetryPolicy::builder()
            .attempts(config.upload_retries())
            .initial_backoff(config.retry_backoff())
            .build();

        let broker = OAuthRefreshBroker::builder()
            .client(client.clone())
            .token_url(config.dropbox_token_url())
            .client_id(
                config
                    .dropbox_client_id()
                    .clone()
                    .ok_or_else(|| missing("DROPBOX_CLIENT_ID"))?,
            )
            .client_secret(
                config
                    .dropbox_client_secret()
                    .clone()
                    .ok_or_else(|| missing("DROPBOX_CLIENT_SECRET"))?,
            )
            .refresh_token(
                config
                    .dropbox_refresh_token()
                    .clone()
                    .ok_or_else(|| missing("DROPBOX_REFRESH_TOKEN"))?,
            )
            .maybe_redirect_uri(config.dropbox_redirect_uri().clone())
            .retry(retry)
            .build();
        let uploader = DropboxUploader::builder()
            .client(client)
            .content_url(config.dropbox_content_url())
            .build();

        Ok(UploadStage::builder()
            .broker(Arc::new(broker))
            .uploader(Arc::new(uploader))
            .remote_root(
                config
                    .dropbox_remote_location()
                    .clone()
                    .ok_or_else(|| missing("DROPBOX_REMOTE_LOCATION"))?,
            )
            .retry(retry)
            .build())
    }

    /// Runs every unit under the backup root.
    ///
    /// Returns `Err` only if the root cannot be scanned or the worker pool
    /// cannot be started; per-unit failures end up in the [`RunResult`].
    pub fn run(&self) -> Result<RunResult> {
        tracing::info!(
            "Starting backup of {:?} into {:?} with {} worker(s)",
            self.backup_root,
            self.output_dir,
            self.workers
        );
        let candidates = DirectoryScanner.discover(&self.backup_root)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers.max(1))
            .thread_name(|i| format!("backup-worker-{i}"))
            .build()?;

        let reports = pool.install(|| {
            candidates
                .par_iter()
                .map(|candidate| self.process(candidate))
                .collect()
        });
        let result = RunResult { reports };
        result.log_summary();
        Ok(result)
    }

    fn process(&self, candidate: &Candidate) -> UnitReport {
        let unit = match candidate {
            Candidate::Empty(unit) => {
                tracing::info!("Skipping empty directory {:?}", unit.path());
                return UnitReport::new(unit, UnitOutcome::Skipped(SkipReason::Empty));
            }
            Candidate::Unit(unit) => unit,
        };
        if self.interrupt.load(Ordering::SeqCst) {
            tracing::warn!("Run interrupted, not starting unit {:?}", unit.name());
            return UnitReport::new(unit, UnitOutcome::Skipped(SkipReason::Interrupted));
        }

        let span = tracing::info_span!("unit", name = %unit.name());
        let _guard = span.enter();
        self.process_unit(unit)
    }

    fn process_unit(&self, unit: &BackupUnit) -> UnitReport {
        let mut report = UnitReport::new(unit, UnitOutcome::Succeeded(UnitState::Discovered));

        if let Err(e) = self.check_encrypted_collision(unit) {
            tracing::error!("{e}");
            report.outcome = UnitOutcome::ArchiveFailed(e.to_string());
            return report;
        }

        let archive = match self.archiver.build(unit, &self.output_dir) {
            Ok(archive) => archive,
            Err(e) => {
                tracing::error!("{e}");
                report.outcome = UnitOutcome::ArchiveFailed(e.to_string());
                return report;
            }
        };
        report.archive = Some(archive.path().clone());
        report.outcome = UnitOutcome::Succeeded(UnitState::Archived);

        let encrypted = match self.encryptor.encrypt(archive.path(), &self.recipient) {
            Ok(encrypted) => encrypted,
            Err(e) => {
                tracing::error!("{e}");
                report.outcome = UnitOutcome::EncryptFailed(e.to_string());
                return report;
            }
        };
        report.encrypted = Some(encrypted.path().clone());
        report.outcome = UnitOutcome::Succeeded(UnitState::Encrypted);

        if !self.keep_archive && remove_file(archive.path()) {
            report.archive = None;
        }

        let Some(upload) = &self.upload else {
            return report;
        };
        match upload.upload(encrypted.path()) {
            Ok(remote) => {
                tracing::info!("Uploaded {:?} to {:?}", encrypted.path(), remote);
                report.outcome = UnitOutcome::Succeeded(UnitState::Uploaded);
                if self.delete_after_upload && remove_file(encrypted.path()) {
                    report.encrypted = None;
                }
            }
            Err(e) => {
                tracing::error!("{e}");
                report.outcome = UnitOutcome::UploadFailed(e.to_string());
            }
        }
        report
    }

    /// Under [`CollisionPolicy::Fail`] an existing `.enc` for today fails the
    /// unit before an archive is written.
    fn check_encrypted_collision(&self, unit: &BackupUnit) -> Result<()> {
        if *self.archiver.collision_policy() != CollisionPolicy::Fail {
            return Ok(());
        }
        let archive = self.output_dir.join(self.archiver.file_name(unit));
        self.archiver
            .collision_policy()
            .check(&self.encryptor.output_path(archive))
            .map_err(|e| Error::archive(unit.name(), e))
    }
}

fn remove_file(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!("Removed {:?}", path);
            true
        }
        Err(e) => {
            tracing::warn!("Cannot remove {:?}: {e}", path);
            false
        }
    }
}
