//! # cloud-backup
//!
//! Backs up every non-empty directory under a backup root as a dated,
//! encrypted tarball, optionally uploading it to Dropbox.
//!
//! ## Features
//!
//! - **Per-directory units**: one `{date}_{name}.tar.gz` per top-level directory
//! - **Encryption**: age X25519 recipients, pinned on first use
//! - **Upload**: Dropbox, with OAuth2 refresh-token authentication and retries
//! - **Atomic output**: files only appear under their final name once complete
//! - **Scheduling**: one-shot or cron-driven runs, stoppable with Ctrl+C
//!
//! ## Quick Start
//!
//! ```no_run
//! use cloud_backup::backup::backup_config::BackupConfig;
//! use cloud_backup::backup::pipeline::PipelineOrchestrator;
//!
//! // BACKUP_DIRECTORY, GPG_RECIPIENT, ... from the environment
//! let config = BackupConfig::from_env()?;
//!
//! let today = chrono::Local::now().date_naive();
//! let result = PipelineOrchestrator::from_config(&config, today, Default::default())?.run()?;
//! std::process::exit(result.exit_code());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
