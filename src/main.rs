use clap::Parser;
use cloud_backup::backup::backup_config::BackupConfig;
use cloud_backup::backup::logging::{init_console_logging, init_logging};
use cloud_backup::backup::pipeline::{PipelineOrchestrator, RunResult};
use cloud_backup::backup::result_error::error::Error;
use cloud_backup::backup::result_error::result::Result;
use cloud_backup::backup::result_error::WithMsg;
use cloud_backup::backup::schedule::{install_interrupt_handler, run_on_schedule};
use std::path::PathBuf;
use std::process::exit;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, error};

/// Archive, encrypt and upload every directory under the backup root
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Read settings from this dotenv file instead of `./.env`
    #[arg(short, long)]
    env_file: Option<PathBuf>,
    /// Run once and exit, even if BACKUP_CRON is set
    #[arg(long)]
    once: bool,
}

fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            init_console_logging();
            error!("{e}");
            exit(1);
        }
    };
    if let Err(e) = init_logging(config.log_file_location(), config.log_level()) {
        init_console_logging();
        error!("{e}");
        exit(1);
    }
    debug!("Configuration: {:?}", config);

    let interrupted = match install_interrupt_handler() {
        Ok(flag) => flag,
        Err(e) => {
            error!("{e}");
            exit(1);
        }
    };

    let code = match (config.backup_cron(), args.once) {
        (Some(cron), false) => {
            match run_on_schedule(cron, &interrupted, || run_once(&config, interrupted.clone())) {
                Ok(()) => 0,
                Err(e) => {
                    error!("{e}");
                    1
                }
            }
        }
        _ => match run_once(&config, interrupted) {
            Ok(result) => result.exit_code(),
            Err(e) => {
                error!("{e}");
                1
            }
        },
    };
    exit(code);
}

fn load_config(args: &Args) -> Result<BackupConfig> {
    match &args.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .map_err(|e| Error::from(std::io::Error::other(e)))
                .with_msg(format!("Loading env file failed: {:?}", path))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    BackupConfig::from_env()
}

fn run_once(config: &BackupConfig, interrupted: Arc<AtomicBool>) -> Result<RunResult> {
    let run_date = chrono::Local::now().date_naive();
    PipelineOrchestrator::from_config(config, run_date, interrupted)?.run()
}
