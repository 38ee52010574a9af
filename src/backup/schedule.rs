//! Repeated runs on a cron schedule, and the interrupt flag shared with
//! running pipelines.

use crate::backup::pipeline::RunResult;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Longest uninterrupted sleep while waiting for the next tick
static POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Returns a flag that is raised on the first Ctrl+C. In-flight units finish,
/// units not yet started are skipped. A second Ctrl+C exits immediately.
pub fn install_interrupt_handler() -> Result<Arc<AtomicBool>> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    std::thread::Builder::new()
        .name("signal-handler".into())
        .spawn(move || {
            runtime.block_on(async move {
                loop {
                    if tokio::signal::ctrl_c().await.is_err() {
                        tracing::warn!("Cannot listen for Ctrl+C, interrupts are disabled");
                        return;
                    }
                    if flag.swap(true, Ordering::SeqCst) {
                        tracing::warn!("Second interrupt, exiting now");
                        std::process::exit(130);
                    }
                    tracing::warn!("Interrupt received, finishing units in progress");
                }
            })
        })?;
    Ok(interrupted)
}

pub fn next_tick(cron: &str, after: &DateTime<Utc>) -> Result<DateTime<Utc>> {
    cron_parser::parse(cron, after)
        .map_err(|e| Error::config("BACKUP_CRON", format!("{cron:?}: {e:?}")))
}

/// Sleeps until `deadline`. Returns `false` if interrupted first.
fn sleep_until(deadline: DateTime<Utc>, interrupted: &AtomicBool) -> bool {
    loop {
        if interrupted.load(Ordering::SeqCst) {
            return false;
        }
        let remaining = match (deadline - Utc::now()).to_std() {
            Ok(remaining) if !remaining.is_zero() => remaining,
            _ => return true,
        };
        std::thread::sleep(remaining.min(POLL_INTERVAL));
    }
}

/// Calls `run` on every tick of `cron` until interrupted.
///
/// A failed run is logged and the loop waits for the next tick.
pub fn run_on_schedule<F>(cron: &str, interrupted: &AtomicBool, mut run: F) -> Result<()>
where
    F: FnMut() -> Result<RunResult>,
{
    let mut next = next_tick(cron, &Utc::now())?;
    loop {
        tracing::info!("Next backup run at {next}");
        if !sleep_until(next, interrupted) {
            tracing::info!("Interrupted, stopping schedule");
            return Ok(());
        }

        match run() {
            Ok(result) if result.is_success() => tracing::info!("Scheduled run succeeded"),
            Ok(result) => tracing::warn!(
                "Scheduled run finished with {} failed unit(s)",
                result.failed()
            ),
            Err(e) => tracing::error!("Scheduled run failed: {e}"),
        }
        next = next_tick(cron, &Utc::now())?;
    }
}
