//! Best-effort post-run probes.
//!
//! Each probe runs in its own failure boundary after the critical-path
//! artifacts (exit-status, duration, logs) are already durable. A
//! failed probe leaves its artifact absent; nothing else observes it.

use std::path::Path;

use tokio::process::Command;
use tracing::debug;

use crate::config::Config;

pub const SCREENSHOT: &str = "screenshot.png";
pub const THUMBNAIL: &str = "thumbnail.jpg";

pub async fn run_post_probes(run_dir: &Path, config: &Config, exit_status: i32) {
    if let Err(e) = capture_sensors(run_dir, config).await {
        debug!(error = %e, "sensors probe skipped");
    }
    if let Err(e) = ensure_screenshot(run_dir, config).await {
        debug!(error = %e, "screenshot probe skipped");
    }
    if let Err(e) = render_thumbnail(run_dir, config).await {
        debug!(error = %e, "thumbnail probe skipped");
    }
    if exit_status == 0 {
        // Screenshots are retained only for failed runs.
        if let Err(e) = tokio::fs::remove_file(run_dir.join(SCREENSHOT)).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(error = %e, "could not drop screenshot of passing run");
            }
        }
    }
}

/// Dumps hardware sensor readings into `sensors.log`.
async fn capture_sensors(run_dir: &Path, config: &Config) -> anyhow::Result<()> {
    let output = Command::new(&config.collaborators.sensors).output().await?;
    anyhow::ensure!(
        output.status.success(),
        "sensors exited with {:?}",
        output.status.code()
    );
    tokio::fs::write(run_dir.join("sensors.log"), &output.stdout).await?;
    Ok(())
}

/// Invokes the screenshot collaborator when the test left none behind.
async fn ensure_screenshot(run_dir: &Path, config: &Config) -> anyhow::Result<()> {
    if run_dir.join(SCREENSHOT).exists() {
        return Ok(());
    }
    let Some(capture) = &config.collaborators.screenshot else {
        return Ok(());
    };
    let status = Command::new(capture).current_dir(run_dir).status().await?;
    anyhow::ensure!(
        status.success(),
        "screenshot capture exited with {:?}",
        status.code()
    );
    Ok(())
}

/// Downscales the screenshot into `thumbnail.jpg`.
async fn render_thumbnail(run_dir: &Path, config: &Config) -> anyhow::Result<()> {
    if !run_dir.join(SCREENSHOT).exists() {
        return Ok(());
    }
    let status = Command::new(&config.collaborators.thumbnailer)
        .args([SCREENSHOT, "-resize", "320x180", THUMBNAIL])
        .current_dir(run_dir)
        .status()
        .await?;
    anyhow::ensure!(
        status.success(),
        "thumbnailer exited with {:?}",
        status.code()
    );
    Ok(())
}
