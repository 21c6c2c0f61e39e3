//! Post-run failure classification and corrective actions.
//!
//! Inspects the persisted logs and artifacts of a finished run — never
//! the live process — and distinguishes failures the loop can route
//! around from failures that invalidate every subsequent run (broken
//! capture hardware, failed recovery), which force the batch to stop.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;

use regex::Regex;
use tokio::process::Command;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::hooks::{Hook, HookRunner};
use crate::recorder::RunRecord;

/// Runs all classifiers and recovery actions for one finished run.
/// Returns true when the batch must stop.
pub async fn classify_and_recover(
    record: &RunRecord,
    config: &Config,
    hooks: &HookRunner,
) -> bool {
    let mut stop = false;

    if let Err(e) = copy_timeout_template(&record.run_dir).await {
        debug!(error = %e, "match-timeout template not copied");
    }
    if let Err(e) = extract_backtrace(&record.run_dir, config).await {
        debug!(error = %e, "backtrace extraction skipped");
    }

    if logs_mention_no_video(&record.run_dir).await && !hardware_ok(record, config).await {
        stop = true;
    }

    if record.exit_status != 0 && !hooks.run(Hook::Recover, &record.run_dir).await {
        error!("recover hook failed; stopping after this run");
        stop = true;
    }

    stop
}

fn match_timeout_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"MatchTimeout: Didn't find match for '([^']+)'").expect("valid regex")
    })
}

/// Copies the template image named by a match-timeout failure into the
/// run directory, so reports can show what the test was looking for.
async fn copy_timeout_template(run_dir: &Path) -> anyhow::Result<()> {
    let stderr_log = tokio::fs::read_to_string(run_dir.join("stderr.log"))
        .await
        .unwrap_or_default();
    let Some(caps) = match_timeout_re().captures(&stderr_log) else {
        return Ok(());
    };

    let template = PathBuf::from(&caps[1]);
    let Some(file_name) = template.file_name() else {
        return Ok(());
    };
    // Relative template paths were relative to the test's cwd (the run
    // directory itself).
    let source = if template.is_absolute() {
        template.clone()
    } else {
        run_dir.join(&template)
    };
    let dest = run_dir.join(file_name);
    if source != dest && source.exists() {
        tokio::fs::copy(&source, &dest).await?;
        debug!(template = %template.display(), "copied match-timeout template");
    }
    Ok(())
}

/// Extracts a backtrace from any core dump the test left behind.
async fn extract_backtrace(run_dir: &Path, config: &Config) -> anyhow::Result<()> {
    let Some(core) = find_core_file(run_dir)? else {
        return Ok(());
    };
    warn!(core = %core.display(), "core dump found; extracting backtrace");

    let output = Command::new(&config.collaborators.debugger)
        .args(["--batch", "-ex", "thread apply all bt", "-c"])
        .arg(&core)
        .current_dir(run_dir)
        .stdin(Stdio::null())
        .output()
        .await?;
    let mut log = output.stdout;
    log.extend_from_slice(&output.stderr);
    tokio::fs::write(run_dir.join("backtrace.log"), &log).await?;
    Ok(())
}

fn find_core_file(run_dir: &Path) -> std::io::Result<Option<PathBuf>> {
    for entry in std::fs::read_dir(run_dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with("core") {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}

/// Recognizes the "no video / hardware" failure class in either log.
async fn logs_mention_no_video(run_dir: &Path) -> bool {
    for name in ["stdout.log", "stderr.log"] {
        if let Ok(text) = tokio::fs::read_to_string(run_dir.join(name)).await {
            if text.contains("NoVideo") || text.contains("No video") {
                return true;
            }
        }
    }
    false
}

/// Invokes the hardware-check collaborator. A failed check writes
/// `failure-reason` (unless the collaborator already did) and stops
/// the batch; an unconfigured check trivially passes.
async fn hardware_ok(record: &RunRecord, config: &Config) -> bool {
    let Some(check) = &config.collaborators.hardware_check else {
        return true;
    };
    warn!("no-video failure detected; checking capture hardware");

    let status = Command::new(check)
        .current_dir(&record.run_dir)
        .stdin(Stdio::null())
        .status()
        .await;
    match status {
        Ok(status) if status.success() => true,
        _ => {
            error!("capture hardware check failed; stopping the batch");
            let reason = record.run_dir.join("failure-reason");
            if !reason.exists() {
                let _ = tokio::fs::write(
                    &reason,
                    "No video signal: capture hardware check failed\n",
                )
                .await;
            }
            false
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::recorder::RunRecord;
    use chrono::Local;
    use std::collections::BTreeSet;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fake_record(run_dir: &Path, exit_status: i32) -> RunRecord {
        RunRecord {
            run_dir: run_dir.to_path_buf(),
            start_time: Local::now(),
            duration: Duration::from_secs(1),
            exit_status,
            interrupted: false,
            artifacts: BTreeSet::new(),
        }
    }

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[tokio::test]
    async fn clean_run_does_not_stop() {
        let temp = TempDir::new().unwrap();
        let config = Config::new(temp.path());
        let hooks = HookRunner::default();
        std::fs::write(temp.path().join("stderr.log"), "").unwrap();

        let stop = classify_and_recover(&fake_record(temp.path(), 0), &config, &hooks).await;
        assert!(!stop);
    }

    #[tokio::test]
    async fn match_timeout_template_is_copied_into_run_dir() {
        let temp = TempDir::new().unwrap();
        let run_dir = temp.path().join("run");
        std::fs::create_dir(&run_dir).unwrap();

        let template = temp.path().join("menu-button.png");
        std::fs::write(&template, b"png bytes").unwrap();
        std::fs::write(
            run_dir.join("stderr.log"),
            format!(
                "MatchTimeout: Didn't find match for '{}' within 10 seconds.\n",
                template.display()
            ),
        )
        .unwrap();

        let config = Config::new(temp.path());
        let hooks = HookRunner::default();
        classify_and_recover(&fake_record(&run_dir, 1), &config, &hooks).await;

        assert_eq!(
            std::fs::read(run_dir.join("menu-button.png")).unwrap(),
            b"png bytes"
        );
    }

    #[tokio::test]
    async fn failing_hardware_check_stops_and_records_reason() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("stderr.log"), "NoVideo: lost the feed\n").unwrap();
        let check = write_script(temp.path(), "check.sh", "exit 1");

        let mut config = Config::new(temp.path());
        config.collaborators.hardware_check = Some(check);
        let hooks = HookRunner::default();

        let stop = classify_and_recover(&fake_record(temp.path(), 1), &config, &hooks).await;
        assert!(stop);
        let reason = std::fs::read_to_string(temp.path().join("failure-reason")).unwrap();
        assert!(reason.contains("hardware"));
    }

    #[tokio::test]
    async fn passing_hardware_check_does_not_stop() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("stdout.log"), "No video\n").unwrap();
        let check = write_script(temp.path(), "check.sh", "exit 0");

        let mut config = Config::new(temp.path());
        config.collaborators.hardware_check = Some(check);
        let hooks = HookRunner::default();

        // exit_status 0 so the recover hook path stays out of the way
        let stop = classify_and_recover(&fake_record(temp.path(), 0), &config, &hooks).await;
        assert!(!stop);
        assert!(!temp.path().join("failure-reason").exists());
    }

    #[tokio::test]
    async fn failing_recover_hook_stops_the_batch() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("stderr.log"), "").unwrap();
        let recover = write_script(temp.path(), "recover.sh", "exit 1");

        let config = Config::new(temp.path());
        let hooks = HookRunner::new(crate::config::Hooks {
            recover: Some(recover),
            ..crate::config::Hooks::default()
        });

        assert!(classify_and_recover(&fake_record(temp.path(), 1), &config, &hooks).await);
        // Passing runs never invoke the recover hook.
        assert!(!classify_and_recover(&fake_record(temp.path(), 0), &config, &hooks).await);
    }
}
