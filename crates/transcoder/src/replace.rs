use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use filetime::FileTime;
use log::{debug, error, info};
use tokio::process::Command;
use crate::error::RunError;
use crate::job::FileJob;
use crate::orchestrator::unique_sibling;
use crate::policy::TARGET_EXTENSION;

/// Rewrites a container without touching its streams
#[async_trait]
pub trait Remuxer: Send + Sync {
    async fn remux(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Remuxes with mkvmerge from MKVToolNix, which writes fresh statistics tags
#[derive(Debug, Clone)]
pub struct MkvMerge {
    pub mkvmerge_bin: PathBuf,
}

impl MkvMerge {
    pub fn new(mkvmerge_bin: impl Into<PathBuf>) -> Self {
        Self {
            mkvmerge_bin: mkvmerge_bin.into(),
        }
    }
}

#[async_trait]
impl Remuxer for MkvMerge {
    async fn remux(&self, input: &Path, output: &Path) -> Result<()> {
        let result = Command::new(&self.mkvmerge_bin)
            .arg("-q")
            .arg("-o")
            .arg(output)
            .arg(input)
            .output()
            .await
            .with_context(|| format!("Failed to execute mkvmerge for: {}", input.display()))?;

        // 1 means the file was written with warnings
        match result.status.code() {
            Some(0) | Some(1) => Ok(()),
            code => {
                let stdout = String::from_utf8_lossy(&result.stdout);
                Err(anyhow!(
                    "mkvmerge exit code {}: {}",
                    code.unwrap_or(-1),
                    stdout.trim()
                ))
            }
        }
    }
}

fn converted_path(job: &FileJob) -> Result<PathBuf, RunError> {
    job.converted_path
        .clone()
        .ok_or_else(|| RunError::commit(&job.source_path, anyhow!("job has no transcoded file")))
}

/// Remux the transcoded file in place so its stream statistics tags are current
///
/// ffmpeg's tags describe the source streams; mkvmerge recomputes them.
/// On failure the transcode is discarded before the error is returned.
pub async fn refresh_container(job: &mut FileJob, remuxer: &dyn Remuxer) -> Result<(), RunError> {
    let converted = converted_path(job)?;
    let result = remux_over(&job.id, &converted, remuxer).await;
    if result.is_err() {
        discard(job);
    }
    result.map_err(|e| RunError::commit(&converted, e))
}

async fn remux_over(id: &str, converted: &Path, remuxer: &dyn Remuxer) -> Result<()> {
    let tmp = unique_sibling(converted, TARGET_EXTENSION)?;

    info!("Job {}: Remuxing to update metadata: {}", id, converted.display());
    if let Err(e) = remuxer.remux(converted, &tmp).await {
        if tmp.exists() {
            let _ = fs::remove_file(&tmp);
        }
        return Err(e);
    }

    if let Err(e) = fs::rename(&tmp, converted) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| {
            format!("Failed to move {} over {}", tmp.display(), converted.display())
        });
    }
    Ok(())
}

/// Copy modified and accessed times of `from` onto `to`
pub fn copy_timestamps(from: &Path, to: &Path) -> Result<()> {
    let meta = fs::metadata(from)
        .with_context(|| format!("Failed to stat original file: {}", from.display()))?;
    let mtime = FileTime::from_last_modification_time(&meta);
    let atime = FileTime::from_last_access_time(&meta);
    filetime::set_file_times(to, atime, mtime)
        .with_context(|| format!("Failed to set timestamps on: {}", to.display()))?;
    debug!("Copied timestamps of {} to {}", from.display(), to.display());
    Ok(())
}

/// Put `replacement` at `original`'s path, keeping a backup until the rename has succeeded
fn swap_in(original: &Path, replacement: &Path) -> Result<()> {
    let ext = original
        .extension()
        .map(|e| format!("{}.orig", e.to_string_lossy()))
        .unwrap_or_else(|| "orig".to_string());
    let backup = unique_sibling(original, &ext)?;

    fs::rename(original, &backup)
        .with_context(|| format!("Failed to back up original file: {} -> {}", original.display(), backup.display()))?;

    if let Err(e) = fs::rename(replacement, original) {
        return match fs::rename(&backup, original) {
            Ok(()) => Err(e).with_context(|| {
                format!("Failed to replace {} (original restored)", original.display())
            }),
            Err(restore) => Err(anyhow!(
                "Failed to replace {}: {}; restoring backup {} also failed: {}",
                original.display(),
                e,
                backup.display(),
                restore
            )),
        };
    }

    fs::remove_file(&backup)
        .with_context(|| format!("Failed to delete original backup file: {}", backup.display()))
}

/// Replace the original file with the accepted transcode, keeping its timestamps
///
/// Only modified and accessed times carry over; creation time is whatever
/// the new file got.
pub fn commit(job: &FileJob) -> Result<(), RunError> {
    let converted = converted_path(job)?;
    let original = &job.source_path;

    copy_timestamps(original, &converted).map_err(|e| RunError::commit(original, e))?;

    info!(
        "Job {}: Moving {} to {}",
        job.id,
        converted.display(),
        original.display()
    );
    swap_in(original, &converted).map_err(|e| RunError::commit(original, e))
}

/// Delete the transcoded artifact of a rejected or failed job, if any
///
/// `converted_path` is cleared only once nothing is left on disk.
pub fn discard(job: &mut FileJob) {
    let Some(converted) = job.converted_path.as_deref() else {
        return;
    };
    if fs::symlink_metadata(converted).is_ok() {
        if let Err(e) = fs::remove_file(converted) {
            error!("Job {}: Failed to remove {}: {}", job.id, converted.display(), e);
            return;
        }
        info!("Job {}: 🗑️  Removed {}", job.id, converted.display());
    }
    job.converted_path = None;
}
