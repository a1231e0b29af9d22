use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{bail, Result};
use log::{error, info, warn};
use crate::encoder::{EncodeOptions, Encoder};
use crate::job::FileJob;
use crate::policy::{EncodePolicy, TARGET_EXTENSION};

/// Highest numeric suffix tried before giving up on a directory
pub const MAX_NAME_SUFFIX: u32 = 10_000;

/// Result of the encode retry loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutcome {
    /// The encoder succeeded and wrote this file
    Encoded(PathBuf),
    /// Every attempt failed; `FileJob::failed` is set
    Exhausted,
}

/// First free `<stem>(N).<ext>` next to `path`, N counting from 1
pub fn unique_sibling(path: &Path, ext: &str) -> Result<PathBuf> {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    for counter in 1..=MAX_NAME_SUFFIX {
        let candidate = parent.join(format!("{}({}).{}", stem, counter, ext));
        // symlink_metadata so a dangling link still counts as taken
        if fs::symlink_metadata(&candidate).is_err() {
            return Ok(candidate);
        }
    }

    bail!(
        "no free output name for {} after {} candidates",
        path.display(),
        MAX_NAME_SUFFIX
    )
}

/// Where the transcode of `source` is written
pub fn output_path_for(source: &Path) -> Result<PathBuf> {
    unique_sibling(source, TARGET_EXTENSION)
}

/// Encode a job's source file, retrying up to `retry_budget` attempts
///
/// The source is only read. A partial output left by a failed final attempt
/// stays on disk at `converted_path`; the caller discards it.
pub async fn transcode(
    job: &mut FileJob,
    policy: &EncodePolicy,
    retry_budget: u32,
    encoder: &dyn Encoder,
) -> Result<TranscodeOutcome> {
    let output = output_path_for(&job.source_path)?;
    let options = EncodeOptions::from_policy(policy);

    while job.attempts < retry_budget {
        job.attempts += 1;
        job.converted_path = Some(output.clone());
        info!(
            "Job {}: Transcoding to {} (attempt {}/{})",
            job.id,
            output.display(),
            job.attempts,
            retry_budget
        );

        match encoder.encode(&job.source_path, &output, &options).await {
            Ok(()) if output.exists() => {
                info!("Job {}: Transcoding completed: {}", job.id, output.display());
                return Ok(TranscodeOutcome::Encoded(output));
            }
            Ok(()) => {
                warn!(
                    "Job {}: encoder reported success but {} does not exist",
                    job.id,
                    output.display()
                );
            }
            Err(e) => {
                error!("Job {}: ffmpeg error transcoding {}: {:#}", job.id, output.display(), e);
            }
        }
    }

    error!(
        "Job {}: ffmpeg transcoding failed after {} attempts for {}",
        job.id,
        job.attempts,
        job.source_path.display()
    );
    job.failed = true;
    Ok(TranscodeOutcome::Exhausted)
}
