use std::path::Path;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use crate::config::RunConfig;
use crate::eligibility::{eligibility, Ineligible};
use crate::encoder::{Encoder, FfmpegCli};
use crate::error::RunError;
use crate::ffprobe::{self, FfprobeCli, Prober};
use crate::job::FileJob;
use crate::nzbget;
use crate::orchestrator::{transcode, TranscodeOutcome};
use crate::policy::resolve_policy;
use crate::replace::{self, MkvMerge, Remuxer};
use crate::scan::scan_directory;
use crate::validate::{validate, Verdict};

/// The external tools a run drives
pub struct Toolchain {
    pub prober: Box<dyn Prober>,
    pub encoder: Box<dyn Encoder>,
    pub remuxer: Box<dyn Remuxer>,
}

impl Toolchain {
    /// ffprobe, ffmpeg and mkvmerge at the configured paths
    pub fn from_config(cfg: &RunConfig) -> Self {
        Self {
            prober: Box::new(FfprobeCli::new(cfg.tools.ffprobe.clone())),
            encoder: Box::new(FfmpegCli::new(cfg.tools.ffmpeg.clone())),
            remuxer: Box::new(MkvMerge::new(cfg.tools.mkvmerge.clone())),
        }
    }
}

/// Terminal status of a run, reported to NZBGet as the exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    ParCheck,
    Success,
    Error,
    NothingToDo,
}

impl RunStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::ParCheck => nzbget::POSTPROCESS_PARCHECK,
            RunStatus::Success => nzbget::POSTPROCESS_SUCCESS,
            RunStatus::Error => nzbget::POSTPROCESS_ERROR,
            RunStatus::NothingToDo => nzbget::POSTPROCESS_NONE,
        }
    }
}

/// How a single file left the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    /// Not a transcoding candidate
    Skipped(String),
    /// Encoding did not produce a usable file
    Failed,
    /// Transcode discarded, original kept
    Rejected,
    /// Original replaced by the transcode
    Replaced,
}

/// Counters for a finished run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub scanned: usize,
    pub skipped: usize,
    pub eligible: usize,
    pub failed: usize,
    pub rejected: usize,
    pub replaced: usize,
}

impl RunSummary {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            scanned: 0,
            skipped: 0,
            eligible: 0,
            failed: 0,
            rejected: 0,
            replaced: 0,
        }
    }

    fn record(&mut self, outcome: &FileOutcome) {
        self.scanned += 1;
        match outcome {
            FileOutcome::Skipped(_) => self.skipped += 1,
            FileOutcome::Failed => {
                self.eligible += 1;
                self.failed += 1;
            }
            FileOutcome::Rejected => {
                self.eligible += 1;
                self.rejected += 1;
            }
            FileOutcome::Replaced => {
                self.eligible += 1;
                self.replaced += 1;
            }
        }
    }

    /// Per-file failures do not affect the status; only whether anything was eligible does
    pub fn status(&self) -> RunStatus {
        if self.eligible == 0 {
            RunStatus::NothingToDo
        } else {
            RunStatus::Success
        }
    }
}

/// Post-process every matching file under `root`, one at a time
pub async fn run(root: &Path, cfg: &RunConfig, tools: &Toolchain) -> Result<RunSummary, RunError> {
    if !root.is_dir() {
        return Err(RunError::DestinationMissing(root.to_path_buf()));
    }

    let mut summary = RunSummary::new();
    let candidates = scan_directory(root, cfg);
    info!("Found {} file(s) to check", candidates.len());

    for path in candidates {
        let outcome = process_file(&path, cfg, tools).await?;
        summary.record(&outcome);
    }

    let finished_at = Utc::now();
    summary.finished_at = Some(finished_at);
    info!(
        "Run finished in {}s: {} scanned, {} eligible, {} replaced, {} rejected, {} failed, {} skipped",
        (finished_at - summary.started_at).num_seconds(),
        summary.scanned,
        summary.eligible,
        summary.replaced,
        summary.rejected,
        summary.failed,
        summary.skipped
    );
    Ok(summary)
}

/// Take one file from inspection to replacement
///
/// Per-file problems end in an outcome; only run-level conditions are errors.
pub async fn process_file(path: &Path, cfg: &RunConfig, tools: &Toolchain) -> Result<FileOutcome, RunError> {
    info!("Checking file: {}", path.display());

    let streams = match ffprobe::inspect(tools.prober.as_ref(), path).await {
        Ok(s) => s,
        Err(e) => {
            error!("Skipping {}: ffprobe failed: {:#}", path.display(), e);
            return Ok(FileOutcome::Skipped("probe failed".to_string()));
        }
    };
    let mut job = FileJob::new(path, streams);

    if let Err(reason) = eligibility(&job) {
        match reason {
            Ineligible::AlreadyConverted => info!("Skipping file ({}): {}", reason, job.display_name()),
            Ineligible::VideoStreamCount(_) => warn!("Skipping as {} in: {}", reason, job.display_name()),
        }
        return Ok(FileOutcome::Skipped(reason.to_string()));
    }

    let Some(old_video) = job.video_stream().cloned() else {
        return Ok(FileOutcome::Skipped("no video stream".to_string()));
    };
    let Some(width) = old_video.width else {
        warn!("Skipping {}: video stream reports no width", job.display_name());
        return Ok(FileOutcome::Skipped("unknown resolution".to_string()));
    };

    info!("Job {}: Found {} to be processed", job.id, path.display());
    let policy = resolve_policy(cfg, &job, width)?;

    match transcode(&mut job, &policy, cfg.retry_budget, tools.encoder.as_ref()).await {
        Ok(TranscodeOutcome::Encoded(_)) => {}
        Ok(TranscodeOutcome::Exhausted) => {
            replace::discard(&mut job);
            return Ok(FileOutcome::Failed);
        }
        Err(e) => {
            error!("Job {}: {:#}", job.id, e);
            replace::discard(&mut job);
            return Ok(FileOutcome::Failed);
        }
    }

    replace::refresh_container(&mut job, tools.remuxer.as_ref()).await?;

    let verdict = match new_video_stream(&job, tools.prober.as_ref()).await {
        Ok(new_video) => validate(&old_video, &new_video, cfg.min_percent, cfg.max_percent),
        Err(reason) => Verdict::Unmeasurable(reason),
    };

    match verdict {
        Verdict::Accept { .. } => {
            replace::commit(&job)?;
            info!("Job {}: ✅ Replaced {}", job.id, path.display());
            Ok(FileOutcome::Replaced)
        }
        Verdict::Reject { .. } => {
            warn!("Job {}: Size gate failed, keeping original {}", job.id, path.display());
            replace::discard(&mut job);
            Ok(FileOutcome::Rejected)
        }
        Verdict::Unmeasurable(reason) => {
            warn!("Job {}: Keeping original, cannot compare sizes: {}", job.id, reason);
            replace::discard(&mut job);
            Ok(FileOutcome::Rejected)
        }
    }
}

/// The single video stream of the remuxed output
async fn new_video_stream(
    job: &FileJob,
    prober: &dyn Prober,
) -> Result<ffprobe::StreamDescriptor, String> {
    let Some(converted) = job.converted_path.as_deref() else {
        return Err("no transcoded file".to_string());
    };
    let streams = ffprobe::inspect(prober, converted)
        .await
        .map_err(|e| format!("ffprobe failed on {}: {:#}", converted.display(), e))?;
    match <[_; 1]>::try_from(streams.video) {
        Ok([video]) => Ok(video),
        Err(videos) => Err(format!("transcode has {} video streams", videos.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunStatus::ParCheck.exit_code(), 92);
        assert_eq!(RunStatus::Success.exit_code(), 93);
        assert_eq!(RunStatus::Error.exit_code(), 94);
        assert_eq!(RunStatus::NothingToDo.exit_code(), 95);
    }

    #[test]
    fn test_status_from_counts() {
        let mut summary = RunSummary::new();
        summary.record(&FileOutcome::Skipped("already in hevc".to_string()));
        assert_eq!(summary.status(), RunStatus::NothingToDo);

        summary.record(&FileOutcome::Failed);
        assert_eq!(summary.status(), RunStatus::Success);
        assert_eq!((summary.scanned, summary.eligible, summary.failed), (2, 1, 1));
    }
}
