use std::fmt;
use crate::job::FileJob;
use crate::policy::TARGET_CODEC;

/// Why a scanned file is left alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ineligible {
    /// No video stream, or more than one
    VideoStreamCount(usize),
    /// The only video stream is already in the target codec
    AlreadyConverted,
}

impl fmt::Display for Ineligible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ineligible::VideoStreamCount(0) => write!(f, "no video stream found"),
            Ineligible::VideoStreamCount(n) => write!(f, "{} video streams found, expected one", n),
            Ineligible::AlreadyConverted => write!(f, "already in {}", TARGET_CODEC),
        }
    }
}

/// Decide whether a job should be transcoded
pub fn eligibility(job: &FileJob) -> Result<(), Ineligible> {
    let [video] = job.video_streams.as_slice() else {
        return Err(Ineligible::VideoStreamCount(job.video_streams.len()));
    };
    if video.codec_name.eq_ignore_ascii_case(TARGET_CODEC) {
        return Err(Ineligible::AlreadyConverted);
    }
    Ok(())
}

pub fn is_eligible(job: &FileJob) -> bool {
    eligibility(job).is_ok()
}
