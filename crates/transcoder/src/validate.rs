use humansize::{format_size, DECIMAL};
use log::{info, warn};
use crate::ffprobe::StreamDescriptor;

/// Outcome of the size gate
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// New/old ratio within bounds
    Accept { ratio: f64 },
    /// New/old ratio outside bounds; the original is kept
    Reject { ratio: f64 },
    /// A byte-size tag is missing or zero, so no ratio exists
    Unmeasurable(String),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accept { .. })
    }
}

/// Whether `new_size / old_size` lies within `[min_pct, max_pct]` percent
///
/// Computed on integers so ratios sitting exactly on a threshold are
/// accepted regardless of float rounding.
pub fn ratio_within(old_size: u64, new_size: u64, min_pct: u32, max_pct: u32) -> bool {
    let scaled_new = new_size as u128 * 100;
    let too_large = scaled_new > old_size as u128 * max_pct as u128;
    let too_small = scaled_new < old_size as u128 * min_pct as u128;
    !(too_large || too_small)
}

/// Compare the transcoded video stream against the original one
pub fn validate(
    old_video: &StreamDescriptor,
    new_video: &StreamDescriptor,
    min_pct: u32,
    max_pct: u32,
) -> Verdict {
    let old_size = match old_video.byte_size {
        Some(size) if size > 0 => size,
        _ => return Verdict::Unmeasurable("original video stream has no byte size tag".to_string()),
    };
    let Some(new_size) = new_video.byte_size else {
        return Verdict::Unmeasurable("transcoded video stream has no byte size tag".to_string());
    };

    let ratio = new_size as f64 / old_size as f64;
    if ratio_within(old_size, new_size, min_pct, max_pct) {
        info!(
            "Video is {:.2}% of original ({} vs {})",
            ratio * 100.0,
            format_size(new_size, DECIMAL),
            format_size(old_size, DECIMAL)
        );
        Verdict::Accept { ratio }
    } else {
        warn!(
            "Video is {:.2}% of original ({} vs {}), outside {}-{}%",
            ratio * 100.0,
            format_size(new_size, DECIMAL),
            format_size(old_size, DECIMAL),
            min_pct,
            max_pct
        );
        Verdict::Reject { ratio }
    }
}
