use log::{info, warn};
use crate::config::{CrfTable, RunConfig, Tuning};
use crate::error::RunError;
use crate::ffprobe::StreamDescriptor;
use crate::job::FileJob;

/// Codec name ffprobe reports for files that need no work
pub const TARGET_CODEC: &str = "hevc";
/// ffmpeg encoder producing `TARGET_CODEC`
pub const TARGET_ENCODER: &str = "libx265";
/// ffmpeg muxer for the output container
pub const TARGET_FORMAT: &str = "matroska";
/// File extension matching `TARGET_FORMAT`
pub const TARGET_EXTENSION: &str = "mkv";

pub const DTS_CODEC: &str = "dts";
pub const DTS_REPLACEMENT_CODEC: &str = "eac3";
pub const DTS_REPLACEMENT_BITRATE: &str = "640k";

/// Subtitle codecs matroska cannot store, and the encoder used in their place
const SUBTITLE_REPLACEMENTS: &[(&str, &str)] = &[("mov_text", "srt")];

/// Widest frame each CRF bucket covers
const SD_MAX_WIDTH: u32 = 640;
const HD_MAX_WIDTH: u32 = 1280;
const FULL_HD_MAX_WIDTH: u32 = 1920;
const UHD_MAX_WIDTH: u32 = 3840;

/// What happens to the audio streams of a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioPlan {
    /// Every audio stream is copied unchanged
    Copy,
    /// Every audio stream is re-encoded
    Reencode { codec: String, bitrate: String },
}

/// A subtitle stream that is converted instead of copied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleConversion {
    /// Position among the file's subtitle streams, as in ffmpeg's `-c:s:N`
    pub position: usize,
    pub codec: &'static str,
}

/// Encoding settings resolved for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodePolicy {
    pub crf: u8,
    pub audio: AudioPlan,
    /// Subtitles not listed here are copied
    pub subtitles: Vec<SubtitleConversion>,
    pub tuning: Tuning,
    pub video_codec: &'static str,
    pub container_format: &'static str,
}

/// CRF for a frame width, or None above the UHD bucket
///
/// SD (640x480), HD (1280x720), Full HD (1920x1080) and UHD (3840x2160) are
/// bucketed on width so letterboxed and cropped sources land with their peers.
pub fn crf_for(table: &CrfTable, width: u32) -> Option<u8> {
    match width {
        w if w <= SD_MAX_WIDTH => Some(table.sd),
        w if w <= HD_MAX_WIDTH => Some(table.hd),
        w if w <= FULL_HD_MAX_WIDTH => Some(table.full_hd),
        w if w <= UHD_MAX_WIDTH => Some(table.uhd),
        _ => None,
    }
}

fn is_dts(stream: &StreamDescriptor) -> bool {
    stream.codec_name.eq_ignore_ascii_case(DTS_CODEC)
}

/// Non-DTS audio streams that DTS conversion re-encodes along with the DTS ones
pub fn collateral_reencodes(audio_streams: &[StreamDescriptor], convert_dts: bool) -> usize {
    if !convert_dts || !audio_streams.iter().any(is_dts) {
        return 0;
    }
    audio_streams.iter().filter(|s| !is_dts(s)).count()
}

/// Decide whether the audio streams are copied or converted
///
/// A single DTS stream switches every audio stream to E-AC-3, including
/// streams that are not DTS.
pub fn audio_plan_for(audio_streams: &[StreamDescriptor], convert_dts: bool) -> AudioPlan {
    if !convert_dts || !audio_streams.iter().any(is_dts) {
        return AudioPlan::Copy;
    }

    let collateral = collateral_reencodes(audio_streams, convert_dts);
    if collateral > 0 {
        warn!(
            "DTS conversion to {} will also re-encode {} non-DTS audio stream(s)",
            DTS_REPLACEMENT_CODEC, collateral
        );
    }

    AudioPlan::Reencode {
        codec: DTS_REPLACEMENT_CODEC.to_string(),
        bitrate: DTS_REPLACEMENT_BITRATE.to_string(),
    }
}

/// Subtitle streams that must be converted to fit in matroska
pub fn subtitle_conversions_for(subtitle_streams: &[StreamDescriptor]) -> Vec<SubtitleConversion> {
    subtitle_streams
        .iter()
        .enumerate()
        .filter_map(|(position, stream)| {
            SUBTITLE_REPLACEMENTS
                .iter()
                .find(|(from, _)| stream.codec_name.eq_ignore_ascii_case(from))
                .map(|&(_, codec)| SubtitleConversion { position, codec })
        })
        .collect()
}

/// Build the encode policy for an eligible job with the given video width
pub fn resolve_policy(cfg: &RunConfig, job: &FileJob, width: u32) -> Result<EncodePolicy, RunError> {
    let crf = crf_for(&cfg.crf, width).ok_or_else(|| RunError::UnsupportedResolution {
        path: job.source_path.clone(),
        width,
        height: job.video_stream().and_then(|v| v.height).unwrap_or(0),
    })?;

    let audio = audio_plan_for(&job.audio_streams, cfg.convert_dts);
    let subtitles = subtitle_conversions_for(&job.subtitle_streams);
    info!(
        "Job {}: crf {} for width {}, audio {:?}",
        job.id, crf, width, audio
    );
    for conv in &subtitles {
        info!("Job {}: subtitle stream {} converted to {}", job.id, conv.position, conv.codec);
    }

    Ok(EncodePolicy {
        crf,
        audio,
        subtitles,
        tuning: cfg.tuning.clone(),
        video_codec: TARGET_ENCODER,
        container_format: TARGET_FORMAT,
    })
}
