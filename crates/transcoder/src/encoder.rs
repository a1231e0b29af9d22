use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use tokio::process::Command;
use crate::policy::{AudioPlan, EncodePolicy};

/// Lines of ffmpeg stderr kept in error messages
const STDERR_TAIL_LINES: usize = 20;

/// Everything one encoder invocation needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeOptions {
    pub video_codec: String,
    pub crf: u8,
    pub rc_lookahead: u16,
    pub aq_mode: u8,
    pub preset: String,
    /// None copies the audio streams
    pub audio_codec: Option<String>,
    pub audio_bitrate: Option<String>,
    /// Subtitle streams (by position among subtitles) not copied, with their encoder
    pub subtitle_codecs: Vec<(usize, String)>,
    /// ffmpeg `-map` selector; "0" takes every stream of the input
    pub stream_selector: String,
    pub container_format: String,
}

impl EncodeOptions {
    pub fn from_policy(policy: &EncodePolicy) -> Self {
        let (audio_codec, audio_bitrate) = match &policy.audio {
            AudioPlan::Copy => (None, None),
            AudioPlan::Reencode { codec, bitrate } => (Some(codec.clone()), Some(bitrate.clone())),
        };
        Self {
            video_codec: policy.video_codec.to_string(),
            crf: policy.crf,
            rc_lookahead: policy.tuning.rc_lookahead,
            aq_mode: policy.tuning.aq_mode,
            preset: policy.tuning.preset.clone(),
            audio_codec,
            audio_bitrate,
            subtitle_codecs: policy
                .subtitles
                .iter()
                .map(|c| (c.position, c.codec.to_string()))
                .collect(),
            stream_selector: "0".to_string(),
            container_format: policy.container_format.to_string(),
        }
    }
}

/// Produces a transcoded file; an existing output is overwritten
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(&self, input: &Path, output: &Path, options: &EncodeOptions) -> Result<()>;
}

/// Runs the ffmpeg binary
#[derive(Debug, Clone)]
pub struct FfmpegCli {
    pub ffmpeg_bin: PathBuf,
}

impl FfmpegCli {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
        }
    }

    /// Build the ffmpeg argument list for one encode
    pub fn build_args(input: &Path, output: &Path, options: &EncodeOptions) -> Vec<String> {
        let mut args = Vec::new();

        args.push("-hide_banner".to_string());
        args.push("-nostdin".to_string());
        args.push("-v".to_string());
        args.push("error".to_string());
        args.push("-y".to_string());

        args.push("-i".to_string());
        args.push(input.to_string_lossy().to_string());

        args.push("-map".to_string());
        args.push(options.stream_selector.clone());

        // Video
        args.push("-c:v".to_string());
        args.push(options.video_codec.clone());
        args.push("-crf".to_string());
        args.push(options.crf.to_string());
        args.push("-preset".to_string());
        args.push(options.preset.clone());
        args.push("-x265-params".to_string());
        args.push(format!(
            "rc-lookahead={}:aq-mode={}",
            options.rc_lookahead, options.aq_mode
        ));

        // Audio
        args.push("-c:a".to_string());
        match &options.audio_codec {
            Some(codec) => {
                args.push(codec.clone());
                if let Some(bitrate) = &options.audio_bitrate {
                    args.push("-b:a".to_string());
                    args.push(bitrate.clone());
                }
            }
            None => args.push("copy".to_string()),
        }

        // Subtitles: copy, except codecs the container can't hold
        args.push("-c:s".to_string());
        args.push("copy".to_string());
        for (position, codec) in &options.subtitle_codecs {
            args.push(format!("-c:s:{}", position));
            args.push(codec.clone());
        }

        args.push("-f".to_string());
        args.push(options.container_format.clone());
        args.push(output.to_string_lossy().to_string());

        args
    }
}

#[async_trait]
impl Encoder for FfmpegCli {
    async fn encode(&self, input: &Path, output: &Path, options: &EncodeOptions) -> Result<()> {
        let args = Self::build_args(input, output, options);
        debug!("ffmpeg args: {:?}", args);

        let result = Command::new(&self.ffmpeg_bin)
            .args(&args)
            .output()
            .await
            .with_context(|| format!("Failed to execute ffmpeg for: {}", input.display()))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            anyhow::bail!(
                "ffmpeg exit code {}: {}",
                result.status.code().unwrap_or(-1),
                tail
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tuning;
    use crate::policy::SubtitleConversion;

    fn policy(audio: AudioPlan) -> EncodePolicy {
        EncodePolicy {
            crf: 21,
            audio,
            subtitles: vec![],
            tuning: Tuning {
                rc_lookahead: 30,
                aq_mode: 3,
                preset: "slow".to_string(),
            },
            video_codec: "libx265",
            container_format: "matroska",
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_args_for_copied_audio() {
        let opts = EncodeOptions::from_policy(&policy(AudioPlan::Copy));
        let args = FfmpegCli::build_args(Path::new("/in/a.mp4"), Path::new("/in/a(1).mkv"), &opts);

        assert_eq!(value_after(&args, "-i"), Some("/in/a.mp4"));
        assert_eq!(value_after(&args, "-map"), Some("0"));
        assert_eq!(value_after(&args, "-c:v"), Some("libx265"));
        assert_eq!(value_after(&args, "-crf"), Some("21"));
        assert_eq!(value_after(&args, "-preset"), Some("slow"));
        assert_eq!(value_after(&args, "-x265-params"), Some("rc-lookahead=30:aq-mode=3"));
        assert_eq!(value_after(&args, "-c:a"), Some("copy"));
        assert!(!args.iter().any(|a| a == "-b:a"));
        assert_eq!(value_after(&args, "-c:s"), Some("copy"));
        assert!(!args.iter().any(|a| a.starts_with("-c:s:")));
        assert_eq!(value_after(&args, "-f"), Some("matroska"));
        assert!(args.iter().any(|a| a == "-y"));
        assert_eq!(args.last().map(String::as_str), Some("/in/a(1).mkv"));
    }

    #[test]
    fn test_args_for_reencoded_audio() {
        let opts = EncodeOptions::from_policy(&policy(AudioPlan::Reencode {
            codec: "eac3".to_string(),
            bitrate: "640k".to_string(),
        }));
        assert_eq!(opts.audio_codec.as_deref(), Some("eac3"));

        let args = FfmpegCli::build_args(Path::new("a.mkv"), Path::new("a(1).mkv"), &opts);
        assert_eq!(value_after(&args, "-c:a"), Some("eac3"));
        assert_eq!(value_after(&args, "-b:a"), Some("640k"));
    }

    #[test]
    fn test_mov_text_subtitles_become_srt() {
        let mut with_mov_text = policy(AudioPlan::Copy);
        with_mov_text.subtitles = vec![SubtitleConversion { position: 2, codec: "srt" }];
        let opts = EncodeOptions::from_policy(&with_mov_text);

        let args = FfmpegCli::build_args(Path::new("a.mp4"), Path::new("a(1).mkv"), &opts);
        assert_eq!(value_after(&args, "-c:s"), Some("copy"));
        assert_eq!(value_after(&args, "-c:s:2"), Some("srt"));
        let copy_at = args.iter().position(|a| a == "-c:s").unwrap();
        let srt_at = args.iter().position(|a| a == "-c:s:2").unwrap();
        assert!(copy_at < srt_at);
    }
}
